//! Permit - access control decisions
//!
//! Rules grant or deny actions to reserved roles (`everyone`, `guest`,
//! `person`) or to roles persisted with per-resource grants. This library
//! exposes all modules for the CLI and for testing.

pub mod authz;
pub mod entities;
pub mod errors;
pub mod settings;
pub mod storage;
