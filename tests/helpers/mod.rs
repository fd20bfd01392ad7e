#![allow(dead_code)]

pub mod builders;
pub mod db;

pub use builders::{project, RoleBuilder};
pub use db::TestDb;
