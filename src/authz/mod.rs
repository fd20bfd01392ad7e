//! Access-control decisions.
//!
//! A [`RuleSet`] holds deny and allow [`Rule`]s indexed by action. Rules
//! name either a reserved role (`everyone`, `guest`, `person`) or persisted
//! roles that are checked against grants through an [`Authority`].
//! Policies can be declared in code or loaded from KDL files.

pub mod condition;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod guard;
pub mod loader;
pub mod memory;
pub mod policy;
pub mod resource;
pub mod rule;
pub mod store;
pub mod types;

pub use config::{DefaultAccess, PermitConfig};
pub use engine::{allowed, denied, RuleSet};
pub use errors::{ConfigurationError, EvaluationError, PermitError};
pub use guard::{Guard, GuardRegistry};
pub use memory::MemoryStore;
pub use resource::{Context, Resource, ResourceRecord};
pub use rule::{Rule, RuleOptions};
pub use store::{Authority, GrantQuery, GrantStore, RoleLookup};
pub use types::{NewRole, ResourceKey, ResourceMatch, Role, Subject, Target};
