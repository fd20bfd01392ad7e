pub mod authorization;
pub mod role;

pub use authorization::Entity as Authorization;
pub use role::Entity as Role;
