use miette::Diagnostic;
use thiserror::Error;

/// Errors raised by role and grant persistence.
///
/// These are returned unchanged through the decision engine; nothing above
/// the store retries or translates them.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("Database error: {0}")]
    #[diagnostic(code(permit::store::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("Invalid role: {0}")]
    #[diagnostic(
        code(permit::store::invalid_role),
        help("A role needs a key and a name, and cannot require a resource it is not allowed to have")
    )]
    InvalidRole(String),

    #[error("Invalid grant: {0}")]
    #[diagnostic(
        code(permit::store::invalid_grant),
        help("Check the role's requires_resource/authorize_resource flags against the resource given")
    )]
    InvalidGrant(String),

    #[error("Duplicate {0}")]
    #[diagnostic(code(permit::store::duplicate))]
    Duplicate(String),

    #[error("Unknown role `{0}`")]
    #[diagnostic(
        code(permit::store::unknown_role),
        help("Create the role first, e.g. `permit role create <key> <name>`")
    )]
    UnknownRole(String),
}
