use miette::Diagnostic;
use thiserror::Error;

use crate::errors::StoreError;

/// Raised while building rules, rule sets or policies. Always a mistake in
/// the authorization configuration itself.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigurationError {
    #[error("At least one role must be specified")]
    #[diagnostic(code(permit::config::no_roles))]
    NoRoles,

    #[error("Only one role may be specified when using `person`, `guest`, or `everyone` (got {0})")]
    #[diagnostic(
        code(permit::config::reserved_role),
        help("Split the rule in two, or use only named roles")
    )]
    ReservedRoleNotAlone(String),

    #[error("Either `{0}` or `{1}` may be specified, but not both")]
    #[diagnostic(code(permit::config::conflicting_options))]
    ConflictingOptions(&'static str, &'static str),

    #[error("The `who` and `that` options are only valid for the `person` role")]
    #[diagnostic(code(permit::config::probe_role))]
    ProbeRequiresPerson,

    #[error("When `who` or `that` is specified a corresponding `of` or `on` must be given")]
    #[diagnostic(code(permit::config::probe_target))]
    ProbeRequiresTarget,

    #[error("When `of` or `on` are specified for the `person` role a corresponding `who` or `that` must be given")]
    #[diagnostic(code(permit::config::target_probe))]
    TargetRequiresProbe,

    #[error("The `any` target is only valid for named roles")]
    #[diagnostic(
        code(permit::config::any_target),
        help("`person` rules probe concrete resources; name the context variable instead")
    )]
    AnyTargetForPerson,

    #[error("At least one action must be given to authorize access for")]
    #[diagnostic(code(permit::config::no_actions))]
    NoActions,

    #[error("If `all` is specified for `to`/`from` then no other actions may be given")]
    #[diagnostic(code(permit::config::all_actions))]
    AllWithOtherActions,

    #[error("`{found}` is not valid here, use `{expected}`")]
    #[diagnostic(
        code(permit::config::action_option),
        help("allow rules take `to`, deny rules take `from`, and a bare rule takes neither")
    )]
    MisplacedActionOption {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Unknown guard `{0}`")]
    #[diagnostic(
        code(permit::config::unknown_guard),
        help("Register the guard on the GuardRegistry before loading the policy")
    )]
    UnknownGuard(String),

    #[error("Core models are already bound")]
    #[diagnostic(
        code(permit::config::already_bound),
        help("Use `rebind` to replace the stores after a reload")
    )]
    ModelsAlreadyBound,

    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(permit::config::policy_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid policy: {0}")]
    #[diagnostic(
        code(permit::config::invalid_policy),
        help("Each policy file may contain `default-access`, `allow` and `deny` KDL nodes")
    )]
    InvalidPolicy(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(permit::config::kdl_parse),
        help("Check your KDL file syntax, see https://kdl.dev for the specification")
    )]
    KdlParse(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(permit::config::io))]
    Io(#[from] std::io::Error),
}

/// Raised while matching a rule when runtime data cannot satisfy it.
#[derive(Debug, Error, Diagnostic)]
pub enum EvaluationError {
    #[error("Target resource `{0}` did not exist in the given context")]
    #[diagnostic(code(permit::eval::undeclared_variable))]
    UndeclaredVariable(String),

    #[error("Target `{target}` evaluated as {resource} did not respond to any of the following: {attempted}")]
    #[diagnostic(
        code(permit::eval::unsupported_probe),
        help("Expose one of the listed operations on the resource")
    )]
    UnsupportedProbe {
        target: String,
        resource: String,
        attempted: String,
    },

    #[error("Core models are not bound")]
    #[diagnostic(
        code(permit::eval::unbound),
        help("Call `config::init` with the role and grant stores before evaluating named roles")
    )]
    ModelsNotBound,
}

/// Umbrella error for operations that build, evaluate and hit the store.
#[derive(Debug, Error, Diagnostic)]
pub enum PermitError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}
