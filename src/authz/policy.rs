use kdl::{KdlDocument, KdlNode};

use crate::authz::config::DefaultAccess;
use crate::authz::engine::Effect;
use crate::authz::errors::ConfigurationError;

/// A policy file before guards are resolved and rules are validated.
#[derive(Debug, Clone, Default)]
pub struct ParsedPolicy {
    pub default_access: Option<DefaultAccess>,
    pub rules: Vec<RuleDecl>,
}

/// One `allow`/`deny` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDecl {
    pub effect: Effect,
    pub roles: Vec<String>,
    pub who: Option<String>,
    pub that: Option<String>,
    pub of: Option<Vec<String>>,
    pub on: Option<Vec<String>>,
    pub to: Option<Vec<String>>,
    pub from: Option<Vec<String>>,
    /// Guard name given as `if`.
    pub when: Option<String>,
    pub unless: Option<String>,
}

impl RuleDecl {
    fn new(effect: Effect, roles: Vec<String>) -> Self {
        Self {
            effect,
            roles,
            who: None,
            that: None,
            of: None,
            on: None,
            to: None,
            from: None,
            when: None,
            unless: None,
        }
    }
}

/// Parse a KDL document string into a policy.
pub fn parse_kdl_document(source: &str) -> Result<ParsedPolicy, ConfigurationError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| ConfigurationError::KdlParse(e.to_string()))?;

    let mut policy = ParsedPolicy::default();

    for node in doc.nodes() {
        match node.name().value() {
            "default-access" => {
                let value = first_string_arg(node).ok_or_else(|| {
                    ConfigurationError::InvalidPolicy(
                        "default-access node requires a string argument (e.g. default-access \"deny\")"
                            .into(),
                    )
                })?;
                policy.default_access = Some(parse_default_access(&value)?);
            }
            "allow" => policy.rules.push(parse_rule(node, Effect::Allow)?),
            "deny" => policy.rules.push(parse_rule(node, Effect::Deny)?),
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(policy)
}

fn parse_default_access(value: &str) -> Result<DefaultAccess, ConfigurationError> {
    match value {
        "allow" => Ok(DefaultAccess::Allow),
        "deny" => Ok(DefaultAccess::Deny),
        other => Err(ConfigurationError::InvalidPolicy(format!(
            "default-access must be \"allow\" or \"deny\", got `{other}`"
        ))),
    }
}

fn parse_rule(node: &KdlNode, effect: Effect) -> Result<RuleDecl, ConfigurationError> {
    let kind = effect.as_str();
    let roles = string_args(node);
    if roles.is_empty() {
        return Err(ConfigurationError::InvalidPolicy(format!(
            "{kind} node requires at least one role argument (e.g. {kind} \"admin\")"
        )));
    }
    let mut decl = RuleDecl::new(effect, roles);

    for entry in node.entries() {
        let Some(name) = entry.name() else {
            continue;
        };
        let name = name.value();
        let value = entry.value().as_string().ok_or_else(|| {
            ConfigurationError::InvalidPolicy(format!(
                "property `{name}` of {kind} `{}` must be a string",
                decl.roles.join(", ")
            ))
        })?;
        set_option(&mut decl, name, OptionValue::Scalar(value.to_string()))?;
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let name = child.name().value();
            let value = match name {
                "to" | "from" | "of" | "on" => OptionValue::List(dash_list(child)),
                _ => OptionValue::Scalar(first_string_arg(child).ok_or_else(|| {
                    ConfigurationError::InvalidPolicy(format!(
                        "child `{name}` of {kind} `{}` requires a string argument",
                        decl.roles.join(", ")
                    ))
                })?),
            };
            set_option(&mut decl, name, value)?;
        }
    }

    Ok(decl)
}

enum OptionValue {
    Scalar(String),
    List(Vec<String>),
}

impl OptionValue {
    fn into_list(self) -> Vec<String> {
        match self {
            OptionValue::Scalar(s) => vec![s],
            OptionValue::List(l) => l,
        }
    }

    fn into_scalar(self, name: &str) -> Result<String, ConfigurationError> {
        match self {
            OptionValue::Scalar(s) => Ok(s),
            OptionValue::List(_) => Err(ConfigurationError::InvalidPolicy(format!(
                "`{name}` takes a single string"
            ))),
        }
    }
}

fn set_option(
    decl: &mut RuleDecl,
    name: &str,
    value: OptionValue,
) -> Result<(), ConfigurationError> {
    let slot_taken = |taken: bool| {
        if taken {
            Err(ConfigurationError::InvalidPolicy(format!(
                "`{name}` given more than once for {} `{}`",
                decl.effect.as_str(),
                decl.roles.join(", ")
            )))
        } else {
            Ok(())
        }
    };

    match name {
        "who" => {
            slot_taken(decl.who.is_some())?;
            decl.who = Some(value.into_scalar(name)?);
        }
        "that" => {
            slot_taken(decl.that.is_some())?;
            decl.that = Some(value.into_scalar(name)?);
        }
        "if" => {
            slot_taken(decl.when.is_some())?;
            decl.when = Some(value.into_scalar(name)?);
        }
        "unless" => {
            slot_taken(decl.unless.is_some())?;
            decl.unless = Some(value.into_scalar(name)?);
        }
        "of" => {
            slot_taken(decl.of.is_some())?;
            decl.of = Some(value.into_list());
        }
        "on" => {
            slot_taken(decl.on.is_some())?;
            decl.on = Some(value.into_list());
        }
        "to" => {
            slot_taken(decl.to.is_some())?;
            decl.to = Some(value.into_list());
        }
        "from" => {
            slot_taken(decl.from.is_some())?;
            decl.from = Some(value.into_list());
        }
        other => {
            return Err(ConfigurationError::InvalidPolicy(format!(
                "unexpected option `{other}` in {} `{}` (expected who, that, of, on, to, from, if or unless)",
                decl.effect.as_str(),
                decl.roles.join(", ")
            )));
        }
    }
    Ok(())
}

/// All positional string arguments of a KDL node.
fn string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// Extract dash-list children: nodes named "-" whose first argument is a string.
/// Example KDL:
/// ```kdl
/// to {
///     - "show"
///     - "edit"
/// }
/// ```
fn dash_list(node: &KdlNode) -> Vec<String> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(first_string_arg)
        .collect()
}
