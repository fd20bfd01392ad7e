use std::path::Path;
use std::sync::Arc;

use crate::authz::config::PermitConfig;
use crate::authz::engine::{Effect, RuleSet};
use crate::authz::errors::ConfigurationError;
use crate::authz::guard::GuardRegistry;
use crate::authz::policy::{parse_kdl_document, ParsedPolicy, RuleDecl};
use crate::authz::rule::RuleOptions;
use crate::authz::types::{Names, Target, Targets};

/// Load a single `.kdl` file, or every `.kdl` file in a directory.
pub fn load_policy(
    path: &Path,
    guards: &GuardRegistry,
    config: Option<Arc<PermitConfig>>,
) -> Result<RuleSet, ConfigurationError> {
    if path.is_dir() {
        return load_policies(path, guards, config);
    }
    let parsed = read_policy(path)?;
    let rules = compile_policies(vec![parsed], guards, config)?;
    log_loaded(1, &rules);
    Ok(rules)
}

/// Load all `.kdl` policy files from the given directory, in path order,
/// and compile them into a single `RuleSet`.
pub fn load_policies(
    dir: &Path,
    guards: &GuardRegistry,
    config: Option<Arc<PermitConfig>>,
) -> Result<RuleSet, ConfigurationError> {
    if !dir.is_dir() {
        return Err(ConfigurationError::InvalidPolicy(format!(
            "policies directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "kdl")
                .unwrap_or(false)
        })
        .collect();
    entries.sort_by_key(|e| e.path());

    let mut all_parsed = Vec::with_capacity(entries.len());
    for entry in &entries {
        all_parsed.push(read_policy(&entry.path())?);
    }

    let rules = compile_policies(all_parsed, guards, config)?;
    log_loaded(entries.len(), &rules);
    Ok(rules)
}

fn read_policy(path: &Path) -> Result<ParsedPolicy, ConfigurationError> {
    let contents =
        std::fs::read_to_string(path).map_err(|source| ConfigurationError::PolicyLoadError {
            path: path.display().to_string(),
            source,
        })?;
    parse_kdl_document(&contents)
}

fn log_loaded(files: usize, rules: &RuleSet) {
    let (deny, allow) = rules.rule_count();
    tracing::info!(
        files,
        deny_rules = deny,
        allow_rules = allow,
        actions = rules.actions().len(),
        "Loaded authorization policies"
    );
}

/// Merge parsed policies into one `RuleSet`, resolving guard names.
///
/// Rules keep their file order. A later `default-access` overrides an
/// earlier one.
pub fn compile_policies(
    parsed: Vec<ParsedPolicy>,
    guards: &GuardRegistry,
    config: Option<Arc<PermitConfig>>,
) -> Result<RuleSet, ConfigurationError> {
    let mut rules = match config {
        Some(config) => RuleSet::with_config(config),
        None => RuleSet::new(),
    };

    for policy in parsed {
        if let Some(access) = policy.default_access {
            rules.set_default_access(Some(access));
        }
        for decl in policy.rules {
            let effect = decl.effect;
            let roles = Names(decl.roles.clone());
            let options = rule_options(decl, guards)?;
            match effect {
                Effect::Allow => rules.allow(roles, options)?,
                Effect::Deny => rules.deny(roles, options)?,
            };
        }
    }

    Ok(rules)
}

fn rule_options(decl: RuleDecl, guards: &GuardRegistry) -> Result<RuleOptions, ConfigurationError> {
    Ok(RuleOptions {
        who: decl.who,
        that: decl.that,
        of: decl.of.map(targets),
        on: decl.on.map(targets),
        when: decl.when.map(|name| guards.resolve(&name)).transpose()?,
        unless: decl.unless.map(|name| guards.resolve(&name)).transpose()?,
        to: decl.to.map(Names),
        from: decl.from.map(Names),
    })
}

/// `any` and `none` are selectors; everything else names a context variable.
fn targets(tokens: Vec<String>) -> Targets {
    Targets(
        tokens
            .into_iter()
            .map(|token| match token.as_str() {
                "any" => Target::Any,
                "none" => Target::Nil,
                _ => Target::Var(token),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::resource::Context;
    use crate::authz::rule::RoleSelector;
    use crate::authz::types::Subject;
    use std::fs;
    use tempfile::TempDir;

    fn pinned() -> Option<Arc<PermitConfig>> {
        Some(Arc::new(PermitConfig::default()))
    }

    #[test]
    fn test_compile_expands_aliases_and_targets() {
        let parsed = parse_kdl_document(
            r#"
allow "admin" of="any" to="read"
allow "person" who="is_owner" on="none" to="update"
"#,
        )
        .unwrap();
        let rules = compile_policies(vec![parsed], &GuardRegistry::new(), pinned()).unwrap();

        assert_eq!(rules.actions(), vec!["edit", "index", "show", "update"]);
        let admin = &rules.allow_rules("show")[0];
        assert_eq!(admin.targets(), &[Target::Any]);
        let owner = &rules.allow_rules("edit")[0];
        assert_eq!(owner.roles(), &RoleSelector::Person);
        assert_eq!(owner.targets(), &[Target::Nil]);
    }

    #[test]
    fn test_compile_resolves_guards() {
        let parsed =
            parse_kdl_document(r#"allow "person" to="show" if="weekday""#).unwrap();

        let err = compile_policies(vec![parsed.clone()], &GuardRegistry::new(), pinned())
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownGuard(name) if name == "weekday"));

        let mut guards = GuardRegistry::new();
        guards.register("weekday", |_, _| true);
        let rules = compile_policies(vec![parsed], &guards, pinned()).unwrap();
        assert_eq!(rules.allow_rules("show").len(), 1);
    }

    #[test]
    fn test_compile_surfaces_rule_errors() {
        let parsed = parse_kdl_document(r#"allow "person" "admin" to="show""#).unwrap();
        let err = compile_policies(vec![parsed], &GuardRegistry::new(), pinned()).unwrap_err();
        assert!(matches!(err, ConfigurationError::ReservedRoleNotAlone(_)));

        let parsed = parse_kdl_document(r#"deny "guest" to="show""#).unwrap();
        let err = compile_policies(vec![parsed], &GuardRegistry::new(), pinned()).unwrap_err();
        assert!(matches!(err, ConfigurationError::MisplacedActionOption { .. }));
    }

    #[tokio::test]
    async fn test_load_directory_in_path_order() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(
            temp_dir.path().join("10-base.kdl"),
            r#"
default-access "allow"
deny "guest" from="all"
"#,
        )
        .unwrap();
        fs::write(
            temp_dir.path().join("20-override.kdl"),
            r#"
default-access "deny"
allow "person" to="show"
"#,
        )
        .unwrap();
        fs::write(temp_dir.path().join("README.md"), "not a policy").unwrap();

        let rules = load_policy(temp_dir.path(), &GuardRegistry::new(), pinned()).unwrap();
        assert_eq!(rules.rule_count(), (1, 1));

        let ctx = Context::new();
        let bob = Subject::person("bob");
        assert!(rules.permitted(&bob, "show", &ctx).await.unwrap());
        // the later default-access wins
        assert!(!rules.permitted(&bob, "destroy", &ctx).await.unwrap());
        assert!(!rules
            .permitted(&Subject::guest(), "show", &ctx)
            .await
            .unwrap());

        let single = load_policy(
            &temp_dir.path().join("10-base.kdl"),
            &GuardRegistry::new(),
            pinned(),
        )
        .unwrap();
        assert!(single.permitted(&bob, "destroy", &ctx).await.unwrap());
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let err = load_policy(
            &temp_dir.path().join("missing.kdl"),
            &GuardRegistry::new(),
            pinned(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::PolicyLoadError { .. }));
    }
}
