mod helpers;

use std::fs;
use std::sync::Arc;

use helpers::project;
use permit::authz::{
    loader, Authority, Context, EvaluationError, GuardRegistry, MemoryStore, NewRole,
    PermitConfig, PermitError, ResourceKey, RuleOptions, RuleSet, Subject,
};
use proptest::prelude::*;
use tempfile::TempDir;

const POLICY: &str = r#"
default-access "deny"

deny "guest" from="all"
allow "everyone" to="index"

allow "person" who="is_owner" of="project" to="update" unless="archived"

allow "admin" of="any" to="read"

allow "editor" {
    of {
        - "project"
    }
    to {
        - "write"
    }
    if "weekday"
}
"#;

async fn bound_config() -> (Arc<PermitConfig>, Authority) {
    let authority = Authority::from_store(Arc::new(MemoryStore::new()));
    authority
        .create_role(NewRole::new("admin", "Administrator"))
        .await
        .unwrap();
    authority
        .create_role(NewRole::new("editor", "Editor"))
        .await
        .unwrap();
    let config = PermitConfig::default().with_authority(authority.clone());
    (Arc::new(config), authority)
}

fn guards() -> GuardRegistry {
    let mut guards = GuardRegistry::new();
    guards
        .register("archived", |_, ctx| ctx.contains("archived"))
        .register("weekday", |_, ctx| !ctx.contains("weekend"));
    guards
}

#[tokio::test]
async fn test_policy_file_end_to_end() {
    let (config, authority) = bound_config().await;
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("policy.kdl");
    fs::write(&path, POLICY).unwrap();

    let rules = loader::load_policy(&path, &guards(), Some(config)).unwrap();

    let owner = Subject::person("owner");
    let admin = Subject::person("root");
    let editor = Subject::person("ed");
    let p1 = ResourceKey::new("Project", "1");
    authority.authorize(&admin, "admin", Some(&p1)).await.unwrap();
    authority.authorize(&editor, "editor", Some(&p1)).await.unwrap();

    let ctx = Context::new().with("project", project("1", Some(&owner)));

    // guests are denied even where everyone is allowed
    assert!(!rules.permitted(&Subject::guest(), "index", &ctx).await.unwrap());
    assert!(rules.permitted(&owner, "index", &ctx).await.unwrap());

    assert!(rules.permitted(&owner, "edit", &ctx).await.unwrap());
    let archived = ctx.clone().with_nil("archived");
    assert!(!rules.permitted(&owner, "edit", &archived).await.unwrap());

    // `of any` covers grants on any resource
    assert!(rules.permitted(&admin, "show", &Context::new()).await.unwrap());
    assert!(!rules.permitted(&admin, "edit", &ctx).await.unwrap());

    assert!(rules.permitted(&editor, "create", &ctx).await.unwrap());
    let weekend = ctx.clone().with_nil("weekend");
    assert!(!rules.permitted(&editor, "create", &weekend).await.unwrap());

    assert!(!rules.permitted(&owner, "destroy", &ctx).await.unwrap());
}

#[tokio::test]
async fn test_probe_errors_surface() {
    let (config, _) = bound_config().await;
    let mut rules = RuleSet::with_config(config);
    rules
        .allow("person", RuleOptions::new().who("is_member").of("team").to("show"))
        .unwrap();
    let bob = Subject::person("bob");

    let err = rules
        .permitted(&bob, "show", &Context::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PermitError::Evaluation(EvaluationError::UndeclaredVariable(name)) if name == "team"
    ));

    let ctx = Context::new().with("team", project("1", None));
    let err = rules.permitted(&bob, "show", &ctx).await.unwrap_err();
    match err {
        PermitError::Evaluation(EvaluationError::UnsupportedProbe { target, attempted, .. }) => {
            assert_eq!(target, "team");
            assert_eq!(
                attempted,
                "is_member, is_member?, member, member?, members.exists"
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_named_rule_requires_bound_models() {
    let mut rules = RuleSet::with_config(Arc::new(PermitConfig::default()));
    rules.allow("admin", RuleOptions::new().to("show")).unwrap();

    let err = rules
        .permitted(&Subject::person("bob"), "show", &Context::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PermitError::Evaluation(EvaluationError::ModelsNotBound)
    ));
}

// ── Properties ─────────────────────────────────────────────────────

fn arb_action() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "new", "create", "edit", "update", "delete", "destroy", "index", "show", "archive",
    ])
    .prop_map(str::to_string)
}

fn arb_alias() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["create", "update", "destroy", "read", "write"])
        .prop_map(str::to_string)
}

fn pinned() -> Arc<PermitConfig> {
    Arc::new(PermitConfig::default())
}

fn decide(rules: &RuleSet, subject: &Subject, action: &str) -> bool {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(rules.permitted(subject, action, &Context::new()))
        .unwrap()
}

proptest! {
    #[test]
    fn deny_beats_allow(action in arb_action(), allow_first in any::<bool>()) {
        let mut rules = RuleSet::with_config(pinned());
        if allow_first {
            rules.allow("everyone", RuleOptions::new().to(action.as_str())).unwrap();
            rules.deny("person", RuleOptions::new().from(action.as_str())).unwrap();
        } else {
            rules.deny("person", RuleOptions::new().from(action.as_str())).unwrap();
            rules.allow("everyone", RuleOptions::new().to(action.as_str())).unwrap();
        }

        prop_assert!(!decide(&rules, &Subject::person("bob"), &action));
        prop_assert!(decide(&rules, &Subject::guest(), &action));
    }

    #[test]
    fn alias_matches_its_expansion(alias in arb_alias(), action in arb_action()) {
        let config = pinned();
        let expanded = config.action_aliases[&alias].clone();

        let mut by_alias = RuleSet::with_config(config.clone());
        by_alias.allow("person", RuleOptions::new().to(alias.as_str())).unwrap();
        let mut by_actions = RuleSet::with_config(config);
        by_actions.allow("person", RuleOptions::new().to(expanded.clone())).unwrap();

        let bob = Subject::person("bob");
        let allowed = decide(&by_alias, &bob, &action);
        prop_assert_eq!(allowed, decide(&by_actions, &bob, &action));
        prop_assert_eq!(allowed, expanded.contains(&action));
    }

    #[test]
    fn all_covers_every_action(action in "[a-z_]{1,12}") {
        let mut rules = RuleSet::with_config(pinned());
        rules.deny("guest", RuleOptions::new().from("all")).unwrap();
        rules.allow("everyone", RuleOptions::new().to("all")).unwrap();

        prop_assert!(!decide(&rules, &Subject::guest(), &action));
        prop_assert!(decide(&rules, &Subject::person("bob"), &action));
    }
}
