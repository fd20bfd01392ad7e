mod helpers;

use std::sync::Arc;

use helpers::{project, RoleBuilder, TestDb};
use permit::authz::{
    Context, GrantQuery, PermitConfig, ResourceKey, ResourceMatch, RuleOptions, RuleSet, Subject,
};
use permit::errors::StoreError;

#[tokio::test]
async fn test_authorize_is_idempotent() {
    let db = TestDb::new().await;
    let authority = db.authority();
    RoleBuilder::new("admin").create(&authority).await;

    let bob = Subject::person("bob");
    let p1 = ResourceKey::new("Project", "1");

    let first = authority.authorize(&bob, "admin", Some(&p1)).await.unwrap();
    assert_eq!(first.len(), 1);
    let second = authority.authorize(&bob, "admin", Some(&p1)).await.unwrap();
    assert!(second.is_empty());

    let all = authority.grants(&GrantQuery::new()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(authority.authorized(&bob, "admin", &p1).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_authorize_calls_are_idempotent() {
    let db = TestDb::new().await;
    let authority = db.authority();
    RoleBuilder::new("admin").create(&authority).await;

    let bob = Subject::person("bob");
    for i in 0..20 {
        let project = ResourceKey::new("Project", i.to_string());
        let calls: Vec<_> = (0..2)
            .map(|_| {
                let authority = authority.clone();
                let bob = bob.clone();
                let project = project.clone();
                tokio::spawn(async move { authority.authorize(&bob, "admin", Some(&project)).await })
            })
            .collect();

        let mut created = 0;
        for call in calls {
            created += call.await.unwrap().unwrap().len();
        }
        assert_eq!(created, 1, "project {i}");
    }

    assert_eq!(authority.grants(&GrantQuery::new()).await.unwrap().len(), 20);
}

#[tokio::test]
async fn test_role_keys_ignore_case() {
    let db = TestDb::new().await;
    let authority = db.authority();
    let admin = RoleBuilder::new("Admin").without_resource().create(&authority).await;
    assert_eq!(admin.key, "admin");

    let found = authority.find_role("ADMIN").await.unwrap();
    assert_eq!(found.map(|r| r.id), Some(admin.id));

    let bob = Subject::person("bob");
    authority.authorize(&bob, "aDmIn", None).await.unwrap();
    assert!(authority
        .authorized(&bob, "ADMIN", ResourceMatch::Nil)
        .await
        .unwrap());

    let err = authority
        .create_role(permit::authz::NewRole::new("ADMIN", "Again"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));
}

#[tokio::test]
async fn test_failed_authorize_writes_nothing() {
    let db = TestDb::new().await;
    let authority = db.authority();
    RoleBuilder::new("admin").create(&authority).await;
    RoleBuilder::new("member").optional_resource().create(&authority).await;

    let bob = Subject::person("bob");
    let p1 = ResourceKey::new("Project", "1");

    let err = authority
        .authorize(&bob, vec!["admin", "ghost"], Some(&p1))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownRole(key) if key == "ghost"));

    // admin requires a resource, so this fails after member was accepted
    let err = authority
        .authorize(&bob, vec!["member", "admin"], None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidGrant(_)));

    assert!(authority.grants(&GrantQuery::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_guest_cannot_be_authorized() {
    let db = TestDb::new().await;
    let authority = db.authority();
    RoleBuilder::new("admin").without_resource().create(&authority).await;

    let err = authority
        .authorize(&Subject::guest(), "admin", None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidGrant(_)));
    assert!(!authority
        .authorized(&Subject::guest(), "admin", ResourceMatch::Any)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_revoke_scope() {
    let db = TestDb::new().await;
    let authority = db.authority();
    RoleBuilder::new("admin").create(&authority).await;

    let bob = Subject::person("bob");
    let p1 = ResourceKey::new("Project", "1");
    let p2 = ResourceKey::new("Project", "2");
    authority.authorize(&bob, "admin", Some(&p1)).await.unwrap();
    authority.authorize(&bob, "admin", Some(&p2)).await.unwrap();

    assert!(authority.authorized(&bob, "admin", &p1).await.unwrap());
    assert!(authority.authorized(&bob, "admin", &p2).await.unwrap());

    let removed = authority.revoke(&bob, "admin", &p1).await.unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].resource(), Some(p1.clone()));
    assert!(!authority.authorized(&bob, "admin", &p1).await.unwrap());
    assert!(authority.authorized(&bob, "admin", &p2).await.unwrap());

    authority.authorize(&bob, "admin", Some(&p1)).await.unwrap();
    let removed = authority
        .revoke_count(&bob, "admin", ResourceMatch::Any)
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert!(!authority
        .authorized(&bob, "admin", ResourceMatch::Any)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_revoke_unknown_role_removes_nothing() {
    let db = TestDb::new().await;
    let authority = db.authority();
    RoleBuilder::new("admin").without_resource().create(&authority).await;

    let bob = Subject::person("bob");
    authority.authorize(&bob, "admin", None).await.unwrap();

    let removed = authority
        .revoke_count(&bob, "ghost", ResourceMatch::Any)
        .await
        .unwrap();
    assert_eq!(removed, 0);
    assert_eq!(authority.grants(&GrantQuery::new()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_nil_resource_grants_are_unique() {
    let db = TestDb::new().await;
    let authority = db.authority();
    let member = RoleBuilder::new("member")
        .optional_resource()
        .create(&authority)
        .await;

    let bob = Subject::person("bob");
    authority
        .grant_store()
        .create(&bob, &member, None)
        .await
        .unwrap();
    let err = authority
        .grant_store()
        .create(&bob, &member, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));

    // a resource-scoped grant of the same role is a different grant
    let p1 = ResourceKey::new("Project", "1");
    authority
        .grant_store()
        .create(&bob, &member, Some(&p1))
        .await
        .unwrap();
    assert_eq!(authority.grants(&GrantQuery::new()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_association_queries() {
    let db = TestDb::new().await;
    let authority = db.authority();
    RoleBuilder::new("admin").create(&authority).await;
    RoleBuilder::new("viewer").optional_resource().create(&authority).await;

    let bob = Subject::person("bob");
    let ann = Subject::person("ann");
    let p1 = ResourceKey::new("Project", "1");
    let t1 = ResourceKey::new("Team", "1");

    authority.authorize(&bob, "admin", Some(&p1)).await.unwrap();
    authority.authorize(&bob, "viewer", Some(&t1)).await.unwrap();
    authority.authorize(&ann, "viewer", None).await.unwrap();

    let subjects = authority
        .subjects(&GrantQuery::new().roles("viewer"))
        .await
        .unwrap();
    assert_eq!(subjects, vec![bob.clone(), ann.clone()]);

    let roles = authority
        .roles_of(&GrantQuery::new().subject(&bob))
        .await
        .unwrap();
    let keys: Vec<_> = roles.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["admin", "viewer"]);

    let resources = authority
        .resources(&GrantQuery::new().subject(&bob))
        .await
        .unwrap();
    assert_eq!(resources, vec![p1.clone(), t1]);

    let on_p1 = authority
        .subjects(&GrantQuery::new().resource(&p1))
        .await
        .unwrap();
    assert_eq!(on_p1, vec![bob.clone()]);

    let without_resource = authority
        .subjects(&GrantQuery::new().resource(ResourceMatch::Nil))
        .await
        .unwrap();
    assert_eq!(without_resource, vec![ann]);
}

#[tokio::test]
async fn test_named_rules_against_database() {
    let db = TestDb::new().await;
    let authority = db.authority();
    RoleBuilder::new("admin").optional_resource().create(&authority).await;
    RoleBuilder::new("auditor").without_resource().create(&authority).await;

    let bob = Subject::person("bob");
    let ann = Subject::person("ann");
    let eve = Subject::person("eve");
    let p1 = ResourceKey::new("Project", "1");
    authority.authorize(&bob, "admin", Some(&p1)).await.unwrap();
    authority.authorize(&ann, "auditor", None).await.unwrap();

    let config = Arc::new(PermitConfig::default().with_authority(authority));
    let mut rules = RuleSet::with_config(config);
    rules
        .allow("admin", RuleOptions::new().of("project").to("update"))
        .unwrap();
    rules.allow("auditor", RuleOptions::new().to("read")).unwrap();
    rules
        .allow("person", RuleOptions::new().who("is_owner").of("project").to("destroy"))
        .unwrap();

    let ctx = Context::new().with("project", project("1", Some(&eve)));
    let other = Context::new().with("project", project("2", Some(&eve)));

    assert!(rules.permitted(&bob, "edit", &ctx).await.unwrap());
    assert!(!rules.permitted(&bob, "edit", &other).await.unwrap());
    assert!(!rules.permitted(&ann, "edit", &ctx).await.unwrap());

    assert!(rules.permitted(&ann, "show", &Context::new()).await.unwrap());
    assert!(!rules.permitted(&bob, "show", &Context::new()).await.unwrap());

    assert!(rules.permitted(&eve, "destroy", &ctx).await.unwrap());
    assert!(!rules.permitted(&bob, "destroy", &ctx).await.unwrap());
}
