use std::collections::HashMap;
use std::sync::Arc;

use crate::authz::config::{self, DefaultAccess, PermitConfig};
use crate::authz::errors::{ConfigurationError, PermitError};
use crate::authz::resource::Context;
use crate::authz::rule::{Rule, RuleOptions};
use crate::authz::types::{Names, Subject, ALL_ACTIONS};

/// Which bucket a rule is registered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

/// Action-indexed deny and allow rules.
///
/// Built once at startup, then shared read-only (typically behind an
/// `Arc`). Rebuild and swap rather than mutate a live set.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    deny: HashMap<String, Vec<Arc<Rule>>>,
    allow: HashMap<String, Vec<Arc<Rule>>>,
    default_access: Option<DefaultAccess>,
    config: Option<Arc<PermitConfig>>,
}

impl RuleSet {
    /// A rule set that reads the published configuration when used.
    pub fn new() -> Self {
        Self::default()
    }

    /// A rule set pinned to `config` for alias expansion and evaluation.
    pub fn with_config(config: Arc<PermitConfig>) -> Self {
        Self {
            config: Some(config),
            ..Self::default()
        }
    }

    /// Overrides the configured default for this rule set only.
    pub fn with_default_access(mut self, access: DefaultAccess) -> Self {
        self.default_access = Some(access);
        self
    }

    pub fn set_default_access(&mut self, access: Option<DefaultAccess>) {
        self.default_access = access;
    }

    fn config(&self) -> Arc<PermitConfig> {
        self.config.clone().unwrap_or_else(config::current)
    }

    /// Registers an allow rule for the actions named by `to`.
    pub fn allow(
        &mut self,
        roles: impl Into<Names>,
        options: RuleOptions,
    ) -> Result<Arc<Rule>, ConfigurationError> {
        if options.from.is_some() {
            return Err(ConfigurationError::MisplacedActionOption {
                expected: "to",
                found: "from",
            });
        }
        let actions = options.to.clone().unwrap_or_default();
        self.register(Effect::Allow, roles.into(), actions, options)
    }

    /// Registers a deny rule for the actions named by `from`.
    pub fn deny(
        &mut self,
        roles: impl Into<Names>,
        options: RuleOptions,
    ) -> Result<Arc<Rule>, ConfigurationError> {
        if options.to.is_some() {
            return Err(ConfigurationError::MisplacedActionOption {
                expected: "from",
                found: "to",
            });
        }
        let actions = options.from.clone().unwrap_or_default();
        self.register(Effect::Deny, roles.into(), actions, options)
    }

    fn register(
        &mut self,
        effect: Effect,
        roles: Names,
        actions: Names,
        options: RuleOptions,
    ) -> Result<Arc<Rule>, ConfigurationError> {
        let actions = self.controlled_actions(actions)?;
        let rule = Arc::new(Rule::build(roles, options)?);
        let bucket = match effect {
            Effect::Allow => &mut self.allow,
            Effect::Deny => &mut self.deny,
        };
        for action in actions {
            bucket.entry(action).or_default().push(rule.clone());
        }
        Ok(rule)
    }

    fn controlled_actions(&self, actions: Names) -> Result<Vec<String>, ConfigurationError> {
        let actions = actions.compact();
        if actions.is_empty() {
            return Err(ConfigurationError::NoActions);
        }
        if actions.len() > 1 && actions.iter().any(|a| a == ALL_ACTIONS) {
            return Err(ConfigurationError::AllWithOtherActions);
        }
        Ok(self.config().expand_actions(&actions))
    }

    /// Deny rules consulted for `action`, including the `all` bucket.
    pub fn deny_rules(&self, action: &str) -> Vec<Arc<Rule>> {
        applicable(&self.deny, action)
    }

    /// Allow rules consulted for `action`, including the `all` bucket.
    pub fn allow_rules(&self, action: &str) -> Vec<Arc<Rule>> {
        applicable(&self.allow, action)
    }

    /// Every action with at least one rule, sorted.
    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self
            .deny
            .keys()
            .chain(self.allow.keys())
            .cloned()
            .collect();
        actions.sort();
        actions.dedup();
        actions
    }

    /// Distinct registered rules as (deny, allow).
    pub fn rule_count(&self) -> (usize, usize) {
        (distinct(&self.deny), distinct(&self.allow))
    }

    /// Deny rules first, then allow rules, then the default. The first
    /// matching rule decides.
    pub async fn permitted(
        &self,
        subject: &Subject,
        action: &str,
        ctx: &Context,
    ) -> Result<bool, PermitError> {
        let config = self.config();

        if self
            .first_match(&config, Effect::Deny, subject, action, ctx)
            .await?
        {
            return Ok(false);
        }
        if self
            .first_match(&config, Effect::Allow, subject, action, ctx)
            .await?
        {
            return Ok(true);
        }

        let access = self.default_access.unwrap_or(config.default_access);
        tracing::debug!(
            subject = %subject,
            action,
            default = ?access,
            "No rule matched, using default access"
        );
        Ok(access.is_allow())
    }

    async fn first_match(
        &self,
        config: &PermitConfig,
        effect: Effect,
        subject: &Subject,
        action: &str,
        ctx: &Context,
    ) -> Result<bool, PermitError> {
        let rules = match effect {
            Effect::Allow => self.allow_rules(action),
            Effect::Deny => self.deny_rules(action),
        };
        for rule in rules {
            if rule.matches_with(config, subject, ctx).await? {
                tracing::info!(
                    decision = effect.as_str(),
                    subject = %subject,
                    action,
                    rule = %rule,
                    "Matched authorization rule"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn applicable(index: &HashMap<String, Vec<Arc<Rule>>>, action: &str) -> Vec<Arc<Rule>> {
    let mut rules: Vec<Arc<Rule>> = index.get(action).cloned().unwrap_or_default();
    if action != ALL_ACTIONS {
        if let Some(all) = index.get(ALL_ACTIONS) {
            rules.extend(all.iter().cloned());
        }
    }
    rules
}

fn distinct(index: &HashMap<String, Vec<Arc<Rule>>>) -> usize {
    let mut seen: Vec<*const Rule> = Vec::new();
    for rule in index.values().flatten() {
        let ptr = Arc::as_ptr(rule);
        if !seen.contains(&ptr) {
            seen.push(ptr);
        }
    }
    seen.len()
}

/// Builds a rule on the fly and matches it. `to`/`from` are not accepted.
pub async fn allowed(
    roles: impl Into<Names>,
    options: RuleOptions,
    subject: &Subject,
    ctx: &Context,
) -> Result<bool, PermitError> {
    let rule = Rule::new(roles, options)?;
    rule.matches(subject, ctx).await
}

/// The negation of [`allowed`].
pub async fn denied(
    roles: impl Into<Names>,
    options: RuleOptions,
    subject: &Subject,
    ctx: &Context,
) -> Result<bool, PermitError> {
    Ok(!allowed(roles, options, subject, ctx).await?)
}
