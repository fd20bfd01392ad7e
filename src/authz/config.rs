use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::authz::errors::{ConfigurationError, EvaluationError};
use crate::authz::store::Authority;
use crate::settings;

/// Decision returned when no rule matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultAccess {
    Allow,
    #[default]
    Deny,
}

impl DefaultAccess {
    pub fn is_allow(self) -> bool {
        matches!(self, DefaultAccess::Allow)
    }
}

/// Process-wide authorization settings.
///
/// Rule sets capture an `Arc` snapshot when they are built, or read the
/// published one at evaluation time when they were built without one.
#[derive(Clone)]
pub struct PermitConfig {
    /// Alias -> actions. Expansion is one level deep.
    pub action_aliases: HashMap<String, Vec<String>>,
    pub default_access: DefaultAccess,
    authority: Option<Authority>,
}

impl Default for PermitConfig {
    fn default() -> Self {
        Self {
            action_aliases: Self::default_action_aliases(),
            default_access: DefaultAccess::Deny,
            authority: None,
        }
    }
}

impl fmt::Debug for PermitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermitConfig")
            .field("action_aliases", &self.action_aliases)
            .field("default_access", &self.default_access)
            .field("models_bound", &self.authority.is_some())
            .finish()
    }
}

impl PermitConfig {
    pub fn default_action_aliases() -> HashMap<String, Vec<String>> {
        let table: [(&str, &[&str]); 5] = [
            ("create", &["new", "create"]),
            ("update", &["edit", "update"]),
            ("destroy", &["delete", "destroy"]),
            ("read", &["index", "show"]),
            ("write", &["new", "create", "edit", "update"]),
        ];
        table
            .into_iter()
            .map(|(alias, actions)| {
                (
                    alias.to_string(),
                    actions.iter().map(|a| a.to_string()).collect(),
                )
            })
            .collect()
    }

    /// Settings aliases extend the built-in table and replace same-named entries.
    pub fn from_settings(access: &settings::Access) -> Self {
        let mut action_aliases = Self::default_action_aliases();
        action_aliases.extend(access.action_aliases.clone());
        Self {
            action_aliases,
            default_access: access.default_access,
            authority: None,
        }
    }

    pub fn with_authority(mut self, authority: Authority) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn is_bound(&self) -> bool {
        self.authority.is_some()
    }

    pub fn authority(&self) -> Result<&Authority, EvaluationError> {
        self.authority.as_ref().ok_or(EvaluationError::ModelsNotBound)
    }

    /// Replaces each alias with its actions; other names pass through.
    /// Aliases of aliases are not followed.
    pub fn expand_actions(&self, actions: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(actions.len());
        for action in actions {
            let expanded = match self.action_aliases.get(action) {
                Some(aliased) => aliased.as_slice(),
                None => std::slice::from_ref(action),
            };
            for a in expanded {
                if !out.contains(a) {
                    out.push(a.clone());
                }
            }
        }
        out
    }
}

static GLOBAL: Lazy<RwLock<Arc<PermitConfig>>> =
    Lazy::new(|| RwLock::new(Arc::new(PermitConfig::default())));

/// The currently published configuration.
pub fn current() -> Arc<PermitConfig> {
    GLOBAL.read().clone()
}

pub fn publish(config: PermitConfig) {
    *GLOBAL.write() = Arc::new(config);
}

/// Modifies a copy of the published configuration and swaps it in.
pub fn update(f: impl FnOnce(&mut PermitConfig)) {
    let mut guard = GLOBAL.write();
    let mut next = PermitConfig::clone(&guard);
    f(&mut next);
    *guard = Arc::new(next);
}

/// Binds the role and grant stores. Fails if they are already bound.
pub fn init(authority: Authority) -> Result<(), ConfigurationError> {
    let mut guard = GLOBAL.write();
    if guard.is_bound() {
        return Err(ConfigurationError::ModelsAlreadyBound);
    }
    let mut next = PermitConfig::clone(&guard);
    next.authority = Some(authority);
    *guard = Arc::new(next);
    tracing::debug!("Bound role and grant stores");
    Ok(())
}

/// Replaces the bound stores, e.g. after a reload.
pub fn rebind(authority: Authority) {
    update(|cfg| cfg.authority = Some(authority));
}
