use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::authz::errors::ConfigurationError;
use crate::authz::resource::Context;
use crate::authz::types::Subject;

pub type GuardFn = dyn Fn(&Subject, &Context) -> bool + Send + Sync;

/// Extra boolean check attached to a rule with `if`/`unless`.
#[derive(Clone)]
pub struct Guard {
    name: Option<String>,
    check: Arc<GuardFn>,
}

impl Guard {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Subject, &Context) -> bool + Send + Sync + 'static,
    {
        Self {
            name: None,
            check: Arc::new(f),
        }
    }

    pub fn named<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Subject, &Context) -> bool + Send + Sync + 'static,
    {
        Self {
            name: Some(name.into()),
            check: Arc::new(f),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn check(&self, subject: &Subject, ctx: &Context) -> bool {
        (self.check)(subject, ctx)
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guard({})", self.name.as_deref().unwrap_or("<anonymous>"))
    }
}

/// Guards that policy files may refer to by name.
#[derive(Debug, Clone, Default)]
pub struct GuardRegistry {
    guards: HashMap<String, Guard>,
}

impl GuardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&Subject, &Context) -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        self.guards.insert(name.clone(), Guard::named(name, f));
        self
    }

    pub fn resolve(&self, name: &str) -> Result<Guard, ConfigurationError> {
        self.guards
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownGuard(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}
