use std::fmt;

use crate::authz::config::{self, PermitConfig};
use crate::authz::dispatch::Probe;
use crate::authz::errors::{ConfigurationError, PermitError};
use crate::authz::guard::Guard;
use crate::authz::resource::Context;
use crate::authz::types::{
    Names, ResourceMatch, Role, Subject, Target, Targets, EVERYONE, GUEST, PERSON, RESERVED_ROLES,
};

/// Who a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleSelector {
    Everyone,
    Guest,
    /// Any authenticated subject, optionally probed against resources.
    Person,
    /// Persisted role keys, checked against grants.
    Named(Vec<String>),
}

impl fmt::Display for RoleSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleSelector::Everyone => write!(f, "{EVERYONE}"),
            RoleSelector::Guest => write!(f, "{GUEST}"),
            RoleSelector::Person => write!(f, "{PERSON}"),
            RoleSelector::Named(keys) => write!(f, "{}", keys.join(", ")),
        }
    }
}

/// Options accepted by [`Rule::new`] and the `RuleSet` builders.
///
/// `who`/`that` and `of`/`on` are aliases of each other. `to` belongs to
/// allow rules and `from` to deny rules.
#[derive(Debug, Clone, Default)]
pub struct RuleOptions {
    pub who: Option<String>,
    pub that: Option<String>,
    pub of: Option<Targets>,
    pub on: Option<Targets>,
    pub when: Option<Guard>,
    pub unless: Option<Guard>,
    pub to: Option<Names>,
    pub from: Option<Names>,
}

impl RuleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn who(mut self, probe: impl Into<String>) -> Self {
        self.who = Some(probe.into());
        self
    }

    pub fn that(mut self, probe: impl Into<String>) -> Self {
        self.that = Some(probe.into());
        self
    }

    pub fn of(mut self, targets: impl Into<Targets>) -> Self {
        self.of = Some(targets.into());
        self
    }

    pub fn on(mut self, targets: impl Into<Targets>) -> Self {
        self.on = Some(targets.into());
        self
    }

    /// The `if` guard.
    pub fn when(mut self, guard: Guard) -> Self {
        self.when = Some(guard);
        self
    }

    pub fn unless(mut self, guard: Guard) -> Self {
        self.unless = Some(guard);
        self
    }

    pub fn to(mut self, actions: impl Into<Names>) -> Self {
        self.to = Some(actions.into());
        self
    }

    pub fn from(mut self, actions: impl Into<Names>) -> Self {
        self.from = Some(actions.into());
        self
    }
}

/// A single authorization predicate. Immutable once built.
#[derive(Debug, Clone)]
pub struct Rule {
    roles: RoleSelector,
    probe: Option<Probe>,
    targets: Vec<Target>,
    /// Option names as declared, for display: `who`/`that` and `of`/`on`.
    spelling: (&'static str, &'static str),
    when: Option<Guard>,
    unless: Option<Guard>,
}

impl Rule {
    /// Builds a standalone rule, e.g. for [`crate::authz::engine::allowed`].
    /// Action options are rejected here.
    pub fn new(roles: impl Into<Names>, options: RuleOptions) -> Result<Self, ConfigurationError> {
        if options.to.is_some() {
            return Err(ConfigurationError::MisplacedActionOption {
                expected: "RuleSet::allow",
                found: "to",
            });
        }
        if options.from.is_some() {
            return Err(ConfigurationError::MisplacedActionOption {
                expected: "RuleSet::deny",
                found: "from",
            });
        }
        Self::build(roles.into(), options)
    }

    /// Validates roles and options. `to`/`from` are ignored.
    pub(crate) fn build(roles: Names, options: RuleOptions) -> Result<Self, ConfigurationError> {
        let keys = Names(roles.0.iter().map(|r| Role::normalize_key(r)).collect()).compact();
        if keys.is_empty() {
            return Err(ConfigurationError::NoRoles);
        }
        let reserved = keys.iter().any(|k| RESERVED_ROLES.contains(&k.as_str()));
        if reserved && keys.len() > 1 {
            return Err(ConfigurationError::ReservedRoleNotAlone(keys.join(", ")));
        }
        let roles = match keys[0].as_str() {
            EVERYONE => RoleSelector::Everyone,
            GUEST => RoleSelector::Guest,
            PERSON => RoleSelector::Person,
            _ => RoleSelector::Named(keys),
        };

        let RuleOptions {
            who,
            that,
            of,
            on,
            when,
            unless,
            ..
        } = options;
        if who.is_some() && that.is_some() {
            return Err(ConfigurationError::ConflictingOptions("who", "that"));
        }
        if of.is_some() && on.is_some() {
            return Err(ConfigurationError::ConflictingOptions("of", "on"));
        }
        let spelling = (
            if that.is_some() { "that" } else { "who" },
            if on.is_some() { "on" } else { "of" },
        );
        let probe = who.or(that);
        let targets = of.or(on);

        if probe.is_some() {
            if roles != RoleSelector::Person {
                return Err(ConfigurationError::ProbeRequiresPerson);
            }
            if targets.is_none() {
                return Err(ConfigurationError::ProbeRequiresTarget);
            }
        } else if roles == RoleSelector::Person && targets.is_some() {
            return Err(ConfigurationError::TargetRequiresProbe);
        }

        let mut deduped: Vec<Target> = Vec::new();
        for target in targets.map(|t| t.0).unwrap_or_default() {
            if !deduped.contains(&target) {
                deduped.push(target);
            }
        }
        if deduped.is_empty() {
            deduped.push(Target::Nil);
        }
        if roles == RoleSelector::Person && deduped.contains(&Target::Any) {
            return Err(ConfigurationError::AnyTargetForPerson);
        }

        Ok(Self {
            roles,
            probe: probe.map(Probe::new),
            targets: deduped,
            spelling,
            when,
            unless,
        })
    }

    pub fn roles(&self) -> &RoleSelector {
        &self.roles
    }

    pub fn probe(&self) -> Option<&Probe> {
        self.probe.as_ref()
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Matches against the published configuration.
    pub async fn matches(&self, subject: &Subject, ctx: &Context) -> Result<bool, PermitError> {
        self.matches_with(&config::current(), subject, ctx).await
    }

    /// Decides whether the rule applies to `subject`. Guards run only after
    /// the role check succeeds and can only turn a match into a non-match.
    pub async fn matches_with(
        &self,
        config: &PermitConfig,
        subject: &Subject,
        ctx: &Context,
    ) -> Result<bool, PermitError> {
        let matched = match &self.roles {
            RoleSelector::Everyone => true,
            RoleSelector::Guest => subject.is_guest(),
            RoleSelector::Person => self.matches_person(subject, ctx)?,
            RoleSelector::Named(keys) => self.matches_named(config, keys, subject, ctx).await?,
        };
        Ok(matched && self.passes_guards(subject, ctx))
    }

    fn matches_person(&self, subject: &Subject, ctx: &Context) -> Result<bool, PermitError> {
        if subject.is_guest() {
            return Ok(false);
        }
        for target in &self.targets {
            let name = match target {
                Target::Nil => return Ok(true),
                // rejected at construction
                Target::Any => continue,
                Target::Var(name) => name,
            };
            let Some(probe) = &self.probe else {
                continue;
            };
            let resource = ctx.resolve(name)?;
            if probe.evaluate(name, resource, subject)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn matches_named(
        &self,
        config: &PermitConfig,
        keys: &[String],
        subject: &Subject,
        ctx: &Context,
    ) -> Result<bool, PermitError> {
        if subject.is_guest() {
            return Ok(false);
        }
        let mut resources: Vec<ResourceMatch> = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            match target {
                Target::Any => {
                    resources = vec![ResourceMatch::Any];
                    break;
                }
                Target::Nil => resources.push(ResourceMatch::Nil),
                Target::Var(name) => {
                    let resource = ctx.resolve(name)?;
                    resources.push(resource.map(|r| r.key()).into());
                }
            }
        }
        let authority = config.authority()?;
        Ok(authority.authorized_any(subject, keys, &resources).await?)
    }

    fn passes_guards(&self, subject: &Subject, ctx: &Context) -> bool {
        if let Some(guard) = &self.when {
            if !guard.check(subject, ctx) {
                return false;
            }
        }
        if let Some(guard) = &self.unless {
            if guard.check(subject, ctx) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.roles)?;
        if let Some(probe) = &self.probe {
            write!(f, " {} {probe}", self.spelling.0)?;
        }
        if self.targets != [Target::Nil] {
            let targets = self
                .targets
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, " {} {targets}", self.spelling.1)?;
        }
        if let Some(guard) = &self.when {
            write!(f, " if {}", guard.name().unwrap_or("<fn>"))?;
        }
        if let Some(guard) = &self.unless {
            write!(f, " unless {}", guard.name().unwrap_or("<fn>"))?;
        }
        Ok(())
    }
}
