//! Grant-selection predicates.
//!
//! Queries over the `authorizations` table are built here as a small
//! structured predicate tree. The SQL store compiles it to a `sea_orm`
//! condition and the in-memory store evaluates it directly, so both
//! backends agree on which grants a query selects.

use std::fmt;

use crate::authz::types::{Grant, ResourceMatch, Role, Subject};

// ─── AST ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    SubjectId,
    RoleId,
    ResourceType,
    ResourceId,
}

impl Field {
    pub fn column_name(&self) -> &'static str {
        match self {
            Field::SubjectId => "subject_id",
            Field::RoleId => "role_id",
            Field::ResourceType => "resource_type",
            Field::ResourceId => "resource_id",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Int(i64),
    Str(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Str(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Eq(Field, Literal),
    In(Field, Vec<Literal>),
    IsNull(Field),
}

// ─── Evaluator ──────────────────────────────────────────────────────────

enum Value<'a> {
    Null,
    Int(i64),
    Str(&'a str),
}

fn field_value(grant: &Grant, field: Field) -> Value<'_> {
    match field {
        Field::SubjectId => Value::Str(&grant.subject_id),
        Field::RoleId => Value::Int(i64::from(grant.role_id)),
        Field::ResourceType => grant
            .resource_type
            .as_deref()
            .map_or(Value::Null, Value::Str),
        Field::ResourceId => grant.resource_id.as_deref().map_or(Value::Null, Value::Str),
    }
}

fn literal_eq(value: &Value<'_>, literal: &Literal) -> bool {
    match (value, literal) {
        (Value::Int(a), Literal::Int(b)) => a == b,
        (Value::Str(a), Literal::Str(b)) => *a == b.as_str(),
        _ => false,
    }
}

impl Predicate {
    /// Evaluates the predicate against a single grant, with SQL NULL semantics
    /// for equality (NULL never equals anything).
    pub fn matches(&self, grant: &Grant) -> bool {
        match self {
            Predicate::And(parts) => parts.iter().all(|p| p.matches(grant)),
            Predicate::Or(parts) => parts.iter().any(|p| p.matches(grant)),
            Predicate::Eq(field, literal) => literal_eq(&field_value(grant, *field), literal),
            Predicate::In(field, literals) => {
                let value = field_value(grant, *field);
                literals.iter().any(|l| literal_eq(&value, l))
            }
            Predicate::IsNull(field) => matches!(field_value(grant, *field), Value::Null),
        }
    }

    /// True when no grant can ever match, e.g. an empty `IN ()`.
    pub fn is_unsatisfiable(&self) -> bool {
        match self {
            Predicate::And(parts) => parts.iter().any(Predicate::is_unsatisfiable),
            Predicate::Or(parts) => {
                !parts.is_empty() && parts.iter().all(Predicate::is_unsatisfiable)
            }
            Predicate::In(_, literals) => literals.is_empty(),
            Predicate::Eq(..) | Predicate::IsNull(_) => false,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, parts: &[Predicate], sep: &str) -> fmt::Result {
            if parts.is_empty() {
                // empty AND is vacuously true, empty OR is false
                return write!(f, "{}", if sep == " AND " { "TRUE" } else { "FALSE" });
            }
            write!(f, "(")?;
            for (i, p) in parts.iter().enumerate() {
                if i > 0 {
                    write!(f, "{sep}")?;
                }
                write!(f, "{p}")?;
            }
            write!(f, ")")
        }

        match self {
            Predicate::And(parts) => join(f, parts, " AND "),
            Predicate::Or(parts) => join(f, parts, " OR "),
            Predicate::Eq(field, literal) => write!(f, "{} = {literal}", field.column_name()),
            Predicate::In(field, literals) => {
                let list = literals
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{} IN ({list})", field.column_name())
            }
            Predicate::IsNull(field) => write!(f, "{} IS NULL", field.column_name()),
        }
    }
}

// ─── Builders ───────────────────────────────────────────────────────────

/// `None` places no constraint on roles. `Some(&[])` matches nothing.
pub fn role_condition(roles: Option<&[Role]>) -> Option<Predicate> {
    let roles = roles?;
    let mut ids: Vec<Literal> = Vec::with_capacity(roles.len());
    for role in roles {
        let id = Literal::Int(i64::from(role.id));
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Some(Predicate::In(Field::RoleId, ids))
}

/// Builds the resource clause. An empty list behaves like `[Nil]`, and
/// `Any` anywhere in the list removes the constraint entirely.
pub fn resource_condition(resources: &[ResourceMatch]) -> Option<Predicate> {
    if resources.is_empty() {
        return Some(nil_resource());
    }

    let mut clauses: Vec<Predicate> = Vec::new();
    for resource in resources {
        let clause = match resource {
            ResourceMatch::Any => return None,
            ResourceMatch::Nil => nil_resource(),
            ResourceMatch::Exact(key) => Predicate::And(vec![
                Predicate::Eq(
                    Field::ResourceType,
                    Literal::Str(key.resource_type.clone()),
                ),
                Predicate::Eq(Field::ResourceId, Literal::Str(key.resource_id.clone())),
            ]),
        };
        if !clauses.contains(&clause) {
            clauses.push(clause);
        }
    }

    if clauses.len() == 1 {
        clauses.pop()
    } else {
        Some(Predicate::Or(clauses))
    }
}

fn nil_resource() -> Predicate {
    Predicate::And(vec![
        Predicate::IsNull(Field::ResourceType),
        Predicate::IsNull(Field::ResourceId),
    ])
}

/// Guests hold no grants, so their clause can never match.
pub fn subject_condition(subject: &Subject) -> Predicate {
    match subject.id() {
        Some(id) => Predicate::Eq(Field::SubjectId, Literal::Str(id.to_string())),
        None => Predicate::In(Field::SubjectId, Vec::new()),
    }
}

/// Conjunction of the role, resource and (optional) subject clauses.
pub fn authorization_conditions(
    roles: Option<&[Role]>,
    resources: &[ResourceMatch],
    subject: Option<&Subject>,
) -> Predicate {
    let mut parts = Vec::with_capacity(3);
    if let Some(subject) = subject {
        parts.push(subject_condition(subject));
    }
    parts.extend(role_condition(roles));
    if let Some(resource) = resource_condition(resources) {
        match resource {
            Predicate::And(inner) => parts.extend(inner),
            other => parts.push(other),
        }
    }
    Predicate::And(parts)
}
