//! Parameterized `WHERE` construction.
//!
//! A [`Filter`] is a conjunction of per-field [`Condition`]s. Rendering it
//! yields a [`Predicate`]: the SQL fragment with `?` placeholders plus the
//! ordered argument list. Only [`Condition::Trusted`] splices text verbatim,
//! and it can only be created from internally generated fragments or static
//! entity configuration, never from a plain caller value.

use std::collections::BTreeMap;

use crate::types::{Args, Value};

/// Field-name suffix marking a configured constraint as a raw SQL fragment.
pub const TRUSTED_SUFFIX: &str = "_gsql";

/// Constraint on a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `field = ?`
    Equals(Value),
    /// `field IN (?, ..., ?)`
    In(Vec<Value>),
    /// Verbatim SQL, no placeholder and no escaping.
    Trusted(String),
}

/// A rendered boolean expression and its positional arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Predicate {
    /// Whether the expression is empty (no constraint).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// `\nWHERE <sql>` or the empty string.
    #[must_use]
    pub fn where_clause(&self) -> String {
        if self.sql.is_empty() {
            String::new()
        } else {
            format!("\nWHERE {}", self.sql)
        }
    }
}

/// Conjunction of field constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: BTreeMap<String, Condition>,
}

impl Filter {
    /// An empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a filter from caller values: arrays become `IN`, everything
    /// else `=`. Field names carrying [`TRUSTED_SUFFIX`] get no special
    /// treatment here.
    #[must_use]
    pub fn from_values(values: &Args) -> Self {
        let mut filter = Self::new();
        for (field, value) in values {
            filter.insert(field, value.clone());
        }
        filter
    }

    /// Builds a filter from static configuration (e.g. an edge's manual
    /// overlay). A string value under a [`TRUSTED_SUFFIX`] key becomes a
    /// [`Condition::Trusted`] fragment.
    #[must_use]
    pub fn from_config(values: &Args) -> Self {
        let mut filter = Self::new();
        for (field, value) in values {
            match value {
                Value::String(fragment) if field.ends_with(TRUSTED_SUFFIX) => {
                    filter.trusted(field, fragment.clone());
                }
                _ => filter.insert(field, value.clone()),
            }
        }
        filter
    }

    /// Constrains `field` by value: `IN` for arrays, `=` otherwise.
    pub fn insert(&mut self, field: &str, value: Value) {
        let condition = match value {
            Value::Array(items) => Condition::In(items),
            other => Condition::Equals(other),
        };
        self.conditions.insert(field.to_string(), condition);
    }

    /// Builder-style [`Filter::insert`].
    #[must_use]
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.insert(field, value.into());
        self
    }

    /// Adds a verbatim fragment under `name`.
    ///
    /// Callers must only pass internally generated SQL here.
    pub fn trusted(&mut self, name: &str, fragment: String) {
        self.conditions
            .insert(name.to_string(), Condition::Trusted(fragment));
    }

    /// Whether `field` is constrained.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.conditions.contains_key(field)
    }

    /// The `=` value constraining `field`, if any.
    #[must_use]
    pub fn value(&self, field: &str) -> Option<&Value> {
        match self.conditions.get(field) {
            Some(Condition::Equals(v)) => Some(v),
            _ => None,
        }
    }

    /// The values constraining `field`: one for `=`, many for `IN`.
    #[must_use]
    pub fn values(&self, field: &str) -> Option<Vec<Value>> {
        match self.conditions.get(field)? {
            Condition::Equals(v) => Some(vec![v.clone()]),
            Condition::In(vs) => Some(vs.clone()),
            Condition::Trusted(_) => None,
        }
    }

    /// Removes and returns the constraint on `field`.
    pub fn remove(&mut self, field: &str) -> Option<Condition> {
        self.conditions.remove(field)
    }

    /// Overlays `other` onto `self`; `other` wins on shared fields.
    pub fn merge(&mut self, other: &Filter) {
        for (k, v) in &other.conditions {
            self.conditions.insert(k.clone(), v.clone());
        }
    }

    /// Iterates the constrained field names.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.conditions.keys().map(String::as_str)
    }

    /// Number of constrained fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Whether nothing is constrained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Renders the conjunction. Each clause is parenthesized and clauses are
    /// joined with `AND`; clause order is not part of the contract.
    #[must_use]
    pub fn predicate(&self) -> Predicate {
        let mut clauses = Vec::with_capacity(self.conditions.len());
        let mut args = Vec::new();
        for (field, condition) in &self.conditions {
            match condition {
                Condition::Equals(v) => {
                    clauses.push(format!("({field}=?)"));
                    args.push(v.clone());
                }
                Condition::In(vs) => {
                    clauses.push(format!("({field} IN ({}))", placeholders(vs.len())));
                    args.extend(vs.iter().cloned());
                }
                Condition::Trusted(fragment) => {
                    clauses.push(format!("({fragment})"));
                }
            }
        }
        Predicate {
            sql: clauses.join(" AND "),
            args,
        }
    }
}

/// Identity predicate on `key`: `(key=?)` for one id, `(key IN (...))` for
/// several, optionally intersected with `extra`.
#[must_use]
pub fn key_predicate(key: &str, ids: &[Value], extra: Option<&Filter>) -> Predicate {
    let mut sql = if ids.len() > 1 {
        format!("({key} IN ({}))", placeholders(ids.len()))
    } else {
        format!("({key}=?)")
    };
    let mut args = ids.to_vec();
    if let Some(extra) = extra.filter(|f| !f.is_empty()) {
        let more = extra.predicate();
        sql.push_str(" AND ");
        sql.push_str(&more.sql);
        args.extend(more.args);
    }
    Predicate { sql, args }
}

/// `?,?,...,?` with `n` placeholders.
#[must_use]
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

/// Quotes a value for a client-interpolated placeholder.
///
/// Strings have surrounding quote characters trimmed, embedded `\`, `'`
/// and `;` escaped, and are wrapped in single quotes. Other values pass through.
/// Parameter binding still applies; this only hardens the literal.
#[must_use]
pub fn quote(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(quote_str(s)),
        other => other.clone(),
    }
}

/// Quotes every argument with [`quote`].
#[must_use]
pub fn quotes(args: &[Value]) -> Vec<Value> {
    args.iter().map(quote).collect()
}

/// The string form of [`quote`].
#[must_use]
pub fn quote_str(s: &str) -> String {
    let trimmed = s.trim_matches(|c| c == '\'' || c == '"');
    let escaped = trimmed
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace(';', "\\;");
    format!("'{escaped}'")
}
