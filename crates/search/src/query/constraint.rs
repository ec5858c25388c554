//! Query constraints.
//!
//! A [`Constraint`] is a backend-neutral boolean condition over a document
//! source. Backends either evaluate it directly ([`Constraint::matches`]) or
//! translate it into their own query language.

use std::cmp::Ordering;
use std::fmt;

use serde_json::{Map, Value};

/// A condition on a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Field (or any element of a list field) equals the value.
    FieldEqual { field: String, value: Value },
    /// No element of the field equals the value; missing fields match.
    FieldNotEqual { field: String, value: Value },
    /// Field is present and not empty.
    Filled { field: String },
    /// Field is missing or empty.
    NotFilled { field: String },
    /// Field equals one of the values.
    OneInField { field: String, values: Vec<Value> },
    /// Field lies within the bounds.
    Range {
        field: String,
        lower: Option<Value>,
        upper: Option<Value>,
        inclusive: bool,
    },
    /// Field starts with the value.
    Prefix { field: String, value: String },
    /// Full-text query in the store's query-string syntax. Affects scoring.
    QueryString { text: String },
    /// All constraints hold.
    And(Vec<Constraint>),
    /// At least one constraint holds.
    Or(Vec<Constraint>),
    /// The constraint does not hold.
    Not(Box<Constraint>),
}

impl Constraint {
    /// `field == value`; a null value means "not filled".
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field = field.into();
        match value.into() {
            Value::Null => Constraint::NotFilled { field },
            value => Constraint::FieldEqual { field, value },
        }
    }

    /// `field != value`; a null value means "filled".
    pub fn not_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field = field.into();
        match value.into() {
            Value::Null => Constraint::Filled { field },
            value => Constraint::FieldNotEqual { field, value },
        }
    }

    /// Field has a non-empty value.
    pub fn filled(field: impl Into<String>) -> Self {
        Constraint::Filled {
            field: field.into(),
        }
    }

    /// Field has no value.
    pub fn not_filled(field: impl Into<String>) -> Self {
        Constraint::NotFilled {
            field: field.into(),
        }
    }

    /// Field equals one of `values`.
    pub fn one_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Constraint::OneInField {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Inclusive range; either bound may be open.
    pub fn range(
        field: impl Into<String>,
        lower: Option<impl Into<Value>>,
        upper: Option<impl Into<Value>>,
    ) -> Self {
        Constraint::Range {
            field: field.into(),
            lower: lower.map(Into::into),
            upper: upper.map(Into::into),
            inclusive: true,
        }
    }

    /// Field starts with `value`.
    pub fn prefix(field: impl Into<String>, value: impl Into<String>) -> Self {
        Constraint::Prefix {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Full-text query.
    pub fn query_string(text: impl Into<String>) -> Self {
        Constraint::QueryString { text: text.into() }
    }

    /// Combines constraints with OR.
    pub fn or(constraints: Vec<Constraint>) -> Self {
        Constraint::Or(constraints)
    }

    /// Combines constraints with AND.
    pub fn and(constraints: Vec<Constraint>) -> Self {
        Constraint::And(constraints)
    }

    /// Negates a constraint.
    #[allow(clippy::should_implement_trait)]
    pub fn not(constraint: Constraint) -> Self {
        Constraint::Not(Box::new(constraint))
    }

    /// Returns true if this constraint influences relevance scoring.
    pub fn is_scoring(&self) -> bool {
        match self {
            Constraint::QueryString { .. } => true,
            Constraint::And(cs) | Constraint::Or(cs) => cs.iter().any(Constraint::is_scoring),
            Constraint::Not(c) => c.is_scoring(),
            _ => false,
        }
    }

    /// Evaluates the constraint against a document source.
    pub fn matches(&self, source: &Map<String, Value>) -> bool {
        match self {
            Constraint::FieldEqual { field, value } => {
                elements(lookup(source, field)).any(|v| terms_equal(v, value))
            }
            Constraint::FieldNotEqual { field, value } => {
                !elements(lookup(source, field)).any(|v| terms_equal(v, value))
            }
            Constraint::Filled { field } => is_filled(lookup(source, field)),
            Constraint::NotFilled { field } => !is_filled(lookup(source, field)),
            Constraint::OneInField { field, values } => elements(lookup(source, field))
                .any(|v| values.iter().any(|value| terms_equal(v, value))),
            Constraint::Range {
                field,
                lower,
                upper,
                inclusive,
            } => elements(lookup(source, field)).any(|v| {
                let above = lower.as_ref().is_none_or(|lo| {
                    matches!(
                        (compare_values(v, lo), inclusive),
                        (Some(Ordering::Greater), _) | (Some(Ordering::Equal), true)
                    )
                });
                let below = upper.as_ref().is_none_or(|hi| {
                    matches!(
                        (compare_values(v, hi), inclusive),
                        (Some(Ordering::Less), _) | (Some(Ordering::Equal), true)
                    )
                });
                above && below
            }),
            Constraint::Prefix { field, value } => elements(lookup(source, field))
                .any(|v| term_string(v).is_some_and(|s| s.starts_with(value.as_str()))),
            Constraint::QueryString { text } => matches_query_string(source, text),
            Constraint::And(cs) => cs.iter().all(|c| c.matches(source)),
            Constraint::Or(cs) => cs.iter().any(|c| c.matches(source)),
            Constraint::Not(c) => !c.matches(source),
        }
    }

    /// Renders the constraint, replacing literal values with `?` if `redact`.
    pub fn render(&self, redact: bool) -> String {
        let show = |v: &Value| {
            if redact {
                "?".to_string()
            } else {
                match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }
            }
        };
        match self {
            Constraint::FieldEqual { field, value } => format!("{} = {}", field, show(value)),
            Constraint::FieldNotEqual { field, value } => {
                format!("{} != {}", field, show(value))
            }
            Constraint::Filled { field } => format!("{} IS FILLED", field),
            Constraint::NotFilled { field } => format!("{} IS EMPTY", field),
            Constraint::OneInField { field, values } => {
                if redact {
                    format!("{} IN (?)", field)
                } else {
                    let values: Vec<_> = values.iter().map(show).collect();
                    format!("{} IN ({})", field, values.join(", "))
                }
            }
            Constraint::Range {
                field,
                lower,
                upper,
                ..
            } => format!(
                "{} IN [{} TO {}]",
                field,
                lower.as_ref().map(show).unwrap_or_else(|| "*".to_string()),
                upper.as_ref().map(show).unwrap_or_else(|| "*".to_string())
            ),
            Constraint::Prefix { field, value } => format!(
                "{} STARTS WITH {}",
                field,
                if redact { "?" } else { value.as_str() }
            ),
            Constraint::QueryString { text } => {
                format!("QUERY '{}'", if redact { "?" } else { text.as_str() })
            }
            Constraint::And(cs) => join(cs, " AND ", redact),
            Constraint::Or(cs) => join(cs, " OR ", redact),
            Constraint::Not(c) => format!("NOT {}", c.render(redact)),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

fn join(constraints: &[Constraint], separator: &str, redact: bool) -> String {
    let parts: Vec<_> = constraints.iter().map(|c| c.render(redact)).collect();
    format!("({})", parts.join(separator))
}

/// Resolves a dotted field path.
pub(crate) fn lookup<'a>(source: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    let mut parts = field.split('.');
    let mut current = source.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Iterates a value, flattening one level of arrays.
pub(crate) fn elements(value: Option<&Value>) -> impl Iterator<Item = &Value> {
    let items: Vec<&Value> = match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter(|v| !v.is_null()).collect(),
        Some(other) => vec![other],
    };
    items.into_iter()
}

/// Returns the keyword form of a scalar value.
pub(crate) fn term_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn terms_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x == y;
    }
    match (term_string(a), term_string(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Orders two scalar values: numbers numerically, everything else by keyword.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (
        b.as_f64().and_then(|_| term_string(a)?.parse::<f64>().ok()),
        b.as_f64(),
    ) {
        return x.partial_cmp(&y);
    }
    Some(term_string(a)?.cmp(&term_string(b)?))
}

fn is_filled(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

/// Approximates query-string matching: every whitespace separated term must
/// occur (case-insensitively) in some string of the document; `field:term`
/// restricts the search to one field.
fn matches_query_string(source: &Map<String, Value>, text: &str) -> bool {
    text.split_whitespace()
        .filter(|token| !matches!(*token, "AND" | "&&"))
        .all(|token| {
            let token = token.trim_matches('"');
            match token.split_once(':') {
                Some((field, term)) if !field.is_empty() => {
                    let term = term.to_lowercase();
                    let mut texts = Vec::new();
                    if let Some(value) = lookup(source, field) {
                        collect_text(value, &mut texts);
                    }
                    texts.iter().any(|t| t.contains(&term))
                }
                _ => {
                    let term = token.to_lowercase();
                    let mut texts = Vec::new();
                    for value in source.values() {
                        collect_text(value, &mut texts);
                    }
                    texts.iter().any(|t| t.contains(&term))
                }
            }
        })
}

fn collect_text(value: &Value, texts: &mut Vec<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_text(v, texts)),
        Value::Object(map) => map.values().for_each(|v| collect_text(v, texts)),
        other => {
            if let Some(s) = term_string(other) {
                texts.push(s.to_lowercase());
            }
        }
    }
}
