//! Named display properties and the sheet that holds them.
//!
//! A [`PropertySheet`] is a closed set of named slots. Its owner declares the
//! slots when it builds or re-creates the sheet; asynchronous producers only
//! refine existing slots through [`PropertySheet::reconcile`].

mod sheet;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use sheet::{PropertySheet, ReconcileReport};

/// Value held by a [`Property`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    #[default]
    Empty,
    Text(String),
    Integer(i64),
    Unsigned(u64),
    Time(DateTime<Utc>),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Empty => Ok(()),
            PropertyValue::Text(s) => f.write_str(s),
            PropertyValue::Integer(v) => write!(f, "{v}"),
            PropertyValue::Unsigned(v) => write!(f, "{v}"),
            PropertyValue::Time(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S %Z")),
        }
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        PropertyValue::Unsigned(value)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        PropertyValue::Unsigned(u64::from(value))
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(value: DateTime<Utc>) -> Self {
        PropertyValue::Time(value)
    }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

/// Decides at evaluation time whether a property should be shown.
pub type EnabledPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// A named, described value with an optional enabled predicate.
#[derive(Clone)]
pub struct Property {
    name: String,
    description: String,
    value: PropertyValue,
    enabled: Option<EnabledPredicate>,
}

impl Property {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            value: value.into(),
            enabled: None,
        }
    }

    /// Attach a predicate; the property is only shown or applied while it
    /// evaluates to `true`.
    pub fn with_enabled(mut self, predicate: EnabledPredicate) -> Self {
        self.enabled = Some(predicate);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.as_ref().is_none_or(|enabled| enabled())
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("value", &self.value)
            .field("conditional", &self.enabled.is_some())
            .finish()
    }
}
