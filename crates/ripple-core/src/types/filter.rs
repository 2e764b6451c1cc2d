//! Key filter rules

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::MAX_FILTER_VALUE_LENGTH;

pub const PREFIX_RULE: &str = "prefix";
pub const SUFFIX_RULE: &str = "suffix";

/// Filter rule for key name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Filter name: "prefix" or "suffix"
    pub name: String,
    /// Filter value
    pub value: String,
}

impl FilterRule {
    pub fn prefix(value: impl Into<String>) -> Self {
        Self {
            name: PREFIX_RULE.to_string(),
            value: value.into(),
        }
    }

    pub fn suffix(value: impl Into<String>) -> Self {
        Self {
            name: SUFFIX_RULE.to_string(),
            value: value.into(),
        }
    }

    /// Byte-wise, case-sensitive match against an object key.
    pub fn matches(&self, key: &str) -> bool {
        match self.name.as_str() {
            PREFIX_RULE => key.starts_with(&self.value),
            SUFFIX_RULE => key.ends_with(&self.value),
            _ => false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name != PREFIX_RULE && self.name != SUFFIX_RULE {
            return Err(Error::InvalidFilterName(self.name.clone()));
        }
        validate_filter_value(&self.value)
    }
}

/// Conjunction of filter rules applied to object keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFilter {
    #[serde(default)]
    pub rules: Vec<FilterRule>,
}

impl KeyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add prefix filter
    pub fn with_prefix(mut self, value: impl Into<String>) -> Self {
        self.rules.push(FilterRule::prefix(value));
        self
    }

    /// Add suffix filter
    pub fn with_suffix(mut self, value: impl Into<String>) -> Self {
        self.rules.push(FilterRule::suffix(value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// A key matches when it satisfies every rule. No rules match everything.
    pub fn matches(&self, key: &str) -> bool {
        self.rules.iter().all(|rule| rule.matches(key))
    }

    pub fn validate(&self) -> Result<()> {
        self.rules.iter().try_for_each(FilterRule::validate)
    }
}

/// Validate a prefix or suffix value.
///
/// Values must be non-empty, at most 1024 bytes, and free of `*` (filters are
/// literal, not globs) and of `//`, which can never occur in a normalized key.
pub fn validate_filter_value(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidFilterValue("value must not be empty".into()));
    }
    if value.len() > MAX_FILTER_VALUE_LENGTH {
        return Err(Error::InvalidFilterValue(format!(
            "value exceeds {} bytes",
            MAX_FILTER_VALUE_LENGTH
        )));
    }
    if value.contains('*') {
        return Err(Error::InvalidFilterValue(format!(
            "wildcards are not supported: {}",
            value
        )));
    }
    if value.contains("//") {
        return Err(Error::InvalidFilterValue(format!(
            "value contains an empty path segment: {}",
            value
        )));
    }
    Ok(())
}

/// Validate a list of values, failing on the first invalid one
pub fn validate_filter_values<S: AsRef<str>>(values: &[S]) -> Result<()> {
    values
        .iter()
        .try_for_each(|value| validate_filter_value(value.as_ref()))
}
