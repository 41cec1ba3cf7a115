use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::PolicyError;
use crate::link::Dimension;
use crate::template::{DEFAULT_END_DELIMITER, DEFAULT_START_DELIMITER};

/// The verdict a policy contributes when it applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
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

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Effect {
    type Err = PolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "allow" => Ok(Effect::Allow),
            "deny" => Ok(Effect::Deny),
            other => Err(PolicyError::InvalidPolicy(format!(
                "unknown effect {other:?}, expected \"allow\" or \"deny\""
            ))),
        }
    }
}

/// An opaque condition descriptor. Evaluation happens outside this crate;
/// the store only persists and returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

impl Condition {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            options: Map::new(),
        }
    }

    pub fn with_option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }
}

pub type Conditions = Vec<Condition>;

fn default_start_delimiter() -> char {
    DEFAULT_START_DELIMITER
}

fn default_end_delimiter() -> char {
    DEFAULT_END_DELIMITER
}

/// A stored access policy.
///
/// A policy without subject templates is global: it applies to every
/// subject. There is no update operation; to change a policy, delete it and
/// create it again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub effect: Effect,
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub subjects: BTreeSet<String>,
    #[serde(default)]
    pub resources: BTreeSet<String>,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    /// Only used when templates are compiled, never persisted.
    #[serde(default = "default_start_delimiter")]
    pub start_delimiter: char,
    #[serde(default = "default_end_delimiter")]
    pub end_delimiter: char,
}

impl PolicyRecord {
    pub fn new(id: &str, effect: Effect) -> Self {
        Self {
            id: id.to_string(),
            description: String::new(),
            effect,
            conditions: Vec::new(),
            subjects: BTreeSet::new(),
            resources: BTreeSet::new(),
            permissions: BTreeSet::new(),
            start_delimiter: DEFAULT_START_DELIMITER,
            end_delimiter: DEFAULT_END_DELIMITER,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_subjects<I, S>(self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_templates(Dimension::Subject, subjects)
    }

    pub fn with_resources<I, S>(self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_templates(Dimension::Resource, resources)
    }

    pub fn with_permissions<I, S>(self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_templates(Dimension::Permission, permissions)
    }

    /// Add templates to one dimension.
    pub fn with_templates<I, S>(mut self, dimension: Dimension, templates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.templates_mut(dimension)
            .extend(templates.into_iter().map(Into::into));
        self
    }

    pub fn with_delimiters(mut self, start: char, end: char) -> Self {
        self.start_delimiter = start;
        self.end_delimiter = end;
        self
    }

    pub fn templates(&self, dimension: Dimension) -> &BTreeSet<String> {
        match dimension {
            Dimension::Subject => &self.subjects,
            Dimension::Resource => &self.resources,
            Dimension::Permission => &self.permissions,
        }
    }

    pub fn templates_mut(&mut self, dimension: Dimension) -> &mut BTreeSet<String> {
        match dimension {
            Dimension::Subject => &mut self.subjects,
            Dimension::Resource => &mut self.resources,
            Dimension::Permission => &mut self.permissions,
        }
    }

    pub fn is_global(&self) -> bool {
        self.subjects.is_empty()
    }

    /// Check the parts of a policy the store relies on before writing it.
    ///
    /// # Errors
    ///
    /// [`PolicyError::InvalidPolicy`] for an empty id or identical
    /// delimiters.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.id.trim().is_empty() {
            return Err(PolicyError::InvalidPolicy("policy id must not be empty".to_string()));
        }
        if self.start_delimiter == self.end_delimiter {
            return Err(PolicyError::InvalidPolicy(format!(
                "start and end delimiter must differ, both are {:?}",
                self.start_delimiter
            )));
        }
        Ok(())
    }
}
