//! Global parameter layering.
//!
//! Values are layered from lowest to highest precedence: declared defaults,
//! parameter file values, then command-line overrides in order.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde_json::Value;
use tracing::debug;

use crate::error::{SpecError, SpecResult};
use crate::models::ParameterDecl;

/// Placeholder shown instead of secure parameter values.
pub const REDACTED: &str = "***";

/// A single `key=value` override.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterOverride {
    pub name: String,
    pub value: Value,
}

impl FromStr for ParameterOverride {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, raw) = s
            .split_once('=')
            .ok_or_else(|| SpecError::InvalidOverride(s.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(SpecError::InvalidOverride(s.to_string()));
        }

        // JSON when it parses, plain string otherwise
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

        Ok(Self {
            name: name.to_string(),
            value,
        })
    }
}

/// Resolved global parameters for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    values: BTreeMap<String, Value>,
    secure: BTreeSet<String>,
}

impl ParameterSet {
    /// Start layering values over the given declarations.
    pub fn builder(decls: &BTreeMap<String, ParameterDecl>) -> ParameterSetBuilder<'_> {
        ParameterSetBuilder {
            decls,
            layered: BTreeMap::new(),
        }
    }

    /// Build a set directly from values, without declarations.
    pub fn from_values(values: BTreeMap<String, Value>) -> Self {
        Self {
            values,
            secure: BTreeSet::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn is_secure(&self, name: &str) -> bool {
        self.secure.contains(name)
    }

    /// Values with secure parameters replaced by a placeholder.
    pub fn redacted(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .map(|(name, value)| {
                let shown = if self.is_secure(name) {
                    Value::String(REDACTED.to_string())
                } else {
                    value.clone()
                };
                (name.clone(), shown)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Builder layering parameter sources.
pub struct ParameterSetBuilder<'a> {
    decls: &'a BTreeMap<String, ParameterDecl>,
    layered: BTreeMap<String, Value>,
}

impl<'a> ParameterSetBuilder<'a> {
    /// Layer values loaded from a parameter file.
    pub fn file_values(mut self, values: BTreeMap<String, Value>) -> Self {
        self.layered.extend(values);
        self
    }

    /// Layer command-line overrides; later entries win.
    pub fn overrides(mut self, overrides: impl IntoIterator<Item = ParameterOverride>) -> Self {
        for o in overrides {
            self.layered.insert(o.name, o.value);
        }
        self
    }

    /// Set a single value at the highest precedence.
    pub fn set(mut self, name: impl Into<String>, value: Value) -> Self {
        self.layered.insert(name.into(), value);
        self
    }

    /// Resolve every declaration and check types and allowed values.
    pub fn build(self) -> SpecResult<ParameterSet> {
        let mut values = BTreeMap::new();
        let mut secure = BTreeSet::new();

        for (name, decl) in self.decls {
            let value = match self.layered.get(name).or(decl.default.as_ref()) {
                Some(v) => v.clone(),
                None => return Err(SpecError::MissingParameter(name.clone())),
            };

            if !decl.param_type.accepts(&value) {
                return Err(SpecError::InvalidParameter {
                    name: name.clone(),
                    message: format!("expected {}", decl.param_type.as_str()),
                });
            }

            if !decl.allowed.is_empty() && !decl.allowed.contains(&value) {
                return Err(SpecError::InvalidParameter {
                    name: name.clone(),
                    message: format!("{} is not one of the allowed values", value),
                });
            }

            if decl.secure {
                secure.insert(name.clone());
            }
            values.insert(name.clone(), value);
        }

        for (name, value) in self.layered {
            if !values.contains_key(&name) {
                debug!("Accepting undeclared parameter '{}'", name);
                values.insert(name, value);
            }
        }

        Ok(ParameterSet { values, secure })
    }
}
