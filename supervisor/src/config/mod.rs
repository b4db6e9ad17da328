//! Configuration resolution
//!
//! Merges schema defaults, the process environment and an override map into a
//! single immutable [`ConfigSnapshot`]. Resolution either succeeds completely or
//! reports every missing required key at once.

pub mod settings;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use shared::logging::mask_secret;
use thiserror::Error;

pub use settings::{enforced_overrides, public_url, workflow_host_schema, SupervisorSettings};

/// Values starting with this prefix are treated as unfilled template values
pub const DEFAULT_PLACEHOLDER_PREFIX: &str = "your_";

const SECRET_MARKERS: [&str; 4] = ["KEY", "PASSWORD", "SECRET", "TOKEN"];

/// How a missing key in a category is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Missing keys abort startup
    Fatal,
    /// Missing keys are reported but startup continues
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Number,
    Flag,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Text => write!(f, "text"),
            ValueKind::Number => write!(f, "number"),
            ValueKind::Flag => write!(f, "flag"),
        }
    }
}

/// Where a resolved value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Default,
    Environment,
    Override,
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::Default => write!(f, "default"),
            ValueSource::Environment => write!(f, "environment"),
            ValueSource::Override => write!(f, "override"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Text(String),
    Number(i64),
    Flag(bool),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Text(text) => write!(f, "{text}"),
            ConfigValue::Number(number) => write!(f, "{number}"),
            ConfigValue::Flag(flag) => write!(f, "{flag}"),
        }
    }
}

/// One recognised configuration key
#[derive(Debug, Clone)]
pub struct KeySpec {
    pub name: String,
    pub default: Option<String>,
    pub required: bool,
    pub category: String,
    pub kind: ValueKind,
    pub secret: bool,
}

impl KeySpec {
    fn new(name: &str, kind: ValueKind) -> Self {
        let upper = name.to_uppercase();
        Self {
            name: name.to_string(),
            default: None,
            required: false,
            category: "general".to_string(),
            kind,
            secret: SECRET_MARKERS.iter().any(|marker| upper.contains(marker)),
        }
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, ValueKind::Text)
    }

    pub fn number(name: &str) -> Self {
        Self::new(name, ValueKind::Number)
    }

    pub fn flag(name: &str) -> Self {
        Self::new(name, ValueKind::Flag)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn in_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    /// Override the name-derived secret flag
    pub fn secret(mut self, secret: bool) -> Self {
        self.secret = secret;
        self
    }
}

/// The set of keys the resolver recognises
#[derive(Debug, Clone)]
pub struct ConfigSchema {
    keys: Vec<KeySpec>,
    categories: HashMap<String, Severity>,
    placeholder_prefix: String,
}

impl Default for ConfigSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            categories: HashMap::new(),
            placeholder_prefix: DEFAULT_PLACEHOLDER_PREFIX.to_string(),
        }
    }

    pub fn with_category(mut self, category: &str, severity: Severity) -> Self {
        self.categories.insert(category.to_string(), severity);
        self
    }

    pub fn with_placeholder_prefix(mut self, prefix: &str) -> Self {
        self.placeholder_prefix = prefix.to_lowercase();
        self
    }

    pub fn key(mut self, spec: KeySpec) -> Self {
        self.keys.push(spec);
        self
    }

    pub fn keys(&self) -> &[KeySpec] {
        &self.keys
    }

    pub fn spec(&self, name: &str) -> Option<&KeySpec> {
        self.keys.iter().find(|spec| spec.name == name)
    }

    /// Severity of a category; undeclared categories are fatal
    pub fn severity(&self, category: &str) -> Severity {
        self.categories.get(category).copied().unwrap_or(Severity::Fatal)
    }

    fn is_missing(&self, value: &str) -> bool {
        let trimmed = value.trim();
        trimmed.is_empty() || trimmed.to_lowercase().starts_with(&self.placeholder_prefix)
    }
}

/// Missing keys of one category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingKeys {
    pub category: String,
    pub keys: Vec<String>,
    pub fatal: bool,
}

impl fmt::Display for MissingKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.keys.join(", "))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing required configuration ({})", format_groups(.groups))]
    MissingRequiredKeys { groups: Vec<MissingKeys> },

    #[error("Invalid value for {key}: `{value}` is not a valid {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: ValueKind,
    },

    #[error("Invalid setting {key}=`{value}`: {reason}")]
    InvalidSetting { key: String, value: String, reason: String },
}

impl ConfigError {
    /// Every missing key across all groups, in schema order
    pub fn missing_keys(&self) -> Vec<String> {
        match self {
            ConfigError::MissingRequiredKeys { groups } => {
                groups.iter().flat_map(|group| group.keys.iter().cloned()).collect()
            }
            ConfigError::InvalidValue { .. } | ConfigError::InvalidSetting { .. } => Vec::new(),
        }
    }
}

fn format_groups(groups: &[MissingKeys]) -> String {
    groups.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedValue {
    pub value: ConfigValue,
    pub source: ValueSource,
    pub secret: bool,
}

impl ResolvedValue {
    /// Display form with secrets masked
    pub fn masked(&self) -> String {
        let rendered = self.value.to_string();
        if self.secret {
            mask_secret(&rendered)
        } else {
            rendered
        }
    }
}

/// Immutable result of configuration resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    values: BTreeMap<String, ResolvedValue>,
    warnings: Vec<MissingKeys>,
}

impl ConfigSnapshot {
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key).map(|resolved| &resolved.value)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(ConfigValue::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn number(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(ConfigValue::Number(number)) => Some(*number),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(ConfigValue::Flag(flag)) => Some(*flag),
            _ => None,
        }
    }

    pub fn source(&self, key: &str) -> Option<ValueSource> {
        self.values.get(key).map(|resolved| resolved.source)
    }

    pub fn is_secret(&self, key: &str) -> bool {
        self.values.get(key).map(|resolved| resolved.secret).unwrap_or(false)
    }

    /// `(key, source)` for every resolved key, sorted by key
    pub fn audit(&self) -> Vec<(String, ValueSource)> {
        self.values
            .iter()
            .map(|(key, resolved)| (key.clone(), resolved.source))
            .collect()
    }

    /// Missing keys from warning-severity categories
    pub fn warnings(&self) -> &[MissingKeys] {
        &self.warnings
    }

    /// Flatten the snapshot into environment variables for a child process
    pub fn to_env(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .map(|(key, resolved)| (key.clone(), resolved.value.to_string()))
            .collect()
    }

    /// `(key, value, source)` lines for logging, secrets masked
    pub fn masked_entries(&self) -> Vec<(String, String, ValueSource)> {
        self.values
            .iter()
            .map(|(key, resolved)| (key.clone(), resolved.masked(), resolved.source))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for ConfigSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value, source) in self.masked_entries() {
            writeln!(f, "{key}={value} ({source})")?;
        }
        Ok(())
    }
}

/// Resolve the schema against an environment and an override map
///
/// Merge order is default, then environment, then override; the last present,
/// non-placeholder value wins. Override keys outside the schema are passed
/// through as text.
pub fn resolve(
    schema: &ConfigSchema,
    env: &HashMap<String, String>,
    overrides: &HashMap<String, String>,
) -> Result<ConfigSnapshot, ConfigError> {
    let mut values = BTreeMap::new();
    let mut missing: Vec<MissingKeys> = Vec::new();

    for spec in schema.keys() {
        let candidates = [
            (spec.default.as_deref(), ValueSource::Default),
            (env.get(&spec.name).map(String::as_str), ValueSource::Environment),
            (overrides.get(&spec.name).map(String::as_str), ValueSource::Override),
        ];

        let winner = candidates
            .into_iter()
            .filter_map(|(value, source)| value.map(|v| (v, source)))
            .filter(|(value, _)| !schema.is_missing(value))
            .last();

        match winner {
            Some((raw, source)) => {
                let value = parse_value(&spec.name, raw, spec.kind)?;
                values.insert(
                    spec.name.clone(),
                    ResolvedValue {
                        value,
                        source,
                        secret: spec.secret,
                    },
                );
            }
            None if spec.required => {
                let fatal = schema.severity(&spec.category) == Severity::Fatal;
                match missing.iter_mut().find(|group| group.category == spec.category) {
                    Some(group) => group.keys.push(spec.name.clone()),
                    None => missing.push(MissingKeys {
                        category: spec.category.clone(),
                        keys: vec![spec.name.clone()],
                        fatal,
                    }),
                }
            }
            None => {}
        }
    }

    for (key, raw) in overrides {
        if schema.spec(key).is_none() && !schema.is_missing(raw) {
            let upper = key.to_uppercase();
            values.insert(
                key.clone(),
                ResolvedValue {
                    value: ConfigValue::Text(raw.clone()),
                    source: ValueSource::Override,
                    secret: SECRET_MARKERS.iter().any(|marker| upper.contains(marker)),
                },
            );
        }
    }

    if missing.iter().any(|group| group.fatal) {
        return Err(ConfigError::MissingRequiredKeys { groups: missing });
    }

    Ok(ConfigSnapshot {
        values,
        warnings: missing,
    })
}

fn parse_value(key: &str, raw: &str, kind: ValueKind) -> Result<ConfigValue, ConfigError> {
    let trimmed = raw.trim();
    let invalid = || ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
        expected: kind,
    };

    match kind {
        ValueKind::Text => Ok(ConfigValue::Text(raw.to_string())),
        ValueKind::Number => trimmed.parse::<i64>().map(ConfigValue::Number).map_err(|_| invalid()),
        ValueKind::Flag => match trimmed.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(ConfigValue::Flag(true)),
            "false" | "0" | "no" | "off" => Ok(ConfigValue::Flag(false)),
            _ => Err(invalid()),
        },
    }
}
