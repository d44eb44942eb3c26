//! Layered configuration.
//!
//! Values come from four layers, lowest precedence first: built-in defaults,
//! the host config, the user config and the current session. A layer only
//! overrides a key when its value is not empty. Every file layer has a
//! `[config]` section and a `[version_defaults]` section.

mod ini_file;

use indexmap::IndexMap;
use log::{debug, warn};
use std::fmt;

use crate::error::ZapperError;
use crate::expression::Expression;
use crate::package::VersionDefaults;

pub use ini_file::{IniFile, LOCK_TIMEOUT, Section, section, set_section};

pub const CONFIG_SECTION: &str = "config";
pub const VERSION_DEFAULTS_SECTION: &str = "version_defaults";
pub const SESSIONS_SECTION: &str = "sessions";
pub const LAST_SESSION_KEY: &str = "last_session";

pub const DEFAULT_SESSION_LAST: &str = "<last>";
pub const DEFAULT_SESSION_NEW: &str = "<new>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layer {
    Default,
    Host,
    User,
    Session,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Layer::Default => "<default>",
            Layer::Host => "host",
            Layer::User => "user",
            Layer::Session => "session",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Str,
    Bool,
    Int,
    List,
    Expression,
    SessionPolicy,
}

#[derive(Debug)]
pub struct KeyDef {
    pub name: &'static str,
    pub key_type: KeyType,
    pub default: &'static str,
    pub layers: &'static [Layer],
}

const FILE_LAYERS: &[Layer] = &[Layer::Host, Layer::User, Layer::Session];
const GLOBAL_LAYERS: &[Layer] = &[Layer::Host, Layer::User];
const SESSION_LAYER: &[Layer] = &[Layer::Session];

pub const KEYS: &[KeyDef] = &[
    KeyDef { name: "directories", key_type: KeyType::List, default: "", layers: FILE_LAYERS },
    KeyDef { name: "resolution_level", key_type: KeyType::Int, default: "0", layers: FILE_LAYERS },
    KeyDef { name: "subpackages", key_type: KeyType::Bool, default: "false", layers: FILE_LAYERS },
    KeyDef { name: "enable_default_version", key_type: KeyType::Bool, default: "true", layers: FILE_LAYERS },
    KeyDef { name: "filter_packages", key_type: KeyType::Expression, default: "", layers: FILE_LAYERS },
    KeyDef { name: "default_session", key_type: KeyType::SessionPolicy, default: DEFAULT_SESSION_LAST, layers: GLOBAL_LAYERS },
    KeyDef { name: "default_packages", key_type: KeyType::List, default: "", layers: GLOBAL_LAYERS },
    KeyDef { name: "persistent_sessions_dir", key_type: KeyType::Str, default: "", layers: GLOBAL_LAYERS },
    KeyDef { name: "temporary_sessions_dir", key_type: KeyType::Str, default: "", layers: GLOBAL_LAYERS },
    KeyDef { name: "description", key_type: KeyType::Str, default: "", layers: SESSION_LAYER },
    KeyDef { name: "read_only", key_type: KeyType::Bool, default: "false", layers: SESSION_LAYER },
];

pub fn key_def(name: &str) -> Option<&'static KeyDef> {
    KEYS.iter().find(|k| k.name == name)
}

pub fn keys_for(layer: Layer) -> impl Iterator<Item = &'static KeyDef> {
    KEYS.iter()
        .filter(move |k| layer == Layer::Default || k.layers.contains(&layer))
}

pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Some(true),
        "false" | "off" | "no" | "0" | "" => Some(false),
        _ => None,
    }
}

pub fn split_list(text: &str) -> Vec<String> {
    text.split(':')
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn join_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(":")
}

pub fn is_valid_session_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.len() >= 2
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ZapperError {
    ZapperError::InvalidConfigValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Check `value` for `key` in `layer` and return its canonical form.
pub fn validate(layer: Layer, key: &str, value: &str) -> Result<String, ZapperError> {
    let def = key_def(key).ok_or_else(|| invalid(key, value, "unknown key"))?;
    if layer != Layer::Default && !def.layers.contains(&layer) {
        return Err(invalid(key, value, format!("not a {} key", layer)));
    }
    let value = value.trim();
    match def.key_type {
        KeyType::Str | KeyType::List => Ok(value.to_string()),
        KeyType::Bool => parse_bool(value)
            .map(|b| b.to_string())
            .ok_or_else(|| invalid(key, value, "expected a boolean")),
        KeyType::Int => value
            .parse::<i64>()
            .map(|n| n.to_string())
            .map_err(|e| invalid(key, value, e.to_string())),
        KeyType::Expression if value.is_empty() => Ok(String::new()),
        KeyType::Expression => Expression::parse(value)
            .map(|e| e.to_string())
            .map_err(|e| invalid(key, value, e.to_string())),
        KeyType::SessionPolicy => {
            if value == DEFAULT_SESSION_LAST || value == DEFAULT_SESSION_NEW || is_valid_session_name(value) {
                Ok(value.to_string())
            } else {
                Err(invalid(key, value, "expected <last>, <new> or a session name"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Remove,
}

/// One `key=value`, `key+=value` or `key-=value` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub key: String,
    pub op: AssignOp,
    pub value: String,
}

impl Assignment {
    pub fn parse(pair: &str) -> Result<Self, ZapperError> {
        let (left, value) = pair
            .split_once('=')
            .ok_or_else(|| ZapperError::InvalidKeyValue(pair.to_string()))?;
        let (key, op) = if let Some(key) = left.strip_suffix('+') {
            (key, AssignOp::Add)
        } else if let Some(key) = left.strip_suffix('-') {
            (key, AssignOp::Remove)
        } else {
            (left, AssignOp::Set)
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(ZapperError::InvalidKeyValue(pair.to_string()));
        }
        Ok(Assignment {
            key: key.to_string(),
            op,
            value: value.trim().to_string(),
        })
    }

    /// The new value of the key given its `current` value.
    pub fn resolve(&self, current: Option<&str>) -> Result<String, ZapperError> {
        let key_type = key_def(&self.key).map(|d| d.key_type);
        match (self.op, key_type) {
            (AssignOp::Set, _) => Ok(self.value.clone()),
            (op, Some(KeyType::Int)) => {
                let parse = |text: &str| {
                    text.parse::<i64>()
                        .map_err(|e| invalid(&self.key, text, e.to_string()))
                };
                let current = match current {
                    Some(text) if !text.is_empty() => parse(text)?,
                    _ => 0,
                };
                let delta = parse(&self.value)?;
                let value = if op == AssignOp::Add { current + delta } else { current - delta };
                Ok(value.to_string())
            }
            (op, Some(KeyType::List)) => {
                let mut items = split_list(current.unwrap_or_default());
                let present = items.contains(&self.value);
                if op == AssignOp::Add && !present {
                    items.push(self.value.clone());
                } else if op == AssignOp::Remove {
                    items.retain(|item| *item != self.value);
                }
                Ok(join_list(&items))
            }
            _ => Err(invalid(&self.key, &self.value, "only int and list keys support += and -=")),
        }
    }
}

/// Split `key=value` for version defaults; the value is a version predicate.
pub fn parse_version_default(pair: &str) -> Result<(String, String), ZapperError> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(ZapperError::InvalidKeyValue(pair.to_string())),
    }
}

/// Apply assignments to a layer's `[config]` section. Returns whether the
/// section changed.
pub fn set_keys(layer: Layer, config: &mut Section, assignments: &[Assignment]) -> Result<bool, ZapperError> {
    let mut changed = false;
    for assignment in assignments {
        let current = config.get(&assignment.key).map(String::as_str);
        let value = assignment.resolve(current)?;
        let value = validate(layer, &assignment.key, &value)?;
        if current != Some(value.as_str()) {
            debug!("setting {} config {}={:?}", layer, assignment.key, value);
            config.insert(assignment.key.clone(), value);
            changed = true;
        }
    }
    Ok(changed)
}

/// Remove keys from a layer's section. Unknown keys are an error.
pub fn reset_keys(layer: Layer, config: &mut Section, keys: &[String]) -> Result<bool, ZapperError> {
    let mut changed = false;
    for key in keys {
        if key_def(key).is_none() {
            return Err(invalid(key, "", "unknown key"));
        }
        if config.shift_remove(key).is_some() {
            debug!("resetting {} config {}", layer, key);
            changed = true;
        }
    }
    Ok(changed)
}

/// A configured value and the layer it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: String,
    pub layer: Layer,
}

/// Effective configuration after merging layers.
#[derive(Debug, Clone)]
pub struct Config {
    values: IndexMap<&'static str, Entry>,
    version_defaults: IndexMap<String, Entry>,
}

impl Config {
    /// The default layer; `overrides` replaces built-in defaults computed at
    /// runtime (directories, sessions dirs).
    pub fn new(overrides: &[(&str, String)]) -> Self {
        let mut values = IndexMap::new();
        for def in KEYS {
            let value = overrides
                .iter()
                .find(|(k, _)| *k == def.name)
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| def.default.to_string());
            values.insert(
                def.name,
                Entry {
                    value,
                    layer: Layer::Default,
                },
            );
        }
        Config {
            values,
            version_defaults: IndexMap::new(),
        }
    }

    /// Overlay one layer. Invalid values are reported and ignored.
    pub fn merge(&mut self, layer: Layer, config: &Section, version_defaults: &Section) {
        for (key, value) in config {
            if value.is_empty() {
                continue;
            }
            match validate(layer, key, value) {
                Ok(value) => {
                    if let Some(def) = key_def(key) {
                        self.values.insert(def.name, Entry { value, layer });
                    }
                }
                Err(e) => warn!("ignoring {} config: {}", layer, e),
            }
        }
        for (key, value) in version_defaults {
            self.version_defaults.insert(
                key.clone(),
                Entry {
                    value: value.clone(),
                    layer,
                },
            );
        }
    }

    pub fn entry(&self, key: &str) -> Option<&Entry> {
        self.values.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&'static str, &Entry)> {
        self.values.iter().map(|(k, e)| (*k, e))
    }

    pub fn get(&self, key: &str) -> &str {
        self.values.get(key).map(|e| e.value.as_str()).unwrap_or_default()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        parse_bool(self.get(key)).unwrap_or(false)
    }

    pub fn get_int(&self, key: &str) -> i64 {
        self.get(key).parse().unwrap_or(0)
    }

    pub fn get_list(&self, key: &str) -> Vec<String> {
        split_list(self.get(key))
    }

    pub fn get_expression(&self, key: &str) -> Result<Option<Expression>, ZapperError> {
        let text = self.get(key);
        if text.is_empty() {
            return Ok(None);
        }
        Expression::parse(text)
            .map(Some)
            .map_err(|e| invalid(key, text, e.to_string()))
    }

    pub fn version_default_entries(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.version_defaults.iter()
    }

    pub fn version_defaults(&self) -> VersionDefaults {
        self.version_defaults
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }
}
