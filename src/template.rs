//! the config template: a generic tree view of the simulator's yaml config
//! and the deep merge used to specialise it for each trial.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use enum_as_inner::EnumAsInner;
use serde_yaml::{Mapping, Number, Value};
use tracing::debug;

use crate::error::{DseError, Result};

/// a leaf of the config tree
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum ConfigValue {
    Scalar(Scalar),
    List(Vec<ConfigValue>),
    Map(BTreeMap<String, ConfigValue>),
}

impl ConfigValue {
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, ConfigValue)>,
    {
        ConfigValue::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn list(items: impl IntoIterator<Item = ConfigValue>) -> Self {
        ConfigValue::List(items.into_iter().collect())
    }

    pub fn str(s: impl Into<String>) -> Self {
        ConfigValue::Scalar(Scalar::Str(s.into()))
    }

    pub fn path(p: &Path) -> Self {
        Self::str(p.to_string_lossy())
    }

    /// look up a dotted path, list items are addressed by index:
    /// `MemorySystem.Controller.plugins.1.ControllerPlugin.path`
    pub fn lookup(&self, dotted: &str) -> Option<&ConfigValue> {
        dotted.split('.').try_fold(self, |node, key| match node {
            ConfigValue::Map(m) => m.get(key),
            ConfigValue::List(l) => key.parse::<usize>().ok().and_then(|i| l.get(i)),
            ConfigValue::Scalar(_) => None,
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ConfigValue::Scalar(Scalar::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn from_yaml(value: Value) -> std::result::Result<Self, String> {
        let v = match value {
            Value::Null => ConfigValue::Scalar(Scalar::Null),
            Value::Bool(b) => ConfigValue::Scalar(Scalar::Bool(b)),
            Value::Number(n) => ConfigValue::Scalar(number_to_scalar(&n)?),
            Value::String(s) => ConfigValue::Scalar(Scalar::Str(s)),
            Value::Sequence(seq) => ConfigValue::List(
                seq.into_iter()
                    .map(ConfigValue::from_yaml)
                    .collect::<std::result::Result<_, _>>()?,
            ),
            Value::Mapping(m) => {
                let mut out = BTreeMap::new();
                for (k, v) in m {
                    let key = match k {
                        Value::String(s) => s,
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        other => return Err(format!("unsupported map key {other:?}")),
                    };
                    out.insert(key, ConfigValue::from_yaml(v)?);
                }
                ConfigValue::Map(out)
            }
            Value::Tagged(tagged) => ConfigValue::from_yaml(tagged.value)?,
        };
        Ok(v)
    }

    pub fn to_yaml(&self) -> Value {
        match self {
            ConfigValue::Scalar(Scalar::Null) => Value::Null,
            ConfigValue::Scalar(Scalar::Bool(b)) => Value::Bool(*b),
            ConfigValue::Scalar(Scalar::Int(i)) => Value::Number(Number::from(*i)),
            ConfigValue::Scalar(Scalar::Float(f)) => Value::Number(Number::from(*f)),
            ConfigValue::Scalar(Scalar::Str(s)) => Value::String(s.clone()),
            ConfigValue::List(l) => Value::Sequence(l.iter().map(ConfigValue::to_yaml).collect()),
            ConfigValue::Map(m) => {
                let mut out = Mapping::new();
                for (k, v) in m {
                    out.insert(Value::String(k.clone()), v.to_yaml());
                }
                Value::Mapping(out)
            }
        }
    }
}

fn number_to_scalar(n: &Number) -> std::result::Result<Scalar, String> {
    if let Some(i) = n.as_i64() {
        Ok(Scalar::Int(i))
    } else if let Some(f) = n.as_f64() {
        Ok(Scalar::Float(f))
    } else {
        Err(format!("number {n} does not fit in 64 bits"))
    }
}

/// merge `overrides` into `base` in place.
///
/// when both sides of a key are maps the merge recurses, anything else
/// replaces the base value outright, whatever type the base held.
pub fn merge(base: &mut ConfigValue, overrides: &ConfigValue) {
    match (base, overrides) {
        (ConfigValue::Map(base_map), ConfigValue::Map(over_map)) => {
            for (key, value) in over_map {
                match base_map.get_mut(key) {
                    Some(slot) if slot.as_map().is_some() && value.as_map().is_some() => {
                        merge(slot, value)
                    }
                    Some(slot) => *slot = value.clone(),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overrides) => *base = overrides.clone(),
    }
}

/// the base simulator config, loaded once and specialised per trial
#[derive(Debug, Clone)]
pub struct ConfigTemplate {
    source: PathBuf,
    base: ConfigValue,
}

impl ConfigTemplate {
    pub fn load(path: &Path) -> Result<Self> {
        let load_err = |reason: String| DseError::ConfigLoad {
            path: path.to_path_buf(),
            reason,
        };
        let text = fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let value: Value = serde_yaml::from_str(&text).map_err(|e| load_err(e.to_string()))?;
        let base = ConfigValue::from_yaml(value).map_err(load_err)?;
        if base.as_map().is_none() {
            return Err(load_err("the top level is not a mapping".into()));
        }
        debug!(?path, "loaded base config");
        Ok(Self {
            source: path.to_path_buf(),
            base,
        })
    }

    pub fn from_value(base: ConfigValue) -> Self {
        Self {
            source: PathBuf::new(),
            base,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn base(&self) -> &ConfigValue {
        &self.base
    }

    /// merge `overrides` onto a copy of the base and write it to `target`
    pub fn materialize(&self, overrides: &ConfigValue, target: &Path) -> Result<ConfigValue> {
        let mut config = self.base.clone();
        merge(&mut config, overrides);
        let text = serde_yaml::to_string(&config.to_yaml()).map_err(|e| DseError::ConfigLoad {
            path: target.to_path_buf(),
            reason: e.to_string(),
        })?;
        fs::write(target, text).map_err(|e| DseError::io(target, e))?;
        debug!(?target, "wrote trial config");
        Ok(config)
    }
}
