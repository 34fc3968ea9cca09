// Settings: the persisted, editable configuration of a state

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Parameter '{name}' is not registered")]
    MissingParameter { name: String },
    #[error("Parameter '{name}' has type '{found}', expected '{expected}'")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: String,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Settings serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Settings parse error: {0}")]
    Deserialize(#[from] toml::de::Error),
}

/// Raw parameter value as it appears in a settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ParameterValue {
    /// Type tag naturally matching this value.
    pub fn type_tag(&self) -> &'static str {
        match self {
            ParameterValue::Bool(_) => bool::TAG,
            ParameterValue::Int(_) => i64::TAG,
            ParameterValue::Float(_) => f64::TAG,
            ParameterValue::String(_) => String::TAG,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bool(v) => write!(f, "{v}"),
            ParameterValue::Int(v) => write!(f, "{v}"),
            ParameterValue::Float(v) => write!(f, "{v}"),
            ParameterValue::String(v) => write!(f, "{v}"),
        }
    }
}

/// Rust types that can be stored in a parameter.
pub trait ParameterType: Sized {
    const TAG: &'static str;

    fn from_value(value: &ParameterValue) -> Option<Self>;
    fn into_value(self) -> ParameterValue;
}

impl ParameterType for bool {
    const TAG: &'static str = "bool";

    fn from_value(value: &ParameterValue) -> Option<Self> {
        match value {
            ParameterValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    fn into_value(self) -> ParameterValue {
        ParameterValue::Bool(self)
    }
}

impl ParameterType for i64 {
    const TAG: &'static str = "int";

    fn from_value(value: &ParameterValue) -> Option<Self> {
        match value {
            ParameterValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    fn into_value(self) -> ParameterValue {
        ParameterValue::Int(self)
    }
}

impl ParameterType for i32 {
    const TAG: &'static str = "int";

    fn from_value(value: &ParameterValue) -> Option<Self> {
        match value {
            ParameterValue::Int(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    fn into_value(self) -> ParameterValue {
        ParameterValue::Int(i64::from(self))
    }
}

impl ParameterType for f64 {
    const TAG: &'static str = "float";

    fn from_value(value: &ParameterValue) -> Option<Self> {
        match value {
            ParameterValue::Float(v) => Some(*v),
            ParameterValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    fn into_value(self) -> ParameterValue {
        ParameterValue::Float(self)
    }
}

impl ParameterType for String {
    const TAG: &'static str = "string";

    fn from_value(value: &ParameterValue) -> Option<Self> {
        match value {
            ParameterValue::String(v) => Some(v.clone()),
            _ => None,
        }
    }

    fn into_value(self) -> ParameterValue {
        ParameterValue::String(self)
    }
}

/// Named, typed configuration value of a state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub value: ParameterValue,
}

impl Parameter {
    pub fn new<T: ParameterType>(name: impl Into<String>, value: T) -> Self {
        Self {
            name: name.into(),
            type_tag: T::TAG.to_string(),
            value: value.into_value(),
        }
    }

    pub fn value(&self) -> &ParameterValue {
        &self.value
    }

    /// Typed read honoring the declared type tag.
    pub fn value_as<T: ParameterType>(&self) -> Result<T, SettingsError> {
        let mismatch = || SettingsError::TypeMismatch {
            name: self.name.clone(),
            expected: T::TAG,
            found: self.type_tag.clone(),
        };
        if self.type_tag != T::TAG {
            return Err(mismatch());
        }
        T::from_value(&self.value).ok_or_else(mismatch)
    }
}

/// Ordered parameter collection of one state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    parameters: Vec<Parameter>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter, replacing one with the same name in place.
    pub fn add_parameter(&mut self, parameter: Parameter) {
        match self.parameters.iter_mut().find(|p| p.name == parameter.name) {
            Some(existing) => *existing = parameter,
            None => self.parameters.push(parameter),
        }
    }

    pub fn parameter_is_registered(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p.name == name)
    }

    pub fn get_parameter(&self, name: &str) -> Result<&Parameter, SettingsError> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| SettingsError::MissingParameter {
                name: name.to_string(),
            })
    }

    pub fn get<T: ParameterType>(&self, name: &str) -> Result<T, SettingsError> {
        self.get_parameter(name)?.value_as()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn to_toml_string(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), SettingsError> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
