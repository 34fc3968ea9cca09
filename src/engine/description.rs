// Mission description: serializable blueprint of a state tree

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::engine::settings::Settings;
use crate::engine::types::Outcome;

#[derive(Debug, Error)]
pub enum DescriptionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Mission serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Mission parse error: {0}")]
    Deserialize(#[from] toml::de::Error),
}

/// Where one outcome of a child leads: a sibling name or an outcome of the parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDescription {
    pub outcome: String,
    pub target: String,
}

impl TransitionDescription {
    pub fn new(outcome: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            outcome: outcome.into(),
            target: target.into(),
        }
    }
}

/// One state of a mission and, for generic state machines, its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDescription {
    #[serde(rename = "type")]
    pub state_type: String,
    pub name: String,
    /// Declared outcomes overriding the type's own, used for generic machines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcomes: Option<Vec<Outcome>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<String>,
    /// Transitions of this state inside its parent machine.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<TransitionDescription>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StateDescription>,
}

impl StateDescription {
    pub fn leaf(state_type: impl Into<String>, name: impl Into<String>, settings: Settings) -> Self {
        Self {
            state_type: state_type.into(),
            name: name.into(),
            outcomes: None,
            initial_state: None,
            transitions: Vec::new(),
            settings,
            children: Vec::new(),
        }
    }

    pub fn add_child(&mut self, mut child: StateDescription, transitions: Vec<TransitionDescription>) {
        child.transitions = transitions;
        self.children.push(child);
    }

    pub fn children_names(&self) -> Vec<&str> {
        self.children.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of states in the tree, including this one.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(StateDescription::count).sum::<usize>()
    }

    pub fn to_toml_string(&self) -> Result<String, DescriptionError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, DescriptionError> {
        Ok(toml::from_str(content)?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), DescriptionError> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, DescriptionError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
