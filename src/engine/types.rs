// Core value types for the state machine engine: names, outcomes, progress
// and inconsistency reports.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::LazyLock;

static STATE_NAME_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-]+$").ok());

/// Name of a state, unique within its parent state machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateName(String);

impl StateName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Names must be non-empty and must not contain the nesting separator.
    pub fn is_valid(&self) -> bool {
        STATE_NAME_PATTERN
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(&self.0))
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StateName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for StateName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for StateName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Identifier of a concrete state implementation in the factory registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateType(String);

impl StateType {
    pub fn new(state_type: impl Into<String>) -> Self {
        Self(state_type.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StateType {
    fn from(state_type: &str) -> Self {
        Self::new(state_type)
    }
}

impl Borrow<str> for StateType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Path of state names from the root of a tree down to one state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NestedName(Vec<StateName>);

impl NestedName {
    pub const SEPARATOR: char = '/';

    pub fn root(name: StateName) -> Self {
        Self(vec![name])
    }

    /// Nested name of a child named `name` below `self`.
    pub fn child(&self, name: &StateName) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.clone());
        Self(segments)
    }

    pub fn leaf(&self) -> Option<&StateName> {
        self.0.last()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn segments(&self) -> &[StateName] {
        &self.0
    }
}

impl fmt::Display for NestedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", Self::SEPARATOR)?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

/// Terminal label produced by one execution of a state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Outcome(String);

impl Outcome {
    pub const SUCCESS: &'static str = "success";
    pub const PREEMPTION: &'static str = "preemption";
    pub const FAILURE: &'static str = "failure";

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn label(&self) -> &str {
        &self.0
    }

    /// `preemption` and `failure` exist for every state.
    pub fn is_reserved(&self) -> bool {
        self.0 == Self::PREEMPTION || self.0 == Self::FAILURE
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Outcome {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

/// Well-known outcome labels.
pub mod outcomes {
    use super::Outcome;

    pub fn success() -> Outcome {
        Outcome::new(Outcome::SUCCESS)
    }

    pub fn preemption() -> Outcome {
        Outcome::new(Outcome::PREEMPTION)
    }

    pub fn failure() -> Outcome {
        Outcome::new(Outcome::FAILURE)
    }
}

/// Ordered outcome set of a state. The reserved outcomes are always members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcomes(Vec<Outcome>);

impl Outcomes {
    pub fn new(declared: impl IntoIterator<Item = Outcome>) -> Self {
        let mut set = Self(Vec::new());
        for outcome in declared {
            set.insert(outcome);
        }
        set.insert(outcomes::preemption());
        set.insert(outcomes::failure());
        set
    }

    pub fn insert(&mut self, outcome: Outcome) {
        if !self.0.contains(&outcome) {
            self.0.push(outcome);
        }
    }

    pub fn contains(&self, outcome: &Outcome) -> bool {
        self.0.contains(outcome)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Outcome> {
        self.0.iter()
    }

    /// Outcomes other than the reserved ones.
    pub fn declared(&self) -> impl Iterator<Item = &Outcome> {
        self.0.iter().filter(|outcome| !outcome.is_reserved())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Outcomes {
    fn default() -> Self {
        Self::new([])
    }
}

impl fmt::Display for Outcomes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self.0.iter().map(Outcome::label).collect();
        write!(f, "{{{}}}", labels.join(", "))
    }
}

/// In-flight progress of a state. Every field is unset when not applicable.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub goal: Option<f64>,
    pub done: Option<f64>,
    pub unit: Option<String>,
}

impl Progress {
    pub fn new(goal: f64, done: f64, unit: impl Into<String>) -> Self {
        Self {
            goal: Some(goal),
            done: Some(done),
            unit: Some(unit.into()),
        }
    }

    pub fn set_goal(&mut self, goal: f64) {
        self.goal = Some(goal);
    }

    pub fn set_done(&mut self, done: f64) {
        self.done = Some(done);
    }

    pub fn set_unit(&mut self, unit: impl Into<String>) {
        self.unit = Some(unit.into());
    }

    pub fn is_set(&self) -> bool {
        self.goal.is_some() && self.done.is_some()
    }

    /// Fraction done in `[0, 1]`, when both values are set and the goal is positive.
    pub fn ratio(&self) -> Option<f64> {
        match (self.goal, self.done) {
            (Some(goal), Some(done)) if goal > 0.0 => Some((done / goal).clamp(0.0, 1.0)),
            _ => None,
        }
    }
}

/// A single human-readable problem preventing execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inconsistency(String);

impl Inconsistency {
    pub fn new(description: impl Into<String>) -> Self {
        Self(description.into())
    }

    pub fn description(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a consistency check; non-empty means the state must not run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inconsistencies(Vec<Inconsistency>);

impl Inconsistencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, inconsistency: Inconsistency) {
        self.0.push(inconsistency);
    }

    pub fn extend(&mut self, other: Inconsistencies) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Inconsistency> {
        self.0.iter()
    }

    /// Number of entries whose description contains `fragment`.
    pub fn count_matching(&self, fragment: &str) -> usize {
        self.0
            .iter()
            .filter(|i| i.description().contains(fragment))
            .count()
    }
}

impl fmt::Display for Inconsistencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for inconsistency in &self.0 {
            writeln!(f, "- {inconsistency}")?;
        }
        Ok(())
    }
}
