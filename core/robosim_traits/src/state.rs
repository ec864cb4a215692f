//! Payloads exchanged between the driver and its collaborators.

use bincode::{Decode, Encode};
use robosim_clock::SimTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// State of one degree of freedom.
#[derive(Debug, Clone, PartialEq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct DofState {
    pub name: String,
    pub position: f64,
    pub velocity: f64,
    /// Actuation command currently applied to this dof.
    pub command: f64,
}

/// What the physics world looks like at a given step.
#[derive(Debug, Clone, PartialEq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub time: SimTime,
    pub step: u64,
    pub dofs: Vec<DofState>,
}

impl StateSnapshot {
    pub fn dof(&self, name: &str) -> Option<&DofState> {
        self.dofs.iter().find(|d| d.name == name)
    }

    pub fn position(&self, name: &str) -> Option<f64> {
        self.dof(name).map(|d| d.position)
    }

    pub fn velocity(&self, name: &str) -> Option<f64> {
        self.dof(name).map(|d| d.velocity)
    }
}

/// Actuation commands keyed by dof name.
/// Ordered so that encoding and iteration are deterministic.
#[derive(Debug, Clone, PartialEq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct CommandMap(BTreeMap<String, f64>);

impl CommandMap {
    pub fn new() -> Self {
        CommandMap(BTreeMap::new())
    }

    pub fn set(&mut self, dof: impl Into<String>, value: f64) {
        self.0.insert(dof.into(), value);
    }

    pub fn get(&self, dof: &str) -> Option<f64> {
        self.0.get(dof).copied()
    }

    /// Overwrites the entries present in `other`, keeps the rest.
    pub fn merge(&mut self, other: &CommandMap) {
        for (dof, value) in other.iter() {
            self.0.insert(dof.to_owned(), value);
        }
    }

    /// Keeps every known dof but sets its command to 0.
    pub fn zero_all(&mut self) {
        self.0.values_mut().for_each(|v| *v = 0.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for CommandMap {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        CommandMap(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
