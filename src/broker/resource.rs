use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub type Properties = BTreeMap<String, Value>;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    Free,
    Reserved,
    Locked,
    Disabled,
}

impl LockState {
    pub fn as_str(self) -> &'static str {
        match self {
            LockState::Free => "free",
            LockState::Reserved => "reserved",
            LockState::Locked => "locked",
            LockState::Disabled => "disabled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "free" => Some(LockState::Free),
            "reserved" => Some(LockState::Reserved),
            "locked" => Some(LockState::Locked),
            "disabled" => Some(LockState::Disabled),
            _ => None,
        }
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Resource {
    pub id: String,
    pub resource_set: String,
    #[serde(default)]
    pub properties: Properties,
    pub lock_state: LockState,
}

impl Resource {
    pub fn new(resource_set: String, properties: Properties) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            resource_set,
            properties,
            lock_state: LockState::Free,
        }
    }
}

/// Outcome of a conditional state write against a single resource record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Transition {
    Applied,
    /// The record exists but its state was not the expected one.
    Conflict(LockState),
    Missing,
}
