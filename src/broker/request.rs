use crate::broker::resource::{Properties, Resource};
use crate::broker::Error;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One item of an acquisition: a resource set plus an optional property filter.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ResourceRequest {
    pub resource_set: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
}

impl ResourceRequest {
    pub fn new(resource_set: impl Into<String>) -> Self {
        Self {
            resource_set: resource_set.into(),
            properties: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties
            .get_or_insert_with(Properties::new)
            .insert(key.into(), value);
        self
    }

    pub fn filter(&self) -> PropertyFilter {
        PropertyFilter {
            expected: self
                .properties
                .iter()
                .flatten()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }
    }
}

/// Exact-equality matcher over a resource property map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyFilter {
    expected: Vec<(String, Value)>,
}

impl PropertyFilter {
    pub fn matches(&self, properties: &Properties) -> bool {
        self.expected
            .iter()
            .all(|(key, value)| properties.get(key) == Some(value))
    }
}

/// Selects a resource for one request: right set, every filter pair equal.
pub fn is_match(resource: &Resource, resource_set: &str, filter: &PropertyFilter) -> bool {
    resource.resource_set == resource_set && filter.matches(&resource.properties)
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct AcquisitionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_set: Option<String>,
}

impl AcquisitionOptions {
    pub fn validate(&self) -> Result<(), Error> {
        if self.expire_minutes.is_some() && self.expire_date.is_some() {
            return Err(Error::InvalidOptions(
                "Don't set expire_date and expire_minutes together".to_string(),
            ));
        }
        if matches!(self.unlock_set.as_deref(), Some("")) {
            return Err(Error::InvalidOptions(
                "unlock_set must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn expire_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match (self.expire_date, self.expire_minutes) {
            (Some(date), _) => Some(date),
            (None, Some(minutes)) => Some(now + Duration::minutes(i64::from(minutes))),
            (None, None) => None,
        }
    }
}

/// A request that could not be satisfied, with its position in the input.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MissingResource {
    pub index: usize,
    #[serde(flatten)]
    pub request: ResourceRequest,
}
