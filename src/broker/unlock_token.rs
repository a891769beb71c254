use crate::broker::resource::{Properties, Resource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Snapshot of a resource held by a token, taken when the claim was made.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LockedResource {
    pub id: String,
    #[serde(default)]
    pub properties: Properties,
}

impl From<&Resource> for LockedResource {
    fn from(resource: &Resource) -> Self {
        Self {
            id: resource.id.clone(),
            properties: resource.properties.clone(),
        }
    }
}

/// Receipt of a successful acquisition and the only authority allowed to
/// release the resources it lists.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct UnlockToken {
    pub id: String,
    pub resources: Vec<LockedResource>,
    pub locked_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_set: Option<String>,
}

impl UnlockToken {
    pub fn new(
        resources: Vec<LockedResource>,
        locked_at: DateTime<Utc>,
        expire_at: Option<DateTime<Utc>>,
        unlock_set: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            resources,
            locked_at,
            expire_at,
            unlock_set,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.is_some_and(|expire_at| expire_at <= now)
    }
}

/// Selection of live tokens for bulk release.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenFilter {
    All,
    UnlockSet(String),
    ExpiredAt(DateTime<Utc>),
}

impl TokenFilter {
    pub fn matches(&self, token: &UnlockToken) -> bool {
        match self {
            TokenFilter::All => true,
            TokenFilter::UnlockSet(label) => token.unlock_set.as_deref() == Some(label.as_str()),
            TokenFilter::ExpiredAt(now) => token.is_expired(*now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_token_filter() {
        let now = Utc::now();
        let token = UnlockToken::new(
            Vec::new(),
            now,
            Some(now - Duration::seconds(1)),
            Some("g".to_string()),
        );

        assert!(TokenFilter::All.matches(&token));
        assert!(TokenFilter::UnlockSet("g".to_string()).matches(&token));
        assert!(!TokenFilter::UnlockSet("h".to_string()).matches(&token));
        assert!(TokenFilter::ExpiredAt(now).matches(&token));

        let unbounded = UnlockToken::new(Vec::new(), now, None, None);
        assert!(!TokenFilter::ExpiredAt(now).matches(&unbounded));
        assert!(!TokenFilter::UnlockSet("g".to_string()).matches(&unbounded));
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let token = UnlockToken::new(Vec::new(), Utc::now(), None, None);
        let value = serde_json::to_value(&token).unwrap();

        assert!(value.get("expire_at").is_none());
        assert!(value.get("unlock_set").is_none());
        assert!(value.get("locked_at").is_some());
    }
}
