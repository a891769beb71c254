use crate::broker::request::{is_match, PropertyFilter};
use crate::broker::resource::{LockState, Resource, Transition};
use crate::broker::store::{DurableStore, Error};
use crate::broker::unlock_token::{TokenFilter, UnlockToken};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::{debug, instrument};

const INSERT_RESOURCE_SCRIPT: &str = r"
    local sequence = redis.call('incr', KEYS[3])
    redis.call('hset', KEYS[1], 'resource_set', ARGV[2], 'properties', ARGV[3], 'lock_state', ARGV[4])
    redis.call('zadd', KEYS[2], sequence, ARGV[1])
    redis.call('zadd', KEYS[4], sequence, ARGV[1])
    return 1
";

// Returns {0, ''} when missing, {1, state} on conflict, {2, state} once applied.
const TRANSITION_SCRIPT: &str = r"
    local state = redis.call('hget', KEYS[1], 'lock_state')
    if not state then
        return {0, ''}
    end
    if state ~= ARGV[1] then
        return {1, state}
    end
    redis.call('hset', KEYS[1], 'lock_state', ARGV[2])
    return {2, state}
";

const DELETE_RESOURCE_SCRIPT: &str = r"
    local state = redis.call('hget', KEYS[1], 'lock_state')
    if not state then
        return {0, ''}
    end
    if state ~= ARGV[1] then
        return {1, state}
    end
    redis.call('del', KEYS[1])
    redis.call('zrem', KEYS[2], ARGV[2])
    redis.call('zrem', KEYS[3], ARGV[2])
    return {2, state}
";

const TAKE_TOKEN_SCRIPT: &str = r"
    local token = redis.call('get', KEYS[1])
    if not token then
        return false
    end
    redis.call('del', KEYS[1])
    redis.call('zrem', KEYS[2], ARGV[1])
    return token
";

/// Redis-backed store.
///
/// Layout, relative to `key_prefix`:
/// * `resources`: sorted set of resource ids, scored by insertion sequence
/// * `resource_set:<set>`: the same index restricted to one resource set
/// * `resource:<id>`: hash with `resource_set`, `properties` and `lock_state`
/// * `unlock_tokens`: sorted set of token ids, scored by lock time
/// * `unlock_token:<id>`: JSON-encoded token
#[derive(Debug)]
pub struct RedisBackend {
    client: redis::Client,
    key_prefix: String,
}

impl RedisBackend {
    pub fn new(redis_url: &str, key_prefix: String) -> Result<Self, Error> {
        let client = redis::Client::open(redis_url)?;
        Ok(RedisBackend { client, key_prefix })
    }

    async fn get_connection(&self) -> Result<MultiplexedConnection, Error> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn resources_key(&self) -> String {
        format!("{}resources", self.key_prefix)
    }

    fn resource_sequence_key(&self) -> String {
        format!("{}resource_sequence", self.key_prefix)
    }

    fn resource_set_key(&self, resource_set: &str) -> String {
        format!("{}resource_set:{resource_set}", self.key_prefix)
    }

    fn resource_key(&self, id: &str) -> String {
        format!("{}resource:{id}", self.key_prefix)
    }

    fn tokens_key(&self) -> String {
        format!("{}unlock_tokens", self.key_prefix)
    }

    fn token_key(&self, id: &str) -> String {
        format!("{}unlock_token:{id}", self.key_prefix)
    }

    fn decode_resource(id: &str, mut fields: HashMap<String, String>) -> Result<Resource, Error> {
        let (Some(resource_set), Some(properties), Some(lock_state)) = (
            fields.remove("resource_set"),
            fields.remove("properties"),
            fields.remove("lock_state"),
        ) else {
            return Err(Error::Corrupted(format!("resource {id} is missing fields")));
        };

        let lock_state = LockState::parse(&lock_state).ok_or_else(|| {
            Error::Corrupted(format!("resource {id} has unknown state '{lock_state}'"))
        })?;

        Ok(Resource {
            id: id.to_string(),
            resource_set,
            properties: serde_json::from_str(&properties)?,
            lock_state,
        })
    }

    fn decode_transition((code, state): (i32, String)) -> Result<Transition, Error> {
        match code {
            0 => Ok(Transition::Missing),
            1 => LockState::parse(&state)
                .map(Transition::Conflict)
                .ok_or_else(|| Error::Corrupted(format!("unknown lock state '{state}'"))),
            _ => Ok(Transition::Applied),
        }
    }
}

#[async_trait]
impl DurableStore for RedisBackend {
    #[instrument(skip(self, resource), fields(id = %resource.id))]
    async fn insert_resource(&self, resource: Resource) -> Result<(), Error> {
        let mut conn = self.get_connection().await?;
        let properties = serde_json::to_string(&resource.properties)?;

        let _: i32 = redis::Script::new(INSERT_RESOURCE_SCRIPT)
            .prepare_invoke()
            .key(self.resource_key(&resource.id))
            .key(self.resources_key())
            .key(self.resource_sequence_key())
            .key(self.resource_set_key(&resource.resource_set))
            .arg(&resource.id)
            .arg(&resource.resource_set)
            .arg(properties)
            .arg(resource.lock_state.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn read_resource(&self, id: &str) -> Result<Option<Resource>, Error> {
        let mut conn = self.get_connection().await?;
        let fields: HashMap<String, String> = conn.hgetall(self.resource_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Self::decode_resource(id, fields).map(Some)
    }

    async fn list_resources(&self, resource_set: Option<String>) -> Result<Vec<Resource>, Error> {
        let mut conn = self.get_connection().await?;
        let index = match &resource_set {
            Some(resource_set) => self.resource_set_key(resource_set),
            None => self.resources_key(),
        };
        let ids: Vec<String> = conn.zrange(index, 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(self.resource_key(id));
        }
        let rows: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        let mut resources = Vec::with_capacity(ids.len());
        for (id, fields) in ids.iter().zip(rows) {
            // Deleted between the index read and the hash read.
            if fields.is_empty() {
                continue;
            }
            let resource = Self::decode_resource(id, fields)?;
            if resource_set
                .as_ref()
                .map_or(true, |set| &resource.resource_set == set)
            {
                resources.push(resource);
            }
        }
        Ok(resources)
    }

    #[instrument(skip(self, filter))]
    async fn claim_resource(
        &self,
        resource_set: &str,
        filter: &PropertyFilter,
    ) -> Result<Option<Resource>, Error> {
        let candidates = self.list_resources(Some(resource_set.to_string())).await?;

        for mut candidate in candidates {
            if candidate.lock_state != LockState::Free || !is_match(&candidate, resource_set, filter)
            {
                continue;
            }

            match self
                .transition(&candidate.id, LockState::Free, LockState::Reserved)
                .await?
            {
                Transition::Applied => {
                    candidate.lock_state = LockState::Reserved;
                    return Ok(Some(candidate));
                }
                outcome => debug!("Candidate {} changed underneath: {outcome:?}", candidate.id),
            }
        }

        Ok(None)
    }

    async fn transition(
        &self,
        id: &str,
        from: LockState,
        to: LockState,
    ) -> Result<Transition, Error> {
        let mut conn = self.get_connection().await?;
        let result: (i32, String) = redis::Script::new(TRANSITION_SCRIPT)
            .prepare_invoke()
            .key(self.resource_key(id))
            .arg(from.as_str())
            .arg(to.as_str())
            .invoke_async(&mut conn)
            .await?;
        Self::decode_transition(result)
    }

    async fn delete_resource(&self, id: &str, expected: LockState) -> Result<Transition, Error> {
        let mut conn = self.get_connection().await?;
        // The set of a resource never changes, so it can be read ahead of the script.
        let resource_set: Option<String> = conn.hget(self.resource_key(id), "resource_set").await?;
        let Some(resource_set) = resource_set else {
            return Ok(Transition::Missing);
        };

        let result: (i32, String) = redis::Script::new(DELETE_RESOURCE_SCRIPT)
            .prepare_invoke()
            .key(self.resource_key(id))
            .key(self.resources_key())
            .key(self.resource_set_key(&resource_set))
            .arg(expected.as_str())
            .arg(id)
            .invoke_async(&mut conn)
            .await?;
        Self::decode_transition(result)
    }

    #[instrument(skip(self, token), fields(id = %token.id))]
    async fn insert_token(&self, token: UnlockToken) -> Result<(), Error> {
        let mut conn = self.get_connection().await?;
        let value = serde_json::to_string(&token)?;

        let _: () = redis::pipe()
            .atomic()
            .set(self.token_key(&token.id), value)
            .ignore()
            .zadd(
                self.tokens_key(),
                &token.id,
                token.locked_at.timestamp_millis(),
            )
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn take_token(&self, id: &str) -> Result<Option<UnlockToken>, Error> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = redis::Script::new(TAKE_TOKEN_SCRIPT)
            .prepare_invoke()
            .key(self.token_key(id))
            .key(self.tokens_key())
            .arg(id)
            .invoke_async(&mut conn)
            .await?;

        match value {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    async fn list_tokens(&self, filter: TokenFilter) -> Result<Vec<UnlockToken>, Error> {
        let mut conn = self.get_connection().await?;
        let ids: Vec<String> = conn.zrange(self.tokens_key(), 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.token_key(id)).collect();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await?;

        let mut tokens = Vec::new();
        for value in values.into_iter().flatten() {
            let token: UnlockToken = serde_json::from_str(&value)?;
            if filter.matches(&token) {
                tokens.push(token);
            }
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::store::tests::{
        test_store_claim_in_store_order, test_store_claim_respects_filter,
        test_store_delete_resource, test_store_list_resources_by_set, test_store_tokens,
        test_store_transition,
    };
    use uuid::Uuid;

    fn create_backend() -> RedisBackend {
        let key_prefix = format!("test-{}:", Uuid::new_v4());
        RedisBackend::new("redis://localhost:6379/3", key_prefix)
            .expect("Failed to create RedisBackend")
    }

    #[test]
    fn test_resource_set_key() {
        let backend = RedisBackend::new("redis://localhost:6379/3", "reslock:".to_string())
            .expect("Failed to create RedisBackend");

        assert_eq!(backend.resources_key(), "reslock:resources");
        assert_eq!(
            backend.resource_set_key("lab boards"),
            "reslock:resource_set:lab boards"
        );
    }

    #[test]
    fn test_decode_transition() {
        assert_eq!(
            RedisBackend::decode_transition((0, String::new())),
            Ok(Transition::Missing)
        );
        assert_eq!(
            RedisBackend::decode_transition((1, "locked".to_string())),
            Ok(Transition::Conflict(LockState::Locked))
        );
        assert_eq!(
            RedisBackend::decode_transition((2, "free".to_string())),
            Ok(Transition::Applied)
        );
        assert!(RedisBackend::decode_transition((1, "bogus".to_string())).is_err());
    }

    #[test]
    fn test_decode_resource() {
        let fields = HashMap::from([
            ("resource_set".to_string(), "boards".to_string()),
            ("properties".to_string(), r#"{"arch":"arm"}"#.to_string()),
            ("lock_state".to_string(), "disabled".to_string()),
        ]);

        let resource = RedisBackend::decode_resource("r1", fields).unwrap();
        assert_eq!(resource.id, "r1");
        assert_eq!(resource.resource_set, "boards");
        assert_eq!(resource.lock_state, LockState::Disabled);
        assert_eq!(resource.properties["arch"], "arm");

        let incomplete = HashMap::from([("resource_set".to_string(), "boards".to_string())]);
        assert!(matches!(
            RedisBackend::decode_resource("r2", incomplete),
            Err(Error::Corrupted(_))
        ));
    }

    #[tokio::test]
    #[ignore = "requires a Redis server on localhost:6379"]
    async fn test_claim_in_store_order() {
        test_store_claim_in_store_order(&create_backend()).await;
    }

    #[tokio::test]
    #[ignore = "requires a Redis server on localhost:6379"]
    async fn test_claim_respects_filter() {
        test_store_claim_respects_filter(&create_backend()).await;
    }

    #[tokio::test]
    #[ignore = "requires a Redis server on localhost:6379"]
    async fn test_transition() {
        test_store_transition(&create_backend()).await;
    }

    #[tokio::test]
    #[ignore = "requires a Redis server on localhost:6379"]
    async fn test_delete_resource() {
        test_store_delete_resource(&create_backend()).await;
    }

    #[tokio::test]
    #[ignore = "requires a Redis server on localhost:6379"]
    async fn test_tokens() {
        test_store_tokens(&create_backend()).await;
    }

    #[tokio::test]
    #[ignore = "requires a Redis server on localhost:6379"]
    async fn test_list_resources_by_set() {
        test_store_list_resources_by_set(&create_backend()).await;
    }
}
