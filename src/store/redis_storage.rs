use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::marker::PhantomData;

use crate::error::StoreError;
use crate::model::event::{MessageInstance, WaitingEvent};
use crate::model::token::Token;
use crate::store::{CoupleStore, Entity, Filter, QueryOptions, Repository, TokenStore};

const UPDATE_IF_EXISTS: &str = r#"
    if redis.call("HEXISTS", KEYS[1], ARGV[1]) == 0 then
        return 0
    end
    redis.call("HSET", KEYS[1], ARGV[1], ARGV[2])
    return 1
"#;

// ARGV[1] = id, ARGV[2] = expected version, ARGV[3] = replacement row
const COMPARE_AND_SWAP: &str = r#"
    local current = redis.call("HGET", KEYS[1], ARGV[1])
    if current == false then
        return 0
    end
    local row = cjson.decode(current)
    local version = tonumber(row["version"] or 0)
    if version ~= tonumber(ARGV[2]) then
        return 0
    end
    redis.call("HSET", KEYS[1], ARGV[1], ARGV[3])
    return 1
"#;

// KEYS[1] = token rows, KEYS[2] = live index of the merge key, ARGV[1] = token id
const DELETE_TOKEN: &str = r#"
    if redis.call("HEXISTS", KEYS[1], ARGV[1]) == 0 then
        return 0
    end
    redis.call("ZREM", KEYS[2], ARGV[1])
    redis.call("HDEL", KEYS[1], ARGV[1])
    return 1
"#;

// Pops the lowest token id of the merge key and returns how many are left, -1 if none.
const CONSUME_TOKEN: &str = r#"
    local popped = redis.call("ZPOPMIN", KEYS[2])
    if #popped == 0 then
        return -1
    end
    redis.call("HDEL", KEYS[1], popped[1])
    return redis.call("ZCARD", KEYS[2])
"#;

// KEYS[1] = message rows, KEYS[2] = waiting event rows
// ARGV[1] = message id, ARGV[2] = waiting event id, ARGV[3] = "1" to keep the waiting event
const CONSUME_COUPLE: &str = r#"
    local waiting = redis.call("HGET", KEYS[2], ARGV[2])
    if waiting == false then
        return false
    end
    local message = redis.call("HGET", KEYS[1], ARGV[1])
    if message == false then
        return false
    end
    redis.call("HDEL", KEYS[1], ARGV[1])
    if ARGV[3] ~= "1" then
        redis.call("HDEL", KEYS[2], ARGV[2])
    end
    return {message, waiting}
"#;

fn rows_key<E: Entity>(prefix: &str) -> String {
    format!("{}:{}:rows", prefix, E::KIND)
}

fn seq_key<E: Entity>(prefix: &str) -> String {
    format!("{}:{}:seq", prefix, E::KIND)
}

/// Rows of one entity kind stored as JSON in a single Redis hash keyed by id.
pub struct RedisRepository<E> {
    client: redis::Client,
    prefix: String,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> RedisRepository<E> {
    pub fn new(client: redis::Client, prefix: &str) -> Self {
        Self {
            client,
            prefix: prefix.to_string(),
            _entity: PhantomData,
        }
    }

    fn rows_key(&self) -> String {
        rows_key::<E>(&self.prefix)
    }

    async fn all_rows(&self) -> Result<Vec<E>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: HashMap<String, String> = conn.hgetall(self.rows_key()).await?;
        let mut rows = Vec::with_capacity(raw.len());
        for json in raw.values() {
            rows.push(serde_json::from_str(json)?);
        }
        Ok(rows)
    }

    async fn next_id(&self) -> Result<u64, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let id: u64 = conn.incr(seq_key::<E>(&self.prefix), 1).await?;
        Ok(id)
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for RedisRepository<E> {
    async fn get(&self, id: u64) -> Result<Option<E>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.hget(self.rows_key(), id).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, options: &QueryOptions) -> Result<Vec<E>, StoreError> {
        Ok(options.apply(self.all_rows().await?))
    }

    async fn count(&self, filter: &Filter) -> Result<usize, StoreError> {
        Ok(self
            .all_rows()
            .await?
            .iter()
            .filter(|e| filter.matches(*e))
            .count())
    }

    async fn insert(&self, mut entity: E) -> Result<E, StoreError> {
        let id = self.next_id().await?;
        entity.set_id(id);
        let json = serde_json::to_string(&entity)?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.hset(self.rows_key(), id, json).await?;
        Ok(entity)
    }

    async fn update(&self, entity: &E) -> Result<bool, StoreError> {
        let json = serde_json::to_string(entity)?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let updated: i64 = redis::Script::new(UPDATE_IF_EXISTS)
            .key(self.rows_key())
            .arg(entity.id())
            .arg(json)
            .invoke_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn delete(&self, id: u64) -> Result<bool, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let removed: i64 = conn.hdel(self.rows_key(), id).await?;
        Ok(removed > 0)
    }

    async fn compare_and_swap(&self, entity: &E, expected_version: u64) -> Result<bool, StoreError> {
        let mut next = entity.clone();
        next.set_version(expected_version + 1);
        let json = serde_json::to_string(&next)?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let swapped: i64 = redis::Script::new(COMPARE_AND_SWAP)
            .key(self.rows_key())
            .arg(entity.id())
            .arg(expected_version)
            .arg(json)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }
}

/// Token rows plus one sorted set per merge key holding the ids of its live tokens.
pub struct RedisTokenStore {
    rows: RedisRepository<Token>,
    client: redis::Client,
    prefix: String,
}

impl RedisTokenStore {
    pub fn new(client: redis::Client, prefix: &str) -> Self {
        Self {
            rows: RedisRepository::new(client.clone(), prefix),
            client,
            prefix: prefix.to_string(),
        }
    }

    fn live_key(&self, process_instance_id: u64, ref_id: u64) -> String {
        format!(
            "{}:{}:live:{}:{}",
            self.prefix,
            Token::KIND,
            process_instance_id,
            ref_id
        )
    }
}

#[async_trait]
impl Repository<Token> for RedisTokenStore {
    async fn get(&self, id: u64) -> Result<Option<Token>, StoreError> {
        self.rows.get(id).await
    }

    async fn list(&self, options: &QueryOptions) -> Result<Vec<Token>, StoreError> {
        self.rows.list(options).await
    }

    async fn count(&self, filter: &Filter) -> Result<usize, StoreError> {
        self.rows.count(filter).await
    }

    async fn insert(&self, mut entity: Token) -> Result<Token, StoreError> {
        let id = self.rows.next_id().await?;
        entity.set_id(id);
        let json = serde_json::to_string(&entity)?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .hset(self.rows.rows_key(), id, json)
            .ignore()
            .zadd(
                self.live_key(entity.process_instance_id, entity.ref_id),
                id,
                id as f64,
            )
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(entity)
    }

    async fn update(&self, entity: &Token) -> Result<bool, StoreError> {
        match self.rows.get(entity.id).await? {
            Some(current)
                if current.process_instance_id != entity.process_instance_id
                    || current.ref_id != entity.ref_id =>
            {
                Err(StoreError::Backend(format!(
                    "token {} cannot move to another merge key",
                    entity.id
                )))
            }
            Some(_) => self.rows.update(entity).await,
            None => Ok(false),
        }
    }

    async fn delete(&self, id: u64) -> Result<bool, StoreError> {
        let Some(token) = self.rows.get(id).await? else {
            return Ok(false);
        };
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let removed: i64 = redis::Script::new(DELETE_TOKEN)
            .key(self.rows.rows_key())
            .key(self.live_key(token.process_instance_id, token.ref_id))
            .arg(id)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn compare_and_swap(&self, entity: &Token, expected_version: u64) -> Result<bool, StoreError> {
        self.rows.compare_and_swap(entity, expected_version).await
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn consume_token(
        &self,
        process_instance_id: u64,
        ref_id: u64,
    ) -> Result<Option<usize>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let remaining: i64 = redis::Script::new(CONSUME_TOKEN)
            .key(self.rows.rows_key())
            .key(self.live_key(process_instance_id, ref_id))
            .invoke_async(&mut conn)
            .await?;
        Ok((remaining >= 0).then_some(remaining as usize))
    }
}

pub struct RedisCoupleStore {
    client: redis::Client,
    prefix: String,
}

impl RedisCoupleStore {
    pub fn new(client: redis::Client, prefix: &str) -> Self {
        Self {
            client,
            prefix: prefix.to_string(),
        }
    }
}

#[async_trait]
impl CoupleStore for RedisCoupleStore {
    async fn consume_couple(
        &self,
        message_instance_id: u64,
        waiting_event_id: u64,
        keep_waiting_event: bool,
    ) -> Result<Option<(MessageInstance, WaitingEvent)>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let consumed: Option<(String, String)> = redis::Script::new(CONSUME_COUPLE)
            .key(rows_key::<MessageInstance>(&self.prefix))
            .key(rows_key::<WaitingEvent>(&self.prefix))
            .arg(message_instance_id)
            .arg(waiting_event_id)
            .arg(if keep_waiting_event { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;
        match consumed {
            Some((message, waiting)) => Ok(Some((
                serde_json::from_str(&message)?,
                serde_json::from_str(&waiting)?,
            ))),
            None => Ok(None),
        }
    }
}
