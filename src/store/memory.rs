use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::model::event::{MessageInstance, WaitingEvent};
use crate::model::token::Token;
use crate::store::{
    CoupleStore, Direction, Entity, Filter, QueryOptions, Repository, TokenStore,
};

/// Rows of one entity kind kept in a concurrent map. Clones share the same rows.
pub struct InMemoryRepository<E: Entity> {
    rows: Arc<DashMap<u64, E>>,
    next_id: Arc<AtomicU64>,
}

impl<E: Entity> Clone for InMemoryRepository<E> {
    fn clone(&self) -> Self {
        Self {
            rows: self.rows.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<E: Entity> Default for InMemoryRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> InMemoryRepository<E> {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn snapshot(&self) -> Vec<E> {
        self.rows.iter().map(|r| r.value().clone()).collect()
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for InMemoryRepository<E> {
    async fn get(&self, id: u64) -> Result<Option<E>, StoreError> {
        Ok(self.rows.get(&id).map(|r| r.value().clone()))
    }

    async fn list(&self, options: &QueryOptions) -> Result<Vec<E>, StoreError> {
        Ok(options.apply(self.snapshot()))
    }

    async fn count(&self, filter: &Filter) -> Result<usize, StoreError> {
        Ok(self
            .rows
            .iter()
            .filter(|r| filter.matches(r.value()))
            .count())
    }

    async fn insert(&self, mut entity: E) -> Result<E, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        entity.set_id(id);
        self.rows.insert(id, entity.clone());
        Ok(entity)
    }

    async fn update(&self, entity: &E) -> Result<bool, StoreError> {
        match self.rows.get_mut(&entity.id()) {
            Some(mut row) => {
                *row = entity.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: u64) -> Result<bool, StoreError> {
        Ok(self.rows.remove(&id).is_some())
    }

    async fn compare_and_swap(&self, entity: &E, expected_version: u64) -> Result<bool, StoreError> {
        // The shard write lock is held for the whole check-and-replace.
        match self.rows.get_mut(&entity.id()) {
            Some(mut row) if row.version() == expected_version => {
                let mut next = entity.clone();
                next.set_version(expected_version + 1);
                *row = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Token rows plus a consume lock serialising fan-in.
#[derive(Clone, Default)]
pub struct InMemoryTokenStore {
    tokens: InMemoryRepository<Token>,
    consume_lock: Arc<Mutex<()>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository<Token> for InMemoryTokenStore {
    async fn get(&self, id: u64) -> Result<Option<Token>, StoreError> {
        self.tokens.get(id).await
    }

    async fn list(&self, options: &QueryOptions) -> Result<Vec<Token>, StoreError> {
        self.tokens.list(options).await
    }

    async fn count(&self, filter: &Filter) -> Result<usize, StoreError> {
        self.tokens.count(filter).await
    }

    async fn insert(&self, entity: Token) -> Result<Token, StoreError> {
        self.tokens.insert(entity).await
    }

    async fn update(&self, entity: &Token) -> Result<bool, StoreError> {
        self.tokens.update(entity).await
    }

    async fn delete(&self, id: u64) -> Result<bool, StoreError> {
        self.tokens.delete(id).await
    }

    async fn compare_and_swap(&self, entity: &Token, expected_version: u64) -> Result<bool, StoreError> {
        self.tokens.compare_and_swap(entity, expected_version).await
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn consume_token(
        &self,
        process_instance_id: u64,
        ref_id: u64,
    ) -> Result<Option<usize>, StoreError> {
        let _guard = self.consume_lock.lock().await;
        let filter = Filter::new()
            .eq("process_instance_id", process_instance_id)
            .eq("ref_id", ref_id);
        let first = self
            .tokens
            .list(
                &QueryOptions::new(0, 1)
                    .filter(filter.clone())
                    .order_by("id", Direction::Asc),
            )
            .await?;
        let Some(token) = first.into_iter().next() else {
            return Ok(None);
        };
        if !self.tokens.delete(token.id).await? {
            return Ok(None);
        }
        Ok(Some(self.tokens.count(&filter).await?))
    }
}

/// Pairs the message and waiting-event rows so that a couple can be removed as one step.
pub struct InMemoryCoupleStore {
    messages: InMemoryRepository<MessageInstance>,
    waiting_events: InMemoryRepository<WaitingEvent>,
    lock: Mutex<()>,
}

impl InMemoryCoupleStore {
    pub fn new(
        messages: InMemoryRepository<MessageInstance>,
        waiting_events: InMemoryRepository<WaitingEvent>,
    ) -> Self {
        Self {
            messages,
            waiting_events,
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl CoupleStore for InMemoryCoupleStore {
    async fn consume_couple(
        &self,
        message_instance_id: u64,
        waiting_event_id: u64,
        keep_waiting_event: bool,
    ) -> Result<Option<(MessageInstance, WaitingEvent)>, StoreError> {
        let _guard = self.lock.lock().await;
        let waiting = if keep_waiting_event {
            match self.waiting_events.rows.get(&waiting_event_id) {
                Some(row) => row.value().clone(),
                None => return Ok(None),
            }
        } else {
            match self.waiting_events.rows.remove(&waiting_event_id) {
                Some((_, row)) => row,
                None => return Ok(None),
            }
        };
        match self.messages.rows.remove(&message_instance_id) {
            Some((_, message)) => Ok(Some((message, waiting))),
            None => {
                // The message went away under us: put the waiting side back untouched.
                if !keep_waiting_event {
                    self.waiting_events.rows.insert(waiting.id, waiting);
                }
                Ok(None)
            }
        }
    }
}
