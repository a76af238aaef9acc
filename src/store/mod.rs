//! Typed persistence interfaces and their backends.
//!
//! Every entity is stored through a [`Repository`]; live and archived rows share the same
//! filter/order/pagination contract so callers can switch stores transparently. The two atomic
//! primitives the core depends on for correctness under concurrency live on [`TokenStore`] and
//! [`CoupleStore`].

pub mod memory;
pub mod query;
pub mod redis_storage;
pub mod stores;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;
use crate::model::event::{MessageInstance, WaitingEvent};
use crate::model::token::Token;

pub use query::{Condition, Direction, FieldValue, Filter, OrderBy, QueryOptions};
pub use stores::{ArchiveStores, Stores};

/// A persisted row.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Stable name of the table / keyspace.
    const KIND: &'static str;

    fn id(&self) -> u64;
    fn set_id(&mut self, id: u64);

    /// Column accessor used by filters and ordering. Unknown columns return `None`.
    fn field(&self, name: &str) -> Option<FieldValue>;

    /// Optimistic-concurrency version. Entities without one always report 0.
    fn version(&self) -> u64 {
        0
    }

    fn set_version(&mut self, _version: u64) {}
}

#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    async fn get(&self, id: u64) -> Result<Option<E>, StoreError>;
    async fn list(&self, options: &QueryOptions) -> Result<Vec<E>, StoreError>;
    async fn count(&self, filter: &Filter) -> Result<usize, StoreError>;

    /// Inserts the row under a freshly assigned id and returns the stored copy.
    async fn insert(&self, entity: E) -> Result<E, StoreError>;

    /// Replaces an existing row. Returns false if the id is unknown.
    async fn update(&self, entity: &E) -> Result<bool, StoreError>;

    /// Returns false if the id is unknown.
    async fn delete(&self, id: u64) -> Result<bool, StoreError>;

    /// Replaces the row only if its stored version equals `expected_version`. The stored copy
    /// gets `expected_version + 1`. Returns false on a version mismatch or unknown id.
    async fn compare_and_swap(&self, entity: &E, expected_version: u64)
        -> Result<bool, StoreError>;
}

#[async_trait]
pub trait TokenStore: Repository<Token> {
    /// Atomically deletes one live token of `(process_instance_id, ref_id)` and returns how many
    /// remain. `None` means there was no live token to consume.
    async fn consume_token(
        &self,
        process_instance_id: u64,
        ref_id: u64,
    ) -> Result<Option<usize>, StoreError>;
}

/// Atomic consumption of a matched (thrown message, waiting event) pair.
#[async_trait]
pub trait CoupleStore: Send + Sync {
    /// Deletes the message instance and, unless `keep_waiting_event` is set, the waiting event,
    /// all or nothing. Returns the consumed rows, or `None` if either side was already gone.
    async fn consume_couple(
        &self,
        message_instance_id: u64,
        waiting_event_id: u64,
        keep_waiting_event: bool,
    ) -> Result<Option<(MessageInstance, WaitingEvent)>, StoreError>;
}

/// Deletes every row matching `filter`, one page at a time.
///
/// Each pass re-queries from offset 0 because deletions shrink the result set; the loop ends on
/// the first page shorter than `page_size`. Safe to re-run after a partial failure.
pub async fn delete_matching<E: Entity>(
    repository: &(impl Repository<E> + ?Sized),
    filter: &Filter,
    page_size: usize,
) -> Result<usize, StoreError> {
    let page_size = page_size.max(1);
    let mut deleted = 0;
    loop {
        let options = QueryOptions::new(0, page_size)
            .filter(filter.clone())
            .order_by("id", Direction::Asc);
        let page = repository.list(&options).await?;
        for row in &page {
            if repository.delete(row.id()).await? {
                deleted += 1;
            }
        }
        if page.len() < page_size {
            break;
        }
    }
    Ok(deleted)
}

/// Reads every row matching `filter` in `order`, one page at a time.
pub async fn list_all<E: Entity>(
    repository: &(impl Repository<E> + ?Sized),
    filter: &Filter,
    order: &[OrderBy],
    page_size: usize,
) -> Result<Vec<E>, StoreError> {
    let page_size = page_size.max(1);
    let mut rows = Vec::new();
    let mut offset = 0;
    loop {
        let mut options = QueryOptions::new(offset, page_size).filter(filter.clone());
        options.order = order.to_vec();
        let page = repository.list(&options).await?;
        let len = page.len();
        rows.extend(page);
        if len < page_size {
            break;
        }
        offset += page_size;
    }
    Ok(rows)
}
