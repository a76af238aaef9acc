use anyhow::Result;
use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::model::Timestamp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    CorrelateMessages,
    /// `None` fires everything due when the job runs.
    FireDueTimers { now: Option<Timestamp> },
    ArchiveProcessInstance { process_instance_id: u64 },
    /// Finishes the live deletion of an archived process instance.
    CleanupProcessInstance { process_instance_id: u64 },
}

/// Unit of background work for the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
}

impl Job {
    pub fn new(kind: JobKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
        }
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn push(&self, job: Job) -> Result<()>;
    /// `None` when nothing arrived before the queue's poll timeout.
    async fn pop(&self) -> Result<Option<Job>>;
}

const POLL_TIMEOUT: Duration = Duration::from_millis(200);

pub struct InMemoryTaskQueue {
    sender: mpsc::Sender<Job>,
    receiver: Mutex<mpsc::Receiver<Job>>,
}

impl InMemoryTaskQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            sender: tx,
            receiver: Mutex::new(rx),
        }
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn push(&self, job: Job) -> Result<()> {
        self.sender
            .send(job)
            .await
            .map_err(|e| anyhow::anyhow!("Job channel closed: {}", e))
    }

    async fn pop(&self) -> Result<Option<Job>> {
        let mut rx = self.receiver.lock().await;
        match tokio::time::timeout(POLL_TIMEOUT, rx.recv()).await {
            Ok(job) => Ok(job),
            Err(_) => Ok(None),
        }
    }
}

pub struct RedisTaskQueue {
    client: redis::Client,
    queue_key: String,
}

impl RedisTaskQueue {
    pub fn new(client: redis::Client, queue_key: String) -> Self {
        Self { client, queue_key }
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn push(&self, job: Job) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(&job)?;
        let _: () = conn.lpush(&self.queue_key, serialized).await?;
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Job>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        // Short block so the worker loop stays responsive.
        let result: Option<(String, String)> = conn.brpop(&self.queue_key, 1.0).await?;
        match result {
            Some((_, job_json)) => Ok(Some(serde_json::from_str(&job_json)?)),
            None => Ok(None),
        }
    }
}
