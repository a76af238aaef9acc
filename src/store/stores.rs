use std::sync::Arc;

use crate::config::{ArchiveConfig, StorageConfig};
use crate::error::StoreError;
use crate::model::archive::{
    ArchivedComment, ArchivedConnectorInstance, ArchivedDataInstance, ArchivedDocumentMapping,
    ArchivedFlowNodeInstance, ArchivedProcessInstance, ArchivedTransition,
};
use crate::model::event::{MessageInstance, WaitingEvent};
use crate::model::flow_node::FlowNodeInstance;
use crate::model::process::{
    Comment, ConnectorInstance, DataContainer, DataInstance, DocumentMapping, ProcessInstance,
    TransitionRecord,
};
use crate::store::memory::{InMemoryCoupleStore, InMemoryRepository, InMemoryTokenStore};
use crate::store::redis_storage::{RedisCoupleStore, RedisRepository, RedisTokenStore};
use crate::store::{CoupleStore, Entity, Repository, TokenStore};

fn memory<E: Entity>() -> Arc<dyn Repository<E>> {
    Arc::new(InMemoryRepository::<E>::new())
}

fn remote<E: Entity>(client: &redis::Client, prefix: &str) -> Arc<dyn Repository<E>> {
    Arc::new(RedisRepository::<E>::new(client.clone(), prefix))
}

/// Historical repositories, one per archived kind.
#[derive(Clone)]
pub struct ArchiveStores {
    pub process_instances: Arc<dyn Repository<ArchivedProcessInstance>>,
    pub flow_node_instances: Arc<dyn Repository<ArchivedFlowNodeInstance>>,
    pub comments: Arc<dyn Repository<ArchivedComment>>,
    pub document_mappings: Arc<dyn Repository<ArchivedDocumentMapping>>,
    pub data_instances: Arc<dyn Repository<ArchivedDataInstance>>,
    pub connector_instances: Arc<dyn Repository<ArchivedConnectorInstance>>,
    pub transitions: Arc<dyn Repository<ArchivedTransition>>,
}

impl ArchiveStores {
    pub fn in_memory() -> Self {
        Self {
            process_instances: memory(),
            flow_node_instances: memory(),
            comments: memory(),
            document_mappings: memory(),
            data_instances: memory(),
            connector_instances: memory(),
            transitions: memory(),
        }
    }

    pub fn redis(client: &redis::Client, prefix: &str) -> Self {
        Self {
            process_instances: remote(client, prefix),
            flow_node_instances: remote(client, prefix),
            comments: remote(client, prefix),
            document_mappings: remote(client, prefix),
            data_instances: remote(client, prefix),
            connector_instances: remote(client, prefix),
            transitions: remote(client, prefix),
        }
    }
}

/// Every repository the core reads and writes.
///
/// All calls made through one `Stores` during a unit of work are expected to run inside the
/// caller's transaction; the core never opens or commits one.
#[derive(Clone)]
pub struct Stores {
    pub process_instances: Arc<dyn Repository<ProcessInstance>>,
    pub flow_node_instances: Arc<dyn Repository<FlowNodeInstance>>,
    pub tokens: Arc<dyn TokenStore>,
    pub waiting_events: Arc<dyn Repository<WaitingEvent>>,
    pub message_instances: Arc<dyn Repository<MessageInstance>>,
    pub couples: Arc<dyn CoupleStore>,
    pub comments: Arc<dyn Repository<Comment>>,
    pub document_mappings: Arc<dyn Repository<DocumentMapping>>,
    pub data_containers: Arc<dyn Repository<DataContainer>>,
    pub data_instances: Arc<dyn Repository<DataInstance>>,
    pub connector_instances: Arc<dyn Repository<ConnectorInstance>>,
    pub transitions: Arc<dyn Repository<TransitionRecord>>,
    /// `None` when archiving is not provisioned.
    pub archive: Option<ArchiveStores>,
}

impl Stores {
    pub fn in_memory(archive_enabled: bool) -> Self {
        let waiting_events = InMemoryRepository::<WaitingEvent>::new();
        let message_instances = InMemoryRepository::<MessageInstance>::new();
        Self {
            process_instances: memory(),
            flow_node_instances: memory(),
            tokens: Arc::new(InMemoryTokenStore::new()),
            couples: Arc::new(InMemoryCoupleStore::new(
                message_instances.clone(),
                waiting_events.clone(),
            )),
            waiting_events: Arc::new(waiting_events),
            message_instances: Arc::new(message_instances),
            comments: memory(),
            document_mappings: memory(),
            data_containers: memory(),
            data_instances: memory(),
            connector_instances: memory(),
            transitions: memory(),
            archive: archive_enabled.then(ArchiveStores::in_memory),
        }
    }

    pub fn redis(client: redis::Client, prefix: &str, archive_enabled: bool) -> Self {
        let client = &client;
        Self {
            process_instances: remote(client, prefix),
            flow_node_instances: remote(client, prefix),
            tokens: Arc::new(RedisTokenStore::new(client.clone(), prefix)),
            waiting_events: remote(client, prefix),
            message_instances: remote(client, prefix),
            couples: Arc::new(RedisCoupleStore::new(client.clone(), prefix)),
            comments: remote(client, prefix),
            document_mappings: remote(client, prefix),
            data_containers: remote(client, prefix),
            data_instances: remote(client, prefix),
            connector_instances: remote(client, prefix),
            transitions: remote(client, prefix),
            archive: archive_enabled.then(|| ArchiveStores::redis(client, prefix)),
        }
    }

    pub fn from_config(storage: &StorageConfig, archive: &ArchiveConfig) -> Result<Self, StoreError> {
        match storage {
            StorageConfig::Memory => Ok(Stores::in_memory(archive.enabled)),
            StorageConfig::Redis { url, key_prefix } => {
                let client = redis::Client::open(url.as_str())?;
                Ok(Stores::redis(client, key_prefix, archive.enabled))
            }
        }
    }

    /// The historical stores, or the distinguishable "definitive archive target not found"
    /// failure for `kind`.
    pub fn archive(&self, kind: &'static str) -> Result<&ArchiveStores, StoreError> {
        self.archive
            .as_ref()
            .ok_or(StoreError::ArchiveTargetNotFound { kind })
    }
}
