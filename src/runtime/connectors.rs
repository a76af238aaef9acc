use std::sync::Arc;
use tracing::debug;

use crate::error::{EngineError, ErrorContext, Result};
use crate::model::process::{ConnectorEvent, ConnectorInstance, ConnectorState, ContainerType};
use crate::runtime::notifier::{ChangeKind, ChangeNotifier};
use crate::store::{Direction, Entity, Filter, QueryOptions, Repository, delete_matching};

const KIND: &str = ConnectorInstance::KIND;

fn container(container_id: u64, container_type: ContainerType) -> Filter {
    Filter::new()
        .eq("container_id", container_id)
        .eq("container_type", container_type.as_str())
}

fn connector_context(container_id: u64, container_type: ContainerType) -> ErrorContext {
    match container_type {
        ContainerType::ProcessInstance => ErrorContext::default().process_instance(container_id),
        ContainerType::ActivityInstance => ErrorContext::default().flow_node_instance(container_id),
    }
}

/// Lifecycle and ordering of connector instances. How a connector runs is not tracked here.
#[derive(Clone)]
pub struct ConnectorLifecycle {
    connectors: Arc<dyn Repository<ConnectorInstance>>,
    notifier: ChangeNotifier,
    page_size: usize,
}

impl ConnectorLifecycle {
    pub fn new(
        connectors: Arc<dyn Repository<ConnectorInstance>>,
        notifier: ChangeNotifier,
        page_size: usize,
    ) -> Self {
        Self {
            connectors,
            notifier,
            page_size,
        }
    }

    pub async fn create(&self, connector: ConnectorInstance) -> Result<ConnectorInstance> {
        let context = connector_context(connector.container_id, connector.container_type);
        let connector = self
            .connectors
            .insert(connector)
            .await
            .map_err(EngineError::creation(KIND, context))?;
        self.notifier.notify(ChangeKind::Created, &connector);
        Ok(connector)
    }

    pub async fn get(&self, id: u64) -> Result<ConnectorInstance> {
        self.connectors
            .get(id)
            .await
            .map_err(EngineError::read(KIND))?
            .ok_or(EngineError::not_found(KIND, id))
    }

    pub async fn search(
        &self,
        container_id: u64,
        container_type: ContainerType,
        options: &QueryOptions,
    ) -> Result<Vec<ConnectorInstance>> {
        let options = options
            .clone()
            .filter(container(container_id, container_type));
        self.connectors
            .list(&options)
            .await
            .map_err(EngineError::search(KIND))
    }

    /// The pending connector with the lowest execution order for `event`, if any.
    pub async fn next_to_execute(
        &self,
        container_id: u64,
        container_type: ContainerType,
        event: ConnectorEvent,
    ) -> Result<Option<ConnectorInstance>> {
        let options = QueryOptions::new(0, 1)
            .filter(
                container(container_id, container_type)
                    .eq("activation_event", event.as_str())
                    .eq("state", ConnectorState::ToBeExecuted.as_str()),
            )
            .order_by("execution_order", Direction::Asc);
        Ok(self
            .connectors
            .list(&options)
            .await
            .map_err(EngineError::search(KIND))?
            .into_iter()
            .next())
    }

    pub async fn set_state(&self, id: u64, state: ConnectorState) -> Result<ConnectorInstance> {
        let mut connector = self.get(id).await?;
        connector.state = state;
        let context = connector_context(connector.container_id, connector.container_type);
        let updated = self
            .connectors
            .update(&connector)
            .await
            .map_err(EngineError::modification(KIND, context))?;
        if !updated {
            return Err(EngineError::not_found(KIND, id));
        }
        debug!(connector_instance_id = id, state = state.as_str(), "Connector state changed");
        self.notifier.notify(ChangeKind::Updated, &connector);
        Ok(connector)
    }

    pub async fn delete_connectors(&self, container_id: u64, container_type: ContainerType) -> Result<usize> {
        delete_matching(
            self.connectors.as_ref(),
            &container(container_id, container_type),
            self.page_size,
        )
        .await
        .map_err(EngineError::deletion(
            KIND,
            connector_context(container_id, container_type),
        ))
    }
}
