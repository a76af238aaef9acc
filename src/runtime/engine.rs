use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorContext, Result};
use crate::model::archive::ArchivedProcessInstance;
use crate::model::event::{MessageInstance, WaitingEvent};
use crate::model::flow_node::{FlowNodeInstance, FlowNodeState, FlowNodeType, StateCategory};
use crate::model::process::{ContainerType, DataContainer, ProcessInstance, ProcessInstanceState};
use crate::model::{Timestamp, now_ms, stamp_after};
use crate::runtime::archiver::ProcessArchiver;
use crate::runtime::connectors::ConnectorLifecycle;
use crate::runtime::correlation::EventCorrelationEngine;
use crate::runtime::definitions::DefinitionLookup;
use crate::runtime::notifier::{ChangeKind, ChangeNotifier};
use crate::runtime::state_machine::FlowNodeStateMachine;
use crate::runtime::token_ledger::TokenLedger;
use crate::runtime::transitions::TransitionActivator;
use crate::store::{Entity, QueryOptions, Stores};

/// Wires the execution core together for the drivers that advance process instances.
///
/// Every method is expected to run inside the caller's unit of work.
pub struct Engine {
    pub stores: Stores,
    pub notifier: ChangeNotifier,
    pub state_machine: FlowNodeStateMachine,
    pub tokens: TokenLedger,
    pub events: EventCorrelationEngine,
    pub transitions: TransitionActivator,
    pub connectors: ConnectorLifecycle,
    pub archiver: ProcessArchiver,
    definitions: Arc<dyn DefinitionLookup>,
}

impl Engine {
    pub fn new(stores: Stores, definitions: Arc<dyn DefinitionLookup>, config: &EngineConfig) -> Self {
        let notifier = ChangeNotifier::new(config.notification_capacity);
        let page_size = config.page_size;
        Self {
            state_machine: FlowNodeStateMachine::new(
                stores.flow_node_instances.clone(),
                stores.archive.clone(),
                definitions.clone(),
                notifier.clone(),
                page_size,
            ),
            tokens: TokenLedger::new(stores.tokens.clone(), notifier.clone(), page_size),
            events: EventCorrelationEngine::new(
                stores.waiting_events.clone(),
                stores.message_instances.clone(),
                stores.couples.clone(),
                notifier.clone(),
                page_size,
            ),
            transitions: TransitionActivator::new(
                stores.transitions.clone(),
                notifier.clone(),
                page_size,
            ),
            connectors: ConnectorLifecycle::new(
                stores.connector_instances.clone(),
                notifier.clone(),
                page_size,
            ),
            archiver: ProcessArchiver::new(
                stores.clone(),
                definitions.clone(),
                notifier.clone(),
                page_size,
            ),
            stores,
            notifier,
            definitions,
        }
    }

    /// Creates a running instance of a deployed definition together with its data container.
    pub async fn start_process_instance(
        &self,
        process_definition_id: u64,
        started_by: Option<u64>,
    ) -> Result<ProcessInstance> {
        let definition = self
            .definitions
            .process_definition(process_definition_id)
            .await
            .map_err(EngineError::read("process_definition"))?
            .ok_or(EngineError::not_found("process_definition", process_definition_id))?;
        let context = ErrorContext::default().definition(definition.id, &definition.name, &definition.version);

        let mut instance = ProcessInstance::new(&definition.name, definition.id);
        instance.started_by = started_by;
        let instance = self
            .stores
            .process_instances
            .insert(instance)
            .await
            .map_err(EngineError::creation(ProcessInstance::KIND, context.clone()))?;
        self.stores
            .data_containers
            .insert(DataContainer::new(instance.id, ContainerType::ProcessInstance))
            .await
            .map_err(EngineError::creation(
                DataContainer::KIND,
                context.process_instance(instance.id),
            ))?;
        info!(
            process_instance_id = instance.id,
            process_definition_id,
            "Process instance started"
        );
        self.notifier.notify(ChangeKind::Created, &instance);
        Ok(instance)
    }

    pub async fn get_process_instance(&self, id: u64) -> Result<ProcessInstance> {
        self.stores
            .process_instances
            .get(id)
            .await
            .map_err(EngineError::read(ProcessInstance::KIND))?
            .ok_or(EngineError::not_found(ProcessInstance::KIND, id))
    }

    pub async fn search_process_instances(&self, options: &QueryOptions) -> Result<Vec<ProcessInstance>> {
        self.stores
            .process_instances
            .list(options)
            .await
            .map_err(EngineError::search(ProcessInstance::KIND))
    }

    pub async fn set_process_state(&self, id: u64, state: ProcessInstanceState) -> Result<ProcessInstance> {
        let mut instance = self.get_process_instance(id).await?;
        instance.state = state;
        instance.last_update = stamp_after(instance.last_update);
        if state.is_terminal() {
            instance.end_date = Some(instance.last_update);
        }
        let context = ErrorContext::default()
            .process_instance(id)
            .root_process_instance(instance.root_process_instance_id);
        let updated = self
            .stores
            .process_instances
            .update(&instance)
            .await
            .map_err(EngineError::modification(ProcessInstance::KIND, context))?;
        if !updated {
            return Err(EngineError::not_found(ProcessInstance::KIND, id));
        }
        self.notifier.notify(ChangeKind::Updated, &instance);
        Ok(instance)
    }

    /// Inserts a freshly entered flow node and makes it ready.
    pub async fn enter_flow_node(&self, instance: FlowNodeInstance) -> Result<FlowNodeInstance> {
        let created = self.state_machine.create(instance).await?;
        self.state_machine
            .set_state(&created, FlowNodeState::READY)
            .await
    }

    /// Claims a flow node for execution. `None` when it is terminal, interrupted or already
    /// claimed; the caller then does nothing.
    pub async fn execute_flow_node(&self, id: u64) -> Result<Option<FlowNodeInstance>> {
        let instance = self.state_machine.get(id).await?;
        if instance.terminal || instance.state_category != StateCategory::Normal {
            debug!(flow_node_instance_id = id, "Flow node not executable");
            return Ok(None);
        }
        if !self.state_machine.set_executing(&instance).await? {
            return Ok(None);
        }
        Ok(Some(self.state_machine.get(id).await?))
    }

    /// Completes a flow node: attached boundaries are aborted, its waiting events removed, and
    /// the node archived and deleted.
    pub async fn complete_flow_node(&self, id: u64) -> Result<FlowNodeInstance> {
        let instance = self.state_machine.get(id).await?;
        let completed = self
            .state_machine
            .set_state(&instance, FlowNodeState::COMPLETED)
            .await?;
        self.abort_attached_boundaries(id, None).await?;
        self.events.delete_waiting_events(id).await?;
        self.archiver
            .archive_flow_node_instance(&completed, true, now_ms())
            .await?;
        Ok(completed)
    }

    /// Interrupts a flow node and everything below it with `category`, driving each to the
    /// terminal state of that category.
    pub async fn interrupt_flow_node(&self, id: u64, category: StateCategory) -> Result<Vec<FlowNodeInstance>> {
        self.interrupt(id, category, None).await
    }

    async fn interrupt(
        &self,
        id: u64,
        category: StateCategory,
        spared: Option<u64>,
    ) -> Result<Vec<FlowNodeInstance>> {
        let terminal_state = match category {
            StateCategory::Aborting => FlowNodeState::ABORTED,
            StateCategory::Cancelling => FlowNodeState::CANCELLED,
            StateCategory::Normal => {
                return Err(EngineError::InvalidOperation(
                    "a flow node cannot be interrupted with the normal category".to_string(),
                ));
            }
        };
        let affected = self.state_machine.set_state_category(id, category).await?;
        let mut finished = Vec::with_capacity(affected.len());
        // Children first, so that containers end after their content.
        for node in affected.iter().rev() {
            self.abort_attached_boundaries(node.id, spared).await?;
            let Some(current) = self.state_machine.find(node.id).await? else {
                continue;
            };
            if current.terminal {
                continue;
            }
            self.events.delete_waiting_events(current.id).await?;
            let ended = self.state_machine.set_state(&current, terminal_state).await?;
            self.archiver
                .archive_flow_node_instance(&ended, true, now_ms())
                .await?;
            finished.push(ended);
        }
        info!(
            flow_node_instance_id = id,
            category = %category,
            finished = finished.len(),
            "Flow node interrupted"
        );
        Ok(finished)
    }

    async fn abort_attached_boundaries(&self, activity_id: u64, spared: Option<u64>) -> Result<()> {
        for boundary in self.state_machine.get_attached_boundaries(activity_id).await? {
            if boundary.terminal || Some(boundary.id) == spared {
                continue;
            }
            self.state_machine
                .set_state_category(boundary.id, StateCategory::Aborting)
                .await?;
            self.events.delete_waiting_events(boundary.id).await?;
            let aborted = self
                .state_machine
                .set_state(&boundary, FlowNodeState::ABORTED)
                .await?;
            self.archiver
                .archive_flow_node_instance(&aborted, true, now_ms())
                .await?;
            debug!(
                boundary_id = boundary.id,
                activity_id, "Attached boundary aborted"
            );
        }
        Ok(())
    }

    /// Fan-in of one branch. Returns true when it was the last outstanding branch of the merge
    /// key, i.e. the merge fires.
    pub async fn branch_completed(&self, process_instance_id: u64, ref_id: u64) -> Result<bool> {
        let remaining = self.tokens.consume(process_instance_id, ref_id).await?;
        let merged = remaining == 0;
        if merged {
            info!(process_instance_id, ref_id, "All branches arrived, merge fires");
        }
        Ok(merged)
    }

    /// Delivers every deliverable message and wakes the catching flow nodes.
    pub async fn correlate_messages(&self) -> Result<Vec<(MessageInstance, WaitingEvent)>> {
        let delivered = self.events.correlate_messages().await?;
        for (_, waiting) in &delivered {
            self.wake_catching_node(waiting).await?;
        }
        Ok(delivered)
    }

    /// Fires every timer due at or before `now`.
    pub async fn fire_due_timers(&self, now: Timestamp) -> Result<Vec<WaitingEvent>> {
        let due = self
            .events
            .get_due_timers(now, &QueryOptions::all())
            .await?;
        let mut fired = Vec::with_capacity(due.len());
        for timer in due {
            let Some(timer) = self.events.trigger_timer(timer.id).await? else {
                continue;
            };
            if self.wake_catching_node(&timer).await? {
                fired.push(timer);
            }
        }
        Ok(fired)
    }

    /// Makes the flow node owning a triggered event ready. An interrupting boundary first aborts
    /// the activity it is attached to. Returns false if the owner can no longer proceed.
    async fn wake_catching_node(&self, event: &WaitingEvent) -> Result<bool> {
        let Some(owner_id) = event.flow_node_instance_id else {
            return Ok(true);
        };
        let Some(owner) = self.state_machine.find(owner_id).await? else {
            warn!(flow_node_instance_id = owner_id, "Triggered event has no live owner");
            return Ok(false);
        };
        if owner.terminal || owner.state_category != StateCategory::Normal {
            warn!(flow_node_instance_id = owner_id, "Triggered event owner is interrupted");
            return Ok(false);
        }
        if owner.flow_node_type == FlowNodeType::BoundaryEvent
            && owner.interrupting
            && let Some(activity_id) = owner.attached_to
        {
            self.interrupt(activity_id, StateCategory::Aborting, Some(owner.id))
                .await?;
        }
        self.state_machine
            .set_state(&owner, FlowNodeState::READY)
            .await?;
        Ok(true)
    }

    /// Marks the process instance completed and archives it.
    pub async fn complete_process_instance(&self, id: u64) -> Result<ArchivedProcessInstance> {
        self.set_process_state(id, ProcessInstanceState::Completed)
            .await?;
        self.archiver.archive_process_instance(id, now_ms()).await
    }

    /// Retry of the final archival step; deleting an already deleted instance is a no-op.
    pub async fn delete_live_process_instance(&self, id: u64) -> Result<bool> {
        self.archiver.delete_live_process_instance(id).await
    }
}
