use std::sync::Arc;
use tracing::debug;

use crate::error::{EngineError, ErrorContext, Result};
use crate::model::flow_node::FlowNodeInstance;
use crate::model::process::{TransitionRecord, TransitionState};
use crate::runtime::notifier::{ChangeKind, ChangeNotifier};
use crate::store::{Entity, Filter, QueryOptions, Repository, delete_matching};

/// Historian of sequence-flow traversals.
#[derive(Clone)]
pub struct TransitionActivator {
    transitions: Arc<dyn Repository<TransitionRecord>>,
    notifier: ChangeNotifier,
    page_size: usize,
}

impl TransitionActivator {
    pub fn new(
        transitions: Arc<dyn Repository<TransitionRecord>>,
        notifier: ChangeNotifier,
        page_size: usize,
    ) -> Self {
        Self {
            transitions,
            notifier,
            page_size,
        }
    }

    pub async fn record(&self, record: TransitionRecord) -> Result<TransitionRecord> {
        let context = ErrorContext::default()
            .process_instance(record.process_instance_id)
            .root_process_instance(record.root_process_instance_id);
        let record = self
            .transitions
            .insert(record)
            .await
            .map_err(EngineError::creation(TransitionRecord::KIND, context))?;
        debug!(
            process_instance_id = record.process_instance_id,
            transition = %record.name,
            state = record.state.as_str(),
            "Transition recorded"
        );
        self.notifier.notify(ChangeKind::Created, &record);
        Ok(record)
    }

    pub async fn taken(&self, source: &FlowNodeInstance, name: &str) -> Result<TransitionRecord> {
        self.record(Self::leaving(source, name, TransitionState::Taken))
            .await
    }

    pub async fn aborted(&self, source: &FlowNodeInstance, name: &str) -> Result<TransitionRecord> {
        self.record(Self::leaving(source, name, TransitionState::Aborted))
            .await
    }

    fn leaving(source: &FlowNodeInstance, name: &str, state: TransitionState) -> TransitionRecord {
        TransitionRecord::new(
            name,
            source.root_container_id,
            source.root_container_id,
            source.flow_node_definition_id,
            state,
        )
        .leaving(source.id)
    }

    pub async fn search(&self, process_instance_id: u64, options: &QueryOptions) -> Result<Vec<TransitionRecord>> {
        let options = options
            .clone()
            .filter(Filter::new().eq("process_instance_id", process_instance_id));
        self.transitions
            .list(&options)
            .await
            .map_err(EngineError::search(TransitionRecord::KIND))
    }

    pub async fn count(&self, process_instance_id: u64) -> Result<usize> {
        self.transitions
            .count(&Filter::new().eq("process_instance_id", process_instance_id))
            .await
            .map_err(EngineError::search(TransitionRecord::KIND))
    }

    /// Removes the transition history of a process instance, re-querying from the start on each
    /// page.
    pub async fn delete_transitions(&self, process_instance_id: u64) -> Result<usize> {
        delete_matching(
            self.transitions.as_ref(),
            &Filter::new().eq("process_instance_id", process_instance_id),
            self.page_size,
        )
        .await
        .map_err(EngineError::deletion(
            TransitionRecord::KIND,
            ErrorContext::default().process_instance(process_instance_id),
        ))
    }
}
