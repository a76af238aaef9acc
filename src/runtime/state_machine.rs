//! Live state of flow-node instances.
//!
//! Every mutation goes through here. Writes stamp dates monotonically and are compare-and-swaps
//! on the row version. Field updates retry against the fresh row on a conflict; the `executing`
//! claim does not, so a second concurrent claim is observed as a no-op.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{EngineError, ErrorContext, Result, StoreError};
use crate::model::archive::ArchivedFlowNodeInstance;
use crate::model::flow_node::{
    FlowNodeInstance, FlowNodeState, FlowNodeType, StateCategory, TaskPriority,
};
use crate::model::stamp_after;
use crate::runtime::definitions::DefinitionLookup;
use crate::runtime::notifier::{ChangeKind, ChangeNotifier};
use crate::store::{
    ArchiveStores, Direction, Entity, Filter, OrderBy, QueryOptions, Repository, list_all,
};

const KIND: &str = FlowNodeInstance::KIND;
const ARCHIVED_KIND: &str = ArchivedFlowNodeInstance::KIND;
const MAX_MODIFY_ATTEMPTS: u32 = 8;

pub(crate) fn flow_node_context(instance: &FlowNodeInstance) -> ErrorContext {
    let mut context = ErrorContext::default()
        .process_instance(instance.root_container_id)
        .flow_node_instance(instance.id);
    context.process_definition_id = Some(instance.process_definition_id);
    context
}

#[derive(Clone)]
pub struct FlowNodeStateMachine {
    instances: Arc<dyn Repository<FlowNodeInstance>>,
    archive: Option<ArchiveStores>,
    definitions: Arc<dyn DefinitionLookup>,
    notifier: ChangeNotifier,
    page_size: usize,
}

impl FlowNodeStateMachine {
    pub fn new(
        instances: Arc<dyn Repository<FlowNodeInstance>>,
        archive: Option<ArchiveStores>,
        definitions: Arc<dyn DefinitionLookup>,
        notifier: ChangeNotifier,
        page_size: usize,
    ) -> Self {
        Self {
            instances,
            archive,
            definitions,
            notifier,
            page_size,
        }
    }

    pub async fn create(&self, instance: FlowNodeInstance) -> Result<FlowNodeInstance> {
        let context = flow_node_context(&instance);
        let created = self
            .instances
            .insert(instance)
            .await
            .map_err(EngineError::creation(KIND, context))?;
        debug!(
            flow_node_instance_id = created.id,
            flow_node_type = %created.flow_node_type,
            process_instance_id = created.root_container_id,
            "Flow node entered"
        );
        self.notifier.notify(ChangeKind::Created, &created);
        Ok(created)
    }

    pub async fn get(&self, id: u64) -> Result<FlowNodeInstance> {
        self.find(id)
            .await?
            .ok_or(EngineError::not_found(KIND, id))
    }

    /// Like [`get`](Self::get) but reports a missing row as `None`.
    pub async fn find(&self, id: u64) -> Result<Option<FlowNodeInstance>> {
        self.instances.get(id).await.map_err(EngineError::read(KIND))
    }

    pub async fn search(&self, options: &QueryOptions) -> Result<Vec<FlowNodeInstance>> {
        self.instances
            .list(options)
            .await
            .map_err(EngineError::search(KIND))
    }

    pub async fn count(&self, filter: &Filter) -> Result<usize> {
        self.instances
            .count(filter)
            .await
            .map_err(EngineError::search(KIND))
    }

    /// Instances whose process definition `user_id` supervises.
    pub async fn search_supervised_by(
        &self,
        user_id: u64,
        options: &QueryOptions,
    ) -> Result<Vec<FlowNodeInstance>> {
        match self.supervised_filter(user_id).await? {
            Some(filter) => self.search(&options.clone().filter(filter)).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn get_archived(&self, id: u64) -> Result<ArchivedFlowNodeInstance> {
        self.archive_stores()?
            .flow_node_instances
            .get(id)
            .await
            .map_err(EngineError::read(ARCHIVED_KIND))?
            .ok_or(EngineError::not_found(ARCHIVED_KIND, id))
    }

    pub async fn search_archived(&self, options: &QueryOptions) -> Result<Vec<ArchivedFlowNodeInstance>> {
        self.archive_stores()?
            .flow_node_instances
            .list(options)
            .await
            .map_err(EngineError::search(ARCHIVED_KIND))
    }

    pub async fn count_archived(&self, filter: &Filter) -> Result<usize> {
        self.archive_stores()?
            .flow_node_instances
            .count(filter)
            .await
            .map_err(EngineError::search(ARCHIVED_KIND))
    }

    pub async fn search_archived_supervised_by(
        &self,
        user_id: u64,
        options: &QueryOptions,
    ) -> Result<Vec<ArchivedFlowNodeInstance>> {
        match self.supervised_filter(user_id).await? {
            Some(filter) => self.search_archived(&options.clone().filter(filter)).await,
            None => Ok(Vec::new()),
        }
    }

    fn archive_stores(&self) -> Result<&ArchiveStores> {
        self.archive
            .as_ref()
            .ok_or(EngineError::ArchiveTargetNotFound {
                kind: ARCHIVED_KIND,
                context: Box::default(),
            })
    }

    async fn supervised_filter(&self, user_id: u64) -> Result<Option<Filter>> {
        let ids = self
            .definitions
            .supervised_definition_ids(user_id)
            .await
            .map_err(EngineError::read("process_definition"))?;
        if ids.is_empty() {
            return Ok(None);
        }
        Ok(Some(Filter::new().is_in("process_definition_id", ids)))
    }

    /// Direct children (instances whose container is `parent_id`), in id order. Boundary events
    /// are not children of the activity they are attached to.
    pub async fn get_children(&self, parent_id: u64) -> Result<Vec<FlowNodeInstance>> {
        self.list_where(Filter::new().eq("parent_container_id", parent_id))
            .await
    }

    pub async fn get_attached_boundaries(&self, activity_id: u64) -> Result<Vec<FlowNodeInstance>> {
        self.list_where(Filter::new().eq("attached_to", activity_id))
            .await
    }

    async fn list_where(&self, filter: Filter) -> Result<Vec<FlowNodeInstance>> {
        let order = [OrderBy {
            field: "id".to_string(),
            direction: Direction::Asc,
        }];
        list_all(self.instances.as_ref(), &filter, &order, self.page_size)
            .await
            .map_err(EngineError::search(KIND))
    }

    /// Reloads the row, applies `change` and writes it back with a compare-and-swap on the
    /// version it read. A concurrent write makes the swap fail; the row is then re-read and
    /// `change` re-runs against the fresh copy, so its checks always see the stored state.
    async fn modify<F>(&self, id: u64, change: F) -> Result<FlowNodeInstance>
    where
        F: Fn(&mut FlowNodeInstance) -> Result<()>,
    {
        for attempt in 1..=MAX_MODIFY_ATTEMPTS {
            let mut instance = self.get(id).await?;
            let expected_version = instance.version;
            change(&mut instance)?;
            instance.last_update_date = stamp_after(instance.last_update_date);
            let swapped = self
                .instances
                .compare_and_swap(&instance, expected_version)
                .await
                .map_err(EngineError::modification(KIND, flow_node_context(&instance)))?;
            if swapped {
                instance.version = expected_version + 1;
                self.notifier.notify(ChangeKind::Updated, &instance);
                return Ok(instance);
            }
            debug!(flow_node_instance_id = id, attempt, "Concurrent write, retrying");
        }
        let instance = self.get(id).await?;
        Err(EngineError::Modification {
            kind: KIND,
            context: Box::new(flow_node_context(&instance)),
            source: StoreError::Conflict { kind: KIND, id },
        })
    }

    /// Moves the instance to `state`.
    ///
    /// An instance in a non-normal category refuses every normal-flow state with
    /// `FlowInterrupted`; only the states of its own interruption remain reachable.
    pub async fn set_state(&self, instance: &FlowNodeInstance, state: FlowNodeState) -> Result<FlowNodeInstance> {
        let updated = self
            .modify(instance.id, |current| {
                if current.state_category != StateCategory::Normal
                    && state.category == StateCategory::Normal
                {
                    return Err(EngineError::FlowInterrupted {
                        flow_node_instance_id: current.id,
                        category: current.state_category.to_string(),
                        state: state.name,
                    });
                }
                current.previous_state_id = current.state_id;
                current.state_id = state.id;
                current.state_name = state.name.to_string();
                current.stable = state.stable;
                current.terminal = state.terminal;
                current.executing = false;
                current.reach_state_date = stamp_after(current.reach_state_date);
                Ok(())
            })
            .await?;
        debug!(
            flow_node_instance_id = updated.id,
            previous_state_id = updated.previous_state_id,
            state = state.name,
            "Flow node state changed"
        );
        Ok(updated)
    }

    /// Claims the instance for execution.
    ///
    /// Returns `Ok(false)` when the instance is already executing or another worker claimed it
    /// first; callers treat that as a no-op.
    pub async fn set_executing(&self, instance: &FlowNodeInstance) -> Result<bool> {
        let mut current = self.get(instance.id).await?;
        if current.executing {
            warn!(flow_node_instance_id = current.id, "Flow node already executing");
            return Ok(false);
        }
        let expected_version = current.version;
        current.executing = true;
        current.last_update_date = stamp_after(current.last_update_date);
        let claimed = self
            .instances
            .compare_and_swap(&current, expected_version)
            .await
            .map_err(EngineError::modification(KIND, flow_node_context(&current)))?;
        if claimed {
            current.version = expected_version + 1;
            debug!(flow_node_instance_id = current.id, "Flow node claimed for execution");
            self.notifier.notify(ChangeKind::Updated, &current);
        } else {
            warn!(flow_node_instance_id = current.id, "Lost execution claim race");
        }
        Ok(claimed)
    }

    /// Raises the state category of `id` and of every non-terminal descendant. A category is
    /// never lowered.
    ///
    /// Returns the instance itself followed by its affected descendants, parents before children.
    pub async fn set_state_category(&self, id: u64, category: StateCategory) -> Result<Vec<FlowNodeInstance>> {
        let mut affected = Vec::new();
        let mut pending = vec![id];
        let mut root = true;
        while let Some(next) = pending.pop() {
            let updated = self
                .modify(next, |current| {
                    if !root && current.terminal {
                        return Ok(());
                    }
                    current.state_category = current.state_category.max(category);
                    Ok(())
                })
                .await?;
            root = false;
            if updated.terminal && updated.id != id {
                continue;
            }
            for child in self.get_children(updated.id).await? {
                if !child.terminal {
                    pending.push(child.id);
                }
            }
            affected.push(updated);
        }
        debug!(
            flow_node_instance_id = id,
            category = %category,
            affected = affected.len(),
            "State category raised"
        );
        Ok(affected)
    }

    pub async fn set_executed_by(&self, id: u64, user_id: u64) -> Result<FlowNodeInstance> {
        self.modify(id, |current| {
            current.executed_by = Some(user_id);
            Ok(())
        })
        .await
    }

    pub async fn set_executed_by_substitute(&self, id: u64, user_id: u64) -> Result<FlowNodeInstance> {
        self.modify(id, |current| {
            current.executed_by_substitute = Some(user_id);
            Ok(())
        })
        .await
    }

    /// Only user tasks carry a priority.
    pub async fn set_priority(&self, id: u64, priority: TaskPriority) -> Result<FlowNodeInstance> {
        self.modify(id, |current| {
            if current.flow_node_type != FlowNodeType::UserTask {
                return Err(EngineError::InvalidOperation(format!(
                    "flow node instance {} is a {}, only user tasks have a priority",
                    current.id, current.flow_node_type
                )));
            }
            current.priority = Some(priority);
            Ok(())
        })
        .await
    }

    pub async fn set_token_count(&self, id: u64, token_count: u32) -> Result<FlowNodeInstance> {
        self.modify(id, |current| {
            current.token_count = token_count;
            Ok(())
        })
        .await
    }

    pub async fn increment_loop_counter(&self, id: u64) -> Result<FlowNodeInstance> {
        self.modify(id, |current| {
            current.loop_counter += 1;
            Ok(())
        })
        .await
    }

    pub async fn set_completed_instances(&self, id: u64, completed: u32) -> Result<FlowNodeInstance> {
        self.modify(id, |current| {
            current.number_of_completed_instances = completed;
            Ok(())
        })
        .await
    }

    /// Deletes the live row. Returns false if it was already gone.
    pub async fn delete(&self, instance: &FlowNodeInstance) -> Result<bool> {
        let removed = self
            .instances
            .delete(instance.id)
            .await
            .map_err(EngineError::deletion(KIND, flow_node_context(instance)))?;
        if removed {
            self.notifier.notify(ChangeKind::Deleted, instance);
        }
        Ok(removed)
    }
}
