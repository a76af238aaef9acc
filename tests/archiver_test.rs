use async_trait::async_trait;
use procflow::error::{EngineError, StoreError};
use procflow::model::archive::{Archived, ArchivedFlowNodeDetails, will_be_archived};
use procflow::model::flow_node::{FlowNodeInstance, FlowNodeState, FlowNodeType, TaskPriority};
use procflow::model::process::{
    Comment, ConnectorEvent, ConnectorInstance, ContainerType, DataContainer, DataInstance,
    DocumentMapping, ProcessInstance, TransitionRecord, TransitionState,
};
use procflow::runtime::archiver::ProcessArchiver;
use procflow::runtime::definitions::{
    FlowNodeDefinitionInfo, InMemoryDefinitions, ProcessDefinitionInfo,
};
use procflow::runtime::notifier::ChangeNotifier;
use procflow::store::{Filter, QueryOptions, Repository, Stores};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn definitions() -> InMemoryDefinitions {
    let definitions = InMemoryDefinitions::new();
    definitions.register(
        ProcessDefinitionInfo::new(1, "order", "1.0")
            .with_data()
            .with_connectors()
            .flow_node(FlowNodeDefinitionInfo {
                id: 10,
                name: "review".to_string(),
                has_data: true,
                has_connectors: false,
            }),
    );
    definitions.register(ProcessDefinitionInfo::new(2, "plain", "1.0"));
    definitions
}

fn archiver(stores: &Stores) -> ProcessArchiver {
    ProcessArchiver::new(
        stores.clone(),
        Arc::new(definitions()),
        ChangeNotifier::default(),
        2,
    )
}

/// A process instance with three comments, two documents, one process-level data instance,
/// one connector and two transitions.
async fn populated(stores: &Stores, process_definition_id: u64) -> ProcessInstance {
    let instance = stores
        .process_instances
        .insert(ProcessInstance::new("order", process_definition_id))
        .await
        .unwrap();
    let pid = instance.id;
    for i in 0..3 {
        stores
            .comments
            .insert(Comment::new(pid, Some(7), &format!("comment {}", i)))
            .await
            .unwrap();
    }
    for i in 0..2 {
        stores
            .document_mappings
            .insert(DocumentMapping::new(pid, 500 + i, &format!("doc{}", i)))
            .await
            .unwrap();
    }
    stores
        .data_containers
        .insert(DataContainer::new(pid, ContainerType::ProcessInstance))
        .await
        .unwrap();
    stores
        .data_instances
        .insert(DataInstance::new(
            "amount",
            pid,
            ContainerType::ProcessInstance,
            json!(42),
        ))
        .await
        .unwrap();
    stores
        .connector_instances
        .insert(ConnectorInstance::new(
            "notify",
            "email",
            pid,
            ContainerType::ProcessInstance,
            ConnectorEvent::OnFinish,
            0,
        ))
        .await
        .unwrap();
    for name in ["start->review", "review->end"] {
        stores
            .transitions
            .insert(TransitionRecord::new(name, pid, pid, 1, TransitionState::Taken))
            .await
            .unwrap();
    }
    instance
}

#[tokio::test]
async fn test_archive_copies_dependents_then_deletes_live() {
    let stores = Stores::in_memory(true);
    let archiver = archiver(&stores);
    let instance = populated(&stores, 1).await;
    let other = stores
        .comments
        .insert(Comment::new(instance.id + 1000, None, "unrelated"))
        .await
        .unwrap();

    let snapshot = archiver
        .archive_process_instance(instance.id, 1_000)
        .await
        .unwrap();

    assert_eq!(snapshot.source_object_id, instance.id);
    assert_eq!(snapshot.archive_date, 1_000);
    assert_eq!(snapshot.value.name, "order");

    let of_instance = Filter::new().eq("process_instance_id", instance.id);
    assert_eq!(archiver.count_archived_comments(&of_instance).await.unwrap(), 3);
    assert_eq!(
        archiver
            .search_archived_comments(&QueryOptions::all())
            .await
            .unwrap()
            .len(),
        3
    );
    let documents = archiver
        .search_archived_document_mappings(&QueryOptions::all())
        .await
        .unwrap();
    assert_eq!(documents.len(), 2);
    assert!(documents.iter().all(|d| d.archive_date == 1_000));
    assert_eq!(
        archiver
            .search_archived_transitions(&QueryOptions::all().filter(of_instance.clone()))
            .await
            .unwrap()
            .len(),
        2
    );
    let archive = stores.archive.as_ref().unwrap();
    assert_eq!(archive.data_instances.count(&Filter::new()).await.unwrap(), 1);
    assert_eq!(archive.connector_instances.count(&Filter::new()).await.unwrap(), 1);

    assert!(stores.process_instances.get(instance.id).await.unwrap().is_none());
    assert_eq!(stores.comments.count(&of_instance).await.unwrap(), 0);
    assert_eq!(stores.document_mappings.count(&of_instance).await.unwrap(), 0);
    assert_eq!(stores.transitions.count(&of_instance).await.unwrap(), 0);
    assert_eq!(stores.data_instances.count(&Filter::new()).await.unwrap(), 0);
    assert_eq!(stores.data_containers.count(&Filter::new()).await.unwrap(), 0);
    assert_eq!(stores.connector_instances.count(&Filter::new()).await.unwrap(), 0);
    assert_eq!(stores.comments.get(other.id).await.unwrap(), Some(other));

    assert_eq!(
        archiver
            .get_archived_process_instance(instance.id)
            .await
            .unwrap(),
        snapshot
    );
}

#[tokio::test]
async fn test_undeclared_data_and_connectors_are_not_archived() {
    let stores = Stores::in_memory(true);
    let archiver = archiver(&stores);
    let instance = populated(&stores, 2).await;

    archiver
        .archive_process_instance(instance.id, 1_000)
        .await
        .unwrap();

    let archive = stores.archive.as_ref().unwrap();
    assert_eq!(archive.data_instances.count(&Filter::new()).await.unwrap(), 0);
    assert_eq!(archive.connector_instances.count(&Filter::new()).await.unwrap(), 0);
    // Live rows are deleted either way.
    assert_eq!(stores.data_instances.count(&Filter::new()).await.unwrap(), 0);
    assert_eq!(stores.connector_instances.count(&Filter::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_archive_store_keeps_live_instance() {
    let stores = Stores::in_memory(false);
    let archiver = archiver(&stores);
    let instance = populated(&stores, 1).await;

    let err = archiver
        .archive_process_instance(instance.id, 1_000)
        .await
        .unwrap_err();
    match &err {
        EngineError::ArchiveTargetNotFound { context, .. } => {
            assert_eq!(context.process_instance_id, Some(instance.id));
            assert_eq!(context.process_definition_name.as_deref(), Some("order"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(stores.process_instances.get(instance.id).await.unwrap().is_some());
    assert_eq!(stores.comments.count(&Filter::new()).await.unwrap(), 3);

    let err = archiver
        .search_archived_comments(&QueryOptions::all())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ArchiveTargetNotFound { .. }));
}

#[tokio::test]
async fn test_unknown_instance_is_not_found() {
    let stores = Stores::in_memory(true);
    let archiver = archiver(&stores);
    let err = archiver.archive_process_instance(404, 1_000).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { id: 404, .. }));
}

#[tokio::test]
async fn test_existing_snapshot_only_finishes_live_deletion() {
    let stores = Stores::in_memory(true);
    let archiver = archiver(&stores);
    let instance = populated(&stores, 1).await;
    let archive = stores.archive.as_ref().unwrap();
    let earlier = archive
        .process_instances
        .insert(Archived::of(&instance, 500))
        .await
        .unwrap();

    let snapshot = archiver
        .archive_process_instance(instance.id, 1_000)
        .await
        .unwrap();

    assert_eq!(snapshot, earlier);
    assert_eq!(archive.process_instances.count(&Filter::new()).await.unwrap(), 1);
    assert!(stores.process_instances.get(instance.id).await.unwrap().is_none());
    assert_eq!(stores.comments.count(&Filter::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_live_process_instance_is_idempotent() {
    let stores = Stores::in_memory(true);
    let archiver = archiver(&stores);
    let instance = populated(&stores, 1).await;
    stores
        .flow_node_instances
        .insert(FlowNodeInstance::new("review", FlowNodeType::UserTask, 1, instance.id))
        .await
        .unwrap();

    assert!(archiver.delete_live_process_instance(instance.id).await.unwrap());
    assert!(!archiver.delete_live_process_instance(instance.id).await.unwrap());
    assert_eq!(stores.flow_node_instances.count(&Filter::new()).await.unwrap(), 0);
    assert_eq!(stores.transitions.count(&Filter::new()).await.unwrap(), 0);
}

#[test]
fn test_event_kinds_are_never_archived() {
    assert!(will_be_archived(FlowNodeType::UserTask));
    assert!(will_be_archived(FlowNodeType::Gateway));
    assert!(will_be_archived(FlowNodeType::MultiInstanceActivity));
    for kind in [
        FlowNodeType::StartEvent,
        FlowNodeType::EndEvent,
        FlowNodeType::BoundaryEvent,
        FlowNodeType::IntermediateCatchEvent,
        FlowNodeType::IntermediateThrowEvent,
    ] {
        assert!(!will_be_archived(kind), "{} must not be archived", kind);
    }
}

#[tokio::test]
async fn test_archive_user_task_with_local_data() {
    let stores = Stores::in_memory(true);
    let archiver = archiver(&stores);
    let mut task = FlowNodeInstance::new("review", FlowNodeType::UserTask, 1, 100).with_definition(10);
    task.priority = Some(TaskPriority::AboveNormal);
    task.state_id = FlowNodeState::COMPLETED.id;
    task.state_name = FlowNodeState::COMPLETED.name.to_string();
    task.terminal = true;
    let task = stores.flow_node_instances.insert(task).await.unwrap();
    stores
        .data_instances
        .insert(DataInstance::new(
            "approved",
            task.id,
            ContainerType::ActivityInstance,
            json!(true),
        ))
        .await
        .unwrap();
    stores
        .data_containers
        .insert(DataContainer::new(task.id, ContainerType::ActivityInstance))
        .await
        .unwrap();

    let snapshot = archiver
        .archive_flow_node_instance(&task, true, 2_000)
        .await
        .unwrap()
        .expect("user tasks are archived");

    assert_eq!(snapshot.source_object_id, task.id);
    assert_eq!(snapshot.state_name, "completed");
    assert_eq!(
        snapshot.details,
        ArchivedFlowNodeDetails::UserTask {
            priority: Some(TaskPriority::AboveNormal)
        }
    );
    let archive = stores.archive.as_ref().unwrap();
    assert_eq!(archive.data_instances.count(&Filter::new()).await.unwrap(), 1);
    assert_eq!(stores.data_instances.count(&Filter::new()).await.unwrap(), 0);
    assert_eq!(stores.data_containers.count(&Filter::new()).await.unwrap(), 0);
    assert!(stores.flow_node_instances.get(task.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_archive_event_deletes_without_snapshot() {
    let stores = Stores::in_memory(true);
    let archiver = archiver(&stores);
    let event = stores
        .flow_node_instances
        .insert(FlowNodeInstance::new("end", FlowNodeType::EndEvent, 1, 100))
        .await
        .unwrap();

    let snapshot = archiver
        .archive_flow_node_instance(&event, true, 2_000)
        .await
        .unwrap();

    assert!(snapshot.is_none());
    assert!(stores.flow_node_instances.get(event.id).await.unwrap().is_none());
    let archive = stores.archive.as_ref().unwrap();
    assert_eq!(archive.flow_node_instances.count(&Filter::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_archive_without_delete_keeps_live_row() {
    let stores = Stores::in_memory(true);
    let archiver = archiver(&stores);
    let gateway = stores
        .flow_node_instances
        .insert(FlowNodeInstance::new("split", FlowNodeType::Gateway, 1, 100))
        .await
        .unwrap();

    let snapshot = archiver
        .archive_flow_node_instance(&gateway, false, 2_000)
        .await
        .unwrap();

    assert!(snapshot.is_some());
    assert!(stores.flow_node_instances.get(gateway.id).await.unwrap().is_some());
}

/// Fails the first insert of a process snapshot, then behaves normally.
struct SnapshotFailsOnce {
    inner: Arc<dyn Repository<Archived<ProcessInstance>>>,
    failed: AtomicBool,
}

#[async_trait]
impl Repository<Archived<ProcessInstance>> for SnapshotFailsOnce {
    async fn get(&self, id: u64) -> Result<Option<Archived<ProcessInstance>>, StoreError> {
        self.inner.get(id).await
    }

    async fn list(&self, options: &QueryOptions) -> Result<Vec<Archived<ProcessInstance>>, StoreError> {
        self.inner.list(options).await
    }

    async fn count(&self, filter: &Filter) -> Result<usize, StoreError> {
        self.inner.count(filter).await
    }

    async fn insert(
        &self,
        entity: Archived<ProcessInstance>,
    ) -> Result<Archived<ProcessInstance>, StoreError> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Backend("connection reset".to_string()));
        }
        self.inner.insert(entity).await
    }

    async fn update(&self, entity: &Archived<ProcessInstance>) -> Result<bool, StoreError> {
        self.inner.update(entity).await
    }

    async fn delete(&self, id: u64) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }

    async fn compare_and_swap(
        &self,
        entity: &Archived<ProcessInstance>,
        expected_version: u64,
    ) -> Result<bool, StoreError> {
        self.inner.compare_and_swap(entity, expected_version).await
    }
}

#[tokio::test]
async fn test_retry_after_failed_snapshot_copies_dependents_once() {
    let mut stores = Stores::in_memory(true);
    let archive = stores.archive.as_mut().unwrap();
    archive.process_instances = Arc::new(SnapshotFailsOnce {
        inner: archive.process_instances.clone(),
        failed: AtomicBool::new(false),
    });
    let archiver = archiver(&stores);
    let instance = populated(&stores, 1).await;

    let err = archiver
        .archive_process_instance(instance.id, 1_000)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Creation { .. }));
    assert!(stores.process_instances.get(instance.id).await.unwrap().is_some());

    archiver
        .archive_process_instance(instance.id, 1_000)
        .await
        .unwrap();

    let of_instance = Filter::new().eq("process_instance_id", instance.id);
    assert_eq!(archiver.count_archived_comments(&of_instance).await.unwrap(), 3);
    let archive = stores.archive.as_ref().unwrap();
    assert_eq!(archive.document_mappings.count(&Filter::new()).await.unwrap(), 2);
    assert_eq!(archive.data_instances.count(&Filter::new()).await.unwrap(), 1);
    assert_eq!(archive.connector_instances.count(&Filter::new()).await.unwrap(), 1);
    assert_eq!(archive.transitions.count(&Filter::new()).await.unwrap(), 2);
    assert_eq!(archive.process_instances.count(&Filter::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_unknown_definition_keeps_live_instance() {
    let stores = Stores::in_memory(true);
    let archiver = archiver(&stores);
    let instance = populated(&stores, 99).await;

    let err = archiver
        .archive_process_instance(instance.id, 1_000)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::NotFound {
            kind: "process_definition",
            id: 99
        }
    ));
    assert!(stores.process_instances.get(instance.id).await.unwrap().is_some());
    assert_eq!(stores.data_instances.count(&Filter::new()).await.unwrap(), 1);
    assert_eq!(stores.connector_instances.count(&Filter::new()).await.unwrap(), 1);
    let archive = stores.archive.as_ref().unwrap();
    assert_eq!(archive.comments.count(&Filter::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_live_deletion_removes_flow_node_local_rows() {
    let stores = Stores::in_memory(true);
    let archiver = archiver(&stores);
    let instance = populated(&stores, 1).await;
    let task = stores
        .flow_node_instances
        .insert(FlowNodeInstance::new("review", FlowNodeType::UserTask, 1, instance.id).with_definition(10))
        .await
        .unwrap();
    stores
        .data_containers
        .insert(DataContainer::new(task.id, ContainerType::ActivityInstance))
        .await
        .unwrap();
    stores
        .data_instances
        .insert(DataInstance::new(
            "approved",
            task.id,
            ContainerType::ActivityInstance,
            json!(false),
        ))
        .await
        .unwrap();
    stores
        .connector_instances
        .insert(ConnectorInstance::new(
            "escalate",
            "email",
            task.id,
            ContainerType::ActivityInstance,
            ConnectorEvent::OnEnter,
            0,
        ))
        .await
        .unwrap();

    archiver
        .archive_process_instance(instance.id, 1_000)
        .await
        .unwrap();

    assert_eq!(stores.flow_node_instances.count(&Filter::new()).await.unwrap(), 0);
    assert_eq!(stores.data_instances.count(&Filter::new()).await.unwrap(), 0);
    assert_eq!(stores.data_containers.count(&Filter::new()).await.unwrap(), 0);
    assert_eq!(stores.connector_instances.count(&Filter::new()).await.unwrap(), 0);
}
