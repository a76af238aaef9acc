use procflow::error::EngineError;
use procflow::model::process::{ConnectorEvent, ConnectorInstance, ConnectorState, ContainerType};
use procflow::runtime::connectors::ConnectorLifecycle;
use procflow::runtime::notifier::ChangeNotifier;
use procflow::store::{QueryOptions, Stores};

fn lifecycle() -> ConnectorLifecycle {
    let stores = Stores::in_memory(true);
    ConnectorLifecycle::new(stores.connector_instances.clone(), ChangeNotifier::default(), 2)
}

fn on_enter(container_id: u64, order: u32) -> ConnectorInstance {
    ConnectorInstance::new(
        &format!("connector-{}", order),
        "email",
        container_id,
        ContainerType::ActivityInstance,
        ConnectorEvent::OnEnter,
        order,
    )
}

#[tokio::test]
async fn test_connectors_run_in_execution_order() {
    let lifecycle = lifecycle();
    let second = lifecycle.create(on_enter(10, 2)).await.unwrap();
    let first = lifecycle.create(on_enter(10, 1)).await.unwrap();
    lifecycle
        .create(ConnectorInstance::new(
            "finish",
            "email",
            10,
            ContainerType::ActivityInstance,
            ConnectorEvent::OnFinish,
            0,
        ))
        .await
        .unwrap();

    let next = lifecycle
        .next_to_execute(10, ContainerType::ActivityInstance, ConnectorEvent::OnEnter)
        .await
        .unwrap();
    assert_eq!(next.map(|c| c.id), Some(first.id));

    lifecycle.set_state(first.id, ConnectorState::Done).await.unwrap();
    let next = lifecycle
        .next_to_execute(10, ContainerType::ActivityInstance, ConnectorEvent::OnEnter)
        .await
        .unwrap();
    assert_eq!(next.map(|c| c.id), Some(second.id));

    lifecycle.set_state(second.id, ConnectorState::Failed).await.unwrap();
    assert!(
        lifecycle
            .next_to_execute(10, ContainerType::ActivityInstance, ConnectorEvent::OnEnter)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_containers_are_kept_apart() {
    let lifecycle = lifecycle();
    lifecycle.create(on_enter(10, 1)).await.unwrap();
    lifecycle.create(on_enter(11, 1)).await.unwrap();
    lifecycle
        .create(ConnectorInstance::new(
            "process-level",
            "email",
            10,
            ContainerType::ProcessInstance,
            ConnectorEvent::OnEnter,
            1,
        ))
        .await
        .unwrap();

    let found = lifecycle
        .search(10, ContainerType::ActivityInstance, &QueryOptions::all())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    assert_eq!(
        lifecycle
            .delete_connectors(10, ContainerType::ActivityInstance)
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        lifecycle
            .search(10, ContainerType::ProcessInstance, &QueryOptions::all())
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_set_state_of_missing_connector() {
    let lifecycle = lifecycle();
    let err = lifecycle
        .set_state(77, ConnectorState::Skipped)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { id: 77, .. }));
}
