use procflow::error::EngineError;
use procflow::model::event::{CatchEventType, MessageInstance, WaitingEvent};
use procflow::model::flow_node::{FlowNodeInstance, FlowNodeType};
use procflow::runtime::correlation::EventCorrelationEngine;
use procflow::runtime::notifier::ChangeNotifier;
use procflow::runtime::queue::{Job, JobKind, RedisTaskQueue, TaskQueue};
use procflow::runtime::token_ledger::TokenLedger;
use procflow::store::{Filter, QueryOptions, Repository, Stores};
use redis::Client;

// REDIS_URL overrides the local default.
fn get_redis_client() -> Client {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/6".to_string());
    redis::Client::open(url).expect("Invalid Redis URL")
}

async fn flushed_client() -> Client {
    let client = get_redis_client();
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .expect("Failed to connect to Redis");
    let _: () = redis::cmd("FLUSHDB")
        .query_async(&mut conn)
        .await
        .expect("Failed to flush db");
    client
}

#[tokio::test]
#[ignore] // Ignored by default, run explicitly if redis is available
async fn test_redis_concurrent_fan_in() {
    let client = flushed_client().await;
    let stores = Stores::redis(client, "pf-test", true);
    let ledger = TokenLedger::new(stores.tokens.clone(), ChangeNotifier::default(), 10);
    ledger.create_tokens(1, 5, None, 8).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move { ledger.consume(1, 5).await }));
    }
    let mut remaining = Vec::new();
    for handle in handles {
        remaining.push(handle.await.unwrap().unwrap());
    }
    remaining.sort_unstable();

    assert_eq!(remaining, (0..8).collect::<Vec<_>>());
    let err = ledger.consume(1, 5).await.unwrap_err();
    assert!(matches!(err, EngineError::BrokenMerge { found: 0, .. }));
}

#[tokio::test]
#[ignore]
async fn test_redis_couple_consumed_once() {
    let client = flushed_client().await;
    let stores = Stores::redis(client, "pf-test", true);
    let events = EventCorrelationEngine::new(
        stores.waiting_events.clone(),
        stores.message_instances.clone(),
        stores.couples.clone(),
        ChangeNotifier::default(),
        10,
    );
    events
        .create_waiting_event(
            WaitingEvent::message(CatchEventType::IntermediateCatchEvent, 1, "go", "order", None)
                .owned_by(10, 100),
        )
        .await
        .unwrap();
    events
        .create_message_instance(MessageInstance::new("go", "order", None))
        .await
        .unwrap();

    let couples = events.get_message_event_couples().await.unwrap();
    assert_eq!(couples.len(), 1);
    assert!(events.consume_couple(&couples[0]).await.unwrap().is_some());
    assert!(events.consume_couple(&couples[0]).await.unwrap().is_none());
    assert!(
        events
            .search_waiting_events(&QueryOptions::all())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
#[ignore]
async fn test_redis_repository_filters_and_versions() {
    let client = flushed_client().await;
    let stores = Stores::redis(client, "pf-test", true);
    let created = stores
        .flow_node_instances
        .insert(FlowNodeInstance::new("review", FlowNodeType::UserTask, 1, 100))
        .await
        .unwrap();
    stores
        .flow_node_instances
        .insert(FlowNodeInstance::new("split", FlowNodeType::Gateway, 1, 200))
        .await
        .unwrap();

    let mut claimed = created.clone();
    claimed.executing = true;
    assert!(
        stores
            .flow_node_instances
            .compare_and_swap(&claimed, created.version)
            .await
            .unwrap()
    );
    assert!(
        !stores
            .flow_node_instances
            .compare_and_swap(&claimed, created.version)
            .await
            .unwrap()
    );
    assert_eq!(
        stores
            .flow_node_instances
            .count(&Filter::new().eq("root_container_id", 100u64))
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
#[ignore]
async fn test_redis_job_queue_round_trip() {
    let client = flushed_client().await;
    let queue = RedisTaskQueue::new(client, "pf-test:jobs".to_string());
    let job = Job::new(JobKind::CleanupProcessInstance {
        process_instance_id: 3,
    });

    queue.push(job.clone()).await.unwrap();

    assert_eq!(queue.pop().await.unwrap(), Some(job));
    assert_eq!(queue.pop().await.unwrap(), None);
}
