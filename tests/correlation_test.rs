use procflow::error::EngineError;
use procflow::model::event::{CatchEventType, MessageInstance, WaitingEvent, WaitingEventKind};
use procflow::runtime::correlation::EventCorrelationEngine;
use procflow::runtime::notifier::ChangeNotifier;
use procflow::store::{QueryOptions, Stores};

fn events() -> EventCorrelationEngine {
    let stores = Stores::in_memory(true);
    EventCorrelationEngine::new(
        stores.waiting_events.clone(),
        stores.message_instances.clone(),
        stores.couples.clone(),
        ChangeNotifier::default(),
        2,
    )
}

fn waiting_message(flow_node_instance_id: u64) -> WaitingEvent {
    WaitingEvent::message(
        CatchEventType::IntermediateCatchEvent,
        1,
        "payment-received",
        "order",
        Some("wait-payment"),
    )
    .owned_by(flow_node_instance_id, 100)
}

#[tokio::test]
async fn test_message_delivered_at_most_once() {
    let events = events();
    let first = events.create_waiting_event(waiting_message(10)).await.unwrap();
    let second = events.create_waiting_event(waiting_message(11)).await.unwrap();
    let message = events
        .create_message_instance(MessageInstance::new(
            "payment-received",
            "order",
            Some("wait-payment"),
        ))
        .await
        .unwrap();

    let delivered = events.correlate_messages().await.unwrap();

    assert_eq!(delivered.len(), 1);
    let (consumed_message, consumed_waiting) = &delivered[0];
    assert_eq!(consumed_message.id, message.id);
    // Lowest id wins the tie.
    assert_eq!(consumed_waiting.id, first.id);

    assert!(matches!(
        events.get_message_instance(message.id).await.unwrap_err(),
        EngineError::NotFound { .. }
    ));
    assert!(matches!(
        events.get_waiting_event(first.id).await.unwrap_err(),
        EngineError::NotFound { .. }
    ));
    assert_eq!(events.get_waiting_event(second.id).await.unwrap(), second);

    assert!(events.correlate_messages().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_two_messages_go_to_two_waiting_events() {
    let events = events();
    let first = events.create_waiting_event(waiting_message(10)).await.unwrap();
    let second = events.create_waiting_event(waiting_message(11)).await.unwrap();
    for _ in 0..2 {
        events
            .create_message_instance(MessageInstance::new("payment-received", "order", None))
            .await
            .unwrap();
    }

    let couples = events.get_message_event_couples().await.unwrap();
    let targets: Vec<u64> = couples.iter().map(|c| c.waiting_event_id).collect();
    assert_eq!(targets, vec![first.id, second.id]);

    assert_eq!(events.correlate_messages().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_consumed_couple_cannot_be_consumed_again() {
    let events = events();
    events.create_waiting_event(waiting_message(10)).await.unwrap();
    events
        .create_message_instance(MessageInstance::new("payment-received", "order", None))
        .await
        .unwrap();

    let couples = events.get_message_event_couples().await.unwrap();
    assert_eq!(couples.len(), 1);
    assert!(events.consume_couple(&couples[0]).await.unwrap().is_some());
    assert!(events.consume_couple(&couples[0]).await.unwrap().is_none());
}

#[tokio::test]
async fn test_correlation_values_must_be_equal() {
    let events = events();
    events
        .create_waiting_event(waiting_message(10).correlate("orderId", "A-1"))
        .await
        .unwrap();
    events
        .create_message_instance(
            MessageInstance::new("payment-received", "order", None).correlate("orderId", "B-2"),
        )
        .await
        .unwrap();
    assert!(events.get_message_event_couples().await.unwrap().is_empty());

    events
        .create_message_instance(
            MessageInstance::new("payment-received", "order", None).correlate("orderId", "A-1"),
        )
        .await
        .unwrap();
    assert_eq!(events.correlate_messages().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_too_many_correlations_rejected() {
    let events = events();
    let mut message = MessageInstance::new("payment-received", "order", None);
    for i in 0..6 {
        message = message.correlate(&format!("key{}", i), "v");
    }
    let err = events.create_message_instance(message).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidOperation(_)));
}

#[tokio::test]
async fn test_start_subscription_survives_match() {
    let events = events();
    let subscription = events
        .create_waiting_event(WaitingEvent::message(
            CatchEventType::StartEvent,
            1,
            "new-order",
            "order",
            None,
        ))
        .await
        .unwrap();
    for _ in 0..2 {
        events
            .create_message_instance(MessageInstance::new("new-order", "order", None))
            .await
            .unwrap();
    }

    let delivered = events.correlate_messages().await.unwrap();

    assert_eq!(delivered.len(), 2);
    assert!(delivered.iter().all(|(_, w)| w.id == subscription.id));
    assert!(events.get_waiting_event(subscription.id).await.is_ok());
    assert!(
        events
            .search_message_instances(&QueryOptions::all())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_boundary_error_exact_code_wins_over_catch_all() {
    let events = events();
    let catch_all = events
        .create_waiting_event(WaitingEvent::boundary_error(1, 50, None).owned_by(60, 100))
        .await
        .unwrap();
    let exact = events
        .create_waiting_event(WaitingEvent::boundary_error(1, 50, Some("E42")).owned_by(61, 100))
        .await
        .unwrap();

    let found = events.find_boundary_error(50, Some("E42")).await.unwrap();
    assert_eq!(found.map(|w| w.id), Some(exact.id));

    let found = events.find_boundary_error(50, Some("E99")).await.unwrap();
    assert_eq!(found.map(|w| w.id), Some(catch_all.id));

    assert!(events.find_boundary_error(51, Some("E42")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_two_catch_all_boundaries_are_ambiguous() {
    let events = events();
    for owner in [60, 61] {
        events
            .create_waiting_event(WaitingEvent::boundary_error(1, 50, None).owned_by(owner, 100))
            .await
            .unwrap();
    }

    let err = events.find_boundary_error(50, None).await.unwrap_err();
    assert!(matches!(err, EngineError::AmbiguousConfiguration(_)));

    let err = events.find_boundary_error(50, Some("E1")).await.unwrap_err();
    assert!(matches!(err, EngineError::AmbiguousConfiguration(_)));
}

#[tokio::test]
async fn test_signal_triggers_every_waiting_catch() {
    let events = events();
    for owner in [10, 11] {
        events
            .create_waiting_event(
                WaitingEvent::signal(CatchEventType::IntermediateCatchEvent, 1, "shutdown")
                    .owned_by(owner, 100),
            )
            .await
            .unwrap();
    }
    events
        .create_waiting_event(
            WaitingEvent::signal(CatchEventType::IntermediateCatchEvent, 1, "other").owned_by(12, 100),
        )
        .await
        .unwrap();

    let triggered = events.throw_signal("shutdown").await.unwrap();
    assert_eq!(triggered.len(), 2);
    assert!(events.throw_signal("shutdown").await.unwrap().is_empty());
    assert_eq!(events.throw_signal("other").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_due_timers_and_single_trigger() {
    let events = events();
    let late = events
        .create_waiting_event(
            WaitingEvent::timer(CatchEventType::IntermediateCatchEvent, 1, 2_000).owned_by(10, 100),
        )
        .await
        .unwrap();
    let early = events
        .create_waiting_event(
            WaitingEvent::timer(CatchEventType::IntermediateCatchEvent, 1, 1_000).owned_by(11, 100),
        )
        .await
        .unwrap();
    events
        .create_waiting_event(
            WaitingEvent::timer(CatchEventType::IntermediateCatchEvent, 1, 9_000).owned_by(12, 100),
        )
        .await
        .unwrap();

    let due = events
        .get_due_timers(2_000, &QueryOptions::all())
        .await
        .unwrap();
    assert_eq!(due.iter().map(|w| w.id).collect::<Vec<_>>(), vec![early.id, late.id]);

    let fired = events.trigger_timer(early.id).await.unwrap().unwrap();
    assert!(matches!(fired.kind, WaitingEventKind::Timer { due_date: 1_000 }));
    assert!(events.trigger_timer(early.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_in_progress_views_and_reset() {
    let events = events();
    let waiting = events.create_waiting_event(waiting_message(10)).await.unwrap();
    let message = events
        .create_message_instance(MessageInstance::new("payment-received", "order", None))
        .await
        .unwrap();
    events.set_waiting_event_in_progress(waiting.id, true).await.unwrap();
    events.set_message_in_progress(message.id, true).await.unwrap();

    // Rows being handled are not matched again.
    assert!(events.get_message_event_couples().await.unwrap().is_empty());
    assert_eq!(
        events
            .get_in_progress_message_instances(&QueryOptions::all())
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        events
            .get_in_progress_waiting_message_events(&QueryOptions::all())
            .await
            .unwrap()
            .len(),
        1
    );

    assert_eq!(events.reset_in_progress_message_instances().await.unwrap(), 1);
    assert_eq!(events.reset_in_progress_waiting_events().await.unwrap(), 1);
    assert_eq!(events.get_message_event_couples().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_waiting_events_of_flow_node_pages_until_empty() {
    let events = events();
    for _ in 0..5 {
        events.create_waiting_event(waiting_message(10)).await.unwrap();
    }
    let kept = events.create_waiting_event(waiting_message(11)).await.unwrap();

    assert_eq!(events.delete_waiting_events(10).await.unwrap(), 5);
    let left = events
        .search_waiting_events(&QueryOptions::all())
        .await
        .unwrap();
    assert_eq!(left, vec![kept]);
}
