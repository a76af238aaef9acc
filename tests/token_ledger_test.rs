use procflow::error::EngineError;
use procflow::runtime::notifier::ChangeNotifier;
use procflow::runtime::token_ledger::TokenLedger;
use procflow::store::memory::InMemoryTokenStore;
use std::sync::Arc;

fn ledger(page_size: usize) -> TokenLedger {
    TokenLedger::new(
        Arc::new(InMemoryTokenStore::new()),
        ChangeNotifier::default(),
        page_size,
    )
}

#[tokio::test]
async fn test_token_conservation() {
    let ledger = ledger(100);
    ledger.create_tokens(1, 5, None, 4).await.unwrap();
    ledger.create_token(1, 5, Some(2)).await.unwrap();
    assert_eq!(ledger.get_number_of_token(1, 5).await.unwrap(), 5);

    ledger.delete_tokens(1, 5, 3).await.unwrap();
    assert_eq!(ledger.get_number_of_token(1, 5).await.unwrap(), 2);
}

#[tokio::test]
async fn test_deleting_more_than_live_fails_and_keeps_tokens() {
    let ledger = ledger(100);
    ledger.create_tokens(1, 5, None, 2).await.unwrap();

    let err = ledger.delete_tokens(1, 5, 3).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { kind: "token", id: 5 }));
    assert_eq!(ledger.get_number_of_token(1, 5).await.unwrap(), 2);
}

#[tokio::test]
async fn test_merge_keys_are_independent() {
    let ledger = ledger(100);
    ledger.create_tokens(1, 5, None, 2).await.unwrap();
    ledger.create_tokens(1, 6, None, 3).await.unwrap();
    ledger.create_tokens(2, 5, None, 1).await.unwrap();

    ledger.delete_tokens(1, 6, 3).await.unwrap();

    assert_eq!(ledger.get_number_of_token(1, 5).await.unwrap(), 2);
    assert_eq!(ledger.get_number_of_token(1, 6).await.unwrap(), 0);
    assert_eq!(ledger.get_number_of_token(2, 5).await.unwrap(), 1);
    assert_eq!(ledger.get_number_of_tokens(1).await.unwrap(), 2);
}

#[tokio::test]
async fn test_get_token_requires_exactly_one() {
    let ledger = ledger(100);

    let err = ledger.get_token(1, 5).await.unwrap_err();
    assert!(matches!(err, EngineError::BrokenMerge { found: 0, .. }));

    let created = ledger.create_token(1, 5, Some(1)).await.unwrap();
    let token = ledger.get_token(1, 5).await.unwrap();
    assert_eq!(token, created);
    assert_eq!(token.parent_ref_id, Some(1));

    ledger.create_token(1, 5, Some(1)).await.unwrap();
    let err = ledger.get_token(1, 5).await.unwrap_err();
    assert!(matches!(err, EngineError::BrokenMerge { found: 2, .. }));
}

#[tokio::test]
async fn test_delete_token_twice_is_not_found() {
    let ledger = ledger(100);
    let token = ledger.create_token(1, 5, None).await.unwrap();

    ledger.delete_token(&token).await.unwrap();
    let err = ledger.delete_token(&token).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn test_consume_on_empty_merge_key_is_broken_merge() {
    let ledger = ledger(100);
    let err = ledger.consume(1, 5).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::BrokenMerge {
            process_instance_id: 1,
            ref_id: 5,
            found: 0
        }
    ));
}

#[tokio::test]
async fn test_concurrent_fan_in_fires_merge_once() {
    let ledger = ledger(100);
    ledger.create_tokens(1, 5, None, 16).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move { ledger.consume(1, 5).await }));
    }

    let mut remaining = Vec::new();
    for handle in handles {
        remaining.push(handle.await.unwrap().unwrap());
    }
    remaining.sort_unstable();

    assert_eq!(remaining, (0..16).collect::<Vec<_>>());
    assert_eq!(ledger.get_number_of_token(1, 5).await.unwrap(), 0);
}

#[tokio::test]
async fn test_bulk_cleanup_pages_until_empty() {
    // Page size smaller than the row count forces several passes.
    let ledger = ledger(2);
    ledger.create_tokens(1, 5, None, 3).await.unwrap();
    ledger.create_tokens(1, 7, None, 2).await.unwrap();
    ledger.create_tokens(2, 5, None, 2).await.unwrap();

    assert_eq!(ledger.delete_process_tokens(1).await.unwrap(), 5);
    assert_eq!(ledger.get_number_of_tokens(1).await.unwrap(), 0);
    assert_eq!(ledger.get_number_of_tokens(2).await.unwrap(), 2);

    assert_eq!(ledger.delete_all_tokens().await.unwrap(), 2);
    assert_eq!(ledger.get_number_of_tokens(2).await.unwrap(), 0);
}
