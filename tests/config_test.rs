use procflow::config::{EngineConfig, StorageConfig};
use procflow::runtime::definitions::{DefinitionLookup, InMemoryDefinitions};
use std::fs;

#[test]
fn test_load_full_config() {
    let yaml_content = r#"
page_size: 25
job_timeout_secs: 5
notification_capacity: 8
storage:
  backend: redis
  url: "redis://127.0.0.1:6379/3"
  key_prefix: "pf-test"
archive:
  enabled: false
"#;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = temp_dir.path().join("engine.yaml");
    fs::write(&file_path, yaml_content).expect("Failed to write temp file");

    let config = EngineConfig::load(&file_path).expect("Failed to load config");

    assert_eq!(config.page_size, 25);
    assert_eq!(config.job_timeout_secs, 5);
    assert_eq!(config.notification_capacity, 8);
    assert_eq!(
        config.storage,
        StorageConfig::Redis {
            url: "redis://127.0.0.1:6379/3".to_string(),
            key_prefix: "pf-test".to_string(),
        }
    );
    assert!(!config.archive.enabled);
}

#[test]
fn test_partial_config_falls_back_to_defaults() {
    let config = EngineConfig::from_yaml("page_size: 7\nstorage:\n  backend: redis\n  url: redis://localhost\n").unwrap();

    assert_eq!(config.page_size, 7);
    assert_eq!(config.job_timeout_secs, 60);
    assert!(config.archive.enabled);
    match config.storage {
        StorageConfig::Redis { key_prefix, .. } => assert_eq!(key_prefix, "procflow"),
        other => panic!("unexpected storage {:?}", other),
    }
}

#[test]
fn test_empty_file_yields_defaults() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = temp_dir.path().join("empty.yaml");
    fs::write(&file_path, "").unwrap();

    assert_eq!(EngineConfig::load(&file_path).unwrap(), EngineConfig::default());
    assert_eq!(EngineConfig::from_yaml("{}").unwrap(), EngineConfig::default());
}

#[test]
fn test_missing_file_is_an_error() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let err = EngineConfig::load(temp_dir.path().join("absent.yaml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_unknown_backend_is_rejected() {
    assert!(EngineConfig::from_yaml("storage:\n  backend: postgres\n").is_err());
}

#[tokio::test]
async fn test_load_definitions() {
    let yaml_content = r#"
- id: 1
  name: order
  version: "1.0"
  has_data: true
  supervisors: [42]
  flow_nodes:
    10:
      id: 10
      name: review
      has_connectors: true
- id: 2
  name: plain
  version: "2.0"
"#;

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = temp_dir.path().join("definitions.yaml");
    fs::write(&file_path, yaml_content).expect("Failed to write temp file");

    let definitions = InMemoryDefinitions::load(&file_path).expect("Failed to load definitions");

    assert_eq!(definitions.len(), 2);
    let order = definitions.process_definition(1).await.unwrap().unwrap();
    assert!(order.has_data);
    assert!(!order.has_connectors);
    let review = definitions.flow_node_definition(1, 10).await.unwrap().unwrap();
    assert!(review.has_connectors);
    assert!(!review.has_data);
    assert_eq!(definitions.supervised_definition_ids(42).await.unwrap(), vec![1]);
    assert!(definitions.process_definition(3).await.unwrap().is_none());
}

#[test]
fn test_missing_definitions_file_is_an_error() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let err = InMemoryDefinitions::load(temp_dir.path().join("absent.yaml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read definitions"));
}
