use serde::{Deserialize, Serialize};

use crate::model::{Timestamp, now_ms};
use crate::store::{Entity, FieldValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessInstanceState {
    Initializing,
    Started,
    Completing,
    Completed,
    Aborted,
    Cancelled,
    Error,
}

impl ProcessInstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessInstanceState::Initializing => "INITIALIZING",
            ProcessInstanceState::Started => "STARTED",
            ProcessInstanceState::Completing => "COMPLETING",
            ProcessInstanceState::Completed => "COMPLETED",
            ProcessInstanceState::Aborted => "ABORTED",
            ProcessInstanceState::Cancelled => "CANCELLED",
            ProcessInstanceState::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessInstanceState::Completed
                | ProcessInstanceState::Aborted
                | ProcessInstanceState::Cancelled
                | ProcessInstanceState::Error
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub id: u64,
    pub name: String,
    pub process_definition_id: u64,
    pub root_process_instance_id: u64,
    /// Call activity that started this instance, for sub-processes.
    pub caller_id: Option<u64>,
    pub state: ProcessInstanceState,
    pub started_by: Option<u64>,
    pub start_date: Timestamp,
    pub end_date: Option<Timestamp>,
    pub last_update: Timestamp,
}

impl ProcessInstance {
    pub fn new(name: &str, process_definition_id: u64) -> Self {
        let now = now_ms();
        Self {
            id: 0,
            name: name.to_string(),
            process_definition_id,
            root_process_instance_id: 0,
            caller_id: None,
            state: ProcessInstanceState::Started,
            started_by: None,
            start_date: now,
            end_date: None,
            last_update: now,
        }
    }
}

impl Entity for ProcessInstance {
    const KIND: &'static str = "process_instance";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
        if self.root_process_instance_id == 0 {
            self.root_process_instance_id = id;
        }
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        Some(match name {
            "id" => self.id.into(),
            "name" => self.name.as_str().into(),
            "process_definition_id" => self.process_definition_id.into(),
            "root_process_instance_id" => self.root_process_instance_id.into(),
            "caller_id" => self.caller_id.into(),
            "state" => self.state.as_str().into(),
            "started_by" => self.started_by.into(),
            "start_date" => self.start_date.into(),
            "end_date" => self.end_date.into(),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub process_instance_id: u64,
    pub user_id: Option<u64>,
    pub content: String,
    pub post_date: Timestamp,
}

impl Comment {
    pub fn new(process_instance_id: u64, user_id: Option<u64>, content: &str) -> Self {
        Self {
            id: 0,
            process_instance_id,
            user_id,
            content: content.to_string(),
            post_date: now_ms(),
        }
    }
}

impl Entity for Comment {
    const KIND: &'static str = "comment";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        Some(match name {
            "id" => self.id.into(),
            "process_instance_id" => self.process_instance_id.into(),
            "user_id" => self.user_id.into(),
            "post_date" => self.post_date.into(),
            _ => return None,
        })
    }
}

/// Link between a process instance and a stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMapping {
    pub id: u64,
    pub process_instance_id: u64,
    pub document_id: u64,
    pub name: String,
    pub description: Option<String>,
    pub version: String,
    /// Position inside a document list, if the document belongs to one.
    pub index: Option<u32>,
}

impl DocumentMapping {
    pub fn new(process_instance_id: u64, document_id: u64, name: &str) -> Self {
        Self {
            id: 0,
            process_instance_id,
            document_id,
            name: name.to_string(),
            description: None,
            version: "1".to_string(),
            index: None,
        }
    }
}

impl Entity for DocumentMapping {
    const KIND: &'static str = "document_mapping";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        Some(match name {
            "id" => self.id.into(),
            "process_instance_id" => self.process_instance_id.into(),
            "document_id" => self.document_id.into(),
            "name" => self.name.as_str().into(),
            "index" => self.index.into(),
            _ => return None,
        })
    }
}

/// What a data instance or connector instance is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerType {
    ProcessInstance,
    ActivityInstance,
}

impl ContainerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerType::ProcessInstance => "PROCESS_INSTANCE",
            ContainerType::ActivityInstance => "ACTIVITY_INSTANCE",
        }
    }
}

/// Visibility scope registering that a container holds data instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataContainer {
    pub id: u64,
    pub container_id: u64,
    pub container_type: ContainerType,
}

impl DataContainer {
    pub fn new(container_id: u64, container_type: ContainerType) -> Self {
        Self {
            id: 0,
            container_id,
            container_type,
        }
    }
}

impl Entity for DataContainer {
    const KIND: &'static str = "data_container";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        Some(match name {
            "id" => self.id.into(),
            "container_id" => self.container_id.into(),
            "container_type" => self.container_type.as_str().into(),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataInstance {
    pub id: u64,
    pub name: String,
    pub container_id: u64,
    pub container_type: ContainerType,
    pub class_name: String,
    pub value: serde_json::Value,
}

impl DataInstance {
    pub fn new(name: &str, container_id: u64, container_type: ContainerType, value: serde_json::Value) -> Self {
        let class_name = match &value {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "boolean",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Array(_) => "list",
            serde_json::Value::Object(_) => "map",
        };
        Self {
            id: 0,
            name: name.to_string(),
            container_id,
            container_type,
            class_name: class_name.to_string(),
            value,
        }
    }
}

impl Entity for DataInstance {
    const KIND: &'static str = "data_instance";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        Some(match name {
            "id" => self.id.into(),
            "name" => self.name.as_str().into(),
            "container_id" => self.container_id.into(),
            "container_type" => self.container_type.as_str().into(),
            _ => return None,
        })
    }
}

/// When, relative to its container, a connector runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectorEvent {
    OnEnter,
    OnFinish,
}

impl ConnectorEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorEvent::OnEnter => "ON_ENTER",
            ConnectorEvent::OnFinish => "ON_FINISH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectorState {
    ToBeExecuted,
    Executing,
    Done,
    Failed,
    Skipped,
}

impl ConnectorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorState::ToBeExecuted => "TO_BE_EXECUTED",
            ConnectorState::Executing => "EXECUTING",
            ConnectorState::Done => "DONE",
            ConnectorState::Failed => "FAILED",
            ConnectorState::Skipped => "SKIPPED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorInstance {
    pub id: u64,
    pub name: String,
    pub connector_id: String,
    pub version: String,
    pub container_id: u64,
    pub container_type: ContainerType,
    pub activation_event: ConnectorEvent,
    pub state: ConnectorState,
    pub execution_order: u32,
}

impl ConnectorInstance {
    pub fn new(
        name: &str,
        connector_id: &str,
        container_id: u64,
        container_type: ContainerType,
        activation_event: ConnectorEvent,
        execution_order: u32,
    ) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            connector_id: connector_id.to_string(),
            version: "1.0.0".to_string(),
            container_id,
            container_type,
            activation_event,
            state: ConnectorState::ToBeExecuted,
            execution_order,
        }
    }
}

impl Entity for ConnectorInstance {
    const KIND: &'static str = "connector_instance";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        Some(match name {
            "id" => self.id.into(),
            "name" => self.name.as_str().into(),
            "container_id" => self.container_id.into(),
            "container_type" => self.container_type.as_str().into(),
            "activation_event" => self.activation_event.as_str().into(),
            "state" => self.state.as_str().into(),
            "execution_order" => self.execution_order.into(),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionState {
    Taken,
    Aborted,
}

impl TransitionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionState::Taken => "TAKEN",
            TransitionState::Aborted => "ABORTED",
        }
    }
}

/// One traversal of a sequence flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: u64,
    pub name: String,
    pub process_instance_id: u64,
    pub root_process_instance_id: u64,
    /// Definition id of the flow node the transition leaves.
    pub source_flow_node_definition_id: u64,
    /// Flow-node instance that was left, when known.
    pub source_flow_node_instance_id: Option<u64>,
    pub state: TransitionState,
    pub date: Timestamp,
}

impl TransitionRecord {
    pub fn new(
        name: &str,
        process_instance_id: u64,
        root_process_instance_id: u64,
        source_flow_node_definition_id: u64,
        state: TransitionState,
    ) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            process_instance_id,
            root_process_instance_id,
            source_flow_node_definition_id,
            source_flow_node_instance_id: None,
            state,
            date: now_ms(),
        }
    }

    pub fn leaving(mut self, flow_node_instance_id: u64) -> Self {
        self.source_flow_node_instance_id = Some(flow_node_instance_id);
        self
    }
}

impl Entity for TransitionRecord {
    const KIND: &'static str = "transition";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        Some(match name {
            "id" => self.id.into(),
            "name" => self.name.as_str().into(),
            "process_instance_id" => self.process_instance_id.into(),
            "root_process_instance_id" => self.root_process_instance_id.into(),
            "source_flow_node_definition_id" => self.source_flow_node_definition_id.into(),
            "state" => self.state.as_str().into(),
            "date" => self.date.into(),
            _ => return None,
        })
    }
}
