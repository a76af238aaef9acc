use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{Timestamp, now_ms};
use crate::store::{Entity, FieldValue};

/// Maximum number of correlation values a message or a waiting message event may carry.
pub const MAX_CORRELATIONS: usize = 5;

/// Named correlation values; two sides correlate only if the maps are equal.
pub type Correlations = BTreeMap<String, String>;

/// Graph position of the catching node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CatchEventType {
    /// Standing subscription that starts new process instances; never consumed by a match.
    StartEvent,
    IntermediateCatchEvent,
    BoundaryEvent,
    ReceiveTask,
}

impl CatchEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatchEventType::StartEvent => "START_EVENT",
            CatchEventType::IntermediateCatchEvent => "INTERMEDIATE_CATCH_EVENT",
            CatchEventType::BoundaryEvent => "BOUNDARY_EVENT",
            CatchEventType::ReceiveTask => "RECEIVE_TASK",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitingEventKind {
    Message {
        message_name: String,
        /// Name of the process the catching node belongs to.
        process_name: String,
        /// Name of the catching flow node.
        flow_node_name: Option<String>,
        correlations: Correlations,
    },
    Signal {
        signal_name: String,
    },
    Timer {
        due_date: Timestamp,
    },
    Error {
        related_activity_instance_id: u64,
        /// `None` catches every error thrown by the related activity.
        error_code: Option<String>,
    },
}

impl WaitingEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitingEventKind::Message { .. } => "message",
            WaitingEventKind::Signal { .. } => "signal",
            WaitingEventKind::Timer { .. } => "timer",
            WaitingEventKind::Error { .. } => "error",
        }
    }
}

/// A catch event parked until its trigger arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitingEvent {
    pub id: u64,
    pub event_type: CatchEventType,
    /// Owning flow-node instance; `None` for start-event subscriptions.
    pub flow_node_instance_id: Option<u64>,
    pub process_instance_id: Option<u64>,
    pub process_definition_id: u64,
    pub in_progress: bool,
    #[serde(flatten)]
    pub kind: WaitingEventKind,
}

impl WaitingEvent {
    fn new(event_type: CatchEventType, process_definition_id: u64, kind: WaitingEventKind) -> Self {
        Self {
            id: 0,
            event_type,
            flow_node_instance_id: None,
            process_instance_id: None,
            process_definition_id,
            in_progress: false,
            kind,
        }
    }

    pub fn message(
        event_type: CatchEventType,
        process_definition_id: u64,
        message_name: &str,
        process_name: &str,
        flow_node_name: Option<&str>,
    ) -> Self {
        Self::new(
            event_type,
            process_definition_id,
            WaitingEventKind::Message {
                message_name: message_name.to_string(),
                process_name: process_name.to_string(),
                flow_node_name: flow_node_name.map(str::to_string),
                correlations: Correlations::new(),
            },
        )
    }

    pub fn signal(event_type: CatchEventType, process_definition_id: u64, signal_name: &str) -> Self {
        Self::new(
            event_type,
            process_definition_id,
            WaitingEventKind::Signal {
                signal_name: signal_name.to_string(),
            },
        )
    }

    pub fn timer(event_type: CatchEventType, process_definition_id: u64, due_date: Timestamp) -> Self {
        Self::new(
            event_type,
            process_definition_id,
            WaitingEventKind::Timer { due_date },
        )
    }

    pub fn boundary_error(
        process_definition_id: u64,
        related_activity_instance_id: u64,
        error_code: Option<&str>,
    ) -> Self {
        Self::new(
            CatchEventType::BoundaryEvent,
            process_definition_id,
            WaitingEventKind::Error {
                related_activity_instance_id,
                error_code: error_code.map(str::to_string),
            },
        )
    }

    /// Sets the owning flow node and its process instance.
    pub fn owned_by(mut self, flow_node_instance_id: u64, process_instance_id: u64) -> Self {
        self.flow_node_instance_id = Some(flow_node_instance_id);
        self.process_instance_id = Some(process_instance_id);
        self
    }

    pub fn correlate(mut self, key: &str, value: &str) -> Self {
        if let WaitingEventKind::Message { correlations, .. } = &mut self.kind {
            correlations.insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn is_start_subscription(&self) -> bool {
        self.event_type == CatchEventType::StartEvent
    }
}

impl Entity for WaitingEvent {
    const KIND: &'static str = "waiting_event";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        let value = match name {
            "id" => self.id.into(),
            "kind" => self.kind.as_str().into(),
            "event_type" => self.event_type.as_str().into(),
            "flow_node_instance_id" => self.flow_node_instance_id.into(),
            "process_instance_id" => self.process_instance_id.into(),
            "process_definition_id" => self.process_definition_id.into(),
            "in_progress" => self.in_progress.into(),
            _ => match (&self.kind, name) {
                (WaitingEventKind::Message { message_name, .. }, "name") => message_name.into(),
                (WaitingEventKind::Message { process_name, .. }, "process_name") => {
                    process_name.into()
                }
                (WaitingEventKind::Message { flow_node_name, .. }, "flow_node_name") => {
                    flow_node_name.clone().into()
                }
                (WaitingEventKind::Signal { signal_name }, "name") => signal_name.into(),
                (WaitingEventKind::Timer { due_date }, "due_date") => (*due_date).into(),
                (
                    WaitingEventKind::Error {
                        related_activity_instance_id,
                        ..
                    },
                    "related_activity_instance_id",
                ) => (*related_activity_instance_id).into(),
                (WaitingEventKind::Error { error_code, .. }, "error_code") => {
                    error_code.clone().into()
                }
                _ => return None,
            },
        };
        Some(value)
    }
}

/// A thrown message awaiting delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageInstance {
    pub id: u64,
    pub message_name: String,
    pub target_process: String,
    pub target_flow_node: Option<String>,
    pub correlations: Correlations,
    pub in_progress: bool,
    /// Process instance that threw the message, if any.
    pub thrown_by_process_instance_id: Option<u64>,
    pub creation_date: Timestamp,
    pub payload: serde_json::Value,
}

impl MessageInstance {
    pub fn new(message_name: &str, target_process: &str, target_flow_node: Option<&str>) -> Self {
        Self {
            id: 0,
            message_name: message_name.to_string(),
            target_process: target_process.to_string(),
            target_flow_node: target_flow_node.map(str::to_string),
            correlations: Correlations::new(),
            in_progress: false,
            thrown_by_process_instance_id: None,
            creation_date: now_ms(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn correlate(mut self, key: &str, value: &str) -> Self {
        self.correlations.insert(key.to_string(), value.to_string());
        self
    }

    pub fn thrown_by(mut self, process_instance_id: u64) -> Self {
        self.thrown_by_process_instance_id = Some(process_instance_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// True if `waiting` is a message catch this message may be delivered to.
    pub fn matches(&self, waiting: &WaitingEvent) -> bool {
        match &waiting.kind {
            WaitingEventKind::Message {
                message_name,
                process_name,
                flow_node_name,
                correlations,
            } => {
                *message_name == self.message_name
                    && *process_name == self.target_process
                    && match &self.target_flow_node {
                        Some(target) => flow_node_name.as_deref() == Some(target.as_str()),
                        None => true,
                    }
                    && *correlations == self.correlations
            }
            _ => false,
        }
    }
}

impl Entity for MessageInstance {
    const KIND: &'static str = "message_instance";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        Some(match name {
            "id" => self.id.into(),
            "name" => self.message_name.as_str().into(),
            "target_process" => self.target_process.as_str().into(),
            "target_flow_node" => self.target_flow_node.clone().into(),
            "in_progress" => self.in_progress.into(),
            "thrown_by_process_instance_id" => self.thrown_by_process_instance_id.into(),
            "creation_date" => self.creation_date.into(),
            _ => return None,
        })
    }
}
