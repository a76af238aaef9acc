//! Immutable historical snapshots.
//!
//! Snapshots are written once by the archiver and never mutated. Every snapshot keeps a
//! back-reference to the live row it was taken from (`source_object_id`) and the archive
//! timestamp.

use serde::{Deserialize, Serialize};

use crate::model::Timestamp;
use crate::model::flow_node::{FlowNodeInstance, FlowNodeType, GatewayType, TaskPriority};
use crate::model::process::{
    Comment, ConnectorInstance, DataInstance, DocumentMapping, ProcessInstance, TransitionRecord,
};
use crate::store::{Entity, FieldValue};

/// Historical row with its provenance.
pub trait ArchivedEntity: Entity {
    fn source_object_id(&self) -> u64;
    fn archive_date(&self) -> Timestamp;
}

/// A live entity that is archived verbatim.
pub trait Archivable: Entity {
    const ARCHIVED_KIND: &'static str;
}

impl Archivable for ProcessInstance {
    const ARCHIVED_KIND: &'static str = "archived_process_instance";
}

impl Archivable for Comment {
    const ARCHIVED_KIND: &'static str = "archived_comment";
}

impl Archivable for DocumentMapping {
    const ARCHIVED_KIND: &'static str = "archived_document_mapping";
}

impl Archivable for DataInstance {
    const ARCHIVED_KIND: &'static str = "archived_data_instance";
}

impl Archivable for ConnectorInstance {
    const ARCHIVED_KIND: &'static str = "archived_connector_instance";
}

impl Archivable for TransitionRecord {
    const ARCHIVED_KIND: &'static str = "archived_transition";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archived<E> {
    pub id: u64,
    pub source_object_id: u64,
    pub archive_date: Timestamp,
    pub value: E,
}

impl<E: Archivable> Archived<E> {
    pub fn of(value: &E, archive_date: Timestamp) -> Self {
        Self {
            id: 0,
            source_object_id: value.id(),
            archive_date,
            value: value.clone(),
        }
    }
}

impl<E: Archivable> Entity for Archived<E> {
    const KIND: &'static str = E::ARCHIVED_KIND;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(self.id.into()),
            "source_object_id" => Some(self.source_object_id.into()),
            "archive_date" => Some(self.archive_date.into()),
            _ => self.value.field(name),
        }
    }
}

impl<E: Archivable> ArchivedEntity for Archived<E> {
    fn source_object_id(&self) -> u64 {
        self.source_object_id
    }

    fn archive_date(&self) -> Timestamp {
        self.archive_date
    }
}

pub type ArchivedProcessInstance = Archived<ProcessInstance>;
pub type ArchivedComment = Archived<Comment>;
pub type ArchivedDocumentMapping = Archived<DocumentMapping>;
pub type ArchivedDataInstance = Archived<DataInstance>;
pub type ArchivedConnectorInstance = Archived<ConnectorInstance>;
pub type ArchivedTransition = Archived<TransitionRecord>;

/// Kind-specific part of a flow-node snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchivedFlowNodeDetails {
    UserTask { priority: Option<TaskPriority> },
    ManualTask { priority: Option<TaskPriority> },
    AutomaticTask,
    ReceiveTask,
    SendTask,
    CallActivity,
    SubProcess,
    LoopActivity { loop_counter: u32, loop_max: Option<u32> },
    MultiInstanceActivity {
        number_of_instances: u32,
        number_of_completed_instances: u32,
    },
    Gateway { gateway_type: Option<GatewayType> },
}

type SnapshotBuilder = fn(&FlowNodeInstance) -> ArchivedFlowNodeDetails;

/// Snapshot constructor for a flow-node kind. Start, end, boundary, intermediate catch and
/// intermediate throw events have none: their occurrence is kept through the event and
/// transition records.
pub fn snapshot_builder(flow_node_type: FlowNodeType) -> Option<SnapshotBuilder> {
    let builder: SnapshotBuilder = match flow_node_type {
        FlowNodeType::UserTask => |f| ArchivedFlowNodeDetails::UserTask {
            priority: f.priority,
        },
        FlowNodeType::ManualTask => |f| ArchivedFlowNodeDetails::ManualTask {
            priority: f.priority,
        },
        FlowNodeType::AutomaticTask => |_| ArchivedFlowNodeDetails::AutomaticTask,
        FlowNodeType::ReceiveTask => |_| ArchivedFlowNodeDetails::ReceiveTask,
        FlowNodeType::SendTask => |_| ArchivedFlowNodeDetails::SendTask,
        FlowNodeType::CallActivity => |_| ArchivedFlowNodeDetails::CallActivity,
        FlowNodeType::SubProcess => |_| ArchivedFlowNodeDetails::SubProcess,
        FlowNodeType::LoopActivity => |f| ArchivedFlowNodeDetails::LoopActivity {
            loop_counter: f.loop_counter,
            loop_max: f.loop_max,
        },
        FlowNodeType::MultiInstanceActivity => |f| ArchivedFlowNodeDetails::MultiInstanceActivity {
            number_of_instances: f.number_of_instances,
            number_of_completed_instances: f.number_of_completed_instances,
        },
        FlowNodeType::Gateway => |f| ArchivedFlowNodeDetails::Gateway {
            gateway_type: f.gateway_type,
        },
        FlowNodeType::StartEvent
        | FlowNodeType::EndEvent
        | FlowNodeType::BoundaryEvent
        | FlowNodeType::IntermediateCatchEvent
        | FlowNodeType::IntermediateThrowEvent => return None,
    };
    Some(builder)
}

/// Whether instances of this kind produce a flow-node snapshot when archived.
pub fn will_be_archived(flow_node_type: FlowNodeType) -> bool {
    snapshot_builder(flow_node_type).is_some()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedFlowNodeInstance {
    pub id: u64,
    pub source_object_id: u64,
    pub archive_date: Timestamp,
    pub name: String,
    pub flow_node_type: FlowNodeType,
    pub flow_node_definition_id: u64,
    pub process_definition_id: u64,
    pub root_container_id: u64,
    pub parent_container_id: u64,
    pub state_id: u32,
    pub state_name: String,
    pub stable: bool,
    pub terminal: bool,
    pub reach_state_date: Timestamp,
    pub last_update_date: Timestamp,
    pub executed_by: Option<u64>,
    pub executed_by_substitute: Option<u64>,
    pub details: ArchivedFlowNodeDetails,
}

impl ArchivedFlowNodeInstance {
    /// Builds the snapshot for `live`, or `None` if its kind is never archived.
    pub fn from_live(live: &FlowNodeInstance, archive_date: Timestamp) -> Option<Self> {
        let build = snapshot_builder(live.flow_node_type)?;
        Some(Self {
            id: 0,
            source_object_id: live.id,
            archive_date,
            name: live.name.clone(),
            flow_node_type: live.flow_node_type,
            flow_node_definition_id: live.flow_node_definition_id,
            process_definition_id: live.process_definition_id,
            root_container_id: live.root_container_id,
            parent_container_id: live.parent_container_id,
            state_id: live.state_id,
            state_name: live.state_name.clone(),
            stable: live.stable,
            terminal: live.terminal,
            reach_state_date: live.reach_state_date,
            last_update_date: live.last_update_date,
            executed_by: live.executed_by,
            executed_by_substitute: live.executed_by_substitute,
            details: build(live),
        })
    }
}

impl Entity for ArchivedFlowNodeInstance {
    const KIND: &'static str = "archived_flow_node_instance";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        Some(match name {
            "id" => self.id.into(),
            "source_object_id" => self.source_object_id.into(),
            "archive_date" => self.archive_date.into(),
            "name" => self.name.as_str().into(),
            "flow_node_type" => self.flow_node_type.as_str().into(),
            "flow_node_definition_id" => self.flow_node_definition_id.into(),
            "process_definition_id" => self.process_definition_id.into(),
            "root_container_id" => self.root_container_id.into(),
            "parent_container_id" => self.parent_container_id.into(),
            "state_id" => self.state_id.into(),
            "state_name" => self.state_name.as_str().into(),
            "stable" => self.stable.into(),
            "terminal" => self.terminal.into(),
            "reach_state_date" => self.reach_state_date.into(),
            "last_update_date" => self.last_update_date.into(),
            "executed_by" => self.executed_by.into(),
            "executed_by_substitute" => self.executed_by_substitute.into(),
            _ => return None,
        })
    }
}

impl ArchivedEntity for ArchivedFlowNodeInstance {
    fn source_object_id(&self) -> u64 {
        self.source_object_id
    }

    fn archive_date(&self) -> Timestamp {
        self.archive_date
    }
}
