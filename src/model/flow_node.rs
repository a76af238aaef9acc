use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::Timestamp;
use crate::store::{Entity, FieldValue};

/// Kind of graph node a flow-node instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowNodeType {
    UserTask,
    ManualTask,
    AutomaticTask,
    ReceiveTask,
    SendTask,
    CallActivity,
    SubProcess,
    LoopActivity,
    MultiInstanceActivity,
    Gateway,
    StartEvent,
    EndEvent,
    BoundaryEvent,
    IntermediateCatchEvent,
    IntermediateThrowEvent,
}

impl FlowNodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowNodeType::UserTask => "USER_TASK",
            FlowNodeType::ManualTask => "MANUAL_TASK",
            FlowNodeType::AutomaticTask => "AUTOMATIC_TASK",
            FlowNodeType::ReceiveTask => "RECEIVE_TASK",
            FlowNodeType::SendTask => "SEND_TASK",
            FlowNodeType::CallActivity => "CALL_ACTIVITY",
            FlowNodeType::SubProcess => "SUB_PROCESS",
            FlowNodeType::LoopActivity => "LOOP_ACTIVITY",
            FlowNodeType::MultiInstanceActivity => "MULTI_INSTANCE_ACTIVITY",
            FlowNodeType::Gateway => "GATEWAY",
            FlowNodeType::StartEvent => "START_EVENT",
            FlowNodeType::EndEvent => "END_EVENT",
            FlowNodeType::BoundaryEvent => "BOUNDARY_EVENT",
            FlowNodeType::IntermediateCatchEvent => "INTERMEDIATE_CATCH_EVENT",
            FlowNodeType::IntermediateThrowEvent => "INTERMEDIATE_THROW_EVENT",
        }
    }

    pub fn is_event(&self) -> bool {
        matches!(
            self,
            FlowNodeType::StartEvent
                | FlowNodeType::EndEvent
                | FlowNodeType::BoundaryEvent
                | FlowNodeType::IntermediateCatchEvent
                | FlowNodeType::IntermediateThrowEvent
        )
    }
}

impl fmt::Display for FlowNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GatewayType {
    Exclusive,
    Inclusive,
    Parallel,
}

/// Cross-cutting override of normal progression. Ordered by priority: a higher category always
/// wins over a lower one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateCategory {
    Normal,
    Aborting,
    Cancelling,
}

impl StateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateCategory::Normal => "NORMAL",
            StateCategory::Aborting => "ABORTING",
            StateCategory::Cancelling => "CANCELLING",
        }
    }
}

impl fmt::Display for StateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named state a flow node can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowNodeState {
    pub id: u32,
    pub name: &'static str,
    pub stable: bool,
    pub terminal: bool,
    /// Category this state belongs to. Interrupted instances may only move to non-normal states.
    pub category: StateCategory,
}

impl FlowNodeState {
    pub const EXECUTING: FlowNodeState = FlowNodeState::normal(1, "executing", false, false);
    pub const COMPLETED: FlowNodeState = FlowNodeState::normal(2, "completed", true, true);
    pub const FAILED: FlowNodeState = FlowNodeState::normal(3, "failed", true, false);
    pub const READY: FlowNodeState = FlowNodeState::normal(4, "ready", true, false);
    pub const WAITING: FlowNodeState = FlowNodeState::normal(5, "waiting", true, false);
    pub const COMPLETING: FlowNodeState = FlowNodeState::normal(9, "completing", false, false);
    pub const SKIPPED: FlowNodeState = FlowNodeState::normal(12, "skipped", true, true);
    pub const CANCELLING: FlowNodeState = FlowNodeState {
        id: 13,
        name: "cancelling",
        stable: false,
        terminal: false,
        category: StateCategory::Cancelling,
    };
    pub const CANCELLED: FlowNodeState = FlowNodeState {
        id: 14,
        name: "cancelled",
        stable: true,
        terminal: true,
        category: StateCategory::Cancelling,
    };
    pub const ABORTING: FlowNodeState = FlowNodeState {
        id: 15,
        name: "aborting",
        stable: false,
        terminal: false,
        category: StateCategory::Aborting,
    };
    pub const ABORTED: FlowNodeState = FlowNodeState {
        id: 16,
        name: "aborted",
        stable: true,
        terminal: true,
        category: StateCategory::Aborting,
    };
    pub const INITIALIZING: FlowNodeState = FlowNodeState::normal(32, "initializing", false, false);

    pub const ALL: [FlowNodeState; 12] = [
        FlowNodeState::EXECUTING,
        FlowNodeState::COMPLETED,
        FlowNodeState::FAILED,
        FlowNodeState::READY,
        FlowNodeState::WAITING,
        FlowNodeState::COMPLETING,
        FlowNodeState::SKIPPED,
        FlowNodeState::CANCELLING,
        FlowNodeState::CANCELLED,
        FlowNodeState::ABORTING,
        FlowNodeState::ABORTED,
        FlowNodeState::INITIALIZING,
    ];

    const fn normal(id: u32, name: &'static str, stable: bool, terminal: bool) -> Self {
        FlowNodeState {
            id,
            name,
            stable,
            terminal,
            category: StateCategory::Normal,
        }
    }

    pub fn by_id(id: u32) -> Option<FlowNodeState> {
        FlowNodeState::ALL.into_iter().find(|s| s.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Lowest,
    UnderNormal,
    Normal,
    AboveNormal,
    Highest,
}

/// One running occurrence of a graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNodeInstance {
    pub id: u64,
    pub name: String,
    pub flow_node_type: FlowNodeType,
    /// Definition-side id of the node in the process graph.
    pub flow_node_definition_id: u64,
    pub process_definition_id: u64,
    /// Owning process instance.
    pub root_container_id: u64,
    /// Directly enclosing process or flow-node instance.
    pub parent_container_id: u64,
    /// Activity a boundary event is attached to.
    pub attached_to: Option<u64>,
    pub state_id: u32,
    pub state_name: String,
    pub previous_state_id: u32,
    pub stable: bool,
    pub terminal: bool,
    pub executing: bool,
    pub state_category: StateCategory,
    pub reach_state_date: Timestamp,
    pub last_update_date: Timestamp,
    pub executed_by: Option<u64>,
    pub executed_by_substitute: Option<u64>,
    /// User tasks only.
    pub priority: Option<TaskPriority>,
    pub gateway_type: Option<GatewayType>,
    /// Interrupting boundary events abort the activity they are attached to when they fire.
    pub interrupting: bool,
    pub loop_counter: u32,
    pub loop_max: Option<u32>,
    pub number_of_instances: u32,
    pub number_of_completed_instances: u32,
    pub token_count: u32,
    pub version: u64,
}

impl FlowNodeInstance {
    /// A freshly entered node in the `initializing` state.
    pub fn new(
        name: &str,
        flow_node_type: FlowNodeType,
        process_definition_id: u64,
        root_container_id: u64,
    ) -> Self {
        let now = crate::model::now_ms();
        let state = FlowNodeState::INITIALIZING;
        FlowNodeInstance {
            id: 0,
            name: name.to_string(),
            flow_node_type,
            flow_node_definition_id: 0,
            process_definition_id,
            root_container_id,
            parent_container_id: root_container_id,
            attached_to: None,
            state_id: state.id,
            state_name: state.name.to_string(),
            previous_state_id: 0,
            stable: state.stable,
            terminal: state.terminal,
            executing: false,
            state_category: StateCategory::Normal,
            reach_state_date: now,
            last_update_date: now,
            executed_by: None,
            executed_by_substitute: None,
            priority: (flow_node_type == FlowNodeType::UserTask).then_some(TaskPriority::Normal),
            gateway_type: None,
            interrupting: false,
            loop_counter: 0,
            loop_max: None,
            number_of_instances: 0,
            number_of_completed_instances: 0,
            token_count: 0,
            version: 0,
        }
    }

    pub fn with_parent(mut self, parent_container_id: u64) -> Self {
        self.parent_container_id = parent_container_id;
        self
    }

    /// Attaches a boundary event to `activity_id`. The boundary keeps the activity's parent as
    /// its own container, so it is not a child of the activity.
    pub fn attached_to(mut self, activity_id: u64, interrupting: bool) -> Self {
        self.attached_to = Some(activity_id);
        self.interrupting = interrupting;
        self
    }

    pub fn with_definition(mut self, flow_node_definition_id: u64) -> Self {
        self.flow_node_definition_id = flow_node_definition_id;
        self
    }

    pub fn state(&self) -> Option<FlowNodeState> {
        FlowNodeState::by_id(self.state_id)
    }
}

impl Entity for FlowNodeInstance {
    const KIND: &'static str = "flow_node_instance";

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
            "flow_node_type" => self.flow_node_type.as_str().into(),
            "flow_node_definition_id" => self.flow_node_definition_id.into(),
            "process_definition_id" => self.process_definition_id.into(),
            "root_container_id" => self.root_container_id.into(),
            "parent_container_id" => self.parent_container_id.into(),
            "attached_to" => self.attached_to.into(),
            "state_id" => self.state_id.into(),
            "state_name" => self.state_name.as_str().into(),
            "stable" => self.stable.into(),
            "terminal" => self.terminal.into(),
            "executing" => self.executing.into(),
            "state_category" => self.state_category.as_str().into(),
            "reach_state_date" => self.reach_state_date.into(),
            "last_update_date" => self.last_update_date.into(),
            "executed_by" => self.executed_by.into(),
            "executed_by_substitute" => self.executed_by_substitute.into(),
            "priority" => self.priority.map(|p| p as i64).into(),
            _ => return None,
        })
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
