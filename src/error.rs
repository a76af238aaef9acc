use std::fmt;
use thiserror::Error;

/// Failures raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The row kept changing under a compare-and-swap.
    #[error("version conflict on {kind} {id}")]
    Conflict { kind: &'static str, id: u64 },

    /// The historical store for this kind of record is not provisioned.
    #[error("definitive archive target not found for {kind}")]
    ArchiveTargetNotFound { kind: &'static str },
}

/// Identifiers attached to write-path errors so that a failure can be traced back to the
/// process it happened in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub process_definition_id: Option<u64>,
    pub process_definition_name: Option<String>,
    pub process_definition_version: Option<String>,
    pub process_instance_id: Option<u64>,
    pub root_process_instance_id: Option<u64>,
    pub flow_node_instance_id: Option<u64>,
}

impl ErrorContext {
    pub fn is_empty(&self) -> bool {
        *self == ErrorContext::default()
    }

    pub fn process_instance(mut self, id: u64) -> Self {
        self.process_instance_id = Some(id);
        self
    }

    pub fn root_process_instance(mut self, id: u64) -> Self {
        self.root_process_instance_id = Some(id);
        self
    }

    pub fn flow_node_instance(mut self, id: u64) -> Self {
        self.flow_node_instance_id = Some(id);
        self
    }

    pub fn definition(mut self, id: u64, name: &str, version: &str) -> Self {
        self.process_definition_id = Some(id);
        self.process_definition_name = Some(name.to_string());
        self.process_definition_version = Some(version.to_string());
        self
    }

    /// Fills in every field that is still unset from `other`.
    pub fn merge(&mut self, other: &ErrorContext) {
        if self.process_definition_id.is_none() {
            self.process_definition_id = other.process_definition_id;
        }
        if self.process_definition_name.is_none() {
            self.process_definition_name = other.process_definition_name.clone();
        }
        if self.process_definition_version.is_none() {
            self.process_definition_version = other.process_definition_version.clone();
        }
        if self.process_instance_id.is_none() {
            self.process_instance_id = other.process_instance_id;
        }
        if self.root_process_instance_id.is_none() {
            self.root_process_instance_id = other.root_process_instance_id;
        }
        if self.flow_node_instance_id.is_none() {
            self.flow_node_instance_id = other.flow_node_instance_id;
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(id) = self.process_definition_id {
            parts.push(format!("PROCESS_DEFINITION_ID={id}"));
        }
        if let Some(name) = &self.process_definition_name {
            parts.push(format!("PROCESS_NAME={name}"));
        }
        if let Some(version) = &self.process_definition_version {
            parts.push(format!("PROCESS_VERSION={version}"));
        }
        if let Some(id) = self.process_instance_id {
            parts.push(format!("PROCESS_INSTANCE_ID={id}"));
        }
        if let Some(id) = self.root_process_instance_id {
            parts.push(format!("ROOT_PROCESS_INSTANCE_ID={id}"));
        }
        if let Some(id) = self.flow_node_instance_id {
            parts.push(format!("FLOW_NODE_INSTANCE_ID={id}"));
        }
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Errors surfaced by the execution core.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The id does not resolve to a live (or archived) row.
    #[error("{kind} with id {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    #[error("failed to read {kind}: {source}")]
    Read {
        kind: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("failed to search {kind}: {source}")]
    Search {
        kind: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("failed to create {kind} {context}: {source}")]
    Creation {
        kind: &'static str,
        context: Box<ErrorContext>,
        #[source]
        source: StoreError,
    },

    #[error("failed to modify {kind} {context}: {source}")]
    Modification {
        kind: &'static str,
        context: Box<ErrorContext>,
        #[source]
        source: StoreError,
    },

    #[error("failed to delete {kind} {context}: {source}")]
    Deletion {
        kind: &'static str,
        context: Box<ErrorContext>,
        #[source]
        source: StoreError,
    },

    #[error("definitive archive target not found for {kind} {context}")]
    ArchiveTargetNotFound {
        kind: &'static str,
        context: Box<ErrorContext>,
    },

    #[error("ambiguous configuration: {0}")]
    AmbiguousConfiguration(String),

    /// A merge key expected to hold exactly one live token holds `found`.
    #[error(
        "broken merge graph: expected one live token for process instance {process_instance_id} and ref {ref_id}, found {found}"
    )]
    BrokenMerge {
        process_instance_id: u64,
        ref_id: u64,
        found: usize,
    },

    #[error("flow node instance {flow_node_instance_id} is {category} and cannot reach state {state}")]
    FlowInterrupted {
        flow_node_instance_id: u64,
        category: String,
        state: &'static str,
    },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: u64) -> Self {
        EngineError::NotFound { kind, id }
    }

    pub fn read(kind: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| EngineError::Read { kind, source }
    }

    pub fn search(kind: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| EngineError::Search { kind, source }
    }

    pub fn creation(kind: &'static str, context: ErrorContext) -> impl FnOnce(StoreError) -> Self {
        move |source| match source {
            StoreError::ArchiveTargetNotFound { kind } => EngineError::ArchiveTargetNotFound {
                kind,
                context: Box::new(context),
            },
            source => EngineError::Creation {
                kind,
                context: Box::new(context),
                source,
            },
        }
    }

    pub fn modification(
        kind: &'static str,
        context: ErrorContext,
    ) -> impl FnOnce(StoreError) -> Self {
        move |source| EngineError::Modification {
            kind,
            context: Box::new(context),
            source,
        }
    }

    pub fn deletion(kind: &'static str, context: ErrorContext) -> impl FnOnce(StoreError) -> Self {
        move |source| EngineError::Deletion {
            kind,
            context: Box::new(context),
            source,
        }
    }

    /// Attaches contextual identifiers to a write-path error. Fields already present win.
    pub fn with_context(mut self, extra: &ErrorContext) -> Self {
        if let Some(context) = self.context_mut() {
            context.merge(extra);
        }
        self
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            EngineError::Creation { context, .. }
            | EngineError::Modification { context, .. }
            | EngineError::Deletion { context, .. }
            | EngineError::ArchiveTargetNotFound { context, .. } => Some(context),
            _ => None,
        }
    }

    fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            EngineError::Creation { context, .. }
            | EngineError::Modification { context, .. }
            | EngineError::Deletion { context, .. }
            | EngineError::ArchiveTargetNotFound { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Storage read failures may be transient; everything else needs a caller decision.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Read { .. } | EngineError::Search { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
