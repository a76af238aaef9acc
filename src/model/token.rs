use serde::{Deserialize, Serialize};

use crate::store::{Entity, FieldValue};

/// Credit for one outstanding concurrent branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: u64,
    pub process_instance_id: u64,
    /// Branch / merge key.
    pub ref_id: u64,
    /// Branch that spawned this one.
    pub parent_ref_id: Option<u64>,
}

impl Token {
    pub fn new(process_instance_id: u64, ref_id: u64, parent_ref_id: Option<u64>) -> Self {
        Self {
            id: 0,
            process_instance_id,
            ref_id,
            parent_ref_id,
        }
    }
}

impl Entity for Token {
    const KIND: &'static str = "token";

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
            "ref_id" => self.ref_id.into(),
            "parent_ref_id" => self.parent_ref_id.into(),
            _ => return None,
        })
    }
}
