//! Immutable log operations.

use crate::clock::VectorClock;
use crate::error::{ProtocolError, ProtocolResult};
use crate::model::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Kind of change an operation describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    /// Entity created.
    #[serde(rename = "CRT")]
    Create,
    /// Entity updated.
    #[serde(rename = "UPD")]
    Update,
    /// Entity deleted.
    #[serde(rename = "DEL")]
    Delete,
    /// Several entities changed at once.
    #[serde(rename = "BATCH")]
    Batch,
    /// Full-state import replacing everything.
    #[serde(rename = "SYNC_IMPORT")]
    SyncImport,
}

impl OpType {
    /// Short code used in logs and dumps.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            OpType::Create => "CRT",
            OpType::Update => "UPD",
            OpType::Delete => "DEL",
            OpType::Batch => "BATCH",
            OpType::SyncImport => "SYNC_IMPORT",
        }
    }
}

/// A logged operation.
///
/// Operations are immutable once appended. They are ordered by
/// [`Operation::causal_cmp`]: clock sum first (a linear extension of the
/// causal partial order), then timestamp, then id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Unique operation id.
    pub id: String,
    /// Action type of the command this operation carries.
    pub action_type: String,
    /// Kind of change.
    pub op_type: OpType,
    /// Entity type the operation touches.
    pub entity_type: String,
    /// Single affected entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Several affected entities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_ids: Option<Vec<String>>,
    /// Action payload.
    pub payload: Value,
    /// Client that created the operation.
    pub client_id: String,
    /// Causal clock at creation.
    pub vector_clock: VectorClock,
    /// Wall-clock creation time.
    pub timestamp: Timestamp,
    /// Schema version of the payload.
    pub schema_version: u32,
}

impl Operation {
    /// Deterministic total order consistent with causality.
    #[must_use]
    pub fn causal_cmp(&self, other: &Operation) -> Ordering {
        self.vector_clock
            .total()
            .cmp(&other.vector_clock.total())
            .then(self.timestamp.cmp(&other.timestamp))
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Checks the structural fields every operation must carry.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidOperation`] describing the first problem.
    pub fn validate(&self) -> ProtocolResult<()> {
        let fail = |reason: &str| Err(ProtocolError::invalid_operation(&self.id, reason));
        if self.id.is_empty() {
            return fail("empty id");
        }
        if self.action_type.is_empty() {
            return fail("empty action type");
        }
        if self.client_id.is_empty() {
            return fail("empty client id");
        }
        if self.vector_clock.get(&self.client_id) == 0 {
            return fail("vector clock lacks own client component");
        }
        if self.timestamp <= 0 {
            return fail("non-positive timestamp");
        }
        Ok(())
    }
}

/// Sorts operations by [`Operation::causal_cmp`].
pub fn sort_operations(ops: &mut [Operation]) {
    ops.sort_by(Operation::causal_cmp);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(id: &str, clock: &[(&str, u64)], timestamp: Timestamp) -> Operation {
        Operation {
            id: id.to_string(),
            action_type: "test/action".to_string(),
            op_type: OpType::Update,
            entity_type: "TASK".to_string(),
            entity_id: None,
            entity_ids: None,
            payload: json!({}),
            client_id: clock[0].0.to_string(),
            vector_clock: clock.iter().map(|(k, v)| (*k, *v)).collect(),
            timestamp,
            schema_version: 1,
        }
    }

    #[test]
    fn causal_predecessor_sorts_first_despite_later_timestamp() {
        let first = op("z", &[("a", 1)], 5_000);
        let second = op("a", &[("b", 1), ("a", 1)], 1_000);
        let mut ops = vec![second.clone(), first.clone()];
        sort_operations(&mut ops);
        assert_eq!(ops[0].id, "z");
        assert_eq!(ops[1].id, "a");
    }

    #[test]
    fn concurrent_ops_tie_break_on_timestamp_then_id() {
        let a = op("op-b", &[("a", 1)], 10);
        let b = op("op-a", &[("b", 1)], 10);
        let c = op("op-c", &[("c", 1)], 5);
        let mut ops = vec![a, b, c];
        sort_operations(&mut ops);
        let ids: Vec<_> = ops.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["op-c", "op-a", "op-b"]);
    }

    #[test]
    fn validate_requires_own_clock_component() {
        assert!(op("x", &[("a", 1)], 1).validate().is_ok());

        let mut bad = op("x", &[("a", 1)], 1);
        bad.client_id = "b".to_string();
        assert!(matches!(
            bad.validate(),
            Err(ProtocolError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn op_type_serializes_to_short_codes() {
        assert_eq!(serde_json::to_value(OpType::SyncImport).unwrap(), json!("SYNC_IMPORT"));
        assert_eq!(OpType::Delete.code(), "DEL");
    }
}
