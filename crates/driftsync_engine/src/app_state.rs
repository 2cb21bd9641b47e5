//! The primary application store seen by the applier.
//!
//! The engine never interprets application state beyond what a full import
//! needs. Feature reducers live behind [`AppStateStore`].

use driftsync_protocol::{OpType, Operation};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Application state that replayed operations are dispatched into.
pub trait AppStateStore: Send + Sync {
    /// Applies all operations as one state transition.
    ///
    /// Listeners that react to new local user actions must not fire for
    /// operations dispatched here.
    fn apply_bulk(&self, ops: &[Operation]);

    /// Returns the complete current state.
    fn snapshot(&self) -> Value;

    /// Replaces the complete state.
    fn replace_state(&self, state: Value);
}

/// An in-memory application store keyed by entity type and id.
///
/// State layout is `{ entityType: { entityId: fields } }`. Creates and
/// updates merge payload fields into the entity, deletes remove it, and a
/// full import replaces everything with the imported `appState`.
#[derive(Debug, Default)]
pub struct MemoryAppStore {
    state: RwLock<Map<String, Value>>,
    bulk_dispatches: AtomicUsize,
    dispatched_ops: AtomicUsize,
}

impl MemoryAppStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bulk transitions so far.
    pub fn bulk_dispatches(&self) -> usize {
        self.bulk_dispatches.load(Ordering::SeqCst)
    }

    /// Number of operations dispatched so far.
    pub fn dispatched_ops(&self) -> usize {
        self.dispatched_ops.load(Ordering::SeqCst)
    }

    /// Returns one entity, if present.
    pub fn entity(&self, entity_type: &str, id: &str) -> Option<Value> {
        self.state
            .read()
            .get(entity_type)
            .and_then(|entities| entities.get(id))
            .cloned()
    }

    fn apply_one(state: &mut Map<String, Value>, op: &Operation) {
        if op.op_type == OpType::SyncImport {
            let imported = op
                .payload
                .pointer("/appDataComplete/appState")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            *state = imported;
            return;
        }

        let ids: Vec<&str> = op
            .entity_id
            .iter()
            .chain(op.entity_ids.iter().flatten())
            .map(String::as_str)
            .collect();
        let Some(entities) = state
            .entry(op.entity_type.clone())
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
        else {
            return;
        };

        for id in ids {
            if op.op_type == OpType::Delete {
                entities.remove(id);
                continue;
            }
            let entity = entities
                .entry(id.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match (entity.as_object_mut(), op.payload.as_object()) {
                (Some(fields), Some(changes)) => {
                    for (k, v) in changes {
                        fields.insert(k.clone(), v.clone());
                    }
                }
                _ => *entity = op.payload.clone(),
            }
        }
    }
}

impl AppStateStore for MemoryAppStore {
    fn apply_bulk(&self, ops: &[Operation]) {
        let mut state = self.state.write();
        for op in ops {
            Self::apply_one(&mut state, op);
        }
        self.bulk_dispatches.fetch_add(1, Ordering::SeqCst);
        self.dispatched_ops.fetch_add(ops.len(), Ordering::SeqCst);
    }

    fn snapshot(&self) -> Value {
        Value::Object(self.state.read().clone())
    }

    fn replace_state(&self, state: Value) {
        *self.state.write() = match state {
            Value::Object(map) => map,
            _ => Map::new(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_protocol::VectorClock;
    use serde_json::json;

    fn op(op_type: OpType, entity_id: &str, payload: Value) -> Operation {
        Operation {
            id: format!("op-{entity_id}"),
            action_type: "note/update".into(),
            op_type,
            entity_type: "NOTE".into(),
            entity_id: Some(entity_id.into()),
            entity_ids: None,
            payload,
            client_id: "a".into(),
            vector_clock: VectorClock::new().tick("a"),
            timestamp: 1,
            schema_version: 1,
        }
    }

    #[test]
    fn bulk_apply_is_one_transition() {
        let store = MemoryAppStore::new();
        store.apply_bulk(&[
            op(OpType::Create, "n1", json!({"title": "a", "pinned": false})),
            op(OpType::Update, "n1", json!({"pinned": true})),
            op(OpType::Create, "n2", json!({"title": "b"})),
            op(OpType::Delete, "n2", json!({})),
        ]);

        assert_eq!(store.bulk_dispatches(), 1);
        assert_eq!(store.dispatched_ops(), 4);
        assert_eq!(store.entity("NOTE", "n1"), Some(json!({"title": "a", "pinned": true})));
        assert_eq!(store.entity("NOTE", "n2"), None);
    }

    #[test]
    fn sync_import_replaces_state() {
        let store = MemoryAppStore::new();
        store.apply_bulk(&[op(OpType::Create, "n1", json!({"title": "a"}))]);

        let mut import = op(OpType::SyncImport, "x", json!({
            "appDataComplete": {"appState": {"TAG": {"t1": {"title": "tag"}}}}
        }));
        import.entity_id = None;
        store.apply_bulk(&[import]);

        assert_eq!(store.snapshot(), json!({"TAG": {"t1": {"title": "tag"}}}));
    }
}
