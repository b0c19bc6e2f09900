//! Pending relation changes of a graph session.

use crate::graph::{DeltaAction, DeltaOperation, Relation};

#[derive(Debug, Clone, PartialEq, Eq)]
struct DeltaEntry {
    edge_id: String,
    action: DeltaAction,
    relation: Relation,
}

/// Change set keyed by edge id, in insertion order. An add and a delete of the
/// same edge cancel out, so one id never has two entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    entries: Vec<DeltaEntry>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_add(&mut self, relation: &Relation) {
        self.record(DeltaAction::Add, relation);
    }

    pub fn record_delete(&mut self, relation: &Relation) {
        self.record(DeltaAction::Delete, relation);
    }

    fn record(&mut self, action: DeltaAction, relation: &Relation) {
        let edge_id = relation.edge_id();
        match self.entries.iter().position(|e| e.edge_id == edge_id) {
            Some(index) if self.entries[index].action != action => {
                self.entries.remove(index);
            }
            Some(_) => {}
            None => self.entries.push(DeltaEntry {
                edge_id,
                action,
                relation: relation.clone(),
            }),
        }
    }

    pub fn action_for(&self, edge_id: &str) -> Option<DeltaAction> {
        self.entries
            .iter()
            .find(|e| e.edge_id == edge_id)
            .map(|e| e.action)
    }

    /// Operations to submit, oldest first.
    pub fn operations(&self) -> Vec<DeltaOperation> {
        self.entries
            .iter()
            .map(|e| DeltaOperation::new(e.action, &e.relation))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetRef;

    fn rel(a: i64, b: i64) -> Relation {
        Relation::new(AssetRef::new("Computer", a), AssetRef::new("Computer", b))
    }

    #[test]
    fn test_add_then_delete_cancels() {
        let mut delta = Delta::new();
        delta.record_add(&rel(1, 2));
        delta.record_delete(&rel(1, 2));
        assert!(delta.is_empty());
    }

    #[test]
    fn test_delete_then_add_cancels() {
        let mut delta = Delta::new();
        delta.record_delete(&rel(1, 2));
        delta.record_add(&rel(1, 2));
        assert!(delta.is_empty());
    }

    #[test]
    fn test_repeated_action_keeps_single_entry() {
        let mut delta = Delta::new();
        delta.record_delete(&rel(1, 2));
        delta.record_delete(&rel(1, 2));
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.action_for("Computer::1->Computer::2"), Some(DeltaAction::Delete));
    }

    #[test]
    fn test_operations_preserve_insertion_order() {
        let mut delta = Delta::new();
        delta.record_add(&rel(3, 4));
        delta.record_delete(&rel(1, 2));
        delta.record_add(&rel(2, 1));
        delta.record_delete(&rel(3, 4));

        let ops = delta.operations();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].action, "delete");
        assert_eq!(ops[0].source_id, Some(1));
        assert_eq!(ops[1].action, "add");
        assert_eq!(ops[1].source_id, Some(2));
        assert_eq!(ops[1].target_kind.as_deref(), Some("Computer"));
    }
}
