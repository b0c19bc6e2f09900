//! Validated relation writes.
//!
//! Rejections are ordinary results carrying a [`RejectReason`]; only store
//! failures come back as errors. Within a delta a store failure is reported
//! against its own operation and the remaining operations still run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assets::{AssetGate, AssetRef};
use crate::graph::{Relation, RelationStore};
use crate::{ImpactError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaAction {
    Add,
    Delete,
}

impl DeltaAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaAction::Add => "add",
            DeltaAction::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "add" => Some(DeltaAction::Add),
            "delete" => Some(DeltaAction::Delete),
            _ => None,
        }
    }
}

/// One submitted operation. Every field is optional on the wire so that
/// incomplete operations are rejected individually instead of failing the
/// whole request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaOperation {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub source_kind: Option<String>,
    #[serde(default)]
    pub source_id: Option<i64>,
    #[serde(default)]
    pub target_kind: Option<String>,
    #[serde(default)]
    pub target_id: Option<i64>,
}

impl DeltaOperation {
    pub fn new(action: DeltaAction, relation: &Relation) -> Self {
        Self {
            action: action.as_str().to_string(),
            source_kind: Some(relation.source.kind.clone()),
            source_id: Some(relation.source.id),
            target_kind: Some(relation.target.kind.clone()),
            target_id: Some(relation.target.id),
        }
    }

    pub fn parsed_action(&self) -> Option<DeltaAction> {
        DeltaAction::parse(&self.action)
    }

    /// The addressed relation, or the first missing field.
    pub fn relation(&self) -> std::result::Result<Relation, RejectReason> {
        let missing = |field: &str| RejectReason::MissingField { field: field.to_string() };
        let source_kind = self.source_kind.as_deref().filter(|k| !k.is_empty()).ok_or_else(|| missing("sourceKind"))?;
        let source_id = self.source_id.ok_or_else(|| missing("sourceId"))?;
        let target_kind = self.target_kind.as_deref().filter(|k| !k.is_empty()).ok_or_else(|| missing("targetKind"))?;
        let target_id = self.target_id.ok_or_else(|| missing("targetId"))?;
        Ok(Relation::new(
            AssetRef::new(source_kind, source_id),
            AssetRef::new(target_kind, target_id),
        ))
    }

    pub fn edge_id(&self) -> Option<String> {
        self.relation().ok().map(|r| r.edge_id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RejectReason {
    #[error("missing field {field}")]
    MissingField { field: String },
    #[error("link to self")]
    SelfLoop,
    #[error("duplicate relation")]
    Duplicate,
    #[error("unknown asset {asset}")]
    UnknownAsset { asset: String },
    #[error("relation not found")]
    NotFound,
}

impl From<RejectReason> for String {
    fn from(reason: RejectReason) -> String {
        reason.to_string()
    }
}

impl TryFrom<String> for RejectReason {
    type Error = String;

    fn try_from(text: String) -> std::result::Result<Self, Self::Error> {
        match text.as_str() {
            "link to self" => return Ok(RejectReason::SelfLoop),
            "duplicate relation" => return Ok(RejectReason::Duplicate),
            "relation not found" => return Ok(RejectReason::NotFound),
            _ => {}
        }
        if let Some(field) = text.strip_prefix("missing field ") {
            return Ok(RejectReason::MissingField { field: field.to_string() });
        }
        if let Some(asset) = text.strip_prefix("unknown asset ") {
            return Ok(RejectReason::UnknownAsset { asset: asset.to_string() });
        }
        Err(format!("unknown reject reason {:?}", text))
    }
}

/// Message reported for an operation the store could not carry out. Details
/// go to the log.
pub const STORE_FAILURE: &str = "store failure";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum MutationOutcome {
    Applied,
    Rejected(RejectReason),
    /// Unknown action, ignored.
    Skipped,
    /// The store failed; nothing was changed for this operation.
    Failed(String),
}

impl MutationOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, MutationOutcome::Applied)
    }
}

/// Result of one operation of a submitted delta, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReport {
    pub index: usize,
    pub operation: DeltaOperation,
    #[serde(flatten)]
    pub outcome: MutationOutcome,
}

impl OperationReport {
    pub fn failed(index: usize, operation: &DeltaOperation, error: &ImpactError) -> Self {
        log::error!("Relation operation {} failed: {}", index, error);
        Self {
            index,
            operation: operation.clone(),
            outcome: MutationOutcome::Failed(STORE_FAILURE.to_string()),
        }
    }
}

/// Create a relation after checking required fields, self-loops, duplicates
/// and that both endpoints pass the asset gate.
pub fn add_relation(
    relations: &dyn RelationStore,
    gate: &AssetGate<'_>,
    input: &DeltaOperation,
) -> Result<MutationOutcome> {
    let relation = match input.relation() {
        Ok(relation) => relation,
        Err(reason) => return Ok(MutationOutcome::Rejected(reason)),
    };
    if relation.is_self_loop() {
        return Ok(MutationOutcome::Rejected(RejectReason::SelfLoop));
    }
    if relations.contains(&relation)? {
        return Ok(MutationOutcome::Rejected(RejectReason::Duplicate));
    }
    for endpoint in [&relation.source, &relation.target] {
        if !gate.asset_exists(endpoint) {
            return Ok(MutationOutcome::Rejected(RejectReason::UnknownAsset {
                asset: endpoint.node_id(),
            }));
        }
    }
    // A concurrent identical add can still win between contains() and here.
    if !relations.insert(&relation)? {
        return Ok(MutationOutcome::Rejected(RejectReason::Duplicate));
    }
    log::info!("Added relation {}", relation.edge_id());
    Ok(MutationOutcome::Applied)
}

/// Remove a relation by its 4-tuple.
pub fn delete_relation(relations: &dyn RelationStore, input: &DeltaOperation) -> Result<MutationOutcome> {
    let relation = match input.relation() {
        Ok(relation) => relation,
        Err(reason) => return Ok(MutationOutcome::Rejected(reason)),
    };
    if !relations.remove(&relation)? {
        return Ok(MutationOutcome::Rejected(RejectReason::NotFound));
    }
    log::info!("Deleted relation {}", relation.edge_id());
    Ok(MutationOutcome::Applied)
}

/// Apply one operation of a delta.
pub fn apply_operation(
    relations: &dyn RelationStore,
    gate: &AssetGate<'_>,
    index: usize,
    operation: &DeltaOperation,
) -> Result<OperationReport> {
    let outcome = match operation.parsed_action() {
        Some(DeltaAction::Add) => add_relation(relations, gate, operation)?,
        Some(DeltaAction::Delete) => delete_relation(relations, operation)?,
        None => {
            log::debug!("Ignoring operation {} with unknown action {:?}", index, operation.action);
            MutationOutcome::Skipped
        }
    };
    Ok(OperationReport {
        index,
        operation: operation.clone(),
        outcome,
    })
}

/// Apply operations in order, each independently; earlier successes are kept
/// when a later operation is rejected or fails.
pub fn apply_delta(
    relations: &dyn RelationStore,
    gate: &AssetGate<'_>,
    operations: &[DeltaOperation],
) -> Vec<OperationReport> {
    let reports: Vec<OperationReport> = operations
        .iter()
        .enumerate()
        .map(|(index, operation)| {
            apply_operation(relations, gate, index, operation)
                .unwrap_or_else(|err| OperationReport::failed(index, operation, &err))
        })
        .collect();
    log_summary(&reports);
    reports
}

pub fn log_summary(reports: &[OperationReport]) {
    let applied = reports.iter().filter(|r| r.outcome.is_applied()).count();
    let failed = reports
        .iter()
        .filter(|r| matches!(r.outcome, MutationOutcome::Failed(_)))
        .count();
    if failed > 0 {
        log::warn!("Applied {}/{} relation operations, {} failed", applied, reports.len(), failed);
    } else {
        log::info!("Applied {}/{} relation operations", applied, reports.len());
    }
}
