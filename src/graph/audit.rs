//! Relation mutation audit logging.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;
use uuid::Uuid;

use crate::assets::AssetGate;
use crate::error::Result;
use crate::graph::{apply_operation, DeltaOperation, MutationOutcome, OperationReport, RelationStore};

/// One row of `relation_operations`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub operation_id: String,
    pub timestamp: String,
    pub action: String,
    pub source_kind: Option<String>,
    pub source_id: Option<i64>,
    pub target_kind: Option<String>,
    pub target_id: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Log a relation operation to the audit table.
///
/// Returns the generated operation_id (UUID).
pub fn log_operation(
    conn: &Connection,
    operation: &DeltaOperation,
    success: bool,
    error_message: Option<&str>,
) -> Result<String> {
    let operation_id = Uuid::new_v4().to_string();
    let timestamp = Utc::now().to_rfc3339();

    conn.execute(
        r#"
        INSERT INTO relation_operations (
            operation_id, timestamp, action, source_kind, source_id,
            target_kind, target_id, success, error_message
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            operation_id,
            timestamp,
            operation.action,
            operation.source_kind,
            operation.source_id,
            operation.target_kind,
            operation.target_id,
            success,
            error_message
        ],
    )?;

    Ok(operation_id)
}

/// Log a delta report. Skipped operations never touched the store and are
/// not recorded.
pub fn log_report(conn: &Connection, report: &OperationReport) -> Result<Option<String>> {
    match &report.outcome {
        MutationOutcome::Applied => log_operation(conn, &report.operation, true, None).map(Some),
        MutationOutcome::Rejected(reason) => {
            log_operation(conn, &report.operation, false, Some(&reason.to_string())).map(Some)
        }
        MutationOutcome::Failed(message) => {
            log_operation(conn, &report.operation, false, Some(message)).map(Some)
        }
        MutationOutcome::Skipped => Ok(None),
    }
}

/// Apply one operation and write its audit row in a single transaction, so
/// the audit table and the relations table agree even when a later operation
/// of the same delta fails. `relations` must write through `conn`.
pub fn apply_recorded(
    conn: &Connection,
    relations: &dyn RelationStore,
    gate: &AssetGate<'_>,
    index: usize,
    operation: &DeltaOperation,
) -> OperationReport {
    let attempt = || -> Result<OperationReport> {
        let tx = conn.unchecked_transaction()?;
        let report = apply_operation(relations, gate, index, operation)?;
        log_report(&tx, &report)?;
        tx.commit()?;
        Ok(report)
    };

    attempt().unwrap_or_else(|err| {
        let report = OperationReport::failed(index, operation, &err);
        if let Err(audit_err) = log_report(conn, &report) {
            log::error!("Could not audit failed operation {}: {}", index, audit_err);
        }
        report
    })
}

/// Most recent operations first.
pub fn recent_operations(conn: &Connection, limit: usize) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT operation_id, timestamp, action, source_kind, source_id,
                target_kind, target_id, success, error_message
         FROM relation_operations ORDER BY timestamp DESC, rowid DESC LIMIT ?1",
    )?;
    let entries = stmt
        .query_map(params![limit as i64], |row| {
            Ok(AuditEntry {
                operation_id: row.get(0)?,
                timestamp: row.get(1)?,
                action: row.get(2)?,
                source_kind: row.get(3)?,
                source_id: row.get(4)?,
                target_kind: row.get(5)?,
                target_id: row.get(6)?,
                success: row.get(7)?,
                error_message: row.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(entries)
}
