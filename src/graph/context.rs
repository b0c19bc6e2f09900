//! Saved per-asset view settings for the interactive graph.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::assets::AssetRef;
use crate::error::{ImpactError, Result};

pub const DEFAULT_FORWARD_COLOR: &str = "#ff3418";
pub const DEFAULT_BACKWARD_COLOR: &str = "#1c76ff";
pub const DEFAULT_BOTH_COLOR: &str = "#ca29ff";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodePosition {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactContext {
    pub kind: String,
    pub id: i64,
    #[serde(default)]
    pub positions: BTreeMap<String, NodePosition>,
    #[serde(default = "default_zoom")]
    pub zoom: f64,
    #[serde(default)]
    pub pan_x: f64,
    #[serde(default)]
    pub pan_y: f64,
    #[serde(default = "default_true")]
    pub show_forward: bool,
    #[serde(default = "default_true")]
    pub show_backward: bool,
    #[serde(default = "default_forward_color")]
    pub forward_color: String,
    #[serde(default = "default_backward_color")]
    pub backward_color: String,
    #[serde(default = "default_both_color")]
    pub both_color: String,
    #[serde(default)]
    pub max_depth: Option<u32>,
}

fn default_zoom() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_forward_color() -> String {
    DEFAULT_FORWARD_COLOR.to_string()
}

fn default_backward_color() -> String {
    DEFAULT_BACKWARD_COLOR.to_string()
}

fn default_both_color() -> String {
    DEFAULT_BOTH_COLOR.to_string()
}

fn color_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("Invalid regex pattern"))
}

impl ImpactContext {
    pub fn defaults_for(asset: &AssetRef) -> Self {
        Self {
            kind: asset.kind.clone(),
            id: asset.id,
            positions: BTreeMap::new(),
            zoom: default_zoom(),
            pan_x: 0.0,
            pan_y: 0.0,
            show_forward: true,
            show_backward: true,
            forward_color: default_forward_color(),
            backward_color: default_backward_color(),
            both_color: default_both_color(),
            max_depth: None,
        }
    }

    pub fn asset_ref(&self) -> AssetRef {
        AssetRef::new(self.kind.clone(), self.id)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, color) in [
            ("forwardColor", &self.forward_color),
            ("backwardColor", &self.backward_color),
            ("bothColor", &self.both_color),
        ] {
            if !color_pattern().is_match(color) {
                return Err(ImpactError::Validation(format!("{} must be a #rrggbb colour", name)));
            }
        }
        if !(self.zoom.is_finite() && self.zoom > 0.0) {
            return Err(ImpactError::Validation("zoom must be a positive number".to_string()));
        }
        if !(self.pan_x.is_finite() && self.pan_y.is_finite()) {
            return Err(ImpactError::Validation("pan must be finite".to_string()));
        }
        if self.positions.values().any(|p| !(p.x.is_finite() && p.y.is_finite())) {
            return Err(ImpactError::Validation("node positions must be finite".to_string()));
        }
        Ok(())
    }
}

/// Saved context for `asset`, or the defaults when nothing is stored.
pub fn load_context(conn: &Connection, asset: &AssetRef) -> Result<ImpactContext> {
    let row = conn
        .query_row(
            "SELECT positions_json, zoom, pan_x, pan_y, show_forward, show_backward,
                    forward_color, backward_color, both_color, max_depth
             FROM impact_contexts WHERE asset_kind = ?1 AND asset_id = ?2",
            params![asset.kind, asset.id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    ImpactContext {
                        kind: asset.kind.clone(),
                        id: asset.id,
                        positions: BTreeMap::new(),
                        zoom: row.get(1)?,
                        pan_x: row.get(2)?,
                        pan_y: row.get(3)?,
                        show_forward: row.get(4)?,
                        show_backward: row.get(5)?,
                        forward_color: row.get(6)?,
                        backward_color: row.get(7)?,
                        both_color: row.get(8)?,
                        max_depth: row.get(9)?,
                    },
                ))
            },
        )
        .optional()?;

    let Some((positions_json, mut context)) = row else {
        return Ok(ImpactContext::defaults_for(asset));
    };
    context.positions = match serde_json::from_str(&positions_json) {
        Ok(positions) => positions,
        Err(e) => {
            log::warn!("Discarding unreadable node positions for {}: {}", asset, e);
            BTreeMap::new()
        }
    };
    Ok(context)
}

pub fn save_context(conn: &Connection, context: &ImpactContext) -> Result<()> {
    context.validate()?;
    let positions = serde_json::to_string(&context.positions)
        .map_err(|e| ImpactError::Unexpected(format!("Failed to encode positions: {}", e)))?;
    conn.execute(
        "INSERT INTO impact_contexts (
            asset_kind, asset_id, positions_json, zoom, pan_x, pan_y,
            show_forward, show_backward, forward_color, backward_color, both_color,
            max_depth, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, CURRENT_TIMESTAMP)
         ON CONFLICT(asset_kind, asset_id) DO UPDATE SET
            positions_json = excluded.positions_json,
            zoom = excluded.zoom,
            pan_x = excluded.pan_x,
            pan_y = excluded.pan_y,
            show_forward = excluded.show_forward,
            show_backward = excluded.show_backward,
            forward_color = excluded.forward_color,
            backward_color = excluded.backward_color,
            both_color = excluded.both_color,
            max_depth = excluded.max_depth,
            updated_at = CURRENT_TIMESTAMP",
        params![
            context.kind,
            context.id,
            positions,
            context.zoom,
            context.pan_x,
            context.pan_y,
            context.show_forward,
            context.show_backward,
            context.forward_color,
            context.backward_color,
            context.both_color,
            context.max_depth
        ],
    )?;
    log::debug!("Saved impact context for {}", context.asset_ref());
    Ok(())
}
