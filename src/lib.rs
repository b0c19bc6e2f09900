pub mod api;
pub mod assets;
pub mod cache;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod template;

#[cfg(test)]
mod test_helpers;

pub use assets::{AssetGate, AssetRef, Entity, KindRegistry};
pub use config::Config;
pub use error::{ImpactError, Result};
pub use graph::{GraphBuilder, ImpactGraph, Relation};
pub use template::{TemplateEngine, TemplateError};
