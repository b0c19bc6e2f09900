//! Sandboxed rendering of user-authored notification templates.
//!
//! A template goes through four stages: parse, sandbox check, evaluation
//! against a plain value tree, and output sanitizing. Sandbox failures are
//! reported as [`TemplateError::PolicyViolation`] naming the construct; every
//! other failure collapses into [`TemplateError::Syntax`], whose message never
//! reveals parser internals.

mod ast;
mod builtin;
mod filters;
mod lexer;
mod parser;
mod render;
mod sandbox;
mod sanitize;
mod schema;

pub use builtin::{
    asset_schema, builtin_schemas, group_schema, location_schema, ticket_schema, user_schema,
};
pub use sandbox::Construct;
pub use sanitize::{sanitize_html, OutputMode};
pub use schema::{
    AvailableParameter, ParameterNode, SchemaProvider, SchemaRegistry, TemplateSchema, Transform,
};

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template uses {construct}, which is not allowed")]
    PolicyViolation { construct: Construct },

    #[error("Invalid template syntax")]
    Syntax,
}

impl TemplateError {
    /// Stable identifier for API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            TemplateError::PolicyViolation { .. } => "policy_violation",
            TemplateError::Syntax => "syntax",
        }
    }
}

/// A rejected template, returned with the submitted content so the author can
/// fix it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{error}")]
pub struct ValidationFailure {
    pub content: String,
    pub error: TemplateError,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateEngine {
    mode: OutputMode,
}

impl TemplateEngine {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn render(&self, source: &str, values: &Value) -> Result<String, TemplateError> {
        let template = parser::parse_template(source)?;
        sandbox::check(&template)?;
        let raw = render::evaluate(&template, values)?;
        Ok(sanitize::finish(&raw, self.mode))
    }

    /// Parse, check and trial-render against an empty value tree.
    pub fn validate(&self, source: &str) -> Result<(), ValidationFailure> {
        self.render(source, &Value::Object(Map::new()))
            .map(|_| ())
            .map_err(|error| ValidationFailure {
                content: source.to_string(),
                error,
            })
    }
}
