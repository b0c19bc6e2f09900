//! Post-render cleanup of unsafe HTML.

use std::sync::OnceLock;

use ammonia::Builder;
use serde::{Deserialize, Serialize};

use super::filters::escape_html;

/// Where rendered content is headed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Shown directly in a page.
    #[default]
    Display,
    /// Stored and shown later; the whole output is HTML-encoded.
    Storage,
}

fn sanitizer() -> &'static Builder<'static> {
    static SANITIZER: OnceLock<Builder<'static>> = OnceLock::new();
    SANITIZER.get_or_init(Builder::default)
}

/// Reparse the output and keep only allow-listed tags, attributes and URL
/// schemes. Script and style elements are dropped with their content.
pub fn sanitize_html(html: &str) -> String {
    sanitizer().clean(html).to_string()
}

pub fn finish(html: &str, mode: OutputMode) -> String {
    let clean = sanitize_html(html);
    match mode {
        OutputMode::Display => clean,
        OutputMode::Storage => escape_html(&clean),
    }
}
