//! Security policy applied to a parsed template before it is evaluated.
//!
//! Names outside the engine's vocabulary are grammar errors. Names the engine
//! knows but the policy does not allow are policy violations. Checks run in
//! the order tags, filters, functions, methods.

use std::fmt;

use super::ast::{Expr, Node, Template};
use super::TemplateError;

pub(crate) const ALLOWED_TAGS: &[&str] = &["if", "elseif", "else", "endif", "for", "endfor"];

pub(crate) const ALLOWED_FILTERS: &[&str] = &[
    "escape", "e", "lower", "upper", "capitalize", "title", "date", "length", "round", "trim", "raw",
];

pub(crate) const ALLOWED_FUNCTIONS: &[&str] = &["date", "min", "max", "random", "range"];

/// Tags of the full template language that this engine recognises.
const KNOWN_TAGS: &[&str] = &[
    "apply", "endapply", "autoescape", "endautoescape", "block", "endblock", "cache", "endcache",
    "deprecated", "do", "embed", "endembed", "extends", "filter", "endfilter", "flush", "from",
    "guard", "endguard", "import", "include", "macro", "endmacro", "sandbox", "endsandbox", "set",
    "endset", "spaceless", "endspaceless", "use", "verbatim", "endverbatim", "with", "endwith",
];

const KNOWN_FILTERS: &[&str] = &[
    "abs", "batch", "column", "convert_encoding", "country_name", "currency_name",
    "currency_symbol", "data_uri", "date_modify", "default", "filter", "first", "format",
    "format_currency", "format_date", "format_datetime", "format_number", "format_time",
    "html_to_markdown", "inky_to_html", "inline_css", "join", "json_encode", "keys",
    "language_name", "last", "locale_name", "map", "markdown_to_html", "merge", "nl2br",
    "number_format", "reduce", "replace", "reverse", "slice", "slug", "sort", "spaceless", "split",
    "striptags", "timezone_name", "u", "url_encode",
];

const KNOWN_FUNCTIONS: &[&str] = &[
    "attribute", "block", "constant", "cycle", "dump", "html_classes", "include", "parent",
    "source", "template_from_string", "country_timezones",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Construct {
    Tag(String),
    Filter(String),
    Function(String),
    Method(String),
}

impl fmt::Display for Construct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Construct::Tag(name) => write!(f, "tag \"{}\"", name),
            Construct::Filter(name) => write!(f, "filter \"{}\"", name),
            Construct::Function(name) => write!(f, "function \"{}\"", name),
            Construct::Method(name) => write!(f, "method \"{}\"", name),
        }
    }
}

pub(crate) fn is_known_tag(name: &str) -> bool {
    KNOWN_TAGS.contains(&name)
}

#[derive(Default)]
struct Usage {
    tags: Vec<String>,
    filters: Vec<String>,
    functions: Vec<String>,
    methods: Vec<String>,
}

impl Usage {
    fn node(&mut self, node: &Node) {
        match node {
            Node::Text(_) => {}
            Node::Print(expr) => self.expr(expr),
            Node::If { branches, otherwise } => {
                self.tags.push("if".to_string());
                for (cond, body) in branches {
                    self.expr(cond);
                    body.iter().for_each(|n| self.node(n));
                }
                otherwise.iter().for_each(|n| self.node(n));
            }
            Node::For { iterable, body, otherwise, .. } => {
                self.tags.push("for".to_string());
                self.expr(iterable);
                body.iter().for_each(|n| self.node(n));
                otherwise.iter().for_each(|n| self.node(n));
            }
            Node::Tag(name) => self.tags.push(name.clone()),
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(_) | Expr::Var(_) => {}
            Expr::Array(items) => items.iter().for_each(|e| self.expr(e)),
            Expr::Hash(pairs) => pairs.iter().for_each(|(_, e)| self.expr(e)),
            Expr::Attr(target, _) => self.expr(target),
            Expr::Index(target, index) => {
                self.expr(target);
                self.expr(index);
            }
            Expr::MethodCall { target, name, args } => {
                self.expr(target);
                self.methods.push(name.clone());
                args.iter().for_each(|e| self.expr(e));
            }
            Expr::Filter { target, name, args } => {
                self.expr(target);
                self.filters.push(name.clone());
                args.iter().for_each(|e| self.expr(e));
            }
            Expr::Call { name, args } => {
                self.functions.push(name.clone());
                args.iter().for_each(|e| self.expr(e));
            }
            Expr::Unary { expr, .. } => self.expr(expr),
            Expr::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Test { expr, .. } => self.expr(expr),
            Expr::Conditional { cond, then, otherwise } => {
                self.expr(cond);
                self.expr(then);
                if let Some(otherwise) = otherwise {
                    self.expr(otherwise);
                }
            }
        }
    }
}

/// Reject the template if it uses anything outside the policy.
pub(crate) fn check(template: &Template) -> Result<(), TemplateError> {
    let mut usage = Usage::default();
    template.nodes.iter().for_each(|n| usage.node(n));

    for name in &usage.filters {
        if !ALLOWED_FILTERS.contains(&name.as_str()) && !KNOWN_FILTERS.contains(&name.as_str()) {
            log::debug!("Unknown filter {} in template", name);
            return Err(TemplateError::Syntax);
        }
    }
    for name in &usage.functions {
        if !ALLOWED_FUNCTIONS.contains(&name.as_str()) && !KNOWN_FUNCTIONS.contains(&name.as_str()) {
            log::debug!("Unknown function {} in template", name);
            return Err(TemplateError::Syntax);
        }
    }

    let violation = usage
        .tags
        .iter()
        .find(|n| !ALLOWED_TAGS.contains(&n.as_str()))
        .map(|n| Construct::Tag(n.clone()))
        .or_else(|| {
            usage
                .filters
                .iter()
                .find(|n| !ALLOWED_FILTERS.contains(&n.as_str()))
                .map(|n| Construct::Filter(n.clone()))
        })
        .or_else(|| {
            usage
                .functions
                .iter()
                .find(|n| !ALLOWED_FUNCTIONS.contains(&n.as_str()))
                .map(|n| Construct::Function(n.clone()))
        })
        .or_else(|| usage.methods.first().map(|n| Construct::Method(n.clone())));

    match violation {
        Some(construct) => Err(TemplateError::PolicyViolation { construct }),
        None => Ok(()),
    }
}
