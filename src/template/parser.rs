//! Template parsing: split the source into text, print and tag segments,
//! parse expressions with the token grammar, then assemble nested blocks.

use std::ops::Range;

use chumsky::prelude::*;
use chumsky::Stream;
use serde_json::Value;

use super::ast::{BinaryOp, Expr, Node, Template, TestKind, UnaryOp};
use super::lexer::{lexer, Token};
use super::sandbox::is_known_tag;
use super::TemplateError;

/// Longest template source accepted, in bytes.
const MAX_TEMPLATE_LEN: usize = 64 * 1024;
/// Deepest block or bracket nesting accepted.
const MAX_NESTING: usize = 64;
/// Most tokens in one expression or tag header.
const MAX_EXPRESSION_TOKENS: usize = 512;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Print(String),
    Tag(String),
}

/// Parse a template source into its syntax tree.
pub(crate) fn parse_template(source: &str) -> Result<Template, TemplateError> {
    if source.len() > MAX_TEMPLATE_LEN {
        log::debug!("Template of {} bytes exceeds {} bytes", source.len(), MAX_TEMPLATE_LEN);
        return Err(TemplateError::Syntax);
    }
    let segments = segment(source)?;
    let mut blocks = BlockParser { segments, pos: 0, depth: 0 };
    let (nodes, terminator) = blocks.parse_nodes(&[])?;
    if let Some((name, _)) = terminator {
        log::debug!("Unexpected {} tag at top level", name);
        return Err(TemplateError::Syntax);
    }
    Ok(Template { nodes })
}

fn find_opener(source: &str) -> Option<usize> {
    source
        .match_indices('{')
        .map(|(i, _)| i)
        .find(|i| matches!(source[i + 1..].chars().next(), Some('{') | Some('%') | Some('#')))
}

/// Position of `closer` outside string literals.
fn find_closer(body: &str, closer: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None if c == '\'' || c == '"' => quote = Some(c),
            None if body[i..].starts_with(closer) => return Some(i),
            None => {}
        }
    }
    None
}

/// Split into segments, applying `{{-`/`-}}` style whitespace control and
/// dropping `{# #}` comments.
fn segment(source: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = source;
    let mut trim_next = false;

    loop {
        let Some(open) = find_opener(rest) else {
            let text = if trim_next { rest.trim_start() } else { rest };
            if !text.is_empty() {
                segments.push(Segment::Text(text.to_string()));
            }
            break;
        };

        let (text, after) = rest.split_at(open);
        let opener = &after[..2];
        let trim_prev = after[2..].starts_with('-');
        let mut text = if trim_next { text.trim_start() } else { text };
        if trim_prev {
            text = text.trim_end();
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text.to_string()));
        }

        let body_and_rest = &after[if trim_prev { 3 } else { 2 }..];
        let end = match opener {
            "{{" => find_closer(body_and_rest, "}}"),
            "{%" => find_closer(body_and_rest, "%}"),
            _ => body_and_rest.find("#}"),
        }
        .ok_or_else(|| {
            log::debug!("Unclosed {} in template", opener);
            TemplateError::Syntax
        })?;

        let mut body = &body_and_rest[..end];
        trim_next = body.ends_with('-');
        if trim_next {
            body = &body[..body.len() - 1];
        }
        match opener {
            "{{" => segments.push(Segment::Print(body.trim().to_string())),
            "{%" => segments.push(Segment::Tag(body.trim().to_string())),
            _ => {}
        }
        rest = &body_and_rest[end + 2..];
    }

    Ok(segments)
}

fn split_tag(body: &str) -> (&str, &str) {
    let end = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(body.len());
    (&body[..end], body[end..].trim())
}

struct BlockParser {
    segments: Vec<Segment>,
    pos: usize,
    depth: usize,
}

type Terminator = Option<(String, String)>;

impl BlockParser {
    /// Parse nodes until one of `terminators` (returned with its arguments)
    /// or the end of input.
    fn parse_nodes(&mut self, terminators: &[&str]) -> Result<(Vec<Node>, Terminator), TemplateError> {
        let mut nodes = Vec::new();
        while self.pos < self.segments.len() {
            let segment = self.segments[self.pos].clone();
            self.pos += 1;
            match segment {
                Segment::Text(text) => nodes.push(Node::Text(text)),
                Segment::Print(body) => nodes.push(Node::Print(parse_expression(&body)?)),
                Segment::Tag(body) => {
                    let (name, args) = split_tag(&body);
                    if terminators.contains(&name) {
                        return Ok((nodes, Some((name.to_string(), args.to_string()))));
                    }
                    match name {
                        "if" => nodes.push(self.nested(|blocks| blocks.parse_if(args))?),
                        "for" => nodes.push(self.nested(|blocks| blocks.parse_for(args))?),
                        "elseif" | "else" | "endif" | "endfor" => {
                            log::debug!("Unexpected {} tag", name);
                            return Err(TemplateError::Syntax);
                        }
                        _ if is_known_tag(name) => nodes.push(Node::Tag(name.to_string())),
                        _ => {
                            log::debug!("Unknown tag {:?}", name);
                            return Err(TemplateError::Syntax);
                        }
                    }
                }
            }
        }
        if terminators.is_empty() {
            Ok((nodes, None))
        } else {
            log::debug!("Template ended before {:?}", terminators);
            Err(TemplateError::Syntax)
        }
    }

    fn nested(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<Node, TemplateError>,
    ) -> Result<Node, TemplateError> {
        if self.depth >= MAX_NESTING {
            log::debug!("Blocks nested deeper than {}", MAX_NESTING);
            return Err(TemplateError::Syntax);
        }
        self.depth += 1;
        let node = parse(self);
        self.depth -= 1;
        node
    }

    fn parse_if(&mut self, args: &str) -> Result<Node, TemplateError> {
        let mut branches = Vec::new();
        let mut cond = parse_expression(args)?;
        loop {
            let (body, terminator) = self.parse_nodes(&["elseif", "else", "endif"])?;
            branches.push((cond, body));
            match terminator {
                Some((name, args)) if name == "elseif" => cond = parse_expression(&args)?,
                Some((name, args)) if name == "else" && args.is_empty() => {
                    let (otherwise, end) = self.parse_nodes(&["endif"])?;
                    expect_bare(end)?;
                    return Ok(Node::If { branches, otherwise });
                }
                end => {
                    expect_bare(end.filter(|(name, _)| name == "endif"))?;
                    return Ok(Node::If { branches, otherwise: Vec::new() });
                }
            }
        }
    }

    fn parse_for(&mut self, args: &str) -> Result<Node, TemplateError> {
        let (key, value, iterable) = parse_tokens(args, for_header())?;
        let (body, terminator) = self.parse_nodes(&["else", "endfor"])?;
        let otherwise = match terminator {
            Some((name, args)) if name == "else" && args.is_empty() => {
                let (otherwise, end) = self.parse_nodes(&["endfor"])?;
                expect_bare(end)?;
                otherwise
            }
            end => {
                expect_bare(end.filter(|(name, _)| name == "endfor"))?;
                Vec::new()
            }
        };
        Ok(Node::For { key, value, iterable, body, otherwise })
    }
}

/// End tags take no arguments.
fn expect_bare(terminator: Terminator) -> Result<(), TemplateError> {
    match terminator {
        Some((_, args)) if args.is_empty() => Ok(()),
        _ => Err(TemplateError::Syntax),
    }
}

pub(crate) fn parse_expression(source: &str) -> Result<Expr, TemplateError> {
    parse_tokens(source, expr_parser())
}

fn parse_tokens<O>(
    source: &str,
    parser: impl Parser<Token, O, Error = Simple<Token>>,
) -> Result<O, TemplateError> {
    let tokens = lexer().parse(source).map_err(|errs| {
        log::debug!("Template lexing failed: {:?}", errs);
        TemplateError::Syntax
    })?;
    check_limits(&tokens)?;
    let eoi = source.chars().count();
    let stream = Stream::from_iter(eoi..eoi + 1, tokens.into_iter());
    parser.then_ignore(end()).parse(stream).map_err(|errs| {
        log::debug!("Template parsing failed: {:?}", errs);
        TemplateError::Syntax
    })
}

/// The grammar and the evaluator recurse once per bracket or conditional, and
/// once per operator in a chain.
fn check_limits(tokens: &[(Token, Range<usize>)]) -> Result<(), TemplateError> {
    if tokens.len() > MAX_EXPRESSION_TOKENS {
        log::debug!("Expression has {} tokens, limit is {}", tokens.len(), MAX_EXPRESSION_TOKENS);
        return Err(TemplateError::Syntax);
    }
    let mut open = 0usize;
    let mut conditionals = 0usize;
    for (token, _) in tokens {
        match token {
            Token::Op("(") | Token::Op("[") | Token::Op("{") => open += 1,
            Token::Op(")") | Token::Op("]") | Token::Op("}") => open = open.saturating_sub(1),
            Token::Op("?") => conditionals += 1,
            _ => {}
        }
        if open + conditionals > MAX_NESTING {
            log::debug!("Expression nested deeper than {}", MAX_NESTING);
            return Err(TemplateError::Syntax);
        }
    }
    Ok(())
}

fn op(symbol: &'static str) -> impl Parser<Token, Token, Error = Simple<Token>> + Clone {
    just(Token::Op(symbol))
}

fn kw(word: &str) -> impl Parser<Token, Token, Error = Simple<Token>> + Clone {
    just(Token::name(word))
}

fn name() -> impl Parser<Token, String, Error = Simple<Token>> + Clone {
    select! { Token::Name(n) => n }
}

fn float_value(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn binary<P, O>(operand: P, ops: O) -> impl Parser<Token, Expr, Error = Simple<Token>> + Clone
where
    P: Parser<Token, Expr, Error = Simple<Token>> + Clone,
    O: Parser<Token, BinaryOp, Error = Simple<Token>> + Clone,
{
    operand
        .clone()
        .then(ops.then(operand).repeated())
        .foldl(|left, (op, right)| Expr::Binary {
            op,
            left: left.boxed(),
            right: right.boxed(),
        })
}

enum Postfix {
    Attr(String),
    Method(String, Vec<Expr>),
    Index(Expr),
    Filter(String, Vec<Expr>),
}

fn expr_parser() -> impl Parser<Token, Expr, Error = Simple<Token>> + Clone {
    recursive(|expr| {
        let args = expr
            .clone()
            .separated_by(op(","))
            .allow_trailing()
            .delimited_by(op("("), op(")"));

        let literal = select! {
            Token::Int(i) => Expr::Literal(Value::from(i)),
            Token::Float(f) => Expr::Literal(float_value(f.0)),
            Token::Str(s) => Expr::Literal(Value::String(s)),
        };

        let ident_or_call = name().then(args.clone().or_not()).map(|(name, args)| match args {
            Some(args) => Expr::Call { name, args },
            None => match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "none" => Expr::Literal(Value::Null),
                _ => Expr::Var(name),
            },
        });

        let array = expr
            .clone()
            .separated_by(op(","))
            .allow_trailing()
            .delimited_by(op("["), op("]"))
            .map(Expr::Array);

        let hash_key = select! {
            Token::Name(n) => n,
            Token::Str(s) => s,
            Token::Int(i) => i.to_string(),
        };
        let hash = hash_key
            .then_ignore(op(":"))
            .then(expr.clone())
            .separated_by(op(","))
            .allow_trailing()
            .delimited_by(op("{"), op("}"))
            .map(Expr::Hash);

        let paren = expr.clone().delimited_by(op("("), op(")"));

        let primary = choice::<_, Simple<Token>>((literal, array, hash, paren, ident_or_call));

        let attr_name = select! {
            Token::Name(n) => n,
            Token::Int(i) => i.to_string(),
        };
        let postfix = choice::<_, Simple<Token>>((
            op(".")
                .ignore_then(attr_name)
                .then(args.clone().or_not())
                .map(|(name, args)| match args {
                    Some(args) => Postfix::Method(name, args),
                    None => Postfix::Attr(name),
                }),
            expr.clone().delimited_by(op("["), op("]")).map(Postfix::Index),
            op("|")
                .ignore_then(name())
                .then(args.clone().or_not())
                .map(|(name, args)| Postfix::Filter(name, args.unwrap_or_default())),
        ));

        let postfixed = primary
            .then(postfix.repeated())
            .foldl(|target, postfix| match postfix {
                Postfix::Attr(name) => Expr::Attr(target.boxed(), name),
                Postfix::Method(name, args) => Expr::MethodCall { target: target.boxed(), name, args },
                Postfix::Index(index) => Expr::Index(target.boxed(), index.boxed()),
                Postfix::Filter(name, args) => Expr::Filter { target: target.boxed(), name, args },
            })
            .boxed();

        let unary = choice::<_, Simple<Token>>((op("-").to(UnaryOp::Neg), op("+").to(UnaryOp::Pos)))
            .repeated()
            .then(postfixed)
            .foldr(|op, expr| Expr::Unary { op, expr: expr.boxed() });

        let test = kw("is")
            .ignore_then(kw("not").or_not().map(|not| not.is_some()))
            .then(name().try_map(|name, span| {
                TestKind::parse(&name).ok_or_else(|| Simple::custom(span, format!("unknown test {}", name)))
            }));
        let tested = unary
            .then(test.or_not())
            .map(|(expr, test)| match test {
                Some((negated, test)) => Expr::Test { expr: expr.boxed(), test, negated },
                None => expr,
            })
            .boxed();

        let mul = binary(
            tested,
            choice::<_, Simple<Token>>((
                op("*").to(BinaryOp::Mul),
                op("//").to(BinaryOp::FloorDiv),
                op("/").to(BinaryOp::Div),
                op("%").to(BinaryOp::Mod),
            )),
        )
        .boxed();
        let concat = binary(mul, op("~").to(BinaryOp::Concat)).boxed();
        let add = binary(
            concat,
            choice::<_, Simple<Token>>((op("+").to(BinaryOp::Add), op("-").to(BinaryOp::Sub))),
        )
        .boxed();
        let range = binary(add, op("..").to(BinaryOp::Range)).boxed();
        let comparison = binary(
            range,
            choice::<_, Simple<Token>>((
                op("==").to(BinaryOp::Eq),
                op("!=").to(BinaryOp::NotEq),
                op("<=").to(BinaryOp::LtEq),
                op(">=").to(BinaryOp::GtEq),
                op("<").to(BinaryOp::Lt),
                op(">").to(BinaryOp::Gt),
                kw("not").then(kw("in")).to(BinaryOp::NotIn),
                kw("in").to(BinaryOp::In),
                kw("starts").then(kw("with")).to(BinaryOp::StartsWith),
                kw("ends").then(kw("with")).to(BinaryOp::EndsWith),
            )),
        )
        .boxed();

        let negated = kw("not")
            .repeated()
            .then(comparison)
            .foldr(|_, expr| Expr::Unary { op: UnaryOp::Not, expr: expr.boxed() })
            .boxed();
        let and = binary(negated, kw("and").to(BinaryOp::And)).boxed();
        let or = binary(and, kw("or").to(BinaryOp::Or)).boxed();

        or.clone()
            .then(
                op("?")
                    .ignore_then(expr.clone())
                    .then(op(":").ignore_then(expr.clone()).or_not())
                    .or_not(),
            )
            .map(|(cond, branch)| match branch {
                Some((then, otherwise)) => Expr::Conditional {
                    cond: cond.boxed(),
                    then: then.boxed(),
                    otherwise: otherwise.map(Expr::boxed),
                },
                None => cond,
            })
    })
}

/// `value in iterable` or `key, value in iterable`.
fn for_header() -> impl Parser<Token, (Option<String>, String, Expr), Error = Simple<Token>> {
    name()
        .then(op(",").ignore_then(name()).or_not())
        .then_ignore(kw("in"))
        .then(expr_parser())
        .map(|((first, second), iterable)| match second {
            Some(value) => (Some(first), value, iterable),
            None => (None, first, iterable),
        })
}
