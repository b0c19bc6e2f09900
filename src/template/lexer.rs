//! Tokenizer for expressions inside `{{ }}` and `{% %}`.

use chumsky::prelude::*;
use std::hash::{Hash, Hasher};
use std::ops::Range;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Float(pub f64);

impl PartialEq for Float {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Float {}

impl Hash for Float {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.to_bits());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Token {
    Name(String),
    Int(i64),
    Float(Float),
    Str(String),
    Op(&'static str),
}

impl Token {
    pub fn name(value: &str) -> Token {
        Token::Name(value.to_string())
    }
}

fn quoted(quote: char) -> impl Parser<char, String, Error = Simple<char>> + Clone {
    let escape = just('\\').ignore_then(any()).map(|c| match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        other => other,
    });
    just(quote)
        .ignore_then(
            filter(move |c: &char| *c != quote && *c != '\\')
                .or(escape)
                .repeated()
                .collect::<String>(),
        )
        .then_ignore(just(quote))
}

pub(crate) fn lexer() -> impl Parser<char, Vec<(Token, Range<usize>)>, Error = Simple<char>> {
    let number = text::int(10)
        .then(just('.').ignore_then(text::digits(10)).or_not())
        .try_map(|(int_part, frac): (String, Option<String>), span| match frac {
            Some(frac) => format!("{}.{}", int_part, frac)
                .parse::<f64>()
                .map(|v| Token::Float(Float(v)))
                .map_err(|_| Simple::custom(span, "invalid number literal")),
            None => int_part
                .parse::<i64>()
                .map(Token::Int)
                .map_err(|_| Simple::custom(span, "integer literal out of range")),
        });

    let string = quoted('\'').or(quoted('"')).map(Token::Str);

    let long_op = choice::<_, Simple<char>>((
        just("//").to(Token::Op("//")),
        just("==").to(Token::Op("==")),
        just("!=").to(Token::Op("!=")),
        just("<=").to(Token::Op("<=")),
        just(">=").to(Token::Op(">=")),
        just("..").to(Token::Op("..")),
    ));

    let short_op = filter_map(|span, c: char| {
        let op = match c {
            '+' => "+",
            '-' => "-",
            '*' => "*",
            '/' => "/",
            '%' => "%",
            '~' => "~",
            '<' => "<",
            '>' => ">",
            '(' => "(",
            ')' => ")",
            '[' => "[",
            ']' => "]",
            '{' => "{",
            '}' => "}",
            ',' => ",",
            '.' => ".",
            '|' => "|",
            ':' => ":",
            '?' => "?",
            '=' => "=",
            _ => return Err(Simple::custom(span, format!("unexpected character {:?}", c))),
        };
        Ok(Token::Op(op))
    });

    let ident = text::ident().map(Token::Name);

    choice::<_, Simple<char>>((number, string, long_op, short_op, ident))
        .map_with_span(|tok, span| (tok, span))
        .padded()
        .repeated()
        .then_ignore(end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        lexer()
            .parse(source)
            .unwrap()
            .into_iter()
            .map(|(t, _)| t)
            .collect()
    }

    #[test]
    fn test_lex_path_and_filter() {
        assert_eq!(
            tokens("ticket.requesters|length > 1"),
            vec![
                Token::name("ticket"),
                Token::Op("."),
                Token::name("requesters"),
                Token::Op("|"),
                Token::name("length"),
                Token::Op(">"),
                Token::Int(1),
            ]
        );
    }

    #[test]
    fn test_lex_numbers_and_range() {
        assert_eq!(
            tokens("1..3 2.5"),
            vec![Token::Int(1), Token::Op(".."), Token::Int(3), Token::Float(Float(2.5))]
        );
    }

    #[test]
    fn test_lex_strings_with_escapes() {
        assert_eq!(
            tokens(r#"'it\'s' "a\nb""#),
            vec![Token::Str("it's".to_string()), Token::Str("a\nb".to_string())]
        );
    }

    #[test]
    fn test_lex_rejects_unknown_characters() {
        assert!(lexer().parse("a; b").is_err());
        assert!(lexer().parse("'open").is_err());
    }
}
