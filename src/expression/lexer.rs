//! Template splitting and expression tokenizing
//!
//! A template is split into literal and `{...}` segments first. Each
//! expression segment is then tokenized and rewritten so that bare variable
//! access turns into scope lookups:
//!
//! | written               | evaluated as                    |
//! |-----------------------|---------------------------------|
//! | `a.b.c`               | `get("a.b.c")`                  |
//! | `a.b.trim()`          | `get("a.b").trim()`             |
//! | `isset(a.b)`          | `isset("a.b")`                  |
//! | `confirm("Sure?")`    | `call("confirm", "Sure?")`      |

use crate::error::{ExpressionError, ExpressionResult};
use once_cell::sync::Lazy;
use regex::Regex;

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+(?:\.[0-9]+)?").unwrap());
static STRING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?s)(?:"([^"\\]*(?:\\.[^"\\]*)*)"|'([^'\\]*(?:\\.[^'\\]*)*)')"#).unwrap()
});
static NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_\x{80}-\x{10FFFF}][A-Za-z0-9_\x{80}-\x{10FFFF}]*").unwrap()
});

/// Symbolic operators, longest first
const SYMBOL_OPERATORS: &[&str] = &[
    "!==", "===", "==", "!=", ">=", "<=", "**", "..", "&&", "||", "*", "~", "%", "/", ">", "<",
    "|", "!", "^", "&", "+", "-",
];

/// Word operators; these need a following space or `(` to count as operators
const WORD_OPERATORS: &[&str] = &["not in", "not", "and", "or", "in", "matches"];

/// One piece of a template
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Literal text, still carrying its `\{`/`\}` escapes
    Literal(String),
    /// Expression source between the outermost braces
    Expression { source: String, offset: usize },
}

/// Split a template on balanced, unescaped braces
///
/// Braces inside quoted strings of an expression do not count.
pub fn split_template(input: &str) -> ExpressionResult<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut opened_at = 0usize;
    let mut previous: Option<char> = None;
    let mut quote: Option<char> = None;
    let mut quote_escape = false;

    for (cursor, c) in input.char_indices() {
        let escaped = previous == Some('\\');
        previous = Some(c);

        if let Some(open) = quote {
            if quote_escape {
                quote_escape = false;
            } else if c == '\\' {
                quote_escape = true;
            } else if c == open {
                quote = None;
            }
            current.push(c);
            continue;
        }

        match c {
            '\'' | '"' if depth > 0 => quote = Some(c),
            '{' if !escaped => {
                depth += 1;
                if depth == 1 {
                    if !current.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut current)));
                    }
                    opened_at = cursor;
                    continue;
                }
            }
            '}' if !escaped => {
                if depth == 0 {
                    return Err(ExpressionError::UnopenedExpression { cursor });
                }
                depth -= 1;
                if depth == 0 {
                    segments.push(Segment::Expression {
                        source: std::mem::take(&mut current),
                        offset: opened_at + 1,
                    });
                    continue;
                }
            }
            _ => {}
        }
        current.push(c);
    }

    if depth > 0 {
        return Err(ExpressionError::UnclosedExpression { cursor: opened_at });
    }
    if !current.is_empty() {
        segments.push(Segment::Literal(current));
    }
    Ok(segments)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Name,
    Number,
    String,
    Operator,
    Punctuation,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub cursor: usize,
}

impl Token {
    fn new(kind: TokenKind, value: impl Into<String>, cursor: usize) -> Self {
        Token {
            kind,
            value: value.into(),
            cursor,
        }
    }

    pub fn is(&self, kind: TokenKind, value: &str) -> bool {
        self.kind == kind && self.value == value
    }

    pub fn is_punctuation(&self, value: &str) -> bool {
        self.is(TokenKind::Punctuation, value)
    }
}

fn syntax(message: impl Into<String>, cursor: usize) -> ExpressionError {
    ExpressionError::Syntax {
        message: message.into(),
        cursor,
    }
}

fn is_identifier(value: &str) -> bool {
    NAME.find(value).map(|m| m.end() == value.len()).unwrap_or(false)
}

/// Match an operator at the start of `rest`
fn match_operator(rest: &str) -> Option<&'static str> {
    for word in WORD_OPERATORS {
        if let Some(after) = rest.strip_prefix(word) {
            let next = after.chars().next();
            let delimited = match *word {
                "matches" => !next.map(|c| c.is_alphanumeric() || c == '_').unwrap_or(false),
                _ => matches!(next, Some(c) if c.is_whitespace() || c == '('),
            };
            if delimited {
                return Some(word);
            }
        }
    }
    SYMBOL_OPERATORS.iter().copied().find(|op| rest.starts_with(op))
}

/// Resolve backslash escapes inside a quoted string
fn unescape_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Tokenize one expression fragment
pub fn tokenize(expression: &str) -> ExpressionResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut brackets: Vec<(char, usize)> = Vec::new();
    let mut cursor = 0;

    while cursor < expression.len() {
        let rest = &expression[cursor..];
        let Some(c) = rest.chars().next() else {
            break;
        };

        if c.is_whitespace() {
            cursor += c.len_utf8();
            continue;
        }

        if let Some(m) = NUMBER.find(rest) {
            tokens.push(Token::new(TokenKind::Number, m.as_str(), cursor));
            cursor += m.end();
            continue;
        }

        match c {
            '(' | '[' | '{' => {
                brackets.push((c, cursor));
                tokens.push(Token::new(TokenKind::Punctuation, c.to_string(), cursor));
                cursor += 1;
                continue;
            }
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match brackets.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, at)) => {
                        return Err(syntax(format!("Unclosed \"{}\"", open), at));
                    }
                    None => return Err(syntax(format!("Unexpected \"{}\"", c), cursor)),
                }
                tokens.push(Token::new(TokenKind::Punctuation, c.to_string(), cursor));
                cursor += 1;
                continue;
            }
            _ => {}
        }

        if let Some(captures) = STRING.captures(rest) {
            let whole = captures.get(0).map(|m| m.end()).unwrap_or(0);
            let inner = captures
                .get(1)
                .or_else(|| captures.get(2))
                .map(|m| m.as_str())
                .unwrap_or("");
            tokens.push(Token::new(TokenKind::String, unescape_string(inner), cursor));
            cursor += whole;
            continue;
        }

        if let Some(op) = match_operator(rest) {
            tokens.push(Token::new(TokenKind::Operator, op, cursor));
            cursor += op.len();
            continue;
        }

        if matches!(c, '.' | ',' | '?' | ':') {
            tokens.push(Token::new(TokenKind::Punctuation, c.to_string(), cursor));
            cursor += 1;
            continue;
        }

        if let Some(m) = NAME.find(rest) {
            tokens.push(Token::new(TokenKind::Name, m.as_str(), cursor));
            cursor += m.end();
            continue;
        }

        return Err(syntax(format!("Unexpected character \"{}\"", c), cursor));
    }

    if let Some((open, at)) = brackets.pop() {
        return Err(syntax(format!("Unclosed \"{}\"", open), at));
    }

    tokens.push(Token::new(TokenKind::Eof, "", expression.len()));
    Ok(tokens)
}

/// A dotted access chain collected by [`rewrite`]
struct Chain {
    names: Vec<String>,
    /// Trailing segment that is followed by `(`
    method: Option<Token>,
    /// Index of the first token after the chain
    next: usize,
}

fn collect_chain(tokens: &[Token], start: usize) -> ExpressionResult<Chain> {
    let mut names = vec![tokens[start].value.clone()];
    let mut index = start + 1;
    let mut method = None;

    while tokens[index].is_punctuation(".") {
        let segment = &tokens[index + 1];
        let valid = match segment.kind {
            TokenKind::Name => true,
            TokenKind::Number => true,
            // "not" and "matches" are fine as property names
            TokenKind::Operator => is_identifier(&segment.value),
            _ => false,
        };
        if !valid {
            return Err(syntax("Expected name", segment.cursor));
        }
        index += 2;
        if tokens[index].is_punctuation("(") {
            method = Some(segment.clone());
            break;
        }
        names.push(segment.value.clone());
    }

    Ok(Chain {
        names,
        method,
        next: index,
    })
}

fn is_literal_name(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "null" | "true" | "false"
    )
}

/// Rewrite bare variable access and function calls into scope lookups
pub fn rewrite(tokens: Vec<Token>) -> ExpressionResult<Vec<Token>> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut brackets: Vec<String> = Vec::new();
    let mut previous_was_dot = false;
    let mut index = 0;

    while index < tokens.len() {
        let token = &tokens[index];

        if token.kind != TokenKind::Name || previous_was_dot {
            match token.value.as_str() {
                "(" | "[" | "{" if token.kind == TokenKind::Punctuation => {
                    brackets.push(token.value.clone())
                }
                ")" | "]" | "}" if token.kind == TokenKind::Punctuation => {
                    brackets.pop();
                }
                _ => {}
            }
            previous_was_dot = token.is_punctuation(".");
            out.push(token.clone());
            index += 1;
            continue;
        }

        let cursor = token.cursor;

        if is_literal_name(&token.value) {
            out.push(token.clone());
            index += 1;
            continue;
        }

        // Hash keys stay plain names: `{key: value}`
        let in_hash = brackets.last().map(|b| b == "{").unwrap_or(false);
        let after_separator = out
            .last()
            .map(|t| t.is_punctuation("{") || t.is_punctuation(","))
            .unwrap_or(false);
        if in_hash && after_separator && tokens[index + 1].is_punctuation(":") {
            out.push(token.clone());
            index += 1;
            continue;
        }

        if tokens[index + 1].is_punctuation("(") {
            brackets.push("(".to_string());

            if token.value == "isset" || token.value == "empty" {
                out.push(token.clone());
                out.push(tokens[index + 1].clone());
                let start = index + 2;
                if tokens[start].kind != TokenKind::Name {
                    return Err(syntax("Expected name", tokens[start].cursor));
                }
                let chain = collect_chain(&tokens, start)?;
                if chain.method.is_some() {
                    return Err(syntax(
                        "Can't use function return value in write context",
                        tokens[chain.next].cursor,
                    ));
                }
                if !tokens[chain.next].is_punctuation(")") {
                    return Err(syntax("Expected )", tokens[chain.next].cursor));
                }
                out.push(Token::new(
                    TokenKind::String,
                    chain.names.join("."),
                    tokens[start].cursor,
                ));
                index = chain.next;
                continue;
            }

            out.push(Token::new(TokenKind::Name, "call", cursor));
            out.push(Token::new(TokenKind::Punctuation, "(", cursor));
            out.push(Token::new(TokenKind::String, token.value.clone(), cursor));
            index += 2;
            if !tokens[index].is_punctuation(")") {
                out.push(Token::new(TokenKind::Punctuation, ",", cursor));
            }
            continue;
        }

        let chain = collect_chain(&tokens, index)?;
        out.push(Token::new(TokenKind::Name, "get", cursor));
        out.push(Token::new(TokenKind::Punctuation, "(", cursor));
        out.push(Token::new(TokenKind::String, chain.names.join("."), cursor));
        out.push(Token::new(TokenKind::Punctuation, ")", cursor));
        if let Some(method) = chain.method {
            out.push(Token::new(TokenKind::Punctuation, ".", method.cursor));
            out.push(Token::new(TokenKind::Name, method.value, method.cursor));
        }
        index = chain.next;
    }

    Ok(out)
}

/// Tokenize and rewrite an expression fragment
pub fn lex(expression: &str) -> ExpressionResult<Vec<Token>> {
    rewrite(tokenize(expression)?)
}
