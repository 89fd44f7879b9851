//! Expression parser
//!
//! Precedence climbing over the rewritten token stream. Operator precedence
//! (higher binds tighter):
//!
//! | operators                                        | precedence |
//! |--------------------------------------------------|------------|
//! | `or` `\|\|`                                      | 10         |
//! | `and` `&&`                                       | 15         |
//! | `\|`, `^`, `&`                                   | 16-18      |
//! | `==` `===` `!=` `!==` `<` `>` `<=` `>=` `in` `not in` `matches` | 20 |
//! | `..`                                             | 25         |
//! | `+` `-`                                          | 30         |
//! | `~`                                              | 40         |
//! | `*` `/` `%`                                      | 60         |
//! | unary `not` `!`                                  | 50         |
//! | unary `-` `+`                                    | 500        |
//! | `**` (right associative)                         | 200        |

use crate::error::{ExpressionError, ExpressionResult};
use crate::expression::lexer::{Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    BitOr,
    BitXor,
    BitAnd,
    Equal,
    Identical,
    NotEqual,
    NotIdentical,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    In,
    NotIn,
    Matches,
    Range,
    Add,
    Subtract,
    Concat,
    Multiply,
    Divide,
    Modulo,
    Power,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HashKey {
    Static(String),
    Dynamic(Expr),
}

/// Parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Expr>),
    Hash(Vec<(HashKey, Expr)>),
    Function {
        name: String,
        args: Vec<Expr>,
    },
    Method {
        target: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Property {
        target: Box<Expr>,
        name: String,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `cond ? then : otherwise`; a missing `then` reuses the condition (`?:`)
    Conditional {
        condition: Box<Expr>,
        then: Option<Box<Expr>>,
        otherwise: Box<Expr>,
    },
}

fn unary_operator(value: &str) -> Option<(UnaryOp, u32)> {
    match value {
        "not" | "!" => Some((UnaryOp::Not, 50)),
        "-" => Some((UnaryOp::Negate, 500)),
        "+" => Some((UnaryOp::Plus, 500)),
        _ => None,
    }
}

/// Binary operator, its precedence and whether it is left associative
fn binary_operator(value: &str) -> Option<(BinaryOp, u32, bool)> {
    let op = match value {
        "or" | "||" => (BinaryOp::Or, 10, true),
        "and" | "&&" => (BinaryOp::And, 15, true),
        "|" => (BinaryOp::BitOr, 16, true),
        "^" => (BinaryOp::BitXor, 17, true),
        "&" => (BinaryOp::BitAnd, 18, true),
        "==" => (BinaryOp::Equal, 20, true),
        "===" => (BinaryOp::Identical, 20, true),
        "!=" => (BinaryOp::NotEqual, 20, true),
        "!==" => (BinaryOp::NotIdentical, 20, true),
        "<" => (BinaryOp::Less, 20, true),
        ">" => (BinaryOp::Greater, 20, true),
        "<=" => (BinaryOp::LessOrEqual, 20, true),
        ">=" => (BinaryOp::GreaterOrEqual, 20, true),
        "in" => (BinaryOp::In, 20, true),
        "not in" => (BinaryOp::NotIn, 20, true),
        "matches" => (BinaryOp::Matches, 20, true),
        ".." => (BinaryOp::Range, 25, true),
        "+" => (BinaryOp::Add, 30, true),
        "-" => (BinaryOp::Subtract, 30, true),
        "~" => (BinaryOp::Concat, 40, true),
        "*" => (BinaryOp::Multiply, 60, true),
        "/" => (BinaryOp::Divide, 60, true),
        "%" => (BinaryOp::Modulo, 60, true),
        "**" => (BinaryOp::Power, 200, false),
        _ => return None,
    };
    Some(op)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

/// Parse a rewritten token stream into an expression tree
pub fn parse(tokens: Vec<Token>) -> ExpressionResult<Expr> {
    let mut parser = Parser {
        tokens,
        position: 0,
    };
    let expr = parser.expression(0)?;
    let current = parser.current();
    if current.kind != TokenKind::Eof {
        return Err(ExpressionError::Syntax {
            message: format!("Unexpected token \"{}\"", current.value),
            cursor: current.cursor,
        });
    }
    Ok(expr)
}

impl Parser {
    fn current(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.position.min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Syntax {
            message: message.into(),
            cursor: self.current().cursor,
        }
    }

    fn expect_punctuation(&mut self, value: &str) -> ExpressionResult<()> {
        if !self.current().is_punctuation(value) {
            let found = self.current().value.clone();
            return Err(self.error(format!("Expected \"{}\", found \"{}\"", value, found)));
        }
        self.advance();
        Ok(())
    }

    fn expression(&mut self, precedence: u32) -> ExpressionResult<Expr> {
        let mut expr = self.primary()?;

        loop {
            let token = self.current();
            if token.kind != TokenKind::Operator {
                break;
            }
            let Some((op, op_precedence, left_assoc)) = binary_operator(&token.value) else {
                break;
            };
            if op_precedence < precedence {
                break;
            }
            self.advance();
            let next_precedence = if left_assoc {
                op_precedence + 1
            } else {
                op_precedence
            };
            let right = self.expression(next_precedence)?;
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }

        if precedence == 0 {
            return self.conditional(expr);
        }
        Ok(expr)
    }

    fn conditional(&mut self, mut expr: Expr) -> ExpressionResult<Expr> {
        while self.current().is_punctuation("?") {
            self.advance();
            if self.current().is_punctuation(":") {
                self.advance();
                let otherwise = self.expression(0)?;
                expr = Expr::Conditional {
                    condition: Box::new(expr),
                    then: None,
                    otherwise: Box::new(otherwise),
                };
                continue;
            }

            let then = self.expression(0)?;
            let otherwise = if self.current().is_punctuation(":") {
                self.advance();
                self.expression(0)?
            } else {
                Expr::Null
            };
            expr = Expr::Conditional {
                condition: Box::new(expr),
                then: Some(Box::new(then)),
                otherwise: Box::new(otherwise),
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> ExpressionResult<Expr> {
        let token = self.current().clone();

        if token.kind == TokenKind::Operator {
            if let Some((op, precedence)) = unary_operator(&token.value) {
                self.advance();
                let operand = self.expression(precedence)?;
                return self.postfix(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                });
            }
        }

        if token.is_punctuation("(") {
            self.advance();
            let expr = self.expression(0)?;
            self.expect_punctuation(")")?;
            return self.postfix(expr);
        }

        let expr = match token.kind {
            TokenKind::Name => {
                self.advance();
                match token.value.to_ascii_lowercase().as_str() {
                    "true" => Expr::Bool(true),
                    "false" => Expr::Bool(false),
                    "null" => Expr::Null,
                    _ if self.current().is_punctuation("(") => Expr::Function {
                        name: token.value.clone(),
                        args: self.arguments()?,
                    },
                    _ => {
                        return Err(ExpressionError::Syntax {
                            message: format!("Variable \"{}\" is not valid", token.value),
                            cursor: token.cursor,
                        })
                    }
                }
            }
            TokenKind::Number => {
                self.advance();
                number(&token)?
            }
            TokenKind::String => {
                self.advance();
                Expr::Str(token.value.clone())
            }
            TokenKind::Punctuation if token.value == "[" => self.array()?,
            TokenKind::Punctuation if token.value == "{" => self.hash()?,
            _ => {
                return Err(ExpressionError::Syntax {
                    message: if token.kind == TokenKind::Eof {
                        "Unexpected end of expression".to_string()
                    } else {
                        format!("Unexpected token \"{}\"", token.value)
                    },
                    cursor: token.cursor,
                })
            }
        };

        self.postfix(expr)
    }

    fn arguments(&mut self) -> ExpressionResult<Vec<Expr>> {
        self.expect_punctuation("(")?;
        let mut args = Vec::new();
        while !self.current().is_punctuation(")") {
            if !args.is_empty() {
                self.expect_punctuation(",")?;
            }
            args.push(self.expression(0)?);
        }
        self.expect_punctuation(")")?;
        Ok(args)
    }

    fn array(&mut self) -> ExpressionResult<Expr> {
        self.expect_punctuation("[")?;
        let mut items = Vec::new();
        while !self.current().is_punctuation("]") {
            if !items.is_empty() {
                self.expect_punctuation(",")?;
                // trailing comma
                if self.current().is_punctuation("]") {
                    break;
                }
            }
            items.push(self.expression(0)?);
        }
        self.expect_punctuation("]")?;
        Ok(Expr::Array(items))
    }

    fn hash(&mut self) -> ExpressionResult<Expr> {
        self.expect_punctuation("{")?;
        let mut entries = Vec::new();
        while !self.current().is_punctuation("}") {
            if !entries.is_empty() {
                self.expect_punctuation(",")?;
                if self.current().is_punctuation("}") {
                    break;
                }
            }

            let token = self.current().clone();
            let key = match token.kind {
                TokenKind::Name | TokenKind::String | TokenKind::Number => {
                    self.advance();
                    HashKey::Static(token.value.clone())
                }
                TokenKind::Punctuation if token.value == "(" => {
                    self.advance();
                    let key = self.expression(0)?;
                    self.expect_punctuation(")")?;
                    HashKey::Dynamic(key)
                }
                _ => {
                    return Err(self.error(format!(
                        "A hash key must be a quoted string, a number, a name, or an expression enclosed in parentheses (unexpected \"{}\")",
                        token.value
                    )))
                }
            };
            self.expect_punctuation(":")?;
            entries.push((key, self.expression(0)?));
        }
        self.expect_punctuation("}")?;
        Ok(Expr::Hash(entries))
    }

    fn postfix(&mut self, mut expr: Expr) -> ExpressionResult<Expr> {
        loop {
            if self.current().is_punctuation(".") {
                self.advance();
                let token = self.advance();
                let valid = matches!(token.kind, TokenKind::Name | TokenKind::Number)
                    || (token.kind == TokenKind::Operator
                        && token.value.chars().all(|c| c.is_alphabetic()));
                if !valid {
                    return Err(ExpressionError::Syntax {
                        message: "Expected name".to_string(),
                        cursor: token.cursor,
                    });
                }
                if self.current().is_punctuation("(") {
                    expr = Expr::Method {
                        target: Box::new(expr),
                        name: token.value,
                        args: self.arguments()?,
                    };
                } else {
                    expr = Expr::Property {
                        target: Box::new(expr),
                        name: token.value,
                    };
                }
            } else if self.current().is_punctuation("[") {
                self.advance();
                let index = self.expression(0)?;
                self.expect_punctuation("]")?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }
}

fn number(token: &Token) -> ExpressionResult<Expr> {
    let invalid = || ExpressionError::Syntax {
        message: format!("Invalid number \"{}\"", token.value),
        cursor: token.cursor,
    };
    if token.value.contains('.') {
        token.value.parse::<f64>().map(Expr::Float).map_err(|_| invalid())
    } else {
        token.value.parse::<i64>().map(Expr::Int).map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::lexer::lex;

    fn parse_str(source: &str) -> Expr {
        parse(lex(source).unwrap()).unwrap()
    }

    #[test]
    fn test_precedence() {
        let expr = parse_str("1 + 2 * 3");
        let Expr::Binary { op, right, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Multiply, .. }));
    }

    #[test]
    fn test_power_is_right_associative() {
        let expr = parse_str("2 ** 3 ** 2");
        let Expr::Binary { op, left, right } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Power);
        assert_eq!(*left, Expr::Int(2));
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Power, .. }));
    }

    #[test]
    fn test_conditional_forms() {
        assert!(matches!(
            parse_str("a ? 1 : 2"),
            Expr::Conditional { then: Some(_), .. }
        ));
        assert!(matches!(
            parse_str("a ?: 2"),
            Expr::Conditional { then: None, .. }
        ));
        let Expr::Conditional { otherwise, .. } = parse_str("a ? 1") else {
            panic!("expected conditional");
        };
        assert_eq!(*otherwise, Expr::Null);
    }

    #[test]
    fn test_access_chain_becomes_get_call() {
        assert_eq!(
            parse_str("a.b"),
            Expr::Function {
                name: "get".to_string(),
                args: vec![Expr::Str("a.b".to_string())]
            }
        );
    }

    #[test]
    fn test_method_and_index() {
        let expr = parse_str("a.items.join(',')[0]");
        let Expr::Index { target, index } = expr else {
            panic!("expected index");
        };
        assert_eq!(*index, Expr::Int(0));
        assert!(matches!(*target, Expr::Method { ref name, .. } if name == "join"));
    }

    #[test]
    fn test_hash_and_array_literals() {
        let expr = parse_str("{name: 'x', 'other': [1, 2,], (k): 3}");
        let Expr::Hash(entries) = expr else {
            panic!("expected hash");
        };
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].0, HashKey::Static("name".to_string()));
        assert_eq!(
            entries[1].1,
            Expr::Array(vec![Expr::Int(1), Expr::Int(2)])
        );
        assert!(matches!(entries[2].0, HashKey::Dynamic(_)));
    }

    #[test]
    fn test_unexpected_tokens() {
        assert!(parse(lex("1 +").unwrap()).is_err());
        assert!(parse(lex("1 2").unwrap()).is_err());
        assert!(parse(lex("").unwrap()).is_err());
    }
}
