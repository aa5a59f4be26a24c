use serde_json::Value;

use crate::expr::ExprError;
use crate::expr::lexer::{Spanned, Token, tokenize};

/// Maximum syntax tree depth accepted by the parser. Operator chains count
/// one level per operator.
pub const MAX_NESTING: usize = 256;

/// Maximum number of elements in an array literal.
pub const MAX_ARRAY_LITERAL: usize = 256;

/// The three read-only roots an expression can read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Data,
    User,
    Task,
}

impl Namespace {
    fn from_ident(ident: &str) -> Option<Self> {
        match ident {
            "data" => Some(Namespace::Data),
            "user" => Some(Namespace::User),
            "task" => Some(Namespace::Task),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Field(String),
    Index(Box<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

/// The fixed set of callable helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Helper {
    Len,
    Lower,
    Upper,
    Trim,
    Contains,
    StartsWith,
    EndsWith,
    Includes,
    IsEmpty,
    Concat,
    Number,
    String,
    Round,
    Min,
    Max,
    Sum,
    Choice,
}

impl Helper {
    fn from_ident(ident: &str) -> Option<Self> {
        Some(match ident {
            "len" => Helper::Len,
            "lower" => Helper::Lower,
            "upper" => Helper::Upper,
            "trim" => Helper::Trim,
            "contains" => Helper::Contains,
            "startsWith" => Helper::StartsWith,
            "endsWith" => Helper::EndsWith,
            "includes" => Helper::Includes,
            "isEmpty" => Helper::IsEmpty,
            "concat" => Helper::Concat,
            "number" => Helper::Number,
            "string" => Helper::String,
            "round" => Helper::Round,
            "min" => Helper::Min,
            "max" => Helper::Max,
            "sum" => Helper::Sum,
            "choice" => Helper::Choice,
            _ => return None,
        })
    }

    /// Accepted argument counts, inclusive.
    fn arity(&self) -> (usize, usize) {
        match self {
            Helper::Len
            | Helper::Lower
            | Helper::Upper
            | Helper::Trim
            | Helper::IsEmpty
            | Helper::Number
            | Helper::String
            | Helper::Sum => (1, 1),
            Helper::Contains
            | Helper::StartsWith
            | Helper::EndsWith
            | Helper::Includes
            | Helper::Choice => (2, 2),
            Helper::Round => (1, 2),
            Helper::Concat | Helper::Min | Helper::Max => (1, 16),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Literal(Value),
    Path {
        root: Namespace,
        segments: Vec<Segment>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Conditional {
        test: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },
    Call {
        helper: Helper,
        args: Vec<Node>,
    },
    Array(Vec<Node>),
}

pub fn parse(source: &str) -> Result<Node, ExprError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        cursor: 0,
        depth: 0,
    };
    let node = parser.expression()?;
    match parser.peek() {
        Token::Eof => Ok(node),
        other => Err(ExprError::parse(
            parser.position(),
            format!("unexpected trailing token {other:?}"),
        )),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    cursor: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens
            .get(self.cursor)
            .map(|spanned| &spanned.token)
            .unwrap_or(&Token::Eof)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.cursor)
            .or_else(|| self.tokens.last())
            .map(|spanned| spanned.position)
            .unwrap_or(0)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.cursor < self.tokens.len() {
            self.cursor += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ExprError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(ExprError::parse(
                self.position(),
                format!("expected {what}, found {:?}", self.peek()),
            ))
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ExprError::parse(
                self.position(),
                format!("expression nested deeper than {MAX_NESTING} levels"),
            ));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Node, ExprError> {
        self.enter()?;
        let node = self.conditional();
        self.depth -= 1;
        node
    }

    fn conditional(&mut self) -> Result<Node, ExprError> {
        let test = self.logical(0)?;
        if !self.eat(&Token::Question) {
            return Ok(test);
        }
        let then = self.expression()?;
        self.expect(Token::Colon, "':' in conditional")?;
        let otherwise = self.expression()?;
        Ok(Node::Conditional {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    /// Precedence climbing over the binary and logical operators.
    fn logical(&mut self, min_level: u8) -> Result<Node, ExprError> {
        let mut left = self.unary()?;
        let mut chained = 0;
        loop {
            let Some((level, kind)) = binary_level(self.peek()) else {
                break;
            };
            if level < min_level {
                break;
            }
            self.advance();
            self.enter()?;
            chained += 1;
            let right = self.logical(level + 1)?;
            left = match kind {
                OpKind::Logical(op) => Node::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                OpKind::Binary(op) => Node::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
        }
        self.depth -= chained;
        Ok(left)
    }

    fn unary(&mut self) -> Result<Node, ExprError> {
        let op = match self.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Negate,
            _ => return self.postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.unary();
        self.depth -= 1;
        Ok(Node::Unary {
            op,
            operand: Box::new(operand?),
        })
    }

    fn postfix(&mut self) -> Result<Node, ExprError> {
        let mut node = self.primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let name = match self.advance() {
                        Token::Ident(name) => name,
                        other => {
                            return Err(ExprError::parse(
                                self.position(),
                                format!("expected field name after '.', found {other:?}"),
                            ));
                        }
                    };
                    node = push_segment(node, Segment::Field(name), self.position())?;
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(Token::RBracket, "']'")?;
                    node = push_segment(node, Segment::Index(Box::new(index)), self.position())?;
                }
                Token::LParen => {
                    return Err(ExprError::parse(
                        self.position(),
                        "only built-in helpers can be called",
                    ));
                }
                _ => return Ok(node),
            }
        }
    }

    fn primary(&mut self) -> Result<Node, ExprError> {
        let position = self.position();
        match self.advance() {
            Token::Number(number) => Ok(Node::Literal(crate::expr::number_value(number))),
            Token::Str(text) => Ok(Node::Literal(Value::String(text))),
            Token::LParen => {
                let node = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(node)
            }
            Token::LBracket => {
                let items = self.arguments(Token::RBracket)?;
                if items.len() > MAX_ARRAY_LITERAL {
                    return Err(ExprError::parse(
                        position,
                        format!("array literal longer than {MAX_ARRAY_LITERAL} elements"),
                    ));
                }
                Ok(Node::Array(items))
            }
            Token::Ident(ident) => self.identifier(ident, position),
            other => Err(ExprError::parse(
                position,
                format!("unexpected token {other:?}"),
            )),
        }
    }

    fn identifier(&mut self, ident: String, position: usize) -> Result<Node, ExprError> {
        match ident.as_str() {
            "true" => return Ok(Node::Literal(Value::Bool(true))),
            "false" => return Ok(Node::Literal(Value::Bool(false))),
            "null" | "undefined" => return Ok(Node::Literal(Value::Null)),
            "function" | "new" | "for" | "while" | "let" | "var" | "const" | "return" => {
                return Err(ExprError::parse(
                    position,
                    format!("'{ident}' is not allowed in rule expressions"),
                ));
            }
            _ => {}
        }

        if let Some(root) = Namespace::from_ident(&ident) {
            return Ok(Node::Path {
                root,
                segments: Vec::new(),
            });
        }

        if *self.peek() == Token::LParen {
            let helper = Helper::from_ident(&ident).ok_or_else(|| {
                ExprError::parse(position, format!("unknown helper '{ident}'"))
            })?;
            self.advance();
            let args = self.arguments(Token::RParen)?;
            let (min, max) = helper.arity();
            if args.len() < min || args.len() > max {
                return Err(ExprError::parse(
                    position,
                    format!(
                        "helper '{ident}' takes {min}..={max} arguments, got {}",
                        args.len()
                    ),
                ));
            }
            return Ok(Node::Call { helper, args });
        }

        Err(ExprError::parse(
            position,
            format!("unknown identifier '{ident}'; expected data, user or task"),
        ))
    }

    fn arguments(&mut self, close: Token) -> Result<Vec<Node>, ExprError> {
        let mut args = Vec::new();
        if self.eat(&close) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&close) {
                return Ok(args);
            }
            self.expect(Token::Comma, "',' between arguments")?;
        }
    }
}

enum OpKind {
    Logical(LogicalOp),
    Binary(BinaryOp),
}

fn binary_level(token: &Token) -> Option<(u8, OpKind)> {
    Some(match token {
        Token::OrOr => (1, OpKind::Logical(LogicalOp::Or)),
        Token::AndAnd => (2, OpKind::Logical(LogicalOp::And)),
        Token::Nullish => (3, OpKind::Logical(LogicalOp::Nullish)),
        Token::EqEq => (4, OpKind::Binary(BinaryOp::Eq)),
        Token::NotEq => (4, OpKind::Binary(BinaryOp::NotEq)),
        Token::StrictEq => (4, OpKind::Binary(BinaryOp::StrictEq)),
        Token::StrictNotEq => (4, OpKind::Binary(BinaryOp::StrictNotEq)),
        Token::Lt => (5, OpKind::Binary(BinaryOp::Lt)),
        Token::Le => (5, OpKind::Binary(BinaryOp::Le)),
        Token::Gt => (5, OpKind::Binary(BinaryOp::Gt)),
        Token::Ge => (5, OpKind::Binary(BinaryOp::Ge)),
        Token::Plus => (6, OpKind::Binary(BinaryOp::Add)),
        Token::Minus => (6, OpKind::Binary(BinaryOp::Sub)),
        Token::Star => (7, OpKind::Binary(BinaryOp::Mul)),
        Token::Slash => (7, OpKind::Binary(BinaryOp::Div)),
        Token::Percent => (7, OpKind::Binary(BinaryOp::Rem)),
        _ => return None,
    })
}

fn push_segment(node: Node, segment: Segment, position: usize) -> Result<Node, ExprError> {
    match node {
        Node::Path { root, mut segments } => {
            segments.push(segment);
            Ok(Node::Path { root, segments })
        }
        _ => Err(ExprError::parse(
            position,
            "property access is only allowed on data, user or task paths",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_paths_with_fields_and_indexes() {
        let node = parse("data.items[0].name").expect("parse");
        let Node::Path { root, segments } = node else {
            panic!("expected path");
        };
        assert_eq!(root, Namespace::Data);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], Segment::Field("items".into()));
        assert_eq!(
            segments[1],
            Segment::Index(Box::new(Node::Literal(json!(0))))
        );
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let node = parse("1 + 2 * 3").expect("parse");
        let Node::Binary { op, right, .. } = node else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(
            *right,
            Node::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn conditional_is_right_associative() {
        let node = parse("data.a ? 1 : data.b ? 2 : 3").expect("parse");
        let Node::Conditional { otherwise, .. } = node else {
            panic!("expected conditional");
        };
        assert!(matches!(*otherwise, Node::Conditional { .. }));
    }

    #[test]
    fn rejects_unknown_roots_and_helpers() {
        assert!(parse("window.location").is_err());
        assert!(parse("eval('1')").is_err());
        assert!(parse("len()").is_err());
        assert!(parse("function f() {}").is_err());
        assert!(parse("data.a data.b").is_err());
    }

    #[test]
    fn rejects_excessive_nesting() {
        let source = format!("{}1{}", "(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1));
        assert!(matches!(parse(&source), Err(ExprError::Parse { .. })));
        let negations = format!("{}true", "!".repeat(MAX_NESTING + 1));
        assert!(parse(&negations).is_err());
    }
}
