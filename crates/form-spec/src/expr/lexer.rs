use crate::expr::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Question,
    Colon,
    Bang,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Nullish,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub position: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, ExprError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (position, ch) = chars[i];
        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        let peek = chars.get(i + 1).map(|(_, c)| *c);
        let peek2 = chars.get(i + 2).map(|(_, c)| *c);
        // `.` after a path segment is member access, so `items.0` reads a field.
        let after_segment = matches!(
            tokens.last(),
            Some(Spanned {
                token: Token::Ident(_) | Token::RBracket | Token::RParen,
                ..
            })
        );
        let after_dot = matches!(tokens.last(), Some(Spanned { token: Token::Dot, .. }));
        let (token, width) = match ch {
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            ',' => (Token::Comma, 1),
            ':' => (Token::Colon, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '*' => (Token::Star, 1),
            '/' => (Token::Slash, 1),
            '%' => (Token::Percent, 1),
            '.' if after_segment || !peek.is_some_and(|c| c.is_ascii_digit()) => (Token::Dot, 1),
            '?' if peek == Some('?') => (Token::Nullish, 2),
            '?' => (Token::Question, 1),
            '!' if peek == Some('=') && peek2 == Some('=') => (Token::StrictNotEq, 3),
            '!' if peek == Some('=') => (Token::NotEq, 2),
            '!' => (Token::Bang, 1),
            '=' if peek == Some('=') && peek2 == Some('=') => (Token::StrictEq, 3),
            '=' if peek == Some('=') => (Token::EqEq, 2),
            '=' if peek == Some('>') => {
                return Err(ExprError::parse(position, "arrow functions are not allowed"));
            }
            '=' => return Err(ExprError::parse(position, "assignment is not allowed")),
            '<' if peek == Some('=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '>' if peek == Some('=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            '&' if peek == Some('&') => (Token::AndAnd, 2),
            '|' if peek == Some('|') => (Token::OrOr, 2),
            '{' | '}' => {
                return Err(ExprError::parse(position, "object literals are not allowed"));
            }
            '\'' | '"' => {
                let (text, consumed) = read_string(&chars, i, ch)?;
                tokens.push(Spanned {
                    token: Token::Str(text),
                    position,
                });
                i += consumed;
                continue;
            }
            c if c.is_ascii_digit() && after_dot => {
                let start = i;
                while i < chars.len() && chars[i].1.is_ascii_digit() {
                    i += 1;
                }
                tokens.push(Spanned {
                    token: Token::Ident(chars[start..i].iter().map(|(_, c)| *c).collect()),
                    position,
                });
                continue;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let (number, consumed) = read_number(&chars, i)?;
                tokens.push(Spanned {
                    token: Token::Number(number),
                    position,
                });
                i += consumed;
                continue;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '$')
                {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                tokens.push(Spanned {
                    token: Token::Ident(ident),
                    position,
                });
                continue;
            }
            other => {
                return Err(ExprError::parse(
                    position,
                    format!("unexpected character '{other}'"),
                ));
            }
        };

        tokens.push(Spanned { token, position });
        i += width;
    }

    tokens.push(Spanned {
        token: Token::Eof,
        position: source.len(),
    });
    Ok(tokens)
}

fn read_string(
    chars: &[(usize, char)],
    start: usize,
    quote: char,
) -> Result<(String, usize), ExprError> {
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let ch = chars[i].1;
        if ch == quote {
            return Ok((text, i + 1 - start));
        }
        if ch == '\\' {
            let Some((_, escaped)) = chars.get(i + 1) else {
                break;
            };
            text.push(match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                other => *other,
            });
            i += 2;
            continue;
        }
        text.push(ch);
        i += 1;
    }
    Err(ExprError::parse(chars[start].0, "unterminated string literal"))
}

fn read_number(chars: &[(usize, char)], start: usize) -> Result<(f64, usize), ExprError> {
    let mut i = start;
    let mut seen_dot = false;
    while i < chars.len() {
        match chars[i].1 {
            c if c.is_ascii_digit() => {}
            '.' if !seen_dot && chars.get(i + 1).is_some_and(|(_, c)| c.is_ascii_digit()) => {
                seen_dot = true;
            }
            _ => break,
        }
        i += 1;
    }
    let literal: String = chars[start..i].iter().map(|(_, c)| *c).collect();
    literal
        .parse::<f64>()
        .map(|number| (number, i - start))
        .map_err(|_| ExprError::parse(chars[start].0, format!("invalid number '{literal}'")))
}
