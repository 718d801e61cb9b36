//! Reader for the object/array literals the portal passes to its chart
//! library. The literals look like JavaScript but are not JSON: keys are
//! bare words, strings use either quote style and missing values are the
//! bare word `null`. Only the subset needed to pull arrays out of a chart
//! config is supported; functions and expressions are not.

use thiserror::Error;

/// Deepest array/object nesting accepted before giving up.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    OpenBracket,
    CloseBracket,
    OpenBrace,
    CloseBrace,
    Comma,
    Colon,
    Str(String),
    Number(f64),
    /// Any other run of non-delimiter characters, e.g. `null` or `true`.
    Word(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at byte {offset}")]
pub struct LiteralError {
    pub offset: usize,
    pub message: String,
}

impl LiteralError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal<'a> {
    Array(Vec<Node<'a>>),
    Object(Vec<(String, Node<'a>)>),
    Str(String),
    Number(f64),
    Word(&'a str),
}

/// A parsed value together with the exact source text it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Node<'a> {
    pub value: Literal<'a>,
    pub text: &'a str,
}

impl<'a> Node<'a> {
    pub fn as_array(&self) -> Option<&[Node<'a>]> {
        match &self.value {
            Literal::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Text of a quoted string or bare word.
    pub fn as_label(&self) -> Option<&str> {
        match &self.value {
            Literal::Str(s) => Some(s),
            Literal::Word(w) => Some(w),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        match &self.value {
            Literal::Word(w) => w.eq_ignore_ascii_case("null"),
            Literal::Str(s) => s.eq_ignore_ascii_case("null"),
            _ => false,
        }
    }
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str, pos: usize) -> Self {
        Self { src, pos }
    }

    fn skip_trivia(&mut self) {
        loop {
            // any Unicode whitespace; portal pages carry stray no-break spaces
            let untrimmed = &self.src[self.pos..];
            let rest = untrimmed.trim_start();
            self.pos += untrimmed.len() - rest.len();
            if rest.starts_with("//") {
                self.pos += rest.find('\n').unwrap_or(rest.len());
            } else if rest.starts_with("/*") {
                self.pos += rest.find("*/").map(|i| i + 2).unwrap_or(rest.len());
            } else {
                return;
            }
        }
    }

    /// Returns the next token and the byte offset it started at.
    fn next_token(&mut self) -> Result<Option<(Token<'a>, usize)>, LiteralError> {
        self.skip_trivia();
        let start = self.pos;
        let Some(ch) = self.src[start..].chars().next() else {
            return Ok(None);
        };

        let simple = match ch {
            '[' => Some(Token::OpenBracket),
            ']' => Some(Token::CloseBracket),
            '{' => Some(Token::OpenBrace),
            '}' => Some(Token::CloseBrace),
            ',' => Some(Token::Comma),
            ':' => Some(Token::Colon),
            _ => None,
        };
        if let Some(token) = simple {
            self.pos += 1;
            return Ok(Some((token, start)));
        }

        if ch == '"' || ch == '\'' {
            let value = self.read_string(ch)?;
            return Ok(Some((Token::Str(value), start)));
        }

        let src = self.src;
        let rest = &src[start..];
        let len = rest
            .find(|c: char| c.is_whitespace() || "[]{},:\"'".contains(c))
            .unwrap_or(rest.len());
        self.pos += len;
        let word = &rest[..len];
        let token = match word.parse::<f64>() {
            Ok(n) if n.is_finite() && looks_numeric(word) => Token::Number(n),
            _ => Token::Word(word),
        };
        Ok(Some((token, start)))
    }

    fn read_string(&mut self, quote: char) -> Result<String, LiteralError> {
        let start = self.pos;
        self.pos += quote.len_utf8();
        let mut out = String::new();
        let mut chars = self.src[self.pos..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    let Some((_, escaped)) = chars.next() else {
                        break;
                    };
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                c if c == quote => {
                    self.pos += i + c.len_utf8();
                    return Ok(out);
                }
                c => out.push(c),
            }
        }
        Err(LiteralError::new(start, "unterminated string"))
    }
}

// `f64::from_str` also accepts words such as `inf` and `NaN`.
fn looks_numeric(word: &str) -> bool {
    word.bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'))
}

struct Parser<'a> {
    src: &'a str,
    lexer: Lexer<'a>,
    peeked: Option<(Token<'a>, usize)>,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, pos: usize) -> Self {
        Self {
            src,
            lexer: Lexer::new(src, pos),
            peeked: None,
            depth: 0,
        }
    }

    fn peek(&mut self) -> Result<Option<&(Token<'a>, usize)>, LiteralError> {
        if self.peeked.is_none() {
            self.peeked = self.lexer.next_token()?;
        }
        Ok(self.peeked.as_ref())
    }

    fn next(&mut self) -> Result<(Token<'a>, usize), LiteralError> {
        if let Some(token) = self.peeked.take() {
            return Ok(token);
        }
        self.lexer
            .next_token()?
            .ok_or_else(|| LiteralError::new(self.src.len(), "unexpected end of input"))
    }

    fn end_of_last_token(&self) -> usize {
        self.lexer.pos
    }

    fn value(&mut self) -> Result<Node<'a>, LiteralError> {
        let (token, start) = self.next()?;
        let value = match token {
            Token::OpenBracket => self.nested(start, Self::array_items)?,
            Token::OpenBrace => self.nested(start, Self::object_entries)?,
            Token::Str(s) => Literal::Str(s),
            Token::Number(n) => Literal::Number(n),
            Token::Word(w) => Literal::Word(w),
            other => {
                return Err(LiteralError::new(
                    start,
                    format!("unexpected {other:?}"),
                ))
            }
        };
        let src = self.src;
        let end = self.end_of_last_token();
        Ok(Node {
            value,
            text: &src[start..end],
        })
    }

    fn nested(
        &mut self,
        start: usize,
        parse: fn(&mut Self) -> Result<Literal<'a>, LiteralError>,
    ) -> Result<Literal<'a>, LiteralError> {
        if self.depth >= MAX_DEPTH {
            return Err(LiteralError::new(start, "literal is nested too deeply"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn array_items(&mut self) -> Result<Literal<'a>, LiteralError> {
        let mut items = Vec::new();
        loop {
            if matches!(self.peek()?, Some((Token::CloseBracket, _))) {
                self.next()?;
                return Ok(Literal::Array(items));
            }
            items.push(self.value()?);
            match self.next()? {
                (Token::Comma, _) => continue,
                (Token::CloseBracket, _) => return Ok(Literal::Array(items)),
                (other, at) => {
                    return Err(LiteralError::new(
                        at,
                        format!("expected ',' or ']', found {other:?}"),
                    ))
                }
            }
        }
    }

    fn object_entries(&mut self) -> Result<Literal<'a>, LiteralError> {
        let mut entries = Vec::new();
        loop {
            let key = match self.next()? {
                (Token::CloseBrace, _) => return Ok(Literal::Object(entries)),
                (Token::Str(s), _) => s,
                (Token::Word(w), _) => w.to_string(),
                (Token::Number(n), _) => n.to_string(),
                (other, at) => {
                    return Err(LiteralError::new(
                        at,
                        format!("expected object key, found {other:?}"),
                    ))
                }
            };
            match self.next()? {
                (Token::Colon, _) => {}
                (other, at) => {
                    return Err(LiteralError::new(
                        at,
                        format!("expected ':', found {other:?}"),
                    ))
                }
            }
            let value = self.value()?;
            entries.push((key, value));
            match self.next()? {
                (Token::Comma, _) => continue,
                (Token::CloseBrace, _) => return Ok(Literal::Object(entries)),
                (other, at) => {
                    return Err(LiteralError::new(
                        at,
                        format!("expected ',' or '}}', found {other:?}"),
                    ))
                }
            }
        }
    }
}

/// Parses one literal value starting at byte `pos` of `src`. Whatever
/// follows the value is ignored.
pub fn parse_at(src: &str, pos: usize) -> Result<Node<'_>, LiteralError> {
    if pos > src.len() || !src.is_char_boundary(pos) {
        return Err(LiteralError::new(pos, "offset outside input"));
    }
    Parser::new(src, pos).value()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Result<Node<'_>, LiteralError> {
        parse_at(src, 0)
    }

    fn labels(node: &Node<'_>) -> Vec<String> {
        node.as_array()
            .unwrap()
            .iter()
            .map(|n| n.as_label().unwrap().to_string())
            .collect()
    }

    #[test]
    fn mixed_quotes_and_bare_words() {
        let node = parse(r#"['CSC601', "CSC602", CSC603]"#).unwrap();
        assert_eq!(labels(&node), vec!["CSC601", "CSC602", "CSC603"]);
    }

    #[test]
    fn nested_pairs_with_trailing_comma() {
        let node = parse(r#"[["CSC601", 85], ['CSL601', 100],]"#).unwrap();
        let rows = node.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        let second = rows[1].as_array().unwrap();
        assert_eq!(second[0].as_label(), Some("CSL601"));
        assert_eq!(second[1].value, Literal::Number(100.0));
    }

    #[test]
    fn null_in_both_forms() {
        let node = parse(r#"[null, "null", NULL, 4.5]"#).unwrap();
        let items = node.as_array().unwrap();
        assert!(items[0].is_null());
        assert!(items[1].is_null());
        assert!(items[2].is_null());
        assert!(!items[3].is_null());
    }

    #[test]
    fn object_with_bare_keys() {
        let node = parse(r#"{ columns: [], type: "gauge", 'x': 1 }"#).unwrap();
        let Literal::Object(entries) = &node.value else {
            panic!("expected object");
        };
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["columns", "type", "x"]);
    }

    #[test]
    fn node_text_is_verbatim_source() {
        let src = r#"[ "MSE", 18, AB , [1, 2] ]"#;
        let node = parse(src).unwrap();
        let items = node.as_array().unwrap();
        assert_eq!(items[2].text, "AB");
        assert_eq!(items[3].text, "[1, 2]");
        assert_eq!(node.text, src);
    }

    #[test]
    fn parse_at_ignores_trailing_text() {
        let src = r#"columns: [["MSE", 1]], type: "bar" });"#;
        let start = src.find('[').unwrap();
        let node = parse_at(src, start).unwrap();
        assert_eq!(node.text, r#"[["MSE", 1]]"#);
    }

    #[test]
    fn negative_and_exponent_numbers() {
        let node = parse("[-3, 1e2, .5]").unwrap();
        let items = node.as_array().unwrap();
        assert_eq!(items[0].value, Literal::Number(-3.0));
        assert_eq!(items[1].value, Literal::Number(100.0));
        assert_eq!(items[2].value, Literal::Number(0.5));
    }

    #[test]
    fn nan_and_inf_stay_words() {
        let node = parse("[NaN, inf]").unwrap();
        let items = node.as_array().unwrap();
        assert_eq!(items[0].value, Literal::Word("NaN"));
        assert_eq!(items[1].value, Literal::Word("inf"));
    }

    #[test]
    fn comments_are_skipped() {
        let node = parse("[1, // first\n /* gap */ 2]").unwrap();
        assert_eq!(node.as_array().unwrap().len(), 2);
    }

    #[test]
    fn escaped_quotes_inside_strings() {
        let node = parse(r#"['it\'s', "say \"hi\""]"#).unwrap();
        assert_eq!(labels(&node), vec!["it's", "say \"hi\""]);
    }

    #[test]
    fn no_break_space_is_whitespace() {
        let node = parse("[1,\u{a0}2]").unwrap();
        let items = node.as_array().unwrap();
        assert_eq!(items[1].value, Literal::Number(2.0));
    }

    #[test]
    fn deep_nesting_is_an_error() {
        let deep = "[".repeat(100_000);
        let err = parse(&deep).unwrap_err();
        assert!(err.message.contains("nested too deeply"));

        let fine = format!("{}{}", "[".repeat(MAX_DEPTH), "]".repeat(MAX_DEPTH));
        assert!(parse(&fine).is_ok());
    }

    #[test]
    fn errors_on_unterminated_input() {
        assert!(parse(r#"["CSC601", 85"#).is_err());
        assert!(parse(r#"["CSC601]"#).is_err());
        assert!(parse("").is_err());
    }
}
