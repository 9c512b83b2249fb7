//! Minimal SQL lexer.
//!
//! Only distinguishes what the translator and classifier need to tell apart:
//! literal spans (strings, quoted identifiers, dollar-quoted bodies, comments)
//! versus code spans (words, numbers, punctuation and parameter markers).
//! Token boundaries always fall on ASCII bytes, so every token span is a valid
//! `&str` slice of the input.

use super::error::SqlError;

/// Lexical class of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Keyword or bare identifier.
    Word,
    /// `"ident"` or `` `ident` ``.
    QuotedIdent,
    /// `'text'`, `E'text'` or `$tag$text$tag$`.
    Literal,
    Number,
    /// Ordinal parameter marker `$n` (1-based).
    Marker(u32),
    /// Generic parameter marker `?`.
    Generic,
    /// Any other single ASCII byte.
    Punct(u8),
    Whitespace,
    Comment,
}

/// A token and its byte span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    /// Source text of this token.
    #[inline]
    pub fn text<'a>(&self, sql: &'a str) -> &'a str {
        &sql[self.start..self.end]
    }

    /// Whitespace and comments.
    #[inline]
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    /// True for a bare word equal to `keyword`, ignoring ASCII case.
    #[inline]
    pub fn is_keyword(&self, sql: &str, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text(sql).eq_ignore_ascii_case(keyword)
    }

    #[inline]
    pub fn is_punct(&self, byte: u8) -> bool {
        self.kind == TokenKind::Punct(byte)
    }
}

/// Split `sql` into tokens.
pub fn tokenize(sql: &str) -> Result<Vec<Token>, SqlError> {
    Lexer {
        src: sql.as_bytes(),
        pos: 0,
    }
    .run()
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
}

impl Lexer<'_> {
    fn run(mut self) -> Result<Vec<Token>, SqlError> {
        let mut tokens = Vec::new();

        while self.pos < self.src.len() {
            let start = self.pos;
            let kind = self.next_kind()?;
            tokens.push(Token {
                kind,
                start,
                end: self.pos,
            });
        }

        Ok(tokens)
    }

    #[inline]
    fn peek(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn next_kind(&mut self) -> Result<TokenKind, SqlError> {
        let b = self.src[self.pos];

        match b {
            b if b.is_ascii_whitespace() => {
                self.eat_while(|c| c.is_ascii_whitespace());
                Ok(TokenKind::Whitespace)
            }
            b'-' if self.peek(1) == Some(b'-') => {
                self.eat_while(|c| c != b'\n');
                Ok(TokenKind::Comment)
            }
            b'/' if self.peek(1) == Some(b'*') => self.block_comment(),
            b'\'' => self.quoted(b'\'', false).map(|_| TokenKind::Literal),
            b'"' => self.quoted(b'"', false).map(|_| TokenKind::QuotedIdent),
            b'`' => self.quoted(b'`', false).map(|_| TokenKind::QuotedIdent),
            b'$' => self.dollar(),
            b'?' => {
                self.pos += 1;
                Ok(TokenKind::Generic)
            }
            b'0'..=b'9' => {
                self.eat_while(|c| c.is_ascii_alphanumeric() || c == b'.' || c == b'_');
                Ok(TokenKind::Number)
            }
            b if is_word_start(b) => {
                // E'...' escape strings: backslash escapes a quote.
                if (b == b'e' || b == b'E') && self.peek(1) == Some(b'\'') {
                    self.pos += 1;
                    return self.quoted(b'\'', true).map(|_| TokenKind::Literal);
                }
                self.eat_while(is_word_continue);
                Ok(TokenKind::Word)
            }
            _ => {
                self.pos += 1;
                Ok(TokenKind::Punct(b))
            }
        }
    }

    fn eat_while(&mut self, pred: impl Fn(u8) -> bool) {
        while self.pos < self.src.len() && pred(self.src[self.pos]) {
            self.pos += 1;
        }
    }

    fn block_comment(&mut self) -> Result<TokenKind, SqlError> {
        let start = self.pos;
        self.pos += 2;
        while self.pos + 1 < self.src.len() {
            if self.src[self.pos] == b'*' && self.src[self.pos + 1] == b'/' {
                self.pos += 2;
                return Ok(TokenKind::Comment);
            }
            self.pos += 1;
        }
        Err(SqlError::Unterminated {
            what: "block comment",
            offset: start,
        })
    }

    /// Consume a span delimited by `quote`, where a doubled quote is an escape.
    fn quoted(&mut self, quote: u8, backslash_escapes: bool) -> Result<(), SqlError> {
        let start = self.pos;
        self.pos += 1;

        while self.pos < self.src.len() {
            let c = self.src[self.pos];
            if backslash_escapes && c == b'\\' {
                self.pos += 2;
                continue;
            }
            if c == quote {
                if self.peek(1) == Some(quote) {
                    self.pos += 2;
                    continue;
                }
                self.pos += 1;
                return Ok(());
            }
            self.pos += 1;
        }

        Err(SqlError::Unterminated {
            what: if quote == b'\'' {
                "string literal"
            } else {
                "quoted identifier"
            },
            offset: start,
        })
    }

    /// `$n` marker, `$tag$...$tag$` body, or a lone `$`.
    fn dollar(&mut self) -> Result<TokenKind, SqlError> {
        let start = self.pos;

        if matches!(self.peek(1), Some(b'0'..=b'9')) {
            self.pos += 1;
            self.eat_while(|c| c.is_ascii_digit());
            let digits = std::str::from_utf8(&self.src[start + 1..self.pos]).unwrap_or("");
            return match digits.parse::<u32>() {
                Ok(0) | Err(_) => Err(SqlError::InvalidMarker {
                    marker: format!("${}", digits),
                    offset: start,
                }),
                Ok(n) => Ok(TokenKind::Marker(n)),
            };
        }

        // Opening tag: `$$` or `$ident$`.
        let mut tag_end = self.pos + 1;
        if self.src.get(tag_end).copied().is_some_and(is_word_start) {
            while self
                .src
                .get(tag_end)
                .copied()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
            {
                tag_end += 1;
            }
        }
        if self.src.get(tag_end) != Some(&b'$') {
            self.pos += 1;
            return Ok(TokenKind::Punct(b'$'));
        }

        let tag = &self.src[start..=tag_end];
        let body_start = tag_end + 1;
        let close = self.src[body_start..]
            .windows(tag.len())
            .position(|w| w == tag)
            .ok_or(SqlError::Unterminated {
                what: "dollar-quoted string",
                offset: start,
            })?;

        self.pos = body_start + close + tag.len();
        Ok(TokenKind::Literal)
    }
}

#[inline]
fn is_word_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

#[inline]
fn is_word_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<TokenKind> {
        tokenize(sql)
            .unwrap()
            .into_iter()
            .filter(|t| !t.is_trivia())
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_markers_and_words() {
        assert_eq!(
            kinds("SELECT * FROM t WHERE a = $1 AND b = $12"),
            vec![
                TokenKind::Word,
                TokenKind::Punct(b'*'),
                TokenKind::Word,
                TokenKind::Word,
                TokenKind::Word,
                TokenKind::Word,
                TokenKind::Punct(b'='),
                TokenKind::Marker(1),
                TokenKind::Word,
                TokenKind::Word,
                TokenKind::Punct(b'='),
                TokenKind::Marker(12),
            ]
        );
    }

    #[test]
    fn test_marker_inside_string_is_literal() {
        let sql = "SELECT 'costs $1 or ''$2''' , $1";
        let tokens = tokenize(sql).unwrap();
        let markers: Vec<_> = tokens
            .iter()
            .filter(|t| matches!(t.kind, TokenKind::Marker(_)))
            .collect();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].text(sql), "$1");

        let literal = tokens.iter().find(|t| t.kind == TokenKind::Literal).unwrap();
        assert_eq!(literal.text(sql), "'costs $1 or ''$2'''");
    }

    #[test]
    fn test_comments_and_quoted_identifiers() {
        let sql = "-- $1 here\nSELECT \"col $2\" /* $3 */ FROM t";
        let tokens = tokenize(sql).unwrap();
        assert!(!tokens.iter().any(|t| matches!(t.kind, TokenKind::Marker(_))));
        assert_eq!(
            tokens.iter().filter(|t| t.kind == TokenKind::Comment).count(),
            2
        );
        assert!(tokens.iter().any(|t| t.kind == TokenKind::QuotedIdent));
    }

    #[test]
    fn test_dollar_quoted_body() {
        let sql = "SELECT $fn$ body with $1 $fn$, $$x$$, $2";
        let tokens = tokenize(sql).unwrap();
        let literals: Vec<_> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Literal)
            .map(|t| t.text(sql))
            .collect();
        assert_eq!(literals, vec!["$fn$ body with $1 $fn$", "$$x$$"]);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Marker(2)));
    }

    #[test]
    fn test_escape_string() {
        let sql = r"SELECT E'it\'s $1', $1";
        let tokens = tokenize(sql).unwrap();
        assert_eq!(
            tokens
                .iter()
                .filter(|t| matches!(t.kind, TokenKind::Marker(_)))
                .count(),
            1
        );
    }

    #[test]
    fn test_unterminated_literal() {
        let err = tokenize("SELECT 'oops").unwrap_err();
        assert!(matches!(err, SqlError::Unterminated { offset: 7, .. }));
    }

    #[test]
    fn test_zero_marker_rejected() {
        assert!(matches!(
            tokenize("SELECT $0"),
            Err(SqlError::InvalidMarker { .. })
        ));
    }

    #[test]
    fn test_non_ascii_identifiers_keep_valid_spans() {
        let sql = "SELECT näme FROM tâble WHERE x = $1";
        for token in tokenize(sql).unwrap() {
            let _ = token.text(sql);
        }
    }
}
