//! Statement classification and the few structural pieces the RETURNING
//! emulator needs: target table, SET list, WHERE predicate, RETURNING list.
//!
//! Only single-table statements are recognised. Anything that claims
//! RETURNING but does not fit these shapes is reported as
//! [`SqlError::Unsupported`] instead of being run without emulation.

use std::ops::Range;

use super::error::SqlError;
use super::lexer::{tokenize, Token, TokenKind};

/// Leading-keyword classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

/// A table reference as written, plus its unquoted parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    /// Text exactly as written (`"Tasks"`, `main.tasks`).
    pub raw: String,
    pub schema: Option<String>,
    pub name: String,
}

/// `INSERT [OR x] INTO <table> ...`
#[derive(Debug, Clone)]
pub struct InsertShape {
    pub table: TableName,
}

/// `UPDATE [OR x] <target> SET <set> [WHERE <predicate>]`
#[derive(Debug, Clone)]
pub struct UpdateShape {
    pub table: TableName,
    /// Table plus optional alias, as token indices.
    pub target: Range<usize>,
    pub set: Range<usize>,
    pub predicate: Option<Range<usize>>,
    /// Columns assigned in the SET list, unquoted.
    pub assigned: Vec<String>,
}

/// `DELETE FROM <target> [WHERE <predicate>]`
#[derive(Debug, Clone)]
pub struct DeleteShape {
    pub table: TableName,
    pub target: Range<usize>,
    pub predicate: Option<Range<usize>>,
}

/// A tokenized statement.
#[derive(Debug, Clone)]
pub struct Statement<'a> {
    sql: &'a str,
    tokens: Vec<Token>,
    kind: StatementKind,
    /// Index of the top-level RETURNING keyword.
    returning: Option<usize>,
}

impl<'a> Statement<'a> {
    pub fn parse(sql: &'a str) -> Result<Self, SqlError> {
        let tokens = tokenize(sql)?;

        let first = tokens
            .iter()
            .find(|t| !t.is_trivia())
            .ok_or(SqlError::Empty)?;

        let kind = if first.kind != TokenKind::Word {
            StatementKind::Other
        } else {
            match first.text(sql).to_ascii_uppercase().as_str() {
                "SELECT" => StatementKind::Select,
                "INSERT" | "REPLACE" => StatementKind::Insert,
                "UPDATE" => StatementKind::Update,
                "DELETE" => StatementKind::Delete,
                _ => StatementKind::Other,
            }
        };

        if let Some(at) = top_level(&tokens).find(|&i| tokens[i].is_punct(b';')) {
            if tokens[at + 1..]
                .iter()
                .any(|t| !t.is_trivia() && !t.is_punct(b';'))
            {
                return Err(SqlError::MultipleStatements);
            }
        }

        let returning = top_level(&tokens).find(|&i| tokens[i].is_keyword(sql, "RETURNING"));

        Ok(Self {
            sql,
            tokens,
            kind,
            returning,
        })
    }

    #[inline]
    pub fn sql(&self) -> &'a str {
        self.sql
    }

    #[inline]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    #[inline]
    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    #[inline]
    pub fn has_returning(&self) -> bool {
        self.returning.is_some()
    }

    /// Tokens of the statement without its RETURNING clause or trailing `;`.
    pub fn body(&self) -> Range<usize> {
        let end = self.returning.unwrap_or(self.tokens.len());
        0..trim_end(&self.tokens, 0, end)
    }

    /// Tokens of the RETURNING projection.
    pub fn returning_list(&self) -> Result<Range<usize>, SqlError> {
        let at = self
            .returning
            .ok_or_else(|| SqlError::Unsupported("statement has no RETURNING clause".into()))?;
        let range = trim(&self.tokens, at + 1, self.tokens.len());
        if range.is_empty() {
            return Err(SqlError::Unsupported("empty RETURNING list".into()));
        }
        if self.tokens[range.clone()]
            .iter()
            .any(|t| matches!(t.kind, TokenKind::Marker(_) | TokenKind::Generic))
        {
            return Err(SqlError::Unsupported(
                "parameter markers in RETURNING list".into(),
            ));
        }
        Ok(range)
    }

    pub fn insert_shape(&self) -> Result<InsertShape, SqlError> {
        self.expect_kind(StatementKind::Insert)?;
        let body = self.body();
        let mut cursor = self.next_code(body.start, body.end);

        // INSERT [OR <conflict>] INTO | REPLACE INTO
        cursor = self.skip_keyword(cursor, body.end, "INSERT");
        cursor = self.skip_keyword(cursor, body.end, "REPLACE");
        if self.is_keyword_at(cursor, "OR") {
            cursor = self.next_code(cursor + 1, body.end);
            cursor = self.next_code(cursor + 1, body.end);
        }
        if !self.is_keyword_at(cursor, "INTO") {
            return Err(SqlError::Unsupported("expected INTO after INSERT".into()));
        }
        let (table, after) = self.table_name(self.next_code(cursor + 1, body.end), body.end)?;

        // An upsert that resolves to an update leaves last_insert_rowid untouched.
        if let Some(do_at) = self.find_top_level(after, body.end, "DO") {
            if self.is_keyword_at(self.next_code(do_at + 1, body.end), "UPDATE") {
                return Err(SqlError::Unsupported(
                    "INSERT ... ON CONFLICT DO UPDATE".into(),
                ));
            }
        }

        Ok(InsertShape { table })
    }

    pub fn update_shape(&self) -> Result<UpdateShape, SqlError> {
        self.expect_kind(StatementKind::Update)?;
        let body = self.body();
        let mut cursor = self.next_code(body.start, body.end);

        cursor = self.skip_keyword(cursor, body.end, "UPDATE");
        if self.is_keyword_at(cursor, "OR") {
            cursor = self.next_code(cursor + 1, body.end);
            cursor = self.next_code(cursor + 1, body.end);
        }
        let target_start = cursor;
        let (table, _) = self.table_name(cursor, body.end)?;

        let set_at = self
            .find_top_level(target_start, body.end, "SET")
            .ok_or_else(|| SqlError::Unsupported("UPDATE without SET".into()))?;
        let where_at = self.find_top_level(set_at, body.end, "WHERE");
        if self
            .find_top_level(set_at, where_at.unwrap_or(body.end), "FROM")
            .is_some()
        {
            return Err(SqlError::Unsupported("UPDATE ... FROM".into()));
        }

        let set = trim(&self.tokens, set_at + 1, where_at.unwrap_or(body.end));
        if set.is_empty() {
            return Err(SqlError::Unsupported("empty SET list".into()));
        }
        let assigned = self.assigned_columns(set.clone());

        Ok(UpdateShape {
            table,
            target: trim(&self.tokens, target_start, set_at),
            set,
            predicate: where_at.map(|w| trim(&self.tokens, w + 1, body.end)),
            assigned,
        })
    }

    pub fn delete_shape(&self) -> Result<DeleteShape, SqlError> {
        self.expect_kind(StatementKind::Delete)?;
        let body = self.body();
        let mut cursor = self.next_code(body.start, body.end);

        cursor = self.skip_keyword(cursor, body.end, "DELETE");
        if !self.is_keyword_at(cursor, "FROM") {
            return Err(SqlError::Unsupported("expected FROM after DELETE".into()));
        }
        let target_start = self.next_code(cursor + 1, body.end);
        let (table, _) = self.table_name(target_start, body.end)?;

        let where_at = self.find_top_level(target_start, body.end, "WHERE");
        if self
            .find_top_level(target_start, where_at.unwrap_or(body.end), "USING")
            .is_some()
        {
            return Err(SqlError::Unsupported("DELETE ... USING".into()));
        }

        Ok(DeleteShape {
            table,
            target: trim(&self.tokens, target_start, where_at.unwrap_or(body.end)),
            predicate: where_at.map(|w| trim(&self.tokens, w + 1, body.end)),
        })
    }

    /// Source text covered by a token range.
    pub fn text(&self, range: Range<usize>) -> &'a str {
        match (self.tokens.get(range.start), range.end.checked_sub(1)) {
            (Some(first), Some(last)) if range.start < range.end => {
                &self.sql[first.start..self.tokens[last].end]
            }
            _ => "",
        }
    }

    // ------------------------------------------------------------------------
    // Cursor helpers
    // ------------------------------------------------------------------------

    fn expect_kind(&self, kind: StatementKind) -> Result<(), SqlError> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(SqlError::Unsupported(format!(
                "expected {:?} statement, found {:?}",
                kind, self.kind
            )))
        }
    }

    /// First non-trivia index in `from..end`, or `end`.
    fn next_code(&self, from: usize, end: usize) -> usize {
        (from..end)
            .find(|&i| !self.tokens[i].is_trivia())
            .unwrap_or(end)
    }

    fn is_keyword_at(&self, at: usize, keyword: &str) -> bool {
        self.tokens
            .get(at)
            .is_some_and(|t| t.is_keyword(self.sql, keyword))
    }

    fn skip_keyword(&self, at: usize, end: usize, keyword: &str) -> usize {
        if self.is_keyword_at(at, keyword) {
            self.next_code(at + 1, end)
        } else {
            at
        }
    }

    fn find_top_level(&self, from: usize, end: usize, keyword: &str) -> Option<usize> {
        top_level(&self.tokens[..end])
            .skip_while(|&i| i < from)
            .find(|&i| self.tokens[i].is_keyword(self.sql, keyword))
    }

    /// Parse `name` or `schema.name` starting at `at`.
    fn table_name(&self, at: usize, end: usize) -> Result<(TableName, usize), SqlError> {
        let first = self
            .ident_at(at)
            .ok_or_else(|| SqlError::Unsupported("missing table name".into()))?;

        let dot = self.next_code(at + 1, end);
        if self.tokens.get(dot).is_some_and(|t| t.is_punct(b'.')) {
            let second_at = self.next_code(dot + 1, end);
            let second = self
                .ident_at(second_at)
                .ok_or_else(|| SqlError::Unsupported("incomplete qualified table name".into()))?;
            return Ok((
                TableName {
                    raw: self.text(at..second_at + 1).to_string(),
                    schema: Some(first),
                    name: second,
                },
                second_at + 1,
            ));
        }

        Ok((
            TableName {
                raw: self.text(at..at + 1).to_string(),
                schema: None,
                name: first,
            },
            at + 1,
        ))
    }

    /// Unquoted identifier at `at`, if the token is one.
    fn ident_at(&self, at: usize) -> Option<String> {
        let token = self.tokens.get(at)?;
        match token.kind {
            TokenKind::Word => Some(token.text(self.sql).to_string()),
            TokenKind::QuotedIdent => Some(unquote(token.text(self.sql))),
            _ => None,
        }
    }

    /// Left-hand sides of `a = ..., (b, c) = ...`.
    fn assigned_columns(&self, set: Range<usize>) -> Vec<String> {
        let mut columns = Vec::new();
        let mut expect_target = true;
        let mut depth = 0usize;
        let mut in_tuple = false;

        for i in set {
            let token = self.tokens[i];
            if token.is_trivia() {
                continue;
            }
            match token.kind {
                TokenKind::Punct(b'(') => {
                    if expect_target && depth == 0 {
                        in_tuple = true;
                    }
                    depth += 1;
                }
                TokenKind::Punct(b')') => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 && in_tuple {
                        in_tuple = false;
                        expect_target = false;
                    }
                }
                TokenKind::Punct(b',') if depth == 0 => expect_target = true,
                TokenKind::Word | TokenKind::QuotedIdent if expect_target || in_tuple => {
                    if let Some(name) = self.ident_at(i) {
                        columns.push(name);
                    }
                    if !in_tuple {
                        expect_target = false;
                    }
                }
                _ => {
                    if !in_tuple {
                        expect_target = false;
                    }
                }
            }
        }

        columns
    }
}

/// Indices of non-trivia tokens at parenthesis depth 0.
fn top_level(tokens: &[Token]) -> impl Iterator<Item = usize> + '_ {
    let mut depth = 0usize;
    tokens.iter().enumerate().filter_map(move |(i, t)| {
        match t.kind {
            TokenKind::Punct(b'(') => depth += 1,
            TokenKind::Punct(b')') => depth = depth.saturating_sub(1),
            _ if depth == 0 && !t.is_trivia() => return Some(i),
            _ => {}
        }
        None
    })
}

/// Shrink `start..end` past surrounding trivia and trailing semicolons.
fn trim(tokens: &[Token], start: usize, end: usize) -> Range<usize> {
    let start = (start..end)
        .find(|&i| !tokens[i].is_trivia())
        .unwrap_or(end);
    start..trim_end(tokens, start, end)
}

fn trim_end(tokens: &[Token], start: usize, mut end: usize) -> usize {
    while end > start && (tokens[end - 1].is_trivia() || tokens[end - 1].is_punct(b';')) {
        end -= 1;
    }
    end
}

/// Strip identifier quotes and undouble escaped quotes.
pub fn unquote(ident: &str) -> String {
    let bytes = ident.as_bytes();
    match bytes.first() {
        Some(&q @ (b'"' | b'`')) if ident.len() >= 2 && bytes[bytes.len() - 1] == q => {
            let q = q as char;
            ident[1..ident.len() - 1].replace(&format!("{q}{q}"), &q.to_string())
        }
        _ => ident.to_string(),
    }
}

/// Double-quote an identifier for SQL text.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
