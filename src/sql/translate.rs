//! Ordinal (`$n`) to generic (`?`) placeholder translation.
//!
//! A backend that binds by position sees one `?` per occurrence, so the
//! translator also yields the parameter order: `$2 ... $1 ... $2` binds as
//! `[p2, p1, p2]`.

use super::error::SqlError;
use super::lexer::{Token, TokenKind};

/// Query text rewritten for a positional backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translated {
    pub sql: String,
    /// 0-based index into the caller's parameters for each emitted `?`.
    pub order: Vec<usize>,
}

impl Translated {
    /// Arrange `params` to line up with the emitted markers.
    pub fn bind<T: Clone>(&self, params: &[T]) -> Vec<T> {
        self.order.iter().map(|&i| params[i].clone()).collect()
    }
}

/// Check that the markers in `tokens` reference exactly `1..=param_count`.
///
/// A bare `?` is rejected: SQLite would bind it positionally.
pub fn validate_markers(tokens: &[Token], param_count: usize) -> Result<(), SqlError> {
    if let Some(generic) = tokens.iter().find(|t| t.kind == TokenKind::Generic) {
        return Err(SqlError::GenericMarker(generic.start));
    }
    check_ordinals(tokens, param_count)
}

/// Check that the `$n` markers reference exactly `1..=param_count`.
///
/// `?` is left alone. PostgreSQL reads it as an operator (`jsonb ? text`).
pub fn check_ordinals(tokens: &[Token], param_count: usize) -> Result<(), SqlError> {
    let mut used = vec![false; param_count];

    for token in tokens {
        if let TokenKind::Marker(n) = token.kind {
            let idx = n as usize - 1;
            if idx >= param_count {
                return Err(SqlError::MissingParameter {
                    marker: n,
                    supplied: param_count,
                });
            }
            used[idx] = true;
        }
    }

    match used.iter().position(|u| !u) {
        Some(unused) => Err(SqlError::UnusedParameter(unused + 1)),
        None => Ok(()),
    }
}

/// Render a token run with every `$n` replaced by `?`.
///
/// The tokens must come from `sql` and be validated already.
pub fn render(sql: &str, tokens: &[Token]) -> Translated {
    let mut out = String::with_capacity(tokens.last().map_or(0, |t| t.end) + 1);
    let mut order = Vec::new();

    for token in tokens {
        match token.kind {
            TokenKind::Marker(n) => {
                out.push('?');
                order.push(n as usize - 1);
            }
            _ => out.push_str(token.text(sql)),
        }
    }

    Translated { sql: out, order }
}

/// Tokenize, validate and render in one step.
pub fn translate(sql: &str, param_count: usize) -> Result<Translated, SqlError> {
    let tokens = super::lexer::tokenize(sql)?;
    validate_markers(&tokens, param_count)?;
    Ok(render(sql, &tokens))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_in_order() {
        let t = translate("INSERT INTO t (a, b) VALUES ($1, $2)", 2).unwrap();
        assert_eq!(t.sql, "INSERT INTO t (a, b) VALUES (?, ?)");
        assert_eq!(t.order, vec![0, 1]);
    }

    #[test]
    fn test_out_of_order_and_reused_markers() {
        let t = translate("SELECT * FROM t WHERE b = $2 AND a = $1 OR c = $2", 2).unwrap();
        assert_eq!(t.sql, "SELECT * FROM t WHERE b = ? AND a = ? OR c = ?");
        assert_eq!(t.order, vec![1, 0, 1]);
        assert_eq!(t.bind(&["a", "b"]), vec!["b", "a", "b"]);
    }

    #[test]
    fn test_literals_untouched() {
        let t = translate("UPDATE t SET note = 'pay $1' WHERE id = $1", 1).unwrap();
        assert_eq!(t.sql, "UPDATE t SET note = 'pay $1' WHERE id = ?");
        assert_eq!(t.order, vec![0]);
    }

    #[test]
    fn test_marker_count_preserved() {
        let sql = "SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11";
        let t = translate(sql, 11).unwrap();
        assert_eq!(t.sql.matches('?').count(), 11);
        assert_eq!(t.order, (0..11).collect::<Vec<_>>());
    }

    #[test]
    fn test_missing_parameter() {
        assert_eq!(
            translate("SELECT $1, $3", 2).unwrap_err(),
            SqlError::MissingParameter {
                marker: 3,
                supplied: 2
            }
        );
    }

    #[test]
    fn test_gap_is_rejected() {
        assert_eq!(
            translate("SELECT $1, $3", 3).unwrap_err(),
            SqlError::UnusedParameter(2)
        );
    }

    #[test]
    fn test_extra_parameter_is_rejected() {
        assert_eq!(
            translate("SELECT 1", 1).unwrap_err(),
            SqlError::UnusedParameter(1)
        );
    }

    #[test]
    fn test_generic_marker_rejected() {
        assert_eq!(
            translate("SELECT * FROM t WHERE a = ?", 0).unwrap_err(),
            SqlError::GenericMarker(26)
        );

        // A quoted question mark is not a marker.
        assert!(translate("SELECT '?' FROM t WHERE a = $1", 1).is_ok());
    }

    #[test]
    fn test_check_ordinals_allows_question_operator() {
        let tokens =
            super::super::lexer::tokenize("SELECT doc ? 'a', doc ?| $2 FROM t WHERE id = $1")
                .unwrap();
        assert!(check_ordinals(&tokens, 2).is_ok());
        assert_eq!(
            validate_markers(&tokens, 2).unwrap_err(),
            SqlError::GenericMarker(11)
        );
        assert_eq!(
            check_ordinals(&tokens, 3).unwrap_err(),
            SqlError::UnusedParameter(3)
        );
    }
}
