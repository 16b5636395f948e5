//! Logos-based SQL lexer.
//!
//! This is not a SQL parser. It only splits a statement into tokens precisely
//! enough to find bind placeholders (`$n`, `?`) without touching the inside of
//! string literals, quoted identifiers and comments. Concatenating the text of
//! every token reproduces the input exactly.

use core::ops::Range;

/// Token kinds of the placeholder-aware SQL lexer.
#[derive(::logos::Logos, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlTokenKind {
    #[regex(r"[ \t\r\n\f]+")]
    Whitespace,

    /// `-- ...` up to the end of the line.
    #[regex(r"--[^\n]*", allow_greedy = true)]
    LineComment,

    /// `/* ... */`, not nested.
    #[regex(r"/\*([^*]|\*+[^*/])*\*+/")]
    BlockComment,

    /// `'...'` with `''` as the escaped quote.
    #[regex(r"'([^']|'')*'")]
    StringLiteral,

    /// `"..."` (standard SQL) or `` `...` `` (`MySQL`).
    #[regex(r#""([^"]|"")*""#)]
    #[regex(r"`[^`]*`")]
    QuotedIdent,

    /// Numbered placeholder `$1`, `$2`, ...
    #[regex(r"\$[0-9]+")]
    Placeholder,

    /// Positional placeholder `?`.
    #[token("?")]
    QuestionMark,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Word,

    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Number,

    /// Any other single character: operators, punctuation, stray quotes.
    #[regex(r"[^ \t\r\n\f'`\x22?A-Za-z0-9_]")]
    Symbol,
}

/// A token and its byte span in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlToken {
    pub kind: SqlTokenKind,
    pub span: Range<usize>,
}

/// Tokenize `input`, pairing each token with its source text.
///
/// Input the lexer cannot recognise (an unterminated literal, for example) is
/// kept as [`SqlTokenKind::Symbol`] so no text is lost.
#[must_use]
pub fn tokenize_with_text(input: &str) -> Vec<(SqlToken, &str)> {
    use logos::Logos as _;
    SqlTokenKind::lexer(input)
        .spanned()
        .map(|(result, span)| {
            let kind = result.unwrap_or(SqlTokenKind::Symbol);
            let text = &input[span.clone()];
            (SqlToken { kind, span }, text)
        })
        .collect()
}

/// Zero-based parameter index of a `$n` placeholder token.
///
/// `$0` has no parameter and yields `None`, as does any other token.
#[must_use]
pub fn placeholder_index(token: &SqlToken, text: &str) -> Option<usize> {
    if token.kind != SqlTokenKind::Placeholder {
        return None;
    }
    text[1..].parse::<usize>().ok()?.checked_sub(1)
}

/// Zero-based indices of every `$n` placeholder, in order of occurrence.
#[must_use]
pub fn placeholder_indices(template: &str) -> Vec<usize> {
    tokenize_with_text(template)
        .iter()
        .filter_map(|(token, text)| placeholder_index(token, text))
        .collect()
}

/// Whether `template` contains a positional `?` outside literals.
#[must_use]
pub fn has_positional_marker(template: &str) -> bool {
    tokenize_with_text(template)
        .iter()
        .any(|(token, _)| token.kind == SqlTokenKind::QuestionMark)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<SqlTokenKind> {
        tokenize_with_text(input)
            .into_iter()
            .map(|(t, _)| t.kind)
            .filter(|k| *k != SqlTokenKind::Whitespace)
            .collect()
    }

    #[test]
    fn test_basic_statement() {
        assert_eq!(
            kinds("SELECT balance FROM users WHERE id = $1"),
            [
                SqlTokenKind::Word,
                SqlTokenKind::Word,
                SqlTokenKind::Word,
                SqlTokenKind::Word,
                SqlTokenKind::Word,
                SqlTokenKind::Word,
                SqlTokenKind::Symbol,
                SqlTokenKind::Placeholder,
            ]
        );
    }

    #[test]
    fn test_text_round_trips() {
        let input = "INSERT INTO `t` (\"a\") VALUES ('it''s', $2) -- $3\n/* $4 */ ?";
        let rebuilt: String = tokenize_with_text(input).iter().map(|(_, s)| *s).collect();
        assert_eq!(rebuilt, input);
    }

    #[test]
    fn test_placeholders_skip_literals_and_comments() {
        let input = "SELECT '$1', \"$2\", $3 -- $4\n, /* $5 */ $1";
        assert_eq!(placeholder_indices(input), vec![2, 0]);
    }

    #[test]
    fn test_dollar_zero_is_not_a_parameter() {
        assert!(placeholder_indices("SELECT $0").is_empty());
    }

    #[test]
    fn test_positional_marker_detection() {
        assert!(has_positional_marker("SELECT ? FROM t"));
        assert!(!has_positional_marker("SELECT '?' FROM t"));
    }

    #[test]
    fn test_unterminated_literal_is_kept() {
        let input = "SELECT 'oops";
        let rebuilt: String = tokenize_with_text(input).iter().map(|(_, s)| *s).collect();
        assert_eq!(rebuilt, input);
    }
}
