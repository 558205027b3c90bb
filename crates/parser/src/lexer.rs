//! Line-aware tokenization.
//!
//! The language is line-oriented: statements end at the line break, and
//! under `ADDRESS ... MATCHING` raw source lines are forwarded to handlers
//! verbatim. The lexer therefore scans one physical line at a time and keeps
//! the original text of every line. A line that cannot be tokenized (say,
//! SQL destined for a handler) is recorded with its error instead of failing
//! the whole file; the parser decides whether that is fatal.
//!
//! Cross-line state is limited to block comments (`/* ... */`) and HEREDOC
//! bodies, both of which preserve the line count.

use crate::error::ParseError;
use crate::token::{Token, TokenKind};

/// One physical source line with its tokens.
#[derive(Debug, Clone)]
pub struct SourceLine {
    /// 1-based line number.
    pub number: usize,
    /// Original text, untrimmed.
    pub raw: String,
    pub tokens: Vec<Token>,
    /// Set when the line could not be fully tokenized. Tokens lexed before
    /// the error are kept so the parser can tell a malformed statement from
    /// foreign handler text.
    pub error: Option<ParseError>,
}

impl SourceLine {
    /// True when the line holds nothing but whitespace.
    pub fn is_blank(&self) -> bool {
        self.raw.trim().is_empty()
    }
}

/// Tokenize source text into lines.
///
/// Fails only on unterminated multi-line constructs (HEREDOC bodies and
/// block comments); per-line problems are recorded on the line.
pub fn tokenize(source: &str) -> Result<Vec<SourceLine>, ParseError> {
    let mut lines: Vec<SourceLine> = Vec::new();
    let mut comment_start: Option<usize> = None;
    // Open HEREDOC: tag, introducer line, body collected so far.
    let mut heredoc: Option<(String, usize, Vec<String>)> = None;

    for (idx, raw_line) in source.lines().enumerate() {
        let number = idx + 1;
        let raw = raw_line.strip_suffix('\r').unwrap_or(raw_line);

        if let Some((tag, _, body)) = &mut heredoc {
            if raw.trim() == tag.as_str() {
                let (_, _, body) = heredoc.take().expect("heredoc state");
                close_heredoc(&mut lines, body);
            } else {
                body.push(raw.to_string());
            }
            continue;
        }

        let (line, opened_tag) = lex_line(raw, number, &mut comment_start);
        lines.push(line);
        if let Some(tag) = opened_tag {
            heredoc = Some((tag, number, Vec::new()));
        }
    }

    if let Some((tag, start, _)) = heredoc {
        return Err(ParseError::UnterminatedHeredoc { tag, line: start });
    }
    if let Some(start) = comment_start {
        return Err(ParseError::UnterminatedComment { line: start });
    }
    Ok(lines)
}

/// Write the collected body into the introducer line's HEREDOC token.
fn close_heredoc(lines: &mut [SourceLine], body: Vec<String>) {
    let introducer = lines
        .iter_mut()
        .rev()
        .find(|l| {
            matches!(
                l.tokens.last().map(|t| &t.kind),
                Some(TokenKind::Heredoc { .. })
            )
        })
        .expect("heredoc introducer line");
    if let Some(Token {
        kind: TokenKind::Heredoc { body: slot, .. },
        ..
    }) = introducer.tokens.last_mut()
    {
        *slot = body.join("\n");
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Tokenize one physical line. Returns the line and the tag of a HEREDOC it
/// opened, if any.
fn lex_line(
    raw: &str,
    number: usize,
    comment_start: &mut Option<usize>,
) -> (SourceLine, Option<String>) {
    let chars: Vec<char> = raw.chars().collect();
    let mut tokens = Vec::new();
    let mut error = None;
    let mut opened_heredoc = None;
    let mut i = 0;

    while i < chars.len() {
        if comment_start.is_some() {
            if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                *comment_start = None;
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }

        let c = chars[i];
        if c == ' ' || c == '\t' {
            i += 1;
            continue;
        }

        // Comments. `--` always starts one; `//` only in statement position
        // (elsewhere it is the remainder operator).
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            *comment_start = Some(number);
            i += 2;
            continue;
        }
        if c == '-' && chars.get(i + 1) == Some(&'-') {
            break;
        }
        if c == '/' && chars.get(i + 1) == Some(&'/') && tokens.is_empty() {
            break;
        }

        // String literal, REXX quote doubling, no escapes.
        if c == '\'' || c == '"' {
            let start = i;
            let quote = c;
            i += 1;
            let mut value = String::new();
            let mut closed = false;
            while i < chars.len() {
                if chars[i] == quote {
                    if chars.get(i + 1) == Some(&quote) {
                        value.push(quote);
                        i += 2;
                    } else {
                        closed = true;
                        i += 1;
                        break;
                    }
                } else {
                    value.push(chars[i]);
                    i += 1;
                }
            }
            if !closed {
                error = Some(ParseError::UnterminatedString { line: number });
                break;
            }
            push(&mut tokens, TokenKind::String(value), number, &chars[start..i]);
            continue;
        }

        // HEREDOC introducer: `<<TAG`, rest of the line ignored. The body is
        // collected by `tokenize`.
        if c == '<'
            && chars.get(i + 1) == Some(&'<')
            && chars.get(i + 2).copied().map(is_ident_start).unwrap_or(false)
        {
            let start = i;
            i += 2;
            let tag_start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let tag: String = chars[tag_start..i].iter().collect();
            push(
                &mut tokens,
                TokenKind::Heredoc {
                    tag: tag.clone(),
                    body: String::new(),
                },
                number,
                &chars[start..i],
            );
            opened_heredoc = Some(tag);
            break;
        }

        // Number literal.
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if chars.get(i) == Some(&'.')
                && chars.get(i + 1).map(|c| c.is_ascii_digit()).unwrap_or(false)
            {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            if matches!(chars.get(i), Some('e') | Some('E')) {
                let mut j = i + 1;
                if matches!(chars.get(j), Some('+') | Some('-')) {
                    j += 1;
                }
                if chars.get(j).map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let lexeme: String = chars[start..i].iter().collect();
            match lexeme.parse::<f64>() {
                Ok(n) => push(&mut tokens, TokenKind::Number(n), number, &chars[start..i]),
                Err(_) => {
                    error = Some(ParseError::UnexpectedChar { ch: c, line: number });
                    break;
                }
            }
            continue;
        }

        // Identifier or compound symbol (`stem.tail`, `arr.0`).
        if is_ident_start(c) {
            let start = i;
            while i < chars.len() && is_ident_continue(chars[i]) {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();
            push(
                &mut tokens,
                TokenKind::Identifier(name),
                number,
                &chars[start..i],
            );
            continue;
        }

        // Operators and punctuation.
        let (kind, width) = match c {
            '<' if chars.get(i + 1) == Some(&'>') => (TokenKind::NotEquals, 2),
            '<' if chars.get(i + 1) == Some(&'=') => (TokenKind::LessEqual, 2),
            '<' => (TokenKind::Less, 1),
            '>' if chars.get(i + 1) == Some(&'=') => (TokenKind::GreaterEqual, 2),
            '>' => (TokenKind::Greater, 1),
            '=' if chars.get(i + 1) == Some(&'=') => (TokenKind::DoubleEquals, 2),
            '=' => (TokenKind::Equals, 1),
            '¬' if chars.get(i + 1) == Some(&'=') => (TokenKind::NotEquals, 2),
            '¬' => (TokenKind::Not, 1),
            '\\' if chars.get(i + 1) == Some(&'=') => (TokenKind::NotEquals, 2),
            '\\' => (TokenKind::Not, 1),
            '|' if chars.get(i + 1) == Some(&'|') => (TokenKind::Concat, 2),
            '|' if chars.get(i + 1) == Some(&'>') => (TokenKind::PipeOp, 2),
            '|' => (TokenKind::VerticalBar, 1),
            '&' => (TokenKind::Ampersand, 1),
            '*' if chars.get(i + 1) == Some(&'*') => (TokenKind::DoubleStar, 2),
            '*' => (TokenKind::Star, 1),
            '/' if chars.get(i + 1) == Some(&'/') => (TokenKind::DoubleSlash, 2),
            '/' => (TokenKind::Slash, 1),
            '+' => (TokenKind::Plus, 1),
            '-' => (TokenKind::Minus, 1),
            '%' => (TokenKind::Percent, 1),
            ',' => (TokenKind::Comma, 1),
            '(' => (TokenKind::LParen, 1),
            ')' => (TokenKind::RParen, 1),
            '[' => (TokenKind::LBracket, 1),
            ']' => (TokenKind::RBracket, 1),
            '{' => (TokenKind::LBrace, 1),
            '}' => (TokenKind::RBrace, 1),
            ':' => (TokenKind::Colon, 1),
            ';' => (TokenKind::Semicolon, 1),
            '.' => (TokenKind::Dot, 1),
            other => {
                error = Some(ParseError::UnexpectedChar {
                    ch: other,
                    line: number,
                });
                break;
            }
        };
        push(&mut tokens, kind, number, &chars[i..i + width]);
        i += width;
    }

    (
        SourceLine {
            number,
            raw: raw.to_string(),
            tokens,
            error,
        },
        opened_heredoc,
    )
}

fn push(tokens: &mut Vec<Token>, kind: TokenKind, line: usize, lexeme: &[char]) {
    tokens.push(Token {
        kind,
        line,
        lexeme: lexeme.iter().collect(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(line: &SourceLine) -> Vec<&TokenKind> {
        line.tokens.iter().map(|t| &t.kind).collect()
    }

    #[test]
    fn test_tokenize_assignment() {
        let lines = tokenize("LET x = 42").unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(
            kinds(&lines[0]),
            vec![
                &TokenKind::Identifier("LET".to_string()),
                &TokenKind::Identifier("x".to_string()),
                &TokenKind::Equals,
                &TokenKind::Number(42.0),
            ]
        );
    }

    #[test]
    fn test_line_numbers() {
        let lines = tokenize("SAY 1\n\nSAY 3").unwrap();
        assert_eq!(lines[0].number, 1);
        assert_eq!(lines[0].tokens[0].line, 1);
        assert!(lines[1].is_blank());
        assert_eq!(lines[2].tokens[0].line, 3);
    }

    #[test]
    fn test_quote_doubling() {
        let lines = tokenize("SAY 'it''s fine'").unwrap();
        assert_eq!(
            lines[0].tokens[1].kind,
            TokenKind::String("it's fine".to_string())
        );
    }

    #[test]
    fn test_no_escape_interpretation() {
        let lines = tokenize(r#"SAY "a\nb""#).unwrap();
        assert_eq!(
            lines[0].tokens[1].kind,
            TokenKind::String("a\\nb".to_string())
        );
    }

    #[test]
    fn test_compound_symbol_is_one_token() {
        let lines = tokenize("SAY arr.0 obj.key").unwrap();
        assert_eq!(
            kinds(&lines[0]),
            vec![
                &TokenKind::Identifier("SAY".to_string()),
                &TokenKind::Identifier("arr.0".to_string()),
                &TokenKind::Identifier("obj.key".to_string()),
            ]
        );
    }

    #[test]
    fn test_float_literal() {
        let lines = tokenize("LET x = 1.5e2").unwrap();
        assert_eq!(lines[0].tokens[3].kind, TokenKind::Number(150.0));
    }

    #[test]
    fn test_operators() {
        let lines = tokenize("a || b |> c ** 2 <> d ¬= e").unwrap();
        let ops: Vec<&TokenKind> = kinds(&lines[0])
            .into_iter()
            .filter(|k| !matches!(k, TokenKind::Identifier(_) | TokenKind::Number(_)))
            .collect();
        assert_eq!(
            ops,
            vec![
                &TokenKind::Concat,
                &TokenKind::PipeOp,
                &TokenKind::DoubleStar,
                &TokenKind::NotEquals,
                &TokenKind::NotEquals,
            ]
        );
    }

    #[test]
    fn test_double_slash_statement_position_is_comment() {
        let lines = tokenize("// whole line comment\nSAY 7 // 2").unwrap();
        assert!(lines[0].tokens.is_empty());
        assert_eq!(
            kinds(&lines[1]),
            vec![
                &TokenKind::Identifier("SAY".to_string()),
                &TokenKind::Number(7.0),
                &TokenKind::DoubleSlash,
                &TokenKind::Number(2.0),
            ]
        );
    }

    #[test]
    fn test_block_comment_spans_lines() {
        let lines = tokenize("SAY 1 /* spans\nlines */ SAY 2\nSAY 3").unwrap();
        assert_eq!(lines[0].tokens.len(), 2);
        // Tokens after the comment close stay on their own line.
        assert_eq!(lines[1].tokens.len(), 2);
        assert_eq!(lines[1].tokens[0].line, 2);
        assert_eq!(lines[2].tokens[0].line, 3);
    }

    #[test]
    fn test_unterminated_block_comment() {
        let err = tokenize("SAY 1\n/* never closed").unwrap_err();
        assert_eq!(err, ParseError::UnterminatedComment { line: 2 });
    }

    #[test]
    fn test_heredoc_collection() {
        let source = "<<SQL\nSELECT *\nFROM users\nSQL\nSAY 'after'";
        let lines = tokenize(source).unwrap();
        match &lines[0].tokens[0].kind {
            TokenKind::Heredoc { tag, body } => {
                assert_eq!(tag, "SQL");
                assert_eq!(body, "SELECT *\nFROM users");
            }
            other => panic!("expected heredoc, got {:?}", other),
        }
        // The closing tag line is consumed; the next statement keeps its
        // original line number.
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].tokens[0].line, 5);
    }

    #[test]
    fn test_unterminated_heredoc() {
        let err = tokenize("<<END\nnever closed").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnterminatedHeredoc {
                tag: "END".to_string(),
                line: 1
            }
        );
    }

    #[test]
    fn test_unterminated_string_is_line_local() {
        let lines = tokenize("SAY 'oops\nSAY 'fine'").unwrap();
        assert_eq!(
            lines[0].error,
            Some(ParseError::UnterminatedString { line: 1 })
        );
        assert!(lines[1].error.is_none());
    }

    #[test]
    fn test_foreign_text_keeps_raw() {
        let lines = tokenize("  CREATE TABLE test (").unwrap();
        assert!(lines[0].error.is_none());
        assert_eq!(lines[0].raw, "  CREATE TABLE test (");
    }
}
