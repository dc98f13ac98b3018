//! Lexical scanner for base queries
//!
//! Splits SQL text into tokens so keyword detection never looks inside string
//! literals, quoted identifiers or comments, and records the parenthesis depth
//! of every token so subqueries and CTE bodies can be told apart from the
//! outer statement.
//!
//! Literals follow PostgreSQL: `'...'` with `''` escapes, `E'...'` with
//! backslash escapes and `$tag$...$tag$` dollar quoting.

use std::iter::Peekable;
use std::ops::Range;
use std::str::CharIndices;

/// Token classes the rewriter cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword
    Word,
    /// `'...'`, `E'...'` or `$tag$...$tag$` string literal
    Literal,
    /// `"..."`, `[...]` or `` `...` `` identifier
    QuotedIdent,
    /// `-- ...` or `/* ... */`
    Comment,
    Whitespace,
    OpenParen,
    CloseParen,
    Semicolon,
    /// Any other single character (operators, commas, `:`)
    Punct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte range in the scanned text
    pub span: Range<usize>,
    /// Parenthesis depth; `0` is the outer statement
    pub depth: usize,
}

impl Token {
    pub fn text<'a>(&self, sql: &'a str) -> &'a str {
        &sql[self.span.clone()]
    }

    /// Case-insensitive keyword match
    pub fn is_keyword(&self, sql: &str, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text(sql).eq_ignore_ascii_case(keyword)
    }

    /// Whether the token carries meaning (not whitespace or a comment)
    pub fn is_significant(&self) -> bool {
        !matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '#' || c == '@'
}

/// Opening delimiter of a dollar-quoted string at the start of `rest`
///
/// `$$` and `$tag$` qualify; `$1` is a positional parameter.
fn dollar_tag(rest: &str) -> Option<&str> {
    let mut chars = rest.char_indices();
    if !matches!(chars.next(), Some((_, '$'))) {
        return None;
    }
    for (i, ch) in chars {
        match ch {
            '$' => return Some(&rest[..=i]),
            c if c.is_ascii_digit() && i == 1 => return None,
            c if c.is_ascii_alphanumeric() || c == '_' => {}
            _ => return None,
        }
    }
    None
}

/// Byte offset just past the closing quote of an `E'...'` body
fn escape_string_end(chars: &mut Peekable<CharIndices<'_>>) -> Option<usize> {
    while let Some((i, ch)) = chars.next() {
        match ch {
            '\\' => {
                chars.next();
            }
            '\'' if matches!(chars.peek(), Some((_, '\''))) => {
                chars.next();
            }
            '\'' => return Some(i + 1),
            _ => {}
        }
    }
    None
}

/// Tokenize `sql`
///
/// # Errors
///
/// Returns a description of the problem for unterminated literals, quoted
/// identifiers or block comments and for unbalanced parentheses.
pub fn tokenize(sql: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut depth: usize = 0;
    let mut chars = sql.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        if c == '$' {
            if let Some(tag) = dollar_tag(&sql[start..]) {
                let body = start + tag.len();
                let end = sql[body..]
                    .find(tag)
                    .map(|i| body + i + tag.len())
                    .ok_or_else(|| format!("unterminated dollar-quoted string at byte {start}"))?;
                while matches!(chars.peek(), Some(&(i, _)) if i < end) {
                    chars.next();
                }
                tokens.push(Token {
                    kind: TokenKind::Literal,
                    span: start..end,
                    depth,
                });
                continue;
            }
        }

        let (kind, end, token_depth) = match c {
            'E' | 'e' if matches!(chars.peek(), Some((_, '\''))) => {
                chars.next();
                let end = escape_string_end(&mut chars)
                    .ok_or_else(|| format!("unterminated string literal at byte {start}"))?;
                (TokenKind::Literal, end, depth)
            }
            '\'' => {
                let mut end = None;
                while let Some((i, ch)) = chars.next() {
                    if ch == '\'' {
                        if matches!(chars.peek(), Some((_, '\''))) {
                            chars.next();
                            continue;
                        }
                        end = Some(i + 1);
                        break;
                    }
                }
                let end = end.ok_or_else(|| format!("unterminated string literal at byte {start}"))?;
                (TokenKind::Literal, end, depth)
            }
            '"' | '[' | '`' => {
                let close = match c {
                    '"' => '"',
                    '[' => ']',
                    _ => '`',
                };
                let end = chars
                    .by_ref()
                    .find(|&(_, ch)| ch == close)
                    .map(|(i, ch)| i + ch.len_utf8())
                    .ok_or_else(|| format!("unterminated quoted identifier at byte {start}"))?;
                (TokenKind::QuotedIdent, end, depth)
            }
            '-' if matches!(chars.peek(), Some((_, '-'))) => {
                let mut end = sql.len();
                while let Some(&(i, ch)) = chars.peek() {
                    if ch == '\n' {
                        end = i;
                        break;
                    }
                    chars.next();
                }
                (TokenKind::Comment, end, depth)
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut prev = '\0';
                let mut end = None;
                for (i, ch) in chars.by_ref() {
                    if prev == '*' && ch == '/' {
                        end = Some(i + 1);
                        break;
                    }
                    prev = ch;
                }
                let end = end.ok_or_else(|| format!("unterminated block comment at byte {start}"))?;
                (TokenKind::Comment, end, depth)
            }
            '(' => {
                let token_depth = depth;
                depth += 1;
                (TokenKind::OpenParen, start + 1, token_depth)
            }
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| format!("unbalanced ')' at byte {start}"))?;
                (TokenKind::CloseParen, start + 1, depth)
            }
            ';' => (TokenKind::Semicolon, start + 1, depth),
            c if c.is_whitespace() => {
                let mut end = start + c.len_utf8();
                while let Some(&(i, ch)) = chars.peek() {
                    if !ch.is_whitespace() {
                        break;
                    }
                    end = i + ch.len_utf8();
                    chars.next();
                }
                (TokenKind::Whitespace, end, depth)
            }
            c if is_word_char(c) => {
                let mut end = start + c.len_utf8();
                while let Some(&(i, ch)) = chars.peek() {
                    if !is_word_char(ch) {
                        break;
                    }
                    end = i + ch.len_utf8();
                    chars.next();
                }
                (TokenKind::Word, end, depth)
            }
            c => (TokenKind::Punct, start + c.len_utf8(), depth),
        };

        tokens.push(Token {
            kind,
            span: start..end,
            depth: token_depth,
        });
    }

    if depth != 0 {
        return Err(format!("{depth} unclosed '(' in query"));
    }

    Ok(tokens)
}

/// Index of the next significant token after `index`
pub fn next_significant(tokens: &[Token], index: usize) -> Option<usize> {
    tokens
        .iter()
        .enumerate()
        .skip(index + 1)
        .find(|(_, t)| t.is_significant())
        .map(|(i, _)| i)
}

/// Keywords that end the outer `WHERE` clause of a SELECT
const SINGLE_TRAILING: &[&str] = &[
    "HAVING", "LIMIT", "OFFSET", "FETCH", "UNION", "INTERSECT", "EXCEPT", "WINDOW", "FOR",
];

/// Keywords that end the outer `WHERE` clause when followed by `BY`
const BY_TRAILING: &[&str] = &["GROUP", "ORDER"];

/// Index of the first top-level clause that must follow `WHERE`
pub fn first_trailing_clause(sql: &str, tokens: &[Token]) -> Option<usize> {
    tokens.iter().enumerate().find_map(|(i, token)| {
        if token.depth != 0 || token.kind != TokenKind::Word {
            return None;
        }
        if SINGLE_TRAILING.iter().any(|kw| token.is_keyword(sql, kw)) {
            return Some(i);
        }
        if BY_TRAILING.iter().any(|kw| token.is_keyword(sql, kw)) {
            let next = next_significant(tokens, i)?;
            if tokens[next].is_keyword(sql, "BY") {
                return Some(i);
            }
        }
        None
    })
}

/// Index of the first top-level `WHERE` before `limit`
pub fn top_level_where(sql: &str, tokens: &[Token], limit: usize) -> Option<usize> {
    tokens[..limit]
        .iter()
        .position(|t| t.depth == 0 && t.is_keyword(sql, "WHERE"))
}

/// Whether a top-level `OR` occurs in `tokens[from..to]`
pub fn has_top_level_or(sql: &str, tokens: &[Token], from: usize, to: usize) -> bool {
    tokens[from..to]
        .iter()
        .any(|t| t.depth == 0 && t.is_keyword(sql, "OR"))
}

/// Byte spans of `:name` placeholders outside literals and comments
///
/// A `:` directly preceded by another `:` is a cast (`x::date`) and is
/// ignored, as is any name that merely starts with `name`.
pub fn placeholder_spans(sql: &str, tokens: &[Token], name: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::Punct || token.text(sql) != ":" {
            continue;
        }
        let after_colon = i > 0
            && tokens[i - 1].kind == TokenKind::Punct
            && tokens[i - 1].text(sql) == ":"
            && tokens[i - 1].span.end == token.span.start;
        if after_colon {
            continue;
        }
        if let Some(word) = tokens.get(i + 1) {
            if word.kind == TokenKind::Word
                && word.span.start == token.span.end
                && word.text(sql) == name
            {
                spans.push(token.span.start..word.span.end);
            }
        }
    }
    spans
}
