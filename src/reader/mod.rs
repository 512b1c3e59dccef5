//! Source stream, indentation tracking, and the lexical primitives the parser
//! scans tokens with.
//!
//! Grounded on `original_source/ome/parser.py`'s `ParserState`/`Parser.scan`,
//! `set_indent`/`push_indent`/`pop_indent`, and `has_more_tokens`.

use regex_lite_matchers as matchers;

use crate::error::OmeError;
use crate::position::Position;

const DEFAULT_TAB_WIDTH: u32 = 8;

/// One level of the indentation stack: the column an inner expression must
/// stay within, and the line that column was first established on.
#[derive(Debug, Clone, Copy)]
struct IndentFrame {
    indent_level: i64,
    indent_line: i64,
}

/// Token-stream state shared by every parser entry point.
///
/// Unlike a conventional lexer that pre-tokenizes, OME's source reader is
/// scanned on demand: `expr_token`/`token` attempt to match a pattern at the
/// current position only if `has_more_tokens` says the position still
/// belongs to the current sub-expression.
pub struct Reader {
    stream_name: String,
    chars: Vec<char>,
    pub pos: usize,
    line_pos: usize,
    line_number: u32,
    tab_width: u32,
    indent_level: i64,
    indent_line: i64,
    indent_stack: Vec<IndentFrame>,
}

/// A saved cursor, restorable with [`Reader::restore`]. Used for speculative
/// lookahead (e.g. distinguishing a keyword-message send from a local
/// assignment) the way the reference parser's `copy_state`/`set_state` do.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pos: usize,
    line_pos: usize,
    line_number: u32,
    indent_level: i64,
    indent_line: i64,
    indent_stack: Vec<IndentFrame>,
}

impl Reader {
    pub fn new(source: &str, stream_name: impl Into<String>) -> Self {
        Reader {
            stream_name: stream_name.into(),
            chars: source.chars().collect(),
            pos: 0,
            line_pos: 0,
            line_number: 1,
            tab_width: DEFAULT_TAB_WIDTH,
            indent_level: -1,
            indent_line: -1,
            indent_stack: Vec::new(),
        }
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, OmeError> {
        let bytes = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OmeError::Io { message: format!("file does not exist: {}", path.display()) }
            } else {
                OmeError::Io { message: e.to_string() }
            }
        })?;
        let source = String::from_utf8(bytes)?;
        Ok(Reader::new(&source, path.display().to_string()))
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    pub fn column(&self) -> u32 {
        (self.pos - self.line_pos) as u32
    }

    pub fn line_number(&self) -> u32 {
        self.line_number
    }

    /// The text of the line the cursor currently sits on, for caret diagnostics.
    pub fn current_line(&self) -> String {
        let mut end = self.pos;
        while end < self.chars.len() && self.chars[end] != '\n' && self.chars[end] != '\r' {
            end += 1;
        }
        self.chars[self.line_pos..end].iter().collect()
    }

    pub fn position(&self) -> Position {
        Position::new(self.stream_name.clone(), self.line_number, self.column(), self.current_line())
    }

    pub fn error(&self, message: impl Into<String>) -> OmeError {
        OmeError::Parse { message: message.into(), position: self.position() }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pos: self.pos,
            line_pos: self.line_pos,
            line_number: self.line_number,
            indent_level: self.indent_level,
            indent_line: self.indent_line,
            indent_stack: self.indent_stack.clone(),
        }
    }

    pub fn restore(&mut self, checkpoint: &Checkpoint) {
        self.pos = checkpoint.pos;
        self.line_pos = checkpoint.line_pos;
        self.line_number = checkpoint.line_number;
        self.indent_level = checkpoint.indent_level;
        self.indent_line = checkpoint.indent_line;
        self.indent_stack = checkpoint.indent_stack.clone();
    }

    /// Mark the current column as the minimum indentation for a new
    /// sub-expression (a statement-line group, an array, a parenthesised
    /// expression).
    pub fn set_indent(&mut self) {
        self.indent_level = self.column() as i64;
        self.indent_line = self.line_number as i64;
    }

    pub fn push_indent(&mut self) {
        self.indent_stack.push(IndentFrame { indent_level: self.indent_level, indent_line: self.indent_line });
    }

    pub fn pop_indent(&mut self) {
        let frame = self.indent_stack.pop().expect("pop_indent without matching push_indent");
        self.indent_level = frame.indent_level;
        self.indent_line = frame.indent_line;
    }

    /// Whether the current position is still part of the innermost
    /// sub-expression: either past the required indent column, or on the
    /// line that indent was set on.
    pub fn has_more_tokens(&self) -> bool {
        !self.at_end() && ((self.pos - self.line_pos) as i64 > self.indent_level || self.line_number as i64 == self.indent_line)
    }

    /// Skip whitespace and comments, tracking line/column and collecting any
    /// comment text encountered (discarded here, but scanned so position
    /// tracking matches the reference scanner exactly).
    pub fn scan(&mut self) {
        loop {
            while let Some(c) = self.peek_char() {
                match c {
                    ' ' | '\t' => {
                        self.pos += 1;
                    }
                    '\r' => {
                        self.pos += 1;
                        if self.peek_char() == Some('\n') {
                            self.pos += 1;
                        }
                        self.line_number += 1;
                        self.line_pos = self.pos;
                    }
                    '\n' => {
                        self.pos += 1;
                        self.line_number += 1;
                        self.line_pos = self.pos;
                    }
                    _ => break,
                }
            }
            if matchers::starts_with_comment(&self.chars, self.pos) {
                while let Some(c) = self.peek_char() {
                    if c == '\n' || c == '\r' {
                        break;
                    }
                    self.pos += 1;
                }
                continue;
            }
            break;
        }
    }

    /// Match a literal string at the current position, without any of the
    /// indentation gating `expr_token` applies. Advances on success.
    pub fn token_str(&mut self, literal: &str) -> bool {
        self.scan();
        if self.matches_literal(literal) {
            self.pos += literal.chars().count();
            true
        } else {
            false
        }
    }

    /// Like [`Reader::token_str`] but gated by [`Reader::has_more_tokens`],
    /// for tokens that participate in the expression grammar rather than
    /// block/array delimiters.
    pub fn expr_token_str(&mut self, literal: &str) -> bool {
        self.scan();
        if self.has_more_tokens() {
            self.token_str_no_scan(literal)
        } else {
            false
        }
    }

    fn token_str_no_scan(&mut self, literal: &str) -> bool {
        if self.matches_literal(literal) {
            self.pos += literal.chars().count();
            true
        } else {
            false
        }
    }

    fn matches_literal(&self, literal: &str) -> bool {
        let lit: Vec<char> = literal.chars().collect();
        if self.pos + lit.len() > self.chars.len() {
            return false;
        }
        self.chars[self.pos..self.pos + lit.len()] == lit[..]
    }

    pub fn peek_literal(&mut self, literal: &str) -> bool {
        self.matches_literal(literal)
    }

    pub fn peek_end_token(&mut self) -> bool {
        matches!(self.peek_char(), Some('|') | Some(')') | Some('}') | Some(']'))
    }

    /// Source text from `start` to the current position, for slicing a
    /// regex-style match out of the char buffer.
    pub fn slice(&self, start: usize, end: usize) -> String {
        self.chars[start..end].iter().collect()
    }
}

/// Small hand-rolled matchers standing in for the reference scanner's
/// regexes (`re_name`, `re_number`, `re_string`, ...). Kept in their own
/// module so `Reader` itself stays free of character-class logic.
pub mod lex {
    use super::Reader;

    fn is_name_start(c: char) -> bool {
        c.is_ascii_alphabetic()
    }

    fn is_name_continue(c: char) -> bool {
        c.is_ascii_alphanumeric()
    }

    /// `~?[a-zA-Z][a-zA-Z0-9]*(?:-[a-zA-Z0-9]+)*`
    fn match_name_body(chars: &[char], mut pos: usize) -> Option<usize> {
        let start = pos;
        if pos >= chars.len() || !is_name_start(chars[pos]) {
            return None;
        }
        pos += 1;
        while pos < chars.len() && is_name_continue(chars[pos]) {
            pos += 1;
        }
        loop {
            if pos < chars.len() && chars[pos] == '-' {
                let mut p = pos + 1;
                let seg_start = p;
                while p < chars.len() && is_name_continue(chars[p]) {
                    p += 1;
                }
                if p == seg_start {
                    break;
                }
                pos = p;
            } else {
                break;
            }
        }
        if pos == start {
            None
        } else {
            Some(pos)
        }
    }

    /// Matches a plain name, optionally private (`~name`). Returns the full
    /// matched text including the `~`.
    pub fn match_name(reader: &mut Reader) -> Option<String> {
        let chars = reader.chars_snapshot();
        let start = reader.pos;
        let mut pos = start;
        if pos < chars.len() && chars[pos] == '~' {
            pos += 1;
        }
        let end = match_name_body(&chars, pos)?;
        let text = chars[start..end].iter().collect::<String>();
        reader.pos = end;
        Some(text)
    }

    /// Matches a plain argument name: never private (`~` not accepted).
    pub fn match_arg_name(reader: &mut Reader) -> Option<String> {
        let chars = reader.chars_snapshot();
        let end = match_name_body(&chars, reader.pos)?;
        let text = chars[reader.pos..end].iter().collect::<String>();
        reader.pos = end;
        Some(text)
    }

    /// Matches a keyword: a name (optionally private) immediately followed
    /// by `:`.
    pub fn match_keyword(reader: &mut Reader) -> Option<String> {
        let checkpoint = reader.checkpoint();
        let chars = reader.chars_snapshot();
        let start = reader.pos;
        let mut pos = start;
        if pos < chars.len() && chars[pos] == '~' {
            pos += 1;
        }
        let name_end = match match_name_body(&chars, pos) {
            Some(e) => e,
            None => {
                reader.restore(&checkpoint);
                return None;
            }
        };
        if name_end >= chars.len() || chars[name_end] != ':' {
            reader.restore(&checkpoint);
            return None;
        }
        let end = name_end + 1;
        let text = chars[start..end].iter().collect::<String>();
        reader.pos = end;
        Some(text)
    }

    /// Matches `[+-]?[0-9]+(\.[0-9]+)?(e[+-]?[0-9]+)?`, returning
    /// `(whole, decimal, exponent)` text parts.
    pub fn match_number(reader: &mut Reader) -> Option<(String, Option<String>, Option<String>)> {
        let chars = reader.chars_snapshot();
        let mut pos = reader.pos;
        let whole_start = pos;
        if pos < chars.len() && (chars[pos] == '+' || chars[pos] == '-') {
            pos += 1;
        }
        let digits_start = pos;
        while pos < chars.len() && chars[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == digits_start {
            return None;
        }
        let whole = chars[whole_start..pos].iter().collect::<String>();

        let mut decimal = None;
        if pos < chars.len() && chars[pos] == '.' {
            let dec_start = pos + 1;
            let mut dp = dec_start;
            while dp < chars.len() && chars[dp].is_ascii_digit() {
                dp += 1;
            }
            if dp > dec_start {
                decimal = Some(chars[dec_start..dp].iter().collect::<String>());
                pos = dp;
            }
        }

        let mut exponent = None;
        if pos < chars.len() && (chars[pos] == 'e' || chars[pos] == 'E') {
            let mut ep = pos + 1;
            let sign_start = ep;
            if ep < chars.len() && (chars[ep] == '+' || chars[ep] == '-') {
                ep += 1;
            }
            let exp_digits_start = ep;
            while ep < chars.len() && chars[ep].is_ascii_digit() {
                ep += 1;
            }
            if ep > exp_digits_start {
                exponent = Some(chars[sign_start..ep].iter().collect::<String>());
                pos = ep;
            }
        }

        reader.pos = pos;
        Some((whole, decimal, exponent))
    }

    /// Matches a single-quoted string literal with the sole `\'` escape.
    /// Returns the unescaped contents.
    pub fn match_string(reader: &mut Reader) -> Option<String> {
        let chars = reader.chars_snapshot();
        if reader.pos >= chars.len() || chars[reader.pos] != '\'' {
            return None;
        }
        let mut pos = reader.pos + 1;
        let mut out = String::new();
        loop {
            if pos >= chars.len() {
                return None;
            }
            match chars[pos] {
                '\n' | '\r' => return None,
                '\'' => {
                    pos += 1;
                    break;
                }
                '\\' if pos + 1 < chars.len() && chars[pos + 1] == '\'' => {
                    out.push('\'');
                    pos += 2;
                }
                c => {
                    out.push(c);
                    pos += 1;
                }
            }
        }
        reader.pos = pos;
        Some(out)
    }
}

impl Reader {
    fn chars_snapshot(&self) -> &[char] {
        &self.chars
    }
}

/// Tiny helpers used only by `scan()` to recognise comment openers without
/// pulling in the `regex` crate for two fixed two-character prefixes.
mod regex_lite_matchers {
    pub fn starts_with_comment(chars: &[char], pos: usize) -> bool {
        if pos >= chars.len() {
            return false;
        }
        if chars[pos] == '#' {
            return true;
        }
        pos + 1 < chars.len() && chars[pos] == '-' && chars[pos + 1] == '-'
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_and_line_tracking() {
        let mut r = Reader::new("abc\n  def", "<test>");
        r.scan();
        assert_eq!(r.column(), 0);
        assert_eq!(r.line_number(), 1);
        r.pos += 3; // consume 'abc'
        r.scan();
        assert_eq!(r.line_number(), 2);
        assert_eq!(r.column(), 2);
    }

    #[test]
    fn has_more_tokens_respects_indent() {
        let mut r = Reader::new("  x\n  y\nz", "<test>");
        r.scan();
        r.set_indent();
        assert!(r.has_more_tokens());
        r.pos += 1; // x
        r.scan();
        assert!(r.has_more_tokens());
        r.pos += 1; // y
        r.scan();
        assert!(!r.has_more_tokens());
    }

    #[test]
    fn match_name_allows_hyphenated_segments() {
        let mut r = Reader::new("foo-bar-2 rest", "<test>");
        let m = lex::match_name(&mut r).unwrap();
        assert_eq!(m, "foo-bar-2");
    }

    #[test]
    fn match_keyword_requires_colon() {
        let mut r = Reader::new("foo: 1", "<test>");
        let m = lex::match_keyword(&mut r).unwrap();
        assert_eq!(m, "foo:");
    }

    #[test]
    fn match_number_splits_parts() {
        let mut r = Reader::new("123.450e-2", "<test>");
        let (whole, decimal, exponent) = lex::match_number(&mut r).unwrap();
        assert_eq!(whole, "123");
        assert_eq!(decimal.as_deref(), Some("450"));
        assert_eq!(exponent.as_deref(), Some("-2"));
    }

    #[test]
    fn match_string_handles_escape() {
        let mut r = Reader::new(r"'it\'s'", "<test>");
        let s = lex::match_string(&mut r).unwrap();
        assert_eq!(s, "it's");
    }
}
