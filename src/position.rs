use std::fmt;

/// A point in a source stream, captured at the start of a token or expression.
///
/// Mirrors the fields the reference parser keeps on `ParserState` at the moment
/// a node is created, so diagnostics can be reconstructed long after parsing
/// has moved on.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Position {
    pub stream_name: String,
    pub line_number: u32,
    pub column: u32,
    pub source_line: String,
}

impl Position {
    pub fn new(stream_name: impl Into<String>, line_number: u32, column: u32, source_line: impl Into<String>) -> Self {
        Position {
            stream_name: stream_name.into(),
            line_number,
            column,
            source_line: source_line.into(),
        }
    }

    /// Render the `file:line:column` prefix used by every diagnostic.
    pub fn location(&self) -> String {
        format!("{}:{}:{}", self.stream_name, self.line_number, self.column)
    }

    /// Render the source line followed by a caret line pointing at `self.column`.
    pub fn caret_block(&self) -> String {
        let arrow = " ".repeat(self.column as usize) + "^";
        format!("    {}\n    {}", self.source_line, arrow)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.location())
    }
}
