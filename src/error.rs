use std::fmt;

use crate::position::Position;

/// Every way compiling an OME source file can fail.
///
/// A single enum plays the role the teacher's `TypeError`/`ParseError` structs
/// play separately: each variant carries whatever payload its failure mode
/// needs, but all of them render through the same bold-file/caret `Display`.
#[derive(Debug)]
pub enum OmeError {
    Parse { message: String, position: Position },
    UnboundName { name: String, position: Position },
    NameConflict { name: String, position: Position },
    ReservedName { name: String, position: Position },
    TooManyParameters { count: usize, position: Position },
    ArraySizeTooBig { size: usize, position: Position },
    TagSpaceExhausted,
    ConstantSpaceExhausted,
    NoMainMethod { stream_name: String },
    Io { message: String },
    Encoding { message: String },
    Backend { program: String, code: i32 },
    UnsupportedTarget { platform: String },
}

impl OmeError {
    pub fn position(&self) -> Option<&Position> {
        match self {
            OmeError::Parse { position, .. }
            | OmeError::UnboundName { position, .. }
            | OmeError::NameConflict { position, .. }
            | OmeError::ReservedName { position, .. }
            | OmeError::TooManyParameters { position, .. }
            | OmeError::ArraySizeTooBig { position, .. } => Some(position),
            _ => None,
        }
    }

    /// The fixed textual category named in the error taxonomy.
    pub fn category(&self) -> &'static str {
        match self {
            OmeError::Parse { .. } => "ParseError",
            OmeError::UnboundName { .. } => "UnboundName",
            OmeError::NameConflict { .. } => "NameConflict",
            OmeError::ReservedName { .. } => "ReservedName",
            OmeError::TooManyParameters { .. } => "TooManyParameters",
            OmeError::ArraySizeTooBig { .. } => "ArraySizeTooBig",
            OmeError::TagSpaceExhausted => "TagSpaceExhausted",
            OmeError::ConstantSpaceExhausted => "ConstantSpaceExhausted",
            OmeError::NoMainMethod { .. } => "NoMainMethod",
            OmeError::Io { .. } => "IoError",
            OmeError::Encoding { .. } => "EncodingError",
            OmeError::Backend { .. } => "BackendError",
            OmeError::UnsupportedTarget { .. } => "UnsupportedTarget",
        }
    }
}

impl fmt::Display for OmeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OmeError::Parse { message, position } => {
                write!(f, "\x1b[1m{}\x1b[0m: \x1b[31merror:\x1b[0m {}\n{}", position.location(), message, position.caret_block())
            }
            OmeError::UnboundName { name, position } => {
                write!(
                    f,
                    "\x1b[1m{}\x1b[0m: \x1b[31merror:\x1b[0m undefined name '{}'\n{}",
                    position.location(),
                    name,
                    position.caret_block()
                )
            }
            OmeError::NameConflict { name, position } => {
                write!(
                    f,
                    "\x1b[1m{}\x1b[0m: \x1b[31merror:\x1b[0m '{}' is already defined\n{}",
                    position.location(),
                    name,
                    position.caret_block()
                )
            }
            OmeError::ReservedName { name, position } => {
                write!(
                    f,
                    "\x1b[1m{}\x1b[0m: \x1b[31merror:\x1b[0m '{}' is a reserved name\n{}",
                    position.location(),
                    name,
                    position.caret_block()
                )
            }
            OmeError::TooManyParameters { count, position } => {
                write!(
                    f,
                    "\x1b[1m{}\x1b[0m: \x1b[31merror:\x1b[0m seriously? {} parameters? take a step back and redesign your code\n{}",
                    position.location(),
                    count,
                    position.caret_block()
                )
            }
            OmeError::ArraySizeTooBig { size, position } => {
                write!(
                    f,
                    "\x1b[1m{}\x1b[0m: \x1b[31merror:\x1b[0m array size too big ({} elements)\n{}",
                    position.location(),
                    size,
                    position.caret_block()
                )
            }
            OmeError::TagSpaceExhausted => write!(f, "\x1b[31merror:\x1b[0m exhausted all tag IDs"),
            OmeError::ConstantSpaceExhausted => write!(f, "\x1b[31merror:\x1b[0m exhausted all constant tag IDs"),
            OmeError::NoMainMethod { stream_name } => {
                write!(f, "\x1b[1m{}\x1b[0m: \x1b[31merror:\x1b[0m no main method defined", stream_name)
            }
            OmeError::Io { message } => write!(f, "\x1b[31merror:\x1b[0m {}", message),
            OmeError::Encoding { message } => write!(f, "\x1b[31merror:\x1b[0m {}", message),
            OmeError::Backend { program, code } => {
                write!(f, "\x1b[31merror:\x1b[0m {} exited with status {}", program, code)
            }
            OmeError::UnsupportedTarget { platform } => {
                write!(f, "\x1b[31merror:\x1b[0m unsupported target platform '{}' (expected one of: x86_64-linux, x86_64-macos)", platform)
            }
        }
    }
}

impl std::error::Error for OmeError {}

impl From<std::io::Error> for OmeError {
    fn from(e: std::io::Error) -> Self {
        OmeError::Io { message: e.to_string() }
    }
}

impl From<std::string::FromUtf8Error> for OmeError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        OmeError::Encoding { message: e.to_string() }
    }
}
