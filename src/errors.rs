/// A condition the conversion cannot recover from.
///
/// The run aborts on any of these; partial fast-import output is not
/// promised to be valid afterwards.
#[derive(Debug)]
pub(crate) enum Fatal {
    /// The server sent a line inconsistent with the expected grammar.
    Protocol(String),
    /// The server delivered content for a file or revision that is not in
    /// the parsed log, or failed to deliver a requested one.
    UnknownEntity(String),
    /// Input that cannot be interpreted: unparseable revision string,
    /// timestamp out of range.
    Malformed(String),
    /// Transport or output failure.
    Io(std::io::Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum FatalKind {
    Protocol,
    UnknownEntity,
    Malformed,
    Io,
}

impl Fatal {
    pub(crate) fn kind(&self) -> FatalKind {
        match *self {
            Self::Protocol(_) => FatalKind::Protocol,
            Self::UnknownEntity(_) => FatalKind::UnknownEntity,
            Self::Malformed(_) => FatalKind::Malformed,
            Self::Io(_) => FatalKind::Io,
        }
    }
}

impl From<std::io::Error> for Fatal {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl std::fmt::Display for Fatal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Protocol(ref msg) => write!(f, "protocol mismatch: {msg}"),
            Self::UnknownEntity(ref msg) => write!(f, "unknown entity: {msg}"),
            Self::Malformed(ref msg) => write!(f, "malformed input: {msg}"),
            Self::Io(ref e) => write!(f, "i/o error: {e}"),
        }
    }
}
