//! Error taxonomy shared by the listing parser, the tree walker and the transfer scheduler.
//!
//! Listing and detection failures are fatal to a whole run, protocol failures are isolated to
//! the item that caused them and cancellation propagates upward without being reported as a
//! failure.

/// FTP reply code 550: requested action not taken, file unavailable.
pub const FILE_UNAVAILABLE: u32 = 550;

/// A failure reported by the server on the control channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("server returned {}", reply_text(.code, .description))]
pub struct ProtocolError {
    /// numeric reply code, when the transport exposes one
    pub code: Option<u32>,
    /// reply text as sent by the server
    pub description: Option<String>,
}

impl ProtocolError {
    pub fn new(code: u32, description: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            description: Some(description.into()),
        }
    }

    /// The server refused the action because the target is unavailable. For `MKD` this almost
    /// always means the directory already exists.
    pub fn is_file_unavailable(&self) -> bool {
        self.code == Some(FILE_UNAVAILABLE)
    }
}

fn reply_text(code: &Option<u32>, description: &Option<String>) -> String {
    match (code, description.as_deref()) {
        (Some(code), Some(description)) => format!("{code} {description}"),
        (None, Some(description)) => description.to_string(),
        (Some(code), None) => format!("code {code}"),
        (None, None) => "an error".to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No line of a listing looked like a Unix-style or a Windows-style entry.
    #[error("cannot parse file entry with format {line:?}")]
    UnrecognizedListingFormat { line: String },
    #[error("string was not recognized as a valid date and time: parsed {fragment:?} from line {line:?}")]
    UnparseableTimestamp { fragment: String, line: String },
    #[error("malformed listing line {line:?}: {reason}")]
    MalformedListingLine { line: String, reason: String },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("operation canceled")]
    OperationCanceled,
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0:#}")]
    Config(anyhow::Error),
}

impl Error {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::OperationCanceled)
    }

    /// Text used for the per-item failure log line: the server's own description when there is
    /// one, the transport error otherwise.
    pub fn item_description(&self) -> String {
        match self {
            Error::Protocol(ProtocolError {
                description: Some(description),
                ..
            }) => format!("server returned {description}"),
            other => format!("{other:#}"),
        }
    }
}
