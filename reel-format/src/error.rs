use std::io;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by archive readers, writers and views.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream is not a readable archive: unrecognized container,
    /// wrong or mismatched compression codec.
    #[error("unreadable archive: {0}")]
    Read(String),

    /// A backward movement was demanded of a forward-only stream.
    #[error("forward-only stream: {0}")]
    Stream(String),

    /// Checksum mismatch or malformed numeric field in a header block.
    #[error("corrupt header at offset {offset}: {reason}")]
    CorruptHeader { offset: u64, reason: String },

    /// A field value exceeds the dialect's fixed width and no extension
    /// mechanism applies.
    #[error("field `{field}` does not fit the {dialect} header format")]
    FieldTooLarge {
        field: &'static str,
        dialect: &'static str,
    },

    /// Metadata not representable in the configured text encoding under
    /// the strict policy.
    #[error("cannot represent {what} in {encoding}")]
    Encoding {
        what: String,
        encoding: &'static str,
    },

    /// The stream ended before an expected header or data boundary.
    #[error("truncated archive: {0}")]
    Truncated(String),
}

impl Error {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Error {
        Error::CorruptHeader {
            offset,
            reason: reason.into(),
        }
    }

}
