use thiserror::Error;

/// Result type for timetable operations
pub type Result<T> = std::result::Result<T, TimetableError>;

/// Errors raised at the edges of the timetable engine.
///
/// Corrupt grids and orphaned teacher references are not errors: they are
/// recovered locally and reported as [`crate::session::SessionWarning`]s.
#[derive(Error, Debug)]
pub enum TimetableError {
    /// Uploaded master data is missing columns or required fields
    #[error("Malformed upload: {0}")]
    MalformedUpload(String),

    /// Time structure settings are out of range
    #[error("Invalid time configuration: {0}")]
    InvalidTimeConfig(String),

    #[error("Unknown period: {0}")]
    UnknownPeriod(String),

    #[error("Unknown class: {0}")]
    UnknownClass(String),

    #[error("Unknown school day: {0}")]
    UnknownDay(String),

    /// The session is missing master data or a time structure
    #[error("{0}")]
    NotReady(&'static str),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl TimetableError {
    /// True when the error was caused by the caller's input rather than the server
    pub fn is_client_error(&self) -> bool {
        !matches!(self, TimetableError::Io(_) | TimetableError::Zip(_))
    }
}
