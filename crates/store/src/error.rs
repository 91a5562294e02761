use std::path::PathBuf;

/// All errors that can be returned by the subscription store.
///
/// Variants carry rendered messages rather than source errors so they
/// stay `Clone`; cycle reporting hands the same error to both the
/// observer callback and the cycle outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backing file exists but a record cannot be decoded. Fatal to
    /// the whole load; no partial-record recovery is attempted.
    #[error("corrupt subscription store at {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    /// Writing the temporary file or the final rename failed. The
    /// on-disk store is guaranteed unchanged.
    #[error("failed to persist subscription store at {path}: {message}")]
    Persistence { path: PathBuf, message: String },

    /// An I/O failure while opening or reading the backing file.
    #[error("i/o error on subscription store at {path}: {message}")]
    Io { path: PathBuf, message: String },
}
