use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced while instrumenting a package.
///
/// Absence of a class is not an error: resolution returns `Ok(None)` and the
/// caller decides. A patch that finds its work already done reports a
/// skipped outcome instead of an error.
#[derive(Debug, Error)]
pub enum Error {
    /// A file, class or artifact the operation depends on does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The same class is defined in more than one smali partition.
    #[error("class {class} is defined in several partitions: {}", partitions.join(", "))]
    AmbiguousClass {
        class: String,
        partitions: Vec<String>,
    },

    /// Smali text or an archive did not have the expected structure.
    #[error("format error in {path}: {message}")]
    Format { path: PathBuf, message: String },

    /// The manifest could not be parsed into the expected element structure.
    #[error("manifest attribute error: {0}")]
    AttributeFormat(String),

    /// The injection planner rejected the target method.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// A patch reported a failed outcome.
    #[error("patch {name} failed: {diagnostic}")]
    Patch { name: String, diagnostic: String },

    /// An external tool exited unsuccessfully or could not be started.
    #[error("{tool} failed (status {status:?})")]
    Collaborator {
        tool: String,
        status: Option<i32>,
        output: Vec<String>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl Error {
    pub(crate) fn format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Format {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Reasons the planner refuses to inject into a method.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("no method matching {0}")]
    NoSuchMethod(String),

    #[error("{count} methods match {signature}")]
    AmbiguousEntry { signature: String, count: usize },

    #[error("unsupported method body in {method}: {reason}")]
    UnsupportedBody { method: String, reason: String },
}

impl PlanError {
    pub(crate) fn unsupported(method: &str, reason: impl Into<String>) -> Self {
        PlanError::UnsupportedBody {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}
