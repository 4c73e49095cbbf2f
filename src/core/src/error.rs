use thiserror::Error;

/// Exit code for usage and content errors.
pub const EXIT_USAGE: i32 = 125;

/// Exit code when an image cannot be found locally or at any candidate source.
pub const EXIT_NOT_FOUND: i32 = 2;

/// Exit code when the authentication file is missing or unreadable.
pub const EXIT_AUTH_FILE: i32 = 3;

/// One failed attempt while resolving a short name or pulling a candidate.
#[derive(Debug)]
pub struct CandidateError {
    /// Fully-qualified reference that was tried
    pub reference: String,
    /// Why the attempt failed
    pub error: Box<SkiffError>,
}

impl CandidateError {
    pub fn new(reference: impl Into<String>, error: SkiffError) -> Self {
        Self {
            reference: reference.into(),
            error: Box::new(error),
        }
    }
}

fn join_attempts(attempts: &[CandidateError]) -> String {
    if attempts.is_empty() {
        return "no candidates were tried".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.reference, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Skiff error types
#[derive(Error, Debug)]
pub enum SkiffError {
    /// Reference string could not be parsed
    #[error("invalid reference format '{reference}': {reason}")]
    MalformedReference { reference: String, reason: String },

    /// Short name given but the registries configuration lists no search registries
    #[error("short-name '{0}' did not resolve: no unqualified-search registries are configured")]
    NoSearchRegistriesConfigured(String),

    /// Every candidate for a reference failed
    #[error("unable to find image '{reference}': {}", join_attempts(.attempts))]
    ImageNotFound {
        reference: String,
        attempts: Vec<CandidateError>,
    },

    /// Registry rejected the supplied credentials
    #[error("authentication failed for {registry}: {message}")]
    AuthenticationFailure { registry: String, message: String },

    /// Multi-image archive pulled without an image selector
    #[error("{reference}: Unexpected {index_file}: expected 1 item, got {count}")]
    ArchiveAmbiguous {
        reference: String,
        index_file: String,
        count: usize,
    },

    /// Archive selector `@N` past the end of the archive index
    #[error("{reference}: Invalid source index @{index}, only {count} manifest items available")]
    ArchiveIndexOutOfRange {
        reference: String,
        index: usize,
        count: usize,
    },

    /// Archive selector `name:tag` matched no archive entry
    #[error("{reference}: Tag \"{tag}\" not found")]
    ArchiveTagNotFound { reference: String, tag: String },

    /// Manifest list has no instance for the requested platform
    #[error("{reference}: no image found in manifest list for platform {platform}")]
    NoMatchingPlatform { reference: String, platform: String },

    /// Local lookup miss
    #[error("{0}: image not known")]
    NotFound(String),

    /// ID prefix matched more than one local image
    #[error("{reference}: ambiguous image ID prefix matches {matches} images")]
    AmbiguousReference { reference: String, matches: usize },

    /// Removal blocked by dependent images
    #[error("{reference}: image is in use: {message}")]
    InUse { reference: String, message: String },

    /// Connection-level failure eligible for a caller-level retry
    #[error("transient network error talking to {registry}: {message}")]
    TransientNetwork { registry: String, message: String },

    /// Registry answered that the manifest does not exist
    #[error("{reference}: manifest unknown: {message}")]
    ManifestUnknown { reference: String, message: String },

    /// Manifest bytes could not be interpreted
    #[error("{reference}: malformed manifest: {message}")]
    MalformedManifest { reference: String, message: String },

    /// Fetched content did not hash to the advertised digest
    #[error("{reference}: digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        reference: String,
        expected: String,
        actual: String,
    },

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    Registry { registry: String, message: String },

    /// Authentication file missing or unreadable
    #[error("credential file {path}: {message}")]
    AuthFile { path: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local store error
    #[error("Image store error: {0}")]
    Store(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl SkiffError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            SkiffError::ImageNotFound { .. }
            | SkiffError::NotFound(_)
            | SkiffError::ManifestUnknown { .. } => EXIT_NOT_FOUND,
            SkiffError::AuthFile { .. } => EXIT_AUTH_FILE,
            _ => EXIT_USAGE,
        }
    }

    /// Whether a caller may retry the failed operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, SkiffError::TransientNetwork { .. })
    }

    pub fn malformed(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        SkiffError::MalformedReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for SkiffError {
    fn from(err: serde_json::Error) -> Self {
        SkiffError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for SkiffError {
    fn from(err: toml::de::Error) -> Self {
        SkiffError::Config(err.to_string())
    }
}

/// Result type alias for Skiff operations
pub type Result<T> = std::result::Result<T, SkiffError>;
