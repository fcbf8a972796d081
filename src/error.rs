//! Error types for image reference handling.

use thiserror::Error;

/// Result type alias for image reference operations.
pub type Result<T> = std::result::Result<T, ImageError>;

/// Reason an image string was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty image name")]
    EmptyImageName,

    #[error("empty name")]
    EmptyName,

    #[error("empty tag")]
    EmptyTag,

    #[error("too many tags")]
    TooManyTags,

    #[error("invalid tag")]
    InvalidTag,

    #[error("image cannot start with dash")]
    StartsWithDash,

    #[error("ambiguous value: valid as both local and remote image name")]
    Ambiguous,

    #[error("tag is not allowed")]
    TagNotAllowed,

    #[error("scheme 'image:' is required for remote images")]
    SchemeRequired,

    #[error("scheme 'image:' is not allowed for local images")]
    SchemeNotAllowed,

    #[error("User is not allowed in image URI")]
    UserNotAllowed,

    #[error("Password is not allowed in image URI")]
    PasswordNotAllowed,

    #[error("Empty password is not allowed in image URI")]
    EmptyPasswordNotAllowed,

    #[error("Port is not allowed in image URI")]
    PortNotAllowed,

    #[error("Query part is not allowed in image URI")]
    QueryNotAllowed,

    #[error("Fragment part is not allowed in image URI")]
    FragmentNotAllowed,

    #[error("port can't be converted to integer")]
    InvalidPort,

    #[error("no image name specified")]
    NoImageName,

    #[error("empty {0} name")]
    EmptyComponent(&'static str),

    #[error("'.' and '..' path segments are not allowed")]
    DotSegment,

    #[error("control characters are not allowed")]
    ControlCharacter,

    #[error("invalid percent-encoding in {0}")]
    InvalidEncoding(&'static str),

    #[error("malformed image URI: {0}")]
    MalformedUri(url::ParseError),
}

/// Errors produced while resolving image references.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("Invalid local image '{image}': {source}")]
    InvalidLocal {
        image: String,
        #[source]
        source: ParseError,
    },

    #[error("Invalid remote image '{image}': {source}")]
    InvalidRemote {
        image: String,
        #[source]
        source: ParseError,
    },

    #[error("Cluster {cluster} doesn't exist in a list of available clusters {available:?}")]
    UnknownCluster {
        cluster: String,
        available: Vec<String>,
    },

    #[error("Empty hostname in registry URL '{0}': please consider updating configuration")]
    EmptyRegistryHost(String),
}

impl ImageError {
    /// Client-side validation failures; callers must not retry these.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ImageError::InvalidLocal { .. } | ImageError::InvalidRemote { .. }
        )
    }

    /// The underlying parse reason, if this is a validation failure.
    pub fn reason(&self) -> Option<&ParseError> {
        match self {
            ImageError::InvalidLocal { source, .. } | ImageError::InvalidRemote { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

/// Errors loading the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(std::path::PathBuf),

    #[error("Failed to read configuration {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unable to locate home directory")]
    NoHomeDir,

    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Errors talking to a platform registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Registry responded with {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("Invalid registry URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid authorization header")]
    InvalidAuth,

    #[error("Image {0} is not hosted on the platform registry")]
    NotPlatformImage(String),

    #[error("Image name is required for this operation")]
    EmptyImageName,

    #[error("Registry did not return a digest for {0}")]
    MissingDigest(String),

    #[error("Failed to decode registry response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] ImageError),
}
