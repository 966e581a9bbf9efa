use thiserror::Error;

/// Errors produced by the KSeF client and its crypto/codec layers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KsefError {
    /// The at-rest encryption secret is not configured. This is an operator
    /// configuration error, never caused by request input.
    #[error("at-rest encryption key is not configured ({0})")]
    MissingEncryptionKey(String),

    /// A certificate container was decoded but held no certificate bag.
    #[error("no certificate found in the supplied container")]
    NoCertificate,

    /// A certificate container was decoded but held no private key bag.
    #[error("no private key found in the supplied container")]
    NoPrivateKey,

    /// Certificate or key material could not be decoded. A wrong PKCS#12
    /// password surfaces here as a container decode failure.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// An encrypted private-key token does not have the expected
    /// `nonce:tag:ciphertext` shape.
    #[error("encrypted key has invalid format: {0}")]
    InvalidEncryptedFormat(String),

    /// Cryptographic operation failed (OAEP, signing, GCM tag check).
    #[error("crypto error: {0}")]
    Crypto(String),

    /// XML generation or parsing error.
    #[error("XML error: {0}")]
    Xml(String),

    /// The exchange returned a structurally invalid response
    /// (missing challenge, reference number or tokens).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The exchange reported a processing failure while polling an
    /// asynchronous operation. Code and description are passed on verbatim.
    #[error("processing failed with code {code}: {description}")]
    Processing { code: i32, description: String },

    /// The authentication status poll exceeded its wall-clock budget.
    /// The whole flow must be restarted from a fresh challenge.
    #[error("authentication timed out after {elapsed_secs}s")]
    Timeout { elapsed_secs: i64 },

    /// The exchange answered with a non-2xx status. The response body is
    /// attached for diagnostics.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Transport-level failure (connection refused, TLS, timeout).
    #[error("connection error ({environment}): {message}")]
    Connection {
        environment: &'static str,
        message: String,
    },

    /// An operation requiring authentication was called before
    /// `authenticate()`.
    #[error("authentication required before this operation")]
    AuthRequired,

    /// An operation requiring an open session was called without one.
    #[error("an open session is required for this operation")]
    SessionRequired,
}

impl From<openssl::error::ErrorStack> for KsefError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        KsefError::Crypto(e.to_string())
    }
}

/// A single validation violation with field path and stable message key.
///
/// The key is meant for a caller-supplied localization layer; this crate
/// never produces end-user prose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dot-and-index path to the offending field (e.g. "items[2].net_amount").
    pub field: String,
    /// Stable machine-readable message key (e.g. "net.mismatch").
    pub message_key: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message_key: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message_key: message_key.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message_key)
    }
}

/// Outcome of invoice validation — all violations found, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}
