use thiserror::Error;

/// Failures of the low-level clients: HTTP, the pfSense and Mikrotik
/// envelopes, kernel netlink requests and the shell runner. `wgctl-core`
/// turns these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("cannot build request URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A request or command exceeded its deadline.
    #[error("no answer within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Client setup or certificate trouble.
    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// Credentials could not be turned into request headers.
    #[error("Authentication setup failed: {message}")]
    Authentication { message: String },

    // ── REST API ────────────────────────────────────────────────────
    /// Non-success envelope returned by a REST backend.
    #[error("{backend} API error (HTTP {status}, code {code}): {message}")]
    Api {
        backend: &'static str,
        status: u16,
        code: i64,
        message: String,
        detail: String,
    },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// A key, name or address handed to a device was malformed, or
    /// command output could not be parsed.
    #[error("Invalid {what}: {reason}")]
    Parse { what: &'static str, reason: String },

    // ── Devices ─────────────────────────────────────────────────────
    /// No WireGuard device with that name.
    #[error("WireGuard device not found: {name}")]
    DeviceNotFound { name: String },

    /// No network link with that name.
    #[error("Link not found: {name}")]
    LinkNotFound { name: String },

    /// No installed policy rule matches.
    #[error("Rule not found: priority {priority}, table {table}")]
    RuleNotFound { priority: u32, table: u32 },

    /// The kernel rejected a netlink request.
    #[error("netlink request failed: {0}")]
    Netlink(#[from] rtnetlink::Error),

    /// An external command exited unsuccessfully.
    #[error("{program} failed (status {status:?}): {stderr}")]
    Command {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    /// Process spawn or socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Timeouts, refused connections and 5xx answers.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP 404 or a missing device, link or rule.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Api { status: 404, .. }
            | Self::DeviceNotFound { .. }
            | Self::LinkNotFound { .. }
            | Self::RuleNotFound { .. } => true,
            _ => false,
        }
    }

    /// Envelope error code of an `Api` error.
    pub fn api_error_code(&self) -> Option<i64> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }
}
