/// Errors from the job service client and push transports.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The job service returned a non-2xx status code.
    #[error("Job service error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A payload did not match the expected shape.
    #[error("Malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// Failed to establish or keep a push connection.
    #[error("Push connection error: {0}")]
    Connection(String),

    /// A push frame that does not follow the event protocol.
    #[error("Push protocol error: {0}")]
    Protocol(String),

    /// The configured service URL cannot address a job resource.
    #[error("Invalid endpoint: {0}")]
    Endpoint(String),
}

impl ClientError {
    /// Whether retrying the same call later may succeed.
    ///
    /// Network failures, throttling and 5xx responses are transient; 4xx
    /// rejections and malformed payloads are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Request(e) => !e.is_decode() && !e.is_builder(),
            ClientError::Api { status, .. } => *status == 429 || *status >= 500,
            ClientError::Connection(_) => true,
            ClientError::Decode(_) | ClientError::Protocol(_) | ClientError::Endpoint(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> ClientError {
        ClientError::Api {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn server_errors_and_throttling_are_transient() {
        assert!(api(500).is_transient());
        assert!(api(503).is_transient());
        assert!(api(429).is_transient());
        assert!(ClientError::Connection("reset".into()).is_transient());
    }

    #[test]
    fn rejections_are_not_transient() {
        assert!(!api(400).is_transient());
        assert!(!api(404).is_transient());
        assert!(!ClientError::Protocol("bad frame".into()).is_transient());
    }
}
