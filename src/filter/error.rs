use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("suspicious user agent: {0}")]
    SuspiciousUserAgent(String),

    #[error("spoofed client address header: {header}")]
    SpoofedClientHeader { header: &'static str },

    #[error("form body too large: {declared} bytes")]
    OversizedFormBody { declared: u64 },

    #[error("blocked parameter name: {0}")]
    BlockedParameter(String),
}

impl FilterError {
    /// Oversized form bodies get 413, everything else 403.
    pub fn is_payload_too_large(&self) -> bool {
        matches!(self, FilterError::OversizedFormBody { .. })
    }
}
