use chrono::{DateTime, TimeZone, Utc};

/// Signature-checked claims attached to a request after authentication.
#[derive(Debug, Clone)]
pub struct Identity {
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub(super) fn from_timestamps(
        subject: String,
        email: Option<String>,
        name: Option<String>,
        iat: Option<i64>,
        exp: Option<i64>,
    ) -> Self {
        Self {
            subject,
            email,
            name,
            issued_at: iat.and_then(|t| Utc.timestamp_opt(t, 0).single()),
            expires_at: exp.and_then(|t| Utc.timestamp_opt(t, 0).single()),
        }
    }
}
