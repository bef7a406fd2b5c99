use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authentication token")]
    MissingToken,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("token expired")]
    Expired,

    #[error("token issued in the future")]
    IssuedInFuture,

    #[error("invalid token: missing subject")]
    MissingSubject,
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(_: jsonwebtoken::errors::Error) -> Self {
        AuthError::InvalidToken
    }
}
