mod error;
mod identity;
mod verifier;

pub use error::AuthError;
pub use identity::Identity;
pub use verifier::TokenVerifier;

/// Maximum tolerated clock skew for `iat` claims, in seconds. Tokens issued
/// further in the future than this are rejected as forged.
pub const MAX_ISSUED_AT_SKEW_SECS: i64 = 60;
