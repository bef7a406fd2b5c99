mod error;
mod rules;

pub use error::FilterError;
pub use rules::TrafficFilter;

/// Form bodies larger than this are rejected outright.
pub const MAX_FORM_BODY_BYTES: u64 = 1_000_000;
