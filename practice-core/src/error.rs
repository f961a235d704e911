//! Error type shared by every component of the practice engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The microphone could not be opened (refused, missing or busy).
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    /// No usable audio output exists on this machine.
    #[error("audio unavailable: {0}")]
    UnsupportedEnvironment(String),

    #[error("invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("audio context is closed")]
    ContextClosed,

    #[error("config: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Rejects NaN, infinities, zero and negative values.
pub(crate) fn require_positive(name: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(Error::invalid(name, format!("must be a positive number, got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_values_pass_through() {
        assert_eq!(require_positive("frequency", 440.0).ok(), Some(440.0));
    }

    #[test]
    fn zero_negative_and_nan_are_rejected() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = require_positive("duration", bad).unwrap_err();
            assert!(matches!(err, Error::InvalidParameter { name: "duration", .. }));
        }
    }

    #[test]
    fn invalid_parameter_message_names_the_field() {
        let err = Error::invalid("bpm", "must be finite");
        assert_eq!(err.to_string(), "invalid bpm: must be finite");
    }
}
