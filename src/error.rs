//! Crate errors
//!
//! Only startup failures are typed: everything that happens in steady state
//! (dial failures, call timeouts) is logged and abandoned, never surfaced as
//! an error to the caller.

/// Errors raised while constructing or starting a bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// No broker collaborator was configured before `serve()`.
    #[error("invalid broker: a broker collaborator is required")]
    InvalidBroker,

    /// A bind or advertise address did not parse.
    #[error("invalid address {0}")]
    InvalidAddress(String),

    /// A seed peer address did not parse.
    #[error("invalid seed address {0}")]
    InvalidSeed(String),

    /// The node name was empty.
    #[error("node name is required")]
    MissingName,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert!(BridgeError::InvalidBroker.to_string().contains("broker"));
        assert_eq!(
            BridgeError::InvalidAddress("nope".into()).to_string(),
            "invalid address nope"
        );
        assert_eq!(
            BridgeError::InvalidSeed("x:y".into()).to_string(),
            "invalid seed address x:y"
        );
    }
}
