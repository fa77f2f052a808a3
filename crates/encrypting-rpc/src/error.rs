use alloy_primitives::U256;
use serde::Serialize;
use thiserror::Error;

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

pub(crate) const INVALID_REQUEST_CODE: i64 = -32600;
pub(crate) const INVALID_PARAMS_CODE: i64 = -32602;
pub(crate) const INTERNAL_ERROR_CODE: i64 = -32603;
pub(crate) const INSUFFICIENT_FUNDS_CODE: i64 = -32000;

/// Top level error type for the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Malformed input. The message is surfaced verbatim to the caller.
    #[error("{0}")]
    InvalidParams(String),
    /// Well-formed transaction that chain state does not admit. The message is
    /// surfaced verbatim to the caller.
    #[error("{0}")]
    InvalidRequest(String),
    #[error("failed to recover sender: {0}")]
    KeyDerivation(String),
    #[error("gateway balance {available} cannot cover submission fee {required}")]
    InsufficientFunds { required: U256, available: U256 },
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("bind or socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub(crate) fn upstream(err: impl std::fmt::Display) -> Self {
        Self::Upstream(err.to_string())
    }

    /// JSON-RPC error code reported to the caller.
    pub fn code(&self) -> i64 {
        match self {
            GatewayError::InvalidRequest(_) => INVALID_REQUEST_CODE,
            GatewayError::InvalidParams(_) | GatewayError::KeyDerivation(_) => INVALID_PARAMS_CODE,
            GatewayError::InsufficientFunds { .. } => INSUFFICIENT_FUNDS_CODE,
            _ => INTERNAL_ERROR_CODE,
        }
    }
}

/// JSON-RPC error object wrapping a [`GatewayError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcResponseError {
    pub code: i64,
    pub message: String,
}

impl From<GatewayError> for RpcResponseError {
    fn from(err: GatewayError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_are_surfaced_verbatim() {
        let err: RpcResponseError =
            GatewayError::InvalidRequest("nonce is not correct".into()).into();
        assert_eq!(err.code, -32600);
        assert_eq!(err.message, "nonce is not correct");

        let err: RpcResponseError =
            GatewayError::InvalidParams("slot computation error".into()).into();
        assert_eq!(err.code, -32602);
        assert_eq!(err.message, "slot computation error");
    }

    #[test]
    fn key_derivation_is_reported_as_invalid_params() {
        let err = GatewayError::KeyDerivation("bad signature".into());
        assert_eq!(err.code(), INVALID_PARAMS_CODE);
    }

    #[test]
    fn upstream_and_funds_codes() {
        assert_eq!(GatewayError::upstream("boom").code(), INTERNAL_ERROR_CODE);
        let err = GatewayError::InsufficientFunds {
            required: U256::from(10),
            available: U256::from(1),
        };
        assert_eq!(err.code(), INSUFFICIENT_FUNDS_CODE);
        assert!(err.to_string().contains("cannot cover"));
    }
}
