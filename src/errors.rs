use std::time::Duration;

use alloy::primitives::Address;
use thiserror::Error;
use uniswap_v3_math::error::UniswapV3MathError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    BatchTransport(#[from] BatchTransportError),
    #[error(transparent)]
    ReferencePriceUnavailable(#[from] FeedError),
    #[error(transparent)]
    UniswapV3Math(#[from] UniswapV3MathError),
    #[error("call to {0} reverted")]
    CallReverted(Address),
    #[error("no liquidity pool found for {base}/{quote}")]
    NoLiquidity { base: Address, quote: Address },
    #[error("aggregate returned {returned} results for {expected} calls")]
    ResultLengthMismatch { expected: usize, returned: usize },
    #[error("overflow while scaling amount by token decimals")]
    AmountOverflow,
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("expected {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },
    #[error("argument {index} does not match declared type `{expected}`")]
    ArgumentTypeMismatch { index: usize, expected: String },
    #[error("value {index} does not match declared return type `{expected}`")]
    ReturnTypeMismatch { index: usize, expected: String },
    #[error("no return data")]
    NoReturnData,
    #[error("return value has an unexpected shape")]
    UnexpectedReturnShape,
    #[error("ABI error")]
    ABIError(#[from] alloy::dyn_abi::Error),
}

#[derive(Error, Debug)]
pub enum BatchTransportError {
    #[error("contract error")]
    ContractError(#[from] alloy::contract::Error),
    #[error("aggregate call timed out after {0:?}")]
    Timeout(Duration),
}

impl BatchTransportError {
    /// Whether the failure is transient. Malformed response data is
    /// deterministic and retry-proof; only the transport itself is worth
    /// retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BatchTransportError::Timeout(_)
                | BatchTransportError::ContractError(alloy::contract::Error::TransportError(_))
        )
    }
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("http error")]
    HttpError(#[from] reqwest::Error),
    #[error("malformed spot price response")]
    MalformedResponse,
}
