use std::sync::Arc;

use alloy::{
    dyn_abi::{DynSolType, DynSolValue},
    network::Network,
    primitives::{Address, U256},
    providers::Provider,
    transports::Transport,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    codec::AbiFunction,
    errors::{CodecError, EngineError},
    multicall::{CallRequest, CallResult, Multicall},
    price::math::units_to_f64,
};

/// Calls issued per candidate token. Candidate `i` owns the result block
/// at global indices `[4i, 4i + 3]`.
pub const CALLS_PER_TOKEN: usize = 4;

/// A token position resolved directly from the token contract. Candidate
/// addresses come from an untrusted indexer, so every field here is
/// re-derived on chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenHolding {
    pub address: Address,
    pub raw_balance: U256,
    pub decimals: u8,
    pub name: String,
    pub symbol: String,
}

impl TokenHolding {
    /// Returns the balance interpreted through the token's own decimals.
    pub fn balance(&self) -> f64 {
        units_to_f64(self.raw_balance, self.decimals)
    }
}

struct Erc20Metadata {
    balance_of: AbiFunction,
    decimals: AbiFunction,
    name: AbiFunction,
    symbol: AbiFunction,
}

impl Erc20Metadata {
    fn new() -> Erc20Metadata {
        Erc20Metadata {
            balance_of: AbiFunction::new(
                "balanceOf",
                vec![DynSolType::Address],
                vec![DynSolType::Uint(256)],
            ),
            decimals: AbiFunction::new("decimals", vec![], vec![DynSolType::Uint(8)]),
            name: AbiFunction::new("name", vec![], vec![DynSolType::String]),
            symbol: AbiFunction::new("symbol", vec![], vec![DynSolType::String]),
        }
    }

    fn requests_for(
        &self,
        token: Address,
        wallet: Address,
    ) -> Result<[CallRequest; CALLS_PER_TOKEN], CodecError> {
        Ok([
            CallRequest {
                target: token,
                payload: self
                    .balance_of
                    .encode_call(&[DynSolValue::Address(wallet)])?,
            },
            CallRequest {
                target: token,
                payload: self.decimals.encode_call(&[])?,
            },
            CallRequest {
                target: token,
                payload: self.name.encode_call(&[])?,
            },
            CallRequest {
                target: token,
                payload: self.symbol.encode_call(&[])?,
            },
        ])
    }
}

/// Resolves the balance and metadata for every candidate token in a single
/// aggregated round trip. A token whose block cannot be fully decoded is
/// dropped from the output rather than reported with placeholder values;
/// the remaining tokens keep their candidate order.
#[instrument(skip(candidates, multicall, provider), level = "debug")]
pub async fn resolve_holdings<T, N, P>(
    candidates: &[Address],
    wallet: Address,
    multicall: &Multicall,
    provider: Arc<P>,
) -> Result<Vec<TokenHolding>, EngineError>
where
    T: Transport + Clone,
    N: Network,
    P: Provider<T, N>,
{
    let metadata = Erc20Metadata::new();

    let mut requests = Vec::with_capacity(candidates.len() * CALLS_PER_TOKEN);
    for &token in candidates {
        requests.extend(metadata.requests_for(token, wallet)?);
    }

    let results = multicall.aggregate(&requests, provider).await?;

    Ok(decode_holdings(candidates, &results))
}

/// De-interleaves aggregate results back into per-token holdings by index
/// arithmetic over the fixed 4-slot blocks.
fn decode_holdings(candidates: &[Address], results: &[CallResult]) -> Vec<TokenHolding> {
    let metadata = Erc20Metadata::new();
    let mut holdings = Vec::with_capacity(candidates.len());

    for (&token, block) in candidates.iter().zip(results.chunks_exact(CALLS_PER_TOKEN)) {
        match decode_holding(token, block, &metadata) {
            Ok(holding) => holdings.push(holding),
            Err(err) => {
                tracing::warn!(%token, %err, "dropping token with undecodable metadata");
            }
        }
    }

    holdings
}

fn decode_holding(
    token: Address,
    block: &[CallResult],
    metadata: &Erc20Metadata,
) -> Result<TokenHolding, EngineError> {
    for result in block {
        if !result.success {
            return Err(EngineError::CallReverted(token));
        }
    }

    let raw_balance = metadata.balance_of.decode_return(&block[0].return_data)?[0]
        .as_uint()
        .ok_or(CodecError::UnexpectedReturnShape)?
        .0;

    // The decoder does not range-check the word, so a hostile token can
    // return a value that does not fit in u8.
    let decimals = metadata.decimals.decode_return(&block[1].return_data)?[0]
        .as_uint()
        .ok_or(CodecError::UnexpectedReturnShape)?
        .0;
    let decimals = u8::try_from(decimals).map_err(|_| CodecError::UnexpectedReturnShape)?;

    let name = metadata.name.decode_return(&block[2].return_data)?[0]
        .as_str()
        .ok_or(CodecError::UnexpectedReturnShape)?
        .to_string();

    let symbol = metadata.symbol.decode_return(&block[3].return_data)?[0]
        .as_str()
        .ok_or(CodecError::UnexpectedReturnShape)?
        .to_string();

    Ok(TokenHolding {
        address: token,
        raw_balance,
        decimals,
        name,
        symbol,
    })
}
