pub mod feed;
pub mod math;

use std::sync::Arc;

use alloy::{
    dyn_abi::DynSolType,
    network::Network,
    primitives::{aliases::U24, Address, U256},
    providers::Provider,
    sol,
    transports::Transport,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    codec::AbiFunction,
    errors::{BatchTransportError, EngineError},
    multicall::{CallRequest, CallResult, Multicall},
};

use self::feed::SpotPriceFeed;
use self::math::{quote_at_tick, to_base_units, units_to_f64};

sol! {
    #[sol(rpc)]
    contract IUniswapV3Factory {
        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address pool);
    }
}

/// The fee tiers probed during pool discovery, in basis points of a pip.
pub const DEFAULT_FEE_TIERS: [u32; 4] = [100, 500, 3000, 10000];

/// A factory lookup result for one fee tier. `None` means no pool exists
/// for the pair at that tier.
#[derive(Debug, Clone, Copy)]
pub struct PoolCandidate {
    pub fee_tier: u32,
    pub address: Option<Address>,
}

/// The slice of `slot0` this engine consumes. Everything except `tick` is
/// ignored by design.
#[derive(Debug, Clone, Copy)]
pub struct PoolState {
    pub address: Address,
    pub fee_tier: u32,
    pub tick: i32,
}

/// A computed quote for one pool, still in the reference token's smallest
/// unit.
#[derive(Debug, Clone, Copy)]
pub struct PoolPrice {
    pub pool: Address,
    pub fee_tier: u32,
    pub quote_units: U256,
}

/// The selected quote for a (base token, reference token) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuote {
    pub base_token: Address,
    pub quote_token: Address,
    /// Quote in the reference token's smallest unit.
    pub quote_units: U256,
    /// Quote as a decimal amount of the reference token.
    pub price: f64,
    pub source_pool: Address,
    pub fee_tier: u32,
}

/// Direction of "best price" selection across fee tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PricePolicy {
    /// Least quote-token cost per unit of base token (cheapest route).
    #[default]
    Cheapest,
    /// Most quote-token value per unit of base token.
    Dearest,
}

/// Discovers liquidity pools for a token pair across a set of fee tiers,
/// reads their tick state in one batch, and derives the best exchange rate
/// against the reference token.
#[derive(Debug, Clone)]
pub struct QuoteEngine {
    pub factory: Address,
    pub reference_token: Address,
    pub reference_decimals: u8,
    pub fee_tiers: Vec<u32>,
    pub policy: PricePolicy,
    pub multicall: Multicall,
}

impl QuoteEngine {
    pub fn new(factory: Address, reference_token: Address, multicall: Multicall) -> QuoteEngine {
        QuoteEngine {
            factory,
            reference_token,
            reference_decimals: 18,
            fee_tiers: DEFAULT_FEE_TIERS.to_vec(),
            policy: PricePolicy::default(),
            multicall,
        }
    }

    pub fn with_fee_tiers(mut self, fee_tiers: Vec<u32>) -> QuoteEngine {
        self.fee_tiers = fee_tiers;
        self
    }

    pub fn with_policy(mut self, policy: PricePolicy) -> QuoteEngine {
        self.policy = policy;
        self
    }

    /// Quotes `amount` whole units of the base token in the reference
    /// token. Fails with [`EngineError::NoLiquidity`] when no pool exists
    /// at any tier or no pool state could be read, never with a fabricated
    /// zero price.
    #[instrument(skip(self, provider), level = "debug")]
    pub async fn quote<T, N, P>(
        &self,
        base_token: Address,
        base_decimals: u8,
        amount: U256,
        provider: Arc<P>,
    ) -> Result<PriceQuote, EngineError>
    where
        T: Transport + Clone,
        N: Network,
        P: Provider<T, N>,
    {
        let no_liquidity = EngineError::NoLiquidity {
            base: base_token,
            quote: self.reference_token,
        };

        let candidates = self.discover_pools(base_token, provider.clone()).await?;
        let discovered = candidates
            .iter()
            .filter_map(|candidate| {
                candidate.address.map(|address| (candidate.fee_tier, address))
            })
            .collect::<Vec<(u32, Address)>>();

        if discovered.is_empty() {
            return Err(no_liquidity);
        }

        let states = self.read_pool_states(&discovered, provider).await?;
        if states.is_empty() {
            return Err(no_liquidity);
        }

        let base_units = to_base_units(amount, base_decimals)?;
        let base_is_token0 = base_token < self.reference_token;

        let mut prices = Vec::with_capacity(states.len());
        for state in &states {
            match quote_at_tick(state.tick, base_units, base_is_token0) {
                Ok(quote_units) => prices.push(PoolPrice {
                    pool: state.address,
                    fee_tier: state.fee_tier,
                    quote_units,
                }),
                Err(err) => {
                    tracing::warn!(pool = %state.address, %err, "skipping pool with unusable tick");
                }
            }
        }

        let best = select_best(&prices, self.policy).ok_or(no_liquidity)?;

        Ok(PriceQuote {
            base_token,
            quote_token: self.reference_token,
            quote_units: best.quote_units,
            price: units_to_f64(best.quote_units, self.reference_decimals),
            source_pool: best.pool,
            fee_tier: best.fee_tier,
        })
    }

    /// Quotes the base token and converts the result into fiat using the
    /// reference asset's spot price. Feed failure surfaces as
    /// `ReferencePriceUnavailable`; the on-chain quote is never silently
    /// degraded.
    pub async fn quote_in_fiat<T, N, P, F>(
        &self,
        base_token: Address,
        base_decimals: u8,
        amount: U256,
        feed: &F,
        provider: Arc<P>,
    ) -> Result<(PriceQuote, f64), EngineError>
    where
        T: Transport + Clone,
        N: Network,
        P: Provider<T, N>,
        F: SpotPriceFeed + ?Sized,
    {
        let quote = self
            .quote(base_token, base_decimals, amount, provider)
            .await?;
        let usd_rate = feed.usd_price().await?;

        let fiat_value = quote.price * usd_rate;
        Ok((quote, fiat_value))
    }

    /// Queries the factory for the pool address of
    /// (base, reference, fee) at every configured fee tier. A zero address
    /// means no pool exists at that tier. Each lookup is bounded by the
    /// batcher's call timeout and fails as a transport error.
    async fn discover_pools<T, N, P>(
        &self,
        base_token: Address,
        provider: Arc<P>,
    ) -> Result<Vec<PoolCandidate>, EngineError>
    where
        T: Transport + Clone,
        N: Network,
        P: Provider<T, N>,
    {
        let factory = IUniswapV3Factory::new(self.factory, provider);
        let call_timeout = self.multicall.call_timeout;

        let mut candidates = Vec::with_capacity(self.fee_tiers.len());
        for &fee_tier in &self.fee_tiers {
            let outcome = tokio::time::timeout(
                call_timeout,
                factory
                    .getPool(base_token, self.reference_token, U24::from(fee_tier))
                    .call(),
            )
            .await
            .map_err(|_| BatchTransportError::Timeout(call_timeout))?;

            let IUniswapV3Factory::getPoolReturn { pool } =
                outcome.map_err(BatchTransportError::ContractError)?;

            candidates.push(PoolCandidate {
                fee_tier,
                address: (!pool.is_zero()).then_some(pool),
            });
        }

        Ok(candidates)
    }

    /// Reads `slot0` for every discovered pool in one aggregated round
    /// trip. Pools whose read fails are skipped; the caller decides whether
    /// an empty result set is fatal.
    async fn read_pool_states<T, N, P>(
        &self,
        pools: &[(u32, Address)],
        provider: Arc<P>,
    ) -> Result<Vec<PoolState>, EngineError>
    where
        T: Transport + Clone,
        N: Network,
        P: Provider<T, N>,
    {
        let slot0 = slot0_function();

        let mut requests = Vec::with_capacity(pools.len());
        for &(_, address) in pools {
            requests.push(CallRequest {
                target: address,
                payload: slot0.encode_call(&[])?,
            });
        }

        let results = self.multicall.aggregate(&requests, provider).await?;

        Ok(decode_pool_states(pools, &results))
    }
}

fn slot0_function() -> AbiFunction {
    AbiFunction::new(
        "slot0",
        vec![],
        vec![
            DynSolType::Uint(160),
            DynSolType::Int(24),
            DynSolType::Uint(16),
            DynSolType::Uint(16),
            DynSolType::Uint(16),
            DynSolType::Uint(8),
            DynSolType::Bool,
        ],
    )
}

fn decode_pool_states(pools: &[(u32, Address)], results: &[CallResult]) -> Vec<PoolState> {
    let slot0 = slot0_function();
    let mut states = Vec::with_capacity(pools.len());

    for (&(fee_tier, address), result) in pools.iter().zip(results.iter()) {
        if !result.success {
            tracing::warn!(pool = %address, "slot0 read reverted");
            continue;
        }

        let tick = slot0
            .decode_return(&result.return_data)
            .ok()
            .and_then(|values| values[1].as_int())
            .map(|(tick, _)| tick.as_i32());

        match tick {
            Some(tick) => states.push(PoolState {
                address,
                fee_tier,
                tick,
            }),
            None => {
                tracing::warn!(pool = %address, "undecodable slot0 return");
            }
        }
    }

    states
}

/// Selects the extremal price across pools under the configured policy,
/// retaining the source pool as provenance.
fn select_best(prices: &[PoolPrice], policy: PricePolicy) -> Option<PoolPrice> {
    match policy {
        PricePolicy::Cheapest => prices.iter().min_by_key(|price| price.quote_units),
        PricePolicy::Dearest => prices.iter().max_by_key(|price| price.quote_units),
    }
    .copied()
}
