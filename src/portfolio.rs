use std::sync::Arc;

use alloy::{
    network::Network,
    primitives::{address, Address, U256},
    providers::Provider,
    transports::Transport,
};
use futures::{stream::FuturesOrdered, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    errors::EngineError,
    holdings::{resolve_holdings, TokenHolding},
    multicall::Multicall,
    price::{feed::SpotPriceFeed, PricePolicy, PriceQuote, QuoteEngine, DEFAULT_FEE_TIERS},
};

/// Per-chain addresses and policy knobs. Everything the engine needs to
/// talk to a chain lives here rather than in constants, so test doubles
/// can point at mock deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub multicall: Address,
    pub v3_factory: Address,
    pub reference_token: Address,
    pub reference_decimals: u8,
    pub fee_tiers: Vec<u32>,
    pub price_policy: PricePolicy,
}

impl EngineConfig {
    /// Canonical Ethereum mainnet deployments, quoting against WETH.
    pub fn mainnet() -> EngineConfig {
        EngineConfig {
            multicall: address!("cA11bde05977b3631167028862bE2a173976CA11"),
            v3_factory: address!("1F98431c8aD98523631AE4a59f267346ea31F984"),
            reference_token: address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
            reference_decimals: 18,
            fee_tiers: DEFAULT_FEE_TIERS.to_vec(),
            price_policy: PricePolicy::default(),
        }
    }

    pub fn multicall_client(&self) -> Multicall {
        Multicall::new(self.multicall)
    }

    pub fn quote_engine(&self) -> QuoteEngine {
        QuoteEngine::new(self.v3_factory, self.reference_token, self.multicall_client())
            .with_fee_tiers(self.fee_tiers.clone())
            .with_policy(self.price_policy)
    }
}

/// The outcome of pricing a single holding. "No liquidity" stays distinct
/// from transport or decode failure so callers can render an unpriced
/// entry instead of collapsing everything into one error.
#[derive(Debug)]
pub enum QuoteOutcome {
    /// The holding was priced; `unit_fiat_value` is the fiat value of one
    /// whole token.
    Priced {
        quote: PriceQuote,
        unit_fiat_value: f64,
    },
    NoLiquidity,
    Failed(EngineError),
}

/// One resolved holding with its pricing outcome.
#[derive(Debug)]
pub struct PricedHolding {
    pub holding: TokenHolding,
    pub outcome: QuoteOutcome,
}

impl PricedHolding {
    /// Fiat value of the whole position, when priced.
    pub fn position_fiat_value(&self) -> Option<f64> {
        match &self.outcome {
            QuoteOutcome::Priced {
                unit_fiat_value, ..
            } => Some(self.holding.balance() * unit_fiat_value),
            _ => None,
        }
    }
}

/// Resolves every candidate token's holding in one batched round trip,
/// then prices each resolved holding concurrently and independently. A
/// failed quote is reported in its own entry and never cancels or affects
/// sibling quotes; output order follows the resolved holdings.
#[instrument(skip(candidates, config, feed, provider), level = "debug")]
pub async fn resolve_portfolio<T, N, P, F>(
    wallet: Address,
    candidates: &[Address],
    config: &EngineConfig,
    feed: &F,
    provider: Arc<P>,
) -> Result<Vec<PricedHolding>, EngineError>
where
    T: Transport + Clone,
    N: Network,
    P: Provider<T, N>,
    F: SpotPriceFeed,
{
    let multicall = config.multicall_client();
    let holdings = resolve_holdings(candidates, wallet, &multicall, provider.clone()).await?;

    let engine = config.quote_engine();
    let engine = &engine;

    let mut quotes = FuturesOrdered::new();
    for holding in holdings {
        let provider = provider.clone();
        quotes.push_back(async move {
            let outcome = match engine
                .quote_in_fiat(
                    holding.address,
                    holding.decimals,
                    U256::from(1u8),
                    feed,
                    provider,
                )
                .await
            {
                Ok((quote, unit_fiat_value)) => QuoteOutcome::Priced {
                    quote,
                    unit_fiat_value,
                },
                Err(EngineError::NoLiquidity { .. }) => QuoteOutcome::NoLiquidity,
                Err(err) => QuoteOutcome::Failed(err),
            };

            PricedHolding { holding, outcome }
        });
    }

    let mut portfolio = Vec::with_capacity(quotes.len());
    while let Some(priced) = quotes.next().await {
        portfolio.push(priced);
    }

    Ok(portfolio)
}

#[cfg(test)]
mod test {
    use super::*;

    use alloy::{primitives::address, providers::ProviderBuilder};

    use crate::price::feed::FixedSpotPriceFeed;

    #[test]
    fn test_mainnet_config_round_trips_through_serde() {
        let config = EngineConfig::mainnet();
        let serialized = serde_json::to_string(&config).unwrap();
        let deserialized: EngineConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.multicall, config.multicall);
        assert_eq!(deserialized.v3_factory, config.v3_factory);
        assert_eq!(deserialized.fee_tiers, config.fee_tiers);
        assert_eq!(deserialized.price_policy, PricePolicy::Cheapest);
    }

    #[test]
    fn test_position_fiat_value() {
        let holding = TokenHolding {
            address: Address::ZERO,
            raw_balance: U256::from(2_000_000_000_000_000_000u128),
            decimals: 18,
            name: "Token".to_string(),
            symbol: "TKN".to_string(),
        };

        let priced = PricedHolding {
            holding,
            outcome: QuoteOutcome::Priced {
                quote: PriceQuote {
                    base_token: Address::ZERO,
                    quote_token: Address::ZERO,
                    quote_units: U256::from(1u8),
                    price: 0.05,
                    source_pool: Address::ZERO,
                    fee_tier: 3000,
                },
                unit_fiat_value: 150.0,
            },
        };
        assert_eq!(priced.position_fiat_value(), Some(300.0));

        let unpriced = PricedHolding {
            holding: TokenHolding::default(),
            outcome: QuoteOutcome::NoLiquidity,
        };
        assert_eq!(unpriced.position_fiat_value(), None);
    }

    #[tokio::test]
    async fn test_empty_candidate_list_resolves_empty_portfolio() {
        let provider = Arc::new(ProviderBuilder::new().on_http("http://[::1]:1".parse().unwrap()));

        let portfolio = resolve_portfolio(
            Address::ZERO,
            &[],
            &EngineConfig::mainnet(),
            &FixedSpotPriceFeed(3000.0),
            provider,
        )
        .await
        .unwrap();

        assert!(portfolio.is_empty());
    }

    #[tokio::test]
    #[ignore] // Ignoring to not throttle the Provider on workflows
    async fn test_resolve_portfolio_mixed_liquidity() -> eyre::Result<()> {
        let _ = tracing_subscriber::fmt().try_init();

        let rpc_endpoint = std::env::var("ETHEREUM_RPC_ENDPOINT")?;
        let provider = Arc::new(ProviderBuilder::new().on_http(rpc_endpoint.parse()?));

        // A large holder of both USDC (deep WETH pools) and a token with
        // no direct WETH pool at any tier.
        let wallet = address!("47ac0Fb4F2D84898e4D9E7b4DaB3C24507a6D503");
        let usdc = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
        let obscure = address!("00000000000000000000000000000000000000fe");

        let portfolio = resolve_portfolio(
            wallet,
            &[usdc, obscure],
            &EngineConfig::mainnet(),
            &FixedSpotPriceFeed(3000.0),
            provider,
        )
        .await?;

        assert!(portfolio
            .iter()
            .any(|entry| entry.holding.address == usdc
                && matches!(entry.outcome, QuoteOutcome::Priced { .. })));

        Ok(())
    }
}
