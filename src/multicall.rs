use std::{sync::Arc, time::Duration};

use alloy::{
    network::Network,
    primitives::{Address, Bytes},
    providers::Provider,
    transports::Transport,
};
use tracing::instrument;

use crate::errors::{BatchTransportError, EngineError};

mod abi {
    use alloy::sol;

    sol! {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        #[sol(rpc)]
        contract IMulticall3 {
            function aggregate3(Call3[] calldata calls) external payable returns (Result[] memory returnData);
        }
    }
}

use abi::IMulticall3;

/// A single read-only sub-call to be aggregated. Ordering within a batch is
/// significant and preserved end to end.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub target: Address,
    pub payload: Bytes,
}

/// The raw result of one sub-call, positionally aligned with its request.
#[derive(Debug, Clone)]
pub struct CallResult {
    pub success: bool,
    pub return_data: Bytes,
}

/// Aggregates many independent contract reads into one round trip through
/// an on-chain Multicall3 deployment. The aggregator address is
/// configuration rather than a constant so tests can point it elsewhere.
#[derive(Debug, Clone)]
pub struct Multicall {
    pub address: Address,
    pub call_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Multicall {
    pub fn new(address: Address) -> Multicall {
        Multicall {
            address,
            call_timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_backoff: Duration::from_millis(250),
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Multicall {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_backoff: Duration) -> Multicall {
        self.max_retries = max_retries;
        self.retry_backoff = retry_backoff;
        self
    }

    /// Issues every request in a single `aggregate3` call and returns one
    /// result per request, in request order. A reverting sub-call yields
    /// `success == false` in its slot without failing the batch; a failure
    /// of the aggregate call itself fails the whole batch with
    /// [`BatchTransportError`]. An empty request list returns an empty
    /// result list without touching the network.
    #[instrument(skip_all, level = "debug", fields(requests = requests.len()))]
    pub async fn aggregate<T, N, P>(
        &self,
        requests: &[CallRequest],
        provider: Arc<P>,
    ) -> Result<Vec<CallResult>, EngineError>
    where
        T: Transport + Clone,
        N: Network,
        P: Provider<T, N>,
    {
        if requests.is_empty() {
            return Ok(vec![]);
        }

        let calls = requests
            .iter()
            .map(|request| abi::Call3 {
                target: request.target,
                allowFailure: true,
                callData: request.payload.clone(),
            })
            .collect::<Vec<abi::Call3>>();

        let mut attempt = 0;
        let results = loop {
            match self.try_aggregate(calls.clone(), provider.clone()).await {
                Ok(results) => break results,
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::debug!(%err, attempt, "retrying aggregate call");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(err) => return Err(err.into()),
            }
        };

        if results.len() != requests.len() {
            return Err(EngineError::ResultLengthMismatch {
                expected: requests.len(),
                returned: results.len(),
            });
        }

        Ok(results
            .into_iter()
            .map(|result| CallResult {
                success: result.success,
                return_data: result.returnData,
            })
            .collect())
    }

    async fn try_aggregate<T, N, P>(
        &self,
        calls: Vec<abi::Call3>,
        provider: Arc<P>,
    ) -> Result<Vec<abi::Result>, BatchTransportError>
    where
        T: Transport + Clone,
        N: Network,
        P: Provider<T, N>,
    {
        let multicall = IMulticall3::new(self.address, provider);

        match tokio::time::timeout(self.call_timeout, multicall.aggregate3(calls).call()).await {
            Ok(outcome) => Ok(outcome?.returnData),
            Err(_) => Err(BatchTransportError::Timeout(self.call_timeout)),
        }
    }
}
