//! Chain gateway: broadcast relay transactions and wait for their inclusion
//!
//! `ChainGateway` is the seam the submission worker talks to. `RpcChainGateway`
//! implements it over an Ethereum JSON-RPC endpoint.

use alloy::{
    primitives::{Address, B256, Bytes},
    providers::{Provider, ProviderBuilder, RootProvider},
    transports::{
        RpcError,
        http::{Client, Http},
    },
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::models::record::{OperationReceipt, ReceiptLog};

/// Consecutive receipt-poll transport failures tolerated before giving up
const MAX_CONSECUTIVE_POLL_ERRORS: u32 = 5;

/// Relay transaction before signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub to: Address,
    pub input: Bytes,
    pub nonce: u64,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// Signed, wire-encoded relay transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub hash: B256,
    pub raw: Bytes,
}

/// Handle to a broadcast transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHandle {
    pub hash: B256,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Node unreachable or transport failure
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    /// Node refused the transaction
    #[error("broadcast rejected: {0}")]
    Broadcast(String),
    #[error("inclusion failed: {0}")]
    Inclusion(String),
    #[error("transaction {0} reverted")]
    Reverted(B256),
}

#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Next sequence number (transaction count, pending included) of `account`
    async fn sequence_number(&self, account: Address) -> Result<u64, GatewayError>;

    async fn broadcast(&self, tx: SignedTransaction) -> Result<TransactionHandle, GatewayError>;

    /// Blocks until the transaction is included. A reverted execution is an error.
    async fn await_inclusion(&self, handle: &TransactionHandle) -> Result<OperationReceipt, GatewayError>;
}

/// Chain gateway over an HTTP JSON-RPC provider
pub struct RpcChainGateway {
    provider: RootProvider<Http<Client>>,
    chain_id: u64,
    poll_interval: Duration,
}

impl RpcChainGateway {
    /// Connect to `rpc_url` and read its chain id
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the node does not answer
    pub async fn connect(rpc_url: &str, poll_interval: Duration) -> Result<Self, GatewayError> {
        info!(rpc_url = %rpc_url, "Initializing RpcChainGateway");

        let provider = ProviderBuilder::new().on_http(
            rpc_url
                .parse()
                .map_err(|e| GatewayError::Unavailable(format!("Invalid RPC URL: {}", e)))?,
        );

        let chain_id = provider.get_chain_id().await.map_err(|e| {
            error!(error = %e, "Failed to connect to RPC");
            GatewayError::Unavailable(format!("Connection failed: {}", e))
        })?;

        info!(chain_id = chain_id, "RpcChainGateway initialized successfully");

        Ok(Self {
            provider,
            chain_id,
            poll_interval,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

#[async_trait]
impl ChainGateway for RpcChainGateway {
    async fn sequence_number(&self, account: Address) -> Result<u64, GatewayError> {
        self.provider
            .get_transaction_count(account)
            .pending()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("Failed to get transaction count: {}", e)))
    }

    async fn broadcast(&self, tx: SignedTransaction) -> Result<TransactionHandle, GatewayError> {
        let pending = self
            .provider
            .send_raw_transaction(&tx.raw)
            .await
            .map_err(|e| match e {
                RpcError::ErrorResp(payload) => GatewayError::Broadcast(payload.to_string()),
                other => GatewayError::Unavailable(format!("Send failed: {}", other)),
            })?;

        let hash = *pending.tx_hash();
        if hash != tx.hash {
            warn!(expected = %tx.hash, reported = %hash, "Node reported a different transaction hash");
        }

        debug!(tx_hash = %hash, "Relay transaction broadcast");
        Ok(TransactionHandle { hash })
    }

    async fn await_inclusion(&self, handle: &TransactionHandle) -> Result<OperationReceipt, GatewayError> {
        let mut consecutive_errors = 0;

        loop {
            match self.provider.get_transaction_receipt(handle.hash).await {
                Ok(Some(receipt)) => {
                    let logs = receipt
                        .inner
                        .logs()
                        .iter()
                        .map(|log| ReceiptLog {
                            address: log.address(),
                            topics: log.topics().to_vec(),
                            data: log.data().data.clone(),
                        })
                        .collect();

                    let converted = OperationReceipt {
                        transaction_hash: receipt.transaction_hash,
                        block_number: receipt.block_number,
                        gas_used: gas_used_u64(receipt.gas_used),
                        success: receipt.status(),
                        logs,
                    };

                    if !converted.success {
                        return Err(GatewayError::Reverted(handle.hash));
                    }
                    return Ok(converted);
                }
                Ok(None) => {
                    consecutive_errors = 0;
                    debug!(tx_hash = %handle.hash, "Receipt not available yet, polling...");
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(
                        tx_hash = %handle.hash,
                        error = %e,
                        attempt = consecutive_errors,
                        "Receipt poll failed"
                    );
                    if consecutive_errors >= MAX_CONSECUTIVE_POLL_ERRORS {
                        return Err(GatewayError::Inclusion(format!(
                            "Receipt polling failed {} times in a row: {}",
                            consecutive_errors, e
                        )));
                    }
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Receipt gas arrives as `u128`; anything past `u64::MAX` saturates
fn gas_used_u64(gas_used: u128) -> u64 {
    u64::try_from(gas_used).unwrap_or(u64::MAX)
}
