//! Relayer signing authority
//!
//! The relayer account pays for and signs the outer transaction that carries
//! user operations to the EntryPoint.

use alloy::{
    eips::eip2718::Encodable2718,
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, Bytes},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::services::chain_gateway::{SignedTransaction, UnsignedTransaction};

#[derive(Debug, Clone, thiserror::Error)]
pub enum SignError {
    #[error("invalid relayer key: {0}")]
    InvalidKey(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

#[async_trait]
pub trait RelaySigner: Send + Sync {
    /// Relayer account address
    fn address(&self) -> Address;

    async fn sign(&self, tx: UnsignedTransaction) -> Result<SignedTransaction, SignError>;
}

/// Signs EIP-1559 transactions with an in-process private key
pub struct LocalRelaySigner {
    wallet: EthereumWallet,
    address: Address,
    chain_id: u64,
}

impl LocalRelaySigner {
    /// # Arguments
    ///
    /// * `private_key` - Relayer private key (hex string, 0x prefix optional)
    /// * `chain_id` - Chain id baked into every signature
    pub fn new(private_key: &str, chain_id: u64) -> Result<Self, SignError> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .map_err(|e| SignError::InvalidKey(format!("{}", e)))?;

        Ok(Self::from_signer(signer, chain_id))
    }

    pub fn from_signer(signer: PrivateKeySigner, chain_id: u64) -> Self {
        let address = signer.address();
        info!(relayer = %address, chain_id = chain_id, "Relay signer ready");

        Self {
            wallet: EthereumWallet::from(signer),
            address,
            chain_id,
        }
    }
}

#[async_trait]
impl RelaySigner for LocalRelaySigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, tx: UnsignedTransaction) -> Result<SignedTransaction, SignError> {
        let request = TransactionRequest::default()
            .with_from(self.address)
            .with_to(tx.to)
            .with_input(tx.input)
            .with_nonce(tx.nonce)
            .with_chain_id(self.chain_id)
            .with_gas_limit(tx.gas_limit)
            .with_max_fee_per_gas(tx.max_fee_per_gas)
            .with_max_priority_fee_per_gas(tx.max_priority_fee_per_gas);

        let envelope = request
            .build(&self.wallet)
            .await
            .map_err(|e| SignError::Signing(e.to_string()))?;

        let hash = *envelope.tx_hash();
        debug!(tx_hash = %hash, nonce = tx.nonce, "Signed relay transaction");

        Ok(SignedTransaction {
            hash,
            raw: Bytes::from(envelope.encoded_2718()),
        })
    }
}
