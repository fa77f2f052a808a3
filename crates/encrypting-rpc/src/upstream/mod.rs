//! Interfaces to the chain and to the shutter contracts the gateway talks to.
//!
//! Each collaborator is a trait object so the pipeline can run against the
//! alloy-backed clients in production and against in-memory doubles in tests.

use std::{
    sync::Arc,
    time::Duration,
};

use alloy_consensus::TxEnvelope;
use alloy_primitives::{
    Address,
    B256,
    Bytes,
    U256,
};
use alloy_rpc_types::TransactionRequest;
use async_trait::async_trait;

use crate::error::Result;

pub mod contracts;

pub use contracts::{
    AlloyChainClient,
    AlloyKeyRegistry,
    AlloyKeyperSetManager,
    AlloySequencer,
    AlloyTransactionSigner,
    connect_provider,
};

/// Header fields of the latest block the pipeline needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub number: u64,
    pub timestamp: u64,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn latest_block(&self) -> Result<BlockInfo>;
    async fn nonce(&self, address: Address) -> Result<u64>;
    async fn balance(&self, address: Address) -> Result<U256>;
    async fn chain_id(&self) -> Result<u64>;
    /// Blocks until `tx_hash` is mined, failing on revert or once `timeout`
    /// elapses.
    async fn wait_for_confirmation(&self, tx_hash: B256, timeout: Duration) -> Result<()>;
}

#[async_trait]
pub trait KeyRegistry: Send + Sync {
    async fn get_eon_key(&self, eon: u64) -> Result<Bytes>;
}

#[async_trait]
pub trait KeyperSetManager: Send + Sync {
    async fn get_keyper_set_index_by_slot(&self, slot: u64) -> Result<u64>;
}

/// Arguments of `submitEncryptedTransaction`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedSubmission {
    pub eon: u64,
    pub identity_prefix: B256,
    pub encrypted_transaction: Bytes,
    pub gas_limit: u64,
}

/// Result of a dry run of a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmissionQuote {
    /// Value the sequencer requires to be attached to the call.
    pub value: U256,
    /// Gas the carrier transaction itself consumes.
    pub carrier_gas: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

impl SubmissionQuote {
    /// Upper bound of what the gateway pays for the funded call.
    pub fn total_cost(&self) -> U256 {
        self.value.saturating_add(
            U256::from(self.carrier_gas).saturating_mul(U256::from(self.max_fee_per_gas)),
        )
    }
}

#[async_trait]
pub trait Sequencer: Send + Sync {
    /// The gateway's own account that signs carrier transactions.
    fn signer_address(&self) -> Address;
    /// Dry run without value attached; nothing is broadcast.
    async fn quote(&self, submission: &EncryptedSubmission) -> Result<SubmissionQuote>;
    /// Broadcasts the funded call and returns the carrier transaction hash.
    async fn submit(
        &self,
        submission: &EncryptedSubmission,
        quote: &SubmissionQuote,
    ) -> Result<B256>;
}

/// Signs `eth_sendTransaction` requests on behalf of the gateway account.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn address(&self) -> Address;
    async fn sign_request(&self, request: TransactionRequest) -> Result<TxEnvelope>;
}

pub type SharedChainClient = Arc<dyn ChainClient>;
pub type SharedKeyRegistry = Arc<dyn KeyRegistry>;
pub type SharedKeyperSetManager = Arc<dyn KeyperSetManager>;
pub type SharedSequencer = Arc<dyn Sequencer>;
pub type SharedTransactionSigner = Arc<dyn TransactionSigner>;
