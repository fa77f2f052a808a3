//! In-memory collaborators and transaction helpers for tests.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{
            AtomicUsize,
            Ordering,
        },
    },
    time::Duration,
};

use alloy_consensus::{
    SignableTransaction,
    TxEip1559,
    TxEnvelope,
};
use alloy_primitives::{
    Address,
    B256,
    Bytes,
    TxKind,
    U256,
    address,
    keccak256,
};
use alloy_rpc_types::TransactionRequest;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    cache::RaceCache,
    error::{
        GatewayError,
        Result,
    },
    pipeline::{
        PendingSubmission,
        Pipeline,
        PipelineSettings,
        RequestContext,
        Submitter,
    },
    slot::{
        GNOSIS_GENESIS_TIME,
        GNOSIS_SECONDS_PER_SLOT,
        SlotClock,
    },
    upstream::{
        BlockInfo,
        ChainClient,
        EncryptedSubmission,
        KeyRegistry,
        KeyperSetManager,
        Sequencer,
        SubmissionQuote,
        TransactionSigner,
    },
};

pub const TEST_CHAIN_ID: u64 = 100;
pub const TEST_ENCRYPTED_GAS_LIMIT: u64 = 10_000_000;
pub const RECIPIENT: Address = address!("1111111111111111111111111111111111111111");

pub fn test_signer() -> PrivateKeySigner {
    PrivateKeySigner::from_slice(&[7u8; 32]).expect("valid key")
}

pub fn sign_eip1559(signer: &PrivateKeySigner, tx: TxEip1559) -> TxEnvelope {
    let signature = signer
        .sign_hash_sync(&tx.signature_hash())
        .expect("signing succeeds");
    TxEnvelope::Eip1559(tx.into_signed(signature))
}

/// Plain value transfer with a 21000 gas limit.
pub fn signed_transfer(signer: &PrivateKeySigner, nonce: u64, max_fee_per_gas: u128) -> TxEnvelope {
    sign_eip1559(
        signer,
        TxEip1559 {
            chain_id: TEST_CHAIN_ID,
            nonce,
            gas_limit: 21_000,
            max_fee_per_gas,
            max_priority_fee_per_gas: 1,
            to: TxKind::Call(RECIPIENT),
            value: U256::from(1),
            input: Default::default(),
            access_list: Default::default(),
        },
    )
}

/// Chain state backing [`MockChainClient`].
#[derive(Debug)]
pub struct MockChainState {
    pub block: BlockInfo,
    pub chain_id: u64,
    pub nonces: HashMap<Address, u64>,
    pub balances: HashMap<Address, U256>,
    pub default_balance: U256,
    pub confirmations: Vec<B256>,
    pub revert: bool,
    pub confirmation_delay: Duration,
}

/// Chain client over a mutable in-memory state. The latest block sits on a
/// slot boundary and accounts start with nonce zero and a large balance.
#[derive(Debug)]
pub struct MockChainClient {
    state: Mutex<MockChainState>,
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockChainState {
                block: BlockInfo {
                    number: 1,
                    timestamp: GNOSIS_GENESIS_TIME + 1_000 * GNOSIS_SECONDS_PER_SLOT,
                },
                chain_id: TEST_CHAIN_ID,
                nonces: HashMap::new(),
                balances: HashMap::new(),
                default_balance: U256::from(10u128.pow(21)),
                confirmations: Vec::new(),
                revert: false,
                confirmation_delay: Duration::ZERO,
            }),
        }
    }
}

impl MockChainClient {
    /// Delays every confirmation wait by `delay`.
    pub fn set_confirmation_delay(&self, delay: Duration) {
        self.state.lock().confirmation_delay = delay;
    }

    pub fn set_nonce(&self, address: Address, nonce: u64) {
        self.state.lock().nonces.insert(address, nonce);
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state.lock().balances.insert(address, balance);
    }

    pub fn set_timestamp(&self, timestamp: u64) {
        self.state.lock().block.timestamp = timestamp;
    }

    pub fn set_revert(&self, revert: bool) {
        self.state.lock().revert = revert;
    }

    /// Carrier hashes confirmations were awaited for, in order.
    pub fn confirmations(&self) -> Vec<B256> {
        self.state.lock().confirmations.clone()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn latest_block(&self) -> Result<BlockInfo> {
        Ok(self.state.lock().block)
    }

    async fn nonce(&self, address: Address) -> Result<u64> {
        Ok(self
            .state
            .lock()
            .nonces
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        let state = self.state.lock();
        Ok(state
            .balances
            .get(&address)
            .copied()
            .unwrap_or(state.default_balance))
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.state.lock().chain_id)
    }

    async fn wait_for_confirmation(&self, tx_hash: B256, _timeout: Duration) -> Result<()> {
        let (delay, revert) = {
            let mut state = self.state.lock();
            state.confirmations.push(tx_hash);
            (state.confirmation_delay, state.revert)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if revert {
            return Err(GatewayError::Upstream(format!(
                "submission {tx_hash:#x} reverted"
            )));
        }
        Ok(())
    }
}

type ErrorFactory = Box<dyn Fn() -> GatewayError + Send + Sync>;
type SubmitHook = Box<dyn Fn(&PendingSubmission) + Send + Sync>;

/// Submitter double that records every candidate it is handed.
#[derive(Default)]
pub struct RecordingSubmitter {
    calls: AtomicUsize,
    submitted: Mutex<Vec<PendingSubmission>>,
    failure: Option<ErrorFactory>,
    hook: Option<SubmitHook>,
    stall: Option<Duration>,
}

impl RecordingSubmitter {
    /// A submitter that fails every call with the produced error.
    pub fn failing(failure: impl Fn() -> GatewayError + Send + Sync + 'static) -> Self {
        Self {
            failure: Some(Box::new(failure)),
            ..Default::default()
        }
    }

    /// A submitter that runs `hook` on every candidate before replying.
    pub fn with_hook(hook: impl Fn(&PendingSubmission) + Send + Sync + 'static) -> Self {
        Self {
            hook: Some(Box::new(hook)),
            ..Default::default()
        }
    }

    /// A submitter that sleeps for `stall` before replying.
    pub fn stalled(stall: Duration) -> Self {
        Self {
            stall: Some(stall),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<PendingSubmission> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl Submitter for RecordingSubmitter {
    async fn submit(&self, candidate: &PendingSubmission, _ctx: &RequestContext) -> Result<B256> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.submitted.lock().push(candidate.clone());
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        if let Some(hook) = &self.hook {
            hook(candidate);
        }
        if let Some(failure) = &self.failure {
            return Err(failure());
        }
        Ok(keccak256(candidate.transaction.tx_hash()))
    }
}

/// Pipeline over the given doubles with the Gnosis slot clock.
pub fn pipeline_with(
    cache: RaceCache,
    chain: Arc<dyn ChainClient>,
    submitter: Arc<dyn Submitter>,
    retry_unfunded: bool,
) -> Pipeline {
    Pipeline::new(
        cache,
        chain,
        submitter,
        Arc::new(SlotClock::default()),
        PipelineSettings {
            encrypted_gas_limit: TEST_ENCRYPTED_GAS_LIMIT,
            retry_unfunded,
            request_timeout: Duration::from_secs(5),
        },
    )
}

/// Returns the same eon for every slot and records the slots queried.
#[derive(Debug, Default)]
pub struct MockKeyperSetManager {
    pub eon: u64,
    pub queried: Mutex<Vec<u64>>,
}

#[async_trait]
impl KeyperSetManager for MockKeyperSetManager {
    async fn get_keyper_set_index_by_slot(&self, slot: u64) -> Result<u64> {
        self.queried.lock().push(slot);
        Ok(self.eon)
    }
}

#[derive(Debug, Default)]
pub struct MockKeyRegistry {
    pub keys: HashMap<u64, Bytes>,
}

#[async_trait]
impl KeyRegistry for MockKeyRegistry {
    async fn get_eon_key(&self, eon: u64) -> Result<Bytes> {
        self.keys
            .get(&eon)
            .cloned()
            .ok_or_else(|| GatewayError::Upstream(format!("no key broadcast for eon {eon}")))
    }
}

/// Sequencer double quoting a fixed price and recording funded submissions.
#[derive(Debug)]
pub struct MockSequencer {
    pub signer: Address,
    pub quote: SubmissionQuote,
    pub submitted: Mutex<Vec<(EncryptedSubmission, SubmissionQuote)>>,
}

impl MockSequencer {
    pub fn new(signer: Address) -> Self {
        Self {
            signer,
            quote: SubmissionQuote {
                value: U256::from(7 * 21_000u64),
                carrier_gas: 100_000,
                max_fee_per_gas: 10,
                max_priority_fee_per_gas: 1,
            },
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn submitted(&self) -> Vec<(EncryptedSubmission, SubmissionQuote)> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl Sequencer for MockSequencer {
    fn signer_address(&self) -> Address {
        self.signer
    }

    async fn quote(&self, _submission: &EncryptedSubmission) -> Result<SubmissionQuote> {
        Ok(self.quote)
    }

    async fn submit(
        &self,
        submission: &EncryptedSubmission,
        quote: &SubmissionQuote,
    ) -> Result<B256> {
        let mut submitted = self.submitted.lock();
        submitted.push((submission.clone(), *quote));
        Ok(keccak256(submission.encrypted_transaction.as_ref()))
    }
}

/// Signs requests locally with fixed nonce-independent fees.
#[derive(Debug)]
pub struct LocalTransactionSigner {
    pub signer: PrivateKeySigner,
    pub chain: Arc<MockChainClient>,
}

#[async_trait]
impl TransactionSigner for LocalTransactionSigner {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn sign_request(&self, request: TransactionRequest) -> Result<TxEnvelope> {
        let nonce = match request.nonce {
            Some(nonce) => nonce,
            None => self.chain.nonce(self.signer.address()).await?,
        };
        let tx = TxEip1559 {
            chain_id: request.chain_id.unwrap_or(TEST_CHAIN_ID),
            nonce,
            gas_limit: request.gas.unwrap_or(21_000),
            max_fee_per_gas: request.max_fee_per_gas.unwrap_or(100),
            max_priority_fee_per_gas: request.max_priority_fee_per_gas.unwrap_or(1),
            to: request.to.unwrap_or(TxKind::Create),
            value: request.value.unwrap_or_default(),
            input: request.input.into_input().unwrap_or_default(),
            access_list: request.access_list.unwrap_or_default(),
        };
        Ok(sign_eip1559(&self.signer, tx))
    }
}
