//! Encrypt-and-submit pipeline.
//!
//! A submission moves through
//! `Decoded → Validated → Debounced | Accepted → KeyResolved → Encrypted →
//! DryRun → Funded → Submitted → Confirmed`; any failing step rejects the
//! call with its error. Nothing is retried within one call, the resend sweep
//! owns retries.

use std::{
    future::Future,
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

use alloy_consensus::{
    TxEnvelope,
    transaction::Transaction,
};
use alloy_eips::eip2718::{
    Decodable2718,
    Encodable2718,
};
use alloy_primitives::{
    Address,
    B256,
    hex,
};
use alloy_rpc_types::TransactionRequest;
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{
    debug,
    info,
    instrument,
    warn,
};

use crate::{
    cache::{
        CacheKey,
        CandidateSnapshot,
        RaceCache,
    },
    crypto::{
        Block,
        EonPublicKey,
        Identity,
        IdentityDeriver,
        encrypt,
    },
    error::{
        GatewayError,
        Result,
    },
    sender_recovery::recover_sender,
    slot::SlotComputer,
    upstream::{
        EncryptedSubmission,
        SharedChainClient,
        SharedKeyRegistry,
        SharedKeyperSetManager,
        SharedSequencer,
        SharedTransactionSigner,
    },
    validation::{
        AccountState,
        validate_transaction,
    },
};

pub const SLOT_COMPUTATION_ERROR: &str = "slot computation error";

/// Per-call deadline threaded through every upstream call.
#[derive(Clone, Copy, Debug)]
pub struct RequestContext {
    deadline: tokio::time::Instant,
}

impl RequestContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: tokio::time::Instant::now() + timeout,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline
            .saturating_duration_since(tokio::time::Instant::now())
    }

    /// Runs `fut`, failing with an upstream error once the deadline passes.
    pub async fn within<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout_at(self.deadline, fut)
            .await
            .map_err(|_| GatewayError::Upstream("request deadline elapsed".into()))?
    }
}

/// A validated candidate ready to be encrypted and submitted.
#[derive(Clone, Debug)]
pub struct PendingSubmission {
    pub transaction: TxEnvelope,
    pub sender: Address,
    pub slot: u64,
}

/// Encrypts a candidate and lands it in the sequencer. Returns the hash of
/// the carrier transaction.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, candidate: &PendingSubmission, ctx: &RequestContext) -> Result<B256>;
}

pub type SharedSubmitter = Arc<dyn Submitter>;

/// Everything needed to encrypt one candidate. Built per submission.
#[derive(Clone, Debug)]
pub struct EncryptionContext {
    pub slot: u64,
    pub eon: u64,
    pub eon_key: EonPublicKey,
    pub sigma: Block,
    pub identity_prefix: B256,
    pub identity: Identity,
}

/// Submits candidates through the shutter contracts.
pub struct EncryptingSubmitter {
    chain: SharedChainClient,
    keypers: SharedKeyperSetManager,
    registry: SharedKeyRegistry,
    sequencer: SharedSequencer,
    identity: Arc<dyn IdentityDeriver>,
    eon_look_ahead: u64,
}

impl EncryptingSubmitter {
    pub fn new(
        chain: SharedChainClient,
        keypers: SharedKeyperSetManager,
        registry: SharedKeyRegistry,
        sequencer: SharedSequencer,
        identity: Arc<dyn IdentityDeriver>,
        eon_look_ahead: u64,
    ) -> Self {
        Self {
            chain,
            keypers,
            registry,
            sequencer,
            identity,
            eon_look_ahead,
        }
    }

    async fn resolve_context(
        &self,
        candidate: &PendingSubmission,
        ctx: &RequestContext,
    ) -> Result<EncryptionContext> {
        let target_slot = candidate.slot.saturating_add(self.eon_look_ahead);
        let eon = ctx
            .within(self.keypers.get_keyper_set_index_by_slot(target_slot))
            .await?;
        let key_bytes = ctx.within(self.registry.get_eon_key(eon)).await?;
        let eon_key = EonPublicKey::from_bytes(&key_bytes)
            .map_err(|err| GatewayError::Upstream(format!("eon {eon}: {err}")))?;

        let sigma: Block = rand::random();
        let identity_prefix = B256::from(rand::random::<[u8; 32]>());
        let identity = self.identity.derive(&identity_prefix, candidate.sender);

        Ok(EncryptionContext {
            slot: candidate.slot,
            eon,
            eon_key,
            sigma,
            identity_prefix,
            identity,
        })
    }
}

#[async_trait]
impl Submitter for EncryptingSubmitter {
    #[instrument(
        name = "pipeline::submit",
        skip_all,
        fields(tx_hash = %candidate.transaction.tx_hash(), sender = %candidate.sender, slot = candidate.slot),
        level = "debug"
    )]
    async fn submit(&self, candidate: &PendingSubmission, ctx: &RequestContext) -> Result<B256> {
        let encryption = self.resolve_context(candidate, ctx).await?;

        let payload = candidate.transaction.encoded_2718();
        let encrypted = encrypt(
            &payload,
            &encryption.eon_key,
            &encryption.identity,
            &encryption.sigma,
        );
        let submission = EncryptedSubmission {
            eon: encryption.eon,
            identity_prefix: encryption.identity_prefix,
            encrypted_transaction: encrypted.to_bytes().into(),
            gas_limit: candidate.transaction.gas_limit(),
        };

        let quote = ctx.within(self.sequencer.quote(&submission)).await?;
        let available = ctx
            .within(self.chain.balance(self.sequencer.signer_address()))
            .await?;
        let required = quote.total_cost();
        if available < required {
            metrics::counter!("encrypting_rpc_insufficient_funds_total").increment(1);
            return Err(GatewayError::InsufficientFunds {
                required,
                available,
            });
        }

        let carrier = ctx.within(self.sequencer.submit(&submission, &quote)).await?;
        debug!(%carrier, eon = encryption.eon, "submission broadcast");

        ctx.within(self.chain.wait_for_confirmation(carrier, ctx.remaining()))
            .await?;
        metrics::counter!("encrypting_rpc_submissions_total").increment(1);
        Ok(carrier)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PipelineSettings {
    pub encrypted_gas_limit: u64,
    pub retry_unfunded: bool,
    pub request_timeout: Duration,
}

/// Entry point for intercepted submissions.
pub struct Pipeline {
    cache: RaceCache,
    chain: SharedChainClient,
    submitter: SharedSubmitter,
    slots: Arc<dyn SlotComputer>,
    signer: Option<SharedTransactionSigner>,
    settings: PipelineSettings,
    chain_id: OnceCell<u64>,
}

impl Pipeline {
    pub fn new(
        cache: RaceCache,
        chain: SharedChainClient,
        submitter: SharedSubmitter,
        slots: Arc<dyn SlotComputer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            cache,
            chain,
            submitter,
            slots,
            signer: None,
            settings,
            chain_id: OnceCell::new(),
        }
    }

    /// Enables `eth_sendTransaction` for the signer's own account.
    pub fn with_transaction_signer(mut self, signer: SharedTransactionSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn cache(&self) -> &RaceCache {
        &self.cache
    }

    pub fn chain(&self) -> &SharedChainClient {
        &self.chain
    }

    pub fn context(&self) -> RequestContext {
        RequestContext::with_timeout(self.settings.request_timeout)
    }

    #[instrument(name = "pipeline::send_raw_transaction", skip_all, level = "debug")]
    pub async fn send_raw_transaction(&self, ctx: &RequestContext, raw_hex: &str) -> Result<B256> {
        let transaction = decode_raw_tx(raw_hex)?;
        let slot = self.current_slot(ctx).await?;

        let sender = recover_sender(&transaction)?;
        self.check_chain_id(ctx, &transaction).await?;

        let (nonce, balance) = ctx
            .within(async {
                tokio::try_join!(self.chain.nonce(sender), self.chain.balance(sender))
            })
            .await?;
        validate_transaction(
            &transaction,
            &AccountState { nonce, balance },
            self.settings.encrypted_gas_limit,
        )?;

        let decision = self
            .cache
            .decide_with_sender(&transaction, sender, Instant::now());
        if !decision.should_send_now {
            info!(
                %sender,
                nonce = transaction.nonce(),
                held = %decision.held_hash,
                replaced = decision.cache_changed,
                "submission debounced"
            );
            return Ok(decision.held_hash);
        }

        let candidate = PendingSubmission {
            transaction,
            sender,
            slot,
        };
        self.dispatch(&decision.key, &candidate, ctx).await?;
        Ok(*candidate.transaction.tx_hash())
    }

    /// Fills and signs the request with the gateway account, then follows
    /// the raw transaction path.
    #[instrument(name = "pipeline::send_transaction", skip_all, level = "debug")]
    pub async fn send_transaction(
        &self,
        ctx: &RequestContext,
        request: TransactionRequest,
    ) -> Result<B256> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            GatewayError::InvalidRequest("eth_sendTransaction is not enabled".into())
        })?;
        if let Some(from) = request.from {
            if from != signer.address() {
                return Err(GatewayError::InvalidParams(format!(
                    "cannot sign for {from}, only for {}",
                    signer.address()
                )));
            }
        }

        let envelope = ctx.within(signer.sign_request(request)).await?;
        let raw_hex = hex::encode_prefixed(envelope.encoded_2718());
        self.send_raw_transaction(ctx, &raw_hex).await
    }

    /// Resubmits a held candidate without re-validating it.
    #[instrument(
        name = "pipeline::resend",
        skip_all,
        fields(sender = %candidate.key.sender, nonce = candidate.key.nonce),
        level = "debug"
    )]
    pub async fn resend(&self, candidate: &CandidateSnapshot) -> Result<B256> {
        let ctx = self.context();
        let slot = self.current_slot(&ctx).await?;
        let pending = PendingSubmission {
            transaction: candidate.transaction.clone(),
            sender: candidate.key.sender,
            slot,
        };
        self.dispatch(&candidate.key, &pending, &ctx).await
    }

    async fn dispatch(
        &self,
        key: &CacheKey,
        candidate: &PendingSubmission,
        ctx: &RequestContext,
    ) -> Result<B256> {
        match self.submitter.submit(candidate, ctx).await {
            Ok(carrier) => {
                info!(
                    tx_hash = %candidate.transaction.tx_hash(),
                    %carrier,
                    "encrypted transaction submitted"
                );
                Ok(carrier)
            }
            Err(err) => {
                if matches!(err, GatewayError::InsufficientFunds { .. })
                    && !self.settings.retry_unfunded
                {
                    self.cache.tombstone(key);
                }
                warn!(tx_hash = %candidate.transaction.tx_hash(), %err, "submission failed");
                Err(err)
            }
        }
    }

    pub(crate) async fn current_slot(&self, ctx: &RequestContext) -> Result<u64> {
        let block = ctx.within(self.chain.latest_block()).await?;
        self.slots.slot_at(block.timestamp).map_err(|err| {
            warn!(%err, block = block.number, "cannot derive slot from block timestamp");
            GatewayError::InvalidParams(SLOT_COMPUTATION_ERROR.into())
        })
    }

    async fn check_chain_id(&self, ctx: &RequestContext, transaction: &TxEnvelope) -> Result<()> {
        let Some(tx_chain_id) = transaction.chain_id() else {
            return Ok(());
        };
        let chain_id = *self
            .chain_id
            .get_or_try_init(|| ctx.within(self.chain.chain_id()))
            .await?;
        if tx_chain_id != chain_id {
            return Err(GatewayError::InvalidParams(format!(
                "chain id {tx_chain_id} does not match {chain_id}"
            )));
        }
        Ok(())
    }
}

fn decode_raw_tx(raw_hex: &str) -> Result<TxEnvelope> {
    let bytes = hex::decode(raw_hex.trim_start_matches("0x"))
        .map_err(|err| GatewayError::InvalidParams(format!("invalid raw transaction hex: {err}")))?;
    TxEnvelope::decode_2718(&mut bytes.as_slice())
        .map_err(|err| GatewayError::InvalidParams(format!("invalid raw transaction: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_hex_is_invalid_params() {
        assert!(matches!(
            decode_raw_tx("0xzz"),
            Err(GatewayError::InvalidParams(_))
        ));
        assert!(matches!(
            decode_raw_tx("0x02c0"),
            Err(GatewayError::InvalidParams(_))
        ));
    }

    #[tokio::test]
    async fn elapsed_deadline_is_an_upstream_error() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(10));
        let result: Result<()> = ctx
            .within(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(GatewayError::Upstream(_))));
    }
}
