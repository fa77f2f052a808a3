use std::time::Duration;

use alloy::{
    network::{
        EthereumWallet,
        ReceiptResponse,
        TransactionBuilder,
    },
    providers::{
        DynProvider,
        PendingTransactionBuilder,
        Provider,
        ProviderBuilder,
    },
    signers::local::PrivateKeySigner,
    sol,
};
use alloy_consensus::TxEnvelope;
use alloy_eips::BlockNumberOrTag;
use alloy_primitives::{
    Address,
    B256,
    Bytes,
    U256,
};
use alloy_rpc_types::TransactionRequest;
use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::{
    BlockInfo,
    ChainClient,
    EncryptedSubmission,
    KeyRegistry,
    KeyperSetManager,
    Sequencer,
    SubmissionQuote,
    TransactionSigner,
};
use crate::error::{
    GatewayError,
    Result,
};

sol! {
    #[sol(rpc)]
    interface ISequencer {
        function submitEncryptedTransaction(
            uint64 eon,
            bytes32 identityPrefix,
            bytes encryptedTransaction,
            uint256 gasLimit
        ) external payable;
    }

    #[sol(rpc)]
    interface IKeyperSetManager {
        function getKeyperSetIndexBySlot(uint64 slot) external view returns (uint64);
    }

    #[sol(rpc)]
    interface IKeyBroadcastContract {
        function getEonKey(uint64 eon) external view returns (bytes memory);
    }
}

/// HTTP provider that signs with the gateway key.
pub fn connect_provider(rpc_url: Url, signer: PrivateKeySigner) -> DynProvider {
    ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .connect_http(rpc_url)
        .erased()
}

#[derive(Clone)]
pub struct AlloyChainClient {
    provider: DynProvider,
}

impl AlloyChainClient {
    pub fn new(provider: DynProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn latest_block(&self) -> Result<BlockInfo> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(GatewayError::upstream)?
            .ok_or_else(|| GatewayError::Upstream("latest block unavailable".into()))?;

        Ok(BlockInfo {
            number: block.header.number,
            timestamp: block.header.timestamp,
        })
    }

    async fn nonce(&self, address: Address) -> Result<u64> {
        self.provider
            .get_transaction_count(address)
            .await
            .map_err(GatewayError::upstream)
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        self.provider
            .get_balance(address)
            .await
            .map_err(GatewayError::upstream)
    }

    async fn chain_id(&self) -> Result<u64> {
        self.provider
            .get_chain_id()
            .await
            .map_err(GatewayError::upstream)
    }

    async fn wait_for_confirmation(&self, tx_hash: B256, timeout: Duration) -> Result<()> {
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), tx_hash)
            .with_timeout(Some(timeout))
            .get_receipt()
            .await
            .map_err(GatewayError::upstream)?;

        if !receipt.status() {
            return Err(GatewayError::Upstream(format!(
                "submission {tx_hash:#x} reverted"
            )));
        }
        debug!(%tx_hash, block = ?receipt.block_number(), "submission confirmed");
        Ok(())
    }
}

#[derive(Clone)]
pub struct AlloyKeyperSetManager {
    contract: IKeyperSetManager::IKeyperSetManagerInstance<DynProvider>,
}

impl AlloyKeyperSetManager {
    pub fn new(address: Address, provider: DynProvider) -> Self {
        Self {
            contract: IKeyperSetManager::new(address, provider),
        }
    }
}

#[async_trait]
impl KeyperSetManager for AlloyKeyperSetManager {
    async fn get_keyper_set_index_by_slot(&self, slot: u64) -> Result<u64> {
        self.contract
            .getKeyperSetIndexBySlot(slot)
            .call()
            .await
            .map_err(GatewayError::upstream)
    }
}

#[derive(Clone)]
pub struct AlloyKeyRegistry {
    contract: IKeyBroadcastContract::IKeyBroadcastContractInstance<DynProvider>,
}

impl AlloyKeyRegistry {
    pub fn new(address: Address, provider: DynProvider) -> Self {
        Self {
            contract: IKeyBroadcastContract::new(address, provider),
        }
    }
}

#[async_trait]
impl KeyRegistry for AlloyKeyRegistry {
    async fn get_eon_key(&self, eon: u64) -> Result<Bytes> {
        let key = self
            .contract
            .getEonKey(eon)
            .call()
            .await
            .map_err(GatewayError::upstream)?;
        if key.is_empty() {
            return Err(GatewayError::Upstream(format!("no key broadcast for eon {eon}")));
        }
        Ok(key)
    }
}

#[derive(Clone)]
pub struct AlloySequencer {
    contract: ISequencer::ISequencerInstance<DynProvider>,
    provider: DynProvider,
    signer: Address,
}

impl AlloySequencer {
    pub fn new(address: Address, provider: DynProvider, signer: Address) -> Self {
        Self {
            contract: ISequencer::new(address, provider.clone()),
            provider,
            signer,
        }
    }
}

#[async_trait]
impl Sequencer for AlloySequencer {
    fn signer_address(&self) -> Address {
        self.signer
    }

    /// Estimates the carrier gas with no value attached. Nodes evaluate the
    /// estimate with a zero base fee, so the fee check inside the contract
    /// passes; the value it demands at inclusion is `base_fee * gas_limit`.
    async fn quote(&self, submission: &EncryptedSubmission) -> Result<SubmissionQuote> {
        let carrier_gas = self
            .contract
            .submitEncryptedTransaction(
                submission.eon,
                submission.identity_prefix,
                submission.encrypted_transaction.clone(),
                U256::from(submission.gas_limit),
            )
            .from(self.signer)
            .estimate_gas()
            .await
            .map_err(GatewayError::upstream)?;

        let base_fee = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(GatewayError::upstream)?
            .and_then(|block| block.header.base_fee_per_gas)
            .ok_or_else(|| GatewayError::Upstream("latest block has no base fee".into()))?;

        let fees = self
            .provider
            .estimate_eip1559_fees()
            .await
            .map_err(GatewayError::upstream)?;

        Ok(SubmissionQuote {
            value: U256::from(base_fee).saturating_mul(U256::from(submission.gas_limit)),
            carrier_gas,
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
        })
    }

    async fn submit(
        &self,
        submission: &EncryptedSubmission,
        quote: &SubmissionQuote,
    ) -> Result<B256> {
        let pending = self
            .contract
            .submitEncryptedTransaction(
                submission.eon,
                submission.identity_prefix,
                submission.encrypted_transaction.clone(),
                U256::from(submission.gas_limit),
            )
            .from(self.signer)
            .value(quote.value)
            .gas(quote.carrier_gas)
            .max_fee_per_gas(quote.max_fee_per_gas)
            .max_priority_fee_per_gas(quote.max_priority_fee_per_gas)
            .send()
            .await
            .map_err(GatewayError::upstream)?;
        Ok(*pending.tx_hash())
    }
}

/// Fills and signs `eth_sendTransaction` requests with the gateway key.
#[derive(Clone)]
pub struct AlloyTransactionSigner {
    provider: DynProvider,
    wallet: EthereumWallet,
    address: Address,
}

impl AlloyTransactionSigner {
    pub fn new(provider: DynProvider, signer: PrivateKeySigner) -> Self {
        let address = signer.address();
        Self {
            provider,
            wallet: EthereumWallet::from(signer),
            address,
        }
    }
}

#[async_trait]
impl TransactionSigner for AlloyTransactionSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_request(&self, mut request: TransactionRequest) -> Result<TxEnvelope> {
        request.from = Some(self.address);
        if request.nonce.is_none() {
            request.nonce = Some(
                self.provider
                    .get_transaction_count(self.address)
                    .await
                    .map_err(GatewayError::upstream)?,
            );
        }
        if request.chain_id.is_none() {
            request.chain_id = Some(
                self.provider
                    .get_chain_id()
                    .await
                    .map_err(GatewayError::upstream)?,
            );
        }
        if request.gas_price.is_none() && request.max_fee_per_gas.is_none() {
            let fees = self
                .provider
                .estimate_eip1559_fees()
                .await
                .map_err(GatewayError::upstream)?;
            request.max_fee_per_gas = Some(fees.max_fee_per_gas);
            request.max_priority_fee_per_gas = Some(fees.max_priority_fee_per_gas);
        }
        if request.gas.is_none() {
            request.gas = Some(
                self.provider
                    .estimate_gas(request.clone())
                    .await
                    .map_err(GatewayError::upstream)?,
            );
        }

        request
            .build(&self.wallet)
            .await
            .map_err(|err| GatewayError::InvalidParams(format!("cannot sign transaction: {err}")))
    }
}
