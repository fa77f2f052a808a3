use std::sync::Arc;

use alloy::{
    providers::DynProvider,
    signers::local::PrivateKeySigner,
};
use tokio::{
    net::TcpListener,
    signal,
};
use tokio_util::sync::CancellationToken;
use tracing::{
    info,
    warn,
};

use crate::{
    cache::RaceCache,
    config::GatewayConfig,
    crypto::KeccakIdentityDeriver,
    error::{
        GatewayError,
        Result,
    },
    pipeline::{
        EncryptingSubmitter,
        Pipeline,
        PipelineSettings,
        SharedSubmitter,
    },
    router::{
        GatewayState,
        build_router,
    },
    slot::SlotComputer,
    sweep::ResendSweep,
    upstream::{
        AlloyChainClient,
        AlloyKeyRegistry,
        AlloyKeyperSetManager,
        AlloySequencer,
        AlloyTransactionSigner,
        SharedChainClient,
        SharedTransactionSigner,
        connect_provider,
    },
};

/// Wires configuration and collaborators into a runnable [`Gateway`].
///
/// Collaborators that are not injected are built against the configured
/// backend node with the gateway signing key.
pub struct GatewayBuilder {
    config: GatewayConfig,
    chain: Option<SharedChainClient>,
    submitter: Option<SharedSubmitter>,
    signer: Option<SharedTransactionSigner>,
    slots: Option<Arc<dyn SlotComputer>>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            chain: None,
            submitter: None,
            signer: None,
            slots: None,
        }
    }

    pub fn with_chain_client(mut self, chain: SharedChainClient) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_submitter(mut self, submitter: SharedSubmitter) -> Self {
        self.submitter = Some(submitter);
        self
    }

    pub fn with_transaction_signer(mut self, signer: SharedTransactionSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_slot_computer(mut self, slots: Arc<dyn SlotComputer>) -> Self {
        self.slots = Some(slots);
        self
    }

    pub fn build(self) -> Result<Gateway> {
        let config = self.config.validate()?;

        let backend = if self.chain.is_none() || self.submitter.is_none() {
            Some(connect_backend(&config)?)
        } else {
            None
        };

        let chain: SharedChainClient = match (self.chain, &backend) {
            (Some(chain), _) => chain,
            (None, Some((provider, _))) => Arc::new(AlloyChainClient::new(provider.clone())),
            (None, None) => unreachable_backend()?,
        };

        let submitter: SharedSubmitter = match (self.submitter, &backend) {
            (Some(submitter), _) => submitter,
            (None, Some((provider, wallet))) => {
                let contracts = &config.contracts;
                Arc::new(EncryptingSubmitter::new(
                    chain.clone(),
                    Arc::new(AlloyKeyperSetManager::new(
                        contracts.keyper_set_manager,
                        provider.clone(),
                    )),
                    Arc::new(AlloyKeyRegistry::new(
                        contracts.key_broadcast,
                        provider.clone(),
                    )),
                    Arc::new(AlloySequencer::new(
                        contracts.sequencer,
                        provider.clone(),
                        wallet.address(),
                    )),
                    Arc::new(KeccakIdentityDeriver),
                    config.eon_look_ahead,
                ))
            }
            (None, None) => unreachable_backend()?,
        };

        let signer: Option<SharedTransactionSigner> = match (self.signer, &backend) {
            (Some(signer), _) => Some(signer),
            (None, Some((provider, wallet))) => Some(Arc::new(AlloyTransactionSigner::new(
                provider.clone(),
                wallet.clone(),
            ))),
            (None, None) => None,
        };

        let slots = self.slots.unwrap_or_else(|| Arc::new(config.slots));

        let mut pipeline = Pipeline::new(
            RaceCache::new(),
            chain,
            submitter,
            slots,
            PipelineSettings {
                encrypted_gas_limit: config.encrypted_gas_limit,
                retry_unfunded: config.retry_unfunded,
                request_timeout: config.request_timeout(),
            },
        );
        if let Some(signer) = signer {
            pipeline = pipeline.with_transaction_signer(signer);
        }
        let pipeline = Arc::new(pipeline);

        Ok(Gateway {
            state: GatewayState::new(pipeline.clone(), config.backend_http.clone()),
            sweep: ResendSweep::new(pipeline, config.debounce()),
            config,
        })
    }
}

fn connect_backend(config: &GatewayConfig) -> Result<(DynProvider, PrivateKeySigner)> {
    let wallet: PrivateKeySigner = config
        .signing_key
        .parse()
        .map_err(|err| GatewayError::InvalidConfig(format!("signing_key: {err}")))?;
    let provider = connect_provider(config.backend_http.clone(), wallet.clone());
    Ok((provider, wallet))
}

fn unreachable_backend<T>() -> Result<T> {
    Err(GatewayError::InvalidConfig(
        "backend provider was not connected".into(),
    ))
}

pub struct Gateway {
    config: GatewayConfig,
    state: GatewayState,
    sweep: ResendSweep,
}

impl Gateway {
    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    /// Binds the configured address and serves until ctrl-c.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let shutdown = CancellationToken::new();

        let on_signal = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = signal::ctrl_c().await {
                warn!(%err, "failed to listen for shutdown signal");
            }
            on_signal.cancel();
        });

        self.serve_with_listener(listener, shutdown).await
    }

    /// Serves on `listener` until `shutdown` is cancelled. The resend sweep
    /// runs alongside the server and stops with it.
    pub async fn serve_with_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let Gateway {
            config,
            state,
            sweep,
        } = self;

        let addr = listener.local_addr()?;
        let path = config.rpc_path.clone();
        info!(%addr, %path, backend = %config.backend_http, "encrypting rpc gateway listening");

        let sweep_task = tokio::spawn(sweep.run(config.sweep_interval(), shutdown.clone()));

        let router = build_router(state, &path);
        let serve_shutdown = shutdown.clone();
        let served = axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
            .await;

        shutdown.cancel();
        if let Err(err) = sweep_task.await {
            warn!(%err, "resend sweep task failed");
        }
        served?;
        info!("encrypting rpc gateway shutdown complete");
        Ok(())
    }
}
