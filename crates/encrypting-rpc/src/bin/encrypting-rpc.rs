use alloy_primitives::Address;
use clap::Parser;
use encrypting_rpc::{
    GatewayBuilder,
    GatewayConfig,
    config::ContractAddresses,
    slot::SlotClock,
};
use tracing_subscriber::{
    EnvFilter,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use url::Url;

#[derive(Debug, Parser)]
#[command(author, version, about = "Encrypting JSON-RPC gateway", long_about = None)]
struct Cli {
    /// Address for the gateway HTTP server (e.g. 0.0.0.0:8546)
    #[arg(long = "listen", env = "ENCRYPTING_RPC_LISTEN", default_value = "127.0.0.1:8546")]
    listen_addr: String,
    /// JSON-RPC path exposed by the gateway
    #[arg(long = "rpc-path", env = "ENCRYPTING_RPC_PATH", default_value = "/")]
    rpc_path: String,
    /// Execution node HTTP endpoint
    #[arg(long = "backend", env = "ENCRYPTING_RPC_BACKEND", default_value = "http://127.0.0.1:8545")]
    backend: String,
    /// Hex private key paying for sequencer submissions
    #[arg(long = "signing-key", env = "ENCRYPTING_RPC_SIGNING_KEY", hide_env_values = true)]
    signing_key: String,
    #[arg(long = "sequencer-address", env = "ENCRYPTING_RPC_SEQUENCER_ADDRESS")]
    sequencer: Address,
    #[arg(long = "keyper-set-manager-address", env = "ENCRYPTING_RPC_KEYPER_SET_MANAGER_ADDRESS")]
    keyper_set_manager: Address,
    #[arg(long = "key-broadcast-address", env = "ENCRYPTING_RPC_KEY_BROADCAST_ADDRESS")]
    key_broadcast: Address,
    #[arg(long = "genesis-time", env = "ENCRYPTING_RPC_GENESIS_TIME")]
    genesis_time: Option<u64>,
    #[arg(long = "seconds-per-slot", env = "ENCRYPTING_RPC_SECONDS_PER_SLOT")]
    seconds_per_slot: Option<u64>,
    /// Minimum seconds between two submissions for the same sender and nonce
    #[arg(long = "debounce-secs", env = "ENCRYPTING_RPC_DEBOUNCE_SECS", default_value_t = 5)]
    debounce_secs: u64,
    /// Slots added to the current slot when picking the target eon
    #[arg(long = "eon-look-ahead", env = "ENCRYPTING_RPC_EON_LOOK_AHEAD", default_value_t = 8)]
    eon_look_ahead: u64,
    #[arg(
        long = "encrypted-gas-limit",
        env = "ENCRYPTING_RPC_ENCRYPTED_GAS_LIMIT",
        default_value_t = 10_000_000
    )]
    encrypted_gas_limit: u64,
    #[arg(long = "sweep-interval-secs", env = "ENCRYPTING_RPC_SWEEP_INTERVAL_SECS", default_value_t = 5)]
    sweep_interval_secs: u64,
    #[arg(long = "request-timeout-secs", env = "ENCRYPTING_RPC_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,
    /// Drop candidates the gateway cannot afford instead of retrying them
    #[arg(long = "drop-unfunded", env = "ENCRYPTING_RPC_DROP_UNFUNDED")]
    drop_unfunded: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let defaults = SlotClock::default();

    let config = GatewayConfig {
        bind_addr: cli.listen_addr.parse()?,
        rpc_path: cli.rpc_path,
        backend_http: Url::parse(&cli.backend)?,
        signing_key: cli.signing_key,
        contracts: ContractAddresses {
            sequencer: cli.sequencer,
            keyper_set_manager: cli.keyper_set_manager,
            key_broadcast: cli.key_broadcast,
        },
        slots: SlotClock {
            genesis_time: cli.genesis_time.unwrap_or(defaults.genesis_time),
            seconds_per_slot: cli.seconds_per_slot.unwrap_or(defaults.seconds_per_slot),
        },
        debounce_secs: cli.debounce_secs,
        eon_look_ahead: cli.eon_look_ahead,
        encrypted_gas_limit: cli.encrypted_gas_limit,
        sweep_interval_secs: cli.sweep_interval_secs,
        request_timeout_secs: cli.request_timeout_secs,
        retry_unfunded: !cli.drop_unfunded,
    }
    .validate()?;

    if !config.retry_unfunded {
        tracing::warn!("candidates the gateway cannot afford will be dropped");
    }

    GatewayBuilder::new(config).build()?.serve().await?;
    Ok(())
}
