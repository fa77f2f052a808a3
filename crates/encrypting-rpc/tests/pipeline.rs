use std::{
    collections::HashMap,
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{
    Address,
    U256,
    address,
    hex,
};
use encrypting_rpc::{
    EncryptingSubmitter,
    GatewayError,
    Pipeline,
    RaceCache,
    crypto::{
        EncryptedMessage,
        EonSecretKey,
        IdentityDeriver,
        KeccakIdentityDeriver,
        decrypt,
    },
    pipeline::RequestContext,
    sweep::ResendSweep,
    test_utils::{
        MockChainClient,
        MockKeyRegistry,
        MockKeyperSetManager,
        MockSequencer,
        pipeline_with,
        signed_transfer,
        test_signer,
    },
};

const GATEWAY: Address = address!("9999999999999999999999999999999999999999");
const EON: u64 = 3;
const LOOK_AHEAD: u64 = 8;

struct Setup {
    chain: Arc<MockChainClient>,
    keypers: Arc<MockKeyperSetManager>,
    sequencer: Arc<MockSequencer>,
    eon_secret: EonSecretKey,
    pipeline: Arc<Pipeline>,
}

fn setup(retry_unfunded: bool) -> Setup {
    let chain = Arc::new(MockChainClient::default());
    let eon_secret = EonSecretKey::from_seed(b"keyper committee");
    let keypers = Arc::new(MockKeyperSetManager {
        eon: EON,
        ..Default::default()
    });
    let registry = Arc::new(MockKeyRegistry {
        keys: HashMap::from([(EON, eon_secret.public_key().to_bytes().into())]),
    });
    let sequencer = Arc::new(MockSequencer::new(GATEWAY));

    let submitter = EncryptingSubmitter::new(
        chain.clone(),
        keypers.clone(),
        registry,
        sequencer.clone(),
        Arc::new(KeccakIdentityDeriver),
        LOOK_AHEAD,
    );
    let pipeline = Arc::new(pipeline_with(
        RaceCache::new(),
        chain.clone(),
        Arc::new(submitter),
        retry_unfunded,
    ));

    Setup {
        chain,
        keypers,
        sequencer,
        eon_secret,
        pipeline,
    }
}

#[tokio::test]
async fn submission_decrypts_to_the_original_transaction() {
    let setup = setup(true);
    let signer = test_signer();
    let tx = signed_transfer(&signer, 0, 100);
    let raw = tx.encoded_2718();

    let ctx = setup.pipeline.context();
    let hash = setup
        .pipeline
        .send_raw_transaction(&ctx, &hex::encode_prefixed(&raw))
        .await
        .unwrap();
    assert_eq!(hash, *tx.tx_hash());

    assert_eq!(*setup.keypers.queried.lock(), vec![1_000 + LOOK_AHEAD]);

    let submitted = setup.sequencer.submitted();
    assert_eq!(submitted.len(), 1);
    let (submission, quote) = &submitted[0];
    assert_eq!(submission.eon, EON);
    assert_eq!(submission.gas_limit, 21_000);
    assert_eq!(*quote, setup.sequencer.quote);

    let identity = KeccakIdentityDeriver.derive(&submission.identity_prefix, signer.address());
    let epoch_key = setup.eon_secret.epoch_secret_key(&identity);
    let message = EncryptedMessage::from_bytes(&submission.encrypted_transaction).unwrap();
    assert_eq!(decrypt(&message, &epoch_key).unwrap(), raw);

    assert_eq!(setup.chain.confirmations().len(), 1);
}

#[tokio::test]
async fn identity_prefix_is_fresh_per_submission() {
    let setup = setup(true);
    let signer = test_signer();
    let ctx = setup.pipeline.context();

    for nonce in 0..2 {
        setup.chain.set_nonce(signer.address(), nonce);
        let tx = signed_transfer(&signer, nonce, 100);
        setup
            .pipeline
            .send_raw_transaction(&ctx, &hex::encode_prefixed(tx.encoded_2718()))
            .await
            .unwrap();
    }

    let submitted = setup.sequencer.submitted();
    assert_eq!(submitted.len(), 2);
    assert_ne!(submitted[0].0.identity_prefix, submitted[1].0.identity_prefix);
}

#[tokio::test]
async fn underfunded_gateway_fails_before_broadcast() {
    let setup = setup(true);
    setup.chain.set_balance(GATEWAY, U256::from(1));
    let tx = signed_transfer(&test_signer(), 0, 100);

    let ctx = setup.pipeline.context();
    let err = setup
        .pipeline
        .send_raw_transaction(&ctx, &hex::encode_prefixed(tx.encoded_2718()))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::InsufficientFunds { .. }));
    assert_eq!(err.code(), -32000);
    assert!(setup.sequencer.submitted().is_empty());
    let snapshot = setup.pipeline.cache().snapshot();
    assert_eq!(snapshot.len(), 1, "candidate kept for the sweep");
}

#[tokio::test]
async fn underfunded_candidate_is_tombstoned_when_retries_are_off() {
    let setup = setup(false);
    setup.chain.set_balance(GATEWAY, U256::ZERO);
    let tx = signed_transfer(&test_signer(), 0, 100);

    let ctx = setup.pipeline.context();
    setup
        .pipeline
        .send_raw_transaction(&ctx, &hex::encode_prefixed(tx.encoded_2718()))
        .await
        .unwrap_err();

    assert!(setup.pipeline.cache().snapshot().is_empty());
    assert_eq!(setup.pipeline.cache().purge_tombstones(), 1);
}

#[tokio::test]
async fn reverted_submission_is_an_upstream_error() {
    let setup = setup(true);
    setup.chain.set_revert(true);
    let tx = signed_transfer(&test_signer(), 0, 100);

    let ctx = setup.pipeline.context();
    let err = setup
        .pipeline
        .send_raw_transaction(&ctx, &hex::encode_prefixed(tx.encoded_2718()))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Upstream(_)));
    assert_eq!(setup.sequencer.submitted().len(), 1);
}

#[tokio::test]
async fn reverted_submission_is_resent_after_the_debounce_window() {
    let setup = setup(true);
    setup.chain.set_revert(true);
    let tx = signed_transfer(&test_signer(), 0, 100);

    let ctx = setup.pipeline.context();
    setup
        .pipeline
        .send_raw_transaction(&ctx, &hex::encode_prefixed(tx.encoded_2718()))
        .await
        .unwrap_err();

    let snapshot = setup.pipeline.cache().snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].transaction.tx_hash(), tx.tx_hash());

    setup.chain.set_revert(false);
    let debounce = Duration::from_secs(5);
    let sweep = ResendSweep::new(setup.pipeline.clone(), debounce);
    let report = sweep.tick(Instant::now() + debounce).await;

    assert_eq!(report.resent, 1);
    assert_eq!(setup.sequencer.submitted().len(), 2);
    assert_eq!(setup.chain.confirmations().len(), 2);
}

#[tokio::test]
async fn timed_out_submission_is_resent_after_the_debounce_window() {
    let setup = setup(true);
    setup.chain.set_confirmation_delay(Duration::from_secs(5));
    let tx = signed_transfer(&test_signer(), 0, 100);

    let ctx = RequestContext::with_timeout(Duration::from_millis(100));
    let err = setup
        .pipeline
        .send_raw_transaction(&ctx, &hex::encode_prefixed(tx.encoded_2718()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("deadline"), "{err}");

    let snapshot = setup.pipeline.cache().snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].transaction.tx_hash(), tx.tx_hash());

    setup.chain.set_confirmation_delay(Duration::ZERO);
    let debounce = Duration::from_secs(5);
    let sweep = ResendSweep::new(setup.pipeline.clone(), debounce);
    let report = sweep.tick(Instant::now() + debounce).await;

    assert_eq!(report.resent, 1);
    assert_eq!(setup.sequencer.submitted().len(), 2);
}

#[tokio::test]
async fn missing_eon_key_is_an_upstream_error() {
    let chain = Arc::new(MockChainClient::default());
    let submitter = EncryptingSubmitter::new(
        chain.clone(),
        Arc::new(MockKeyperSetManager {
            eon: 42,
            ..Default::default()
        }),
        Arc::new(MockKeyRegistry::default()),
        Arc::new(MockSequencer::new(GATEWAY)),
        Arc::new(KeccakIdentityDeriver),
        LOOK_AHEAD,
    );
    let pipeline = pipeline_with(RaceCache::new(), chain, Arc::new(submitter), true);
    let tx = signed_transfer(&test_signer(), 0, 100);

    let ctx = pipeline.context();
    let err = pipeline
        .send_raw_transaction(&ctx, &hex::encode_prefixed(tx.encoded_2718()))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Upstream(_)));
}
