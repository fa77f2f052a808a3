//! Admission checks applied to an inbound transaction before it may enter the
//! race cache.

use alloy_consensus::{
    TxEnvelope,
    transaction::Transaction,
};
use alloy_primitives::{
    Address,
    U256,
};

use crate::error::{
    GatewayError,
    Result,
};

pub const TX_GAS: u64 = 21_000;
pub const TX_GAS_CONTRACT_CREATION: u64 = 53_000;
pub const TX_DATA_ZERO_GAS: u64 = 4;
pub const TX_DATA_NON_ZERO_GAS: u64 = 16;
pub const TX_ACCESS_LIST_ADDRESS_GAS: u64 = 2_400;
pub const TX_ACCESS_LIST_STORAGE_KEY_GAS: u64 = 1_900;
pub const INIT_CODE_WORD_GAS: u64 = 2;
pub const TX_AUTHORIZATION_GAS: u64 = 25_000;

pub const NONCE_MISMATCH: &str = "nonce is not correct";
pub const BALANCE_TOO_LOW: &str = "gas cost is higher";
pub const GAS_LIMIT_ABOVE_CAP: &str = "gas limit exceeds encrypted gas limit";
pub const GAS_LIMIT_BELOW_INTRINSIC: &str = "gas limit below intrinsic gas limit";

/// Minimum gas a transaction has to declare (Shanghai rules, plus EIP-7702
/// authorizations).
pub fn intrinsic_gas(tx: &TxEnvelope) -> u64 {
    let input = tx.input();
    let creation = tx.is_create();

    let mut gas = if creation {
        TX_GAS_CONTRACT_CREATION
    } else {
        TX_GAS
    };

    let zero_bytes = input.iter().filter(|byte| **byte == 0).count() as u64;
    let non_zero_bytes = input.len() as u64 - zero_bytes;
    gas = gas
        .saturating_add(zero_bytes.saturating_mul(TX_DATA_ZERO_GAS))
        .saturating_add(non_zero_bytes.saturating_mul(TX_DATA_NON_ZERO_GAS));

    if creation {
        let words = (input.len() as u64).div_ceil(32);
        gas = gas.saturating_add(words.saturating_mul(INIT_CODE_WORD_GAS));
    }

    if let Some(access_list) = tx.access_list() {
        for item in access_list.iter() {
            gas = gas
                .saturating_add(TX_ACCESS_LIST_ADDRESS_GAS)
                .saturating_add(
                    (item.storage_keys.len() as u64)
                        .saturating_mul(TX_ACCESS_LIST_STORAGE_KEY_GAS),
                );
        }
    }

    if let Some(authorizations) = tx.authorization_list() {
        gas = gas.saturating_add(
            (authorizations.len() as u64).saturating_mul(TX_AUTHORIZATION_GAS),
        );
    }

    gas
}

/// Upper bound of what executing `tx` can take from the sender:
/// `gas_limit * max_fee_per_gas + value`, plus blob fees for blob carriers.
pub fn transaction_cost(tx: &TxEnvelope) -> U256 {
    let mut cost = U256::from(tx.gas_limit())
        .saturating_mul(U256::from(tx.max_fee_per_gas()))
        .saturating_add(tx.value());

    if let (Some(blob_gas), Some(blob_fee)) = (tx.blob_gas_used(), tx.max_fee_per_blob_gas()) {
        cost = cost.saturating_add(U256::from(blob_gas).saturating_mul(U256::from(blob_fee)));
    }

    cost
}

/// Price used to arbitrate between competing submissions. Fee-market
/// transactions compete on their fee cap.
pub fn competing_gas_price(tx: &TxEnvelope) -> u128 {
    tx.max_fee_per_gas()
}

/// A zero-value transaction to no address, the zero address, or the sender
/// itself voids the pending nonce.
pub fn is_cancellation(tx: &TxEnvelope, sender: Address) -> bool {
    if !tx.value().is_zero() {
        return false;
    }
    match tx.to() {
        None => true,
        Some(to) => to == Address::ZERO || to == sender,
    }
}

/// Chain state of the sender at the time of submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountState {
    pub nonce: u64,
    pub balance: U256,
}

/// Checks `tx` against the sender's account state and the gateway's gas cap.
pub fn validate_transaction(
    tx: &TxEnvelope,
    account: &AccountState,
    encrypted_gas_limit: u64,
) -> Result<()> {
    if account.nonce != tx.nonce() {
        return Err(GatewayError::InvalidRequest(NONCE_MISMATCH.into()));
    }
    if account.balance < transaction_cost(tx) {
        return Err(GatewayError::InvalidRequest(BALANCE_TOO_LOW.into()));
    }
    if tx.gas_limit() > encrypted_gas_limit {
        return Err(GatewayError::InvalidRequest(GAS_LIMIT_ABOVE_CAP.into()));
    }
    if tx.gas_limit() < intrinsic_gas(tx) {
        return Err(GatewayError::InvalidParams(GAS_LIMIT_BELOW_INTRINSIC.into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_consensus::{
        SignableTransaction,
        TxEip1559,
    };
    use alloy_eips::eip2930::{
        AccessList,
        AccessListItem,
    };
    use alloy_primitives::{
        B256,
        Bytes,
        Signature,
        TxKind,
        address,
    };

    fn envelope(to: TxKind, value: U256, input: Bytes, access_list: AccessList) -> TxEnvelope {
        let tx = TxEip1559 {
            chain_id: 100,
            nonce: 1,
            gas_limit: 100_000,
            max_fee_per_gas: 10,
            max_priority_fee_per_gas: 1,
            to,
            value,
            input,
            access_list,
        };
        TxEnvelope::Eip1559(tx.into_signed(Signature::test_signature()))
    }

    fn call(input: Bytes) -> TxEnvelope {
        envelope(
            TxKind::Call(address!("1111111111111111111111111111111111111111")),
            U256::from(1),
            input,
            Default::default(),
        )
    }

    #[test]
    fn plain_transfer_costs_base_gas() {
        assert_eq!(intrinsic_gas(&call(Bytes::new())), TX_GAS);
    }

    #[test]
    fn calldata_bytes_are_priced_by_content() {
        let tx = call(Bytes::from(vec![0, 0, 1, 2, 0]));
        assert_eq!(intrinsic_gas(&tx), TX_GAS + 3 * 4 + 2 * 16);
    }

    #[test]
    fn creation_adds_surcharge_and_initcode_words() {
        let tx = envelope(
            TxKind::Create,
            U256::ZERO,
            Bytes::from(vec![1u8; 33]),
            Default::default(),
        );
        assert_eq!(intrinsic_gas(&tx), TX_GAS_CONTRACT_CREATION + 33 * 16 + 2 * 2);
    }

    #[test]
    fn access_list_entries_are_charged() {
        let list = AccessList(vec![
            AccessListItem {
                address: Address::repeat_byte(1),
                storage_keys: vec![B256::ZERO, B256::repeat_byte(1)],
            },
            AccessListItem {
                address: Address::repeat_byte(2),
                storage_keys: vec![],
            },
        ]);
        let tx = envelope(
            TxKind::Call(Address::repeat_byte(3)),
            U256::ZERO,
            Bytes::new(),
            list,
        );
        assert_eq!(intrinsic_gas(&tx), TX_GAS + 2 * 2_400 + 2 * 1_900);
    }

    #[test]
    fn cost_includes_value() {
        let tx = call(Bytes::new());
        assert_eq!(transaction_cost(&tx), U256::from(100_000u64 * 10 + 1));
    }

    #[test]
    fn cancellation_detection() {
        let sender = address!("2222222222222222222222222222222222222222");
        let to_self = envelope(TxKind::Call(sender), U256::ZERO, Bytes::new(), Default::default());
        let to_zero = envelope(
            TxKind::Call(Address::ZERO),
            U256::ZERO,
            Bytes::new(),
            Default::default(),
        );
        let create = envelope(TxKind::Create, U256::ZERO, Bytes::new(), Default::default());
        let valued = envelope(TxKind::Call(sender), U256::from(1), Bytes::new(), Default::default());
        let other = envelope(
            TxKind::Call(Address::repeat_byte(9)),
            U256::ZERO,
            Bytes::new(),
            Default::default(),
        );

        assert!(is_cancellation(&to_self, sender));
        assert!(is_cancellation(&to_zero, sender));
        assert!(is_cancellation(&create, sender));
        assert!(!is_cancellation(&valued, sender));
        assert!(!is_cancellation(&other, sender));
    }

    #[test]
    fn validation_order_and_messages() {
        let tx = call(Bytes::new());
        let rich = AccountState {
            nonce: 1,
            balance: U256::from(u64::MAX),
        };

        assert!(validate_transaction(&tx, &rich, 100_000).is_ok());

        let wrong_nonce = AccountState { nonce: 2, ..rich };
        let err = validate_transaction(&tx, &wrong_nonce, 100_000).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(ref m) if m == NONCE_MISMATCH));

        let poor = AccountState {
            balance: U256::from(10),
            ..rich
        };
        let err = validate_transaction(&tx, &poor, 100_000).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(ref m) if m == BALANCE_TOO_LOW));

        let err = validate_transaction(&tx, &rich, 99_999).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(ref m) if m == GAS_LIMIT_ABOVE_CAP));
    }

    #[test]
    fn gas_below_intrinsic_is_invalid_params() {
        let tx = TxEnvelope::Eip1559(
            TxEip1559 {
                chain_id: 100,
                nonce: 0,
                gas_limit: 20_999,
                max_fee_per_gas: 1,
                to: TxKind::Call(Address::repeat_byte(1)),
                ..Default::default()
            }
            .into_signed(Signature::test_signature()),
        );
        let account = AccountState {
            nonce: 0,
            balance: U256::MAX,
        };
        let err = validate_transaction(&tx, &account, 1_000_000).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidParams(ref m) if m == GAS_LIMIT_BELOW_INTRINSIC));
    }
}
