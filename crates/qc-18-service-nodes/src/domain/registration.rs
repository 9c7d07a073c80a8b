//! # Registration & Stake Validator
//!
//! Parses registration and stake payloads out of transaction extras and
//! decides whether they are acceptable at a given hardfork.
//!
//! ## Registration formats
//!
//! | Hardfork | Reserved values | Fee unit | `hf` field |
//! |----------|-----------------|----------|------------|
//! | < HF19 | portions of `STAKING_PORTIONS` | portions | expiry timestamp |
//! | >= HF19 | atomic amounts | basis points | hardfork number |
//! | >= HF21 | bridge contributors | basis points | hardfork number |
//!
//! The registration signature covers
//! `fee LE || (spend || view || amount LE)* || hf LE`, hashed with the chain hash.

use super::info::{Contributor, LockedContribution, ServiceNodeInfo};
use super::rules::{
    check_service_node_portions, check_service_node_stakes, get_min_node_contribution,
    max_contributors_for_hf, mul128_div64, MAX_BLOCK_NUMBER, MAX_CONTRIBUTORS_V1,
    STAKING_FEE_BASIS, STAKING_PORTIONS, UNASSIGNED_SWARM_ID,
};
use crate::config::NetworkConfig;
use crate::error::RegistrationError;
use crate::ports::outbound::CryptoProvider;
use shared_types::{
    AccountAddress, BlsPublicKey, EthAddress, HardFork, Hash, PublicKey, SecretKey, Signature,
    Transaction,
};
use tracing::info;

/// `hf_or_expiration` values at or below this are hardfork numbers.
const MAX_HF_FIELD: u64 = 255;

/// Normalised registration payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationDetails {
    pub service_node_pubkey: PublicKey,
    /// Reserved `(address, portions or amount)`, operator first
    pub reserved: Vec<(AccountAddress, u64)>,
    /// Bridge contributors, operator first
    pub eth_contributions: Vec<(EthAddress, u64)>,
    pub bls_pubkey: BlsPublicKey,
    pub fee: u64,
    /// Hardfork number, or the expiry timestamp of a portion registration
    pub hf: u64,
    pub uses_portions: bool,
    pub signature: Signature,
}

/// Stake carried by a transaction, as decoded by its sender's disclosed keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StakingComponents {
    pub service_node_pubkey: PublicKey,
    pub address: AccountAddress,
    pub transferred: u64,
    pub tx_key: SecretKey,
    pub locked_contributions: Vec<LockedContribution>,
}

pub fn reg_tx_extract_fields(tx: &Transaction) -> Option<RegistrationDetails> {
    let registration = tx.registration()?;
    let count = registration.public_spend_keys.len();
    if registration.public_view_keys.len() != count || registration.amounts.len() != count {
        return None;
    }
    let service_node_pubkey = tx.service_node_pubkey()?;

    let reserved = registration
        .public_spend_keys
        .iter()
        .zip(&registration.public_view_keys)
        .zip(&registration.amounts)
        .map(|((spend, view), amount)| (AccountAddress::new(*spend, *view), *amount))
        .collect();

    Some(RegistrationDetails {
        service_node_pubkey,
        reserved,
        eth_contributions: Vec::new(),
        bls_pubkey: [0u8; 64],
        fee: registration.fee,
        hf: registration.hf_or_expiration,
        uses_portions: registration.hf_or_expiration > MAX_HF_FIELD,
        signature: registration.signature,
    })
}

pub fn eth_reg_tx_extract_fields(hf: HardFork, tx: &Transaction) -> Option<RegistrationDetails> {
    let registration = tx.eth_new_service_node()?;
    Some(RegistrationDetails {
        service_node_pubkey: registration.service_node_pubkey,
        reserved: Vec::new(),
        eth_contributions: registration
            .contributors
            .iter()
            .map(|contributor| (contributor.address, contributor.amount))
            .collect(),
        bls_pubkey: registration.bls_pubkey,
        fee: registration.fee,
        hf: u64::from(hf.as_u8()),
        uses_portions: false,
        signature: registration.signature,
    })
}

/// Structural and economic checks; the signature is checked separately.
pub fn validate_registration(
    hf: HardFork,
    net: &NetworkConfig,
    staking_requirement: u64,
    block_timestamp: u64,
    reg: &RegistrationDetails,
) -> Result<(), RegistrationError> {
    if reg.uses_portions {
        if hf >= HardFork::REWARD_BATCHING {
            return Err(RegistrationError::new(
                "Portion-based registrations are not permitted in HF19+",
            ));
        }
    } else if hf < HardFork::REWARD_BATCHING || reg.hf != u64::from(hf.as_u8()) {
        return Err(RegistrationError::new(format!(
            "Wrong registration hardfork {}; you likely need to regenerate the registration for compatibility with hardfork {}",
            reg.hf,
            hf.as_u8()
        )));
    }

    let max_contributors = max_contributors_for_hf(hf);
    let bridge_path =
        hf >= HardFork::ETH_BLS && (!net.is_fakechain() || !reg.eth_contributions.is_empty());

    let amounts: Vec<u64> = if bridge_path {
        if reg.eth_contributions.is_empty() {
            return Err(RegistrationError::new("No operator contribution given"));
        }
        if !reg.reserved.is_empty() {
            return Err(RegistrationError::new(
                "Operator contributions through oxen no longer an option",
            ));
        }
        if reg.eth_contributions.len() > max_contributors {
            return Err(RegistrationError::new("Too many contributors"));
        }
        reg.eth_contributions.iter().map(|(_, amount)| *amount).collect()
    } else {
        if reg.reserved.is_empty() {
            return Err(RegistrationError::new("No operator contribution given"));
        }
        if reg.reserved.len() > max_contributors {
            return Err(RegistrationError::new("Too many contributors"));
        }
        reg.reserved.iter().map(|(_, amount)| *amount).collect()
    };

    let (valid_stakes, max_fee) = if reg.uses_portions {
        (check_service_node_portions(hf, &amounts), STAKING_PORTIONS)
    } else {
        (
            check_service_node_stakes(hf, staking_requirement, &amounts),
            STAKING_FEE_BASIS,
        )
    };

    if reg.fee > max_fee {
        return Err(RegistrationError::new(format!(
            "Operator fee is too high ({} > {})",
            reg.fee, max_fee
        )));
    }

    if !valid_stakes {
        let dump = amounts
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let kind = if reg.uses_portions { "portions" } else { "amounts" };
        return Err(RegistrationError::new(format!("Invalid {kind}: {{{dump}}}")));
    }

    if reg.uses_portions && reg.hf < block_timestamp {
        return Err(RegistrationError::new(format!(
            "Registration expired ({} < {})",
            reg.hf, block_timestamp
        )));
    }
    Ok(())
}

/// Bytes covered by the registration signature.
pub fn get_registration_message_for_signing(reg: &RegistrationDetails) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(8 + reg.reserved.len() * (64 + 8) + 8);
    buffer.extend_from_slice(&reg.fee.to_le_bytes());
    for (address, amount) in &reg.reserved {
        buffer.extend_from_slice(&address.to_bytes());
        buffer.extend_from_slice(&amount.to_le_bytes());
    }
    buffer.extend_from_slice(&reg.hf.to_le_bytes());
    buffer
}

pub fn get_registration_hash(crypto: &dyn CryptoProvider, reg: &RegistrationDetails) -> Hash {
    crypto.fast_hash(&get_registration_message_for_signing(reg))
}

pub fn validate_registration_signature(
    crypto: &dyn CryptoProvider,
    reg: &RegistrationDetails,
) -> Result<(), RegistrationError> {
    let hash = get_registration_hash(crypto, reg);
    if !crypto.check_key(&reg.service_node_pubkey) {
        return Err(RegistrationError::new(format!(
            "Service Node Key is not a valid public key ({})",
            hex::encode(reg.service_node_pubkey)
        )));
    }
    if !crypto.verify_signature(&hash, &reg.service_node_pubkey, &reg.signature) {
        return Err(RegistrationError::new(format!(
            "Registration signature verification failed for pubkey/hash: {}/{}",
            hex::encode(reg.service_node_pubkey),
            hex::encode(hash)
        )));
    }
    Ok(())
}

/// Node key, contributor address and disclosed tx key; `None` if any is absent.
pub fn tx_get_staking_components(tx: &Transaction) -> Option<StakingComponents> {
    let service_node_pubkey = tx.service_node_pubkey()?;
    let address = tx.contributor()?;
    let Some(tx_key) = tx.tx_secret_key() else {
        info!(
            "[qc-18] TX: There was a service node contributor but no secret key in the tx extra for tx: {}",
            hex::encode(tx.hash)
        );
        return None;
    };
    Some(StakingComponents {
        service_node_pubkey,
        address,
        tx_key,
        ..StakingComponents::default()
    })
}

/// Staking components plus the amounts the contributor proved are theirs.
///
/// From HF11 each staked output must be addressed to the contributor and
/// carry a key-image proof; those become locked contributions. Earlier forks
/// count every output locked for at least the staking period.
pub fn tx_get_staking_components_and_amounts(
    crypto: &dyn CryptoProvider,
    net: &NetworkConfig,
    hf: HardFork,
    tx: &Transaction,
    block_height: u64,
) -> Option<StakingComponents> {
    let mut stake = tx_get_staking_components(tx)?;
    let tx_hash = hex::encode(tx.hash);

    let Some(derivation) =
        crypto.generate_key_derivation(&stake.address.view_public_key, &stake.tx_key)
    else {
        info!(
            "[qc-18] TX: Failed to generate key derivation on height: {} for tx: {}",
            block_height, tx_hash
        );
        return None;
    };

    if hf >= HardFork::INFINITE_STAKING {
        let Some(proofs) = tx.key_image_proofs() else {
            info!(
                "[qc-18] TX: Didn't have key image proofs in the tx_extra, rejected on height: {} for tx: {}",
                block_height, tx_hash
            );
            return None;
        };
        let mut proofs = proofs.to_vec();

        for (index, output) in tx.outputs.iter().enumerate() {
            let transferred = crypto.decode_amount(&derivation, index, output).unwrap_or(0);
            if transferred == 0 {
                continue;
            }

            let Some(ephemeral) =
                crypto.derive_public_key(&derivation, index, &stake.address.spend_public_key)
            else {
                info!(
                    "[qc-18] TX: Could not derive TX ephemeral key on height: {} for tx: {} for output: {}",
                    block_height, tx_hash, index
                );
                continue;
            };
            if output.key != ephemeral {
                info!(
                    "[qc-18] TX: Derived TX ephemeral key did not match tx stored key on height: {} for tx: {} for output: {}",
                    block_height, tx_hash, index
                );
                continue;
            }

            if let Some(position) = proofs.iter().position(|proof| {
                crypto.verify_key_image_signature(&proof.key_image, &ephemeral, &proof.signature)
            }) {
                let proof = proofs.remove(position);
                stake.locked_contributions.push(LockedContribution {
                    key_image_pub_key: ephemeral,
                    key_image: proof.key_image,
                    amount: transferred,
                });
                stake.transferred = stake.transferred.saturating_add(transferred);
            }
        }
    } else {
        let min_height = block_height + net.staking_lock_blocks;
        for (index, output) in tx.outputs.iter().enumerate() {
            let unlock_time = tx.output_unlock_time(index);
            if unlock_time < MAX_BLOCK_NUMBER && unlock_time >= min_height {
                let transferred = crypto.decode_amount(&derivation, index, output).unwrap_or(0);
                stake.transferred = stake.transferred.saturating_add(transferred);
            }
        }
    }

    Some(stake)
}

/// Validate a registration transaction and build the new node's entry.
///
/// `Ok(None)` means the transaction carries no registration at all.
pub fn is_registration_tx(
    crypto: &dyn CryptoProvider,
    net: &NetworkConfig,
    hf: HardFork,
    tx: &Transaction,
    block_timestamp: u64,
    block_height: u64,
    index: u32,
) -> Result<Option<(PublicKey, ServiceNodeInfo)>, RegistrationError> {
    let Some(reg) = reg_tx_extract_fields(tx) else {
        return Ok(None);
    };

    let staking_requirement = net.staking_requirement;
    validate_registration(hf, net, staking_requirement, block_timestamp, &reg)?;
    validate_registration_signature(crypto, &reg)?;

    let stake = tx_get_staking_components_and_amounts(crypto, net, hf, tx, block_height)
        .ok_or_else(|| {
            RegistrationError::new(format!(
                "Register TX: Had service node registration fields, but could not decode contribution on height: {} for tx: {}",
                block_height,
                hex::encode(tx.hash)
            ))
        })?;

    let operator = reg.reserved[0].0;
    if hf >= HardFork::PULSE {
        if stake.locked_contributions.len() != 1 {
            return Err(RegistrationError::new(
                "Register TX invalid: multi-output registration transactions are not permitted as of HF16",
            ));
        }
        if stake.address != operator {
            return Err(RegistrationError::new(
                "Register TX invalid: registration stake is not from the operator",
            ));
        }
    } else {
        let min_transfer = get_min_node_contribution(hf, staking_requirement, 0, 0);
        if stake.transferred < min_transfer {
            return Err(RegistrationError::new(format!(
                "Register TX: Contribution transferred: {} didn't meet the minimum transfer requirement: {} on height: {}",
                stake.transferred, min_transfer, block_height
            )));
        }

        let staker_reserved = reg.reserved.iter().any(|(address, _)| *address == stake.address);
        let participants = reg.reserved.len() + usize::from(!staker_reserved);
        if participants > MAX_CONTRIBUTORS_V1 {
            return Err(RegistrationError::new(format!(
                "Register TX: Number of participants: {} exceeded the max number of contributions: {} on height: {}",
                participants, MAX_CONTRIBUTORS_V1, block_height
            )));
        }
    }

    let mut info = ServiceNodeInfo {
        staking_requirement,
        operator_address: operator,
        portions_for_operator: if reg.uses_portions {
            reg.fee
        } else {
            mul128_div64(reg.fee, STAKING_PORTIONS, STAKING_FEE_BASIS)
        },
        registration_height: block_height,
        registration_hf_version: hf,
        last_reward_block_height: block_height,
        last_reward_transaction_index: index,
        swarm_id: UNASSIGNED_SWARM_ID,
        last_ip_change_height: block_height,
        ..ServiceNodeInfo::default()
    };

    for (i, (address, amount)) in reg.reserved.iter().enumerate() {
        if reg.reserved[i + 1..].iter().any(|(other, _)| other == address) {
            return Err(RegistrationError::new(format!(
                "duplicate reserved address in registration (tx {})",
                hex::encode(tx.hash)
            )));
        }
        let reserved = if reg.uses_portions {
            mul128_div64(*amount, staking_requirement, STAKING_PORTIONS)
        } else {
            *amount
        };
        info.contributors.push(Contributor::new(reserved, *address));
        info.total_reserved += reserved;
    }

    if hf >= HardFork::PULSE && stake.transferred < info.contributors[0].reserved {
        return Err(RegistrationError::new(
            "Register TX rejected: TX does not have sufficient operator stake",
        ));
    }

    Ok(Some((reg.service_node_pubkey, info)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NetworkType, COIN};
    use crate::test_utils::{operator_address, signed_registration, stake_tx, test_crypto};

    fn fakechain() -> NetworkConfig {
        NetworkConfig::for_network(NetworkType::Fakechain)
    }

    fn details(hf: u64, reserved: Vec<(AccountAddress, u64)>) -> RegistrationDetails {
        RegistrationDetails {
            service_node_pubkey: [1; 32],
            reserved,
            eth_contributions: Vec::new(),
            bls_pubkey: [0; 64],
            fee: 0,
            hf,
            uses_portions: hf > MAX_HF_FIELD,
            signature: [0; 64],
        }
    }

    #[test]
    fn test_validate_rejects_portions_after_hf19() {
        let reg = details(1_000_000, vec![(operator_address(1), STAKING_PORTIONS)]);
        let err = validate_registration(HardFork::Hf19, &fakechain(), 100 * COIN, 0, &reg)
            .unwrap_err();
        assert_eq!(err.reason, "Portion-based registrations are not permitted in HF19+");
    }

    #[test]
    fn test_validate_wrong_hardfork_number() {
        let reg = details(18, vec![(operator_address(1), 100 * COIN)]);
        let err = validate_registration(HardFork::Hf19, &fakechain(), 100 * COIN, 0, &reg)
            .unwrap_err();
        assert!(err.reason.starts_with("Wrong registration hardfork 18"));
    }

    #[test]
    fn test_validate_amounts_and_fee() {
        let net = fakechain();
        let mut reg = details(19, vec![(operator_address(1), 100 * COIN)]);
        assert!(validate_registration(HardFork::Hf19, &net, 100 * COIN, 0, &reg).is_ok());

        reg.fee = STAKING_FEE_BASIS + 1;
        let err = validate_registration(HardFork::Hf19, &net, 100 * COIN, 0, &reg).unwrap_err();
        assert_eq!(err.reason, "Operator fee is too high (10001 > 10000)");

        reg.fee = 0;
        reg.reserved = vec![(operator_address(1), 10 * COIN)];
        let err = validate_registration(HardFork::Hf19, &net, 100 * COIN, 0, &reg).unwrap_err();
        assert_eq!(err.reason, "Invalid amounts: {10000000000}");
    }

    #[test]
    fn test_validate_expired_portion_registration() {
        let reg = details(1_000, vec![(operator_address(1), STAKING_PORTIONS)]);
        let err =
            validate_registration(HardFork::Hf18, &fakechain(), 100 * COIN, 2_000, &reg).unwrap_err();
        assert_eq!(err.reason, "Registration expired (1000 < 2000)");
    }

    #[test]
    fn test_validate_contributor_counts() {
        let net = fakechain();
        let reg = details(19, Vec::new());
        let err = validate_registration(HardFork::Hf19, &net, 100 * COIN, 0, &reg).unwrap_err();
        assert_eq!(err.reason, "No operator contribution given");

        let many = (0..11).map(|i| (operator_address(i), COIN)).collect();
        let reg = details(19, many);
        let err = validate_registration(HardFork::Hf19, &net, 100 * COIN, 0, &reg).unwrap_err();
        assert_eq!(err.reason, "Too many contributors");
    }

    #[test]
    fn test_signature_checks_message_layout() {
        let crypto = test_crypto();
        let (reg, _) = signed_registration(&crypto, 7, HardFork::Hf19, vec![(operator_address(7), 100 * COIN)]);
        assert!(validate_registration_signature(&crypto, &reg).is_ok());

        let mut tampered = reg.clone();
        tampered.fee += 1;
        let err = validate_registration_signature(&crypto, &tampered).unwrap_err();
        assert!(err.reason.starts_with("Registration signature verification failed"));
    }

    #[test]
    fn test_message_layout() {
        let reg = details(19, vec![(AccountAddress::new([2; 32], [3; 32]), 5)]);
        let message = get_registration_message_for_signing(&reg);
        assert_eq!(message.len(), 8 + 64 + 8 + 8);
        assert_eq!(&message[8..40], &[2; 32]);
        assert_eq!(&message[72..80], &5u64.to_le_bytes());
        assert_eq!(&message[80..], &19u64.to_le_bytes());
    }

    #[test]
    fn test_registration_tx_builds_info() {
        let crypto = test_crypto();
        let net = fakechain();
        let tx = stake_tx(
            &crypto,
            7,
            HardFork::Hf19,
            vec![(operator_address(7), 60 * COIN), (operator_address(8), 40 * COIN)],
            60 * COIN,
        );
        let (key, info) = is_registration_tx(&crypto, &net, HardFork::Hf19, &tx, 0, 50, 2)
            .unwrap()
            .unwrap();
        assert_eq!(key, crate::test_utils::node_pubkey(7));
        assert_eq!(info.contributors.len(), 2);
        assert_eq!(info.total_reserved, 100 * COIN);
        assert_eq!(info.total_contributed, 0);
        assert_eq!(info.registration_height, 50);
        assert_eq!(info.last_reward_transaction_index, 2);
    }

    #[test]
    fn test_registration_tx_needs_operator_stake() {
        let crypto = test_crypto();
        let net = fakechain();
        let tx = stake_tx(
            &crypto,
            7,
            HardFork::Hf19,
            vec![(operator_address(7), 60 * COIN), (operator_address(8), 40 * COIN)],
            30 * COIN,
        );
        let err = is_registration_tx(&crypto, &net, HardFork::Hf19, &tx, 0, 50, 0).unwrap_err();
        assert_eq!(
            err.reason,
            "Register TX rejected: TX does not have sufficient operator stake"
        );
    }

    #[test]
    fn test_duplicate_reserved_address_rejected() {
        let crypto = test_crypto();
        let tx = stake_tx(
            &crypto,
            7,
            HardFork::Hf19,
            vec![(operator_address(7), 50 * COIN), (operator_address(7), 50 * COIN)],
            50 * COIN,
        );
        let err = is_registration_tx(&crypto, &fakechain(), HardFork::Hf19, &tx, 0, 50, 0)
            .unwrap_err();
        assert!(err.reason.starts_with("duplicate reserved address"));
    }

    #[test]
    fn test_not_a_registration() {
        let crypto = test_crypto();
        let tx = Transaction::default();
        assert!(is_registration_tx(&crypto, &fakechain(), HardFork::Hf19, &tx, 0, 1, 0)
            .unwrap()
            .is_none());
    }
}
