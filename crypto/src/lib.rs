//! Hashing primitives and address decoding for stratumd.
//!
//! This crate knows nothing about Stratum or block templates; it only turns
//! bytes into hashes and payout-address strings into `scriptPubKey` bytes.

use bech32::{FromBase32, Variant};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod merkle;
pub mod target;
pub mod varint;

pub use merkle::{merkle_branch_from_txids, merkle_root};
pub use target::{bits_from_target, diff1_target, hash_to_u256_le, target_from_bits, target_from_difficulty};
pub use varint::{compact_size_decode, compact_size_encode};

/// Which Bitcoin network an address string should be validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    fn base58_p2pkh_version(self) -> u8 {
        match self {
            Network::Mainnet => 0x00,
            Network::Testnet | Network::Regtest => 0x6f,
        }
    }

    fn base58_p2sh_version(self) -> u8 {
        match self {
            Network::Mainnet => 0x05,
            Network::Testnet | Network::Regtest => 0xc4,
        }
    }

    fn bech32_hrp(self) -> &'static str {
        match self {
            Network::Mainnet => "bc",
            Network::Testnet => "tb",
            Network::Regtest => "bcrt",
        }
    }
}

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("base58 decoding error: {0}")]
    Base58(#[from] bs58::decode::Error),

    #[error("bech32 decoding error: {0}")]
    Bech32(#[from] bech32::Error),

    #[error("bad base58check checksum")]
    BadChecksum,

    #[error("unrecognized address version/format")]
    UnknownFormat,

    #[error("address is for the wrong network")]
    NetworkMismatch,

    #[error("malformed address: {0}")]
    Malformed(String),

    #[error("unsupported witness version {0} (e.g. Bech32m/Taproot is not implemented)")]
    UnsupportedWitnessVersion(u8),
}

/// SHA-256 applied once.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 applied twice, Bitcoin's `Hash256`.
pub fn dsha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// `RIPEMD160(SHA256(data))`, Bitcoin's `Hash160`.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = sha256(data);
    let mut hasher = Ripemd160::new();
    hasher.update(sha);
    hasher.finalize().into()
}

/// Decodes a payout address string into the exact `scriptPubKey` bytes that
/// belong in a coinbase output. Supports P2PKH, P2SH and Bech32 (v0)
/// P2WPKH/P2WSH; rejects anything else (including Bech32m/Taproot)
/// explicitly rather than guessing.
pub fn decode_address(address: &str, network: Network) -> Result<Vec<u8>, AddressError> {
    if address.len() >= network.bech32_hrp().len() + 1
        && address[..network.bech32_hrp().len()].eq_ignore_ascii_case(network.bech32_hrp())
    {
        return decode_segwit(address, network);
    }
    decode_base58check(address, network)
}

fn decode_segwit(address: &str, network: Network) -> Result<Vec<u8>, AddressError> {
    let (hrp, data, variant) = bech32::decode(address)?;
    if hrp != network.bech32_hrp() {
        return Err(AddressError::NetworkMismatch);
    }
    let (version, program) = data
        .split_first()
        .ok_or_else(|| AddressError::Malformed("empty bech32 payload".to_string()))?;
    let witness_version = version.to_u8();
    let program = Vec::<u8>::from_base32(program)?;

    match (witness_version, variant) {
        (0, Variant::Bech32) => {
            if program.len() != 20 && program.len() != 32 {
                return Err(AddressError::Malformed(
                    "v0 witness program must be 20 or 32 bytes".to_string(),
                ));
            }
            let mut script = Vec::with_capacity(2 + program.len());
            script.push(0x00); // OP_0
            script.push(program.len() as u8);
            script.extend_from_slice(&program);
            Ok(script)
        }
        (0, Variant::Bech32m) => Err(AddressError::Malformed(
            "v0 witness program encoded with bech32m instead of bech32".to_string(),
        )),
        (v, _) => Err(AddressError::UnsupportedWitnessVersion(v)),
    }
}

fn decode_base58check(address: &str, network: Network) -> Result<Vec<u8>, AddressError> {
    let data = bs58::decode(address).into_vec()?;
    if data.len() != 25 {
        return Err(AddressError::Malformed(
            "base58check payload must be 25 bytes".to_string(),
        ));
    }
    let (payload, checksum) = data.split_at(21);
    if &dsha256(payload)[0..4] != checksum {
        return Err(AddressError::BadChecksum);
    }

    let version = payload[0];
    let hash = &payload[1..];

    if version == network.base58_p2pkh_version() {
        let mut script = Vec::with_capacity(25);
        script.push(0x76); // OP_DUP
        script.push(0xA9); // OP_HASH160
        script.push(0x14); // push 20 bytes
        script.extend_from_slice(hash);
        script.push(0x88); // OP_EQUALVERIFY
        script.push(0xAC); // OP_CHECKSIG
        Ok(script)
    } else if version == network.base58_p2sh_version() {
        let mut script = Vec::with_capacity(23);
        script.push(0xA9); // OP_HASH160
        script.push(0x14);
        script.extend_from_slice(hash);
        script.push(0x87); // OP_EQUAL
        Ok(script)
    } else {
        Err(AddressError::UnknownFormat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsha256_matches_double_sha256() {
        let data = b"stratumd";
        assert_eq!(dsha256(data), sha256(&sha256(data)));
    }

    #[test]
    fn hash160_is_20_bytes() {
        assert_eq!(hash160(b"anything").len(), 20);
    }

    #[test]
    fn mainnet_p2pkh_decodes_to_classic_script() {
        // Genesis block coinbase payout address.
        let script = decode_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", Network::Mainnet)
            .expect("valid p2pkh address");
        assert_eq!(script[0], 0x76);
        assert_eq!(script[1], 0xA9);
        assert_eq!(script[2], 0x14);
        assert_eq!(script.len(), 25);
        assert_eq!(script[23], 0x88);
        assert_eq!(script[24], 0xAC);
    }

    #[test]
    fn mainnet_p2sh_decodes_to_scripthash_script() {
        let script = decode_address("3P14159f73E4gFr7JterCCQh9QjiTjiZrG", Network::Mainnet)
            .expect("valid p2sh address");
        assert_eq!(script[0], 0xA9);
        assert_eq!(script[1], 0x14);
        assert_eq!(script.len(), 23);
        assert_eq!(script[22], 0x87);
    }

    #[test]
    fn mainnet_bech32_v0_decodes_to_witness_script() {
        let script = decode_address("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4", Network::Mainnet)
            .expect("valid bech32 p2wpkh address");
        assert_eq!(script[0], 0x00);
        assert_eq!(script[1], 20);
        assert_eq!(script.len(), 22);
    }

    #[test]
    fn taproot_bech32m_is_rejected_explicitly() {
        // A v1 witness program (P2TR) must be refused, not silently mangled.
        let err = decode_segwit(
            "bc1p5d7rjq7g6rdk2yhzks9smlaqtedr4dekq08ge8ztwac72sfr9rusxg3297",
            Network::Mainnet,
        )
        .unwrap_err();
        assert!(matches!(err, AddressError::UnsupportedWitnessVersion(1)));
    }

    #[test]
    fn bad_checksum_is_rejected() {
        let err = decode_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNb", Network::Mainnet)
            .unwrap_err();
        assert!(matches!(
            err,
            AddressError::BadChecksum | AddressError::UnknownFormat
        ));
    }
}
