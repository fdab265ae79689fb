//! 地址验证模块
//!
//! 统一的地址格式校验。只做结构检查（正则），不证明地址归属。

use once_cell::sync::Lazy;
use regex::Regex;
use sha3::{Digest, Keccak256};

use crate::domain::chain_config::{ChainFamily, SupportedChain};

static EVM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^0x[a-fA-F0-9]{40}$").unwrap());
static BITCOIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[13][a-km-zA-HJ-NP-Z1-9]{25,34}$|^bc1[a-z0-9]{39,59}$").unwrap()
});
static SOLANA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").unwrap());
static XRP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^r[a-zA-Z0-9]{24,34}$").unwrap());
static HEX32_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^0x[a-fA-F0-9]{64}$").unwrap());
static NEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9._-]+\.near$|^[a-fA-F0-9]{64}$").unwrap());
static COSMOS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]+1[a-z0-9]{38,58}$").unwrap());

/// 地址验证器
pub struct AddressValidator;

impl AddressValidator {
    /// 验证地址格式
    ///
    /// EVM 地址若含大写字母，额外校验 EIP-55 checksum。
    pub fn validate(chain: SupportedChain, address: &str) -> bool {
        match chain.family() {
            ChainFamily::Evm => Self::validate_evm_address(address),
            ChainFamily::Bitcoin => BITCOIN_RE.is_match(address),
            ChainFamily::Solana => SOLANA_RE.is_match(address),
            ChainFamily::Xrp => XRP_RE.is_match(address),
            ChainFamily::Aptos | ChainFamily::Sui => HEX32_RE.is_match(address),
            ChainFamily::Near => NEAR_RE.is_match(address),
            ChainFamily::Cosmos => COSMOS_RE.is_match(address),
        }
    }

    /// 验证EVM地址（支持EIP-55 Checksum）
    fn validate_evm_address(address: &str) -> bool {
        if !EVM_RE.is_match(address) {
            return false;
        }

        let hex_part = &address[2..];
        if hex_part.chars().any(|c| c.is_ascii_uppercase()) {
            return Self::verify_eip55_checksum(address);
        }

        true
    }

    /// 验证EIP-55 Checksum
    /// https://eips.ethereum.org/EIPS/eip-55
    pub fn verify_eip55_checksum(address: &str) -> bool {
        let Some(hex_chars) = address.strip_prefix("0x") else {
            return false;
        };
        if hex_chars.len() != 40 || !hex_chars.chars().all(|c| c.is_ascii_hexdigit()) {
            return false;
        }
        let hash = Keccak256::digest(hex_chars.to_lowercase().as_bytes());

        for (i, ch) in hex_chars.chars().enumerate() {
            if ch.is_ascii_alphabetic() {
                let hash_byte = hash[i / 2];
                let hash_nibble = if i % 2 == 0 {
                    hash_byte >> 4
                } else {
                    hash_byte & 0x0f
                };

                let should_be_uppercase = hash_nibble >= 8;
                if ch.is_ascii_uppercase() != should_be_uppercase {
                    return false;
                }
            }
        }

        true
    }
}
