//! 地址派生算法
//!
//! 把 MPC 合约返回的派生公钥转换为各链原生地址。只接触公钥，
//! 不接触任何私钥材料。链族分派使用封闭枚举 [`ChainFamily`]。

use bitcoin::hashes::{hash160, Hash};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::domain::chain_config::{ChainConfig, ChainFamily, SupportedChain};
use crate::error::SignerError;

type Result<T> = std::result::Result<T, SignerError>;

/// Aptos / Sui 的 Ed25519 签名方案标识字节
const ED25519_SCHEME_FLAG: u8 = 0x00;

/// 派生结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedAddress {
    pub chain: SupportedChain,
    /// 链原生地址
    pub address: String,
    /// MPC 合约返回的公钥字符串（原样保留）
    pub public_key: String,
    pub derivation_path: String,
}

/// 解码合约返回的公钥字符串
///
/// 接受 `ed25519:` / `secp256k1:` 曲线标签，编码可以是 hex（可带 `0x`）或 base58。
pub fn decode_public_key(raw: &str) -> Result<Vec<u8>> {
    let body = raw
        .trim()
        .trim_start_matches("ed25519:")
        .trim_start_matches("secp256k1:");
    if body.is_empty() {
        return Err(SignerError::invalid_public_key("empty public key"));
    }

    let hex_body = body.strip_prefix("0x").unwrap_or(body);
    let looks_hex = hex_body.len() % 2 == 0 && hex_body.chars().all(|c| c.is_ascii_hexdigit());
    // 32/33/64/65 字节的 hex 长度分别是 64/66/128/130，与 base58 长度不重叠
    if looks_hex && matches!(hex_body.len(), 64 | 66 | 128 | 130) {
        return hex::decode(hex_body)
            .map_err(|e| SignerError::invalid_public_key(format!("invalid hex: {}", e)));
    }

    bs58::decode(body)
        .into_vec()
        .map_err(|e| SignerError::invalid_public_key(format!("invalid base58: {}", e)))
}

/// 根据链族把公钥编码为地址
pub fn address_from_public_key(config: &ChainConfig, key: &[u8]) -> Result<String> {
    match config.family {
        ChainFamily::Evm => evm_address(key),
        ChainFamily::Bitcoin => bitcoin_address(key),
        ChainFamily::Solana => solana_address(key),
        ChainFamily::Xrp => xrp_address(key),
        ChainFamily::Aptos => aptos_address(key),
        ChainFamily::Sui => sui_address(key),
        ChainFamily::Near => near_address(key),
        ChainFamily::Cosmos => {
            let prefix = config.bech32_prefix.as_deref().unwrap_or("cosmos");
            cosmos_address(key, prefix)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// secp256k1 工具
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 解析 secp256k1 公钥（压缩 33 字节 / 未压缩 65 字节 / 裸 64 字节）
fn parse_secp256k1(key: &[u8]) -> Result<k256::PublicKey> {
    let sec1: Vec<u8> = match key.len() {
        33 | 65 => key.to_vec(),
        64 => {
            // 缺少 0x04 前缀的未压缩公钥
            let mut full = Vec::with_capacity(65);
            full.push(0x04);
            full.extend_from_slice(key);
            full
        }
        n => {
            return Err(SignerError::invalid_public_key(format!(
                "invalid secp256k1 public key length: {}",
                n
            )))
        }
    };

    k256::PublicKey::from_sec1_bytes(&sec1)
        .map_err(|_| SignerError::invalid_public_key("point is not on secp256k1"))
}

/// 规范化为 65 字节未压缩公钥
pub fn uncompressed_secp256k1(key: &[u8]) -> Result<[u8; 65]> {
    use k256::elliptic_curve::sec1::ToEncodedPoint;

    let point = parse_secp256k1(key)?.to_encoded_point(false);
    let mut out = [0u8; 65];
    out.copy_from_slice(point.as_bytes());
    Ok(out)
}

/// 规范化为 33 字节压缩公钥
pub fn compressed_secp256k1(key: &[u8]) -> Result<[u8; 33]> {
    use k256::elliptic_curve::sec1::ToEncodedPoint;

    let point = parse_secp256k1(key)?.to_encoded_point(true);
    let mut out = [0u8; 33];
    out.copy_from_slice(point.as_bytes());
    Ok(out)
}

fn ed25519_key(key: &[u8]) -> Result<[u8; 32]> {
    let bytes: [u8; 32] = key.try_into().map_err(|_| {
        SignerError::invalid_public_key(format!("invalid ed25519 public key length: {}", key.len()))
    })?;
    // 确认是合法的曲线点
    ed25519_dalek::VerifyingKey::from_bytes(&bytes)
        .map_err(|e| SignerError::invalid_public_key(format!("invalid ed25519 point: {}", e)))?;
    Ok(bytes)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 各链族地址编码
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// EVM：keccak256(未压缩公钥去掉 0x04) 取后 20 字节，EIP-55 校验和
pub fn evm_address(key: &[u8]) -> Result<String> {
    let uncompressed = uncompressed_secp256k1(key)?;
    let hash = Keccak256::digest(&uncompressed[1..]);
    Ok(to_checksum_address(&hash[12..]))
}

/// EIP-55 混合大小写校验和
/// https://eips.ethereum.org/EIPS/eip-55
pub fn to_checksum_address(address_bytes: &[u8]) -> String {
    let lower = hex::encode(address_bytes);
    let hash = Keccak256::digest(lower.as_bytes());

    let mut out = String::with_capacity(2 + lower.len());
    out.push_str("0x");
    for (i, ch) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if ch.is_ascii_alphabetic() && nibble >= 8 {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Bitcoin：P2WPKH (Native SegWit, bc1q...)
pub fn bitcoin_address(key: &[u8]) -> Result<String> {
    use bitcoin::{
        secp256k1::PublicKey as Secp256k1PublicKey, Address, Network,
        PublicKey as BitcoinPublicKey,
    };

    let compressed = compressed_secp256k1(key)?;
    let secp_pubkey = Secp256k1PublicKey::from_slice(&compressed)
        .map_err(|e| SignerError::invalid_public_key(format!("invalid secp256k1 key: {}", e)))?;
    let bitcoin_pubkey = BitcoinPublicKey::new(secp_pubkey);

    let address = Address::p2wpkh(&bitcoin_pubkey, Network::Bitcoin)
        .map_err(|e| SignerError::invalid_public_key(format!("P2WPKH encoding failed: {}", e)))?;
    Ok(address.to_string())
}

/// Solana：公钥本身就是地址（Base58）
pub fn solana_address(key: &[u8]) -> Result<String> {
    let bytes = ed25519_key(key)?;
    Ok(bs58::encode(bytes).into_string())
}

/// XRP：AccountID = RIPEMD160(SHA256(压缩公钥))，Ripple 字母表 base58check，版本 0x00
pub fn xrp_address(key: &[u8]) -> Result<String> {
    let compressed = compressed_secp256k1(key)?;
    let account_id = hash160::Hash::hash(&compressed);
    Ok(bs58::encode(account_id.as_byte_array())
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .with_check_version(0x00)
        .into_string())
}

/// Aptos：keccak256(公钥 ‖ 0x00)
pub fn aptos_address(key: &[u8]) -> Result<String> {
    let bytes = ed25519_key(key)?;
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    hasher.update([ED25519_SCHEME_FLAG]);
    Ok(format!("0x{}", hex::encode(hasher.finalize())))
}

/// Sui：keccak256(0x00 ‖ 公钥)
pub fn sui_address(key: &[u8]) -> Result<String> {
    let bytes = ed25519_key(key)?;
    let mut hasher = Keccak256::new();
    hasher.update([ED25519_SCHEME_FLAG]);
    hasher.update(bytes);
    Ok(format!("0x{}", hex::encode(hasher.finalize())))
}

/// NEAR：隐式账户 ID，即 ed25519 公钥的小写 hex
pub fn near_address(key: &[u8]) -> Result<String> {
    let bytes = ed25519_key(key)?;
    Ok(hex::encode(bytes))
}

/// Cosmos 系列：keccak256(公钥) 取后 20 字节，bech32 编码
pub fn cosmos_address(key: &[u8], prefix: &str) -> Result<String> {
    // 仍然要求是合法的 secp256k1 公钥
    parse_secp256k1(key)?;

    let hash = Keccak256::digest(key);
    let hrp = bech32::Hrp::parse(prefix)
        .map_err(|e| SignerError::invalid_public_key(format!("invalid HRP {}: {:?}", prefix, e)))?;
    bech32::encode::<bech32::Bech32>(hrp, &hash[12..])
        .map_err(|e| SignerError::invalid_public_key(format!("bech32 encoding failed: {}", e)))
}
