//! AES-256-GCM 加密/解密模块
//! 用于会话数据的本地加密存储

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::Engine;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

const NONCE_LEN: usize = 12;

/// 加密数据
///
/// # Arguments
/// * `data` - 要加密的原始数据
/// * `key` - 32字节加密密钥
///
/// # Returns
/// 返回加密后的数据（nonce + ciphertext）
pub fn encrypt_data(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != 32 {
        return Err(anyhow!("Key must be 32 bytes for AES-256"));
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Invalid key: {}", e))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, data)
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    // 将 nonce (12字节) 和 ciphertext 组合
    let mut result = nonce.to_vec();
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// 解密数据
///
/// # Arguments
/// * `encrypted` - 加密的数据（nonce + ciphertext）
/// * `key` - 32字节加密密钥
pub fn decrypt_data(encrypted: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != 32 {
        return Err(anyhow!("Key must be 32 bytes for AES-256"));
    }

    if encrypted.len() < NONCE_LEN {
        return Err(anyhow!("Encrypted data too short"));
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Invalid key: {}", e))?;

    // 提取 nonce（前12字节）
    let nonce = Nonce::from_slice(&encrypted[..NONCE_LEN]);
    let ciphertext = &encrypted[NONCE_LEN..];

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| anyhow!("Decryption failed: {}", e))?;

    Ok(plaintext)
}

/// 加密密钥（使用Zeroize保护）
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; 32],
}

impl EncryptionKey {
    /// 本地设备密钥：SHA-256(设备指纹 ‖ 0x00 ‖ 存储键)
    ///
    /// 只是让存储内容离开本机后不可直接读取，不是安全边界。
    pub fn derive_device_key(fingerprint: &str, storage_key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(fingerprint.as_bytes());
        hasher.update([0u8]);
        hasher.update(storage_key.as_bytes());
        Self {
            key: hasher.finalize().into(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.key
    }
}

/// 加密后 base64 编码，便于写入文本存储
pub fn seal_to_string(data: &[u8], key: &EncryptionKey) -> Result<String> {
    let encrypted = encrypt_data(data, key.as_slice())?;
    Ok(base64::engine::general_purpose::STANDARD.encode(encrypted))
}

/// [`seal_to_string`] 的逆操作
pub fn open_from_string(sealed: &str, key: &EncryptionKey) -> Result<Vec<u8>> {
    let encrypted = base64::engine::general_purpose::STANDARD
        .decode(sealed.trim())
        .context("Sealed data is not valid base64")?;
    decrypt_data(&encrypted, key.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = b"01234567890123456789012345678901"; // 32 bytes
        let data = b"Hello, World!";

        let encrypted = encrypt_data(data, key).unwrap();
        assert_ne!(encrypted, data);

        let decrypted = decrypt_data(&encrypted, key).unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn test_device_key_mismatch_fails_closed() {
        let key = EncryptionKey::derive_device_key("fp-a", "chainsig-auth-session");
        let other = EncryptionKey::derive_device_key("fp-b", "chainsig-auth-session");

        let sealed = seal_to_string(b"{\"accountId\":\"alice.near\"}", &key).unwrap();
        assert_eq!(open_from_string(&sealed, &key).unwrap(), b"{\"accountId\":\"alice.near\"}");
        assert!(open_from_string(&sealed, &other).is_err());
        assert!(open_from_string("not base64 !!", &key).is_err());
    }
}
