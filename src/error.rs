//! 错误定义
//!
//! 两层错误模型：
//! - [`SignerError`]：RPC / 合约层错误，带稳定的错误消息
//! - [`ChainAuthError`]：编排层领域错误，`{code, chain, message, cause}`

use std::sync::Arc;

use serde::Serialize;

use crate::domain::chain_config::SupportedChain;

/// RPC / 合约层错误
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("{message}")]
    ContractCall { method: String, message: String },

    #[error("Failed to parse signature from MPC response: {0}")]
    SignatureParse(String),

    #[error("Invalid signature length: {0}")]
    InvalidSignatureLength(usize),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Failed to derive address for {chain} (path {path}): {cause}")]
    AddressDerivation {
        chain: SupportedChain,
        path: String,
        #[source]
        cause: Box<SignerError>,
    },

    #[error("Chain {0} is not configured")]
    ChainNotConfigured(SupportedChain),

    #[error("Base wallet not connected")]
    WalletNotConnected,

    #[error("Wallet error: {0}")]
    Wallet(String),
}

impl SignerError {
    pub fn contract_call(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ContractCall {
            method: method.into(),
            message: message.into(),
        }
    }

    pub fn invalid_public_key(msg: impl Into<String>) -> Self {
        Self::InvalidPublicKey(msg.into())
    }
}

/// 编排层错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainAuthErrorCode {
    ChainNotSupported,
    ChainConnectionFailed,
    SignatureFailed,
    ChainSwitchFailed,
}

impl ChainAuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainAuthErrorCode::ChainNotSupported => "CHAIN_NOT_SUPPORTED",
            ChainAuthErrorCode::ChainConnectionFailed => "CHAIN_CONNECTION_FAILED",
            ChainAuthErrorCode::SignatureFailed => "SIGNATURE_FAILED",
            ChainAuthErrorCode::ChainSwitchFailed => "CHAIN_SWITCH_FAILED",
        }
    }
}

/// 编排层领域错误
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{}] {message}", .code.as_str())]
pub struct ChainAuthError {
    pub code: ChainAuthErrorCode,
    pub chain: Option<SupportedChain>,
    pub message: String,
    #[source]
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl ChainAuthError {
    fn new(code: ChainAuthErrorCode, chain: Option<SupportedChain>, msg: impl Into<String>) -> Self {
        Self {
            code,
            chain,
            message: msg.into(),
            cause: None,
        }
    }

    pub fn chain_not_supported(chain: SupportedChain, msg: impl Into<String>) -> Self {
        Self::new(ChainAuthErrorCode::ChainNotSupported, Some(chain), msg)
    }

    pub fn connection_failed(chain: Option<SupportedChain>, msg: impl Into<String>) -> Self {
        Self::new(ChainAuthErrorCode::ChainConnectionFailed, chain, msg)
    }

    pub fn signature_failed(chain: SupportedChain, msg: impl Into<String>) -> Self {
        Self::new(ChainAuthErrorCode::SignatureFailed, Some(chain), msg)
    }

    pub fn switch_failed(chain: SupportedChain, msg: impl Into<String>) -> Self {
        Self::new(ChainAuthErrorCode::ChainSwitchFailed, Some(chain), msg)
    }

    /// 附加底层错误
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// 以新的错误码包装（保留 chain 与 cause）
    pub fn recode(mut self, code: ChainAuthErrorCode, msg: impl Into<String>) -> Self {
        self.code = code;
        self.message = msg.into();
        self
    }
}
