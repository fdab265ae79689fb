//! chainsig-auth - 基于 MPC 链签名的多链认证
//!
//! 只接触公钥与最终签名：从同一个 NEAR 账户派生各链地址，
//! 通过签名合约完成认证挑战，并维护客户端侧的多链会话。

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod service;
pub mod utils;

// 重新导出常用类型
pub use error::{ChainAuthError, ChainAuthErrorCode, SignerError};

pub mod prelude {
    pub use crate::{
        config::Config,
        domain::{AuthState, ChainRegistry, DerivedAddress, SignatureResult, SupportedChain},
        error::{ChainAuthError, ChainAuthErrorCode, SignerError},
        infrastructure::SessionStore,
        service::{AddressDeriver, MultiChainAuthManager, SignOptions, SignerContractClient},
    };
}
