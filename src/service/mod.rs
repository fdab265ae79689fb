//! 服务层
//!
//! - [`signer_contract`]：MPC 签名合约客户端
//! - [`address_deriver`]：多链地址派生
//! - [`multi_chain_auth`]：多链认证编排

pub mod address_deriver;
pub mod multi_chain_auth;
pub mod signer_contract;

pub use address_deriver::AddressDeriver;
pub use multi_chain_auth::{AuthEvent, MultiChainAuthManager, SignOptions};
pub use signer_contract::{
    ContractViewer, FunctionCallTransaction, NearRpcViewer, SignArgs, SignerContractClient,
    WalletConnection,
};
