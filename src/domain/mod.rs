//! Domain 模块
//!
//! 链配置、地址派生算法、认证状态与会话记录

pub mod auth_state;
pub mod chain_config;
pub mod derivation;
pub mod session;

// 重新导出常用类型
pub use auth_state::{AuthState, RsvSignature, SignatureResult};
pub use chain_config::{ChainConfig, ChainFamily, ChainRegistry, CurveType, KeyType, SupportedChain};
pub use derivation::DerivedAddress;
pub use session::{SecurityViolation, SessionPayload, SessionRecord, ViolationType};
