//! 会话记录与安全违规类型

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::auth_state::{AuthState, SignatureResult};
use crate::domain::chain_config::SupportedChain;
use crate::domain::derivation::DerivedAddress;

/// 会话格式版本
pub const SESSION_VERSION: &str = "2.0.0";

/// 持久化的认证快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub connected_chains: BTreeMap<SupportedChain, Option<DerivedAddress>>,
    pub active_chain: Option<SupportedChain>,
    pub signatures: BTreeMap<SupportedChain, Option<SignatureResult>>,
}

impl From<&AuthState> for SessionPayload {
    fn from(state: &AuthState) -> Self {
        Self {
            connected_chains: state.connected_chains.clone(),
            active_chain: state.active_chain,
            signatures: state.signatures.clone(),
        }
    }
}

impl SessionPayload {
    /// 把快照合并回认证状态，并按不变量修正
    ///
    /// 快照里不在 `state` 槽位中的链会被忽略。
    pub fn restore_into(self, state: &mut AuthState) {
        for (chain, addr) in self.connected_chains {
            if let Some(slot) = state.connected_chains.get_mut(&chain) {
                *slot = addr;
            }
        }
        for (chain, sig) in self.signatures {
            if let Some(slot) = state.signatures.get_mut(&chain) {
                *slot = sig;
            }
        }
        state.active_chain = self.active_chain;
        state.sanitize();
    }
}

/// 会话记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub session_id: String,
    pub device_fingerprint: Option<String>,
    pub ip_address: Option<String>,
    pub refresh_count: u32,
    pub version: String,
    #[serde(default)]
    pub payload: SessionPayload,
}

impl SessionRecord {
    /// 新建记录；时间戳与 session_id 由 SessionStore 在保存时写入
    pub fn new(account_id: impl Into<String>, payload: SessionPayload, now: DateTime<Utc>) -> Self {
        Self {
            account_id: account_id.into(),
            created_at: now,
            last_activity: now,
            expires_at: now,
            session_id: String::new(),
            device_fingerprint: None,
            ip_address: None,
            refresh_count: 0,
            version: SESSION_VERSION.to_string(),
            payload,
        }
    }
}

/// 安全违规类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    DeviceMismatch,
    IpMismatch,
    SessionExpired,
    IdleTimeout,
    ReauthRequired,
    ConcurrentSession,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::DeviceMismatch => "device_mismatch",
            ViolationType::IpMismatch => "ip_mismatch",
            ViolationType::SessionExpired => "session_expired",
            ViolationType::IdleTimeout => "idle_timeout",
            ViolationType::ReauthRequired => "reauth_required",
            ViolationType::ConcurrentSession => "concurrent_session",
        }
    }

    /// 该违规是否触发自动清除会话
    pub fn auto_clears(&self) -> bool {
        matches!(
            self,
            ViolationType::DeviceMismatch
                | ViolationType::SessionExpired
                | ViolationType::ConcurrentSession
        )
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 安全违规事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityViolation {
    #[serde(rename = "type")]
    pub kind: ViolationType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl SecurityViolation {
    pub fn new(kind: ViolationType, message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp,
        }
    }
}
