//! 多链认证状态
//!
//! 每个 [`MultiChainAuthManager`](crate::service::multi_chain_auth::MultiChainAuthManager)
//! 持有一份 [`AuthState`]。不变量：
//! - `signatures[C]` 非空时 `connected_chains[C]` 必须非空
//! - `active_chain` 若有值，必须指向一个已连接的链

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::chain_config::SupportedChain;
use crate::domain::derivation::DerivedAddress;

/// MPC 返回的签名（r, s 为 64 位 hex，v 为恢复位）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsvSignature {
    pub r: String,
    pub s: String,
    pub v: u8,
}

impl RsvSignature {
    /// 重新拼回 130 位 hex
    pub fn to_hex(&self) -> String {
        format!("{}{}{:02x}", self.r, self.s, self.v)
    }
}

/// 单链签名结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureResult {
    pub signature: RsvSignature,
    pub chain: SupportedChain,
    pub address: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// 认证状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub connected_chains: BTreeMap<SupportedChain, Option<DerivedAddress>>,
    pub active_chain: Option<SupportedChain>,
    pub signatures: BTreeMap<SupportedChain, Option<SignatureResult>>,
    pub is_initialized: bool,
    pub is_connecting: bool,
}

impl AuthState {
    /// 为给定链集合建立空槽位
    pub fn with_chains(chains: impl IntoIterator<Item = SupportedChain>) -> Self {
        let mut state = Self::default();
        for chain in chains {
            state.connected_chains.insert(chain, None);
            state.signatures.insert(chain, None);
        }
        state
    }

    pub fn address(&self, chain: SupportedChain) -> Option<&DerivedAddress> {
        self.connected_chains.get(&chain).and_then(Option::as_ref)
    }

    pub fn signature(&self, chain: SupportedChain) -> Option<&SignatureResult> {
        self.signatures.get(&chain).and_then(Option::as_ref)
    }

    pub fn is_connected(&self, chain: SupportedChain) -> bool {
        self.address(chain).is_some()
    }

    /// 非空签名数量
    pub fn signed_count(&self) -> usize {
        self.signatures.values().filter(|s| s.is_some()).count()
    }

    /// 已连接链（按枚举顺序）
    pub fn connected(&self) -> Vec<SupportedChain> {
        self.connected_chains
            .iter()
            .filter_map(|(chain, addr)| addr.as_ref().map(|_| *chain))
            .collect()
    }

    /// 写入链地址；已有签名不属于新地址时一并清除
    pub fn set_address(&mut self, chain: SupportedChain, derived: DerivedAddress) {
        if self
            .signature(chain)
            .is_some_and(|sig| sig.address != derived.address)
        {
            self.signatures.insert(chain, None);
        }
        self.connected_chains.insert(chain, Some(derived));
    }

    /// 清空所有链的连接与签名，保留槽位
    pub fn reset(&mut self) {
        for slot in self.connected_chains.values_mut() {
            *slot = None;
        }
        for slot in self.signatures.values_mut() {
            *slot = None;
        }
        self.active_chain = None;
        self.is_initialized = false;
        self.is_connecting = false;
    }

    /// 按不变量修正状态（用于从持久化快照恢复）
    ///
    /// 丢弃：键与内容不一致的条目、地址与连接不符的签名、指向未连接链的 active_chain。
    pub fn sanitize(&mut self) {
        for (chain, slot) in self.connected_chains.iter_mut() {
            if slot.as_ref().is_some_and(|addr| addr.chain != *chain) {
                *slot = None;
            }
        }

        let connected = &self.connected_chains;
        for (chain, slot) in self.signatures.iter_mut() {
            let valid = match slot.as_ref() {
                Some(sig) => {
                    sig.chain == *chain
                        && connected
                            .get(chain)
                            .and_then(Option::as_ref)
                            .is_some_and(|addr| addr.address == sig.address)
                }
                None => true,
            };
            if !valid {
                *slot = None;
            }
        }

        if let Some(active) = self.active_chain {
            if !self.is_connected(active) {
                self.active_chain = None;
            }
        }
    }
}
