//! 测试辅助模块
//! 提供确定性的 MPC 合约与钱包替身

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chainsig_auth::config::{AuthPolicyConfig, SessionSecurityConfig};
use chainsig_auth::domain::chain_config::ChainRegistry;
use chainsig_auth::infrastructure::fingerprint::{DeviceEnvironment, StaticProbe};
use chainsig_auth::infrastructure::{MemoryStorage, SessionStore};
use chainsig_auth::service::{
    AddressDeriver, ContractViewer, FunctionCallTransaction, MultiChainAuthManager,
    SignerContractClient, WalletConnection,
};
use chainsig_auth::utils::time_utils::{from_timestamp_ms, Clock, ManualClock};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

pub const ACCOUNT: &str = "alice.testnet";
pub const CONTRACT: &str = "v1.signer-prod.testnet";

/// 确定性派生：seed = SHA-256(path ‖ "," ‖ predecessor)
fn seed(path: &str, predecessor: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(b",");
    hasher.update(predecessor.as_bytes());
    hasher.finalize().into()
}

fn is_ed25519_path(path: &str) -> bool {
    ["solana", "aptos", "sui", "near"]
        .iter()
        .any(|p| path.starts_with(p))
}

/// MPC 合约 view 替身
#[derive(Default)]
pub struct MockViewer {
    failing_paths: Mutex<HashSet<String>>,
    pub calls: AtomicUsize,
}

impl MockViewer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让该路径的 derived_public_key 调用失败
    pub fn fail_path(&self, path: &str) {
        self.failing_paths.lock().unwrap().insert(path.to_string());
    }

    /// 与 view 返回值一致的派生公钥（未加标签）
    pub fn expected_key(path: &str, predecessor: &str) -> String {
        let seed = seed(path, predecessor);
        if is_ed25519_path(path) {
            let key = ed25519_dalek::SigningKey::from_bytes(&seed).verifying_key();
            bs58::encode(key.to_bytes()).into_string()
        } else {
            let secret = k256::SecretKey::from_slice(&seed).expect("valid scalar");
            let point = secret.public_key().to_encoded_point(false);
            format!("secp256k1:{}", bs58::encode(&point.as_bytes()[1..]).into_string())
        }
    }
}

#[async_trait]
impl ContractViewer for MockViewer {
    async fn view(&self, contract_id: &str, method: &str, args: Value) -> anyhow::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::ensure!(contract_id == CONTRACT, "unexpected contract {}", contract_id);

        match method {
            "public_key" => Ok(json!(Self::expected_key("root", ""))),
            "derived_public_key" => {
                let path = args["path"].as_str().unwrap_or_default();
                let predecessor = args["predecessor"].as_str().unwrap_or_default();
                if self.failing_paths.lock().unwrap().contains(path) {
                    anyhow::bail!("Smart contract panicked: path {} unavailable", path);
                }
                Ok(json!(Self::expected_key(path, predecessor)))
            }
            other => anyhow::bail!("MethodNotFound: {}", other),
        }
    }
}

/// 钱包替身：按 sign 请求参数返回确定性的 65 字节签名
#[derive(Default)]
pub struct MockWallet {
    accounts: Mutex<Vec<String>>,
    unreachable: Mutex<bool>,
    silent_paths: Mutex<HashSet<String>>,
    pub sent: Mutex<Vec<FunctionCallTransaction>>,
}

impl MockWallet {
    pub fn connected(account: &str) -> Self {
        let wallet = Self::default();
        wallet.accounts.lock().unwrap().push(account.to_string());
        wallet
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock().unwrap() = unreachable;
    }

    /// 该路径的签名结果中不带签名
    pub fn omit_signature_for(&self, path: &str) {
        self.silent_paths.lock().unwrap().insert(path.to_string());
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn signature_for(args: &Value) -> String {
        let first = Sha256::digest(args.to_string().as_bytes());
        let second = Sha256::digest(first);
        format!("{}{}1b", hex::encode(first), hex::encode(second))
    }
}

#[async_trait]
impl WalletConnection for MockWallet {
    async fn accounts(&self) -> anyhow::Result<Vec<String>> {
        if *self.unreachable.lock().unwrap() {
            anyhow::bail!("wallet selector is not available");
        }
        Ok(self.accounts.lock().unwrap().clone())
    }

    async fn sign_and_send_transactions(
        &self,
        transactions: Vec<FunctionCallTransaction>,
    ) -> anyhow::Result<Vec<Value>> {
        let silent = self.silent_paths.lock().unwrap().clone();
        let outcomes = transactions
            .iter()
            .map(|tx| {
                let path = tx.args["request"]["path"].as_str().unwrap_or_default();
                let logs = if silent.contains(path) {
                    vec!["sign request queued".to_string()]
                } else {
                    vec![json!({ "signature": Self::signature_for(&tx.args) }).to_string()]
                };
                json!({
                    "status": { "SuccessValue": "" },
                    "receipts_outcome": [{ "outcome": { "logs": logs } }],
                })
            })
            .collect();

        self.sent.lock().unwrap().extend(transactions);
        Ok(outcomes)
    }
}

pub fn test_environment() -> DeviceEnvironment {
    DeviceEnvironment {
        user_agent: "integration-test".into(),
        locale: "en-US".into(),
        screen: "1920x1080x24".into(),
        timezone: "UTC".into(),
        hardware_concurrency: 8,
        render_signature: "render".into(),
        ip_address: Some("127.0.0.1".into()),
    }
}

pub fn session_config() -> SessionSecurityConfig {
    SessionSecurityConfig {
        max_age_ms: 7 * 24 * 60 * 60 * 1000,
        idle_timeout_ms: 24 * 60 * 60 * 1000,
        device_fingerprinting: true,
        bind_to_ip: false,
        require_reauth_ms: None,
        encrypt_storage: true,
        secure_storage: true,
        validate_interval_ms: None,
        rotate_tokens: false,
        prevent_concurrent: false,
        storage_key: "chainsig-auth-session".into(),
        storage_dir: String::new(),
    }
}

pub fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        from_timestamp_ms(1_704_067_200_000).expect("valid timestamp"),
    ))
}

pub fn deriver(viewer: Arc<MockViewer>) -> AddressDeriver {
    let contract = SignerContractClient::new(viewer, CONTRACT);
    AddressDeriver::new(contract, Arc::new(ChainRegistry::new()))
}

/// 完整的测试装置
pub struct Harness {
    pub viewer: Arc<MockViewer>,
    pub wallet: Arc<MockWallet>,
    pub storage: Arc<MemoryStorage>,
    pub clock: Arc<ManualClock>,
    pub sessions: Arc<SessionStore>,
}

impl Harness {
    pub fn new(session: SessionSecurityConfig) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let clock = test_clock();
        let sessions = Arc::new(SessionStore::new(
            session,
            storage.clone(),
            clock.clone(),
            Arc::new(StaticProbe(test_environment())),
        ));

        Self {
            viewer: Arc::new(MockViewer::new()),
            wallet: Arc::new(MockWallet::connected(ACCOUNT)),
            storage,
            clock,
            sessions,
        }
    }

    pub fn manager(&self, policy: AuthPolicyConfig) -> MultiChainAuthManager {
        let clock: Arc<dyn Clock> = self.clock.clone();
        MultiChainAuthManager::new(
            deriver(self.viewer.clone()),
            self.wallet.clone(),
            self.sessions.clone(),
            policy,
        )
        .with_clock(clock)
    }
}
