//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::chain_config::{ChainRegistry, SupportedChain};
use crate::utils::chain_normalizer::normalize_chain_identifier;

/// 默认 MPC 合约地址
pub const MPC_CONTRACT_MAINNET: &str = "v1.signer";
pub const MPC_CONTRACT_TESTNET: &str = "v1.signer-prod.testnet";

/// NEAR 单笔交易最大 gas（300 Tgas）
pub const NEAR_MAX_GAS: u64 = 300_000_000_000_000;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// 应用配置结构体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub signer: SignerConfig,
    #[serde(default)]
    pub auth: AuthPolicyConfig,
    #[serde(default)]
    pub session: SessionSecurityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 网络
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    Mainnet,
    Testnet,
}

impl NetworkId {
    /// 默认 MPC 合约
    pub fn default_contract(&self) -> &'static str {
        match self {
            NetworkId::Mainnet => MPC_CONTRACT_MAINNET,
            NetworkId::Testnet => MPC_CONTRACT_TESTNET,
        }
    }

    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            NetworkId::Mainnet => "https://rpc.mainnet.near.org",
            NetworkId::Testnet => "https://rpc.testnet.near.org",
        }
    }
}

/// MPC 签名合约配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    pub network_id: NetworkId,
    /// 自定义合约地址（不填则按网络选择）
    pub contract_id: Option<String>,
    /// NEAR RPC 端点（不填则按网络选择）
    pub rpc_url: Option<String>,
    /// sign 调用附带的 gas
    pub gas: u64,
    /// sign 调用附带的押金（yoctoNEAR，十进制字符串）
    pub deposit: String,
    pub request_timeout_secs: u64,
    /// 各链派生路径覆盖（键为链名称或别名）
    pub derivation_paths: HashMap<String, String>,
}

impl SignerConfig {
    /// 实际使用的合约地址
    pub fn contract_id(&self) -> String {
        self.contract_id
            .clone()
            .unwrap_or_else(|| self.network_id.default_contract().to_string())
    }

    pub fn rpc_url(&self) -> String {
        self.rpc_url
            .clone()
            .unwrap_or_else(|| self.network_id.default_rpc_url().to_string())
    }

    /// 带派生路径覆盖的链注册表
    pub fn chain_registry(&self) -> ChainRegistry {
        let mut registry = ChainRegistry::new();
        for (name, path) in &self.derivation_paths {
            // 无法识别的链名由 Config::validate 报告
            if let Ok(chain) = normalize_chain_identifier(name) {
                registry.set_derivation_path(chain, path.clone());
            }
        }
        registry
    }
}

/// 认证策略配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthPolicyConfig {
    /// 允许的链（不填则允许所有已配置的链）
    pub allowed_chains: Option<Vec<SupportedChain>>,
    /// 是否要求多链签名
    pub require_multiple_chains: bool,
    /// 最少签名链数
    pub minimum_chains: Option<usize>,
}

impl AuthPolicyConfig {
    /// 是否配置了多链策略
    pub fn has_multi_chain_policy(&self) -> bool {
        self.require_multiple_chains || self.minimum_chains.is_some()
    }
}

/// 会话安全配置（时长均为毫秒）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSecurityConfig {
    /// 会话最长寿命
    pub max_age_ms: u64,
    /// 空闲超时
    pub idle_timeout_ms: u64,
    pub device_fingerprinting: bool,
    pub bind_to_ip: bool,
    /// 距上次认证超过该时长需要重新认证
    pub require_reauth_ms: Option<u64>,
    pub encrypt_storage: bool,
    /// true：会话级存储（进程内存）；false：持久化存储（文件）
    pub secure_storage: bool,
    /// 周期校验间隔
    pub validate_interval_ms: Option<u64>,
    /// refresh 时轮换 session id
    pub rotate_tokens: bool,
    pub prevent_concurrent: bool,
    pub storage_key: String,
    /// 持久化存储目录
    pub storage_dir: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            network_id: match std::env::var("NEAR_NETWORK_ID").as_deref() {
                Ok("mainnet") => NetworkId::Mainnet,
                _ => NetworkId::Testnet,
            },
            contract_id: std::env::var("MPC_CONTRACT_ID").ok(),
            rpc_url: std::env::var("NEAR_RPC_URL").ok(),
            gas: std::env::var("MPC_SIGN_GAS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(NEAR_MAX_GAS),
            deposit: std::env::var("MPC_SIGN_DEPOSIT").unwrap_or_else(|_| "1".into()),
            request_timeout_secs: std::env::var("NEAR_RPC_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            derivation_paths: HashMap::new(),
        }
    }
}

impl Default for SessionSecurityConfig {
    fn default() -> Self {
        Self {
            max_age_ms: std::env::var("SESSION_MAX_AGE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(7 * DAY_MS),
            idle_timeout_ms: std::env::var("SESSION_IDLE_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DAY_MS),
            device_fingerprinting: std::env::var("SESSION_DEVICE_FINGERPRINTING")
                .ok()
                .map(|v| v == "1")
                .unwrap_or(false),
            bind_to_ip: std::env::var("SESSION_BIND_TO_IP")
                .ok()
                .map(|v| v == "1")
                .unwrap_or(false),
            require_reauth_ms: std::env::var("SESSION_REQUIRE_REAUTH_MS")
                .ok()
                .and_then(|s| s.parse().ok()),
            encrypt_storage: std::env::var("SESSION_ENCRYPT_STORAGE")
                .ok()
                .map(|v| v != "0")
                .unwrap_or(true),
            secure_storage: std::env::var("SESSION_SECURE_STORAGE")
                .ok()
                .map(|v| v != "0")
                .unwrap_or(true),
            validate_interval_ms: std::env::var("SESSION_VALIDATE_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok()),
            rotate_tokens: std::env::var("SESSION_ROTATE_TOKENS")
                .ok()
                .map(|v| v == "1")
                .unwrap_or(false),
            prevent_concurrent: std::env::var("SESSION_PREVENT_CONCURRENT")
                .ok()
                .map(|v| v == "1")
                .unwrap_or(false),
            storage_key: std::env::var("SESSION_STORAGE_KEY")
                .unwrap_or_else(|_| "chainsig-auth-session".into()),
            storage_dir: std::env::var("SESSION_STORAGE_DIR")
                .unwrap_or_else(|_| "./.chainsig-auth".into()),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
        }
    }
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            signer: SignerConfig::default(),
            auth: AuthPolicyConfig::default(),
            session: SessionSecurityConfig::default(),
            logging: LoggingConfig::default(),
        })
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件优先级更高）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                config = Self::from_file(path)?;
            }
        }

        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        let rpc_url = self.signer.rpc_url();
        if !rpc_url.starts_with("http://") && !rpc_url.starts_with("https://") {
            anyhow::bail!("NEAR_RPC_URL must start with http:// or https://");
        }

        if self.signer.contract_id().is_empty() {
            anyhow::bail!("MPC contract id must not be empty");
        }

        if self.signer.deposit.parse::<u128>().is_err() {
            anyhow::bail!("MPC_SIGN_DEPOSIT must be an integer amount of yoctoNEAR");
        }

        for (name, path) in &self.signer.derivation_paths {
            normalize_chain_identifier(name)
                .with_context(|| format!("Invalid derivation path override key: {}", name))?;
            if path.is_empty() {
                anyhow::bail!("Derivation path override for {} must not be empty", name);
            }
        }

        self.signer
            .chain_registry()
            .validate_configs()
            .map_err(|errors| anyhow::anyhow!("Invalid chain table: {}", errors.join("; ")))?;

        if let Some(minimum) = self.auth.minimum_chains {
            if minimum == 0 {
                anyhow::bail!("minimum_chains must be at least 1");
            }
            if let Some(allowed) = &self.auth.allowed_chains {
                if minimum > allowed.len() {
                    anyhow::bail!(
                        "minimum_chains ({}) exceeds the number of allowed chains ({})",
                        minimum,
                        allowed.len()
                    );
                }
            }
        }

        if self.session.storage_key.is_empty() {
            anyhow::bail!("SESSION_STORAGE_KEY must not be empty");
        }

        // 验证日志级别
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        // 验证日志格式
        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_config_from_env() {
        let config = Config::from_env().unwrap();
        assert_eq!(config.signer.gas, NEAR_MAX_GAS);
        assert_eq!(config.session.storage_key, "chainsig-auth-session");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_contract_auto_selection() {
        let mut signer = SignerConfig {
            contract_id: None,
            network_id: NetworkId::Mainnet,
            ..SignerConfig::default()
        };
        assert_eq!(signer.contract_id(), "v1.signer");

        signer.network_id = NetworkId::Testnet;
        assert_eq!(signer.contract_id(), "v1.signer-prod.testnet");

        signer.contract_id = Some("v1.custom.testnet".into());
        assert_eq!(signer.contract_id(), "v1.custom.testnet");
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[signer]
network_id = "mainnet"
contract_id = "v1.signer"
deposit = "1"

[signer.derivation_paths]
eth = "ethereum-vault"

[auth]
allowed_chains = ["ethereum", "bitcoin", "solana"]
minimum_chains = 2

[session]
max_age_ms = 3600000
device_fingerprinting = true

[logging]
level = "debug"
format = "json"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.signer.network_id, NetworkId::Mainnet);
        assert_eq!(config.auth.minimum_chains, Some(2));
        assert_eq!(config.session.max_age_ms, 3_600_000);
        assert!(config.session.device_fingerprinting);
        assert!(config.session.encrypt_storage);
        assert_eq!(
            config
                .signer
                .chain_registry()
                .derivation_path(SupportedChain::Ethereum),
            "ethereum-vault"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_bad_policy() {
        let mut config = Config::from_env().unwrap();
        // 默认链表通过完整性检查
        assert!(config.validate().is_ok());

        config.auth.allowed_chains = Some(vec![SupportedChain::Ethereum]);
        config.auth.minimum_chains = Some(2);
        assert!(config.validate().is_err());

        config.auth.minimum_chains = Some(0);
        assert!(config.validate().is_err());

        config.auth.minimum_chains = None;
        config
            .signer
            .derivation_paths
            .insert("dogecoin".into(), "dogecoin-1".into());
        assert!(config.validate().is_err());
    }
}
