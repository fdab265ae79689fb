//! 多链配置模块
//!
//! 定义所有支持的区块链、链族及其加密曲线配置

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 支持的链（封闭枚举）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportedChain {
    Ethereum,
    Polygon,
    Arbitrum,
    Optimism,
    Bsc,
    Bitcoin,
    Solana,
    Xrp,
    Aptos,
    Sui,
    Near,
    Cosmos,
    Osmosis,
}

impl SupportedChain {
    /// 全部链，按注册顺序
    pub const ALL: [SupportedChain; 13] = [
        SupportedChain::Ethereum,
        SupportedChain::Polygon,
        SupportedChain::Arbitrum,
        SupportedChain::Optimism,
        SupportedChain::Bsc,
        SupportedChain::Bitcoin,
        SupportedChain::Solana,
        SupportedChain::Xrp,
        SupportedChain::Aptos,
        SupportedChain::Sui,
        SupportedChain::Near,
        SupportedChain::Cosmos,
        SupportedChain::Osmosis,
    ];

    /// 规范名称（小写）
    pub fn as_str(&self) -> &'static str {
        match self {
            SupportedChain::Ethereum => "ethereum",
            SupportedChain::Polygon => "polygon",
            SupportedChain::Arbitrum => "arbitrum",
            SupportedChain::Optimism => "optimism",
            SupportedChain::Bsc => "bsc",
            SupportedChain::Bitcoin => "bitcoin",
            SupportedChain::Solana => "solana",
            SupportedChain::Xrp => "xrp",
            SupportedChain::Aptos => "aptos",
            SupportedChain::Sui => "sui",
            SupportedChain::Near => "near",
            SupportedChain::Cosmos => "cosmos",
            SupportedChain::Osmosis => "osmosis",
        }
    }

    /// 链族
    pub fn family(&self) -> ChainFamily {
        match self {
            SupportedChain::Ethereum
            | SupportedChain::Polygon
            | SupportedChain::Arbitrum
            | SupportedChain::Optimism
            | SupportedChain::Bsc => ChainFamily::Evm,
            SupportedChain::Bitcoin => ChainFamily::Bitcoin,
            SupportedChain::Solana => ChainFamily::Solana,
            SupportedChain::Xrp => ChainFamily::Xrp,
            SupportedChain::Aptos => ChainFamily::Aptos,
            SupportedChain::Sui => ChainFamily::Sui,
            SupportedChain::Near => ChainFamily::Near,
            SupportedChain::Cosmos | SupportedChain::Osmosis => ChainFamily::Cosmos,
        }
    }

    /// 默认派生路径（MPC 合约的子密钥槽位）
    pub fn default_derivation_path(&self) -> String {
        format!("{}-1", self.as_str())
    }
}

impl fmt::Display for SupportedChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 链族标签，决定地址编码算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Bitcoin,
    Solana,
    Xrp,
    Aptos,
    Sui,
    Cosmos,
    Near,
}

impl ChainFamily {
    /// 链族隐含的曲线
    pub fn curve_type(&self) -> CurveType {
        match self {
            ChainFamily::Solana | ChainFamily::Aptos | ChainFamily::Sui | ChainFamily::Near => {
                CurveType::Ed25519
            }
            _ => CurveType::Secp256k1,
        }
    }
}

/// 加密曲线类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveType {
    /// secp256k1 曲线 (EVM, Bitcoin, XRP, Cosmos)
    Secp256k1,
    /// ed25519 曲线 (Solana, Aptos, Sui, NEAR)
    Ed25519,
}

/// MPC 签名密钥类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    Ecdsa,
    Eddsa,
}

impl KeyType {
    /// MPC 合约 domain_id：ECDSA 为 0，EdDSA 为 1
    pub fn domain_id(&self) -> u64 {
        match self {
            KeyType::Ecdsa => 0,
            KeyType::Eddsa => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Ecdsa => "Ecdsa",
            KeyType::Eddsa => "Eddsa",
        }
    }
}

impl From<CurveType> for KeyType {
    fn from(curve: CurveType) -> Self {
        match curve {
            CurveType::Secp256k1 => KeyType::Ecdsa,
            CurveType::Ed25519 => KeyType::Eddsa,
        }
    }
}

/// 原生代币信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// 链配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// 链标识
    pub chain: SupportedChain,
    /// 链 ID（EVM 为 EIP-155 数字，其它链为名称）
    pub chain_id: String,
    /// 链名称
    pub name: String,
    /// 链族
    pub family: ChainFamily,
    /// RPC 端点
    pub rpc_url: String,
    /// 浏览器地址
    pub explorer_url: Option<String>,
    /// 原生代币
    pub native_currency: NativeCurrency,
    /// Bech32 前缀（仅 Cosmos 系列）
    pub bech32_prefix: Option<String>,
}


/// 链配置注册表
pub struct ChainRegistry {
    configs: HashMap<SupportedChain, ChainConfig>,
    derivation_paths: HashMap<SupportedChain, String>,
}

impl ChainRegistry {
    /// 创建预配置的注册表
    pub fn new() -> Self {
        let mut registry = Self {
            configs: HashMap::new(),
            derivation_paths: HashMap::new(),
        };

        registry.register_default_chains();
        registry
    }

    /// 空注册表（用于自定义链集合）
    pub fn empty() -> Self {
        Self {
            configs: HashMap::new(),
            derivation_paths: HashMap::new(),
        }
    }

    /// 注册默认支持的链
    fn register_default_chains(&mut self) {
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // EVM 系列 (共享 secp256k1 + keccak 实现)
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

        self.register(evm(
            SupportedChain::Ethereum,
            "1",
            "Ethereum",
            "https://eth.llamarpc.com",
            "https://etherscan.io",
            ("Ether", "ETH"),
        ));
        self.register(evm(
            SupportedChain::Polygon,
            "137",
            "Polygon",
            "https://polygon.llamarpc.com",
            "https://polygonscan.com",
            ("MATIC", "MATIC"),
        ));
        self.register(evm(
            SupportedChain::Arbitrum,
            "42161",
            "Arbitrum",
            "https://arb1.arbitrum.io/rpc",
            "https://arbiscan.io",
            ("Ether", "ETH"),
        ));
        self.register(evm(
            SupportedChain::Optimism,
            "10",
            "Optimism",
            "https://mainnet.optimism.io",
            "https://optimistic.etherscan.io",
            ("Ether", "ETH"),
        ));
        self.register(evm(
            SupportedChain::Bsc,
            "56",
            "Binance Smart Chain",
            "https://bsc-dataseed.binance.org",
            "https://bscscan.com",
            ("BNB", "BNB"),
        ));

        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // 其它 secp256k1 链
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

        self.register(ChainConfig {
            chain: SupportedChain::Bitcoin,
            chain_id: "bitcoin".to_string(),
            name: "Bitcoin".to_string(),
            family: ChainFamily::Bitcoin,
            rpc_url: "https://blockstream.info/api".to_string(),
            explorer_url: Some("https://blockstream.info".to_string()),
            native_currency: currency("Bitcoin", "BTC", 8),
            bech32_prefix: None,
        });

        self.register(ChainConfig {
            chain: SupportedChain::Xrp,
            chain_id: "xrp".to_string(),
            name: "XRP Ledger".to_string(),
            family: ChainFamily::Xrp,
            rpc_url: "wss://xrplcluster.com".to_string(),
            explorer_url: Some("https://xrpscan.com".to_string()),
            native_currency: currency("XRP", "XRP", 6),
            bech32_prefix: None,
        });

        // Cosmos 系列：地址前缀按链区分
        self.register(ChainConfig {
            chain: SupportedChain::Cosmos,
            chain_id: "cosmoshub-4".to_string(),
            name: "Cosmos Hub".to_string(),
            family: ChainFamily::Cosmos,
            rpc_url: "https://cosmos-rpc.publicnode.com".to_string(),
            explorer_url: Some("https://www.mintscan.io/cosmos".to_string()),
            native_currency: currency("Atom", "ATOM", 6),
            bech32_prefix: Some("cosmos".to_string()),
        });
        self.register(ChainConfig {
            chain: SupportedChain::Osmosis,
            chain_id: "osmosis-1".to_string(),
            name: "Osmosis".to_string(),
            family: ChainFamily::Cosmos,
            rpc_url: "https://osmosis-rpc.publicnode.com".to_string(),
            explorer_url: Some("https://www.mintscan.io/osmosis".to_string()),
            native_currency: currency("Osmo", "OSMO", 6),
            bech32_prefix: Some("osmo".to_string()),
        });

        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // Ed25519 系列
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

        self.register(ChainConfig {
            chain: SupportedChain::Solana,
            chain_id: "solana".to_string(),
            name: "Solana".to_string(),
            family: ChainFamily::Solana,
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            explorer_url: Some("https://explorer.solana.com".to_string()),
            native_currency: currency("Solana", "SOL", 9),
            bech32_prefix: None,
        });
        self.register(ChainConfig {
            chain: SupportedChain::Aptos,
            chain_id: "aptos".to_string(),
            name: "Aptos".to_string(),
            family: ChainFamily::Aptos,
            rpc_url: "https://fullnode.mainnet.aptoslabs.com/v1".to_string(),
            explorer_url: Some("https://explorer.aptoslabs.com".to_string()),
            native_currency: currency("Aptos", "APT", 8),
            bech32_prefix: None,
        });
        self.register(ChainConfig {
            chain: SupportedChain::Sui,
            chain_id: "sui".to_string(),
            name: "Sui".to_string(),
            family: ChainFamily::Sui,
            rpc_url: "https://fullnode.mainnet.sui.io".to_string(),
            explorer_url: Some("https://suiexplorer.com".to_string()),
            native_currency: currency("Sui", "SUI", 9),
            bech32_prefix: None,
        });
        self.register(ChainConfig {
            chain: SupportedChain::Near,
            chain_id: "near".to_string(),
            name: "NEAR".to_string(),
            family: ChainFamily::Near,
            rpc_url: "https://rpc.mainnet.near.org".to_string(),
            explorer_url: Some("https://explorer.near.org".to_string()),
            native_currency: currency("NEAR", "NEAR", 24),
            bech32_prefix: None,
        });
    }

    /// 注册链配置（同时写入默认派生路径）
    pub fn register(&mut self, config: ChainConfig) {
        let chain = config.chain;
        self.derivation_paths
            .entry(chain)
            .or_insert_with(|| chain.default_derivation_path());
        self.configs.insert(chain, config);
    }

    /// 覆盖某条链的派生路径
    pub fn set_derivation_path(&mut self, chain: SupportedChain, path: impl Into<String>) {
        self.derivation_paths.insert(chain, path.into());
    }

    /// 获取配置
    pub fn get(&self, chain: SupportedChain) -> Option<&ChainConfig> {
        self.configs.get(&chain)
    }

    /// 是否支持该链
    pub fn contains(&self, chain: SupportedChain) -> bool {
        self.configs.contains_key(&chain)
    }

    /// 获取派生路径
    pub fn derivation_path(&self, chain: SupportedChain) -> String {
        self.derivation_paths
            .get(&chain)
            .cloned()
            .unwrap_or_else(|| chain.default_derivation_path())
    }

    /// 列出所有支持的链（按枚举顺序）
    pub fn chains(&self) -> Vec<SupportedChain> {
        let mut chains: Vec<SupportedChain> = self.configs.keys().copied().collect();
        chains.sort();
        chains
    }

    /// 验证链配置完整性
    pub fn validate_configs(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (chain, config) in &self.configs {
            if config.chain != *chain {
                errors.push(format!(
                    "Chain {} registered under mismatched key {}",
                    config.chain, chain
                ));
            }

            if config.name.is_empty() {
                errors.push(format!("Chain {} has empty name", chain));
            }

            if config.family != chain.family() {
                errors.push(format!(
                    "Chain {} has family {:?}, expected {:?}",
                    chain,
                    config.family,
                    chain.family()
                ));
            }

            // Cosmos 系列必须配置 bech32 前缀
            match (config.family, &config.bech32_prefix) {
                (ChainFamily::Cosmos, None) => {
                    errors.push(format!("Chain {} is missing a bech32 prefix", chain));
                }
                (ChainFamily::Cosmos, Some(prefix)) if prefix.is_empty() => {
                    errors.push(format!("Chain {} has empty bech32 prefix", chain));
                }
                _ => {}
            }

            if self.derivation_path(*chain).is_empty() {
                errors.push(format!("Chain {} has empty derivation path", chain));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn currency(name: &str, symbol: &str, decimals: u8) -> NativeCurrency {
    NativeCurrency {
        name: name.to_string(),
        symbol: symbol.to_string(),
        decimals,
    }
}

fn evm(
    chain: SupportedChain,
    chain_id: &str,
    name: &str,
    rpc_url: &str,
    explorer_url: &str,
    (currency_name, symbol): (&str, &str),
) -> ChainConfig {
    ChainConfig {
        chain,
        chain_id: chain_id.to_string(),
        name: name.to_string(),
        family: ChainFamily::Evm,
        rpc_url: rpc_url.to_string(),
        explorer_url: Some(explorer_url.to_string()),
        native_currency: currency(currency_name, symbol, 18),
        bech32_prefix: None,
    }
}
