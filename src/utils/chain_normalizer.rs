//! 链标识符标准化模块
//!
//! 统一所有链标识符的处理逻辑：规范名称、别名、EVM chain_id 都映射到 [`SupportedChain`]
//! 符号不作为查找键（多条 EVM 链共用 ETH）

use std::collections::HashMap;
use std::str::FromStr;

use once_cell::sync::Lazy;

use crate::domain::chain_config::SupportedChain;

/// 链标识符配置
#[derive(Debug, Clone)]
pub struct ChainIdentifier {
    pub chain: SupportedChain,
    /// 符号（大写）
    pub symbol: &'static str,
    /// 全称
    pub full_name: &'static str,
    /// 别名列表（小写）
    pub aliases: &'static [&'static str],
}

/// 链标识符注册表（静态初始化，键为小写）
static CHAIN_ALIASES: Lazy<HashMap<String, ChainIdentifier>> = Lazy::new(|| {
    let chains = vec![
        ChainIdentifier {
            chain: SupportedChain::Ethereum,
            symbol: "ETH",
            full_name: "Ethereum Mainnet",
            aliases: &["eth", "mainnet", "1"],
        },
        ChainIdentifier {
            chain: SupportedChain::Polygon,
            symbol: "MATIC",
            full_name: "Polygon",
            aliases: &["matic", "pol", "137"],
        },
        ChainIdentifier {
            chain: SupportedChain::Arbitrum,
            symbol: "ETH",
            full_name: "Arbitrum One",
            aliases: &["arb", "42161"],
        },
        ChainIdentifier {
            chain: SupportedChain::Optimism,
            symbol: "ETH",
            full_name: "Optimism",
            aliases: &["op", "10"],
        },
        ChainIdentifier {
            chain: SupportedChain::Bsc,
            symbol: "BNB",
            full_name: "BNB Smart Chain",
            aliases: &["binance", "bnb", "56"],
        },
        ChainIdentifier {
            chain: SupportedChain::Bitcoin,
            symbol: "BTC",
            full_name: "Bitcoin",
            aliases: &["btc"],
        },
        ChainIdentifier {
            chain: SupportedChain::Solana,
            symbol: "SOL",
            full_name: "Solana",
            aliases: &["sol"],
        },
        ChainIdentifier {
            chain: SupportedChain::Xrp,
            symbol: "XRP",
            full_name: "XRP Ledger",
            aliases: &["ripple", "xrpl"],
        },
        ChainIdentifier {
            chain: SupportedChain::Aptos,
            symbol: "APT",
            full_name: "Aptos",
            aliases: &["apt"],
        },
        ChainIdentifier {
            chain: SupportedChain::Sui,
            symbol: "SUI",
            full_name: "Sui",
            aliases: &[],
        },
        ChainIdentifier {
            chain: SupportedChain::Near,
            symbol: "NEAR",
            full_name: "NEAR Protocol",
            aliases: &[],
        },
        ChainIdentifier {
            chain: SupportedChain::Cosmos,
            symbol: "ATOM",
            full_name: "Cosmos Hub",
            aliases: &["atom", "cosmoshub"],
        },
        ChainIdentifier {
            chain: SupportedChain::Osmosis,
            symbol: "OSMO",
            full_name: "Osmosis",
            aliases: &["osmo"],
        },
    ];

    let mut registry = HashMap::new();
    for ident in chains {
        registry.insert(ident.chain.as_str().to_string(), ident.clone());
        for alias in ident.aliases {
            registry.insert(alias.to_string(), ident.clone());
        }
    }

    registry
});

/// 标准化链标识符
///
/// 接受规范名称、别名或 EVM chain_id，大小写不敏感。
pub fn normalize_chain_identifier(input: &str) -> anyhow::Result<SupportedChain> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        anyhow::bail!("Chain identifier cannot be empty");
    }

    CHAIN_ALIASES
        .get(&trimmed.to_lowercase())
        .map(|ident| ident.chain)
        .ok_or_else(|| anyhow::anyhow!("Unsupported chain identifier: {}", trimmed))
}

/// 获取链符号
pub fn chain_symbol(chain: SupportedChain) -> &'static str {
    CHAIN_ALIASES
        .get(chain.as_str())
        .map(|ident| ident.symbol)
        .unwrap_or("")
}

impl FromStr for SupportedChain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        normalize_chain_identifier(s)
    }
}
