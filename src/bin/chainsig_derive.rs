//! 为 NEAR 账户派生各链地址（只读 view 调用，不签名）
//!
//! 用法：
//!   chainsig-derive --account alice.near [--chains ethereum,btc,sol] [--path solana=solana-2] [--config chainsig.toml]

use std::sync::Arc;

use anyhow::{Context, Result};
use chainsig_auth::config::Config;
use chainsig_auth::domain::chain_config::SupportedChain;
use chainsig_auth::infrastructure::logging::init_logging;
use chainsig_auth::service::{AddressDeriver, NearRpcViewer, SignerContractClient};
use chainsig_auth::utils::normalize_chain_identifier;

#[derive(Debug, Default)]
struct Args {
    account: Option<String>,
    chains: Vec<String>,
    paths: Vec<(String, String)>,
    config: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut parsed = Args::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--account" => parsed.account = args.next(),
            "--chains" => {
                if let Some(v) = args.next() {
                    parsed
                        .chains
                        .extend(v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()));
                }
            }
            "--path" => {
                let v = args.next().context("--path requires <chain>=<path>")?;
                let (chain, path) = v
                    .split_once('=')
                    .context("--path requires <chain>=<path>")?;
                parsed.paths.push((chain.to_string(), path.to_string()));
            }
            "--config" => parsed.config = args.next(),
            other => anyhow::bail!("Unknown argument: {}", other),
        }
    }

    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = parse_args()?;
    let mut config = Config::from_env_and_file(args.config.as_deref())?;

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    for (chain, path) in &args.paths {
        let chain = normalize_chain_identifier(chain)?;
        config
            .signer
            .derivation_paths
            .insert(chain.as_str().to_string(), path.clone());
    }
    config.validate()?;

    let account = args
        .account
        .or_else(|| std::env::var("NEAR_ACCOUNT_ID").ok())
        .context("Missing --account (or NEAR_ACCOUNT_ID)")?;

    let registry = Arc::new(config.signer.chain_registry());
    let chains: Vec<SupportedChain> = if args.chains.is_empty() {
        match &config.auth.allowed_chains {
            Some(allowed) => allowed.clone(),
            None => registry.chains(),
        }
    } else {
        args.chains
            .iter()
            .map(|c| normalize_chain_identifier(c))
            .collect::<Result<_>>()?
    };

    let viewer = Arc::new(NearRpcViewer::from_config(&config.signer));
    let contract = SignerContractClient::from_config(viewer, &config.signer);

    tracing::info!(
        account_id = %account,
        contract = %contract.contract_id(),
        chains = chains.len(),
        "Deriving addresses"
    );

    match contract.get_master_public_key().await {
        Ok(key) => println!("master public key: {}", key),
        Err(e) => tracing::warn!(error = %e, "Could not fetch master public key"),
    }

    let deriver = AddressDeriver::new(contract, registry);
    let derived = deriver.derive_many(&account, &chains).await;

    for chain in &chains {
        match derived.get(chain) {
            Some(d) => println!("{:<10} {:<64} ({})", chain.as_str(), d.address, d.derivation_path),
            None => println!("{:<10} FAILED", chain.as_str()),
        }
    }

    if derived.len() != chains.len() {
        anyhow::bail!("{} of {} chains failed", chains.len() - derived.len(), chains.len());
    }

    Ok(())
}
