//! 地址派生集成测试
//!
//! 使用确定性的合约替身，验证各链地址格式、确定性与批量派生的部分失败语义

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chainsig_auth::domain::chain_config::SupportedChain;
use chainsig_auth::error::SignerError;
use chainsig_auth::service::AddressDeriver;
use chainsig_auth::utils::address_validator::AddressValidator;
use common::{deriver, MockViewer, ACCOUNT};

#[tokio::test]
async fn test_every_chain_produces_valid_address() {
    let deriver = deriver(Arc::new(MockViewer::new()));

    for chain in SupportedChain::ALL {
        let derived = deriver
            .derive_address(ACCOUNT, chain, None)
            .await
            .unwrap_or_else(|e| panic!("{} failed: {}", chain, e));

        assert_eq!(derived.chain, chain);
        assert_eq!(derived.derivation_path, chain.default_derivation_path());
        assert!(
            AddressDeriver::validate_address_format(chain, &derived.address),
            "{} produced malformed address {}",
            chain,
            derived.address
        );
    }
}

#[tokio::test]
async fn test_derivation_is_deterministic() {
    let first = deriver(Arc::new(MockViewer::new()));
    let second = deriver(Arc::new(MockViewer::new()));

    for chain in [SupportedChain::Ethereum, SupportedChain::Bitcoin, SupportedChain::Solana] {
        let a = first.derive_address(ACCOUNT, chain, None).await.unwrap();
        let b = second.derive_address(ACCOUNT, chain, None).await.unwrap();
        assert_eq!(a, b);
    }

    // 不同路径 / 不同账户得到不同地址
    let default = first
        .derive_address(ACCOUNT, SupportedChain::Ethereum, None)
        .await
        .unwrap();
    let custom = first
        .derive_address(ACCOUNT, SupportedChain::Ethereum, Some("ethereum-2"))
        .await
        .unwrap();
    let other = first
        .derive_address("bob.testnet", SupportedChain::Ethereum, None)
        .await
        .unwrap();
    assert_ne!(default.address, custom.address);
    assert_ne!(default.address, other.address);
    assert_eq!(custom.derivation_path, "ethereum-2");
}

#[tokio::test]
async fn test_evm_addresses_are_checksummed() {
    let deriver = deriver(Arc::new(MockViewer::new()));

    for chain in [
        SupportedChain::Ethereum,
        SupportedChain::Polygon,
        SupportedChain::Arbitrum,
        SupportedChain::Optimism,
        SupportedChain::Bsc,
    ] {
        let derived = deriver.derive_address(ACCOUNT, chain, None).await.unwrap();
        assert_eq!(derived.address.len(), 42);
        assert!(AddressValidator::verify_eip55_checksum(&derived.address));
    }
}

#[tokio::test]
async fn test_family_specific_shapes() {
    let deriver = deriver(Arc::new(MockViewer::new()));

    let btc = deriver
        .derive_address(ACCOUNT, SupportedChain::Bitcoin, None)
        .await
        .unwrap();
    assert!(btc.address.starts_with("bc1q"));

    let xrp = deriver
        .derive_address(ACCOUNT, SupportedChain::Xrp, None)
        .await
        .unwrap();
    assert!(xrp.address.starts_with('r'));

    let osmo = deriver
        .derive_address(ACCOUNT, SupportedChain::Osmosis, None)
        .await
        .unwrap();
    assert!(osmo.address.starts_with("osmo1"));

    let near = deriver
        .derive_address(ACCOUNT, SupportedChain::Near, None)
        .await
        .unwrap();
    assert_eq!(near.address.len(), 64);
    assert!(near.public_key.starts_with("ed25519:"));

    let aptos = deriver
        .derive_address(ACCOUNT, SupportedChain::Aptos, None)
        .await
        .unwrap();
    let sui = deriver
        .derive_address(ACCOUNT, SupportedChain::Sui, None)
        .await
        .unwrap();
    assert_eq!(aptos.address.len(), 66);
    assert_eq!(sui.address.len(), 66);
}

#[tokio::test]
async fn test_derive_many_omits_failures() {
    let viewer = Arc::new(MockViewer::new());
    viewer.fail_path("bitcoin-1");
    let deriver = deriver(viewer.clone());

    let chains = [
        SupportedChain::Ethereum,
        SupportedChain::Bitcoin,
        SupportedChain::Solana,
    ];
    let derived = deriver.derive_many(ACCOUNT, &chains).await;

    assert_eq!(derived.len(), 2);
    assert!(derived.contains_key(&SupportedChain::Ethereum));
    assert!(derived.contains_key(&SupportedChain::Solana));
    assert!(!derived.contains_key(&SupportedChain::Bitcoin));
    assert_eq!(viewer.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_failure_carries_chain_and_path() {
    let viewer = Arc::new(MockViewer::new());
    viewer.fail_path("solana-7");
    let deriver = deriver(viewer);

    let err = deriver
        .derive_address(ACCOUNT, SupportedChain::Solana, Some("solana-7"))
        .await
        .unwrap_err();

    match &err {
        SignerError::AddressDerivation { chain, path, .. } => {
            assert_eq!(*chain, SupportedChain::Solana);
            assert_eq!(path, "solana-7");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("Failed to get derived public key"));
}

#[tokio::test]
async fn test_master_public_key() {
    let deriver = deriver(Arc::new(MockViewer::new()));
    let key = deriver.contract().get_master_public_key().await.unwrap();
    assert!(key.starts_with("secp256k1:"));
}
