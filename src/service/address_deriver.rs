//! 多链地址派生服务
//!
//! 账户 + 链 → 派生路径 → MPC 派生公钥 → 链原生地址。
//! 编码算法见 [`crate::domain::derivation`]。

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;

use crate::domain::chain_config::{ChainRegistry, KeyType, SupportedChain};
use crate::domain::derivation::{address_from_public_key, decode_public_key, DerivedAddress};
use crate::error::SignerError;
use crate::service::signer_contract::SignerContractClient;
use crate::utils::address_validator::AddressValidator;

/// 地址派生器
#[derive(Clone)]
pub struct AddressDeriver {
    contract: SignerContractClient,
    registry: Arc<ChainRegistry>,
}

impl AddressDeriver {
    pub fn new(contract: SignerContractClient, registry: Arc<ChainRegistry>) -> Self {
        Self { contract, registry }
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    pub fn contract(&self) -> &SignerContractClient {
        &self.contract
    }

    /// MPC 密钥类型：Solana / Aptos / Sui / NEAR 为 EdDSA，其余 ECDSA
    pub fn key_type(chain: SupportedChain) -> KeyType {
        KeyType::from(chain.family().curve_type())
    }

    /// 派生单条链的地址
    ///
    /// `path` 为空时使用注册表中的派生路径。任何失败都包装为
    /// [`SignerError::AddressDerivation`]。
    pub async fn derive_address(
        &self,
        account_id: &str,
        chain: SupportedChain,
        path: Option<&str>,
    ) -> Result<DerivedAddress, SignerError> {
        let path = path
            .map(str::to_string)
            .unwrap_or_else(|| self.registry.derivation_path(chain));

        self.derive_inner(account_id, chain, &path)
            .await
            .map_err(|cause| {
                tracing::warn!(
                    error = %cause,
                    chain = %chain,
                    path = %path,
                    account_id = %account_id,
                    "Address derivation failed"
                );
                SignerError::AddressDerivation {
                    chain,
                    path: path.clone(),
                    cause: Box::new(cause),
                }
            })
    }

    async fn derive_inner(
        &self,
        account_id: &str,
        chain: SupportedChain,
        path: &str,
    ) -> Result<DerivedAddress, SignerError> {
        let config = self
            .registry
            .get(chain)
            .ok_or(SignerError::ChainNotConfigured(chain))?;

        let is_ed25519 = Self::key_type(chain) == KeyType::Eddsa;
        let public_key = self
            .contract
            .get_derived_public_key(path, account_id, is_ed25519)
            .await?;

        let key_bytes = decode_public_key(&public_key)?;
        let address = address_from_public_key(config, &key_bytes)?;

        if !Self::validate_address_format(chain, &address) {
            tracing::warn!(chain = %chain, address = %address, "Derived address failed format check");
        }

        tracing::debug!(chain = %chain, path = %path, address = %address, "Address derived");

        Ok(DerivedAddress {
            chain,
            address,
            public_key,
            derivation_path: path.to_string(),
        })
    }

    /// 并发派生多条链；失败的链记录日志并从结果中省略
    pub async fn derive_many(
        &self,
        account_id: &str,
        chains: &[SupportedChain],
    ) -> BTreeMap<SupportedChain, DerivedAddress> {
        let tasks = chains
            .iter()
            .map(|chain| self.derive_address(account_id, *chain, None));

        let results = join_all(tasks).await;

        let mut derived = BTreeMap::new();
        for (chain, result) in chains.iter().zip(results) {
            match result {
                Ok(address) => {
                    derived.insert(*chain, address);
                }
                Err(e) => {
                    tracing::error!(error = %e, chain = %chain, "Skipping chain after derivation failure");
                }
            }
        }

        tracing::info!(
            account_id = %account_id,
            requested = chains.len(),
            derived = derived.len(),
            "Multi-chain derivation finished"
        );

        derived
    }

    /// 地址结构校验
    pub fn validate_address_format(chain: SupportedChain, address: &str) -> bool {
        AddressValidator::validate(chain, address)
    }
}
