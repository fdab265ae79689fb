//! 多链认证管理器
//!
//! 状态机：未初始化 → 连接中 → 已初始化 →（各链 已连接 / 已签名）→ 已认证。
//! `logout` 回到未初始化。
//!
//! 每次连接、签名后都会把快照写入 [`SessionStore`]；错误统一记录日志并转发到事件通道。

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::{AuthPolicyConfig, Config};
use crate::domain::auth_state::{AuthState, SignatureResult};
use crate::domain::chain_config::{ChainRegistry, SupportedChain};
use crate::domain::derivation::DerivedAddress;
use crate::domain::session::SessionPayload;
use crate::error::{ChainAuthError, ChainAuthErrorCode, SignerError};
use crate::infrastructure::session_store::SessionStore;
use crate::service::address_deriver::AddressDeriver;
use crate::service::signer_contract::{
    ContractViewer, SignArgs, SignerContractClient, WalletConnection,
};
use crate::utils::time_utils::{Clock, SystemClock};

type Result<T> = std::result::Result<T, ChainAuthError>;

/// 管理器事件
#[derive(Debug, Clone)]
pub enum AuthEvent {
    StateChanged(AuthState),
    Error(ChainAuthError),
}

/// 签名选项
#[derive(Debug, Clone, Default)]
pub struct SignOptions {
    /// 自定义消息（默认使用标准认证消息）
    pub message: Option<String>,
    /// 自定义派生路径（默认使用连接时的路径）
    pub derivation_path: Option<String>,
}

/// 多链认证管理器
pub struct MultiChainAuthManager {
    deriver: AddressDeriver,
    wallet: Arc<dyn WalletConnection>,
    sessions: Arc<SessionStore>,
    policy: AuthPolicyConfig,
    clock: Arc<dyn Clock>,
    state: AuthState,
    /// 当前 NEAR 账户（最近一次从钱包或会话中得到）
    account_id: Option<String>,
    events: Option<mpsc::UnboundedSender<AuthEvent>>,
}

impl MultiChainAuthManager {
    pub fn new(
        deriver: AddressDeriver,
        wallet: Arc<dyn WalletConnection>,
        sessions: Arc<SessionStore>,
        policy: AuthPolicyConfig,
    ) -> Self {
        let state = AuthState::with_chains(deriver.registry().chains());
        Self {
            deriver,
            wallet,
            sessions,
            policy,
            clock: Arc::new(SystemClock),
            state,
            account_id: None,
            events: None,
        }
    }

    /// 按应用配置组装合约客户端、派生器与管理器
    pub fn from_config(
        config: &Config,
        viewer: Arc<dyn ContractViewer>,
        wallet: Arc<dyn WalletConnection>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        let contract = SignerContractClient::from_config(viewer, &config.signer);
        let registry: Arc<ChainRegistry> = Arc::new(config.signer.chain_registry());
        let deriver = AddressDeriver::new(contract, registry);
        Self::new(deriver, wallet, sessions, config.auth.clone())
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 订阅状态变化与错误
    pub fn with_event_sink(mut self, sink: mpsc::UnboundedSender<AuthEvent>) -> Self {
        self.events = Some(sink);
        self
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 初始化与连接
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 初始化
    ///
    /// 有效会话存在时直接恢复；否则尽力为所有允许的链派生地址。
    /// 部分链失败不影响初始化，只有钱包不可用等整体失败才返回错误。
    pub async fn initialize(&mut self) -> Result<()> {
        self.state.is_connecting = true;
        self.emit_state();

        if let Some(record) = self.sessions.get() {
            tracing::info!(
                account_id = %record.account_id,
                session_id = %record.session_id,
                "Restoring multi-chain session"
            );
            self.account_id = Some(record.account_id.clone());
            record.payload.restore_into(&mut self.state);
            self.state.is_initialized = true;
            self.state.is_connecting = false;
            self.emit_state();
            return Ok(());
        }

        let accounts = match self.wallet.accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                self.state.is_connecting = false;
                self.emit_state();
                let err = ChainAuthError::connection_failed(
                    None,
                    format!("Failed to initialize multi-chain auth: {}", e),
                )
                .with_cause(SignerError::Wallet(e.to_string()));
                return Err(self.fail(err));
            }
        };

        if let Some(account) = accounts.into_iter().next() {
            let chains = self.allowed_chains();
            let derived = self.deriver.derive_many(&account, &chains).await;
            self.account_id = Some(account);
            self.apply_derived(&chains, derived);
        }

        self.state.is_initialized = true;
        self.state.is_connecting = false;
        self.emit_state();
        self.persist();

        Ok(())
    }

    /// 连接单条链
    pub async fn connect_chain(
        &mut self,
        chain: SupportedChain,
        path: Option<&str>,
    ) -> Result<DerivedAddress> {
        if let Err(err) = self.validate_chain_support(chain) {
            return Err(self.fail(err));
        }

        let connect_err = |e: SignerError| {
            ChainAuthError::connection_failed(
                Some(chain),
                format!("Failed to connect to {}: {}", chain, e),
            )
            .with_cause(e)
        };

        let account = match self.current_account().await {
            Ok(account) => account,
            Err(e) => return Err(self.fail(connect_err(e))),
        };

        let derived = match self.deriver.derive_address(&account, chain, path).await {
            Ok(derived) => derived,
            Err(e) => return Err(self.fail(connect_err(e))),
        };

        self.state.set_address(chain, derived.clone());
        if self.state.active_chain.is_none() {
            self.state.active_chain = Some(chain);
        }

        tracing::info!(chain = %chain, address = %derived.address, "Chain connected");
        self.emit_state();
        self.persist();

        Ok(derived)
    }

    /// 并发连接多条链；派生失败的链被省略
    pub async fn connect_multiple_chains(
        &mut self,
        chains: &[SupportedChain],
    ) -> Result<BTreeMap<SupportedChain, DerivedAddress>> {
        for chain in chains {
            if let Err(err) = self.validate_chain_support(*chain) {
                return Err(self.fail(err));
            }
        }

        let account = match self.current_account().await {
            Ok(account) => account,
            Err(e) => {
                let err = ChainAuthError::connection_failed(
                    None,
                    format!("Failed to connect to multiple chains: {}", e),
                )
                .with_cause(e);
                return Err(self.fail(err));
            }
        };

        let derived = self.deriver.derive_many(&account, chains).await;
        self.apply_derived(chains, derived.clone());
        self.emit_state();
        self.persist();

        Ok(derived)
    }

    /// 写入派生结果；active_chain 未设置时取请求顺序中第一个成功的链
    fn apply_derived(
        &mut self,
        requested: &[SupportedChain],
        derived: BTreeMap<SupportedChain, DerivedAddress>,
    ) {
        if self.state.active_chain.is_none() {
            self.state.active_chain = requested.iter().copied().find(|c| derived.contains_key(c));
        }
        for (chain, address) in derived {
            self.state.set_address(chain, address);
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 签名
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 为已连接的链签署认证消息
    pub async fn sign_auth_message(
        &mut self,
        chain: SupportedChain,
        opts: SignOptions,
    ) -> Result<SignatureResult> {
        if let Err(err) = self.validate_chain_support(chain) {
            return Err(self.fail(err));
        }

        let Some(derived) = self.state.address(chain).cloned() else {
            let err = ChainAuthError::signature_failed(
                chain,
                format!("Not connected to {}. Call connect_chain() first.", chain),
            );
            return Err(self.fail(err));
        };

        let sign_err = |e: SignerError| {
            ChainAuthError::signature_failed(
                chain,
                format!("Failed to sign message for {}: {}", chain, e),
            )
            .with_cause(e)
        };

        let account = match self.current_account().await {
            Ok(account) => account,
            Err(e) => return Err(self.fail(sign_err(e))),
        };

        let timestamp = self.clock.now();
        let message = opts.message.unwrap_or_else(|| {
            SignerContractClient::create_auth_message(chain, &derived.address, timestamp)
        });
        let path = opts
            .derivation_path
            .unwrap_or_else(|| derived.derivation_path.clone());

        let args = SignArgs {
            payloads: vec![SignerContractClient::message_bytes(&message)],
            path: &path,
            key_type: AddressDeriver::key_type(chain),
            signer_id: &account,
        };

        let signatures = match self.deriver.contract().sign(args, self.wallet.as_ref()).await {
            Ok(signatures) => signatures,
            Err(e) => return Err(self.fail(sign_err(e))),
        };

        let Some(signature) = signatures.into_iter().next() else {
            let err = ChainAuthError::signature_failed(
                chain,
                format!(
                    "Failed to sign message for {}: No signatures returned from MPC network",
                    chain
                ),
            );
            return Err(self.fail(err));
        };

        let result = SignatureResult {
            signature,
            chain,
            address: derived.address,
            message,
            timestamp,
        };

        self.state.signatures.insert(chain, Some(result.clone()));
        tracing::info!(chain = %chain, address = %result.address, "Authentication message signed");
        self.emit_state();
        self.persist();

        Ok(result)
    }

    /// 依次为多条链签名；失败的链被跳过
    pub async fn sign_multiple_auth_messages(
        &mut self,
        chains: &[SupportedChain],
        opts: SignOptions,
    ) -> BTreeMap<SupportedChain, SignatureResult> {
        let mut results = BTreeMap::new();

        for chain in chains {
            match self.sign_auth_message(*chain, opts.clone()).await {
                Ok(result) => {
                    results.insert(*chain, result);
                }
                Err(e) => {
                    tracing::warn!(chain = %chain, error = %e, "Skipping chain in multi-sign");
                }
            }
        }

        results
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 状态
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 是否满足认证要求
    ///
    /// 未配置多链策略时任意一条链签名即可；否则非空签名数需达到 `minimum_chains`（默认 1）。
    pub fn is_authenticated(&self) -> bool {
        let signed = self.state.signed_count();
        if !self.policy.has_multi_chain_policy() {
            return signed > 0;
        }
        signed >= self.policy.minimum_chains.unwrap_or(1)
    }

    pub fn is_chain_authenticated(&self, chain: SupportedChain) -> bool {
        self.state.signature(chain).is_some()
    }

    /// 切换活跃链（只改内存状态）
    pub fn switch_active_chain(&mut self, chain: SupportedChain) -> Result<()> {
        if let Err(err) = self.validate_chain_support(chain) {
            let message = err.message.clone();
            return Err(self.fail(err.recode(ChainAuthErrorCode::ChainSwitchFailed, message)));
        }

        if !self.state.is_connected(chain) {
            let err = ChainAuthError::switch_failed(
                chain,
                format!("Not connected to {}. Call connect_chain() first.", chain),
            );
            return Err(self.fail(err));
        }

        self.state.active_chain = Some(chain);
        self.emit_state();
        Ok(())
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn chain_address(&self, chain: SupportedChain) -> Option<&DerivedAddress> {
        self.state.address(chain)
    }

    pub fn chain_signature(&self, chain: SupportedChain) -> Option<&SignatureResult> {
        self.state.signature(chain)
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    /// 清空所有链状态与持久化会话（幂等）
    pub fn logout(&mut self) {
        self.state.reset();
        self.account_id = None;
        self.sessions.clear();
        tracing::info!("Multi-chain auth logged out");
        self.emit_state();
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 内部
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn allowed_chains(&self) -> Vec<SupportedChain> {
        let registry = self.deriver.registry();
        match &self.policy.allowed_chains {
            Some(allowed) => allowed
                .iter()
                .copied()
                .filter(|c| registry.contains(*c))
                .collect(),
            None => registry.chains(),
        }
    }

    fn validate_chain_support(&self, chain: SupportedChain) -> Result<()> {
        if !self.deriver.registry().contains(chain) {
            return Err(ChainAuthError::chain_not_supported(
                chain,
                format!("Chain {} is not supported", chain),
            ));
        }

        if let Some(allowed) = &self.policy.allowed_chains {
            if !allowed.contains(&chain) {
                return Err(ChainAuthError::chain_not_supported(
                    chain,
                    format!("Chain {} is not allowed by configuration", chain),
                ));
            }
        }

        Ok(())
    }

    async fn current_account(&mut self) -> std::result::Result<String, SignerError> {
        let accounts = self
            .wallet
            .accounts()
            .await
            .map_err(|e| SignerError::Wallet(e.to_string()))?;
        let account = accounts
            .into_iter()
            .next()
            .ok_or(SignerError::WalletNotConnected)?;
        self.account_id = Some(account.clone());
        Ok(account)
    }

    /// 写入会话快照；失败只记录日志
    fn persist(&self) {
        let Some(account) = &self.account_id else {
            return;
        };

        if let Err(e) = self
            .sessions
            .save_payload(account, SessionPayload::from(&self.state))
        {
            tracing::warn!(error = ?e, account_id = %account, "Failed to save multi-chain session");
        }
    }

    fn emit_state(&self) {
        if let Some(sink) = &self.events {
            let _ = sink.send(AuthEvent::StateChanged(self.state.clone()));
        }
    }

    /// 记录并转发错误，原样返回
    fn fail(&self, err: ChainAuthError) -> ChainAuthError {
        tracing::error!(
            code = err.code.as_str(),
            chain = ?err.chain,
            message = %err.message,
            "Multi-chain auth error"
        );
        if let Some(sink) = &self.events {
            let _ = sink.send(AuthEvent::Error(err.clone()));
        }
        err
    }
}
