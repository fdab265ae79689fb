//! MPC 签名合约客户端
//!
//! 对 NEAR 上的 chain-signature 合约做三件事：
//! - view `public_key` / `derived_public_key` 获取根公钥与派生公钥
//! - 通过已连接钱包提交 `sign` 交易
//! - 从交易执行结果中解析 (r, s, v) 签名
//!
//! 每次 `sign` 都是一笔真实交易，这里不做任何重试。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{NetworkId, SignerConfig, NEAR_MAX_GAS};
use crate::domain::auth_state::RsvSignature;
use crate::domain::chain_config::{KeyType, SupportedChain};
use crate::error::SignerError;
use crate::utils::time_utils::format_iso8601_millis;

type Result<T> = std::result::Result<T, SignerError>;

/// 65 字节签名的 hex 长度
const RSV_HEX_LEN: usize = 130;

static SIGNATURE_LOG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"signature:\s*([a-fA-F0-9]+)").unwrap());

/// 合约只读调用
#[async_trait]
pub trait ContractViewer: Send + Sync {
    async fn view(&self, contract_id: &str, method: &str, args: Value) -> anyhow::Result<Value>;
}

/// 已连接的 NEAR 钱包（由外部组件提供）
#[async_trait]
pub trait WalletConnection: Send + Sync {
    /// 已连接账户列表，第一个为当前账户
    async fn accounts(&self) -> anyhow::Result<Vec<String>>;

    /// 签名并发送一批函数调用交易，按顺序返回每笔交易的执行结果
    async fn sign_and_send_transactions(
        &self,
        transactions: Vec<FunctionCallTransaction>,
    ) -> anyhow::Result<Vec<Value>>;
}

/// 单个 FunctionCall 交易
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallTransaction {
    pub signer_id: String,
    pub receiver_id: String,
    pub method_name: String,
    pub args: Value,
    pub gas: u64,
    /// yoctoNEAR
    pub deposit: String,
}

/// 签名请求参数
#[derive(Debug, Clone)]
pub struct SignArgs<'a> {
    /// 待签名载荷（原始字节）
    pub payloads: Vec<Vec<u8>>,
    pub path: &'a str,
    pub key_type: KeyType,
    /// 发起交易的 NEAR 账户
    pub signer_id: &'a str,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// NEAR JSON-RPC view 实现
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 通过 NEAR JSON-RPC `query` / `call_function` 执行 view 调用
pub struct NearRpcViewer {
    http_client: reqwest::Client,
    rpc_url: String,
}

impl NearRpcViewer {
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client: client,
            rpc_url: rpc_url.into(),
        }
    }

    pub fn from_config(config: &SignerConfig) -> Self {
        Self::new(
            config.rpc_url(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }
}

#[async_trait]
impl ContractViewer for NearRpcViewer {
    async fn view(&self, contract_id: &str, method: &str, args: Value) -> anyhow::Result<Value> {
        let args_json = serde_json::to_vec(&args).context("Failed to encode view args")?;
        let payload = json!({
            "jsonrpc": "2.0",
            "id": "chainsig-auth",
            "method": "query",
            "params": {
                "request_type": "call_function",
                "finality": "final",
                "account_id": contract_id,
                "method_name": method,
                "args_base64": base64::engine::general_purpose::STANDARD.encode(args_json),
            }
        });

        tracing::debug!(contract = %contract_id, method = %method, "NEAR view call");

        let response = self
            .http_client
            .post(&self.rpc_url)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .context("Failed to send RPC request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            anyhow::bail!("RPC request failed with status {}: {}", status, body);
        }

        let json: Value = serde_json::from_str(&body).context("Failed to parse JSON response")?;

        // 检查 JSON-RPC 错误
        if let Some(error) = json.get("error") {
            let error_msg = error
                .get("data")
                .or_else(|| error.get("message"))
                .map(|m| m.to_string())
                .unwrap_or_else(|| "Unknown RPC error".to_string());
            anyhow::bail!("RPC error: {}", error_msg);
        }

        let result = json.get("result").context("Missing result field in RPC response")?;

        // 合约执行错误以 result.error 字符串返回
        if let Some(err) = result.get("error").and_then(|e| e.as_str()) {
            anyhow::bail!("Contract view failed: {}", err);
        }

        let bytes: Vec<u8> = result
            .get("result")
            .and_then(|r| r.as_array())
            .context("Missing result bytes in view response")?
            .iter()
            .map(|b| {
                b.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .context("Invalid byte in view response")
            })
            .collect::<anyhow::Result<_>>()?;

        serde_json::from_slice(&bytes).context("View result is not valid JSON")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 合约客户端
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// MPC 签名合约客户端
#[derive(Clone)]
pub struct SignerContractClient {
    viewer: Arc<dyn ContractViewer>,
    contract_id: String,
    gas: u64,
    deposit: String,
}

impl SignerContractClient {
    pub fn new(viewer: Arc<dyn ContractViewer>, contract_id: impl Into<String>) -> Self {
        Self {
            viewer,
            contract_id: contract_id.into(),
            gas: NEAR_MAX_GAS,
            deposit: "1".to_string(),
        }
    }

    /// 按网络选择默认合约，`custom_contract` 优先
    pub fn for_network(
        viewer: Arc<dyn ContractViewer>,
        network_id: NetworkId,
        custom_contract: Option<&str>,
    ) -> Self {
        let contract_id = custom_contract.unwrap_or_else(|| network_id.default_contract());
        Self::new(viewer, contract_id)
    }

    pub fn from_config(viewer: Arc<dyn ContractViewer>, config: &SignerConfig) -> Self {
        Self {
            viewer,
            contract_id: config.contract_id(),
            gas: config.gas,
            deposit: config.deposit.clone(),
        }
    }

    pub fn contract_id(&self) -> &str {
        &self.contract_id
    }

    /// 根公钥
    pub async fn get_master_public_key(&self) -> Result<String> {
        let value = self
            .viewer
            .view(&self.contract_id, "public_key", json!({}))
            .await
            .map_err(|e| {
                tracing::warn!(error = ?e, contract = %self.contract_id, "public_key view failed");
                SignerError::contract_call("public_key", format!("Failed to get master public key: {}", e))
            })?;

        value.as_str().map(str::to_string).ok_or_else(|| {
            SignerError::contract_call("public_key", "Failed to get master public key: result is not a string")
        })
    }

    /// 派生公钥
    ///
    /// 同一 (path, predecessor) 总是得到同一个公钥。`is_ed25519` 时补全 `ed25519:` 标签。
    pub async fn get_derived_public_key(
        &self,
        path: &str,
        predecessor: &str,
        is_ed25519: bool,
    ) -> Result<String> {
        let args = json!({ "path": path, "predecessor": predecessor });
        let value = self
            .viewer
            .view(&self.contract_id, "derived_public_key", args)
            .await
            .map_err(|e| {
                tracing::warn!(
                    error = ?e,
                    contract = %self.contract_id,
                    path = %path,
                    predecessor = %predecessor,
                    "derived_public_key view failed"
                );
                SignerError::contract_call(
                    "derived_public_key",
                    format!("Failed to get derived public key: {}", e),
                )
            })?;

        let key = value.as_str().ok_or_else(|| {
            SignerError::contract_call(
                "derived_public_key",
                "Failed to get derived public key: result is not a string",
            )
        })?;

        if is_ed25519 && !key.starts_with("ed25519:") {
            Ok(format!("ed25519:{}", key))
        } else {
            Ok(key.to_string())
        }
    }

    /// 构造 `sign` 交易（每个载荷一笔）
    pub fn build_sign_transactions(&self, args: &SignArgs<'_>) -> Vec<FunctionCallTransaction> {
        args.payloads
            .iter()
            .map(|payload| {
                let mut payload_v2 = serde_json::Map::new();
                payload_v2.insert(
                    args.key_type.as_str().to_string(),
                    Value::String(hex::encode(payload)),
                );

                FunctionCallTransaction {
                    signer_id: args.signer_id.to_string(),
                    receiver_id: self.contract_id.clone(),
                    method_name: "sign".to_string(),
                    args: json!({
                        "request": {
                            "payload_v2": payload_v2,
                            "path": args.path,
                            "domain_id": args.key_type.domain_id(),
                        }
                    }),
                    gas: self.gas,
                    deposit: self.deposit.clone(),
                }
            })
            .collect()
    }

    /// 请求 MPC 签名，返回与载荷一一对应的签名
    pub async fn sign(
        &self,
        args: SignArgs<'_>,
        wallet: &dyn WalletConnection,
    ) -> Result<Vec<RsvSignature>> {
        let transactions = self.build_sign_transactions(&args);
        tracing::info!(
            contract = %self.contract_id,
            path = %args.path,
            key_type = args.key_type.as_str(),
            count = transactions.len(),
            "Requesting MPC signatures"
        );

        let outcomes = wallet
            .sign_and_send_transactions(transactions)
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, "MPC signature request failed");
                SignerError::contract_call(
                    "sign",
                    format!("Failed to request signatures from MPC network: {}", e),
                )
            })?;

        outcomes
            .iter()
            .map(Self::parse_signature_from_outcome)
            .collect()
    }

    /// 从交易执行结果中提取签名
    ///
    /// 优先级：JSON 日志的 `signature` 字段 → 文本日志 `signature:<hex>` → 顶层 `signature` 字段。
    /// 第一个命中的候选决定结果。
    pub fn parse_signature_from_outcome(outcome: &Value) -> Result<RsvSignature> {
        for log in outcome_logs(outcome) {
            match serde_json::from_str::<Value>(log) {
                Ok(parsed) => {
                    if let Some(sig) = parsed.get("signature").and_then(|s| s.as_str()) {
                        return Self::parse_rsv(sig);
                    }
                }
                Err(_) => {
                    if let Some(caps) = SIGNATURE_LOG_RE.captures(log) {
                        return Self::parse_rsv(&caps[1]);
                    }
                }
            }
        }

        if let Some(sig) = outcome.get("signature").and_then(|s| s.as_str()) {
            return Self::parse_rsv(sig);
        }

        Err(SignerError::SignatureParse(
            "No signature found in MPC response".to_string(),
        ))
    }

    /// 130 位 hex（可带 `0x`）拆分为 r / s / v
    pub fn parse_rsv(hex_sig: &str) -> Result<RsvSignature> {
        let clean = hex_sig.strip_prefix("0x").unwrap_or(hex_sig);
        if clean.len() != RSV_HEX_LEN {
            return Err(SignerError::InvalidSignatureLength(clean.len()));
        }
        if !clean.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SignerError::SignatureParse(
                "signature contains non-hex characters".to_string(),
            ));
        }

        let v = u8::from_str_radix(&clean[128..130], 16)
            .map_err(|e| SignerError::SignatureParse(format!("invalid v: {}", e)))?;

        Ok(RsvSignature {
            r: clean[0..64].to_string(),
            s: clean[64..128].to_string(),
            v,
        })
    }

    /// 标准认证消息
    pub fn create_auth_message(
        chain: SupportedChain,
        address: &str,
        timestamp: DateTime<Utc>,
    ) -> String {
        format!(
            "Authenticate with {} wallet {} at {}",
            chain,
            address,
            format_iso8601_millis(&timestamp)
        )
    }

    /// 待签名字节：消息的 UTF-8 原文，不做哈希
    pub fn message_bytes(message: &str) -> Vec<u8> {
        message.as_bytes().to_vec()
    }
}

/// 收集执行结果中的所有日志（按出现顺序）
fn outcome_logs(outcome: &Value) -> Vec<&str> {
    let mut logs = Vec::new();

    push_logs(&mut logs, outcome.get("receipt_outcome"));
    if let Some(receipts) = outcome.get("receipts_outcome").and_then(|r| r.as_array()) {
        for receipt in receipts {
            push_logs(&mut logs, Some(receipt));
        }
    }
    push_logs(&mut logs, outcome.get("transaction_outcome"));

    logs
}

fn push_logs<'a>(logs: &mut Vec<&'a str>, node: Option<&'a Value>) {
    if let Some(arr) = node
        .and_then(|n| n.get("outcome"))
        .and_then(|o| o.get("logs"))
        .and_then(|l| l.as_array())
    {
        logs.extend(arr.iter().filter_map(|l| l.as_str()));
    }
}
