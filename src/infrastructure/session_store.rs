//! 会话存储
//!
//! 客户端侧的限时会话缓存：
//! - 写入时打时间戳、session id、设备指纹与 IP，序列化后用设备密钥加密
//! - 读取时总是重新校验，任何失败都清除存储并返回 `None`
//! - 违规事件通过 mpsc 通道上报
//!
//! 并发会话检测依赖 `{storage_key}-check` 标记，只是存储轮询，不是锁。

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::SessionSecurityConfig;
use crate::domain::session::{
    SecurityViolation, SessionPayload, SessionRecord, ViolationType, SESSION_VERSION,
};
use crate::infrastructure::encryption::{open_from_string, seal_to_string, EncryptionKey};
use crate::infrastructure::fingerprint::{EnvironmentProbe, HostProbe};
use crate::infrastructure::storage::{FileStorage, MemoryStorage, StorageBackend};
use crate::utils::time_utils::{millis, saturating_add_millis, Clock, SystemClock};

/// 并发检测标记
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConcurrentMarker {
    session_id: String,
    writer_id: String,
    written_at: DateTime<Utc>,
}

/// 会话存储
pub struct SessionStore {
    config: SessionSecurityConfig,
    storage: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    probe: Arc<dyn EnvironmentProbe>,
    /// 本实例的写入者标识
    writer_id: String,
    /// 本实例最近一次写入的 session id
    owned_session: Mutex<Option<String>>,
    violations: Option<mpsc::UnboundedSender<SecurityViolation>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl SessionStore {
    pub fn new(
        config: SessionSecurityConfig,
        storage: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        probe: Arc<dyn EnvironmentProbe>,
    ) -> Self {
        Self {
            config,
            storage,
            clock,
            probe,
            writer_id: uuid::Uuid::new_v4().to_string(),
            owned_session: Mutex::new(None),
            violations: None,
            timer: Mutex::new(None),
        }
    }

    /// 按配置选择存储作用域，使用系统时钟与本机环境
    pub fn from_config(config: SessionSecurityConfig) -> Result<Self> {
        let storage: Arc<dyn StorageBackend> = if config.secure_storage {
            Arc::new(MemoryStorage::new())
        } else {
            Arc::new(
                FileStorage::new(&config.storage_dir)
                    .context("Failed to open persistent session storage")?,
            )
        };

        Ok(Self::new(
            config,
            storage,
            Arc::new(SystemClock),
            Arc::new(HostProbe),
        ))
    }

    /// 设置违规事件接收端
    pub fn with_violation_sink(mut self, sink: mpsc::UnboundedSender<SecurityViolation>) -> Self {
        self.violations = Some(sink);
        self
    }

    pub fn config(&self) -> &SessionSecurityConfig {
        &self.config
    }

    fn check_key(&self) -> String {
        format!("{}-check", self.config.storage_key)
    }

    fn device_key(&self) -> EncryptionKey {
        EncryptionKey::derive_device_key(
            &self.probe.environment().fingerprint(),
            &self.config.storage_key,
        )
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 写入
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 保存会话
    ///
    /// 写入 last_activity、expires_at、session_id（为空时生成）、指纹与 IP。
    /// 返回实际写入的记录。
    pub fn save(&self, mut record: SessionRecord) -> Result<SessionRecord> {
        let now = self.clock.now();
        let env = self.probe.environment();

        if record.session_id.is_empty() {
            record.session_id = uuid::Uuid::new_v4().to_string();
        }
        if record.created_at > now {
            record.created_at = now;
        }
        record.last_activity = now;
        // 最长寿命为 0 时仍保证 expires_at > created_at
        record.expires_at = saturating_add_millis(record.created_at, self.config.max_age_ms.max(1));
        record.device_fingerprint = self
            .config
            .device_fingerprinting
            .then(|| env.fingerprint());
        record.ip_address = if self.config.bind_to_ip {
            env.ip_address.clone()
        } else {
            None
        };
        record.version = SESSION_VERSION.to_string();

        let encoded = self.encode(&record)?;
        self.storage
            .set(&self.config.storage_key, &encoded)
            .context("Failed to write session")?;

        if self.config.prevent_concurrent {
            let marker = ConcurrentMarker {
                session_id: record.session_id.clone(),
                writer_id: self.writer_id.clone(),
                written_at: now,
            };
            let marker = serde_json::to_string(&marker).context("Failed to encode session marker")?;
            self.storage
                .set(&self.check_key(), &marker)
                .context("Failed to write session marker")?;
        }

        if let Ok(mut owned) = self.owned_session.lock() {
            *owned = Some(record.session_id.clone());
        }

        tracing::debug!(
            session_id = %record.session_id,
            account_id = %record.account_id,
            expires_at = %record.expires_at,
            "Session saved"
        );

        Ok(record)
    }

    /// 保存认证快照
    ///
    /// 同一账户的有效会话沿用原 created_at / session_id / refresh_count。
    pub fn save_payload(&self, account_id: &str, payload: SessionPayload) -> Result<SessionRecord> {
        let record = match self.get() {
            Some(mut existing) if existing.account_id == account_id => {
                existing.payload = payload;
                existing
            }
            _ => SessionRecord::new(account_id, payload, self.clock.now()),
        };
        self.save(record)
    }

    fn encode(&self, record: &SessionRecord) -> Result<String> {
        let json = serde_json::to_vec(record).context("Failed to serialize session")?;
        if self.config.encrypt_storage {
            seal_to_string(&json, &self.device_key())
        } else {
            Ok(base64::engine::general_purpose::STANDARD.encode(json))
        }
    }

    fn open(&self, raw: &str) -> Result<Vec<u8>> {
        if self.config.encrypt_storage {
            open_from_string(raw, &self.device_key())
        } else {
            base64::engine::general_purpose::STANDARD
                .decode(raw.trim())
                .context("Session is not valid base64")
        }
    }

    fn parse(json: &[u8]) -> Result<SessionRecord> {
        let record: SessionRecord =
            serde_json::from_slice(json).context("Failed to deserialize session")?;

        if record.version != SESSION_VERSION {
            anyhow::bail!("Unsupported session version: {}", record.version);
        }
        if record.expires_at <= record.created_at {
            anyhow::bail!("Session expires_at is not after created_at");
        }

        Ok(record)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 读取与校验
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 读取当前会话；任何失败都清除存储并返回 `None`
    pub fn get(&self) -> Option<SessionRecord> {
        let raw = match self.storage.get(&self.config.storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = ?e, "Failed to read session, clearing");
                self.clear();
                return None;
            }
        };

        let json = match self.open(&raw) {
            Ok(json) => json,
            Err(e) => {
                if self.config.encrypt_storage && self.config.device_fingerprinting {
                    // 设备密钥由指纹派生，无法解密即指纹已变
                    self.report(&SecurityViolation::new(
                        ViolationType::DeviceMismatch,
                        "Session cannot be opened on this device".to_string(),
                        self.clock.now(),
                    ));
                } else {
                    tracing::warn!(error = ?e, "Stored session is unreadable, clearing");
                }
                self.clear();
                return None;
            }
        };

        let record = match Self::parse(&json) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = ?e, "Stored session is unreadable, clearing");
                self.clear();
                return None;
            }
        };

        match self.validate(&record) {
            Ok(()) => Some(record),
            Err(_) => {
                self.clear();
                None
            }
        }
    }

    pub fn is_session_valid(&self) -> bool {
        self.get().is_some()
    }

    /// 按顺序校验：最长寿命 → 空闲 → 设备指纹 → IP → 重新认证 → 并发
    ///
    /// 第一个违规被上报；device_mismatch / session_expired / concurrent_session 自动清除会话。
    pub fn validate(&self, record: &SessionRecord) -> std::result::Result<(), SecurityViolation> {
        match self.find_violation(record) {
            None => Ok(()),
            Some(violation) => {
                self.report(&violation);
                Err(violation)
            }
        }
    }

    fn find_violation(&self, record: &SessionRecord) -> Option<SecurityViolation> {
        let now = self.clock.now();
        let violation = |kind, message: String| Some(SecurityViolation::new(kind, message, now));

        let age = now.signed_duration_since(record.created_at);
        if now >= record.expires_at || age >= millis(self.config.max_age_ms) {
            return violation(
                ViolationType::SessionExpired,
                format!("Session expired at {}", record.expires_at),
            );
        }

        let idle = now.signed_duration_since(record.last_activity);
        if idle > millis(self.config.idle_timeout_ms) {
            return violation(
                ViolationType::IdleTimeout,
                format!("Session idle for {}ms", idle.num_milliseconds()),
            );
        }

        if self.config.device_fingerprinting || self.config.bind_to_ip {
            let env = self.probe.environment();

            if self.config.device_fingerprinting
                && record.device_fingerprint.as_deref() != Some(env.fingerprint().as_str())
            {
                return violation(
                    ViolationType::DeviceMismatch,
                    "Device fingerprint does not match session".to_string(),
                );
            }

            if self.config.bind_to_ip && record.ip_address != env.ip_address {
                return violation(
                    ViolationType::IpMismatch,
                    "Client IP does not match session".to_string(),
                );
            }
        }

        if let Some(reauth_ms) = self.config.require_reauth_ms {
            if age > millis(reauth_ms) {
                return violation(
                    ViolationType::ReauthRequired,
                    format!("Re-authentication required after {}ms", reauth_ms),
                );
            }
        }

        if self.config.prevent_concurrent {
            if let Some(message) = self.concurrent_conflict(record) {
                return violation(ViolationType::ConcurrentSession, message);
            }
        }

        None
    }

    /// 标记与会话不一致，或本实例写过会话但最后写入者是别人
    fn concurrent_conflict(&self, record: &SessionRecord) -> Option<String> {
        let marker = match self.storage.get(&self.check_key()) {
            Ok(Some(raw)) => serde_json::from_str::<ConcurrentMarker>(&raw).ok()?,
            _ => return None,
        };

        if marker.session_id != record.session_id {
            return Some("Session marker belongs to a different session".to_string());
        }

        let owns_session = self
            .owned_session
            .lock()
            .map(|owned| owned.is_some())
            .unwrap_or(false);
        if owns_session && marker.writer_id != self.writer_id {
            return Some(format!(
                "Session was rewritten by another writer at {}",
                marker.written_at
            ));
        }

        None
    }

    fn report(&self, violation: &SecurityViolation) {
        tracing::warn!(
            violation = %violation.kind,
            message = %violation.message,
            "Session security violation"
        );

        if let Some(sink) = &self.violations {
            let _ = sink.send(violation.clone());
        }

        if violation.kind.auto_clears() {
            self.clear();
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 生命周期
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 刷新活动时间；没有有效会话时返回 `false`
    pub fn refresh(&self) -> Result<bool> {
        let Some(mut record) = self.get() else {
            return Ok(false);
        };

        record.refresh_count += 1;
        if self.config.rotate_tokens {
            record.session_id = uuid::Uuid::new_v4().to_string();
        }

        self.save(record)?;
        Ok(true)
    }

    /// 清除会话与并发标记
    pub fn clear(&self) {
        if let Err(e) = self.storage.remove(&self.config.storage_key) {
            tracing::warn!(error = ?e, "Failed to remove session");
        }
        if let Err(e) = self.storage.remove(&self.check_key()) {
            tracing::warn!(error = ?e, "Failed to remove session marker");
        }
        if let Ok(mut owned) = self.owned_session.lock() {
            *owned = None;
        }
    }

    /// 启动周期校验任务（需要 tokio 运行时）
    ///
    /// 任务只持有弱引用，store 释放后自动退出。未配置间隔时返回 `false`。
    pub fn start_validation_timer(self: &Arc<Self>) -> bool {
        let Some(interval_ms) = self.config.validate_interval_ms.filter(|ms| *ms > 0) else {
            return false;
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        let period = StdDuration::from_millis(interval_ms);
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    break;
                };
                // get 内部完成校验、上报与清除
                let _ = store.get();
            }
        });

        if let Ok(mut timer) = self.timer.lock() {
            if let Some(previous) = timer.replace(handle) {
                previous.abort();
            }
        }

        tracing::debug!(interval_ms, "Session validation timer started");
        true
    }

    /// 停止周期校验并清除会话
    pub fn destroy(&self) {
        self.stop_timer();
        self.clear();
    }

    fn stop_timer(&self) {
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.stop_timer();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::infrastructure::fingerprint::{DeviceEnvironment, StaticProbe};
    use crate::utils::time_utils::{from_timestamp_ms, ManualClock};

    fn config() -> SessionSecurityConfig {
        SessionSecurityConfig {
            max_age_ms: 60 * 60 * 1000,
            idle_timeout_ms: 10 * 60 * 1000,
            device_fingerprinting: false,
            bind_to_ip: false,
            require_reauth_ms: None,
            encrypt_storage: true,
            secure_storage: true,
            validate_interval_ms: None,
            rotate_tokens: false,
            prevent_concurrent: false,
            storage_key: "test-session".to_string(),
            storage_dir: String::new(),
        }
    }

    fn env(ip: &str) -> DeviceEnvironment {
        DeviceEnvironment {
            user_agent: "test-agent".into(),
            locale: "en-US".into(),
            screen: "800x600x24".into(),
            timezone: "UTC".into(),
            hardware_concurrency: 4,
            render_signature: "sig".into(),
            ip_address: Some(ip.into()),
        }
    }

    struct Fixture {
        store: SessionStore,
        storage: Arc<MemoryStorage>,
        clock: Arc<ManualClock>,
    }

    fn fixture(config: SessionSecurityConfig) -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(from_timestamp_ms(1_700_000_000_000).unwrap()));
        let store = SessionStore::new(
            config,
            storage.clone(),
            clock.clone(),
            Arc::new(StaticProbe(env("10.0.0.1"))),
        );
        Fixture {
            store,
            storage,
            clock,
        }
    }

    fn record(f: &Fixture) -> SessionRecord {
        SessionRecord::new("alice.near", SessionPayload::default(), f.clock.now())
    }

    #[test]
    fn test_save_and_get() {
        let f = fixture(config());
        let saved = f.store.save(record(&f)).unwrap();
        assert!(!saved.session_id.is_empty());
        assert!(saved.expires_at > saved.created_at);

        let raw = f.storage.get("test-session").unwrap().unwrap();
        assert!(!raw.contains("alice.near"));

        assert_eq!(f.store.get(), Some(saved));
    }

    #[test]
    fn test_zero_max_age_expires_immediately() {
        let mut cfg = config();
        cfg.max_age_ms = 0;
        let f = fixture(cfg);

        let saved = f.store.save(record(&f)).unwrap();
        assert_eq!(saved.expires_at, saved.created_at + Duration::milliseconds(1));
        assert_eq!(f.store.get(), None);
        assert_eq!(f.storage.get("test-session").unwrap(), None);
    }

    #[test]
    fn test_idle_timeout_clears_on_read() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut f = fixture(config());
        f.store = f.store.with_violation_sink(tx);

        f.store.save(record(&f)).unwrap();
        f.clock.advance(Duration::minutes(11));

        assert_eq!(f.store.get(), None);
        assert_eq!(rx.try_recv().unwrap().kind, ViolationType::IdleTimeout);
        assert_eq!(f.storage.get("test-session").unwrap(), None);
    }

    #[test]
    fn test_refresh_extends_idle_window_and_rotates() {
        let mut cfg = config();
        cfg.rotate_tokens = true;
        let f = fixture(cfg);

        assert!(!f.store.refresh().unwrap());

        let saved = f.store.save(record(&f)).unwrap();
        f.clock.advance(Duration::minutes(9));
        assert!(f.store.refresh().unwrap());
        f.clock.advance(Duration::minutes(9));

        let current = f.store.get().unwrap();
        assert_eq!(current.refresh_count, 1);
        assert_ne!(current.session_id, saved.session_id);
        assert_eq!(current.created_at, saved.created_at);
    }

    #[test]
    fn test_device_mismatch() {
        let mut cfg = config();
        cfg.device_fingerprinting = true;
        cfg.encrypt_storage = false;
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let writer = SessionStore::new(
            cfg.clone(),
            storage.clone(),
            clock.clone(),
            Arc::new(StaticProbe(env("10.0.0.1"))),
        );
        let mut other_env = env("10.0.0.1");
        other_env.screen = "1024x768x24".into();
        let reader = SessionStore::new(cfg, storage.clone(), clock.clone(), Arc::new(StaticProbe(other_env)));

        writer
            .save(SessionRecord::new("alice.near", SessionPayload::default(), clock.now()))
            .unwrap();
        let stored = writer.get().unwrap();
        assert!(stored.device_fingerprint.is_some());

        assert_eq!(
            reader.validate(&stored).unwrap_err().kind,
            ViolationType::DeviceMismatch
        );
        // 自动清除
        assert_eq!(storage.get("test-session").unwrap(), None);
    }

    #[test]
    fn test_device_change_with_encrypted_storage_reports_mismatch() {
        let mut cfg = config();
        cfg.device_fingerprinting = true;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let writer = SessionStore::new(
            cfg.clone(),
            storage.clone(),
            clock.clone(),
            Arc::new(StaticProbe(env("10.0.0.1"))),
        );
        let mut other_env = env("10.0.0.1");
        other_env.screen = "1024x768x24".into();
        let reader = SessionStore::new(cfg, storage.clone(), clock.clone(), Arc::new(StaticProbe(other_env)))
            .with_violation_sink(tx);

        writer
            .save(SessionRecord::new("alice.near", SessionPayload::default(), clock.now()))
            .unwrap();
        assert!(writer.get().is_some());

        assert_eq!(reader.get(), None);
        assert_eq!(rx.try_recv().unwrap().kind, ViolationType::DeviceMismatch);
        assert!(rx.try_recv().is_err());
        assert_eq!(storage.get("test-session").unwrap(), None);
    }

    #[test]
    fn test_unbounded_max_age_saturates() {
        let mut cfg = config();
        cfg.max_age_ms = u64::MAX;
        cfg.idle_timeout_ms = u64::MAX;
        let f = fixture(cfg);

        let saved = f.store.save(record(&f)).unwrap();
        assert_eq!(saved.expires_at, crate::utils::time_utils::latest_timestamp());

        f.clock.advance(Duration::days(3650));
        assert!(f.store.refresh().unwrap());
        assert_eq!(f.store.get().map(|r| r.session_id), Some(saved.session_id));
    }

    #[test]
    fn test_ip_mismatch_reported() {
        let mut cfg = config();
        cfg.bind_to_ip = true;
        let f = fixture(cfg);
        let mut saved = f.store.save(record(&f)).unwrap();
        assert_eq!(saved.ip_address.as_deref(), Some("10.0.0.1"));

        saved.ip_address = Some("192.168.1.1".into());
        assert_eq!(f.store.validate(&saved).unwrap_err().kind, ViolationType::IpMismatch);
        // ip_mismatch 不自动清除
        assert!(f.storage.get("test-session").unwrap().is_some());
    }

    #[test]
    fn test_reauth_required() {
        let mut cfg = config();
        cfg.require_reauth_ms = Some(5 * 60 * 1000);
        let f = fixture(cfg);
        f.store.save(record(&f)).unwrap();

        f.clock.advance(Duration::minutes(4));
        assert!(f.store.refresh().unwrap());
        f.clock.advance(Duration::minutes(2));
        assert_eq!(f.store.get(), None);
    }

    #[test]
    fn test_concurrent_writer_detected() {
        let mut cfg = config();
        cfg.prevent_concurrent = true;
        cfg.encrypt_storage = false;
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let probe = Arc::new(StaticProbe(env("10.0.0.1")));

        let a = SessionStore::new(cfg.clone(), storage.clone(), clock.clone(), probe.clone());
        let b = SessionStore::new(cfg, storage.clone(), clock.clone(), probe);

        a.save(SessionRecord::new("alice.near", SessionPayload::default(), clock.now()))
            .unwrap();
        assert!(a.get().is_some());

        b.save(SessionRecord::new("alice.near", SessionPayload::default(), clock.now()))
            .unwrap();
        assert_eq!(a.get(), None);
        assert_eq!(storage.get("test-session-check").unwrap(), None);
    }

    #[test]
    fn test_tampered_session_fails_closed() {
        let f = fixture(config());
        f.store.save(record(&f)).unwrap();
        f.storage.set("test-session", "AAAAAAAAAAAAAAAAAAAAAAAA").unwrap();
        assert_eq!(f.store.get(), None);
        assert_eq!(f.storage.get("test-session").unwrap(), None);
    }

    #[test]
    fn test_save_payload_keeps_session_identity() {
        let f = fixture(config());
        let first = f.store.save_payload("alice.near", SessionPayload::default()).unwrap();
        f.clock.advance(Duration::minutes(1));
        let second = f.store.save_payload("alice.near", SessionPayload::default()).unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(first.created_at, second.created_at);
        assert!(second.last_activity > first.last_activity);

        let other = f.store.save_payload("bob.near", SessionPayload::default()).unwrap();
        assert_ne!(other.session_id, first.session_id);
    }

    #[tokio::test]
    async fn test_validation_timer_clears_expired_session() {
        let mut cfg = config();
        cfg.validate_interval_ms = Some(20);
        let f = fixture(cfg);
        let store = Arc::new(f.store);

        store
            .save(SessionRecord::new("alice.near", SessionPayload::default(), f.clock.now()))
            .unwrap();
        assert!(store.start_validation_timer());

        f.clock.advance(Duration::hours(2));
        tokio::time::sleep(StdDuration::from_millis(100)).await;

        assert_eq!(f.storage.get("test-session").unwrap(), None);
        store.destroy();
    }
}
