//! 时间工具模块
//! 提供时间处理相关的工具函数与可替换的时钟

use std::sync::Mutex;

use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};

/// 时钟抽象：会话有效期判断统一从这里取当前时间
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动推进的时钟（测试用）
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// 前进指定时长
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// ISO-8601 / RFC3339，毫秒精度，`Z` 结尾（如 `2024-01-01T00:00:00.000Z`）
pub fn format_iso8601_millis(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// 毫秒时间戳转 UTC 时间
pub fn from_timestamp_ms(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// 毫秒转 chrono::Duration
pub fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

/// 可写入存储的最晚时间（四位年份）
pub fn latest_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// 时间加毫秒，溢出或超过 [`latest_timestamp`] 时取后者
pub fn saturating_add_millis(at: DateTime<Utc>, ms: u64) -> DateTime<Utc> {
    let latest = latest_timestamp();
    at.checked_add_signed(millis(ms))
        .filter(|t| *t <= latest)
        .unwrap_or(latest)
}
