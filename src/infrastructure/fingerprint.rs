//! 设备指纹
//!
//! 对运行环境属性做非加密哈希。只用于增加会话被搬到其它设备后的使用门槛，
//! 不是安全边界。

use serde::{Deserialize, Serialize};

/// 运行环境属性
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEnvironment {
    pub user_agent: String,
    pub locale: String,
    /// 形如 `1920x1080x24`
    pub screen: String,
    pub timezone: String,
    pub hardware_concurrency: u32,
    /// 渲染特征（浏览器中通常来自 canvas）
    pub render_signature: String,
    /// 客户端 IP（仅在绑定 IP 时使用）
    pub ip_address: Option<String>,
}

impl DeviceEnvironment {
    /// 32 位 djb2 哈希，十六进制输出
    pub fn fingerprint(&self) -> String {
        let material = [
            self.user_agent.as_str(),
            self.locale.as_str(),
            self.screen.as_str(),
            self.timezone.as_str(),
            &self.hardware_concurrency.to_string(),
            self.render_signature.as_str(),
        ]
        .join("|");

        format!("{:08x}", djb2(material.as_bytes()))
    }
}

fn djb2(bytes: &[u8]) -> u32 {
    bytes.iter().fold(5381u32, |hash, b| {
        hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(u32::from(*b))
    })
}

/// 环境探测
pub trait EnvironmentProbe: Send + Sync {
    fn environment(&self) -> DeviceEnvironment;
}

/// 固定环境（测试或由调用方注入）
#[derive(Debug, Clone, Default)]
pub struct StaticProbe(pub DeviceEnvironment);

impl EnvironmentProbe for StaticProbe {
    fn environment(&self) -> DeviceEnvironment {
        self.0.clone()
    }
}

/// 从当前进程环境探测
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProbe;

impl EnvironmentProbe for HostProbe {
    fn environment(&self) -> DeviceEnvironment {
        DeviceEnvironment {
            user_agent: format!(
                "{}/{} ({}; {})",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
            locale: std::env::var("LANG").unwrap_or_default(),
            screen: String::new(),
            timezone: std::env::var("TZ").unwrap_or_default(),
            hardware_concurrency: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
            render_signature: std::env::var("HOSTNAME").unwrap_or_default(),
            ip_address: std::env::var("CLIENT_IP").ok(),
        }
    }
}
