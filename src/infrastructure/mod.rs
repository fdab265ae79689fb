//! 基础设施：加密、存储、设备指纹、会话存储与日志

pub mod encryption;
pub mod fingerprint;
pub mod logging;
pub mod session_store;
pub mod storage;

pub use fingerprint::{DeviceEnvironment, EnvironmentProbe, HostProbe, StaticProbe};
pub use session_store::SessionStore;
pub use storage::{FileStorage, MemoryStorage, StorageBackend};
