//! 事务相关配置。
//!
//! 只定义数据结构，不负责加载或热重载配置文件；宿主合成器自行解析后传入。

use std::time::Duration;

use serde::Deserialize;

/// 事务默认超时（毫秒）
///
/// 防止客户端无响应导致事务永久挂起。
pub const DEFAULT_TRANSACTION_TIMEOUT_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// 事务提交后最多等待多久；超时后即使有对象未就绪也强制应用
    pub transaction_timeout_ms: u64,
    /// 调试开关：每个已提交的事务在下一次 refresh 时立即应用，不等待客户端
    pub disable_transactions: bool,
    /// 发出 configure 后立即向客户端发送 frame done
    pub send_frame_done_on_configure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transaction_timeout_ms: DEFAULT_TRANSACTION_TIMEOUT_MS,
            disable_transactions: false,
            send_frame_done_on_configure: true,
        }
    }
}

impl Config {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config: Config = serde_json::from_str(r#"{ "disable-transactions": true }"#).unwrap();
        assert_eq!(
            config,
            Config {
                disable_transactions: true,
                ..Config::default()
            }
        );
        assert_eq!(config.transaction_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let config: Config =
            serde_json::from_str(r#"{ "transaction-timeout-ms": 0, "something-else": 1 }"#)
                .unwrap();
        assert_eq!(config.transaction_timeout(), Duration::ZERO);
    }
}
