// 配置管理模块

mod validator;

pub use validator::{is_valid_ipv4, ConfigValidator};

use anyhow::Context;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// 默认监听端口
pub const DEFAULT_SOURCE_PORT: u16 = 8080;

/// 默认每个方向的读写缓冲区大小
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// 缓冲区大小上限（16 MiB）
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// 默认日志文件
pub const DEFAULT_LOG_FILE: &str = "proxy.log";

/// 日志输出位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogDestination {
    /// 仅输出到控制台
    #[default]
    Console,
    /// 仅输出到日志文件
    File,
    /// 同时输出到控制台和日志文件
    Both,
    /// 不输出日志
    None,
}

impl LogDestination {
    /// 是否需要打开日志文件
    pub fn uses_file(self) -> bool {
        matches!(self, LogDestination::File | LogDestination::Both)
    }
}

impl fmt::Display for LogDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogDestination::Console => "console",
            LogDestination::File => "file",
            LogDestination::Both => "both",
            LogDestination::None => "none",
        };
        f.write_str(s)
    }
}

/// 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志输出位置
    pub destination: LogDestination,
    /// 日志文件路径（destination 为 file/both 时使用）
    pub file: PathBuf,
    /// 日志级别 (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            destination: LogDestination::default(),
            file: PathBuf::from(DEFAULT_LOG_FILE),
            level: "info".to_string(),
        }
    }
}

/// 转发器配置
///
/// 启动时生成一次，此后只读；通过值或 `Arc` 传入 accept 循环和每个中继任务
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// 监听地址（默认所有网卡）
    pub listen_addr: String,
    /// 监听端口
    pub source_port: u16,
    /// 转发目标 <host:port>
    pub target: String,
    /// 每个中继任务的缓冲区大小
    pub buffer_size: usize,
    /// 上行（客户端 -> 目标）抓包文件
    pub upstream_capture: Option<PathBuf>,
    /// 下行（目标 -> 客户端）抓包文件
    pub downstream_capture: Option<PathBuf>,
    /// 日志配置
    pub log: LogConfig,
}

impl ForwarderConfig {
    /// 使用默认值创建指向 `target` 的配置
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            source_port: DEFAULT_SOURCE_PORT,
            target: target.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            upstream_capture: None,
            downstream_capture: None,
            log: LogConfig::default(),
        }
    }

    /// 监听的 socket 地址字符串
    pub fn bind_addr(&self) -> String {
        if self.listen_addr.contains(':') && !self.listen_addr.starts_with('[') {
            format!("[{}]:{}", self.listen_addr, self.source_port)
        } else {
            format!("{}:{}", self.listen_addr, self.source_port)
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> anyhow::Result<()> {
        ConfigValidator::validate_forwarder_config(self)
    }
}

/// 配置文件中的 `[forwarder]` 段，所有字段均可省略，由命令行补齐
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForwarderFileConfig {
    pub listen_addr: Option<String>,
    pub source_port: Option<u32>,
    pub target: Option<String>,
    pub buffer_size: Option<usize>,
    pub upstream_capture: Option<String>,
    pub downstream_capture: Option<String>,
    pub log_destination: Option<LogDestination>,
    pub log_file: Option<String>,
    pub log_level: Option<String>,
}

impl ForwarderFileConfig {
    /// 从 TOML 文件加载
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))
    }

    /// 解析 TOML 文本
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(default)]
            forwarder: ForwarderFileConfig,
        }

        let wrapper: Wrapper = toml::from_str(content)?;
        Ok(wrapper.forwarder)
    }
}

/// 展开路径中的 `~`
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ForwarderConfig::new("127.0.0.1:9000");
        assert_eq!(config.source_port, 8080);
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.listen_addr, "0.0.0.0");
        assert!(config.upstream_capture.is_none());
        assert!(config.downstream_capture.is_none());
        assert_eq!(config.log.destination, LogDestination::Console);
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_bind_addr_ipv6() {
        let mut config = ForwarderConfig::new("127.0.0.1:9000");
        config.listen_addr = "::".to_string();
        config.source_port = 9100;
        assert_eq!(config.bind_addr(), "[::]:9100");
    }

    #[test]
    fn test_file_config_parse() {
        let toml_str = r#"
            [forwarder]
            source_port = 2222
            target = "192.168.0.10:22"
            log_destination = "none"
        "#;

        let file = ForwarderFileConfig::parse(toml_str).unwrap();
        assert_eq!(file.source_port, Some(2222));
        assert_eq!(file.target.as_deref(), Some("192.168.0.10:22"));
        assert_eq!(file.log_destination, Some(LogDestination::None));
        assert!(file.buffer_size.is_none());
    }

    #[test]
    fn test_file_config_unknown_field() {
        let toml_str = r#"
            [forwarder]
            targte = "192.168.0.10:22"
        "#;
        assert!(ForwarderFileConfig::parse(toml_str).is_err());
    }

    #[test]
    fn test_log_destination_flags() {
        assert!(!LogDestination::Console.uses_file());
        assert!(LogDestination::Both.uses_file());
        assert!(LogDestination::File.uses_file());
        assert!(!LogDestination::None.uses_file());
        assert_eq!(LogDestination::Both.to_string(), "both");
    }

    #[test]
    fn test_expand_path() {
        assert_eq!(expand_path("capture.bin"), PathBuf::from("capture.bin"));
        let expanded = expand_path("~/up.bin");
        assert!(expanded.ends_with("up.bin"));
    }
}
