use crate::config::{
    expand_path, ConfigValidator, ForwarderConfig, ForwarderFileConfig, LogDestination,
};
use anyhow::{bail, Result};
use clap::Parser;

#[derive(Parser, Debug, Default)]
#[command(name = "tcp-mirror")]
#[command(
    author,
    version,
    about = "Forward TCP connections to a fixed target, optionally mirroring the traffic to files",
    long_about = None
)]
pub struct Cli {
    /// 配置文件路径（TOML，[forwarder] 段）；命令行参数优先
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<String>,

    /// 监听地址 [default: 0.0.0.0]
    #[arg(long, value_name = "ADDR")]
    pub listen_addr: Option<String>,

    /// 监听端口 (1-65535) [default: 8080]
    #[arg(short = 'p', long, value_name = "PORT")]
    pub source_port: Option<u32>,

    /// 转发目标 <host:port>（必填）
    #[arg(short, long, value_name = "HOST:PORT")]
    pub target: Option<String>,

    /// 读写缓冲区大小，字节 [default: 1024]
    #[arg(short, long, value_name = "BYTES")]
    pub buffer_size: Option<usize>,

    /// 上行（客户端 -> 目标）流量镜像文件
    #[arg(long, value_name = "PATH")]
    pub upstream_capture: Option<String>,

    /// 下行（目标 -> 客户端）流量镜像文件
    #[arg(long, value_name = "PATH")]
    pub downstream_capture: Option<String>,

    /// 日志输出位置 [default: console]
    #[arg(long, value_enum, value_name = "DEST")]
    pub log_to: Option<LogDestination>,

    /// 日志文件路径 [default: proxy.log]
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<String>,

    /// 日志级别 (trace, debug, info, warn, error) [default: info]
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// 只检查配置，不启动转发
    #[arg(long)]
    pub check: bool,
}

impl Cli {
    /// 加载配置文件（如果有）并与命令行参数合并、验证
    pub fn load_config(&self) -> Result<ForwarderConfig> {
        let file = match self.config {
            Some(ref path) => ForwarderFileConfig::load(expand_path(path))?,
            None => ForwarderFileConfig::default(),
        };
        self.merge(file)
    }

    /// 命令行参数 > 配置文件 > 默认值
    pub fn merge(&self, file: ForwarderFileConfig) -> Result<ForwarderConfig> {
        let Some(target) = self.target.clone().or(file.target) else {
            bail!("target <host:port> is required");
        };

        let mut config = ForwarderConfig::new(target);

        if let Some(addr) = self.listen_addr.clone().or(file.listen_addr) {
            config.listen_addr = addr;
        }
        if let Some(port) = self.source_port.or(file.source_port) {
            config.source_port = ConfigValidator::validate_source_port(port)?;
        }
        if let Some(size) = self.buffer_size.or(file.buffer_size) {
            config.buffer_size = size;
        }

        config.upstream_capture = self
            .upstream_capture
            .as_deref()
            .or(file.upstream_capture.as_deref())
            .map(expand_path);
        config.downstream_capture = self
            .downstream_capture
            .as_deref()
            .or(file.downstream_capture.as_deref())
            .map(expand_path);

        if let Some(destination) = self.log_to.or(file.log_destination) {
            config.log.destination = destination;
        }
        if let Some(path) = self.log_file.as_deref().or(file.log_file.as_deref()) {
            config.log.file = expand_path(path);
        }
        if let Some(level) = self.log_level.clone().or(file.log_level) {
            config.log.level = level;
        }

        config.validate()?;
        Ok(config)
    }
}
