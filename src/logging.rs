/// 日志初始化
///
/// 核心代码只通过 tracing 宏输出日志，输出位置在这里一次性决定
use crate::config::{LogConfig, LogDestination};
use anyhow::{anyhow, Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

/// 根据日志位置构建 writer，打开日志文件失败返回错误
pub fn build_writer(destination: LogDestination, log_file: &Path) -> Result<BoxMakeWriter> {
    let open_file = || {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .with_context(|| format!("Failed to open log file for writing: {}", log_file.display()))
    };

    let writer = match destination {
        LogDestination::Console => BoxMakeWriter::new(std::io::stdout),
        LogDestination::File => BoxMakeWriter::new(Mutex::new(open_file()?)),
        LogDestination::Both => {
            BoxMakeWriter::new(std::io::stdout.and(Mutex::new(open_file()?)))
        }
        LogDestination::None => BoxMakeWriter::new(std::io::sink),
    };

    Ok(writer)
}

/// 构建日志过滤器，RUST_LOG 优先于配置的级别
pub fn build_filter(destination: LogDestination, level: &str) -> Result<EnvFilter> {
    if destination == LogDestination::None {
        return Ok(EnvFilter::new("off"));
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{}'", level))
}

/// 安装全局 tracing subscriber
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = build_filter(config.destination, &config.level)?;
    let writer = build_writer(config.destination, &config.file)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(config.destination == LogDestination::Console)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}
