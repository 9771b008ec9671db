/// 自定义错误类型
///
/// 使用 thiserror 定义精确的错误类型，区分致命错误与单连接错误
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// 转发器的主要错误类型
#[derive(Error, Debug)]
pub enum ForwardError {
    /// 监听端口绑定失败（致命）
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// accept 调用失败（致命）
    #[error("Accept failed on {addr}: {source}")]
    Accept {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// 连接目标失败（仅影响当前连接）
    #[error("Failed to connect to {addr}: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 抓包文件打开或写入失败
    #[error("Capture file {path} error: {source}")]
    Capture {
        path: String,
        #[source]
        source: io::Error,
    },

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, ForwardError>;

impl ForwardError {
    /// 创建绑定失败错误
    pub fn bind_failed(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }

    /// 创建连接失败错误
    pub fn connection_failed(addr: impl Into<String>, source: io::Error) -> Self {
        Self::ConnectionFailed {
            addr: addr.into(),
            source,
        }
    }

    /// 创建抓包文件错误
    pub fn capture(path: impl Into<String>, source: io::Error) -> Self {
        Self::Capture {
            path: path.into(),
            source,
        }
    }

    /// 是否为致命错误（需要终止进程）
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Bind { .. } | Self::Accept { .. })
    }
}
