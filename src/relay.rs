/// 单向数据中继
///
/// 从一个连接读取数据写入另一个连接，每读到一块数据就立即写出并刷新，
/// 同时（如果配置了）把同样的数据追加到该方向的抓包文件。
use crate::capture::CaptureSink;
use crate::stats::ForwarderStats;
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// 中继方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// 客户端 -> 目标
    Upstream,
    /// 目标 -> 客户端
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => f.write_str("upstream"),
            Direction::Downstream => f.write_str("downstream"),
        }
    }
}

/// 中继结束的原因
#[derive(Debug)]
pub enum RelayEnd {
    /// 源端正常关闭
    Eof,
    /// 读写出错
    Error(io::Error),
    /// 同一连接的另一个方向已经结束
    Closed,
}

impl RelayEnd {
    pub fn is_error(&self) -> bool {
        matches!(self, RelayEnd::Error(_))
    }
}

/// 中继任务的结果，任务结束即代表完成信号
#[derive(Debug)]
pub struct RelayOutcome {
    /// 成功写入目的端的字节数
    pub bytes: u64,
    pub end: RelayEnd,
}

/// 一个方向上的中继任务
pub struct RelayTask<R, W> {
    id: String,
    direction: Direction,
    source: R,
    destination: W,
    buffer_size: usize,
    capture: Option<CaptureSink>,
    stats: Option<ForwarderStats>,
    closing: CancellationToken,
}

impl<R, W> RelayTask<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        id: impl Into<String>,
        direction: Direction,
        source: R,
        destination: W,
        buffer_size: usize,
    ) -> Self {
        debug_assert!(buffer_size > 0, "relay buffer size must be >= 1");
        Self {
            id: id.into(),
            direction,
            source,
            destination,
            buffer_size,
            capture: None,
            stats: None,
            closing: CancellationToken::new(),
        }
    }

    /// 镜像到抓包文件
    pub fn with_capture(mut self, capture: Option<CaptureSink>) -> Self {
        self.capture = capture;
        self
    }

    /// 实时更新统计信息
    pub fn with_stats(mut self, stats: ForwarderStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// 与同一连接的另一个方向共享的关闭信号。
    /// 任一方向结束时触发，另一方向随即停止读写。
    pub fn with_closing(mut self, closing: CancellationToken) -> Self {
        self.closing = closing;
        self
    }

    /// 运行中继直到 EOF、出错或另一方向结束，然后关闭两端
    pub async fn run(self) -> RelayOutcome {
        let Self {
            id,
            direction,
            mut source,
            mut destination,
            buffer_size,
            capture,
            stats,
            closing,
        } = self;

        debug!("{} ({}): relay started", id, direction);

        let mut total = 0u64;

        let end = match alloc_buffer(buffer_size) {
            Err(e) => RelayEnd::Error(e),
            Ok(mut buf) => loop {
                let read = tokio::select! {
                    biased;
                    _ = closing.cancelled() => break RelayEnd::Closed,
                    result = source.read(&mut buf) => result,
                };

                let n = match read {
                    Ok(0) => break RelayEnd::Eof,
                    Ok(n) => n,
                    Err(e) => break RelayEnd::Error(e),
                };
                trace!("{} ({}): read {} bytes", id, direction, n);

                let written = tokio::select! {
                    biased;
                    _ = closing.cancelled() => break RelayEnd::Closed,
                    result = write_and_flush(&mut destination, &buf[..n]) => result,
                };
                if let Err(e) = written {
                    break RelayEnd::Error(e);
                }

                total += n as u64;
                if let Some(ref stats) = stats {
                    stats.add_bytes(direction, n as u64);
                }

                // 镜像失败只记录日志，不影响转发
                if let Some(ref sink) = capture {
                    match sink.append(&buf[..n]).await {
                        Ok(written) => {
                            trace!("{} ({}): captured {} bytes", id, direction, written)
                        }
                        Err(e) => {
                            warn!("{} ({}): {}", id, direction, e);
                            if let Some(ref stats) = stats {
                                stats.capture_failed();
                            }
                        }
                    }
                }
            },
        };

        match &end {
            RelayEnd::Eof => debug!("{} ({}): EOF received, connection closed", id, direction),
            RelayEnd::Closed => debug!("{} ({}): peer direction finished", id, direction),
            RelayEnd::Error(e) => {
                info!("{} ({}): breaking relay due to error: {}", id, direction, e)
            }
        }

        // 通知另一方向停止，并关闭本方向持有的两端
        closing.cancel();
        if let Err(e) = destination.shutdown().await {
            trace!("{} ({}): shutdown destination: {}", id, direction, e);
        }
        drop(destination);
        drop(source);

        debug!("{} ({}): relay exited after {} bytes", id, direction, total);

        RelayOutcome {
            bytes: total,
            end,
        }
    }
}

/// 分配中继缓冲区，内存不足时只让当前中继失败
fn alloc_buffer(size: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size).map_err(|e| {
        io::Error::new(
            io::ErrorKind::OutOfMemory,
            format!("cannot allocate {} byte relay buffer: {}", size, e),
        )
    })?;
    buf.resize(size, 0);
    Ok(buf)
}

async fn write_and_flush<W>(writer: &mut W, data: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(data).await?;
    writer.flush().await
}
