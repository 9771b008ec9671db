use crate::capture::CaptureSinks;
use crate::error::{ForwardError, Result};
use crate::relay::{Direction, RelayOutcome, RelayTask};
use crate::stats::ForwarderStats;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 所有连接共享的只读转发上下文
#[derive(Debug, Clone)]
pub struct ForwardContext {
    /// 转发目标 <host:port>
    pub target: String,
    /// 每个中继任务的缓冲区大小
    pub buffer_size: usize,
    /// 上下行抓包文件
    pub captures: CaptureSinks,
    /// 统计信息
    pub stats: ForwarderStats,
}

impl ForwardContext {
    pub fn new(target: impl Into<String>, buffer_size: usize) -> Self {
        let target = target.into();
        Self {
            stats: ForwarderStats::new(target.clone()),
            target,
            buffer_size,
            captures: CaptureSinks::none(),
        }
    }

    pub fn with_captures(mut self, captures: CaptureSinks) -> Self {
        self.captures = captures;
        self
    }
}

/// 处理一个入站连接：连接目标，启动上下行两个中继任务，
/// 等待两者都结束后再释放两端连接
pub async fn handle_connection(
    inbound: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ForwardContext>,
) -> Result<()> {
    let outbound = match TcpStream::connect(&ctx.target).await {
        Ok(stream) => stream,
        Err(e) => {
            ctx.stats.dial_failed();
            // 放弃本连接，入站连接随 drop 关闭
            drop(inbound);
            return Err(ForwardError::connection_failed(ctx.target.as_str(), e));
        }
    };

    if let (Ok(local), Ok(remote)) = (outbound.local_addr(), outbound.peer_addr()) {
        debug!("Dialed {} -> {}", local, remote);
    }

    // 每块数据立即发出，不做 Nagle 合并
    for stream in [&inbound, &outbound] {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
    }

    let _active = ctx.stats.connection_started();

    let (inbound_read, inbound_write) = inbound.into_split();
    let (outbound_read, outbound_write) = outbound.into_split();
    let closing = CancellationToken::new();

    let upstream = RelayTask::new(
        format!("{}->{}", peer, ctx.target),
        Direction::Upstream,
        inbound_read,
        outbound_write,
        ctx.buffer_size,
    )
    .with_capture(ctx.captures.for_direction(Direction::Upstream))
    .with_stats(ctx.stats.clone())
    .with_closing(closing.clone());

    let downstream = RelayTask::new(
        format!("{}->{}", ctx.target, peer),
        Direction::Downstream,
        outbound_read,
        inbound_write,
        ctx.buffer_size,
    )
    .with_capture(ctx.captures.for_direction(Direction::Downstream))
    .with_stats(ctx.stats.clone())
    .with_closing(closing.clone());

    let upstream = tokio::spawn(upstream.run());
    let downstream = tokio::spawn(downstream.run());

    // 两个方向都结束后连接才真正关闭
    let (upstream, downstream) = tokio::join!(
        wait_relay(upstream, Direction::Upstream, &closing),
        wait_relay(downstream, Direction::Downstream, &closing),
    );
    let (upstream, downstream) = (upstream?, downstream?);

    let status = if upstream.end.is_error() || downstream.end.is_error() {
        "closed with error"
    } else {
        "closed"
    };
    info!(
        "Connection {} <-> {} {} (upstream {} bytes, downstream {} bytes)",
        peer, ctx.target, status, upstream.bytes, downstream.bytes
    );

    Ok(())
}

async fn wait_relay(
    handle: JoinHandle<RelayOutcome>,
    direction: Direction,
    closing: &CancellationToken,
) -> Result<RelayOutcome> {
    handle.await.map_err(|e| {
        // 任务 panic 时也要让另一方向退出
        closing.cancel();
        error!("{} relay task failed: {}", direction, e);
        ForwardError::Io(io::Error::other(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn accepted_pair(listener: &TcpListener) -> (TcpStream, TcpStream, SocketAddr) {
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (server_side, peer) = accepted.unwrap();
        (client.unwrap(), server_side, peer)
    }

    #[tokio::test]
    async fn test_dial_failure_closes_inbound() {
        // 先占用再释放一个端口，保证没有人监听
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_target = unused.local_addr().unwrap().to_string();
        drop(unused);

        let front = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (mut client, inbound, peer) = accepted_pair(&front).await;

        let ctx = Arc::new(ForwardContext::new(dead_target, 1024));
        let err = handle_connection(inbound, peer, ctx.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::ConnectionFailed { .. }));
        assert_eq!(ctx.stats.snapshot().failed_dials, 1);
        assert_eq!(ctx.stats.snapshot().active_connections, 0);

        let mut buf = [0u8; 8];
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("client was not closed")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_pairing_relays_both_directions() {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap().to_string();

        let target_task = tokio::spawn(async move {
            let (mut conn, _) = target.accept().await.unwrap();
            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).await.unwrap();
            conn.write_all(b"PONG").await.unwrap();
            buf
        });

        let front = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (mut client, inbound, peer) = accepted_pair(&front).await;

        let ctx = Arc::new(ForwardContext::new(target_addr, 2));
        let pairing = tokio::spawn(handle_connection(inbound, peer, ctx.clone()));

        client.write_all(b"PING").await.unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"PONG");
        assert_eq!(&target_task.await.unwrap(), b"PING");
        drop(client);

        timeout(Duration::from_secs(5), pairing)
            .await
            .expect("pairing did not finish")
            .unwrap()
            .unwrap();

        let snap = ctx.stats.snapshot();
        assert_eq!(snap.bytes_upstream, 4);
        assert_eq!(snap.bytes_downstream, 4);
        assert_eq!(snap.active_connections, 0);
    }
}
