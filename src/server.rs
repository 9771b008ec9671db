use crate::capture::CaptureSinks;
use crate::config::ForwarderConfig;
use crate::connection::{handle_connection, ForwardContext};
use crate::error::{ForwardError, Result};
use crate::stats::{ForwarderStats, StatsSnapshot};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 监听端口并为每个入站连接启动独立转发任务
pub struct Forwarder {
    listener: TcpListener,
    local_addr: SocketAddr,
    context: Arc<ForwardContext>,
}

impl Forwarder {
    /// 绑定监听地址，失败为致命错误
    pub async fn bind(config: &ForwarderConfig, captures: CaptureSinks) -> Result<Self> {
        let bind_addr = config.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| ForwardError::bind_failed(bind_addr.as_str(), e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ForwardError::bind_failed(bind_addr.as_str(), e))?;

        let context = ForwardContext::new(config.target.clone(), config.buffer_size)
            .with_captures(captures);

        Ok(Self {
            listener,
            local_addr,
            context: Arc::new(context),
        })
    }

    /// 实际监听的地址（绑定端口 0 时可用于获取端口）
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 统计信息句柄
    pub fn stats(&self) -> ForwarderStats {
        self.context.stats.clone()
    }

    /// 运行 accept 循环
    ///
    /// `shutdown` 被触发后停止接受新连接并关闭监听端口，已建立的连接继续转发。
    /// accept 出错视为致命错误，直接返回，不做重试。
    pub async fn run(self, shutdown: CancellationToken) -> Result<StatsSnapshot> {
        let Self {
            listener,
            local_addr,
            context,
        } = self;

        info!(
            "Listening on {} and forwarding to {} (buffer {} bytes)",
            local_addr, context.target, context.buffer_size
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting connections on {}", local_addr);
                    break;
                }
                result = listener.accept() => on_accept(&context, local_addr, result)?,
            }
        }

        drop(listener);

        let snapshot = context.stats.snapshot();
        let json = serde_json::to_string_pretty(&snapshot).unwrap_or_default();
        info!("Forwarder stopped, statistics:\n{}", json);
        Ok(snapshot)
    }
}

/// 处理一次 accept 的结果
///
/// 成功时为连接启动独立的转发任务；失败时返回致命的 `ForwardError::Accept`，
/// 由调用方结束 accept 循环。
fn on_accept(
    context: &Arc<ForwardContext>,
    local_addr: SocketAddr,
    result: io::Result<(TcpStream, SocketAddr)>,
) -> Result<()> {
    let (stream, peer) = result.map_err(|e| {
        error!("Accept failed on {}: {}", local_addr, e);
        ForwardError::Accept {
            addr: local_addr,
            source: e,
        }
    })?;

    info!("Got connection {} -> {}", peer, local_addr);
    context.stats.connection_accepted();

    let context = Arc::clone(context);
    tokio::spawn(async move {
        if let Err(e) = handle_connection(stream, peer, context).await {
            error!("Connection from {} abandoned: {}", peer, e);
        }
    });
    Ok(())
}

/// 按配置打开抓包文件、绑定端口并运行转发器
pub async fn run_forwarder(config: ForwarderConfig, shutdown: CancellationToken) -> Result<()> {
    let captures = CaptureSinks::open(
        config.upstream_capture.as_deref(),
        config.downstream_capture.as_deref(),
    )
    .await?;

    let forwarder = Forwarder::bind(&config, captures).await?;
    forwarder.run(shutdown).await?;
    Ok(())
}
