use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tcp_mirror::cli::Cli;
use tcp_mirror::config::ForwarderConfig;
use tcp_mirror::{logging, server};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 配置无效时打印错误和用法，不绑定任何端口
    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:#}\n", e);
            let _ = Cli::command().print_help();
            std::process::exit(1);
        }
    };

    if cli.check {
        print_config(&config);
        return Ok(());
    }

    logging::init_logging(&config.log)?;

    info!("TCP Mirror v{}", env!("CARGO_PKG_VERSION"));

    // Ctrl+C 只停止接受新连接
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, stopping forwarder...");
            signal.cancel();
        }
    });

    server::run_forwarder(config, shutdown)
        .await
        .context("Forwarder failed")?;

    Ok(())
}

/// 打印生效的配置
fn print_config(config: &ForwarderConfig) {
    println!("✓ Listen address: {}", config.bind_addr());
    println!("✓ Target: {}", config.target);
    println!("✓ Buffer size: {} bytes", config.buffer_size);
    match config.upstream_capture {
        Some(ref path) => println!("✓ Upstream capture: {}", path.display()),
        None => println!("✓ Upstream capture: disabled"),
    }
    match config.downstream_capture {
        Some(ref path) => println!("✓ Downstream capture: {}", path.display()),
        None => println!("✓ Downstream capture: disabled"),
    }
    if config.log.destination.uses_file() {
        println!(
            "✓ Logging: {} ({}, level {})",
            config.log.destination,
            config.log.file.display(),
            config.log.level
        );
    } else {
        println!(
            "✓ Logging: {} (level {})",
            config.log.destination, config.log.level
        );
    }
    println!("\n✓ Configuration is valid!");
}
