use anyhow::{bail, Result};
use std::net::Ipv4Addr;
use tracing::debug;

use super::{ForwarderConfig, MAX_BUFFER_SIZE};

/// 配置验证器 - 负责所有配置验证逻辑
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证源端口范围（1-65535）并转换为 u16
    pub fn validate_source_port(port: u32) -> Result<u16> {
        if !(1..=65535).contains(&port) {
            bail!("You need to specify source port in range 1-65535 (got {})", port);
        }
        Ok(port as u16)
    }

    /// 验证缓冲区大小
    pub fn validate_buffer_size(size: usize) -> Result<()> {
        if size < 1 {
            bail!("Buffer size needs to be >= 1");
        }
        // 每个连接的两个方向各分配一块
        if size > MAX_BUFFER_SIZE {
            bail!(
                "Buffer size {} exceeds the maximum of {} bytes",
                size,
                MAX_BUFFER_SIZE
            );
        }
        Ok(())
    }

    /// 验证地址不为空
    pub fn validate_address(addr: &str, context: &str) -> Result<()> {
        if addr.trim().is_empty() {
            bail!("{}: address cannot be empty", context);
        }
        Ok(())
    }

    /// 验证目标地址（host:port）
    pub fn validate_target(target: &str) -> Result<()> {
        Self::validate_address(target, "target")?;

        let Some((host, port)) = target.rsplit_once(':') else {
            bail!("target '{}' must be in <host:port> form", target);
        };

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            bail!("target '{}' is missing a host", target);
        }

        match port.parse::<u16>() {
            Ok(0) | Err(_) => bail!("target '{}' has an invalid port '{}'", target, port),
            Ok(_) => {}
        }

        // 看起来像点分十进制的主机名必须是合法的 IPv4 地址
        if host.chars().all(|c| c.is_ascii_digit() || c == '.') && !is_valid_ipv4(host) {
            bail!("target host '{}' is not a valid IPv4 address", host);
        }

        Ok(())
    }

    /// 验证完整的转发配置
    pub fn validate_forwarder_config(config: &ForwarderConfig) -> Result<()> {
        Self::validate_address(&config.listen_addr, "listen_addr")?;
        Self::validate_source_port(u32::from(config.source_port))?;
        Self::validate_target(&config.target)?;
        Self::validate_buffer_size(config.buffer_size)?;

        if let (Some(up), Some(down)) = (&config.upstream_capture, &config.downstream_capture) {
            if up == down {
                bail!(
                    "upstream_capture and downstream_capture must be different files ({})",
                    up.display()
                );
            }
        }

        debug!("Configuration validated: {:?}", config);
        Ok(())
    }
}

/// 检查字符串是否为合法的点分十进制 IPv4 地址
pub fn is_valid_ipv4(addr: &str) -> bool {
    match addr.parse::<Ipv4Addr>() {
        Ok(_) => true,
        Err(_) => {
            debug!("'{}' is not a valid IPv4 address", addr);
            false
        }
    }
}
