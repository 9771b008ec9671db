/// TCP Mirror 库入口
///
/// 将核心模块导出为库，方便测试和复用
pub mod capture;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod relay;
pub mod server;
pub mod stats;

// 重新导出常用类型
pub use capture::{CaptureSink, CaptureSinks};
pub use config::{ForwarderConfig, LogDestination};
pub use connection::{handle_connection, ForwardContext};
pub use error::{ForwardError, Result};
pub use relay::{Direction, RelayEnd, RelayOutcome, RelayTask};
pub use server::{run_forwarder, Forwarder};
pub use stats::{ForwarderStats, StatsSnapshot};
