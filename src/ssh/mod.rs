// SSH 隧道模块
//
// 模块结构:
// - config: 连接配置 (ConnectionConfig, Credentials, Identity)
// - error: 错误类型 (ConnectionError, ForwardError, TransferError)
// - event: 日志事件 (LogEntry, LogLevel, LogSink)
// - forward: 端口转发描述 (PortForwardSpec)
// - handler: russh Handler 实现（远程转发回连）
// - client: SSH 握手与认证
// - connection: 单主机连接与转发挂载 (SshConnection)
// - tunnel: 本地转发监听
// - scp: SCP 文件传输协议
// - supervisor: 隧道守护 (TunnelSupervisor)

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod forward;
pub mod handler;
pub mod scp;
pub mod supervisor;
pub mod tunnel;

// 公开导出
pub use config::{ConnectionConfig, Credentials, Identity, KeepaliveConfig};
pub use connection::{ConnectionState, SshConnection};
pub use error::{ConnectionError, ForwardError, TransferError};
pub use event::{LogEntry, LogLevel, LogSink, SharedSink, TracingSink};
pub use forward::{ForwardDirection, ParseForwardError, PortForwardSpec};
pub use scp::{download, upload, FileTransfer};
pub use supervisor::{SupervisorState, TunnelLink, TunnelSupervisor};
