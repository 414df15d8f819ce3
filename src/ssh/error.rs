// SSH 错误类型定义

use thiserror::Error;

use super::forward::PortForwardSpec;

/// 连接错误（认证失败、超时、主机不可达）
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO 错误（网络连接等）
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 认证失败
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// SSH 协议错误
    #[error("SSH protocol error: {0}")]
    Protocol(String),

    /// 密钥错误
    #[error("Key error: {0}")]
    Key(String),

    /// 连接超时
    #[error("Connection timeout after {0}s")]
    Timeout(u64),

    /// 通道错误
    #[error("Channel error: {0}")]
    Channel(String),

    /// 会话已断开
    #[error("Session disconnected: {0}")]
    Disconnected(String),
}

impl From<russh::Error> for ConnectionError {
    fn from(e: russh::Error) -> Self {
        ConnectionError::Protocol(e.to_string())
    }
}

impl From<russh::keys::Error> for ConnectionError {
    fn from(e: russh::keys::Error) -> Self {
        ConnectionError::Key(e.to_string())
    }
}

/// 端口转发错误
#[derive(Debug, Error)]
pub enum ForwardError {
    /// 转发描述不完整
    #[error("Port forward is not configured: {0}")]
    Incomplete(PortForwardSpec),

    /// 本地端口已被占用
    #[error("Local port {0} is already in use")]
    PortInUse(u16),

    /// 本地监听失败
    #[error("Failed to bind local port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// 服务器拒绝转发请求
    #[error("Server rejected forward {spec}: {reason}")]
    Rejected { spec: String, reason: String },

    /// 底层连接失败
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// 文件传输错误
#[derive(Debug, Error)]
pub enum TransferError {
    /// 对端返回非零确认
    #[error("Peer rejected transfer at {stage}: {message}")]
    Rejected { stage: &'static str, message: String },

    /// 对端提前关闭
    #[error("Unexpected end of stream while reading {0}")]
    UnexpectedEof(&'static str),

    /// 协议格式错误
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// 文件内容不足
    #[error("Short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: u64, received: u64 },

    /// 不支持的源（目录等）
    #[error("Unsupported source: {0}")]
    Unsupported(String),

    /// 对端没有提供任何文件
    #[error("Peer offered no files: {0}")]
    NoFiles(String),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 建立传输会话失败
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
