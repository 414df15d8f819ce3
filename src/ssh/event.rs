// 日志事件定义
//
// 核心组件不直接依赖具体日志设施，而是通过 LogSink 发出 LogEntry。
// 默认实现 TracingSink 转发到 tracing；mpsc 发送端也实现了 LogSink，
// 便于调用方（以及测试）收集日志。

use std::error::Error;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::mpsc;

/// 日志级别
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    /// 致命错误（SCP 对端返回 2）
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

/// 日志条目
#[derive(Clone, Debug)]
pub struct LogEntry {
    /// 时间戳
    pub timestamp: DateTime<Local>,
    /// 日志级别
    pub level: LogLevel,
    /// 消息内容
    pub message: String,
    /// 详细信息（可选，通常是错误原因链）
    pub details: Option<String>,
}

impl LogEntry {
    /// 创建新的日志条目
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            message: message.into(),
            details: None,
        }
    }

    /// 附加错误原因，按 source 链展开
    pub fn with_cause(mut self, cause: &(dyn Error + 'static)) -> Self {
        let mut details = cause.to_string();
        let mut source = cause.source();
        while let Some(inner) = source {
            details.push_str(": ");
            details.push_str(&inner.to_string());
            source = inner.source();
        }
        self.details = Some(details);
        self
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Debug, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Fatal, message)
    }
}

/// 日志输出能力
pub trait LogSink: Send + Sync {
    fn emit(&self, entry: LogEntry);
}

/// 共享的日志输出
pub type SharedSink = Arc<dyn LogSink>;

/// 转发到 tracing 的默认实现
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn shared() -> SharedSink {
        Arc::new(TracingSink)
    }
}

impl LogSink for TracingSink {
    fn emit(&self, entry: LogEntry) {
        let details = entry.details.as_deref().unwrap_or_default();
        match entry.level {
            LogLevel::Debug if details.is_empty() => tracing::debug!("{}", entry.message),
            LogLevel::Debug => tracing::debug!(cause = details, "{}", entry.message),
            LogLevel::Info if details.is_empty() => tracing::info!("{}", entry.message),
            LogLevel::Info => tracing::info!(cause = details, "{}", entry.message),
            LogLevel::Warn if details.is_empty() => tracing::warn!("{}", entry.message),
            LogLevel::Warn => tracing::warn!(cause = details, "{}", entry.message),
            LogLevel::Error if details.is_empty() => tracing::error!("{}", entry.message),
            LogLevel::Error => tracing::error!(cause = details, "{}", entry.message),
            // tracing 没有 FATAL 级别，用字段标记
            LogLevel::Fatal => tracing::error!(fatal = true, cause = details, "{}", entry.message),
        }
    }
}

impl LogSink for mpsc::UnboundedSender<LogEntry> {
    fn emit(&self, entry: LogEntry) {
        let _ = self.send(entry);
    }
}
