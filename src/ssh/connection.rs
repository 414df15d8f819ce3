// SSH 连接管理
//
// SshConnection 独占一个已认证会话：按需建立、挂载端口转发、报告存活状态，
// 并提供远程命令通道（供 SCP 使用）。转发依附于会话，会话关闭时一并失效。

use std::sync::Arc;

use russh::client::Msg;
use russh::{ChannelStream, Disconnect};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::client::SshClient;
use super::config::ConnectionConfig;
use super::error::{ConnectionError, ForwardError};
use super::event::{LogEntry, SharedSink, TracingSink};
use super::forward::{ForwardDirection, PortForwardSpec};
use super::handler::{register_remote_forward, RemoteForwardTable, RemoteTarget, SharedHandle};
use super::tunnel;
use crate::constants::REMOTE_BIND_ADDR;

/// 连接状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// 命令通道读端（远程进程的 stdout）
pub type CommandReader = ReadHalf<ChannelStream<Msg>>;
/// 命令通道写端（远程进程的 stdin）
pub type CommandWriter = WriteHalf<ChannelStream<Msg>>;

/// 已挂载的本地转发
struct LocalForward {
    spec: PortForwardSpec,
    task: JoinHandle<()>,
}

/// 单主机 SSH 连接
pub struct SshConnection {
    /// 连接 ID（用于日志）
    id: String,
    config: Option<ConnectionConfig>,
    /// 当前会话，Some 即 Connected
    handle: Option<SharedHandle>,
    /// 远程转发路由表，在会话之间复用
    remote_forwards: RemoteForwardTable,
    local_forwards: Vec<LocalForward>,
    /// 当前会话的取消令牌，关闭时终止所有本地监听
    session_cancel: CancellationToken,
    sink: SharedSink,
}

impl Default for SshConnection {
    fn default() -> Self {
        Self::new(TracingSink::shared())
    }
}

impl SshConnection {
    pub fn new(sink: SharedSink) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            config: None,
            handle: None,
            remote_forwards: RemoteForwardTable::default(),
            local_forwards: Vec::new(),
            session_cancel: CancellationToken::new(),
            sink,
        }
    }

    /// 使用给定配置创建连接（不连接）
    pub fn with_config(config: ConnectionConfig, sink: SharedSink) -> Self {
        let mut connection = Self::new(sink);
        connection.configure(config);
        connection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 保存连接参数，不发起连接
    pub fn configure(&mut self, config: ConnectionConfig) {
        self.config = Some(config);
    }

    pub fn config(&self) -> Option<&ConnectionConfig> {
        self.config.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        if self.handle.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// 建立连接
    /// 已连接时直接返回成功
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.handle.is_some() {
            return Ok(());
        }

        let config = self
            .config
            .as_ref()
            .ok_or_else(|| ConnectionError::Config("Connection is not configured".to_string()))?;

        self.sink.emit(LogEntry::debug(format!(
            "[SSH] [{}] Connecting to {}",
            self.id,
            config.endpoint()
        )));

        let client = SshClient::new(config, self.sink.clone());
        let handle = client.connect(self.remote_forwards.clone()).await?;

        self.session_cancel = CancellationToken::new();
        self.handle = Some(Arc::new(Mutex::new(handle)));
        Ok(())
    }

    /// 会话是否存活
    ///
    /// 句柄被占用说明有请求正在进行，视为存活，下一轮再检查
    pub fn is_alive(&self) -> bool {
        match &self.handle {
            Some(handle) => handle
                .try_lock()
                .map(|handle| !handle.is_closed())
                .unwrap_or(true),
            None => false,
        }
    }

    /// 挂载端口转发
    /// 未连接时先自动连接
    pub async fn apply_forward(&mut self, spec: &PortForwardSpec) -> Result<(), ForwardError> {
        let Some((local_port, host, remote_port)) = spec.parts() else {
            return Err(ForwardError::Incomplete(spec.clone()));
        };

        self.connect().await?;
        let handle = self.handle.clone().ok_or_else(|| {
            ConnectionError::Disconnected("Session closed during connect".to_string())
        })?;

        match spec.direction() {
            ForwardDirection::Local => {
                let listener = tunnel::bind_local(local_port).await?;
                let task = tunnel::spawn_local_forward(
                    handle,
                    listener,
                    host.to_string(),
                    remote_port,
                    self.session_cancel.child_token(),
                    self.sink.clone(),
                );
                self.local_forwards.push(LocalForward {
                    spec: spec.clone(),
                    task,
                });
            }
            ForwardDirection::Remote => {
                let assigned = handle
                    .lock()
                    .await
                    .tcpip_forward(REMOTE_BIND_ADDR, remote_port as u32)
                    .await
                    .map_err(|e| ForwardError::Rejected {
                        spec: spec.to_string(),
                        reason: match e {
                            russh::Error::RequestDenied => {
                                "request denied (port in use or server policy)".to_string()
                            }
                            other => other.to_string(),
                        },
                    })?;
                register_remote_forward(
                    &self.remote_forwards,
                    remote_port,
                    assigned,
                    RemoteTarget {
                        host: host.to_string(),
                        port: local_port,
                    },
                )
                .await;
            }
        }

        self.sink.emit(LogEntry::info(format!(
            "[SSH] [{}] Forward {} established",
            self.id, spec
        )));
        Ok(())
    }

    /// 当前会话上已挂载的本地转发
    pub fn local_forwards(&self) -> impl Iterator<Item = &PortForwardSpec> {
        self.local_forwards.iter().map(|forward| &forward.spec)
    }

    /// 关闭连接（幂等）
    pub async fn close(&mut self) {
        self.session_cancel.cancel();
        for forward in self.local_forwards.drain(..) {
            forward.task.abort();
        }
        self.remote_forwards.write().await.clear();

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle
                .lock()
                .await
                .disconnect(Disconnect::ByApplication, "closing", "en")
                .await
            {
                self.sink.emit(LogEntry::debug(format!(
                    "[SSH] [{}] Disconnect failed: {}",
                    self.id, e
                )));
            }
            self.sink
                .emit(LogEntry::debug(format!("[SSH] [{}] Session closed", self.id)));
        }
    }

    /// 打开远程命令通道
    /// 返回绑定到远程进程 stdout/stdin 的读写端
    pub async fn open_command_channel(
        &mut self,
        command: &str,
    ) -> Result<(CommandReader, CommandWriter), ConnectionError> {
        self.connect().await?;
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| ConnectionError::Disconnected("Session is disconnected".to_string()))?;

        let channel = handle.lock().await.channel_open_session().await?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| ConnectionError::Channel(e.to_string()))?;

        self.sink.emit(LogEntry::debug(format!(
            "[SSH] [{}] Started remote command: {}",
            self.id, command
        )));

        Ok(tokio::io::split(channel.into_stream()))
    }
}
