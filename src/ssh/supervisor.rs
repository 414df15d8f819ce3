// 隧道守护
//
// 后台任务按固定间隔检查连接存活，断开时重建会话并按顺序重新挂载所有转发。
// 同一段连续失败只记录一次错误日志，恢复后清除标记。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::ConnectionConfig;
use super::connection::SshConnection;
use super::error::{ConnectionError, ForwardError};
use super::event::{LogEntry, SharedSink, TracingSink};
use super::forward::PortForwardSpec;
use crate::constants::DEFAULT_POLL_INTERVAL_SECS;

/// 守护状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    /// 正在连接或等待下次重试
    Connecting,
    /// 隧道已建立，定期检查存活
    Monitoring,
}

/// 守护所驱动的链路
#[async_trait]
pub trait TunnelLink: Send + 'static {
    async fn connect(&mut self) -> Result<(), ConnectionError>;
    async fn apply_forward(&mut self, spec: &PortForwardSpec) -> Result<(), ForwardError>;
    fn is_alive(&self) -> bool;
    async fn close(&mut self);
}

#[async_trait]
impl TunnelLink for SshConnection {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        SshConnection::connect(self).await
    }

    async fn apply_forward(&mut self, spec: &PortForwardSpec) -> Result<(), ForwardError> {
        SshConnection::apply_forward(self, spec).await
    }

    fn is_alive(&self) -> bool {
        SshConnection::is_alive(self)
    }

    async fn close(&mut self) {
        SshConnection::close(self).await
    }
}

/// 重建失败原因
#[derive(Debug, thiserror::Error)]
pub enum RespawnError {
    #[error(transparent)]
    Connect(#[from] ConnectionError),
    #[error("{} forward(s) failed: {}", .0.len(), join_failures(.0))]
    Forwards(Vec<(PortForwardSpec, ForwardError)>),
}

fn join_failures(failures: &[(PortForwardSpec, ForwardError)]) -> String {
    failures
        .iter()
        .map(|(spec, e)| format!("{} ({})", spec, e))
        .collect::<Vec<_>>()
        .join(", ")
}

/// 后台任务与调用方共享的状态
struct Shared<L> {
    link: Mutex<L>,
    forwards: Mutex<Vec<PortForwardSpec>>,
    state: watch::Sender<SupervisorState>,
    label: String,
    sink: SharedSink,
}

impl<L: TunnelLink> Shared<L> {
    fn log(&self, entry: LogEntry) {
        self.sink.emit(entry);
    }

    fn set_state(&self, state: SupervisorState) {
        self.state.send_replace(state);
    }

    /// 关闭旧会话，重新连接并按插入顺序挂载全部转发
    async fn respawn(&self) -> Result<(), RespawnError> {
        // 先锁链路再取列表，与 add_forward 的加锁顺序一致
        let mut link = self.link.lock().await;
        let forwards = self.forwards.lock().await.clone();

        link.close().await;
        link.connect().await?;

        let mut failures = Vec::new();
        for spec in forwards {
            if let Err(e) = link.apply_forward(&spec).await {
                failures.push((spec, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RespawnError::Forwards(failures))
        }
    }

    async fn run(&self, cancel: CancellationToken, poll_interval: Duration) {
        self.log(LogEntry::info(format!("[Tunnel] [{}] Supervisor started", self.label)));

        // 当前失败段是否已记录
        let mut failure_logged = false;
        let mut monitoring = false;
        // 上次重建未完全成功（例如部分转发失败而会话仍存活）
        let mut pending = false;

        while !cancel.is_cancelled() {
            let alive = self.link.lock().await.is_alive();
            if !alive || pending {
                if monitoring {
                    monitoring = false;
                    self.set_state(SupervisorState::Connecting);
                    self.log(LogEntry::warn(format!(
                        "[Tunnel] [{}] Tunnels appear to be down, restarting them",
                        self.label
                    )));
                }

                match self.respawn().await {
                    Ok(()) => {
                        if failure_logged {
                            self.log(LogEntry::info(format!(
                                "[Tunnel] [{}] Tunnels restored",
                                self.label
                            )));
                        }
                        failure_logged = false;
                        pending = false;
                        monitoring = true;
                        self.set_state(SupervisorState::Monitoring);
                    }
                    Err(e) => {
                        pending = true;
                        if !failure_logged {
                            self.log(
                                LogEntry::error(format!(
                                    "[Tunnel] [{}] Failed to establish tunnels, retrying every {}s",
                                    self.label,
                                    poll_interval.as_secs_f32()
                                ))
                                .with_cause(&e),
                            );
                            failure_logged = true;
                        }
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        self.link.lock().await.close().await;
        self.set_state(SupervisorState::Stopped);
        self.log(LogEntry::info(format!("[Tunnel] [{}] Supervisor exiting", self.label)));
    }
}

/// 隧道守护
pub struct TunnelSupervisor<L: TunnelLink = SshConnection> {
    shared: Arc<Shared<L>>,
    poll_interval: Duration,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl TunnelSupervisor<SshConnection> {
    /// 使用连接配置创建守护（不启动）
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_sink(config, TracingSink::shared())
    }

    pub fn with_sink(config: ConnectionConfig, sink: SharedSink) -> Self {
        let label = config.endpoint();
        let connection = SshConnection::with_config(config, sink.clone());
        Self::with_link(connection, label, sink)
    }
}

impl<L: TunnelLink> TunnelSupervisor<L> {
    /// 使用任意链路创建守护
    pub fn with_link(link: L, label: impl Into<String>, sink: SharedSink) -> Self {
        let (state, _) = watch::channel(SupervisorState::Stopped);
        Self {
            shared: Arc::new(Shared {
                link: Mutex::new(link),
                forwards: Mutex::new(Vec::new()),
                state,
                label: label.into(),
                sink,
            }),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            cancel: CancellationToken::new(),
            worker: None,
        }
    }

    /// 设置存活检查间隔（下次 start 时生效）
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn state(&self) -> SupervisorState {
        *self.shared.state.borrow()
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.shared.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|worker| !worker.is_finished())
    }

    /// 当前转发列表（按插入顺序）
    pub async fn forwards(&self) -> Vec<PortForwardSpec> {
        self.shared.forwards.lock().await.clone()
    }

    /// 启动后台任务
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        self.shared.set_state(SupervisorState::Connecting);
        let shared = self.shared.clone();
        let cancel = self.cancel.clone();
        let poll_interval = self.poll_interval;
        self.worker = Some(tokio::spawn(async move {
            shared.run(cancel, poll_interval).await;
        }));
    }

    /// 停止后台任务
    ///
    /// 打断等待并等待任务关闭连接后退出；之后可以再次 start
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                self.shared.log(LogEntry::error(format!(
                    "[Tunnel] [{}] Supervisor task failed: {}",
                    self.shared.label, e
                )));
            }
        }
        self.cancel = CancellationToken::new();
        self.shared.set_state(SupervisorState::Stopped);
    }

    /// 添加本地转发
    pub async fn add_local_forward(
        &self,
        local_port: u16,
        remote_host: impl Into<String>,
        remote_port: u16,
    ) -> Result<(), ForwardError> {
        self.add_forward(PortForwardSpec::local(local_port, remote_host, remote_port))
            .await
    }

    /// 添加远程转发
    pub async fn add_remote_forward(
        &self,
        remote_port: u16,
        host: impl Into<String>,
        local_port: u16,
    ) -> Result<(), ForwardError> {
        self.add_forward(PortForwardSpec::remote(remote_port, host, local_port))
            .await
    }

    /// 追加转发并尝试立即挂载到存活的连接
    ///
    /// 挂载失败时转发仍保留在列表中，下次重连时重试
    pub async fn add_forward(&self, spec: PortForwardSpec) -> Result<(), ForwardError> {
        // 持有链路锁期间登记，进行中的重建不会看到尚未挂载的转发
        let mut link = self.shared.link.lock().await;
        self.shared.forwards.lock().await.push(spec.clone());
        if !link.is_alive() {
            return Ok(());
        }

        link.apply_forward(&spec).await.map_err(|e| {
            self.shared.log(
                LogEntry::error(format!(
                    "[Tunnel] [{}] Failed to forward port: {}",
                    self.shared.label, spec
                ))
                .with_cause(&e),
            );
            e
        })
    }
}
