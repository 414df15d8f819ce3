// SSH 客户端 Handler 实现
// 实现 russh::client::Handler trait

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use russh::client::{Handle, Msg, Session};
use russh::keys::PublicKey;
use russh::Channel;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};

use super::event::{LogEntry, SharedSink};

/// 远程转发的本地目标
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
}

/// 服务器端口 -> 本地目标
///
/// 服务器通过 forwarded-tcpip 通道回连时，按 connected_port 查找目标。
pub type RemoteForwardTable = Arc<RwLock<HashMap<u32, RemoteTarget>>>;

/// 共享的会话句柄
///
/// tcpip_forward 需要 &mut Handle，本地转发任务与连接共用同一把锁，只在发请求时持有。
pub type SharedHandle = Arc<Mutex<Handle<SshClientHandler>>>;

/// 登记远程转发目标，返回服务器实际监听的端口
///
/// 请求端口为 0 时使用服务器分配的端口
pub async fn register_remote_forward(
    table: &RemoteForwardTable,
    requested_port: u16,
    assigned_port: u32,
    target: RemoteTarget,
) -> u32 {
    let bound = if requested_port == 0 {
        assigned_port
    } else {
        requested_port as u32
    };
    table.write().await.insert(bound, target);
    bound
}

/// SSH 客户端 Handler
pub struct SshClientHandler {
    /// 服务器主机名（用于日志）
    host: String,
    /// 远程转发路由表（与 SshConnection 共享）
    remote_forwards: RemoteForwardTable,
    sink: SharedSink,
}

impl SshClientHandler {
    /// 创建新的 Handler
    pub fn new(host: String, remote_forwards: RemoteForwardTable, sink: SharedSink) -> Self {
        Self {
            host,
            remote_forwards,
            sink,
        }
    }
}

impl russh::client::Handler for SshClientHandler {
    type Error = russh::Error;

    /// 检查服务器公钥
    /// 不做 known_hosts 校验，只记录指纹
    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let fingerprint = server_public_key.fingerprint(russh::keys::ssh_key::HashAlg::Sha256);

        self.sink.emit(LogEntry::debug(format!(
            "[SSH] [{}] Accepting {} host key {}",
            self.host,
            server_public_key.algorithm(),
            fingerprint
        )));

        async { Ok(true) }
    }

    /// 服务器为远程转发打开的通道
    fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        _connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let table = self.remote_forwards.clone();
        let sink = self.sink.clone();
        let origin = format!("{}:{}", originator_address, originator_port);

        async move {
            let target = table.read().await.get(&connected_port).cloned();
            let Some(target) = target else {
                sink.emit(LogEntry::warn(format!(
                    "[SSH] Forwarded connection on unknown port {} from {}",
                    connected_port, origin
                )));
                let _ = channel.close().await;
                return Ok(());
            };

            // 回调须尽快返回，拷贝放到独立任务
            tokio::spawn(async move {
                match TcpStream::connect((target.host.as_str(), target.port)).await {
                    Ok(mut stream) => {
                        let mut channel_stream = channel.into_stream();
                        if let Err(e) =
                            tokio::io::copy_bidirectional(&mut channel_stream, &mut stream).await
                        {
                            tracing::debug!(
                                "[SSH] Remote forward {} -> {}:{} ended: {}",
                                origin,
                                target.host,
                                target.port,
                                e
                            );
                        }
                    }
                    Err(e) => {
                        sink.emit(
                            LogEntry::warn(format!(
                                "[SSH] Remote forward could not reach {}:{}",
                                target.host, target.port
                            ))
                            .with_cause(&e),
                        );
                        let _ = channel.close().await;
                    }
                }
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(port: u16) -> RemoteTarget {
        RemoteTarget {
            host: "localhost".to_string(),
            port,
        }
    }

    #[tokio::test]
    async fn test_register_uses_requested_port() {
        let table = RemoteForwardTable::default();
        let bound = register_remote_forward(&table, 2222, 0, target(22)).await;
        assert_eq!(bound, 2222);
        assert_eq!(table.read().await.get(&2222), Some(&target(22)));
    }

    #[tokio::test]
    async fn test_register_uses_server_assigned_port() {
        let table = RemoteForwardTable::default();
        let bound = register_remote_forward(&table, 0, 41000, target(8080)).await;
        assert_eq!(bound, 41000);
        assert!(table.read().await.get(&0).is_none());
        assert_eq!(table.read().await.get(&41000), Some(&target(8080)));
    }

    #[tokio::test]
    async fn test_register_replaces_previous_target() {
        let table = RemoteForwardTable::default();
        register_remote_forward(&table, 2222, 0, target(22)).await;
        register_remote_forward(&table, 2222, 0, target(2200)).await;
        assert_eq!(table.read().await.len(), 1);
        assert_eq!(table.read().await.get(&2222), Some(&target(2200)));
    }
}
