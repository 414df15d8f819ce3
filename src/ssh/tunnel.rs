// 本地端口转发
//
// 本地监听 127.0.0.1:<localPort>，每个接入连接打开一个 direct-tcpip 通道
// 到 remoteHost:remotePort，双向拷贝直到任一端关闭。

use std::io::ErrorKind;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::ForwardError;
use super::event::{LogEntry, SharedSink};
use super::handler::SharedHandle;
use crate::constants::LOCAL_BIND_ADDR;

/// 绑定本地转发端口
///
/// 端口已被占用时返回 ForwardError::PortInUse
pub async fn bind_local(port: u16) -> Result<TcpListener, ForwardError> {
    TcpListener::bind((LOCAL_BIND_ADDR, port))
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::AddrInUse => ForwardError::PortInUse(port),
            _ => ForwardError::Bind { port, source: e },
        })
}

/// 启动本地转发任务
///
/// 任务在 cancel 触发或监听出错时退出
pub fn spawn_local_forward(
    handle: SharedHandle,
    listener: TcpListener,
    remote_host: String,
    remote_port: u16,
    cancel: CancellationToken,
    sink: SharedSink,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((local_stream, client_addr)) => {
                    debug!("[Tunnel] New connection from {} to {}:{}", client_addr, remote_host, remote_port);
                    let handle = handle.clone();
                    let remote_host = remote_host.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            result = relay_connection(handle, local_stream, &remote_host, remote_port) => {
                                if let Err(e) = result {
                                    debug!("[Tunnel] Forwarded connection to {}:{} ended: {}", remote_host, remote_port, e);
                                }
                            }
                        }
                    });
                }
                Err(e) => {
                    sink.emit(
                        LogEntry::error(format!(
                            "[Tunnel] Local listener for {}:{} stopped",
                            remote_host, remote_port
                        ))
                        .with_cause(&e),
                    );
                    break;
                }
            }
        }
    })
}

/// 处理单个转发连接
async fn relay_connection(
    handle: SharedHandle,
    mut local_stream: TcpStream,
    remote_host: &str,
    remote_port: u16,
) -> Result<(), russh::Error> {
    let originator = local_stream.peer_addr().ok();
    let (origin_host, origin_port) = originator
        .map(|addr| (addr.ip().to_string(), addr.port()))
        .unwrap_or_else(|| (LOCAL_BIND_ADDR.to_string(), 0));

    let channel = handle
        .lock()
        .await
        .channel_open_direct_tcpip(remote_host, remote_port as u32, origin_host, origin_port as u32)
        .await?;

    let mut channel_stream = channel.into_stream();
    tokio::io::copy_bidirectional(&mut local_stream, &mut channel_stream).await?;
    Ok(())
}
