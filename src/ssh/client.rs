// SSH 客户端核心实现
// 负责 TCP 连接、SSH 握手与认证，返回已认证的 Handle

use std::net::ToSocketAddrs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use russh::client::{AuthResult, Handle};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::config::{ConnectionConfig, Credentials, Identity};
use super::error::ConnectionError;
use super::event::{LogEntry, SharedSink};
use super::handler::{RemoteForwardTable, SshClientHandler};

/// SSH 客户端
pub struct SshClient<'a> {
    /// 连接配置
    config: &'a ConnectionConfig,
    sink: SharedSink,
}

impl<'a> SshClient<'a> {
    pub fn new(config: &'a ConnectionConfig, sink: SharedSink) -> Self {
        Self { config, sink }
    }

    fn log(&self, entry: LogEntry) {
        self.sink.emit(entry);
    }

    /// 执行连接
    /// 返回已认证的 russh Handle
    pub async fn connect(
        &self,
        remote_forwards: RemoteForwardTable,
    ) -> Result<Handle<SshClientHandler>, ConnectionError> {
        let endpoint = self.config.endpoint();
        self.log(LogEntry::debug(format!(
            "[SSH] Target: {}@{}",
            self.config.username, endpoint
        )));

        // 解析地址
        let socket_addr = endpoint
            .to_socket_addrs()
            .map_err(|e| ConnectionError::Config(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| ConnectionError::Config("No valid address found".to_string()))?;

        // TCP 连接
        let connect_timeout = Duration::from_secs(self.config.connect_timeout);
        let tcp_stream = timeout(connect_timeout, TcpStream::connect(socket_addr))
            .await
            .map_err(|_| ConnectionError::Timeout(self.config.connect_timeout))?
            .map_err(ConnectionError::Io)?;

        self.log(LogEntry::debug(format!(
            "[SSH] TCP connection established to {}",
            socket_addr
        )));

        // SSH 握手
        let russh_config = Arc::new(self.config.to_russh_config());
        let handler =
            SshClientHandler::new(self.config.host.clone(), remote_forwards, self.sink.clone());

        let mut handle = timeout(
            connect_timeout,
            russh::client::connect_stream(russh_config, tcp_stream, handler),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(self.config.connect_timeout))?
        .map_err(ConnectionError::from)?;

        self.log(LogEntry::debug("[SSH] SSH handshake completed"));

        // 认证
        timeout(
            connect_timeout,
            self.authenticate(&mut handle, &self.config.credentials),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(self.config.connect_timeout))??;

        self.log(LogEntry::info(format!(
            "[SSH] Authenticated as '{}' on {}",
            self.config.username, endpoint
        )));

        Ok(handle)
    }

    /// 执行认证
    /// 依次尝试每个私钥，最后尝试密码
    async fn authenticate(
        &self,
        handle: &mut Handle<SshClientHandler>,
        credentials: &Credentials,
    ) -> Result<(), ConnectionError> {
        if credentials.is_empty() {
            return Err(ConnectionError::Config(
                "No authentication method configured".to_string(),
            ));
        }

        let username = self.config.username.as_str();
        let mut last_failure = String::new();

        for identity in &credentials.identities {
            let key = match self.load_private_key(identity).await {
                Ok(key) => key,
                Err(e) => {
                    self.log(LogEntry::warn("[SSH] Skipping unusable identity").with_cause(&e));
                    last_failure = e.to_string();
                    continue;
                }
            };

            let key_with_alg = russh::keys::PrivateKeyWithHashAlg::new(Arc::new(key), None);

            match handle.authenticate_publickey(username, key_with_alg).await? {
                AuthResult::Success => return Ok(()),
                AuthResult::Failure {
                    remaining_methods, ..
                } => {
                    self.log(LogEntry::debug(format!(
                        "[SSH] Key {:?} rejected, server suggests {:?}",
                        identity.key_path, remaining_methods
                    )));
                    last_failure = format!("public key {:?} rejected", identity.key_path);
                }
            }
        }

        if let Some(password) = &credentials.password {
            self.log(LogEntry::debug("[SSH] Using password authentication"));

            match handle.authenticate_password(username, password).await? {
                AuthResult::Success => return Ok(()),
                AuthResult::Failure {
                    remaining_methods,
                    partial_success,
                } => {
                    if partial_success {
                        return Err(ConnectionError::Auth(
                            "Partial authentication - additional auth required".to_string(),
                        ));
                    }
                    last_failure = format!(
                        "password rejected, server suggests {:?}",
                        remaining_methods
                    );
                }
            }
        }

        Err(ConnectionError::Auth(last_failure))
    }

    /// 加载私钥文件
    async fn load_private_key(
        &self,
        identity: &Identity,
    ) -> Result<russh::keys::PrivateKey, ConnectionError> {
        let key_path: &Path = &identity.key_path;
        self.log(LogEntry::debug(format!(
            "[SSH] Loading private key from {:?}",
            key_path
        )));

        let key_data = tokio::fs::read(key_path)
            .await
            .map_err(|e| ConnectionError::Key(format!("Failed to read key file {:?}: {}", key_path, e)))?;

        russh::keys::decode_secret_key(
            &String::from_utf8_lossy(&key_data),
            identity.passphrase.as_deref(),
        )
        .map_err(|e| ConnectionError::Key(format!("Failed to decode key {:?}: {}", key_path, e)))
    }
}
