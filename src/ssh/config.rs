// SSH 连接配置

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{self, keepalive};

/// SSH 连接配置
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// 目标主机
    pub host: String,
    /// 端口
    pub port: u16,
    /// 用户名
    pub username: String,
    /// 认证凭据
    pub credentials: Credentials,
    /// 连接超时（秒）
    pub connect_timeout: u64,
    /// 心跳配置
    pub keepalive: KeepaliveConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: constants::DEFAULT_SSH_PORT,
            username: String::new(),
            credentials: Credentials::default(),
            connect_timeout: constants::DEFAULT_CONNECT_TIMEOUT_SECS,
            keepalive: KeepaliveConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.credentials.password = Some(password.into());
        self
    }

    pub fn with_identity(mut self, key_path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        self.credentials.identities.push(Identity {
            key_path: key_path.into(),
            passphrase,
        });
        self
    }

    /// host:port 形式，用于日志
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 构建 russh 客户端配置
    ///
    /// 不设置 inactivity_timeout：隧道可能长时间空闲，断线由心跳发现。
    pub fn to_russh_config(&self) -> russh::client::Config {
        let mut config = russh::client::Config::default();
        config.inactivity_timeout = None;
        if self.keepalive.enabled {
            config.keepalive_interval = Some(Duration::from_secs(self.keepalive.interval));
            config.keepalive_max = self.keepalive.max_retries as usize;
        }
        config
    }
}

/// 认证凭据
///
/// 密钥与密码可以同时存在：先依次尝试所有密钥，最后尝试密码。
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    pub password: Option<String>,
    pub identities: Vec<Identity>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.password.is_none() && self.identities.is_empty()
    }
}

/// 私钥身份
#[derive(Clone, Debug)]
pub struct Identity {
    /// 私钥文件路径
    pub key_path: PathBuf,
    /// 私钥密码（如果有）
    pub passphrase: Option<String>,
}

/// 心跳配置
#[derive(Clone, Debug)]
pub struct KeepaliveConfig {
    /// 是否启用心跳
    pub enabled: bool,
    /// 心跳间隔（秒）
    pub interval: u64,
    /// 最大重试次数
    pub max_retries: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: keepalive::INTERVAL_SECS,
            max_retries: keepalive::MAX_RETRIES,
        }
    }
}
