// 隧道配置加载服务

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::constants::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_SSH_PORT,
};
use crate::models::{ForwardNode, TunnelNode};
use crate::ssh::{ConnectionConfig, ForwardDirection, PortForwardSpec};

/// 配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid tunnel document: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("No forward configured")]
    NoForwards,

    #[error("Invalid forward #{index}: {reason}")]
    InvalidForward { index: usize, reason: String },

    #[error("Cannot determine the system config directory")]
    NoConfigDir,
}

/// 已校验的隧道配置
#[derive(Clone, Debug)]
pub struct TunnelConfig {
    pub connection: ConnectionConfig,
    /// 按文档顺序
    pub forwards: Vec<PortForwardSpec>,
    pub poll_interval: Duration,
}

/// 配置摘要（不含密码）
#[derive(Debug, Serialize)]
pub struct TunnelSummary<'a> {
    pub host: &'a str,
    pub port: u16,
    pub user: &'a str,
    pub keyfiles: Vec<&'a Path>,
    pub connect_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub forwards: &'a [PortForwardSpec],
}

impl TunnelConfig {
    pub fn summary(&self) -> TunnelSummary<'_> {
        TunnelSummary {
            host: &self.connection.host,
            port: self.connection.port,
            user: &self.connection.username,
            keyfiles: self
                .connection
                .credentials
                .identities
                .iter()
                .map(|identity| identity.key_path.as_path())
                .collect(),
            connect_timeout_secs: self.connection.connect_timeout,
            poll_interval_secs: self.poll_interval.as_secs(),
            forwards: &self.forwards,
        }
    }
}

/// 默认配置文件路径
/// Linux: ~/.config/tunnelkeeper/tunnel.xml
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::NoConfigDir)?
        .join(CONFIG_DIR_NAME)
        .join(CONFIG_FILE_NAME))
}

/// 从文件加载配置
pub fn load(path: &Path) -> Result<TunnelConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_tunnel_config(&content)
}

/// 解析并校验 XML 配置
pub fn parse_tunnel_config(xml: &str) -> Result<TunnelConfig, ConfigError> {
    let node: TunnelNode = quick_xml::de::from_str(xml)?;

    let user = required(&node.user, "user")?;
    let host = required(&node.host, "host")?;
    let password = required(&node.password, "password")?;

    let port = node
        .port
        .as_deref()
        .and_then(|p| p.trim().parse::<u16>().ok())
        .filter(|p| *p != 0)
        .unwrap_or(DEFAULT_SSH_PORT);

    let mut connection = ConnectionConfig::new(host, port, user).with_password(password);
    connection.connect_timeout =
        seconds(&node.connect_timeout, "connectTimeout", DEFAULT_CONNECT_TIMEOUT_SECS);

    for keyfile in &node.keyfiles {
        let path = keyfile.path.trim();
        if path.is_empty() {
            continue;
        }
        connection = connection.with_identity(path, keyfile.passphrase.clone());
    }

    if node.forwards.is_empty() {
        return Err(ConfigError::NoForwards);
    }

    let forwards = node
        .forwards
        .iter()
        .enumerate()
        .map(|(index, forward)| parse_forward(index, forward))
        .collect::<Result<Vec<_>, _>>()?;

    let poll_interval = Duration::from_secs(seconds(
        &node.poll_interval,
        "pollInterval",
        DEFAULT_POLL_INTERVAL_SECS,
    ));

    Ok(TunnelConfig {
        connection,
        forwards,
        poll_interval,
    })
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingField(field))
}

/// 正整数秒数，非法时回退默认值
fn seconds(value: &Option<String>, field: &str, default: u64) -> u64 {
    let Some(raw) = value.as_deref() else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => secs,
        _ => {
            warn!("[Config] Invalid {} '{}', using {}s", field, raw, default);
            default
        }
    }
}

fn parse_forward(index: usize, node: &ForwardNode) -> Result<PortForwardSpec, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidForward { index, reason };

    let direction = match node
        .direction
        .as_deref()
        .map(|d| d.trim().to_ascii_lowercase())
        .as_deref()
    {
        Some("l") | Some("local") => ForwardDirection::Local,
        Some("r") | Some("remote") => ForwardDirection::Remote,
        Some(other) => return Err(invalid(format!("unknown direction '{}'", other))),
        None => return Err(invalid("missing direction attribute".to_string())),
    };

    let port = |value: &Option<String>, field: &str| -> Result<u16, ConfigError> {
        let raw = value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| invalid(format!("missing {}", field)))?;
        raw.parse::<u16>()
            .map_err(|_| invalid(format!("invalid {} '{}'", field, raw)))
    };

    let local_port = port(&node.local_port, "localPort")?;
    let remote_port = port(&node.remote_port, "remotePort")?;
    let host = node
        .host
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("missing host".to_string()))?;

    Ok(match direction {
        ForwardDirection::Local => PortForwardSpec::local(local_port, host, remote_port),
        ForwardDirection::Remote => PortForwardSpec::remote(remote_port, host, local_port),
    })
}
