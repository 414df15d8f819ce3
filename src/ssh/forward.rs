// 端口转发描述
//
// 规范字符串格式：
// - 本地转发: L:<localPort>:<remoteHost>:<remotePort>
// - 远程转发: R:<remotePort>:<remoteHost>:<localPort>

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// 转发方向
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ForwardDirection {
    /// 本地端口 -> 远端目标
    Local,
    /// 服务器端口 -> 本地可达的目标
    Remote,
}

impl ForwardDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "L",
            Self::Remote => "R",
        }
    }
}

/// 单条端口转发
///
/// 三个字段都必须设置后才能使用；未设置完整时渲染为 "not configured"。
/// 远程转发中 remote_host 表示转发的目的主机（从客户端一侧访问）。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortForwardSpec {
    direction: ForwardDirection,
    local_port: Option<u16>,
    remote_host: Option<String>,
    remote_port: Option<u16>,
}

impl PortForwardSpec {
    /// 创建空的转发描述，字段稍后设置
    pub fn new(direction: ForwardDirection) -> Self {
        Self {
            direction,
            local_port: None,
            remote_host: None,
            remote_port: None,
        }
    }

    /// 本地转发：localPort -> remoteHost:remotePort
    pub fn local(local_port: u16, remote_host: impl Into<String>, remote_port: u16) -> Self {
        Self {
            direction: ForwardDirection::Local,
            local_port: Some(local_port),
            remote_host: Some(remote_host.into()),
            remote_port: Some(remote_port),
        }
    }

    /// 远程转发：服务器 remotePort -> host:localPort
    pub fn remote(remote_port: u16, host: impl Into<String>, local_port: u16) -> Self {
        Self {
            direction: ForwardDirection::Remote,
            local_port: Some(local_port),
            remote_host: Some(host.into()),
            remote_port: Some(remote_port),
        }
    }

    pub fn set_local_port(&mut self, port: u16) {
        self.local_port = Some(port);
    }

    pub fn set_remote_host(&mut self, host: impl Into<String>) {
        self.remote_host = Some(host.into());
    }

    pub fn set_remote_port(&mut self, port: u16) {
        self.remote_port = Some(port);
    }

    pub fn direction(&self) -> ForwardDirection {
        self.direction
    }

    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    pub fn remote_host(&self) -> Option<&str> {
        self.remote_host.as_deref()
    }

    pub fn remote_port(&self) -> Option<u16> {
        self.remote_port
    }

    pub fn is_configured(&self) -> bool {
        self.parts().is_some()
    }

    /// 返回 (localPort, remoteHost, remotePort)，未配置完整时返回 None
    pub fn parts(&self) -> Option<(u16, &str, u16)> {
        match (self.local_port, self.remote_host.as_deref(), self.remote_port) {
            (Some(local), Some(host), Some(remote)) if !host.is_empty() => {
                Some((local, host, remote))
            }
            _ => None,
        }
    }
}

impl fmt::Display for PortForwardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some((local, host, remote)) = self.parts() else {
            return f.write_str("not configured");
        };
        match self.direction {
            ForwardDirection::Local => write!(f, "L:{}:{}:{}", local, host, remote),
            ForwardDirection::Remote => write!(f, "R:{}:{}:{}", remote, host, local),
        }
    }
}

impl Serialize for PortForwardSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 规范字符串解析错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid forward '{input}': {reason}")]
pub struct ParseForwardError {
    pub input: String,
    pub reason: &'static str,
}

impl FromStr for PortForwardSpec {
    type Err = ParseForwardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason| ParseForwardError {
            input: s.to_string(),
            reason,
        };

        let (direction, rest) = s.split_once(':').ok_or_else(|| fail("missing direction"))?;
        let (first, rest) = rest.split_once(':').ok_or_else(|| fail("missing port"))?;
        // 主机名可能是带冒号的 IPv6 地址，最后一段才是端口
        let (host, last) = rest.rsplit_once(':').ok_or_else(|| fail("missing port"))?;

        if host.is_empty() {
            return Err(fail("empty host"));
        }
        let first: u16 = first.parse().map_err(|_| fail("invalid port"))?;
        let last: u16 = last.parse().map_err(|_| fail("invalid port"))?;

        match direction {
            "L" | "l" => Ok(Self::local(first, host, last)),
            "R" | "r" => Ok(Self::remote(first, host, last)),
            _ => Err(fail("direction must be L or R")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_local() {
        let spec = PortForwardSpec::local(8080, "example.com", 80);
        assert_eq!(spec.to_string(), "L:8080:example.com:80");
        assert_eq!(spec.parts(), Some((8080, "example.com", 80)));
    }

    #[test]
    fn test_canonical_remote() {
        let spec = PortForwardSpec::remote(2222, "10.0.0.5", 22);
        assert_eq!(spec.to_string(), "R:2222:10.0.0.5:22");
        assert_eq!(spec.remote_port(), Some(2222));
        assert_eq!(spec.local_port(), Some(22));
    }

    #[test]
    fn test_round_trip() {
        for text in ["L:8080:example.com:80", "R:2222:10.0.0.5:22", "L:5432:::1:5432"] {
            let spec: PortForwardSpec = text.parse().unwrap();
            assert_eq!(spec.to_string(), text);
        }
        let spec: PortForwardSpec = "R:2222:10.0.0.5:22".parse().unwrap();
        assert_eq!(spec.direction(), ForwardDirection::Remote);
        assert_eq!(spec.remote_host(), Some("10.0.0.5"));
    }

    #[test]
    fn test_unconfigured() {
        let mut spec = PortForwardSpec::new(ForwardDirection::Local);
        assert!(!spec.is_configured());
        assert_eq!(spec.to_string(), "not configured");

        spec.set_local_port(8080);
        spec.set_remote_host("example.com");
        assert_eq!(spec.to_string(), "not configured");

        spec.set_remote_port(80);
        assert!(spec.is_configured());
        assert_eq!(spec.to_string(), "L:8080:example.com:80");
    }

    #[test]
    fn test_parse_errors() {
        assert!("X:1:host:2".parse::<PortForwardSpec>().is_err());
        assert!("L:1:host".parse::<PortForwardSpec>().is_err());
        assert!("L:abc:host:2".parse::<PortForwardSpec>().is_err());
        assert!("L:1::2".parse::<PortForwardSpec>().is_err());
        assert!("L:70000:host:2".parse::<PortForwardSpec>().is_err());
    }
}
