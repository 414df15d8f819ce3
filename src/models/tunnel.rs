// 隧道配置文档结构
//
// 与 XML 一一对应的原始结构，字段均为可选字符串，校验与默认值在 services::tunnel_config 中处理。

use serde::Deserialize;

/// 根元素 <tunnel>
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename = "tunnel")]
pub struct TunnelNode {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, rename = "keyfile")]
    pub keyfiles: Vec<KeyfileNode>,
    /// 非法或缺失时使用 22
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default, rename = "connectTimeout")]
    pub connect_timeout: Option<String>,
    #[serde(default, rename = "pollInterval")]
    pub poll_interval: Option<String>,
    #[serde(default, rename = "forward")]
    pub forwards: Vec<ForwardNode>,
}

/// <keyfile passphrase="...">path</keyfile>
#[derive(Clone, Debug, Default, Deserialize)]
pub struct KeyfileNode {
    #[serde(default, rename = "@passphrase")]
    pub passphrase: Option<String>,
    #[serde(default, rename = "$text")]
    pub path: String,
}

/// <forward direction="L|R">
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ForwardNode {
    #[serde(default, rename = "@direction")]
    pub direction: Option<String>,
    #[serde(default, rename = "localPort")]
    pub local_port: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default, rename = "remotePort")]
    pub remote_port: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_document() {
        let xml = r#"
            <tunnel>
                <user>ops</user>
                <host>gw.example.com</host>
                <password>secret</password>
                <keyfile passphrase="pw">/home/ops/.ssh/id_ed25519</keyfile>
                <forward direction="L">
                    <localPort>8080</localPort>
                    <host>10.0.0.5</host>
                    <remotePort>80</remotePort>
                </forward>
                <keyfile>/home/ops/.ssh/id_rsa</keyfile>
            </tunnel>
        "#;

        let node: TunnelNode = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(node.user.as_deref(), Some("ops"));
        assert_eq!(node.port, None);
        assert_eq!(node.keyfiles.len(), 2);
        assert_eq!(node.keyfiles[0].passphrase.as_deref(), Some("pw"));
        assert_eq!(node.keyfiles[1].path, "/home/ops/.ssh/id_rsa");
        assert_eq!(node.forwards.len(), 1);
        assert_eq!(node.forwards[0].direction.as_deref(), Some("L"));
        assert_eq!(node.forwards[0].remote_port.as_deref(), Some("80"));
    }
}
