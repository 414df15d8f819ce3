// 服务模块

pub mod tunnel_config;

pub use tunnel_config::{default_config_path, load, parse_tunnel_config, ConfigError, TunnelConfig};
