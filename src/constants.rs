// 默认参数常量

/// SSH 默认端口
pub const DEFAULT_SSH_PORT: u16 = 22;

/// 连接超时（秒）
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;

/// 隧道存活检查间隔（秒）
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// 心跳参数
pub mod keepalive {
    pub const INTERVAL_SECS: u64 = 30;
    pub const MAX_RETRIES: u32 = 3;
}

/// SCP 传输参数
pub mod transfer {
    /// 文件内容分块大小
    pub const CHUNK_SIZE: usize = 32 * 1024;
    /// 文件名字段最大长度（含换行符）
    pub const MAX_FILENAME_LEN: usize = 256;
    /// 模式前缀长度，例如 "0644 "
    pub const MODE_PREFIX_LEN: usize = 5;
    /// 上传时声明的文件模式
    pub const UPLOAD_MODE: &str = "0644";
}

/// 本地转发监听地址
pub const LOCAL_BIND_ADDR: &str = "127.0.0.1";

/// 远程转发在服务器上的监听地址
pub const REMOTE_BIND_ADDR: &str = "localhost";

/// 默认配置文件名
pub const CONFIG_DIR_NAME: &str = "tunnelkeeper";
pub const CONFIG_FILE_NAME: &str = "tunnel.xml";
