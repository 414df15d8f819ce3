// SCP 文件传输协议
//
// 在远程命令通道（scp -t / scp -f）上实现的最小远程拷贝协议。
// 确认字节: 0 成功，1 可恢复错误，2 致命错误（后跟以换行结尾的消息），
// 流结束视为致命错误。
//
// 接收时对端给出的文件名原样拼接到目标目录下，文件大小也不设上限：
// 对端被视为已认证且可信。

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::config::ConnectionConfig;
use super::connection::SshConnection;
use super::error::TransferError;
use super::event::{LogEntry, SharedSink, TracingSink};
use crate::constants::transfer::{CHUNK_SIZE, MAX_FILENAME_LEN, MODE_PREFIX_LEN, UPLOAD_MODE};

/// 确认字节
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ack {
    /// 0
    Ok,
    /// 1 + 消息
    Warning(String),
    /// 2 + 消息
    Fatal(String),
    /// 流已结束
    Eof,
    /// 其他字节（例如 'C' 文件头）
    Other(u8),
}

impl Ack {
    /// 非成功确认的描述
    fn message(&self) -> String {
        match self {
            Ack::Ok => String::new(),
            Ack::Warning(msg) | Ack::Fatal(msg) => msg.clone(),
            Ack::Eof => "stream closed by peer".to_string(),
            Ack::Other(b) => format!("unexpected byte 0x{:02x}", b),
        }
    }
}

/// 对端在接收阶段发来的文件头
#[derive(Clone, Debug, PartialEq, Eq)]
struct FileHeader {
    mode: String,
    size: u64,
    name: String,
}

/// SCP 协议收发
///
/// 不持有传输状态，每次调用独立完成一个传输。
#[derive(Clone)]
pub struct FileTransfer {
    sink: SharedSink,
}

impl Default for FileTransfer {
    fn default() -> Self {
        Self::new(TracingSink::shared())
    }
}

impl FileTransfer {
    pub fn new(sink: SharedSink) -> Self {
        Self { sink }
    }

    /// 读取一个确认字节
    ///
    /// 1/2 之后的消息读到换行或流结束为止，并记录日志
    pub async fn read_ack<R>(&self, input: &mut R) -> Result<Ack, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let mut byte = [0u8; 1];
        if input.read(&mut byte).await? == 0 {
            return Ok(Ack::Eof);
        }

        match byte[0] {
            0 => Ok(Ack::Ok),
            code @ (1 | 2) => {
                let mut message = Vec::new();
                loop {
                    if input.read(&mut byte).await? == 0 || byte[0] == b'\n' {
                        break;
                    }
                    message.push(byte[0]);
                }
                let message = String::from_utf8_lossy(&message).into_owned();
                if code == 1 {
                    self.sink.emit(LogEntry::error(format!("[SCP] {}", message)));
                    Ok(Ack::Warning(message))
                } else {
                    self.sink.emit(LogEntry::fatal(format!("[SCP] {}", message)));
                    Ok(Ack::Fatal(message))
                }
            }
            other => Ok(Ack::Other(other)),
        }
    }

    /// 读取确认，非 0 时返回 Rejected
    async fn expect_ok<R>(&self, input: &mut R, stage: &'static str) -> Result<(), TransferError>
    where
        R: AsyncRead + Unpin,
    {
        match self.read_ack(input).await? {
            Ack::Ok => Ok(()),
            ack => Err(TransferError::Rejected {
                stage,
                message: ack.message(),
            }),
        }
    }

    /// 上传单个文件
    ///
    /// input/output 分别连接远程 `scp -t` 的 stdout/stdin。
    /// remote_name 覆盖文件头里的文件名（只取最后一段）。
    pub async fn send_file<R, W>(
        &self,
        input: &mut R,
        output: &mut W,
        local_path: &Path,
        remote_name: Option<&str>,
    ) -> Result<(), TransferError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.expect_ok(input, "start").await?;

        let metadata = tokio::fs::metadata(local_path).await?;
        if metadata.is_dir() {
            return Err(TransferError::Unsupported(format!(
                "{} is a directory",
                local_path.display()
            )));
        }
        let mut file = File::open(local_path).await?;

        let name = match remote_name {
            Some(name) => match base_name(name) {
                "" => {
                    return Err(TransferError::Unsupported(format!(
                        "remote name '{}' has no file name",
                        name
                    )))
                }
                base => base.to_string(),
            },
            None => local_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    TransferError::Unsupported(format!("{} has no file name", local_path.display()))
                })?,
        };

        let size = metadata.len();
        let header = format!("C{} {} {}\n", UPLOAD_MODE, size, name);
        output.write_all(header.as_bytes()).await?;
        output.flush().await?;

        self.expect_ok(input, "header").await?;

        self.sink.emit(LogEntry::debug(format!(
            "[SCP] Sending {} ({} bytes) as '{}'",
            local_path.display(),
            size,
            name
        )));

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            output.write_all(&buf[..n]).await?;
        }
        output.write_all(&[0]).await?;
        output.flush().await?;

        self.expect_ok(input, "content").await
    }

    /// 下载文件
    ///
    /// input/output 分别连接远程 `scp -f` 的 stdout/stdin。
    /// destination 是目录时文件写入 destination/<文件名>，对端可连续发送多个文件；
    /// 否则写入 destination 本身（覆盖），收到一个文件后返回。
    pub async fn receive_file<R, W>(
        &self,
        input: &mut R,
        output: &mut W,
        destination: &Path,
    ) -> Result<(), TransferError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        send_ok(output).await?;

        let mut received = 0usize;
        loop {
            match self.read_ack(input).await? {
                Ack::Other(b'C') => {}
                ack if received > 0 => {
                    self.sink.emit(LogEntry::debug(format!(
                        "[SCP] Transfer finished after {} file(s) ({:?})",
                        received, ack
                    )));
                    return Ok(());
                }
                ack => return Err(TransferError::NoFiles(ack.message())),
            }

            let header = read_header(input).await?;
            send_ok(output).await?;

            let is_dir = tokio::fs::metadata(destination)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            let target: PathBuf = if is_dir {
                destination.join(&header.name)
            } else {
                destination.to_path_buf()
            };

            self.sink.emit(LogEntry::debug(format!(
                "[SCP] Receiving '{}' ({} bytes, mode {}) into {}",
                header.name,
                header.size,
                header.mode,
                target.display()
            )));

            let mut file = File::create(&target).await?;
            let copied = tokio::io::copy(&mut (&mut *input).take(header.size), &mut file).await?;
            file.flush().await?;
            if copied != header.size {
                return Err(TransferError::ShortRead {
                    expected: header.size,
                    received: copied,
                });
            }

            self.expect_ok(input, "content").await?;
            send_ok(output).await?;
            received += 1;

            if !is_dir {
                return Ok(());
            }
        }
    }
}

/// 发送 0 确认
async fn send_ok<W>(output: &mut W) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    output.write_all(&[0]).await?;
    output.flush().await?;
    Ok(())
}

/// 解析 'C' 之后的文件头: "0644 <size> <name>\n"
async fn read_header<R>(input: &mut R) -> Result<FileHeader, TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut mode = [0u8; MODE_PREFIX_LEN];
    input
        .read_exact(&mut mode)
        .await
        .map_err(|_| TransferError::UnexpectedEof("file mode"))?;
    let mode = String::from_utf8_lossy(&mode).trim_end().to_string();

    let mut byte = [0u8; 1];
    let mut size: u64 = 0;
    let mut digits = 0usize;
    loop {
        if input.read(&mut byte).await? == 0 {
            return Err(TransferError::UnexpectedEof("file size"));
        }
        match byte[0] {
            b' ' => break,
            d @ b'0'..=b'9' => {
                size = size
                    .checked_mul(10)
                    .and_then(|s| s.checked_add(u64::from(d - b'0')))
                    .ok_or_else(|| TransferError::Protocol("file size overflows".to_string()))?;
                digits += 1;
            }
            other => {
                return Err(TransferError::Protocol(format!(
                    "invalid byte 0x{:02x} in file size",
                    other
                )))
            }
        }
    }
    if digits == 0 {
        return Err(TransferError::Protocol("missing file size".to_string()));
    }

    let mut name = Vec::with_capacity(64);
    let mut terminated = false;
    for _ in 0..MAX_FILENAME_LEN {
        if input.read(&mut byte).await? == 0 {
            return Err(TransferError::UnexpectedEof("file name"));
        }
        if byte[0] == b'\n' {
            terminated = true;
            break;
        }
        name.push(byte[0]);
    }
    if !terminated {
        return Err(TransferError::Protocol(format!(
            "file name exceeds {} bytes",
            MAX_FILENAME_LEN
        )));
    }

    Ok(FileHeader {
        mode,
        size,
        name: String::from_utf8_lossy(&name).into_owned(),
    })
}

/// 取最后一个 '/' 之后的部分
fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// 上传本地文件到远程路径
///
/// 每次传输新建独立会话，完成后断开
pub async fn upload(
    config: &ConnectionConfig,
    local_path: &Path,
    remote_path: &str,
    sink: SharedSink,
) -> Result<(), TransferError> {
    let mut connection = SshConnection::with_config(config.clone(), sink.clone());
    let result: Result<(), TransferError> = async {
        let (mut input, mut output) = connection
            .open_command_channel(&format!("scp -t {}", remote_path))
            .await?;
        FileTransfer::new(sink.clone())
            .send_file(&mut input, &mut output, local_path, None)
            .await
    }
    .await;
    connection.close().await;

    if let Err(e) = &result {
        sink.emit(
            LogEntry::error(format!(
                "[SCP] Upload {} -> {}:{} failed",
                local_path.display(),
                config.host,
                remote_path
            ))
            .with_cause(e),
        );
    }
    result
}

/// 下载远程文件到本地路径（文件或目录）
pub async fn download(
    config: &ConnectionConfig,
    remote_path: &str,
    local_path: &Path,
    sink: SharedSink,
) -> Result<(), TransferError> {
    let mut connection = SshConnection::with_config(config.clone(), sink.clone());
    let result: Result<(), TransferError> = async {
        let (mut input, mut output) = connection
            .open_command_channel(&format!("scp -f {}", remote_path))
            .await?;
        FileTransfer::new(sink.clone())
            .receive_file(&mut input, &mut output, local_path)
            .await
    }
    .await;
    connection.close().await;

    if let Err(e) = &result {
        sink.emit(
            LogEntry::error(format!(
                "[SCP] Download {}:{} -> {} failed",
                config.host,
                remote_path,
                local_path.display()
            ))
            .with_cause(e),
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::event::{LogEntry, LogLevel};
    use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};
    use tokio::sync::mpsc;

    fn pipe() -> (
        (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>),
        (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>),
    ) {
        let (a, b) = duplex(256 * 1024);
        (split(a), split(b))
    }

    fn recording() -> (FileTransfer, mpsc::UnboundedReceiver<LogEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FileTransfer::new(std::sync::Arc::new(tx)), rx)
    }

    async fn loopback(content: &[u8]) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        let target = dir.path().join("target.bin");
        tokio::fs::write(&source, content).await.unwrap();

        let ((mut sr, mut sw), (mut rr, mut rw)) = pipe();
        let sender = FileTransfer::default();
        let receiver = FileTransfer::default();

        let (sent, received) = tokio::join!(
            sender.send_file(&mut sr, &mut sw, &source, None),
            receiver.receive_file(&mut rr, &mut rw, &target),
        );
        sent.unwrap();
        received.unwrap();
        tokio::fs::read(&target).await.unwrap()
    }

    #[tokio::test]
    async fn test_loopback_reproduces_bytes() {
        let content: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(loopback(&content).await, content);
    }

    #[tokio::test]
    async fn test_loopback_zero_length() {
        assert!(loopback(b"").await.is_empty());
    }

    #[tokio::test]
    async fn test_send_header_uses_override_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("local.txt");
        tokio::fs::write(&source, b"hello").await.unwrap();

        let ((mut sr, mut sw), (mut pr, mut pw)) = pipe();
        // 对端预先写好三个确认
        pw.write_all(&[0, 0, 0]).await.unwrap();

        FileTransfer::default()
            .send_file(&mut sr, &mut sw, &source, Some("/srv/data/remote.txt"))
            .await
            .unwrap();
        sw.shutdown().await.unwrap();

        let mut wire = Vec::new();
        pr.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire, b"C0644 5 remote.txt\nhello\0");
    }

    #[tokio::test]
    async fn test_send_aborts_on_initial_error_ack() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        tokio::fs::write(&source, b"data").await.unwrap();

        let ((mut sr, mut sw), (mut pr, mut pw)) = pipe();
        pw.write_all(b"\x01scp: /nope: Permission denied\n").await.unwrap();

        let (transfer, mut logs) = recording();
        let err = transfer
            .send_file(&mut sr, &mut sw, &source, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Rejected { stage: "start", .. }));
        sw.shutdown().await.unwrap();

        let mut wire = Vec::new();
        pr.read_to_end(&mut wire).await.unwrap();
        assert!(wire.is_empty());

        let entry = logs.try_recv().unwrap();
        assert_eq!(entry.level, LogLevel::Error);
        assert!(entry.message.contains("Permission denied"));
    }

    #[tokio::test]
    async fn test_send_rejects_directory_without_writing() {
        let dir = tempfile::tempdir().unwrap();

        let ((mut sr, mut sw), (mut pr, mut pw)) = pipe();
        pw.write_all(&[0]).await.unwrap();

        let err = FileTransfer::default()
            .send_file(&mut sr, &mut sw, dir.path(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Unsupported(_)));
        sw.shutdown().await.unwrap();

        let mut wire = Vec::new();
        pr.read_to_end(&mut wire).await.unwrap();
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn test_send_rejects_remote_name_without_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("local.txt");
        tokio::fs::write(&source, b"hello").await.unwrap();

        let ((mut sr, mut sw), (mut pr, mut pw)) = pipe();
        pw.write_all(&[0]).await.unwrap();

        let err = FileTransfer::default()
            .send_file(&mut sr, &mut sw, &source, Some("/srv/data/"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Unsupported(_)));
        sw.shutdown().await.unwrap();

        let mut wire = Vec::new();
        pr.read_to_end(&mut wire).await.unwrap();
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn test_send_aborts_when_header_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("big.txt");
        tokio::fs::write(&source, b"payload").await.unwrap();

        let ((mut sr, mut sw), (mut pr, mut pw)) = pipe();
        pw.write_all(b"\x00\x02scp: disk full\n").await.unwrap();

        let (transfer, mut logs) = recording();
        let err = transfer
            .send_file(&mut sr, &mut sw, &source, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Rejected { stage: "header", .. }));
        sw.shutdown().await.unwrap();

        let mut wire = Vec::new();
        pr.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire, b"C0644 7 big.txt\n");

        let entry = logs.try_recv().unwrap();
        assert_eq!(entry.level, LogLevel::Fatal);
    }

    #[tokio::test]
    async fn test_send_fails_when_peer_closes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        tokio::fs::write(&source, b"x").await.unwrap();

        let ((mut sr, mut sw), (pr, pw)) = pipe();
        drop(pw);
        drop(pr);

        let err = FileTransfer::default()
            .send_file(&mut sr, &mut sw, &source, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Rejected { stage: "start", .. }));
    }

    #[tokio::test]
    async fn test_receive_two_files_into_directory() {
        let dir = tempfile::tempdir().unwrap();

        let ((mut rr, mut rw), (mut pr, mut pw)) = pipe();
        pw.write_all(b"C0644 5 a.txt\nhello\0C0600 3 b.txt\nabc\0E\n")
            .await
            .unwrap();

        FileTransfer::default()
            .receive_file(&mut rr, &mut rw, dir.path())
            .await
            .unwrap();
        rw.shutdown().await.unwrap();

        assert_eq!(tokio::fs::read(dir.path().join("a.txt")).await.unwrap(), b"hello");
        assert_eq!(tokio::fs::read(dir.path().join("b.txt")).await.unwrap(), b"abc");

        // 开头一个，每个文件两个
        let mut acks = Vec::new();
        pr.read_to_end(&mut acks).await.unwrap();
        assert_eq!(acks, vec![0u8; 5]);
    }

    #[tokio::test]
    async fn test_receive_single_file_destination_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        tokio::fs::write(&target, b"old contents").await.unwrap();

        let ((mut rr, mut rw), (_pr, mut pw)) = pipe();
        pw.write_all(b"C0644 3 remote-name.txt\nnew\0").await.unwrap();

        FileTransfer::default()
            .receive_file(&mut rr, &mut rw, &target)
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"new");
        assert!(!dir.path().join("remote-name.txt").exists());
    }

    #[tokio::test]
    async fn test_receive_rejects_unterminated_256_byte_name() {
        let dir = tempfile::tempdir().unwrap();

        let ((mut rr, mut rw), (_pr, mut pw)) = pipe();
        let mut wire = b"C0644 3 ".to_vec();
        wire.extend(std::iter::repeat(b'a').take(256));
        wire.extend_from_slice(b"\nabc\0");
        pw.write_all(&wire).await.unwrap();

        let err = FileTransfer::default()
            .receive_file(&mut rr, &mut rw, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_receive_accepts_255_byte_name() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");

        let ((mut rr, mut rw), (_pr, mut pw)) = pipe();
        let mut wire = b"C0644 1 ".to_vec();
        wire.extend(std::iter::repeat(b'n').take(255));
        wire.extend_from_slice(b"\nz\0");
        pw.write_all(&wire).await.unwrap();

        FileTransfer::default()
            .receive_file(&mut rr, &mut rw, &target)
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"z");
    }

    #[tokio::test]
    async fn test_receive_short_read() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");

        let ((mut rr, mut rw), (_pr, mut pw)) = pipe();
        pw.write_all(b"C0644 10 x\nabc").await.unwrap();
        pw.shutdown().await.unwrap();

        let err = FileTransfer::default()
            .receive_file(&mut rr, &mut rw, &target)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::ShortRead {
                expected: 10,
                received: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_receive_rejects_non_digit_size() {
        let dir = tempfile::tempdir().unwrap();

        let ((mut rr, mut rw), (_pr, mut pw)) = pipe();
        pw.write_all(b"C0644 1x2 name\n").await.unwrap();

        let err = FileTransfer::default()
            .receive_file(&mut rr, &mut rw, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_receive_reports_missing_remote_file() {
        let dir = tempfile::tempdir().unwrap();

        let ((mut rr, mut rw), (_pr, mut pw)) = pipe();
        pw.write_all(b"\x01scp: /missing: No such file or directory\n")
            .await
            .unwrap();

        let (transfer, mut logs) = recording();
        let err = transfer
            .receive_file(&mut rr, &mut rw, dir.path())
            .await
            .unwrap_err();
        match err {
            TransferError::NoFiles(message) => assert!(message.contains("No such file")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(logs.try_recv().unwrap().level, LogLevel::Error);
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("/a/b/c.txt"), "c.txt");
        assert_eq!(base_name("c.txt"), "c.txt");
        assert_eq!(base_name("dir/"), "");
    }
}
