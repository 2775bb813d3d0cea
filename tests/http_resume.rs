//! 使用本地 HTTP 服务器验证真实传输层的暂停、续传和取消

use downtask::config::Config;
use downtask::core::error::DownloadError;
use downtask::core::task::{Dispatcher, DownloadRequest, DownloadTask, ResumeToken, TransferStart};
use downtask::core::transport::http::ResumeData;
use downtask::core::transport::HttpTransport;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

const ETAG: &str = "\"v1\"";
const WAIT: Duration = Duration::from_secs(10);

fn body() -> Vec<u8> {
    (0..100u8).collect()
}

#[derive(Clone, Copy)]
struct ServerOptions {
    /// 是否支持 Range
    ranges: bool,
    /// 第一个完整请求只发送这么多字节后停住
    stall_first_at: Option<usize>,
    not_found: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            ranges: true,
            stall_first_at: None,
            not_found: false,
        }
    }
}

struct TestServer {
    addr: SocketAddr,
    /// 每个请求携带的 Range 头
    ranges: Arc<Mutex<Vec<Option<String>>>>,
}

impl TestServer {
    async fn start(options: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ranges = Arc::new(Mutex::new(Vec::new()));
        let stalled = Arc::new(AtomicBool::new(false));

        let seen = ranges.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, options, seen.clone(), stalled.clone()));
            }
        });
        TestServer { addr, ranges }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn ranges(&self) -> Vec<Option<String>> {
        self.ranges.lock().unwrap().clone()
    }
}

async fn serve(
    mut socket: TcpStream,
    options: ServerOptions,
    ranges: Arc<Mutex<Vec<Option<String>>>>,
    stalled: Arc<AtomicBool>,
) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    let head = String::from_utf8_lossy(&request).to_string();
    let header = |name: &str| {
        head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim().to_string())
        })
    };
    let range = header("range");
    let if_range = header("if-range");
    ranges.lock().unwrap().push(range.clone());

    if options.not_found {
        let _ = socket
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await;
        return;
    }

    let body = body();
    let start = match range {
        Some(range) if options.ranges && if_range.as_deref().map_or(true, |v| v == ETAG) => range
            .trim_start_matches("bytes=")
            .trim_end_matches('-')
            .parse::<usize>()
            .ok(),
        _ => None,
    };

    if let Some(start) = start {
        if start >= body.len() {
            let _ = socket
                .write_all(
                    format!(
                        "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        body.len()
                    )
                    .as_bytes(),
                )
                .await;
            return;
        }
    }

    let response_head = match start {
        Some(start) => format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nAccept-Ranges: bytes\r\nETag: {}\r\nConnection: close\r\n\r\n",
            body.len() - start,
            start,
            body.len() - 1,
            body.len(),
            ETAG
        ),
        None if options.ranges => format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nETag: {}\r\nConnection: close\r\n\r\n",
            body.len(),
            ETAG
        ),
        None => format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n", body.len()),
    };
    if socket.write_all(response_head.as_bytes()).await.is_err() {
        return;
    }

    let payload = &body[start.unwrap_or(0)..];
    if start.is_none() {
        if let Some(at) = options.stall_first_at {
            if !stalled.swap(true, Ordering::SeqCst) {
                let _ = socket.write_all(&payload[..at]).await;
                let _ = socket.flush().await;
                // 连接保持打开，直到客户端断开或运行时结束
                std::future::pending::<()>().await;
            }
        }
    }
    let _ = socket.write_all(payload).await;
    let _ = socket.shutdown().await;
}

type Outcome = (Result<PathBuf, DownloadError>, Option<u16>);

struct Download {
    task: DownloadTask,
    done: oneshot::Receiver<Outcome>,
    progress: mpsc::UnboundedReceiver<u64>,
    destination: PathBuf,
    temp_dir: PathBuf,
    _dir: tempfile::TempDir,
}

impl Download {
    fn new(url: &str, resume_token: Option<ResumeToken>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::in_dir(dir, url, |_| resume_token)
    }

    /// `token` 可以根据临时目录构造续传数据
    fn in_dir(dir: tempfile::TempDir, url: &str, token: impl FnOnce(&Path) -> Option<ResumeToken>) -> Self {
        let temp_dir = dir.path().join("tmp");
        let config = Config {
            temp_dir: temp_dir.to_string_lossy().to_string(),
            ..Config::default()
        };
        let transport = Arc::new(HttpTransport::new(&config).unwrap());
        let destination = dir.path().join("file.bin");

        let mut builder = DownloadTask::builder(DownloadRequest::get(url).unwrap(), &destination)
            .dispatcher(Dispatcher::new("http-test"));
        if let Some(token) = token(&temp_dir) {
            builder = builder.resume_token(token);
        }
        let task = builder.build(transport);

        let (progress_tx, progress) = mpsc::unbounded_channel();
        task.set_progress_callback(move |_written, total, _expected| {
            let _ = progress_tx.send(total);
        });
        let (done_tx, done) = oneshot::channel();
        task.set_completion_callback(move |_task, result, response| {
            let _ = done_tx.send((result.map(Path::to_path_buf).map_err(|e| e.clone()), response.map(|r| r.status)));
        });

        Download {
            task,
            done,
            progress,
            destination,
            temp_dir,
            _dir: dir,
        }
    }

    async fn wait_for_bytes(&mut self, bytes: u64) {
        loop {
            let total = timeout(WAIT, self.progress.recv()).await.unwrap().unwrap();
            if total >= bytes {
                return;
            }
        }
    }

    async fn outcome(self) -> (Outcome, PathBuf, PathBuf, DownloadTask, tempfile::TempDir) {
        let outcome = timeout(WAIT, self.done).await.unwrap().unwrap();
        (outcome, self.destination, self.temp_dir, self.task, self._dir)
    }
}

async fn temp_dir_becomes_empty(temp_dir: &Path) -> bool {
    for _ in 0..100 {
        if std::fs::read_dir(temp_dir).unwrap().next().is_none() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pause_at_40_then_resume_completes() {
    let server = TestServer::start(ServerOptions {
        stall_first_at: Some(40),
        ..ServerOptions::default()
    })
    .await;
    let mut download = Download::new(&server.url("/file.bin"), None);

    download.task.start();
    download.wait_for_bytes(40).await;
    download.task.pause();

    assert!(download.task.is_paused());
    let token = download.task.resume_token().expect("服务器支持 Range，暂停应得到续传数据");
    let data = ResumeData::decode(&token).unwrap();
    assert_eq!(data.offset, 40);
    assert_eq!(data.etag.as_deref(), Some(ETAG));

    download.task.resume();
    assert!(download.task.is_ready());
    download.task.start();

    let ((result, status), destination, temp_dir, task, _dir) = download.outcome().await;
    assert_eq!(result, Ok(destination.clone()));
    assert_eq!(status, Some(206));
    assert_eq!(std::fs::read(&destination).unwrap(), body());
    assert_eq!(task.transfer_start(), Some(TransferStart::Resumed { offset: 40 }));
    assert_eq!(server.ranges(), vec![None, Some("bytes=40-".to_string())]);
    assert!(temp_dir_becomes_empty(&temp_dir).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_token_from_previous_attempt_continues() {
    let server = TestServer::start(ServerOptions::default()).await;
    let url = server.url("/file.bin");
    let dir = tempfile::tempdir().unwrap();

    let download = Download::in_dir(dir, &url, |temp_dir| {
        let temp_path = temp_dir.join("previous.part");
        std::fs::write(&temp_path, &body()[..40]).unwrap();
        ResumeData {
            url: url.clone(),
            temp_path,
            offset: 40,
            etag: Some(ETAG.to_string()),
            last_modified: None,
        }
        .encode()
    });
    download.task.start();

    let ((result, status), destination, temp_dir, task, _dir) = download.outcome().await;
    assert_eq!(result, Ok(destination.clone()));
    assert_eq!(status, Some(206));
    assert_eq!(std::fs::read(&destination).unwrap(), body());
    assert_eq!(task.transfer_start(), Some(TransferStart::Resumed { offset: 40 }));
    assert_eq!(server.ranges(), vec![Some("bytes=40-".to_string())]);
    assert!(temp_dir_becomes_empty(&temp_dir).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pause_without_range_support_restarts() {
    let server = TestServer::start(ServerOptions {
        ranges: false,
        stall_first_at: Some(40),
        ..ServerOptions::default()
    })
    .await;
    let mut download = Download::new(&server.url("/file.bin"), None);

    download.task.start();
    download.wait_for_bytes(40).await;
    download.task.pause();
    assert!(download.task.is_paused());
    assert!(download.task.resume_token().is_none());

    download.task.resume();
    download.task.start();

    let ((result, status), destination, temp_dir, task, _dir) = download.outcome().await;
    assert_eq!(result, Ok(destination.clone()));
    assert_eq!(status, Some(200));
    assert_eq!(std::fs::read(&destination).unwrap(), body());
    assert_eq!(task.transfer_start(), Some(TransferStart::Fresh));
    assert_eq!(server.ranges(), vec![None, None]);
    assert!(temp_dir_becomes_empty(&temp_dir).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_before_start_creates_nothing() {
    let server = TestServer::start(ServerOptions::default()).await;
    let download = Download::new(&server.url("/file.bin"), None);

    download.task.cancel();

    let ((result, status), destination, _temp_dir, task, _dir) = download.outcome().await;
    assert_eq!(result, Err(DownloadError::Cancelled));
    assert_eq!(status, None);
    assert!(task.is_finished());
    assert!(!destination.exists());
    assert!(server.ranges().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_while_stalled_removes_partial_data() {
    let server = TestServer::start(ServerOptions {
        stall_first_at: Some(40),
        ..ServerOptions::default()
    })
    .await;
    let mut download = Download::new(&server.url("/file.bin"), None);

    download.task.start();
    download.wait_for_bytes(40).await;
    download.task.cancel();

    let ((result, _), destination, temp_dir, task, _dir) = download.outcome().await;
    assert_eq!(result, Err(DownloadError::Cancelled));
    assert!(task.resume_token().is_none());
    assert!(!destination.exists());
    assert!(temp_dir_becomes_empty(&temp_dir).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_error_is_reported() {
    let server = TestServer::start(ServerOptions {
        not_found: true,
        ..ServerOptions::default()
    })
    .await;
    let download = Download::new(&server.url("/missing.bin"), None);

    download.task.start();

    let ((result, status), destination, temp_dir, task, _dir) = download.outcome().await;
    assert_eq!(result, Err(DownloadError::ServerError { status: 404 }));
    assert_eq!(status, Some(404));
    assert!(task.resume_token().is_none());
    assert!(!destination.exists());
    assert!(temp_dir_becomes_empty(&temp_dir).await);
}

/// 在临时目录中准备 `length` 字节的部分文件，并构造对应的续传数据
fn partial_download(url: &str, temp_dir: &Path, length: usize) -> Option<ResumeToken> {
    let temp_path = temp_dir.join("previous.part");
    let content: Vec<u8> = body().into_iter().cycle().take(length).collect();
    std::fs::write(&temp_path, content).unwrap();
    ResumeData {
        url: url.to_string(),
        temp_path,
        offset: length as u64,
        etag: Some(ETAG.to_string()),
        last_modified: None,
    }
    .encode()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_token_covering_whole_file_completes_on_416() {
    let server = TestServer::start(ServerOptions::default()).await;
    let url = server.url("/file.bin");
    let dir = tempfile::tempdir().unwrap();

    let download = Download::in_dir(dir, &url, |temp_dir| partial_download(&url, temp_dir, 100));
    download.task.start();

    let ((result, status), destination, temp_dir, task, _dir) = download.outcome().await;
    assert_eq!(result, Ok(destination.clone()));
    assert_eq!(status, Some(416));
    assert_eq!(std::fs::read(&destination).unwrap(), body());
    assert_eq!(task.transfer_start(), Some(TransferStart::Resumed { offset: 100 }));
    assert_eq!(server.ranges(), vec![Some("bytes=100-".to_string())]);
    assert!(temp_dir_becomes_empty(&temp_dir).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unsatisfiable_range_restarts_from_zero() {
    let server = TestServer::start(ServerOptions::default()).await;
    let url = server.url("/file.bin");
    let dir = tempfile::tempdir().unwrap();

    // 服务器上的文件比记录的偏移短
    let download = Download::in_dir(dir, &url, |temp_dir| partial_download(&url, temp_dir, 120));
    download.task.start();

    let ((result, status), destination, temp_dir, task, _dir) = download.outcome().await;
    assert_eq!(result, Ok(destination.clone()));
    assert_eq!(status, Some(200));
    assert_eq!(std::fs::read(&destination).unwrap(), body());
    assert_eq!(task.transfer_start(), Some(TransferStart::Restarted));
    assert_eq!(server.ranges(), vec![Some("bytes=120-".to_string()), None]);
    assert!(temp_dir_becomes_empty(&temp_dir).await);
}
