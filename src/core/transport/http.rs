use futures::StreamExt;
use reqwest::{header, Method, Response, StatusCode};
use serde::{Serialize, Deserialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::runtime::Handle;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::Config;
use crate::core::error::{DownloadError, DownloadResult};
use crate::core::task::request::{DownloadRequest, ResponseInfo, ResumeToken};
use crate::core::task::util::remove_if_exists;
use super::{EventSink, TransferHandle, Transport};

/// HTTP 传输层生成的续传数据内容，序列化为 JSON 后放入 [`ResumeToken`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeData {
    pub url: String,
    pub temp_path: PathBuf,
    pub offset: u64,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl ResumeData {
    pub fn encode(&self) -> Option<ResumeToken> {
        serde_json::to_vec(self).ok().map(ResumeToken::from_vec)
    }

    pub fn decode(token: &ResumeToken) -> DownloadResult<Self> {
        serde_json::from_slice(token.as_bytes())
            .map_err(|e| DownloadError::ResumeRejected(format!("无法解析续传数据: {}", e)))
    }

    /// If-Range 使用的校验值，优先 ETag
    fn validator(&self) -> Option<&str> {
        self.etag.as_deref().or(self.last_modified.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopSignal {
    Running,
    /// 暂停：保留临时文件供续传
    Suspend,
    /// 中止：删除临时文件
    Abort,
}

/// 传输线程与句柄共享的进度信息
#[derive(Default)]
struct TransferShared {
    /// 已经写入临时文件的字节数
    written: AtomicU64,
    /// 服务器是否支持按范围获取
    ranged: AtomicBool,
    validators: Mutex<(Option<String>, Option<String>)>,
}

impl TransferShared {
    fn resume_data(&self, url: &str, temp_path: &Path) -> Option<ResumeData> {
        let offset = self.written.load(Ordering::SeqCst);
        if offset == 0 || !self.ranged.load(Ordering::SeqCst) {
            return None;
        }
        let (etag, last_modified) = self.validators.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Some(ResumeData {
            url: url.to_string(),
            temp_path: temp_path.to_path_buf(),
            offset,
            etag,
            last_modified,
        })
    }
}

/// 基于 reqwest 的 HTTP(S) 传输层
///
/// 每次 `open` 在创建时捕获的 tokio 运行时上启动一个传输任务，数据先写入
/// `temp_dir` 下的临时文件。服务器支持 `Range` 时，暂停和失败都会给出续传数据。
pub struct HttpTransport {
    client: reqwest::Client,
    runtime: Handle,
    temp_dir: PathBuf,
    enable_resume: bool,
}

impl HttpTransport {
    /// 必须在 tokio 运行时中调用
    pub fn new(config: &Config) -> DownloadResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| DownloadError::Unknown(format!("HttpTransport 需要在 tokio 运行时中创建: {}", e)))?;
        Self::with_runtime(config, runtime)
    }

    pub fn with_runtime(config: &Config, runtime: Handle) -> DownloadResult<Self> {
        std::fs::create_dir_all(&config.temp_dir)?;
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .read_timeout(Duration::from_secs(config.timeout))
            .build()?;
        Ok(Self {
            client,
            runtime,
            temp_dir: PathBuf::from(&config.temp_dir),
            enable_resume: config.enable_resume,
        })
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }
}

impl Transport for HttpTransport {
    fn open(
        &self,
        request: &DownloadRequest,
        resume_token: Option<ResumeToken>,
        events: EventSink,
    ) -> DownloadResult<Box<dyn TransferHandle>> {
        let method = Method::from_bytes(request.method().as_bytes())
            .map_err(|_| DownloadError::Unknown(format!("不支持的请求方法: {}", request.method())))?;

        let resume = match resume_token {
            Some(token) => {
                let data = ResumeData::decode(&token)?;
                if data.url != request.url().as_str() {
                    return Err(DownloadError::ResumeRejected(format!("续传数据属于另一个地址: {}", data.url)));
                }
                Some(data)
            }
            None => None,
        };
        let temp_path = match &resume {
            Some(data) => data.temp_path.clone(),
            None => self.temp_dir.join(format!("{}.part", Uuid::new_v4())),
        };

        let shared = Arc::new(TransferShared::default());
        let (stop_tx, stop_rx) = watch::channel(StopSignal::Running);
        let job = TransferJob {
            client: self.client.clone(),
            method,
            request: request.clone(),
            temp_path: temp_path.clone(),
            resume,
            enable_resume: self.enable_resume,
            shared: shared.clone(),
            stop: stop_rx,
            events,
        };
        log::debug!("[http] 打开传输: {} -> {}", request.url(), temp_path.display());
        self.runtime.spawn(job.run());

        Ok(Box::new(HttpTransfer {
            url: request.url().to_string(),
            temp_path,
            enable_resume: self.enable_resume,
            shared,
            stop: stop_tx,
        }))
    }

    fn discard(&self, resume_token: &ResumeToken) {
        match ResumeData::decode(resume_token) {
            // 只清理自己目录下的文件
            Ok(data) if data.temp_path.starts_with(&self.temp_dir) => remove_if_exists(&data.temp_path),
            Ok(data) => log::warn!("[http] 续传文件不在临时目录中，不做清理: {}", data.temp_path.display()),
            Err(e) => log::debug!("[http] 忽略无法识别的续传数据: {}", e),
        }
    }
}

struct HttpTransfer {
    url: String,
    temp_path: PathBuf,
    enable_resume: bool,
    shared: Arc<TransferShared>,
    stop: watch::Sender<StopSignal>,
}

impl TransferHandle for HttpTransfer {
    fn suspend(self: Box<Self>) -> Option<ResumeToken> {
        let token = if self.enable_resume {
            self.shared
                .resume_data(&self.url, &self.temp_path)
                .and_then(|data| data.encode())
        } else {
            None
        };
        let signal = if token.is_some() { StopSignal::Suspend } else { StopSignal::Abort };
        let _ = self.stop.send(signal);
        token
    }

    fn abort(self: Box<Self>) {
        let _ = self.stop.send(StopSignal::Abort);
    }
}

impl Drop for HttpTransfer {
    fn drop(&mut self) {
        self.stop.send_if_modified(|signal| {
            if *signal == StopSignal::Running {
                *signal = StopSignal::Abort;
                true
            } else {
                false
            }
        });
    }
}

enum Sent {
    Response(Response),
    Stopped(StopSignal),
}

enum Outcome {
    Completed(ResponseInfo),
    Stopped(StopSignal),
}

type TransferFailure = (DownloadError, Option<ResponseInfo>);

struct TransferJob {
    client: reqwest::Client,
    method: Method,
    request: DownloadRequest,
    temp_path: PathBuf,
    resume: Option<ResumeData>,
    enable_resume: bool,
    shared: Arc<TransferShared>,
    stop: watch::Receiver<StopSignal>,
    events: EventSink,
}

impl TransferJob {
    async fn run(mut self) {
        match self.transfer().await {
            Ok(Outcome::Completed(response)) => {
                log::debug!("[http] 传输完成: {}", self.request.url());
                self.events.success(self.temp_path.clone(), response);
            }
            Ok(Outcome::Stopped(signal)) => {
                log::debug!("[http] 传输已停止 ({:?}): {}", signal, self.request.url());
                if signal == StopSignal::Abort {
                    remove_if_exists(&self.temp_path);
                }
            }
            Err((error, response)) => {
                if *self.stop.borrow() == StopSignal::Abort {
                    remove_if_exists(&self.temp_path);
                    return;
                }
                let resume_token = if self.enable_resume {
                    self.shared
                        .resume_data(self.request.url().as_str(), &self.temp_path)
                        .and_then(|data| data.encode())
                } else {
                    None
                };
                if resume_token.is_none() {
                    remove_if_exists(&self.temp_path);
                }
                log::debug!("[http] 传输失败: {} ({})", self.request.url(), error);
                self.events.failure(error, resume_token, response);
            }
        }
    }

    async fn transfer(&mut self) -> Result<Outcome, TransferFailure> {
        let mut offset = self.resume.as_ref().map_or(0, |data| data.offset);
        if offset > 0 {
            let on_disk = tokio::fs::metadata(&self.temp_path).await.map_or(0, |m| m.len());
            if on_disk < offset {
                log::warn!(
                    "[http] 临时文件只有 {} 字节，少于续传记录的 {} 字节，从头开始",
                    on_disk,
                    offset
                );
                offset = 0;
            }
        }

        if offset > 0 {
            // 续传数据本身说明服务器支持 Range，请求失败时部分数据仍可再次续传
            if let Some(data) = &self.resume {
                self.shared.ranged.store(true, Ordering::SeqCst);
                self.shared.written.store(offset, Ordering::SeqCst);
                *self.shared.validators.lock().unwrap_or_else(PoisonError::into_inner) =
                    (data.etag.clone(), data.last_modified.clone());
            }
        }

        let mut response = match self.send(offset).await? {
            Sent::Response(response) => response,
            Sent::Stopped(signal) => return Ok(Outcome::Stopped(signal)),
        };

        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 {
            if content_range_total(&response) == Some(offset) {
                // 暂停时数据已经全部写入，只是还没读到流的结尾
                log::info!("[http] 续传偏移 {} 已等于文件总长度，无需再下载", offset);
                self.events.resumed(offset);
                return Ok(Outcome::Completed(response_info(&response)));
            }
            log::warn!("[http] 服务器拒绝续传范围 bytes={}-，从头开始", offset);
            offset = 0;
            response = match self.send(0).await? {
                Sent::Response(response) => response,
                Sent::Stopped(signal) => return Ok(Outcome::Stopped(signal)),
            };
        }

        let status = response.status();
        let info = response_info(&response);
        let (start_at, expected) = if status == StatusCode::PARTIAL_CONTENT && offset > 0 {
            let expected = content_range_total(&response).or_else(|| response.content_length().map(|len| len + offset));
            (offset, expected)
        } else if status.is_success() {
            (0, response.content_length())
        } else {
            return Err((DownloadError::ServerError { status: status.as_u16() }, Some(info)));
        };

        let ranged = status == StatusCode::PARTIAL_CONTENT || info.header("accept-ranges") == Some("bytes");
        self.shared.ranged.store(ranged, Ordering::SeqCst);
        {
            let previous = self.resume.as_ref().filter(|_| start_at > 0);
            let etag = info
                .header("etag")
                .map(str::to_string)
                .or_else(|| previous.and_then(|data| data.etag.clone()));
            let last_modified = info
                .header("last-modified")
                .map(str::to_string)
                .or_else(|| previous.and_then(|data| data.last_modified.clone()));
            *self.shared.validators.lock().unwrap_or_else(PoisonError::into_inner) = (etag, last_modified);
        }

        let io_failure = |e: std::io::Error| (DownloadError::from(e), Some(info.clone()));
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.temp_path)
            .await
            .map_err(io_failure)?;
        file.set_len(start_at).await.map_err(io_failure)?;
        file.seek(SeekFrom::Start(start_at)).await.map_err(io_failure)?;
        self.shared.written.store(start_at, Ordering::SeqCst);
        self.events.resumed(start_at);

        let mut total = start_at;
        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                biased;
                signal = wait_for_stop(&mut self.stop) => {
                    let _ = file.flush().await;
                    return Ok(Outcome::Stopped(signal));
                }
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    file.write_all(&bytes).await.map_err(io_failure)?;
                    // 写入落盘后再计入，续传偏移不会超过文件实际长度
                    file.flush().await.map_err(io_failure)?;
                    total += bytes.len() as u64;
                    self.shared.written.store(total, Ordering::SeqCst);
                    self.events.progress(bytes.len() as u64, total, expected);
                }
                Some(Err(e)) => return Err((DownloadError::from(e), Some(info))),
                None => break,
            }
        }
        drop(file);

        if let Some(expected) = expected {
            if total != expected {
                return Err((DownloadError::SizeMismatch { expected, actual: total }, Some(info)));
            }
        }
        Ok(Outcome::Completed(info))
    }

    /// 发送请求；`offset` 大于 0 时带上 Range 和 If-Range
    async fn send(&mut self, offset: u64) -> Result<Sent, TransferFailure> {
        let mut builder = self.client.request(self.method.clone(), self.request.url().clone());
        for (name, value) in self.request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if offset > 0 {
            builder = builder.header(header::RANGE, format!("bytes={}-", offset));
            if let Some(validator) = self.resume.as_ref().and_then(|data| data.validator()) {
                builder = builder.header(header::IF_RANGE, validator);
            }
        }

        tokio::select! {
            biased;
            signal = wait_for_stop(&mut self.stop) => Ok(Sent::Stopped(signal)),
            result = builder.send() => result.map(Sent::Response).map_err(|e| (DownloadError::from(e), None)),
        }
    }
}

async fn wait_for_stop(stop: &mut watch::Receiver<StopSignal>) -> StopSignal {
    loop {
        let signal = *stop.borrow_and_update();
        if signal != StopSignal::Running {
            return signal;
        }
        if stop.changed().await.is_err() {
            return StopSignal::Abort;
        }
    }
}

fn response_info(response: &Response) -> ResponseInfo {
    ResponseInfo {
        status: response.status().as_u16(),
        url: response.url().to_string(),
        content_length: response.content_length(),
        headers: response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
            .collect(),
    }
}

/// 解析 `Content-Range: bytes 40-99/100` 中的总长度
fn content_range_total(response: &Response) -> Option<u64> {
    parse_content_range_total(response.headers().get(header::CONTENT_RANGE)?.to_str().ok()?)
}

fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}
