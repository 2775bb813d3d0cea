use bytes::Bytes;
use serde::{Serialize, Deserialize};
use std::fmt;
use url::Url;

use crate::core::error::{DownloadError, DownloadResult};
use crate::utils::validator;

/// 下载请求描述：方法、URL 和请求头，构造后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    method: String,
    url: Url,
    headers: Vec<(String, String)>,
}

impl DownloadRequest {
    /// 创建 GET 请求
    pub fn get(url: &str) -> DownloadResult<Self> {
        Self::new("GET", url)
    }

    pub fn new(method: &str, url: &str) -> DownloadResult<Self> {
        let method = method.trim().to_ascii_uppercase();
        if method.is_empty() || !method.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DownloadError::Unknown(format!("无效的请求方法: {}", method)));
        }
        let url = validator::parse_download_url(url)?;
        Ok(Self {
            method,
            url,
            headers: Vec::new(),
        })
    }

    /// 追加一个请求头
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// 从 URL 路径推断文件名
    pub fn file_name(&self) -> Option<String> {
        self.url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(|name| name.to_string())
    }
}

/// 服务器响应摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub status: u16,
    pub url: String,
    pub content_length: Option<u64>,
    pub headers: Vec<(String, String)>,
}

impl ResponseInfo {
    /// 按名称查找响应头（不区分大小写）
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// 续传数据
///
/// 对任务来说是不透明的字节块，格式由产生它的传输层决定。
#[derive(Clone, PartialEq, Eq)]
pub struct ResumeToken(Bytes);

impl ResumeToken {
    pub fn from_vec(data: Vec<u8>) -> Self {
        ResumeToken(Bytes::from(data))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Bytes> for ResumeToken {
    fn from(data: Bytes) -> Self {
        ResumeToken(data)
    }
}

impl fmt::Debug for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResumeToken({} bytes)", self.0.len())
    }
}
