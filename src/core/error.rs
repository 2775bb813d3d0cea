use thiserror::Error;
use std::io;
use std::path::PathBuf;

/// 下载任务可能产生的所有错误
///
/// 除 `Cancelled` 与 `FinalizeFailed` 外，其余变体都来自传输层。
/// 错误需要保存为任务的 `last_error` 并交给回调，因此要求 `Clone`。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    #[error("网络错误: {0}")]
    NetworkError(String),

    #[error("服务器错误: HTTP {status}")]
    ServerError { status: u16 },

    #[error("IO错误: {0}")]
    IoError(String),

    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("断点续传数据无效: {0}")]
    ResumeRejected(String),

    #[error("文件大小不匹配: 预期 {expected} 字节, 实际 {actual} 字节")]
    SizeMismatch {
        expected: u64,
        actual: u64,
    },

    #[error("下载被取消")]
    Cancelled,

    #[error("无法将文件移动到 {}: {reason}", .destination.display())]
    FinalizeFailed {
        destination: PathBuf,
        reason: String,
    },

    #[error("未知错误: {0}")]
    Unknown(String),
}

impl DownloadError {
    /// 是否为主动取消
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }

    /// 是否为传输层上报的错误
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DownloadError::NetworkError(_) |
            DownloadError::ServerError { .. } |
            DownloadError::IoError(_) |
            DownloadError::InvalidUrl(_) |
            DownloadError::ResumeRejected(_) |
            DownloadError::SizeMismatch { .. } |
            DownloadError::Unknown(_)
        )
    }

    /// 是否为下载完成后移动文件失败
    pub fn is_finalize(&self) -> bool {
        matches!(self, DownloadError::FinalizeFailed { .. })
    }
}

impl From<io::Error> for DownloadError {
    fn from(error: io::Error) -> Self {
        DownloadError::IoError(error.to_string())
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => DownloadError::ServerError { status: status.as_u16() },
            None => DownloadError::NetworkError(error.to_string()),
        }
    }
}

impl From<String> for DownloadError {
    fn from(error: String) -> Self {
        DownloadError::Unknown(error)
    }
}

impl From<&str> for DownloadError {
    fn from(error: &str) -> Self {
        DownloadError::Unknown(error.to_string())
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;
