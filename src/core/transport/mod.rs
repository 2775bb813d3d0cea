//! Transport: 下载任务与实际网络传输之间的边界
//!
//! 任务只通过 [`Transport`] 打开传输、通过 [`TransferHandle`] 暂停或中止，
//! 传输层通过 [`EventSink`] 异步上报进度、成功和失败。

pub mod http;
#[cfg(test)]
pub(crate) mod mock;

use std::path::PathBuf;
use std::sync::Weak;

use crate::core::error::{DownloadError, DownloadResult};
use crate::core::task::download::{DownloadTask, TaskInner};
use crate::core::task::request::{DownloadRequest, ResponseInfo, ResumeToken};

pub use http::HttpTransport;

/// 传输层上报的事件
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// 服务器已响应，传输从 `offset` 字节处开始（0 表示从头开始）
    Resumed { offset: u64 },
    Progress {
        bytes_written: u64,
        total_written: u64,
        total_expected: Option<u64>,
    },
    /// 传输完成，文件位于临时位置 `location`
    Success {
        location: PathBuf,
        response: ResponseInfo,
    },
    /// 传输失败；带有续传数据时之后可以从断点继续
    Failure {
        error: DownloadError,
        resume_token: Option<ResumeToken>,
        response: Option<ResponseInfo>,
    },
}

/// 一次传输的事件出口
///
/// 每次打开传输都会得到新的出口，只有当前这次尝试的事件会被任务处理，
/// 旧传输迟到的事件会被丢弃。出口不持有任务，任务被释放后事件直接丢弃。
#[derive(Clone)]
pub struct EventSink {
    task: Weak<TaskInner>,
    attempt: u64,
}

impl EventSink {
    pub(crate) fn new(task: Weak<TaskInner>, attempt: u64) -> Self {
        Self { task, attempt }
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn send(&self, event: TransportEvent) {
        match self.task.upgrade() {
            Some(inner) => DownloadTask::from_inner(inner).handle_transport_event(self.attempt, event),
            None => log::debug!("任务已释放，丢弃传输事件: {:?}", event),
        }
    }

    pub fn resumed(&self, offset: u64) {
        self.send(TransportEvent::Resumed { offset });
    }

    pub fn progress(&self, bytes_written: u64, total_written: u64, total_expected: Option<u64>) {
        self.send(TransportEvent::Progress {
            bytes_written,
            total_written,
            total_expected,
        });
    }

    pub fn success(&self, location: PathBuf, response: ResponseInfo) {
        self.send(TransportEvent::Success { location, response });
    }

    pub fn failure(&self, error: DownloadError, resume_token: Option<ResumeToken>, response: Option<ResponseInfo>) {
        self.send(TransportEvent::Failure {
            error,
            resume_token,
            response,
        });
    }
}

/// 传输层
///
/// 实现不得阻塞调用线程，也不得在 `open`、`suspend`、`abort` 内部同步投递事件：
/// 这些方法在任务的锁内被调用。
pub trait Transport: Send + Sync + 'static {
    /// 开始一次传输；提供续传数据时从断点继续
    ///
    /// 请求无效或续传数据被拒绝时返回错误。
    fn open(
        &self,
        request: &DownloadRequest,
        resume_token: Option<ResumeToken>,
        events: EventSink,
    ) -> DownloadResult<Box<dyn TransferHandle>>;

    /// 丢弃续传数据背后保存的部分数据
    fn discard(&self, _resume_token: &ResumeToken) {}
}

/// 正在进行的一次传输，暂停或中止后即被消耗，不会被复用
pub trait TransferHandle: Send {
    /// 请求暂停，尽可能返回续传数据
    fn suspend(self: Box<Self>) -> Option<ResumeToken>;

    /// 请求中止并清理部分数据
    fn abort(self: Box<Self>);
}
