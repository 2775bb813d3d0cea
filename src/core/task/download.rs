use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::core::error::DownloadError;
use crate::core::transport::{EventSink, TransferHandle, Transport};
use super::dispatch::Dispatcher;
use super::notify::{self, TaskNotification};
use super::request::{DownloadRequest, ResponseInfo, ResumeToken};
use super::state::{TaskState, TransferStart};

/// 进度回调：(本次新增字节, 已下载总字节, 预期总字节)
pub type ProgressCallback = Arc<dyn Fn(u64, u64, Option<u64>) + Send + Sync>;

/// 完成回调：(任务, 最终文件位置或错误, 服务器响应)
pub type CompletionCallback =
    Box<dyn FnOnce(&DownloadTask, Result<&Path, &DownloadError>, Option<&ResponseInfo>) + Send>;

pub(crate) struct TaskInner {
    pub(crate) id: Uuid,
    pub(crate) request: DownloadRequest,
    pub(crate) destination: PathBuf,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) dispatcher: Dispatcher,
    core: Mutex<TaskCore>,
}

impl TaskInner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, TaskCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 锁内保护的可变状态
pub(crate) struct TaskCore {
    pub(crate) state: TaskState,
    pub(crate) resume_token: Option<ResumeToken>,
    /// 续传数据来自构造参数且尚未被任何一次尝试使用
    pub(crate) token_from_caller: bool,
    pub(crate) last_error: Option<DownloadError>,
    pub(crate) final_location: Option<PathBuf>,
    pub(crate) response: Option<ResponseInfo>,
    pub(crate) transfer: Option<Box<dyn TransferHandle>>,
    pub(crate) attempt: u64,
    pub(crate) attempt_had_token: bool,
    /// 传输已成功，正在把文件移动到目标位置
    pub(crate) finalizing: bool,
    pub(crate) transfer_start: Option<TransferStart>,
    pub(crate) progress_callback: Option<ProgressCallback>,
    pub(crate) completion_callback: Option<CompletionCallback>,
}

/// 进入 Finished 后需要在锁外完成的通知
pub(crate) struct Completion {
    callback: Option<CompletionCallback>,
    result: Result<PathBuf, DownloadError>,
    response: Option<ResponseInfo>,
}

impl TaskCore {
    /// 切换到 Finished，只能调用一次
    pub(crate) fn finish(
        &mut self,
        result: Result<PathBuf, DownloadError>,
        response: Option<ResponseInfo>,
    ) -> Completion {
        debug_assert!(!self.state.is_finished());
        self.state = TaskState::Finished;
        self.transfer = None;
        self.finalizing = false;
        match &result {
            Ok(location) => self.final_location = Some(location.clone()),
            Err(error) => self.last_error = Some(error.clone()),
        }
        self.response = response.clone();
        self.progress_callback = None;
        Completion {
            callback: self.completion_callback.take(),
            result,
            response,
        }
    }
}

/// 单个下载任务
///
/// 克隆得到的是同一任务的另一个句柄。任务以 Ready 状态创建，
/// 由调度器调用 [`DownloadTask::start`] 进入 Executing，
/// 可在 Executing 与 Paused 之间往返任意次，最终恰好一次进入 Finished。
/// 完成回调在进入 Finished 时恰好触发一次，所有错误都只从这里报告。
#[derive(Clone)]
pub struct DownloadTask {
    pub(crate) inner: Arc<TaskInner>,
}

pub struct DownloadTaskBuilder {
    request: DownloadRequest,
    destination: PathBuf,
    resume_token: Option<ResumeToken>,
    dispatcher: Option<Dispatcher>,
}

impl DownloadTaskBuilder {
    /// 使用之前某次尝试留下的续传数据
    pub fn resume_token(mut self, token: ResumeToken) -> Self {
        self.resume_token = Some(token);
        self
    }

    /// 指定回调执行上下文，默认使用 [`Dispatcher::main`]
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn build(self, transport: Arc<dyn Transport>) -> DownloadTask {
        let id = Uuid::new_v4();
        let token_from_caller = self.resume_token.is_some();
        log::info!(
            "[task {}] 创建下载任务: {} -> {}{}",
            id,
            self.request.url(),
            self.destination.display(),
            if token_from_caller { "（带续传数据）" } else { "" }
        );
        DownloadTask {
            inner: Arc::new(TaskInner {
                id,
                request: self.request,
                destination: self.destination,
                transport,
                dispatcher: self.dispatcher.unwrap_or_else(Dispatcher::main),
                core: Mutex::new(TaskCore {
                    state: TaskState::Ready,
                    resume_token: self.resume_token,
                    token_from_caller,
                    last_error: None,
                    final_location: None,
                    response: None,
                    transfer: None,
                    attempt: 0,
                    attempt_had_token: false,
                    finalizing: false,
                    transfer_start: None,
                    progress_callback: None,
                    completion_callback: None,
                }),
            }),
        }
    }
}

impl DownloadTask {
    pub fn builder(request: DownloadRequest, destination: impl Into<PathBuf>) -> DownloadTaskBuilder {
        DownloadTaskBuilder {
            request,
            destination: destination.into(),
            resume_token: None,
            dispatcher: None,
        }
    }

    pub fn new(request: DownloadRequest, destination: impl Into<PathBuf>, transport: Arc<dyn Transport>) -> Self {
        Self::builder(request, destination).build(transport)
    }

    pub fn with_resume_token(
        request: DownloadRequest,
        destination: impl Into<PathBuf>,
        resume_token: ResumeToken,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::builder(request, destination)
            .resume_token(resume_token)
            .build(transport)
    }

    pub(crate) fn from_inner(inner: Arc<TaskInner>) -> Self {
        DownloadTask { inner }
    }

    // ================== 调度器接口 ==================

    /// 由调度器调用：打开一次传输并进入 Executing
    ///
    /// 非 Ready 状态下调用无效。打开失败时任务直接以该错误结束。
    pub fn start(&self) {
        let mut core = self.inner.lock();
        if !core.state.is_ready() {
            log::debug!("[task {}] 当前状态 {:?}，忽略启动请求", self.inner.id, core.state);
            return;
        }

        core.attempt += 1;
        let attempt = core.attempt;
        let resume_token = core.resume_token.take();
        core.token_from_caller = false;
        core.attempt_had_token = resume_token.is_some();
        core.finalizing = false;
        core.transfer_start = if resume_token.is_some() { None } else { Some(TransferStart::Fresh) };
        core.state = TaskState::Executing;
        log::info!(
            "[task {}] 开始第 {} 次传输{}",
            self.inner.id,
            attempt,
            if resume_token.is_some() { "（使用续传数据）" } else { "" }
        );

        let events = EventSink::new(Arc::downgrade(&self.inner), attempt);
        let completion = match self.inner.transport.open(&self.inner.request, resume_token, events) {
            Ok(handle) => {
                core.transfer = Some(handle);
                None
            }
            Err(error) => {
                log::warn!("[task {}] 无法打开传输: {}", self.inner.id, error);
                Some(core.finish(Err(error), None))
            }
        };
        drop(core);

        notify::post(TaskNotification::Started(self.clone()));
        if let Some(completion) = completion {
            self.deliver(completion);
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    pub fn is_executing(&self) -> bool {
        self.state().is_executing()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    pub fn is_paused(&self) -> bool {
        self.state().is_paused()
    }

    // ================== 调用方接口 ==================

    /// 暂停正在执行的传输
    ///
    /// 只对 Executing 状态有效。传输层能给出续传数据时保存下来，
    /// 否则恢复后从头开始。暂停不会触发任何回调。
    pub fn pause(&self) {
        let mut core = self.inner.lock();
        if !core.state.is_executing() {
            log::debug!("[task {}] 当前状态 {:?}，忽略暂停请求", self.inner.id, core.state);
            return;
        }
        if core.finalizing {
            log::debug!("[task {}] 数据已全部下载，正在移动文件，忽略暂停请求", self.inner.id);
            return;
        }

        let resume_token = core.transfer.take().and_then(|handle| handle.suspend());
        match &resume_token {
            Some(token) => log::info!("[task {}] 已暂停，续传数据 {} 字节", self.inner.id, token.len()),
            None => log::info!("[task {}] 已暂停，传输层未提供续传数据，恢复后将从头开始", self.inner.id),
        }
        core.resume_token = resume_token;
        core.state = TaskState::Paused;
    }

    /// 恢复暂停的任务，使其重新可被调度
    pub fn resume(&self) {
        let mut core = self.inner.lock();
        if !core.state.is_paused() {
            log::debug!("[task {}] 当前状态 {:?}，忽略恢复请求", self.inner.id, core.state);
            return;
        }
        core.state = TaskState::Ready;
        log::info!("[task {}] 已恢复，等待调度", self.inner.id);
    }

    /// 取消任务
    ///
    /// 对任何未结束的任务立即生效：状态同步切换为 Finished，
    /// 完成回调收到 [`DownloadError::Cancelled`]。本任务产生的部分数据会交给传输层清理。
    pub fn cancel(&self) {
        let mut core = self.inner.lock();
        let state = core.state;
        let discarded = match state {
            TaskState::Finished => return,
            TaskState::Executing => {
                if let Some(handle) = core.transfer.take() {
                    handle.abort();
                }
                core.resume_token.take()
            }
            TaskState::Ready | TaskState::Paused => {
                if core.token_from_caller {
                    None
                } else {
                    core.resume_token.take()
                }
            }
        };
        log::info!("[task {}] 已取消（取消前状态 {:?}）", self.inner.id, state);
        let completion = core.finish(Err(DownloadError::Cancelled), None);
        drop(core);

        if let Some(token) = discarded {
            self.inner.transport.discard(&token);
        }
        self.deliver(completion);
    }

    /// 设置进度回调，替换之前的回调；任务结束后调用无效
    pub fn set_progress_callback<F>(&self, callback: F)
    where
        F: Fn(u64, u64, Option<u64>) + Send + Sync + 'static,
    {
        let mut core = self.inner.lock();
        if core.state.is_finished() {
            return;
        }
        core.progress_callback = Some(Arc::new(callback));
    }

    /// 设置完成回调，替换之前的回调；任务结束后调用无效
    pub fn set_completion_callback<F>(&self, callback: F)
    where
        F: FnOnce(&DownloadTask, Result<&Path, &DownloadError>, Option<&ResponseInfo>) + Send + 'static,
    {
        let mut core = self.inner.lock();
        if core.state.is_finished() {
            return;
        }
        core.completion_callback = Some(Box::new(callback));
    }

    // ================== 只读信息 ==================

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn request(&self) -> &DownloadRequest {
        &self.inner.request
    }

    pub fn destination(&self) -> &Path {
        &self.inner.destination
    }

    pub fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    pub fn last_error(&self) -> Option<DownloadError> {
        self.inner.lock().last_error.clone()
    }

    pub fn resume_token(&self) -> Option<ResumeToken> {
        self.inner.lock().resume_token.clone()
    }

    /// 成功结束后文件的最终位置
    pub fn final_location(&self) -> Option<PathBuf> {
        self.inner.lock().final_location.clone()
    }

    pub fn response(&self) -> Option<ResponseInfo> {
        self.inner.lock().response.clone()
    }

    /// 最近一次传输是全新开始、续传还是被迫重新开始
    pub fn transfer_start(&self) -> Option<TransferStart> {
        self.inner.lock().transfer_start
    }

    /// 已经打开过的传输次数
    pub fn attempts(&self) -> u64 {
        self.inner.lock().attempt
    }

    /// 在锁外派发完成回调并广播结束通知
    pub(crate) fn deliver(&self, completion: Completion) {
        let Completion { callback, result, response } = completion;
        match &result {
            Ok(location) => log::info!("[task {}] 下载完成: {}", self.inner.id, location.display()),
            Err(error) if error.is_cancelled() => log::debug!("[task {}] 以取消结束", self.inner.id),
            Err(error) => log::warn!("[task {}] 下载失败: {}", self.inner.id, error),
        }

        if let Some(callback) = callback {
            let task = self.clone();
            self.inner.dispatcher.dispatch(move || {
                let outcome = match &result {
                    Ok(location) => Ok(location.as_path()),
                    Err(error) => Err(error),
                };
                callback(&task, outcome, response.as_ref());
            });
        }
        notify::post(TaskNotification::Finished(self.clone()));
    }
}

impl PartialEq for DownloadTask {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for DownloadTask {}

impl fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 可能在持锁时被格式化，这里不能阻塞
        let state = self.inner.core.try_lock().ok().map(|core| core.state);
        f.debug_struct("DownloadTask")
            .field("id", &self.inner.id)
            .field("url", &self.inner.request.url().as_str())
            .field("destination", &self.inner.destination)
            .field("state", &state)
            .finish()
    }
}
