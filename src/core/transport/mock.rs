use std::sync::{Arc, Mutex};

use crate::core::error::{DownloadError, DownloadResult};
use crate::core::task::request::{DownloadRequest, ResumeToken};
use super::{EventSink, TransferHandle, Transport};

/// 测试用传输层：记录每次打开，事件由测试通过 `sink` 手动投递
#[derive(Default)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    opened_with: Vec<Option<ResumeToken>>,
    sinks: Vec<EventSink>,
    suspend_token: Option<ResumeToken>,
    fail_next_open: Option<DownloadError>,
    suspended: usize,
    aborted: usize,
    discarded: Vec<ResumeToken>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 之后每次暂停都返回这份续传数据
    pub(crate) fn set_suspend_token(&self, token: Option<ResumeToken>) {
        self.state.lock().unwrap().suspend_token = token;
    }

    pub(crate) fn fail_next_open(&self, error: DownloadError) {
        self.state.lock().unwrap().fail_next_open = Some(error);
    }

    /// 每次成功打开时收到的续传数据
    pub(crate) fn opened_with(&self) -> Vec<Option<ResumeToken>> {
        self.state.lock().unwrap().opened_with.clone()
    }

    /// 第 `index` 次成功打开的事件出口
    pub(crate) fn sink(&self, index: usize) -> EventSink {
        self.state.lock().unwrap().sinks[index].clone()
    }

    pub(crate) fn latest_sink(&self) -> EventSink {
        self.state.lock().unwrap().sinks.last().cloned().expect("尚未打开任何传输")
    }

    pub(crate) fn suspended(&self) -> usize {
        self.state.lock().unwrap().suspended
    }

    pub(crate) fn aborted(&self) -> usize {
        self.state.lock().unwrap().aborted
    }

    pub(crate) fn discarded(&self) -> Vec<ResumeToken> {
        self.state.lock().unwrap().discarded.clone()
    }
}

impl Transport for MockTransport {
    fn open(
        &self,
        _request: &DownloadRequest,
        resume_token: Option<ResumeToken>,
        events: EventSink,
    ) -> DownloadResult<Box<dyn TransferHandle>> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_next_open.take() {
            return Err(error);
        }
        state.opened_with.push(resume_token);
        state.sinks.push(events);
        Ok(Box::new(MockHandle {
            state: self.state.clone(),
        }))
    }

    fn discard(&self, resume_token: &ResumeToken) {
        self.state.lock().unwrap().discarded.push(resume_token.clone());
    }
}

struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl TransferHandle for MockHandle {
    fn suspend(self: Box<Self>) -> Option<ResumeToken> {
        let mut state = self.state.lock().unwrap();
        state.suspended += 1;
        state.suspend_token.clone()
    }

    fn abort(self: Box<Self>) {
        self.state.lock().unwrap().aborted += 1;
    }
}
