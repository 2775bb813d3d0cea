use std::path::PathBuf;

use crate::core::transport::TransportEvent;
use super::download::DownloadTask;
use super::request::ResponseInfo;
use super::state::TransferStart;
use super::util;

impl DownloadTask {
    /// 处理传输层上报的事件
    ///
    /// 只接受当前这次尝试且任务仍处于 Executing 时的事件。
    pub(crate) fn handle_transport_event(&self, attempt: u64, event: TransportEvent) {
        let mut core = self.inner.lock();
        if core.attempt != attempt || !core.state.is_executing() {
            log::debug!(
                "[task {}] 忽略过期的传输事件（事件属于第 {} 次传输，当前第 {} 次，状态 {:?}）",
                self.inner.id,
                attempt,
                core.attempt,
                core.state
            );
            if let TransportEvent::Success { location, .. } = event {
                // 任务已经结束，没有人会再使用这个文件
                if core.state.is_finished() {
                    util::remove_if_exists(&location);
                }
            }
            return;
        }

        match event {
            TransportEvent::Resumed { offset } => {
                let start = TransferStart::classify(core.attempt_had_token, offset);
                if start == TransferStart::Restarted {
                    log::warn!("[task {}] 续传数据未被服务器接受，已从头开始下载", self.inner.id);
                } else {
                    log::debug!("[task {}] 传输从 {} 字节处开始", self.inner.id, offset);
                }
                core.transfer_start = Some(start);
            }
            TransportEvent::Progress { bytes_written, total_written, total_expected } => {
                let callback = core.progress_callback.clone();
                drop(core);
                if let Some(callback) = callback {
                    self.inner.dispatcher.dispatch(move || {
                        callback(bytes_written, total_written, total_expected);
                    });
                }
            }
            TransportEvent::Success { location, response } => {
                core.finalizing = true;
                drop(core);
                // 移动文件可能退化为整文件复制，不能在锁内进行，也不能占用异步运行时的工作线程
                let task = self.clone();
                let finalize = move || task.finalize(attempt, location, response);
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn_blocking(finalize);
                    }
                    Err(_) => finalize(),
                }
            }
            TransportEvent::Failure { error, resume_token, response } => {
                if let Some(token) = &resume_token {
                    log::info!("[task {}] 传输失败，已保存 {} 字节续传数据", self.inner.id, token.len());
                }
                core.resume_token = resume_token;
                let completion = core.finish(Err(error), response);
                drop(core);
                self.deliver(completion);
            }
        }
    }

    /// 把临时文件移动到目标位置后结束任务，在锁外执行
    pub(crate) fn finalize(&self, attempt: u64, location: PathBuf, response: ResponseInfo) {
        let destination = self.inner.destination.clone();
        let result = util::move_into_place(&location, &destination).map(|()| destination.clone());

        let mut core = self.inner.lock();
        if core.attempt != attempt || !core.state.is_executing() {
            log::info!("[task {}] 移动文件期间任务已被取消，删除已移动的文件", self.inner.id);
            if result.is_ok() {
                util::remove_if_exists(&destination);
            }
            return;
        }
        core.finalizing = false;
        let completion = core.finish(result, Some(response));
        drop(core);
        self.deliver(completion);
    }
}
