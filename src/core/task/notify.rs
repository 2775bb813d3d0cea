//! 进程级任务通知
//!
//! 供未注册回调的被动观察者使用。通知是尽力而为的：
//! 没有订阅者时直接丢弃，订阅者处理过慢时会丢失较早的通知。

use std::sync::OnceLock;
use tokio::sync::broadcast;

use super::download::DownloadTask;

const CHANNEL_CAPACITY: usize = 256;

static BUS: OnceLock<broadcast::Sender<TaskNotification>> = OnceLock::new();

/// 任务开始或结束时广播的通知，携带任务句柄
#[derive(Debug, Clone)]
pub enum TaskNotification {
    Started(DownloadTask),
    Finished(DownloadTask),
}

impl TaskNotification {
    pub fn task(&self) -> &DownloadTask {
        match self {
            TaskNotification::Started(task) | TaskNotification::Finished(task) => task,
        }
    }
}

fn bus() -> &'static broadcast::Sender<TaskNotification> {
    BUS.get_or_init(|| broadcast::channel(CHANNEL_CAPACITY).0)
}

/// 订阅之后发出的所有任务通知
pub fn subscribe() -> broadcast::Receiver<TaskNotification> {
    bus().subscribe()
}

pub(crate) fn post(notification: TaskNotification) {
    // 没有订阅者时 send 返回错误，忽略即可
    let _ = bus().send(notification);
}
