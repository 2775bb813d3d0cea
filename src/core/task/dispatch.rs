use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread;
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce() + Send + 'static>;

static MAIN_DISPATCHER: OnceLock<Dispatcher> = OnceLock::new();

/// 回调执行上下文
///
/// 每个 `Dispatcher` 对应一个专用线程，按提交顺序逐个执行任务。
/// 下载任务的进度回调和完成回调都通过它执行，无论传输层在哪个线程上报事件。
/// 回调中不应执行耗时操作，否则会拖慢同一上下文中的其他回调。
#[derive(Clone)]
pub struct Dispatcher {
    name: Arc<str>,
    sender: mpsc::UnboundedSender<Job>,
}

impl Dispatcher {
    pub fn new(name: &str) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let thread_name = name.to_string();
        let spawned = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        log::error!("[{}] 回调执行时发生 panic，已忽略", thread_name);
                    }
                }
                log::debug!("[{}] 回调线程退出", thread_name);
            });
        if let Err(e) = spawned {
            // 接收端随闭包一起被丢弃，之后的 dispatch 会退化为在调用线程直接执行
            log::error!("无法创建回调线程 {}: {}", name, e);
        }
        Self {
            name: Arc::from(name),
            sender,
        }
    }

    /// 进程内共享的默认回调上下文
    pub fn main() -> Dispatcher {
        MAIN_DISPATCHER
            .get_or_init(|| Dispatcher::new("downtask-main"))
            .clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 提交一个回调
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(mpsc::error::SendError(job)) = self.sender.send(Box::new(job)) {
            log::warn!("[{}] 回调线程不可用，直接在当前线程执行", self.name);
            job();
        }
    }

    /// 等待此前提交的所有回调执行完毕
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.dispatch(move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }

    /// `flush` 的阻塞版本，不能在异步运行时或回调线程自身中调用
    pub fn wait_idle(&self) {
        let (tx, rx) = oneshot::channel();
        self.dispatch(move || {
            let _ = tx.send(());
        });
        let _ = rx.blocking_recv();
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").field("name", &self.name).finish()
    }
}
