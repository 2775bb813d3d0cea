use actix::prelude::*;
use std::time::Duration;
use uuid::Uuid;
use crate::config::Config;
use crate::core::task::DownloadTask;

/// 队列可以调度的任务
///
/// 队列只通过这几个方法观察和驱动任务，不关心任务内部如何传输。
pub trait Schedulable: Send + 'static {
    fn id(&self) -> Uuid;
    fn is_ready(&self) -> bool;
    fn is_executing(&self) -> bool;
    fn is_finished(&self) -> bool;
    fn start(&self);
    fn cancel(&self);
}

impl Schedulable for DownloadTask {
    fn id(&self) -> Uuid {
        DownloadTask::id(self)
    }

    fn is_ready(&self) -> bool {
        DownloadTask::is_ready(self)
    }

    fn is_executing(&self) -> bool {
        DownloadTask::is_executing(self)
    }

    fn is_finished(&self) -> bool {
        DownloadTask::is_finished(self)
    }

    fn start(&self) {
        DownloadTask::start(self)
    }

    fn cancel(&self) {
        DownloadTask::cancel(self)
    }
}

/// ================== 队列统计 ==================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: usize,
    pub executing: usize,
    /// 既不是 Ready、Executing 也不是 Finished，即已暂停
    pub paused: usize,
    /// 已完成并移出队列的任务数
    pub retired: usize,
}

/// 加入下载任务
pub struct Enqueue(pub Box<dyn Schedulable>);
impl Message for Enqueue { type Result = Uuid; }

/// 取消队列中的全部任务，返回取消的数量
pub struct CancelAll;
impl Message for CancelAll { type Result = usize; }

/// 把任务移出队列但不取消，之后队列不会再启动它；任务不在队列中时返回 false
pub struct Withdraw(pub Uuid);
impl Message for Withdraw { type Result = bool; }

/// 查询队列统计
pub struct GetQueueStats;
impl Message for GetQueueStats { type Result = QueueStats; }

/// 下载队列 Actor
///
/// 定期检查任务状态：Ready 的任务在并发数未满时启动，Finished 的任务移出队列，
/// 暂停的任务原样保留，等待调用方 resume 后重新变为 Ready。
pub struct DownloadQueueActor {
    max_concurrent: usize,
    poll_interval: Duration,
    tasks: Vec<Box<dyn Schedulable>>,
    retired: usize,
}

impl DownloadQueueActor {
    pub fn new(config: &Config) -> Self {
        Self::with_limits(
            config.max_concurrent_downloads,
            Duration::from_millis(config.queue_poll_interval_ms),
        )
    }

    pub fn with_limits(max_concurrent: usize, poll_interval: Duration) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            poll_interval,
            tasks: Vec::new(),
            retired: 0,
        }
    }

    /// 移出已结束的任务，然后在并发数允许时启动 Ready 的任务
    fn schedule(&mut self) {
        let before = self.tasks.len();
        self.tasks.retain(|task| {
            if task.is_finished() {
                log::debug!("[queue] 任务 {} 已结束，移出队列", task.id());
                false
            } else {
                true
            }
        });
        self.retired += before - self.tasks.len();

        let mut executing = self.tasks.iter().filter(|task| task.is_executing()).count();
        for task in &self.tasks {
            if executing >= self.max_concurrent {
                break;
            }
            if task.is_ready() {
                log::info!("[queue] 启动任务 {}", task.id());
                task.start();
                if task.is_executing() {
                    executing += 1;
                }
            }
        }
    }

    fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            retired: self.retired,
            ..QueueStats::default()
        };
        for task in &self.tasks {
            if task.is_ready() {
                stats.ready += 1;
            } else if task.is_executing() {
                stats.executing += 1;
            } else if !task.is_finished() {
                stats.paused += 1;
            }
        }
        stats
    }
}

impl Actor for DownloadQueueActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        log::debug!("[queue] 下载队列已启动，最大并发 {}", self.max_concurrent);
        ctx.run_interval(self.poll_interval, |actor, _ctx| actor.schedule());
    }
}

impl Handler<Enqueue> for DownloadQueueActor {
    type Result = MessageResult<Enqueue>;
    fn handle(&mut self, msg: Enqueue, _ctx: &mut Self::Context) -> Self::Result {
        let id = msg.0.id();
        log::info!("[queue] 加入任务 {}", id);
        self.tasks.push(msg.0);
        self.schedule();
        MessageResult(id)
    }
}

impl Handler<CancelAll> for DownloadQueueActor {
    type Result = MessageResult<CancelAll>;
    fn handle(&mut self, _msg: CancelAll, _ctx: &mut Self::Context) -> Self::Result {
        let count = self.tasks.len();
        for task in &self.tasks {
            task.cancel();
        }
        self.schedule();
        log::info!("[queue] 已取消 {} 个任务", count);
        MessageResult(count)
    }
}

impl Handler<Withdraw> for DownloadQueueActor {
    type Result = MessageResult<Withdraw>;
    fn handle(&mut self, msg: Withdraw, _ctx: &mut Self::Context) -> Self::Result {
        let before = self.tasks.len();
        self.tasks.retain(|task| task.id() != msg.0);
        let removed = self.tasks.len() != before;
        if removed {
            log::info!("[queue] 任务 {} 已移出队列", msg.0);
        }
        MessageResult(removed)
    }
}

impl Handler<GetQueueStats> for DownloadQueueActor {
    type Result = MessageResult<GetQueueStats>;
    fn handle(&mut self, _msg: GetQueueStats, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.stats())
    }
}
