//! Core: 下载任务状态机、传输层、下载队列和错误处理等核心逻辑模块

pub mod actor_manager;
pub mod error;
pub mod task;
pub mod transport;

// 只导出主流程和其它模块实际用到的类型
pub use actor_manager::{DownloadQueueActor, Enqueue, CancelAll, GetQueueStats, QueueStats, Schedulable};
pub use error::{DownloadError, DownloadResult};
pub use task::{DownloadTask, DownloadRequest, ResponseInfo, ResumeToken, TaskState, TransferStart};
pub use transport::{HttpTransport, Transport, TransferHandle, EventSink, TransportEvent};
