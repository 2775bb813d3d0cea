//! `task` 模块包含了与单个下载任务相关的所有逻辑
//!
//! 主要包括：
//! - `download`: `DownloadTask` 的定义和调用方接口
//! - `state`: 任务状态 `TaskState`
//! - `handlers`: 传输层事件处理
//! - `request`: 请求、响应和续传数据
//! - `dispatch`: 回调执行上下文
//! - `notify`: 进程级开始/结束通知
//! - `util`: 文件收尾工具

pub mod download;
pub mod state;
pub mod handlers;
pub mod request;
pub mod dispatch;
pub mod notify;
pub mod util;


// 导出核心组件，方便外部使用
pub use download::{DownloadTask, DownloadTaskBuilder, ProgressCallback, CompletionCallback};
pub use state::{TaskState, TransferStart};
pub use request::{DownloadRequest, ResponseInfo, ResumeToken};
pub use dispatch::Dispatcher;
pub use notify::TaskNotification;
