//! downtask: 可暂停、可续传的单文件下载任务
//!
//! [`DownloadTask`] 是一个线程安全的状态机（Ready → Executing → Paused/Finished），
//! 通过 [`Transport`] 完成实际传输，暂停时保存不透明的 [`ResumeToken`]，
//! 之后可以在同一进程或新进程中从断点继续。

pub mod cli;
pub mod config;
pub mod core;
pub mod ui;
pub mod utils;

pub use crate::config::Config;
pub use crate::core::error::{DownloadError, DownloadResult};
pub use crate::core::task::{
    Dispatcher, DownloadRequest, DownloadTask, DownloadTaskBuilder, ResponseInfo, ResumeToken, TaskNotification,
    TaskState, TransferStart,
};
pub use crate::core::transport::{HttpTransport, Transport, TransferHandle};
