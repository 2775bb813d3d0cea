use serde::{Serialize, Deserialize};

/// 下载任务状态
///
/// 任务只持有这一个状态值，调度器需要的三个布尔判定都由它推导，
/// 保证任意时刻最多只有一个为真。`Paused` 时三者全部为假，
/// 暂停的任务在队列中保持静止，直到被恢复或取消。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Ready,
    Executing,
    Paused,
    Finished,
}

impl TaskState {
    pub fn is_ready(self) -> bool {
        self == TaskState::Ready
    }

    pub fn is_executing(self) -> bool {
        self == TaskState::Executing
    }

    pub fn is_finished(self) -> bool {
        self == TaskState::Finished
    }

    pub fn is_paused(self) -> bool {
        self == TaskState::Paused
    }
}

/// 一次传输尝试是从哪里开始的
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStart {
    /// 没有续传数据，从头下载
    Fresh,
    /// 使用续传数据，从指定偏移继续
    Resumed { offset: u64 },
    /// 提供了续传数据，但服务器不支持或校验失败，已从 0 重新开始
    Restarted,
}

impl TransferStart {
    /// 根据是否携带续传数据以及传输层确认的起始偏移得出结果
    pub fn classify(had_token: bool, offset: u64) -> Self {
        match (had_token, offset) {
            (false, _) => TransferStart::Fresh,
            (true, 0) => TransferStart::Restarted,
            (true, offset) => TransferStart::Resumed { offset },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates_are_exclusive() {
        for state in [TaskState::Ready, TaskState::Executing, TaskState::Paused, TaskState::Finished] {
            let flags = [state.is_ready(), state.is_executing(), state.is_finished()];
            let count = flags.iter().filter(|f| **f).count();
            if state == TaskState::Paused {
                assert_eq!(count, 0, "暂停状态不应有任何判定为真");
            } else {
                assert_eq!(count, 1, "{:?} 应当恰好有一个判定为真", state);
            }
        }
    }

    #[test]
    fn test_transfer_start_classify() {
        assert_eq!(TransferStart::classify(false, 0), TransferStart::Fresh);
        assert_eq!(TransferStart::classify(false, 10), TransferStart::Fresh);
        assert_eq!(TransferStart::classify(true, 0), TransferStart::Restarted);
        assert_eq!(TransferStart::classify(true, 40), TransferStart::Resumed { offset: 40 });
    }
}
