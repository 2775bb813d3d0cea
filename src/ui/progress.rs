use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use super::format_size;

const BAR_TEMPLATE: &str =
    "{prefix} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} ETA:{eta} {msg}";
const SPINNER_TEMPLATE: &str = "{prefix} {spinner:.green} [{elapsed_precise}] {bytes} {bytes_per_sec} {msg}";

/// 单个下载任务的进度条
///
/// 可以跨线程克隆，进度回调里直接调用 `update`。
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    pub fn new(label: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(Self::style(SPINNER_TEMPLATE));
        bar.set_prefix(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        ProgressManager { bar }
    }

    /// 不在终端上绘制，用于测试和非交互环境
    pub fn hidden() -> Self {
        ProgressManager { bar: ProgressBar::hidden() }
    }

    fn style(template: &str) -> ProgressStyle {
        ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }

    /// 更新进度；第一次得知总大小时切换为进度条样式
    pub fn update(&self, total_written: u64, total_expected: Option<u64>) {
        if let Some(total) = total_expected {
            if self.bar.length() != Some(total) {
                self.bar.set_length(total);
                self.bar.set_style(Self::style(BAR_TEMPLATE));
            }
        }
        self.bar.set_position(total_written);
    }

    /// 状态提示，例如“已暂停”
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// 保留当前进度并停止绘制
    pub fn abandon(&self, message: &str) {
        self.bar.abandon_with_message(message.to_string());
    }

    /// 在进度条上方打印一行
    pub fn println(&self, message: &str) {
        self.bar.println(message);
    }

    pub fn describe(&self) -> String {
        match self.bar.length() {
            Some(total) => format!("{} / {}", format_size(self.position()), format_size(total)),
            None => format_size(self.position()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_tracks_position_and_length() {
        let progress = ProgressManager::hidden();
        progress.update(40, None);
        assert_eq!(progress.position(), 40);
        assert_eq!(progress.describe(), "40.00 B");

        progress.update(100, Some(100));
        assert_eq!(progress.describe(), "100.00 B / 100.00 B");
    }
}
