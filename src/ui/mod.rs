mod progress;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
pub use progress::ProgressManager;

pub fn print_success(message: &str) {
    println!("✓ {}", message);
}

pub fn print_error(message: &str) {
    println!("✗ {}", message);
}

/// 交互按键说明
pub const KEY_HELP: &str = "按键：p 暂停  r 继续  c 取消  q 暂停并退出";

/// 一次运行结束时的摘要
pub struct DownloadSummary {
    pub url: String,
    pub destination: PathBuf,
    pub downloaded: u64,
    pub elapsed_time: Duration,
    pub outcome: String,
    pub resume_file: Option<PathBuf>,
}

impl fmt::Display for DownloadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n下载摘要:")?;
        writeln!(f, "地址: {}", self.url)?;
        writeln!(f, "目标文件: {}", self.destination.display())?;
        writeln!(f, "已下载: {}", format_size(self.downloaded))?;
        writeln!(f, "耗时: {:.2}秒", self.elapsed_time.as_secs_f64())?;
        writeln!(f, "结果: {}", self.outcome)?;
        if let Some(resume_file) = &self.resume_file {
            writeln!(f, "续传数据: {}", resume_file.display())?;
        }
        Ok(())
    }
}

pub fn format_size(size: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.00 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_summary_mentions_resume_file() {
        let summary = DownloadSummary {
            url: "https://example.com/a.zip".to_string(),
            destination: PathBuf::from("/data/a.zip"),
            downloaded: 2048,
            elapsed_time: Duration::from_secs(2),
            outcome: "已暂停".to_string(),
            resume_file: Some(PathBuf::from("/data/a.zip.resume")),
        };
        let text = summary.to_string();
        assert!(text.contains("2.00 KB"));
        assert!(text.contains("a.zip.resume"));
    }
}
