use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use crate::core::error::DownloadError;

/// 配置结构体
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 默认下载目录
    pub download_dir: String,
    /// 临时文件目录，未完成的下载和续传数据保存在这里
    pub temp_dir: String,
    /// 最大并发下载数
    pub max_concurrent_downloads: usize,
    /// 读取超时时间（秒）
    pub timeout: u64,
    /// 连接超时时间（秒）
    pub connect_timeout: u64,
    /// User-Agent
    pub user_agent: String,
    /// 是否启用断点续传
    pub enable_resume: bool,
    /// 下载队列检查任务状态的间隔（毫秒）
    pub queue_poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: "./downloads".to_string(),
            temp_dir: std::env::temp_dir().join("downtask").to_string_lossy().to_string(),
            max_concurrent_downloads: 3,
            timeout: 30,
            connect_timeout: 10,
            user_agent: format!("downtask/{}", env!("CARGO_PKG_VERSION")),
            enable_resume: true,
            queue_poll_interval_ms: 200,
        }
    }
}

impl Config {
    /// 加载配置文件，不存在时写入带说明的默认配置
    pub fn load(path: &str) -> Result<Self, DownloadError> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            match toml::from_str(&content) {
                Ok(config) => Ok(config),
                Err(e) => {
                    // 不覆盖用户的文件，只是这次使用默认值
                    log::warn!("配置文件格式错误: {}，将使用默认配置", e);
                    Ok(Config::default())
                }
            }
        } else {
            let config = Config::default();
            config.save_with_tutorial(path)?;
            Ok(config)
        }
    }

    /// 保存带说明的配置文件（唯一写入方法）
    pub fn save_with_tutorial(&self, path: &str) -> Result<(), DownloadError> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }
        let config_content = toml::to_string_pretty(self)
            .map_err(|e| DownloadError::Unknown(format!("无法序列化配置: {}", e)))?;
        let full_content = format!("{}\n{}", Config::generate_tutorial_content(), config_content);
        fs::write(path, full_content)?;
        Ok(())
    }

    fn generate_tutorial_content() -> String {
        r#"# downtask 配置文件
# ====================
#
# 这是一个 TOML 格式的配置文件。命令行参数会覆盖这里的设置，
# 优先级：命令行 > 配置文件 > 默认值
#
# 配置文件位置：
# - Windows: %APPDATA%/downtask/downtask.conf
# - macOS: ~/Library/Application Support/downtask/downtask.conf
# - Linux: ~/.config/downtask/downtask.conf
#
# 使用示例：
#   downtask https://example.com/file.zip                      # 使用默认配置
#   downtask -d /path/to/downloads https://example.com/file.zip # 指定下载目录
#   downtask -o file.zip https://example.com/file.zip           # 指定文件名
#   downtask --resume-from file.zip.resume https://example.com/file.zip  # 从断点继续
#
# 下载过程中的按键：
#   p 暂停    r 继续    c 取消    q 暂停并退出（保存续传数据）
#
# ==================== 配置项说明 ====================
#
# download_dir             默认下载目录，支持相对路径和绝对路径
# temp_dir                 未完成文件的存放目录，续传数据指向这里的文件
# max_concurrent_downloads 同时进行的下载任务数
# timeout                  读取超时（秒），连接上的数据在此时间内没有进展即视为失败
# connect_timeout          连接超时（秒）
# user_agent               某些服务器需要特定的 User-Agent
# enable_resume            关闭后暂停和失败都不会保留部分数据
# queue_poll_interval_ms   下载队列检查任务状态的间隔（毫秒）
#
# ==================== 故障排除 ====================
#
# 问题：续传后从头开始下载
# 解决：服务器不支持 Range 或文件已在服务器上改变，这种情况无法续传
#
# 问题：经常超时
# 解决：增大 timeout 或 connect_timeout
"#.to_string()
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.max_concurrent_downloads == 0 {
            return Err(DownloadError::Unknown("并发下载数必须大于0".to_string()));
        }
        if self.timeout == 0 || self.connect_timeout == 0 {
            return Err(DownloadError::Unknown("超时时间必须大于0".to_string()));
        }
        if self.download_dir.is_empty() {
            return Err(DownloadError::Unknown("下载目录不能为空".to_string()));
        }
        if self.temp_dir.is_empty() {
            return Err(DownloadError::Unknown("临时目录不能为空".to_string()));
        }
        if self.queue_poll_interval_ms == 0 {
            return Err(DownloadError::Unknown("队列检查间隔必须大于0".to_string()));
        }
        Ok(())
    }

    /// 合并命令行参数到配置
    pub fn merge_from_args(&mut self, args: &crate::cli::Args) {
        if let Some(download_dir) = &args.download_dir {
            self.download_dir = download_dir.clone();
        }
        if let Some(timeout) = args.timeout {
            self.timeout = timeout;
        }
        if args.no_resume {
            self.enable_resume = false;
        }
    }

    /// 获取配置摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "配置摘要:\n\
            - 下载目录: {}\n\
            - 临时目录: {}\n\
            - 并发数: {}\n\
            - 超时时间: {} 秒（连接 {} 秒）\n\
            - 断点续传: {}",
            self.download_dir,
            self.temp_dir,
            self.max_concurrent_downloads,
            self.timeout,
            self.connect_timeout,
            if self.enable_resume { "启用" } else { "禁用" }
        )
    }
}
