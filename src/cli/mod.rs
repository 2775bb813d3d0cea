//! CLI: 命令行接口和参数解析模块
//!
//! ## 主要功能
//!
//! - 命令行参数解析和验证
//! - 配置文件路径管理
//! - 由参数构造下载请求和目标路径
//! - 配置文件编辑器集成
//!
//! ## 支持的命令
//!
//! - 基本下载：`downtask <url>`
//! - 指定文件：`downtask -o file.zip <url>`
//! - 附加请求头：`downtask -H "Authorization: Bearer xxx" <url>`
//! - 断点续传：`downtask --resume-from file.zip.resume <url>`
//! - 编辑配置：`downtask -e`

use anyhow::{bail, Context};
use clap::Parser;
use std::env;
use std::path::{Path, PathBuf};
use crate::config::Config;
use crate::core::task::DownloadRequest;
use crate::utils::validator;

/// 续传数据文件的扩展名
pub const RESUME_FILE_SUFFIX: &str = "resume";

/// 版本和构建信息，构建时由 vergen 写入
pub fn build_info() -> String {
    format!(
        "{} ({}, {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown")
    )
}

/// 获取平台默认配置文件路径
pub fn default_config_path() -> String {
    #[cfg(target_os = "windows")]
    {
        let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        format!("{}/downtask/downtask.conf", appdata)
    }
    #[cfg(target_os = "macos")]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/Library/Application Support/downtask/downtask.conf", home)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.config/downtask/downtask.conf", home)
    }
}

/// 打开配置文件编辑器
pub fn open_config_in_editor(config_path: &str) {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("notepad").arg(config_path).status().ok();
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg("-e").arg(config_path).status().ok();
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // 优先 xdg-open，否则 nano
        if std::process::Command::new("xdg-open").arg(config_path).status().is_err() {
            let _ = std::process::Command::new("nano").arg(config_path).status();
        }
    }
}

/// downtask 命令行参数
///
/// 示例用法：
///   downtask https://example.com/file.zip
///   downtask -e  # 编辑配置文件
///   downtask -o out.zip -H "Referer: https://example.com" https://example.com/file.zip
#[derive(Parser, Debug, Clone)]
#[command(
    name = "downtask",
    author = "panzhifu",
    version = env!("CARGO_PKG_VERSION"),
    about = "一个可暂停、可续传的单文件下载工具",
    long_about = "下载单个文件，支持暂停、继续、取消和断点续传。\n\n下载过程中按 p 暂停，r 继续，c 取消，q 暂停并退出。\n暂停或失败时续传数据会保存到 <目标文件>.resume，之后用 --resume-from 继续。\n\n示例：\n  downtask https://example.com/file.zip\n  downtask -e\n  downtask --resume-from file.zip.resume https://example.com/file.zip\n"
)]
pub struct Args {
    /// 要下载的URL
    #[arg(help = "要下载的URL。")]
    pub url: Option<String>,

    /// 保存的文件名或路径
    #[arg(short = 'o', long, help = "保存的文件名或路径，默认从URL推断。")]
    pub output: Option<String>,

    /// 下载目录
    #[arg(short = 'd', long, help = "指定下载目录，覆盖配置文件中的设置。")]
    pub download_dir: Option<String>,

    /// 配置文件路径，默认为平台推荐路径
    #[arg(short = 'c', long, default_value_t = default_config_path(), help = "配置文件路径，默认为平台推荐路径。")]
    pub config: String,

    /// 附加请求头
    #[arg(short = 'H', long = "header", help = "附加请求头，格式 \"名称: 值\"，可重复。")]
    pub headers: Vec<String>,

    /// 续传数据文件
    #[arg(long, help = "从之前保存的续传数据文件继续下载。")]
    pub resume_from: Option<PathBuf>,

    /// 读取超时（秒）
    #[arg(long, help = "读取超时（秒），覆盖配置文件中的设置。")]
    pub timeout: Option<u64>,

    /// 不保留部分数据
    #[arg(long, help = "禁用断点续传。")]
    pub no_resume: bool,

    /// 日志级别
    #[arg(long, default_value = "warn", help = "日志级别：error、warn、info、debug、trace。")]
    pub log_level: String,

    /// 编辑配置文件（-e 或 --edit）
    #[arg(short = 'e', long = "edit", help = "用系统默认编辑器打开配置文件并退出。")]
    pub edit_config: bool,
}

impl Args {
    /// 加载或创建配置文件，合并命令行参数后校验
    pub fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = Config::load(&self.config)?;
        config.merge_from_args(self);
        validator::validate_config(&config)?;
        Ok(config)
    }

    /// 由URL和请求头参数构造下载请求
    pub fn build_request(&self) -> anyhow::Result<DownloadRequest> {
        let Some(url) = self.url.as_deref() else {
            bail!("未提供URL。用法：downtask <URL>");
        };
        if let Some(output) = &self.output {
            validator::validate_output_path(output)?;
        }
        let mut request = DownloadRequest::get(url)?;
        for header in &self.headers {
            let (name, value) = validator::parse_header(header)?;
            request = request.header(name, value);
        }
        Ok(request)
    }

    /// 目标文件路径
    ///
    /// `-o` 为绝对路径时直接使用，否则放在下载目录下；未指定时从URL推断文件名。
    pub fn destination(&self, config: &Config, request: &DownloadRequest) -> PathBuf {
        let file_name = self
            .output
            .clone()
            .or_else(|| request.file_name())
            .unwrap_or_else(|| "download.bin".to_string());
        let path = Path::new(&file_name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&config.download_dir).join(path)
        }
    }

    /// 读取 `--resume-from` 指定的续传数据
    pub fn read_resume_token(&self) -> anyhow::Result<Option<Vec<u8>>> {
        match &self.resume_from {
            Some(path) => {
                let data = std::fs::read(path)
                    .with_context(|| format!("无法读取续传数据文件 {}", path.display()))?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }
}

/// 目标文件对应的续传数据文件路径
pub fn resume_file_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".");
    name.push(RESUME_FILE_SUFFIX);
    PathBuf::from(name)
}
