use chrono::Local; // 用于获取本地时间
use env_logger::{Builder, Env};
use log::LevelFilter;
use std::io::Write;
use std::str::FromStr;

/// 解析日志级别，无法识别时退回 warn
pub fn parse_level(level: &str) -> LevelFilter {
    LevelFilter::from_str(level).unwrap_or(LevelFilter::Warn)
}

fn builder(level: LevelFilter) -> Builder {
    // RUST_LOG 优先于命令行参数
    let mut builder = Builder::from_env(Env::default().default_filter_or(level.to_string()));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.args()
        )
    });
    builder
}

/// 初始化全局日志，重复调用不会出错
pub fn init_logger(level: &str) {
    let level = parse_level(level);
    if builder(level).try_init().is_err() {
        log::debug!("日志已经初始化");
    }
}
