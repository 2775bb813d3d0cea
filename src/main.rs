use actix::prelude::*;
use anyhow::Context;
use clap::Parser;
use crossterm::{
    cursor, execute, terminal,
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
};
use downtask::cli::{self, Args};
use downtask::config::Config;
use downtask::core::actor_manager::{DownloadQueueActor, Enqueue, Withdraw};
use downtask::core::error::DownloadError;
use downtask::core::task::{DownloadTask, ResumeToken};
use downtask::core::transport::HttpTransport;
use downtask::ui::{self, DownloadSummary, ProgressManager};
use downtask::utils::logger;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

const KEYBOARD_POLL_INTERVAL: Duration = Duration::from_millis(50);

type Outcome = (Result<PathBuf, DownloadError>, Option<u16>);

/// 交互循环结束的原因
enum Exit {
    Finished(Outcome),
    /// 用户暂停并退出
    Quit,
}

#[derive(Debug, Clone, Copy)]
enum Key {
    Pause,
    Resume,
    Cancel,
    Quit,
}

#[actix::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init_logger(&args.log_level);
    log::info!("downtask {}", cli::build_info());

    if args.edit_config {
        // 确保文件存在再打开
        Config::load(&args.config)?;
        cli::open_config_in_editor(&args.config);
        return Ok(());
    }

    let config = args.load_config()?;
    log::info!("配置文件路径: {}", args.config);
    log::info!("{}", config.get_summary());

    let request = args.build_request()?;
    let destination = args.destination(&config, &request);
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("无法创建下载目录 {}", parent.display()))?;
    }

    let transport = Arc::new(HttpTransport::new(&config)?);
    let mut builder = DownloadTask::builder(request.clone(), &destination);
    if let Some(data) = args.read_resume_token()? {
        log::info!("使用续传数据 ({} 字节)", data.len());
        builder = builder.resume_token(ResumeToken::from_vec(data));
    }
    let task = builder.build(transport);

    let label = destination
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| request.url().to_string());
    let progress = ProgressManager::new(&label);
    let bar = progress.clone();
    task.set_progress_callback(move |_written, total, expected| bar.update(total, expected));

    let (done_tx, done_rx) = oneshot::channel::<Outcome>();
    task.set_completion_callback(move |_task, result, response| {
        let result = result.map(Path::to_path_buf).map_err(|e| e.clone());
        let _ = done_tx.send((result, response.map(|r| r.status)));
    });

    let queue = DownloadQueueActor::new(&config).start();
    queue.send(Enqueue(Box::new(task.clone()))).await?;

    println!("下载 {} -> {}", request.url(), destination.display());
    println!("{}", ui::KEY_HELP);
    let started = Instant::now();
    let exit = run_download_loop(&queue, &task, &progress, done_rx).await?;

    let (outcome, failed) = match &exit {
        Exit::Finished((Ok(path), _)) => {
            progress.finish("完成");
            remove_stale_resume_file(&destination);
            (format!("完成，已保存到 {}", path.display()), false)
        }
        Exit::Finished((Err(e), status)) => {
            progress.abandon("失败");
            let status = status.map(|s| format!("（HTTP {}）", s)).unwrap_or_default();
            (format!("{}{}", e, status), !e.is_cancelled())
        }
        Exit::Quit => {
            progress.abandon("已暂停");
            ("已暂停并退出".to_string(), false)
        }
    };
    let resume_file = save_resume_token(&task, &destination);

    let summary = DownloadSummary {
        url: request.url().to_string(),
        destination: destination.clone(),
        downloaded: progress.position(),
        elapsed_time: started.elapsed(),
        outcome,
        resume_file,
    };
    println!("{}", summary);

    match exit {
        Exit::Finished((Ok(_), _)) => ui::print_success("下载完成"),
        Exit::Quit => ui::print_success("续传数据已保存，之后可使用 --resume-from 继续"),
        Exit::Finished((Err(e), _)) if failed => {
            ui::print_error(&format!("下载失败: {}", e));
            std::process::exit(1);
        }
        Exit::Finished((Err(_), _)) => ui::print_error("下载已取消"),
    }
    Ok(())
}

/// 运行下载主循环：处理按键，直到任务结束或用户退出
async fn run_download_loop(
    queue: &Addr<DownloadQueueActor>,
    task: &DownloadTask,
    progress: &ProgressManager,
    mut done_rx: oneshot::Receiver<Outcome>,
) -> anyhow::Result<Exit> {
    // 不是终端时只等待任务结束
    let interactive = terminal::enable_raw_mode().is_ok();
    let stop = Arc::new(AtomicBool::new(false));
    let (key_tx, mut key_rx) = mpsc::unbounded_channel();
    let reader = if interactive {
        execute!(std::io::stdout(), cursor::Hide)?;
        Some(spawn_key_reader(key_tx, stop.clone()))
    } else {
        drop(key_tx);
        None
    };

    let exit = loop {
        tokio::select! {
            outcome = &mut done_rx => {
                break match outcome {
                    Ok(outcome) => Exit::Finished(outcome),
                    Err(_) => Exit::Finished((Err(DownloadError::Unknown("完成回调未被调用".to_string())), None)),
                };
            }
            Some(key) = key_rx.recv() => {
                log::debug!("按键: {:?}", key);
                match key {
                    Key::Pause => {
                        task.pause();
                        if task.is_paused() {
                            progress.set_status("已暂停");
                        }
                    }
                    Key::Resume => {
                        task.resume();
                        progress.set_status("");
                    }
                    Key::Cancel => {
                        progress.set_status("正在取消");
                        task.cancel();
                    }
                    Key::Quit => {
                        // 先移出队列，避免还没启动的任务在退出途中被启动并取走续传数据
                        if let Err(e) = queue.send(Withdraw(task.id())).await {
                            log::warn!("无法把任务移出下载队列: {}", e);
                        }
                        task.pause();
                        // 暂停时恰好完成
                        if let Ok(outcome) = done_rx.try_recv() {
                            break Exit::Finished(outcome);
                        }
                        break Exit::Quit;
                    }
                }
            }
        }
    };

    stop.store(true, Ordering::SeqCst);
    if let Some(reader) = reader {
        let _ = reader.await;
        execute!(std::io::stdout(), cursor::Show)?;
        terminal::disable_raw_mode()?;
    }
    Ok(exit)
}

/// 在阻塞线程中读取按键
fn spawn_key_reader(keys: mpsc::UnboundedSender<Key>, stop: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while !stop.load(Ordering::SeqCst) {
            match event::poll(KEYBOARD_POLL_INTERVAL) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    log::warn!("读取键盘失败: {}", e);
                    break;
                }
            }
            let Ok(Event::Key(key_event)) = event::read() else {
                continue;
            };
            if key_event.kind != KeyEventKind::Press {
                continue;
            }
            let key = match key_event.code {
                KeyCode::Char('c') if key_event.modifiers.contains(KeyModifiers::CONTROL) => Key::Quit,
                KeyCode::Char('p') | KeyCode::Char('P') => Key::Pause,
                KeyCode::Char('r') | KeyCode::Char('R') => Key::Resume,
                KeyCode::Char('c') | KeyCode::Char('C') => Key::Cancel,
                KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Key::Quit,
                _ => continue,
            };
            if keys.send(key).is_err() {
                break;
            }
        }
    })
}

/// 任务持有续传数据时写入 `<目标文件>.resume`
fn save_resume_token(task: &DownloadTask, destination: &Path) -> Option<PathBuf> {
    let token = task.resume_token()?;
    let path = cli::resume_file_path(destination);
    match std::fs::write(&path, token.as_bytes()) {
        Ok(()) => {
            log::info!("续传数据已保存到 {}", path.display());
            Some(path)
        }
        Err(e) => {
            log::error!("无法保存续传数据到 {}: {}", path.display(), e);
            None
        }
    }
}

fn remove_stale_resume_file(destination: &Path) {
    let path = cli::resume_file_path(destination);
    if path.exists() {
        if let Err(e) = std::fs::remove_file(&path) {
            log::warn!("无法删除旧的续传数据 {}: {}", path.display(), e);
        }
    }
}
