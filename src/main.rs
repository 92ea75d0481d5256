use actix::prelude::*;
use anyhow::{Context, Result};
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEventKind},
    execute, terminal,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use uuid::Uuid;

use multidown::cli;
use multidown::core::*;
use multidown::ui::{self, DownloadSummary, ProgressManager};
use multidown::utils::{logger, validator};

const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(100);
const KEYBOARD_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[actix::main]
async fn main() -> Result<()> {
    // 解析参数和配置
    let (args, config) = cli::Args::parse_args().context("参数解析失败")?;
    logger::init_logger(&config.log_file, config.log_level_filter(), config.log_max_size)?;
    log::info!("程序启动");

    // 获取下载URL列表
    let urls = args.get_urls().context("获取URL列表失败")?;
    log::info!("解析到的URLs: {:?}", urls);
    log::info!("配置文件路径: {}", args.config);
    log::info!("{}", config.get_summary());
    println!("{}", config.get_summary());

    // 创建下载管理器
    let download_manager = DownloadManagerActor::new(config).start();
    let (tx, mut events) = unbounded_channel();
    download_manager.send(Subscribe(tx)).await?;

    // 创建并启动所有下载任务
    let task_ids = create_and_start_tasks(&download_manager, &args, &urls).await?;
    if task_ids.is_empty() {
        ui::print_error("没有可下载的任务。请通过命令行参数、-f 文件或 -r 断点配置提供至少一个任务。");
        return Ok(());
    }

    println!("\n开始下载 {} 个任务... (按 's' 停止, 'r' 继续, 'q' 退出)", task_ids.len());
    log::info!("开始下载 {} 个任务", task_ids.len());
    let started = Instant::now();

    // 主循环：处理键盘输入和更新进度
    let mut progress = ProgressManager::new();
    terminal::enable_raw_mode()?;
    execute!(std::io::stdout(), cursor::Hide)?;
    let result = run_download_loop(&download_manager, &mut events, &mut progress).await;
    execute!(std::io::stdout(), cursor::Show)?;
    terminal::disable_raw_mode()?;
    progress.finish();
    result?;

    // 退出前停止未完成的任务，等待断点写入完成
    let stopped = download_manager.send(StopAll).await?;
    if stopped > 0 {
        println!("已停止 {} 个任务，下次可用 -r 或自动恢复继续下载", stopped);
    }
    download_manager.send(JoinAll).await?;

    // 显示最终统计
    let stats = download_manager.send(GetStats).await?;
    let summary = DownloadSummary {
        total_files: stats.total,
        total_size: stats.downloaded_bytes,
        elapsed_time: started.elapsed(),
        success_count: stats.completed,
        failed_count: stats.failed,
        stopped_count: stats.total - stats.completed - stats.failed,
    };
    println!("{}", summary);
    log::info!("下载结束 - 成功: {}, 失败: {}", stats.completed, stats.failed);

    Ok(())
}

/// 恢复断点任务、创建新任务，然后启动所有任务
async fn create_and_start_tasks(
    download_manager: &Addr<DownloadManagerActor>,
    args: &cli::Args,
    urls: &[String],
) -> Result<Vec<Uuid>> {
    for config_file in &args.resume {
        let resumed = match validator::validate_config_file(config_file) {
            Ok(()) => {
                download_manager
                    .send(ResumeTask { config_file: PathBuf::from(config_file) })
                    .await?
            }
            Err(e) => Err(e),
        };
        match resumed {
            Ok(_) => ui::print_success(&format!("恢复下载任务: {}", config_file)),
            Err(e) => {
                log::error!("恢复下载任务失败: {} - {}", config_file, e);
                ui::print_error(&format!("恢复下载任务失败: {} - {}", config_file, e));
            }
        }
    }

    for (index, url) in urls.iter().enumerate() {
        // -n 只作用于第一个URL
        let file_name = if index == 0 { args.file_name.clone() } else { None };
        match download_manager
            .send(CreateTask { url: url.clone(), file_name, tag: index as i32 })
            .await?
        {
            Ok(task_id) => {
                log::info!("创建下载任务: {} ({})", url, task_id);
                ui::print_success(&format!("创建下载任务: {}", url));
            }
            Err(e) => {
                log::error!("创建下载任务失败: {} - {}", url, e);
                ui::print_error(&format!("创建下载任务失败: {} - {}", url, e));
            }
        }
    }

    // 包括启动时自动恢复的任务
    let task_ids = download_manager.send(ListTasks).await?;
    start_all(download_manager, &task_ids).await?;
    Ok(task_ids)
}

async fn start_all(download_manager: &Addr<DownloadManagerActor>, task_ids: &[Uuid]) -> Result<()> {
    for task_id in task_ids {
        if let Err(e) = download_manager.send(StartTaskById { task_id: *task_id }).await? {
            log::warn!("启动任务失败: {}", e);
        }
    }
    Ok(())
}

/// 运行下载主循环，所有任务完成或失败、或用户按下 q 时返回
async fn run_download_loop(
    download_manager: &Addr<DownloadManagerActor>,
    events: &mut UnboundedReceiver<TaskEvent>,
    progress: &mut ProgressManager,
) -> Result<()> {
    let mut last_update = Instant::now();

    loop {
        // 处理键盘输入
        if let Ok(true) = event::poll(KEYBOARD_POLL_INTERVAL) {
            if let Ok(Event::Key(key_event)) = event::read() {
                if key_event.kind == KeyEventKind::Press {
                    match key_event.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') => {
                            progress.println("用户退出");
                            log::info!("用户主动退出下载");
                            break;
                        }
                        KeyCode::Char('s') | KeyCode::Char('S') => {
                            let stopped = download_manager.send(StopAll).await?;
                            progress.println(&format!("已停止 {} 个下载任务", stopped));
                            log::info!("用户停止所有下载任务");
                        }
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            let task_ids = download_manager.send(ListTasks).await?;
                            start_all(download_manager, &task_ids).await?;
                            progress.println("继续下载");
                            log::info!("用户重新启动所有下载任务");
                        }
                        _ => {}
                    }
                }
            }
        }

        // 完成和失败的任务单独提示
        while let Ok(event) = events.try_recv() {
            match event {
                TaskEvent::Finished(info) => {
                    progress.println(&format!("✓ 下载完成: {}", info.file_path.display()))
                }
                TaskEvent::Failed(info) => progress.println(&format!(
                    "✗ 下载失败: {} - {}",
                    info.url,
                    info.error.unwrap_or_default()
                )),
                _ => {}
            }
        }

        // 更新进度
        if last_update.elapsed() >= PROGRESS_UPDATE_INTERVAL {
            for task_id in download_manager.send(ListTasks).await? {
                if let Ok(info) = download_manager.send(QueryTaskDetailById { task_id }).await? {
                    progress.update(&info);
                }
            }

            // 检查是否所有任务都完成或失败（已停止的任务等待 r 或 q）
            let stats = download_manager.send(GetStats).await?;
            if stats.total > 0 && stats.completed + stats.failed == stats.total {
                break;
            }
            last_update = Instant::now();
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    Ok(())
}
