use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::format_size;
use crate::core::task::{TaskInfo, TaskStatus};

/// 速度采样间隔
const SPEED_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

struct TaskBar {
    bar: ProgressBar,
    last_loaded: u64,
    last_sample: Instant,
    speed: u64, // B/s
}

// 结构体：ProgressManager
// 每个下载任务一个进度条
pub struct ProgressManager {
    multi: MultiProgress,
    bars: HashMap<Uuid, TaskBar>,
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressManager {
    pub fn new() -> Self {
        ProgressManager {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
        }
    }

    // 添加进度条，已存在时忽略
    pub fn add_task(&mut self, info: &TaskInfo) {
        if self.bars.contains_key(&info.uuid) {
            return;
        }
        let bar = self.multi.add(ProgressBar::new(info.total));
        let style = ProgressStyle::with_template(
            "{prefix:20!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        bar.set_style(style);
        let name = info
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| info.url.clone());
        bar.set_prefix(name);
        bar.set_position(info.loaded);
        self.bars.insert(
            info.uuid,
            TaskBar {
                bar,
                last_loaded: info.loaded,
                last_sample: Instant::now(),
                speed: 0,
            },
        );
    }

    // 方法：更新下载进度
    pub fn update(&mut self, info: &TaskInfo) {
        self.add_task(info);
        let Some(task) = self.bars.get_mut(&info.uuid) else {
            return;
        };

        let elapsed = task.last_sample.elapsed();
        if elapsed >= SPEED_SAMPLE_INTERVAL {
            let delta = info.loaded.saturating_sub(task.last_loaded);
            task.speed = (delta as f64 / elapsed.as_secs_f64()) as u64;
            task.last_loaded = info.loaded;
            task.last_sample = Instant::now();
        }

        if info.total > 0 {
            task.bar.set_length(info.total);
        }
        task.bar.set_position(info.loaded);

        match &info.status {
            TaskStatus::Completed => task.bar.set_message("已完成"),
            TaskStatus::Failed(e) => task.bar.set_message(format!("失败: {}", e)),
            TaskStatus::Stopped => task.bar.set_message("已停止 (按 r 继续)"),
            status => {
                let percentage = (info.progress() * 100.0) as u32;
                task.bar.set_message(format!(
                    "{} | {}% | {} | ETA:{}",
                    status,
                    percentage,
                    format_speed(task.speed),
                    format_eta(info.total.saturating_sub(info.loaded), task.speed)
                ));
            }
        }
    }

    /// 在进度条上方输出一行
    pub fn println(&self, message: &str) {
        let _ = self.multi.println(message);
    }

    pub fn finish(&self) {
        for task in self.bars.values() {
            task.bar.abandon();
        }
    }
}

pub fn format_speed(speed: u64) -> String {
    format!("{}/s", format_size(speed))
}

/// 剩余时间，速度未知时显示“未知”
pub fn format_eta(remaining: u64, speed: u64) -> String {
    if speed == 0 || remaining == 0 {
        return "未知".to_string();
    }
    let seconds = remaining / speed;
    if seconds > 3600 {
        format!("{}h{}m", seconds / 3600, (seconds % 3600) / 60)
    } else if seconds > 60 {
        format!("{}m{}s", seconds / 60, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}
