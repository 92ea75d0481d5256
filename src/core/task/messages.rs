use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use super::state::TaskStatus;

/// 任务对外可见的状态，回调时传给管理器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub uuid: Uuid,
    pub tag: i32,
    pub url: String,
    pub file_path: PathBuf,
    pub loaded: u64,
    pub total: u64,
    pub status: TaskStatus,
    pub error: Option<String>,
}

impl TaskInfo {
    /// 下载进度，0 到 1
    pub fn progress(&self) -> f32 {
        if self.total > 0 {
            self.loaded as f32 / self.total as f32
        } else {
            0.0
        }
    }
}

/// 生命周期事件
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Started(TaskInfo),
    DataReceived(TaskInfo),
    Failed(TaskInfo),
    Finished(TaskInfo),
}

impl TaskEvent {
    pub fn info(&self) -> &TaskInfo {
        match self {
            TaskEvent::Started(info)
            | TaskEvent::DataReceived(info)
            | TaskEvent::Failed(info)
            | TaskEvent::Finished(info) => info,
        }
    }
}

/// 下载任务向管理器汇报生命周期的回调接口。
///
/// 回调在下载线程中执行，实现里不要做耗时操作。
pub trait DownloadListener: Send + Sync {
    fn on_start(&self, task: &TaskInfo);
    fn on_data_received(&self, task: &TaskInfo);
    fn on_failed(&self, task: &TaskInfo);
    fn on_finished(&self, task: &TaskInfo);
}

impl DownloadListener for UnboundedSender<TaskEvent> {
    fn on_start(&self, task: &TaskInfo) {
        let _ = self.send(TaskEvent::Started(task.clone()));
    }

    fn on_data_received(&self, task: &TaskInfo) {
        let _ = self.send(TaskEvent::DataReceived(task.clone()));
    }

    fn on_failed(&self, task: &TaskInfo) {
        let _ = self.send(TaskEvent::Failed(task.clone()));
    }

    fn on_finished(&self, task: &TaskInfo) {
        let _ = self.send(TaskEvent::Finished(task.clone()));
    }
}
