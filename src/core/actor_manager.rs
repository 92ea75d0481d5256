use actix::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::config::Config;
use crate::core::error::DownloadError;
use crate::core::task::snapshot::find_config_files;
use crate::core::task::{DownloadListener, DownloadTask, TaskEvent, TaskInfo, TaskStatus};
use crate::utils::validator;

/// ================== 统计信息 ==================
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub stopped: usize,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
}

/// 添加下载任务（不会自动开始）
pub struct CreateTask {
    pub url: String,
    pub file_name: Option<String>,
    pub tag: i32,
}
impl Message for CreateTask { type Result = Result<Uuid, DownloadError>; }
impl Handler<CreateTask> for DownloadManagerActor {
    type Result = Result<Uuid, DownloadError>;
    fn handle(&mut self, msg: CreateTask, ctx: &mut Self::Context) -> Self::Result {
        validator::validate_url(&msg.url)?;
        let task = DownloadTask::with_config(msg.url, &self.config);
        if let Some(name) = msg.file_name {
            task.set_file_name(name);
        }
        task.set_tag(msg.tag);
        Ok(self.register(task, ctx))
    }
}

/// 从断点配置文件恢复任务（不会自动开始）
pub struct ResumeTask {
    pub config_file: PathBuf,
}
impl Message for ResumeTask { type Result = Result<Uuid, DownloadError>; }
impl Handler<ResumeTask> for DownloadManagerActor {
    type Result = Result<Uuid, DownloadError>;
    fn handle(&mut self, msg: ResumeTask, ctx: &mut Self::Context) -> Self::Result {
        self.resume_from_file(&msg.config_file, ctx)
    }
}

/// 启动指定任务
pub struct StartTaskById { pub task_id: Uuid }
impl Message for StartTaskById { type Result = Result<bool, DownloadError>; }
impl Handler<StartTaskById> for DownloadManagerActor {
    type Result = Result<bool, DownloadError>;
    fn handle(&mut self, msg: StartTaskById, _ctx: &mut Self::Context) -> Self::Result {
        Ok(self.task(msg.task_id)?.start())
    }
}

/// 停止指定任务，保留断点
pub struct StopTaskById { pub task_id: Uuid }
impl Message for StopTaskById { type Result = Result<bool, DownloadError>; }
impl Handler<StopTaskById> for DownloadManagerActor {
    type Result = Result<bool, DownloadError>;
    fn handle(&mut self, msg: StopTaskById, _ctx: &mut Self::Context) -> Self::Result {
        Ok(self.task(msg.task_id)?.stop())
    }
}

/// 停止所有任务，返回实际停止的个数
pub struct StopAll;
impl Message for StopAll { type Result = usize; }
impl Handler<StopAll> for DownloadManagerActor {
    type Result = usize;
    fn handle(&mut self, _msg: StopAll, _ctx: &mut Self::Context) -> Self::Result {
        self.stop_all()
    }
}

/// 移除指定任务，正在下载时先停止
pub struct RemoveTaskById { pub task_id: Uuid }
impl Message for RemoveTaskById { type Result = Result<bool, DownloadError>; }
impl Handler<RemoveTaskById> for DownloadManagerActor {
    type Result = Result<bool, DownloadError>;
    fn handle(&mut self, msg: RemoveTaskById, _ctx: &mut Self::Context) -> Self::Result {
        match self.tasks.remove(&msg.task_id) {
            Some(task) => {
                task.stop();
                self.order.retain(|id| *id != msg.task_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// 等待所有下载线程释放资源后返回，退出前使用
pub struct JoinAll;
impl Message for JoinAll { type Result = (); }
impl Handler<JoinAll> for DownloadManagerActor {
    type Result = ();
    fn handle(&mut self, _msg: JoinAll, _ctx: &mut Self::Context) {
        for task in self.tasks.values() {
            task.join();
        }
    }
}

/// 查询所有任务ID（按添加顺序）
pub struct ListTasks;
impl Message for ListTasks { type Result = Vec<Uuid>; }
impl Handler<ListTasks> for DownloadManagerActor {
    type Result = MessageResult<ListTasks>;
    fn handle(&mut self, _msg: ListTasks, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.order.clone())
    }
}

/// 查询指定任务详细信息
pub struct QueryTaskDetailById { pub task_id: Uuid }
impl Message for QueryTaskDetailById { type Result = Result<TaskInfo, DownloadError>; }
impl Handler<QueryTaskDetailById> for DownloadManagerActor {
    type Result = Result<TaskInfo, DownloadError>;
    fn handle(&mut self, msg: QueryTaskDetailById, _ctx: &mut Self::Context) -> Self::Result {
        Ok(self.task(msg.task_id)?.info())
    }
}

/// 汇总所有任务的统计信息
pub struct GetStats;
impl Message for GetStats { type Result = DownloadStats; }
impl Handler<GetStats> for DownloadManagerActor {
    type Result = MessageResult<GetStats>;
    fn handle(&mut self, _msg: GetStats, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.stats())
    }
}

/// 订阅任务生命周期事件，新的订阅者替换旧的
pub struct Subscribe(pub UnboundedSender<TaskEvent>);
impl Message for Subscribe { type Result = (); }
impl Handler<Subscribe> for DownloadManagerActor {
    type Result = ();
    fn handle(&mut self, msg: Subscribe, _ctx: &mut Self::Context) {
        self.subscriber = Some(msg.0);
    }
}

/// 下载线程汇报的生命周期事件
pub struct TaskLifecycle(pub TaskEvent);
impl Message for TaskLifecycle { type Result = (); }
impl Handler<TaskLifecycle> for DownloadManagerActor {
    type Result = ();
    fn handle(&mut self, msg: TaskLifecycle, _ctx: &mut Self::Context) {
        match &msg.0 {
            TaskEvent::Started(info) => log::info!("任务开始: {} ({})", info.url, info.uuid),
            TaskEvent::DataReceived(info) => {
                log::debug!("任务进度: {} {}/{}", info.uuid, info.loaded, info.total)
            }
            TaskEvent::Failed(info) => log::warn!(
                "任务失败: {} - {}",
                info.url,
                info.error.as_deref().unwrap_or("未知错误")
            ),
            TaskEvent::Finished(info) => {
                log::info!("任务完成: {} -> {}", info.url, info.file_path.display())
            }
        }
        if let Some(subscriber) = &self.subscriber {
            if subscriber.send(msg.0).is_err() {
                self.subscriber = None;
            }
        }
    }
}

/// 下载线程通过管理器地址汇报事件
impl DownloadListener for Addr<DownloadManagerActor> {
    fn on_start(&self, task: &TaskInfo) {
        self.do_send(TaskLifecycle(TaskEvent::Started(task.clone())));
    }

    fn on_data_received(&self, task: &TaskInfo) {
        self.do_send(TaskLifecycle(TaskEvent::DataReceived(task.clone())));
    }

    fn on_failed(&self, task: &TaskInfo) {
        self.do_send(TaskLifecycle(TaskEvent::Failed(task.clone())));
    }

    fn on_finished(&self, task: &TaskInfo) {
        self.do_send(TaskLifecycle(TaskEvent::Finished(task.clone())));
    }
}

impl Actor for DownloadManagerActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        if self.config.auto_resume_on_startup {
            self.resume_all(ctx);
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let stopped = self.stop_all();
        if stopped > 0 {
            log::info!("管理器退出，已停止 {} 个任务", stopped);
        }
    }
}

/// 全局任务管理器 Actor
pub struct DownloadManagerActor {
    pub config: Config,
    pub tasks: HashMap<Uuid, DownloadTask>,
    order: Vec<Uuid>,
    subscriber: Option<UnboundedSender<TaskEvent>>,
}

impl DownloadManagerActor {
    // 创建一个新的任务管理器
    pub fn new(config: Config) -> Self {
        Self {
            config,
            tasks: HashMap::new(),
            order: Vec::new(),
            subscriber: None,
        }
    }

    fn task(&self, task_id: Uuid) -> Result<&DownloadTask, DownloadError> {
        self.tasks
            .get(&task_id)
            .ok_or(DownloadError::TaskNotFound(task_id))
    }

    fn register(&mut self, task: DownloadTask, ctx: &mut Context<Self>) -> Uuid {
        let id = task.uuid();
        task.set_listener(Arc::new(ctx.address()));
        log::info!("添加任务: {} -> {}", task.target_url(), task.file_path().display());
        if self.tasks.insert(id, task).is_none() {
            self.order.push(id);
        }
        id
    }

    fn resume_from_file(
        &mut self,
        config_file: &Path,
        ctx: &mut Context<Self>,
    ) -> Result<Uuid, DownloadError> {
        let task = DownloadTask::from_config_file(config_file)?;
        let id = task.uuid();
        if self.tasks.contains_key(&id) {
            return Ok(id);
        }
        task.set_timeout(self.config.timeout());
        task.set_buffer_size(self.config.buffer_size);
        Ok(self.register(task, ctx))
    }

    /// 恢复并启动下载目录中所有断点配置文件对应的任务
    fn resume_all(&mut self, ctx: &mut Context<Self>) {
        let dir = PathBuf::from(&self.config.download_dir);
        let files = match find_config_files(&dir) {
            Ok(files) => files,
            Err(e) => {
                log::debug!("跳过自动恢复 {}: {}", dir.display(), e);
                return;
            }
        };
        for file in files {
            match self.resume_from_file(&file, ctx) {
                Ok(id) => {
                    log::info!("自动恢复任务: {}", file.display());
                    if let Some(task) = self.tasks.get(&id) {
                        task.start();
                    }
                }
                Err(e) => log::warn!("无法恢复 {}: {}", file.display(), e),
            }
        }
    }

    fn stop_all(&self) -> usize {
        self.tasks.values().filter(|task| task.stop()).count()
    }

    pub fn stats(&self) -> DownloadStats {
        let mut stats = DownloadStats {
            total: self.tasks.len(),
            ..DownloadStats::default()
        };
        for task in self.tasks.values() {
            let info = task.info();
            stats.downloaded_bytes += info.loaded;
            stats.total_bytes += info.total;
            match info.status {
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed(_) => stats.failed += 1,
                TaskStatus::Stopped => stats.stopped += 1,
                ref status if status.is_active() => stats.active += 1,
                _ => {}
            }
        }
        stats
    }
}
