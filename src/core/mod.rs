//! Core: 下载任务、任务管理器和错误处理等核心逻辑模块

pub mod actor_manager;
pub mod error;
pub mod task;

// 只导出主流程和其它模块实际用到的类型
pub use actor_manager::{
    CreateTask, DownloadManagerActor, DownloadStats, GetStats, JoinAll, ListTasks, QueryTaskDetailById,
    RemoveTaskById, ResumeTask, StartTaskById, StopAll, StopTaskById, Subscribe, TaskLifecycle,
};
pub use error::{DownloadError, DownloadResult};
pub use task::{DownloadListener, DownloadTask, TaskEvent, TaskInfo, TaskStatus};
