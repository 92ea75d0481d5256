//! `task` 模块包含了与单个下载任务相关的所有逻辑
//!
//! 主要包括：
//! - `download_task`: 对外的 `DownloadTask` 句柄，负责启动、停止和断点恢复
//! - `download`: 下载线程中实际执行的连接、收发和落盘流程
//! - `http`: 请求拼装与响应头解析
//! - `snapshot`: 断点配置文件
//! - `messages`: 任务信息、生命周期事件和回调接口
//! - `state`: 任务状态 `TaskStatus`
//! - `util`: 工具类，如 `BufferManager`、`SpeedLimiter`

pub mod download;
pub mod download_task;
pub mod http;
pub mod messages;
pub mod snapshot;
pub mod state;
pub mod util;

// 导出核心组件，方便外部使用
pub use download_task::{guess_file_name, DownloadTask, DEFAULT_FOLDER_PATH, DEFAULT_TIMEOUT};
pub use messages::{DownloadListener, TaskEvent, TaskInfo};
pub use snapshot::{TaskSnapshot, CONFIG_FILE_SUFFIX, TEMP_FILE_SUFFIX};
pub use state::TaskStatus;
pub use self::util::{BufferManager, SpeedLimiter};
