use serde::{Deserialize, Serialize};
use std::fmt;

/// 下载任务状态
///
/// `Idle → Connecting → SendingRequest → ReceivingHeaders → ReceivingBody`，
/// 最终停在 `Completed`、`Failed` 或 `Stopped` 之一。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Idle,
    Connecting,
    SendingRequest,
    ReceivingHeaders,
    ReceivingBody,
    Completed,
    Failed(String),
    Stopped,
}

impl TaskStatus {
    /// 是否处于一次运行中间
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::Connecting
                | TaskStatus::SendingRequest
                | TaskStatus::ReceivingHeaders
                | TaskStatus::ReceivingBody
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Idle => write!(f, "等待"),
            TaskStatus::Connecting => write!(f, "连接中"),
            TaskStatus::SendingRequest => write!(f, "发送请求"),
            TaskStatus::ReceivingHeaders => write!(f, "接收响应头"),
            TaskStatus::ReceivingBody => write!(f, "下载中"),
            TaskStatus::Completed => write!(f, "已完成"),
            TaskStatus::Failed(e) => write!(f, "失败: {}", e),
            TaskStatus::Stopped => write!(f, "已停止"),
        }
    }
}
