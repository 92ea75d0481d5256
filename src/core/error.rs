use std::io;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DownloadError {
    /// 域名解析、建立连接或连接超时失败
    #[error("连接错误 {target}: {source}")]
    Connection {
        target: String,
        #[source]
        source: io::Error,
    },

    /// 传输过程中的读写错误（包括读取超时）
    #[error("传输错误: {0}")]
    Transfer(#[source] io::Error),

    /// 响应头格式错误或服务器返回了无法处理的响应
    #[error("协议错误: {0}")]
    Protocol(String),

    /// 断点配置文件读写失败
    #[error("断点配置文件错误 {}: {message}", path.display())]
    Persistence { path: PathBuf, message: String },

    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("任务ID不存在: {0}")]
    TaskNotFound(Uuid),
}

impl DownloadError {
    pub fn connection(target: impl Into<String>, source: io::Error) -> Self {
        DownloadError::Connection {
            target: target.into(),
            source,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        DownloadError::Protocol(message.into())
    }

    pub fn persistence(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        DownloadError::Persistence {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        DownloadError::Config(message.into())
    }

    /// 是否由关闭信号引起，即 `stop()` 打断了正在等待的 IO
    pub fn is_closed(&self) -> bool {
        match self {
            DownloadError::Connection { source, .. } | DownloadError::Transfer(source) => {
                source.kind() == io::ErrorKind::ConnectionAborted
            }
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            DownloadError::Connection { source, .. } | DownloadError::Transfer(source) => {
                source.kind() == io::ErrorKind::TimedOut
            }
            _ => false,
        }
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;
