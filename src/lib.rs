//! MultiDown: 可断点续传的单连接 HTTP 下载器
//!
//! 每个 [`DownloadTask`](crate::core::task::DownloadTask) 用一条原始 TCP 连接下载一个文件，
//! 数据先写入 `<文件>.dl`，进度保存在 `<文件>.dlcfg`，完成后改名为目标文件。

pub mod cli;
pub mod config;
pub mod core;
pub mod ui;
pub mod utils;
