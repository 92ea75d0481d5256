//! CLI: 命令行接口和参数解析模块
//!
//! ## 主要功能
//!
//! - 命令行参数解析和验证
//! - 配置文件路径管理
//! - URL 列表处理（命令行参数和文件）
//! - 断点配置文件（`*.dlcfg`）恢复
//! - 配置文件编辑器集成
//!
//! ## 支持的命令
//!
//! - 基本下载：`multidown <url>`
//! - 批量下载：`multidown -f urls.txt`
//! - 恢复下载：`multidown -r ./downloads/file.zip.dlcfg`
//! - 编辑配置：`multidown -e`
//! - 指定配置：`multidown -c config.conf <url>`
//! - 速度限制：`multidown -l 1024 <url>`
//!
//! ## 平台支持
//!
//! - Windows: `%APPDATA%/multidown/multidown.conf`
//! - macOS: `~/Library/Application Support/multidown/multidown.conf`
//! - Linux: `~/.config/multidown/multidown.conf`

use clap::Parser;
use std::env;
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::core::error::DownloadError;
use crate::utils::validator;

/// 获取平台默认配置文件路径
pub fn default_config_path() -> String {
    #[cfg(target_os = "windows")]
    {
        let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        format!("{}/multidown/multidown.conf", appdata)
    }
    #[cfg(target_os = "macos")]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/Library/Application Support/multidown/multidown.conf", home)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.config/multidown/multidown.conf", home)
    }
}

/// 打开配置文件编辑器
pub fn open_config_in_editor(config_path: &str) {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("notepad").arg(config_path).status().ok();
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg("-e").arg(config_path).status().ok();
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // 优先 $EDITOR，其次 xdg-open，最后 nano
        if let Ok(editor) = env::var("EDITOR") {
            if std::process::Command::new(editor).arg(config_path).status().is_ok() {
                return;
            }
        }
        if std::process::Command::new("xdg-open").arg(config_path).status().is_err() {
            let _ = std::process::Command::new("nano").arg(config_path).status();
        }
    }
}

/// MultiDown 命令行参数
///
/// 示例用法：
///   multidown http://example.com/file.zip
///   multidown -e  # 编辑配置文件
///   multidown -r ./downloads/file.zip.dlcfg
///   multidown -l 1000 http://example.com/file.zip
///
/// 更多用法请加 --help 查看
#[derive(Parser, Debug, Clone)]
#[command(
    name = "multidown",
    author = "panzhifu",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("VERGEN_BUILD_TIMESTAMP"), ")"),
    about = "一个用 Rust 编写的可断点续传的单连接下载器",
    long_about = "每个任务使用一条 HTTP 连接下载，支持限速、断点续传和实时进度显示。\n\n示例：\n  multidown http://example.com/file.zip\n  multidown -e\n  multidown -r ./downloads/file.zip.dlcfg\n  multidown --speed-limit-kb 1000 http://example.com/file.zip\n"
)]
pub struct Args {
    /// 要下载的URL列表（可同时指定多个）
    #[arg(required = false, help = "要下载的URL列表，可以同时指定多个URL。")]
    pub urls: Vec<String>,

    /// 包含URL列表的文件路径
    #[arg(short, long, help = "包含URL列表的文件路径，每行一个URL。")]
    pub file: Option<String>,

    /// 要恢复的断点配置文件
    #[arg(short = 'r', long = "resume", help = "从断点配置文件（*.dlcfg）恢复下载，可指定多次。")]
    pub resume: Vec<String>,

    /// 配置文件路径，默认为平台推荐路径
    #[arg(short = 'c', long, default_value_t = default_config_path(), help = "配置文件路径，默认为平台推荐路径。")]
    pub config: String,

    /// 编辑配置文件（-e 或 --edit）
    #[arg(short = 'e', long = "edit", help = "用系统默认编辑器打开配置文件并退出。")]
    pub edit_config: bool,

    /// 下载速度限制（KB/s），0 表示不限速
    #[arg(long, short = 'l', help = "下载速度限制（KB/s），0 表示不限速。")]
    pub speed_limit_kb: Option<u32>,

    /// 指定下载目录
    #[arg(long, short = 'd', help = "指定下载目录，覆盖配置文件中的设置。")]
    pub download_dir: Option<String>,

    /// 指定下载文件名
    #[arg(long, short = 'n', help = "指定下载文件名，覆盖URL自动推断，只对第一个URL生效。")]
    pub file_name: Option<String>,

    /// 内存缓存大小（KB）
    #[arg(long, short = 'm', help = "内存缓存大小（KB），攒够后一次写入磁盘。")]
    pub memory_cache_kb: Option<u32>,

    /// 超时时间（毫秒）
    #[arg(long = "timeout", short = 't', help = "连接和读写超时时间（毫秒）。")]
    pub timeout_ms: Option<u64>,
}

impl Args {
    /// 解析命令行参数，加载并合并配置
    pub fn parse_args() -> Result<(Self, Config), DownloadError> {
        let args = Args::parse();

        // --edit 逻辑
        if args.edit_config {
            if !Path::new(&args.config).exists() {
                Config::default().save_with_tutorial(&args.config)?;
            }
            open_config_in_editor(&args.config);
            std::process::exit(0);
        }

        let mut config = Config::load(&args.config)?;
        config.merge_from_args(&args);
        config
            .validate()
            .map_err(|e| DownloadError::config(format!("配置无效: {}", e)))?;

        Ok((args, config))
    }

    /// 汇总命令行和文件中的URL，忽略空行和 `#` 注释
    pub fn get_urls(&self) -> Result<Vec<String>, DownloadError> {
        let mut urls = Vec::new();

        for url in &self.urls {
            validator::validate_url(url)?;
            urls.push(url.clone());
        }

        if let Some(file_path) = &self.file {
            let content = fs::read_to_string(file_path).map_err(|e| {
                DownloadError::config(format!("无法读取URL文件 {}: {}", file_path, e))
            })?;
            for line in content.lines() {
                let line = line.trim();
                if !line.is_empty() && !line.starts_with('#') {
                    validator::validate_url(line)?;
                    urls.push(line.to_string());
                }
            }
        }

        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_args_parsing() {
        let args = Args::try_parse_from(["multidown", "http://example.com/file.zip"]).unwrap();
        assert_eq!(args.urls, vec!["http://example.com/file.zip"]);
        assert!(args.resume.is_empty());
        assert_eq!(args.download_dir, None);
    }

    #[test]
    fn test_resume_flags() {
        let args = Args::try_parse_from([
            "multidown",
            "-r",
            "a.zip.dlcfg",
            "--resume",
            "b.zip.dlcfg",
            "-m",
            "256",
        ])
        .unwrap();
        assert_eq!(args.resume, vec!["a.zip.dlcfg", "b.zip.dlcfg"]);
        assert_eq!(args.memory_cache_kb, Some(256));
        assert!(args.get_urls().unwrap().is_empty());
    }

    #[test]
    fn test_url_file_parsing() {
        let dir = tempdir().unwrap();
        let url_file = dir.path().join("urls.txt");
        let content = "# 这是一个注释\nhttp://example.com/file1.zip\n\n  http://example.com/file2.zip  \n";
        fs::write(&url_file, content).unwrap();

        let args = Args::try_parse_from([
            "multidown",
            "-f",
            url_file.to_str().unwrap(),
            "http://example.com/file0.zip",
        ])
        .unwrap();
        let urls = args.get_urls().unwrap();
        assert_eq!(
            urls,
            vec![
                "http://example.com/file0.zip",
                "http://example.com/file1.zip",
                "http://example.com/file2.zip",
            ]
        );
    }

    #[test]
    fn test_invalid_urls_are_rejected() {
        let args = Args::try_parse_from(["multidown", "https://example.com/file.zip"]).unwrap();
        assert!(matches!(args.get_urls(), Err(DownloadError::InvalidUrl(_))));

        let args = Args::try_parse_from(["multidown", "-f", "/nonexistent/urls.txt"]).unwrap();
        assert!(args.get_urls().is_err());
    }
}
