use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::error::DownloadError;
use crate::utils::validator;

/// 配置结构体
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 下载速度限制（KB/s），0 表示不限速
    pub speed_limit_kb: u32,
    /// 默认下载目录
    pub download_dir: String,
    /// 内存缓存大小（KB），缓存满后写入磁盘
    pub memory_cache_kb: u32,
    /// 每次从 socket 读取的字节数
    pub buffer_size: usize,
    /// 连接和读写超时时间（毫秒）
    pub timeout_ms: u64,
    /// 启动时自动恢复下载目录中未完成的任务
    pub auto_resume_on_startup: bool,
    /// 日志文件
    pub log_file: String,
    /// 日志级别：error / warn / info / debug / trace
    pub log_level: String,
    /// 日志文件最大字节数，超过后轮转
    pub log_max_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            speed_limit_kb: 0, // 默认不限速
            download_dir: "./downloads".to_string(),
            memory_cache_kb: 100,
            buffer_size: 8192,
            timeout_ms: 20000,
            auto_resume_on_startup: true,
            log_file: "logs/app.log".to_string(),
            log_level: "info".to_string(),
            log_max_size: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// 加载配置文件，不存在或格式错误时写入默认配置
    pub fn load(path: &str) -> Result<Self, DownloadError> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path)
                .map_err(|e| DownloadError::config(format!("无法读取配置文件 {}: {}", path, e)))?;
            match toml::from_str(&content) {
                Ok(config) => Ok(config),
                Err(e) => {
                    eprintln!("配置文件格式错误: {}，将使用默认配置", e);
                    let config = Config::default();
                    config.save_with_tutorial(path)?;
                    Ok(config)
                }
            }
        } else {
            let config = Config::default();
            config.save_with_tutorial(path)?;
            Ok(config)
        }
    }

    /// 保存带教程的配置文件（唯一写入方法）
    pub fn save_with_tutorial(&self, path: &str) -> Result<(), DownloadError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| DownloadError::config(format!("无法创建配置目录: {}", e)))?;
            }
        }
        let config_content = toml::to_string_pretty(self)
            .map_err(|e| DownloadError::config(format!("无法序列化配置: {}", e)))?;
        let full_content = format!("{}\n{}", Config::generate_tutorial_content(), config_content);
        fs::write(path, full_content)
            .map_err(|e| DownloadError::config(format!("无法保存配置文件 {}: {}", path, e)))?;
        Ok(())
    }

    /// 生成配置文件教程内容（只有注释，配置项在后面）
    fn generate_tutorial_content() -> String {
        r#"# MultiDown 配置文件
# ====================
#
# 这是一个 TOML 格式的配置文件，用于配置 MultiDown 下载器的行为。
# 命令行参数会覆盖配置文件中的设置，优先级：命令行 > 配置文件 > 默认值
#
# 使用示例：
#   multidown http://example.com/file.zip                    # 使用默认配置
#   multidown -l 512 http://example.com/file.zip             # 限速 512 KB/s
#   multidown -r ./downloads/file.zip.dlcfg                  # 从断点配置恢复下载
#   multidown -d /path/to/downloads http://example.com/a.zip # 指定下载目录
#
# ==================== 配置项说明 ====================
#
# speed_limit_kb          下载速度限制（KB/s），0 表示不限速
# download_dir            默认下载目录，断点配置文件 *.dlcfg 也保存在这里
# memory_cache_kb         内存缓存大小（KB），攒够后一次写入磁盘，0 表示默认 100
# buffer_size             每次从网络读取的字节数，限速时不会超过每秒限额
# timeout_ms              连接和读写超时时间（毫秒）
# auto_resume_on_startup  启动时自动恢复下载目录中未完成的任务
# log_file                日志文件路径
# log_level               日志级别：error / warn / info / debug / trace
# log_max_size            日志文件超过该大小（字节）后轮转为 <文件>.backup
#
# ==================== 故障排除 ====================
#
# 问题：经常下载超时
# 解决：增大 timeout_ms
#
# 问题：磁盘写入过于频繁
# 解决：增大 memory_cache_kb
#
# 问题：断点续传后从头开始下载
# 解决：临时文件 *.dl 与断点配置记录的长度不一致时会重新下载，不要手动修改临时文件
"#
        .to_string()
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.timeout_ms == 0 {
            return Err(DownloadError::config("超时时间必须大于0"));
        }

        validator::validate_output_path(&self.download_dir)?;

        if self.buffer_size == 0 {
            return Err(DownloadError::config("读取缓冲区大小必须大于0"));
        }

        if self.log_max_size == 0 {
            return Err(DownloadError::config("日志文件大小上限必须大于0"));
        }

        if self.log_level.parse::<log::LevelFilter>().is_err() {
            return Err(DownloadError::config(format!("未知的日志级别: {}", self.log_level)));
        }

        Ok(())
    }

    /// 合并命令行参数到配置
    pub fn merge_from_args(&mut self, args: &crate::cli::Args) {
        if let Some(speed_limit) = args.speed_limit_kb {
            self.speed_limit_kb = speed_limit;
        }

        if let Some(dir) = &args.download_dir {
            self.download_dir = dir.clone();
        }

        if let Some(cache) = args.memory_cache_kb {
            self.memory_cache_kb = cache;
        }

        if let Some(timeout) = args.timeout_ms {
            self.timeout_ms = timeout;
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 配置中的日志级别，无法识别时为 info
    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }

    /// 获取配置摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "配置摘要:\n\
            - 下载目录: {}\n\
            - 速度限制: {}\n\
            - 内存缓存: {} KB\n\
            - 超时时间: {} 毫秒\n\
            - 自动恢复: {}\n\
            - 日志文件: {} ({})",
            self.download_dir,
            if self.speed_limit_kb == 0 {
                "不限速".to_string()
            } else {
                format!("{} KB/s", self.speed_limit_kb)
            },
            self.memory_cache_kb,
            self.timeout_ms,
            if self.auto_resume_on_startup { "启用" } else { "禁用" },
            self.log_file,
            self.log_level
        )
    }
}
