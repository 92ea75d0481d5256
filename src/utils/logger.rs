use anyhow::{Context, Result};
use chrono::Local; // 用于获取本地时间
use env_logger::{Builder, Env, Target};
use log::LevelFilter; // 用于设置日志级别
use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};

/// 按大小轮转的日志文件，超过上限后改名为 `<文件>.backup` 并重新开始
pub struct RotatingFile {
    writer: LineWriter<File>,
    file_path: PathBuf,
    max_size: u64, // 最大文件大小 (bytes)
    current_size: u64,
}

impl RotatingFile {
    pub fn new(file_path: impl AsRef<Path>, max_size: u64) -> io::Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();
        // 确保日志目录存在
        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = open_append(&file_path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            writer: LineWriter::new(file),
            file_path,
            max_size,
            current_size,
        })
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut raw = self.file_path.as_os_str().to_owned();
        raw.push(".backup");
        PathBuf::from(raw)
    }

    /// 检查并执行日志轮转
    fn check_rotation(&mut self) -> io::Result<()> {
        if self.current_size <= self.max_size {
            return Ok(());
        }
        self.writer.flush()?;

        let backup_path = self.backup_path();
        if backup_path.exists() {
            std::fs::remove_file(&backup_path)?;
        }
        std::fs::rename(&self.file_path, &backup_path)?;

        self.writer = LineWriter::new(open_append(&self.file_path)?);
        self.current_size = 0;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_rotation()?;
        let n = self.writer.write(buf)?;
        self.current_size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// 安装全局日志：写入 `file_path`，级别可被 `RUST_LOG` 覆盖
pub fn init_logger(file_path: &str, level: LevelFilter, max_size: u64) -> Result<()> {
    let file = RotatingFile::new(file_path, max_size)
        .with_context(|| format!("无法打开日志文件 {}", file_path))?;

    Builder::from_env(Env::default().default_filter_or(level.to_string()))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(file)))
        .try_init()
        .context("日志已经初始化")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_rotating_file_rotates_after_max_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs/app.log");
        let mut file = RotatingFile::new(&path, 32).unwrap();

        writeln!(file, "第一行日志，超过三十二个字节以触发轮转").unwrap();
        writeln!(file, "second").unwrap();
        file.flush().unwrap();

        let backup = std::fs::read_to_string(file.backup_path()).unwrap();
        assert!(backup.contains("第一行日志"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second\n");
    }

    #[test]
    fn test_rotating_file_appends_to_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "old\n").unwrap();

        let mut file = RotatingFile::new(&path, 1024).unwrap();
        writeln!(file, "new").unwrap();
        file.flush().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old\nnew\n");
        assert!(!file.backup_path().exists());
    }
}
