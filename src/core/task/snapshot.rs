use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::core::error::{DownloadError, DownloadResult};

/// 当前断点配置文件格式版本
pub const SNAPSHOT_VERSION: u32 = 1;
/// 断点配置文件后缀
pub const CONFIG_FILE_SUFFIX: &str = ".dlcfg";
/// 下载临时文件后缀
pub const TEMP_FILE_SUFFIX: &str = ".dl";
/// 写快照时先写入的中间文件后缀
const PENDING_SUFFIX: &str = ".tmp";

/// 断点续传所需的任务快照，保存在 `<文件路径>.dlcfg`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub version: u32,
    pub uuid: Uuid,
    #[serde(rename = "targetURL")]
    pub target_url: String,
    pub loaded_byte_length: u64,
    pub total_byte_length: u64,
    pub download_rate_limit: u32,
    pub memory_cache_size: u32,
    pub tag: i32,
    pub file_path: PathBuf,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    /// 写入快照，覆盖已有内容。
    ///
    /// 先写 `<path>.tmp` 再改名，写到一半崩溃时旧快照仍然完整。
    pub fn save_to_file(&self, path: &Path) -> DownloadResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DownloadError::persistence(path, e))?;
        let pending = with_suffix(path, PENDING_SUFFIX);
        fs::write(&pending, json).map_err(|e| DownloadError::persistence(&pending, e))?;
        if let Err(e) = fs::rename(&pending, path) {
            let _ = fs::remove_file(&pending);
            return Err(DownloadError::persistence(path, e));
        }
        Ok(())
    }

    /// 读取快照；不认识的字段忽略，更高版本直接拒绝
    pub fn load_from_file(path: &Path) -> DownloadResult<Self> {
        let data = fs::read_to_string(path).map_err(|e| DownloadError::persistence(path, e))?;
        let snapshot: TaskSnapshot =
            serde_json::from_str(&data).map_err(|e| DownloadError::persistence(path, e))?;
        if snapshot.version == 0 || snapshot.version > SNAPSHOT_VERSION {
            return Err(DownloadError::persistence(
                path,
                format!("不支持的版本: {}", snapshot.version),
            ));
        }
        Ok(snapshot)
    }
}

/// 在路径末尾追加后缀（不替换扩展名）
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

pub fn temp_file_path(file_path: &Path) -> PathBuf {
    with_suffix(file_path, TEMP_FILE_SUFFIX)
}

pub fn config_file_path(file_path: &Path) -> PathBuf {
    with_suffix(file_path, CONFIG_FILE_SUFFIX)
}

/// 文件长度，不存在时为 0
pub fn file_length(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// 列出目录下所有断点配置文件
pub fn find_config_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_config = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(CONFIG_FILE_SUFFIX))
            .unwrap_or(false);
        if is_config && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(dir: &Path) -> TaskSnapshot {
        TaskSnapshot {
            version: SNAPSHOT_VERSION,
            uuid: Uuid::new_v4(),
            target_url: "http://example.com/file.zip".to_string(),
            loaded_byte_length: 4096,
            total_byte_length: 10000,
            download_rate_limit: 64,
            memory_cache_size: 100,
            tag: 7,
            file_path: dir.join("file.zip"),
            file_name: "file.zip".to_string(),
            saved_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_save_and_load_snapshot() {
        let dir = tempdir().unwrap();
        let snapshot = sample(dir.path());
        let path = config_file_path(&snapshot.file_path);

        snapshot.save_to_file(&path).unwrap();
        let loaded = TaskSnapshot::load_from_file(&path).unwrap();
        assert_eq!(loaded, snapshot);

        // 字段名固定，便于人工检查
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"targetURL\""));
        assert!(raw.contains("\"loadedByteLength\": 4096"));
    }

    #[test]
    fn test_save_replaces_snapshot_without_leftovers() {
        let dir = tempdir().unwrap();
        let mut snapshot = sample(dir.path());
        let path = config_file_path(&snapshot.file_path);
        let pending = with_suffix(&path, PENDING_SUFFIX);

        snapshot.save_to_file(&path).unwrap();
        // 上次写到一半留下的残缺中间文件
        fs::write(&pending, b"{\"version\":1,\"uu").unwrap();

        snapshot.loaded_byte_length = 8192;
        snapshot.save_to_file(&path).unwrap();
        assert!(!pending.exists());
        assert_eq!(TaskSnapshot::load_from_file(&path).unwrap().loaded_byte_length, 8192);

        // 中间文件不会被当成断点配置
        assert_eq!(find_config_files(dir.path()).unwrap(), vec![path]);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.zip.dlcfg");
        let json = format!(
            r#"{{"version":1,"uuid":"{}","targetURL":"http://h/a.zip","loadedByteLength":1,
            "totalByteLength":2,"downloadRateLimit":0,"memoryCacheSize":100,"tag":0,
            "filePath":"/tmp/a.zip","fileName":"a.zip","checksum":"later"}}"#,
            Uuid::new_v4()
        );
        fs::write(&path, json).unwrap();
        let loaded = TaskSnapshot::load_from_file(&path).unwrap();
        assert_eq!(loaded.loaded_byte_length, 1);
        assert_eq!(loaded.saved_at, None);
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let dir = tempdir().unwrap();
        let mut snapshot = sample(dir.path());
        snapshot.version = SNAPSHOT_VERSION + 1;
        let path = dir.path().join("file.zip.dlcfg");
        snapshot.save_to_file(&path).unwrap();
        assert!(matches!(
            TaskSnapshot::load_from_file(&path),
            Err(DownloadError::Persistence { .. })
        ));
    }

    #[test]
    fn test_corrupted_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.dlcfg");
        fs::write(&path, b"\x00\x01not json").unwrap();
        assert!(TaskSnapshot::load_from_file(&path).is_err());
        assert!(TaskSnapshot::load_from_file(&dir.path().join("missing.dlcfg")).is_err());
    }

    #[test]
    fn test_sidecar_paths() {
        let file = Path::new("/data/video.tar.gz");
        assert_eq!(temp_file_path(file), PathBuf::from("/data/video.tar.gz.dl"));
        assert_eq!(config_file_path(file), PathBuf::from("/data/video.tar.gz.dlcfg"));
    }

    #[test]
    fn test_find_config_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.zip.dlcfg"), "{}").unwrap();
        fs::write(dir.path().join("a.zip.dlcfg"), "{}").unwrap();
        fs::write(dir.path().join("a.zip.dl"), "").unwrap();
        let found = find_config_files(dir.path()).unwrap();
        assert_eq!(
            found,
            vec![dir.path().join("a.zip.dlcfg"), dir.path().join("b.zip.dlcfg")]
        );
        assert_eq!(file_length(&dir.path().join("a.zip.dl")), 0);
        assert_eq!(file_length(&dir.path().join("none")), 0);
    }
}
