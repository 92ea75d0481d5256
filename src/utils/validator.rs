use std::path::Path;

use crate::core::error::DownloadError;
use crate::core::task::http::Target;
use crate::core::task::CONFIG_FILE_SUFFIX;

/// 只支持明文 http
pub fn validate_url(url: &str) -> Result<(), DownloadError> {
    Target::parse(url).map(|_| ())
}

/// 下载目录可以不存在，但不能是一个文件
pub fn validate_output_path(path: &str) -> Result<(), DownloadError> {
    if path.is_empty() {
        return Err(DownloadError::config("输出路径不能为空"));
    }
    if Path::new(path).is_file() {
        return Err(DownloadError::config(format!("输出路径是一个文件: {}", path)));
    }
    Ok(())
}

/// 检查恢复用的断点配置文件
pub fn validate_config_file(path: &str) -> Result<(), DownloadError> {
    if !path.ends_with(CONFIG_FILE_SUFFIX) {
        return Err(DownloadError::persistence(
            path,
            format!("断点配置文件应以 {} 结尾", CONFIG_FILE_SUFFIX),
        ));
    }
    if !Path::new(path).is_file() {
        return Err(DownloadError::persistence(path, "文件不存在"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_url_validation() {
        assert!(validate_url("http://example.com/a.zip").is_ok());
        assert!(validate_url("http://127.0.0.1:8080/").is_ok());
        assert!(validate_url("https://example.com").is_err());
        assert!(validate_url("ftp://example.com/a.zip").is_err());
        assert!(matches!(
            validate_url("invalid-url"),
            Err(DownloadError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_output_path_validation() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, "x").unwrap();

        assert!(validate_output_path("./").is_ok());
        assert!(validate_output_path("./nonexistent").is_ok());
        assert!(validate_output_path("").is_err());
        assert!(validate_output_path(file.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_config_file_validation() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.zip.dlcfg");
        std::fs::write(&file, "{}").unwrap();

        assert!(validate_config_file(file.to_str().unwrap()).is_ok());
        assert!(validate_config_file("a.zip.json").is_err());
        assert!(validate_config_file(dir.path().join("b.zip.dlcfg").to_str().unwrap()).is_err());
    }
}
