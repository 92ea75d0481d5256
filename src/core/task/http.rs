//! 手工拼装的 HTTP/1.1 请求与逐行读取的响应头解析

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use url::Url;

use crate::core::error::{DownloadError, DownloadResult};

pub const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
pub const ACCEPT_CHARSET: &str = "GBK,utf-8;q=0.7,*;q=0.3";
pub const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.8";

/// 单行响应头的最大长度
pub const MAX_HEADER_LINE: u64 = 16 * 1024;
/// 响应头最多行数
pub const MAX_HEADER_LINES: usize = 256;

/// 解析后的下载目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// 用于 `Host` 头，非默认端口时带 `:port`
    pub host_header: String,
    /// 用于解析地址的主机名（IPv6 不带方括号）
    pub host: String,
    pub port: u16,
    /// 请求行中的路径，包括查询串
    pub path: String,
}

impl Target {
    pub fn parse(target_url: &str) -> DownloadResult<Self> {
        let url = Url::parse(target_url)
            .map_err(|e| DownloadError::InvalidUrl(format!("{}: {}", target_url, e)))?;
        if url.scheme() != "http" {
            return Err(DownloadError::InvalidUrl(format!(
                "仅支持 http 协议: {}",
                target_url
            )));
        }
        let host_str = url
            .host_str()
            .ok_or_else(|| DownloadError::InvalidUrl(format!("缺少主机名: {}", target_url)))?;
        let port = url.port_or_known_default().unwrap_or(80);
        let host_header = match url.port() {
            Some(p) => format!("{}:{}", host_str, p),
            None => host_str.to_string(),
        };
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        Ok(Self {
            host_header,
            host: host_str.trim_matches(['[', ']']).to_string(),
            port,
            path,
        })
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 构造 GET 请求；`resume_from > 0` 时带上 Range 头
pub fn build_request(target: &Target, resume_from: u64) -> String {
    let mut request = format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Accept: {}\r\n\
         Accept-Charset: {}\r\n\
         Accept-Language: {}\r\n\
         Connection: close\r\n",
        target.path, target.host_header, ACCEPT, ACCEPT_CHARSET, ACCEPT_LANGUAGE
    );
    if resume_from > 0 {
        request.push_str(&format!("Range: bytes={}-\r\n", resume_from));
    }
    request.push_str("\r\n");
    request
}

/// 读取一行响应头的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderLine {
    Line(String),
    /// 空行，响应头结束
    End,
    /// 连接在响应头结束前关闭
    Eof,
}

/// 按字节读取一行（以 `\n` 结尾，去掉行尾 `\r\n`）。
///
/// 非 ASCII 字节按 UTF-8 宽松解码，不会被误认为流结束。
pub async fn read_header_line<R>(reader: &mut R) -> std::io::Result<HeaderLine>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let n = reader
        .take(MAX_HEADER_LINE + 1)
        .read_until(b'\n', &mut raw)
        .await?;
    if n == 0 {
        return Ok(HeaderLine::Eof);
    }
    if raw.last() != Some(&b'\n') {
        if raw.len() as u64 > MAX_HEADER_LINE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "响应头行过长",
            ));
        }
        // 半行之后连接就关闭了
        return Ok(HeaderLine::Eof);
    }
    raw.pop();
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    if raw.is_empty() {
        Ok(HeaderLine::End)
    } else {
        Ok(HeaderLine::Line(String::from_utf8_lossy(&raw).into_owned()))
    }
}

/// 响应头收集器
#[derive(Debug, Default, Clone)]
pub struct ResponseHeader {
    status_line: Option<String>,
    status_code: Option<u16>,
    headers: Vec<(String, String)>,
}

impl ResponseHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加一行原始响应头，第一行视为状态行
    pub fn add_response_header_line(&mut self, line: &str) -> DownloadResult<()> {
        if self.status_line.is_none() {
            let mut parts = line.split_whitespace();
            let version = parts.next().unwrap_or_default();
            if !version.starts_with("HTTP/") {
                return Err(DownloadError::protocol(format!("无效的状态行: {}", line)));
            }
            let code = parts
                .next()
                .and_then(|c| c.parse::<u16>().ok())
                .ok_or_else(|| DownloadError::protocol(format!("无效的状态码: {}", line)))?;
            self.status_code = Some(code);
            self.status_line = Some(line.to_string());
            return Ok(());
        }
        if self.headers.len() >= MAX_HEADER_LINES {
            return Err(DownloadError::protocol("响应头行数过多"));
        }
        match line.split_once(':') {
            Some((name, value)) => {
                self.headers
                    .push((name.trim().to_string(), value.trim().to_string()));
            }
            None => log::debug!("忽略无法解析的响应头: {}", line),
        }
        Ok(())
    }

    pub fn status_line(&self) -> Option<&str> {
        self.status_line.as_deref()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// 按名称查找（不区分大小写），返回第一个匹配值
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 声明的 Content-Length，未声明或无法解析时为 0
    pub fn content_length(&self) -> u64 {
        self.get("Content-Length")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
    }

    pub fn has_content_length(&self) -> bool {
        self.get("Content-Length")
            .map(|v| v.parse::<u64>().is_ok())
            .unwrap_or(false)
    }

    /// `Content-Range: bytes a-b/total` 中的 total
    pub fn content_range_total(&self) -> Option<u64> {
        let value = self.get("Content-Range")?;
        let (_, total) = value.rsplit_once('/')?;
        total.trim().parse::<u64>().ok()
    }

    pub fn is_chunked(&self) -> bool {
        self.get("Transfer-Encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_target_parse() {
        let target = Target::parse("http://example.com/files/a.zip?x=1").unwrap();
        assert_eq!(target.host_header, "example.com");
        assert_eq!(target.port, 80);
        assert_eq!(target.path, "/files/a.zip?x=1");

        let target = Target::parse("http://127.0.0.1:8080/").unwrap();
        assert_eq!(target.host_header, "127.0.0.1:8080");
        assert_eq!(target.authority(), "127.0.0.1:8080");

        let target = Target::parse("http://[::1]:9000/a.bin").unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.host_header, "[::1]:9000");
    }

    #[test]
    fn test_target_rejects_tls_and_garbage() {
        assert!(matches!(
            Target::parse("https://example.com/a.zip"),
            Err(DownloadError::InvalidUrl(_))
        ));
        assert!(matches!(
            Target::parse("not a url"),
            Err(DownloadError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_build_plain_request() {
        let target = Target::parse("http://example.com/a.zip").unwrap();
        let request = build_request(&target, 0);
        assert_eq!(
            request,
            "GET /a.zip HTTP/1.1\r\n\
             Host: example.com\r\n\
             Accept: text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8\r\n\
             Accept-Charset: GBK,utf-8;q=0.7,*;q=0.3\r\n\
             Accept-Language: zh-CN,zh;q=0.8\r\n\
             Connection: close\r\n\
             \r\n"
        );
    }

    #[test]
    fn test_build_range_request() {
        let target = Target::parse("http://example.com/a.zip").unwrap();
        let request = build_request(&target, 4096);
        assert!(request.ends_with("Connection: close\r\nRange: bytes=4096-\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_read_header_lines_across_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"HTTP/1.1 200 OK\r\nContent-Le")
            .read(b"ngth: 12\r\n\r\nbody")
            .build();
        let mut reader = BufReader::new(mock);

        assert_eq!(
            read_header_line(&mut reader).await.unwrap(),
            HeaderLine::Line("HTTP/1.1 200 OK".into())
        );
        assert_eq!(
            read_header_line(&mut reader).await.unwrap(),
            HeaderLine::Line("Content-Length: 12".into())
        );
        assert_eq!(read_header_line(&mut reader).await.unwrap(), HeaderLine::End);

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"body");
    }

    #[tokio::test]
    async fn test_read_header_line_non_ascii_is_not_eof() {
        let mock = tokio_test::io::Builder::new()
            .read(b"X-Name: \xff\xfe\xe4\xb8\xad\r\n")
            .build();
        let mut reader = BufReader::new(mock);
        match read_header_line(&mut reader).await.unwrap() {
            HeaderLine::Line(line) => assert!(line.starts_with("X-Name:")),
            other => panic!("意外结果: {:?}", other),
        }
        assert_eq!(read_header_line(&mut reader).await.unwrap(), HeaderLine::Eof);
    }

    #[tokio::test]
    async fn test_read_header_line_truncated() {
        let mock = tokio_test::io::Builder::new().read(b"HTTP/1.1 20").build();
        let mut reader = BufReader::new(mock);
        assert_eq!(read_header_line(&mut reader).await.unwrap(), HeaderLine::Eof);
    }

    #[test]
    fn test_response_header_parsing() {
        let mut header = ResponseHeader::new();
        header.add_response_header_line("HTTP/1.1 206 Partial Content").unwrap();
        header.add_response_header_line("content-length: 200").unwrap();
        header.add_response_header_line("Content-Range: bytes 100-299/300").unwrap();
        header.add_response_header_line("garbage").unwrap();

        assert_eq!(header.status_code(), Some(206));
        assert_eq!(header.content_length(), 200);
        assert!(header.has_content_length());
        assert_eq!(header.content_range_total(), Some(300));
        assert!(!header.is_chunked());
    }

    #[test]
    fn test_response_header_rejects_bad_status_line() {
        let mut header = ResponseHeader::new();
        assert!(header.add_response_header_line("SSH-2.0-OpenSSH").is_err());
        let mut header = ResponseHeader::new();
        assert!(header.add_response_header_line("HTTP/1.1 abc").is_err());
    }

    #[test]
    fn test_response_header_without_length() {
        let mut header = ResponseHeader::new();
        header.add_response_header_line("HTTP/1.0 200 OK").unwrap();
        header.add_response_header_line("Transfer-Encoding: chunked").unwrap();
        assert_eq!(header.content_length(), 0);
        assert!(!header.has_content_length());
        assert!(header.is_chunked());
        assert_eq!(header.content_range_total(), None);
    }
}
