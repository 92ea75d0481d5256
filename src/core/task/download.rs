use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::sync::watch;

use crate::core::error::{DownloadError, DownloadResult};
use super::download_task::TaskInner;
use super::http::{build_request, read_header_line, HeaderLine, ResponseHeader, Target};
use super::state::TaskStatus;
use super::util::{chunk_size_for, BufferManager, SpeedLimiter};

/// 关闭请求输出流的最长等待时间
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// 本次运行开始时从任务中取出的参数
struct RunPlan {
    url: String,
    file_path: PathBuf,
    temp_path: PathBuf,
    chunk_size: usize,
    timeout: Duration,
    rate_limit_kb: u32,
}

/// 响应体读取循环的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyEnd {
    /// 已收到声明长度的全部数据
    Complete,
    /// 服务器正常关闭连接
    Eof,
    /// 被停止
    Stopped,
    /// 出错中断
    Aborted,
}

/// 一次运行持有的资源，释放顺序固定
struct Session {
    writer: Option<BufWriter<OwnedWriteHalf>>,
    reader: Option<BufReader<OwnedReadHalf>>,
    output: Option<File>,
    buffer: BufferManager,
    temp_path: PathBuf,
}

impl Session {
    fn new(temp_path: PathBuf, memory_cache_kb: u32) -> Self {
        Self {
            writer: None,
            reader: None,
            output: None,
            buffer: BufferManager::new(memory_cache_kb),
            temp_path,
        }
    }

    /// 依次关闭请求流、响应流，写入剩余缓存，关闭文件，最后释放缓存
    async fn release(&mut self, inner: &TaskInner) {
        if let Some(mut writer) = self.writer.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::debug!("关闭请求输出流失败: {}", e),
                Err(_) => log::debug!("关闭请求输出流超时"),
            }
        }
        drop(self.reader.take());

        if let Err(e) =
            flush_cache(inner, &mut self.buffer, &mut self.output, &self.temp_path).await
        {
            log::warn!("写入剩余缓存失败: {}", e);
            if inner.is_running() {
                inner.capture_error(e);
            } else {
                let mut state = inner.state();
                if state.error.is_none() {
                    state.error = Some(e.to_string());
                }
            }
        }

        if let Some(output) = self.output.take() {
            if let Err(e) = output.sync_all().await {
                log::warn!("关闭临时文件失败 {}: {}", self.temp_path.display(), e);
            }
        }
        log::debug!(
            "本次运行写入磁盘 {} 次: {}",
            self.buffer.flush_count(),
            self.temp_path.display()
        );
        self.buffer.release();
    }
}

/// 下载线程入口：每个任务一个线程，线程内运行单线程 tokio 运行时
pub(crate) fn run_worker(inner: Arc<TaskInner>, closed: watch::Receiver<bool>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("无法创建下载运行时: {}", e);
            inner.capture_error(DownloadError::Transfer(e));
            end_run(&inner);
            return;
        }
    };
    runtime.block_on(run(&inner, closed));
}

async fn run(inner: &TaskInner, mut closed: watch::Receiver<bool>) {
    let (plan, memory_cache_kb) = {
        let mut state = inner.state();
        state.error = None;
        state.status = TaskStatus::Connecting;
        let plan = RunPlan {
            url: state.url.clone(),
            file_path: state.file_path(),
            temp_path: state.temp_file_path(),
            chunk_size: chunk_size_for(state.buffer_size, state.rate_limit_kb),
            timeout: state.timeout,
            rate_limit_kb: state.rate_limit_kb,
        };
        (plan, state.memory_cache_kb)
    };
    log::info!("开始下载: {} -> {}", plan.url, plan.file_path.display());
    inner.notify(|l, info| l.on_start(info));

    let mut session = Session::new(plan.temp_path.clone(), memory_cache_kb);
    let end = match transfer(inner, &mut session, &mut closed, &plan).await {
        Ok(end) => end,
        Err(e) => {
            inner.capture_error(e);
            BodyEnd::Aborted
        }
    };
    session.release(inner).await;

    match finish(inner, end) {
        Ok(true) => {}
        Ok(false) => end_run(inner),
        Err(e) => {
            inner.capture_error(e);
            end_run(inner);
        }
    }
}

/// 未完成时结束本次运行：保留失败状态，否则标记为已停止
fn end_run(inner: &TaskInner) {
    {
        let mut state = inner.state();
        if !matches!(state.status, TaskStatus::Failed(_)) {
            state.status = TaskStatus::Stopped;
        }
    }
    inner.close();
}

/// 把 IO 操作和关闭信号、超时放在一起等待。
///
/// 超时返回 `TimedOut`，收到关闭信号返回 `ConnectionAborted`。
async fn guarded<T, F>(
    closed: &mut watch::Receiver<bool>,
    limit: Duration,
    operation: F,
) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    tokio::select! {
        result = tokio::time::timeout(limit, operation) => match result {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "操作超时")),
        },
        _ = closed.wait_for(|closed| *closed) => {
            Err(io::Error::new(io::ErrorKind::ConnectionAborted, "连接已关闭"))
        }
    }
}

/// 限速休眠，关闭信号可以提前唤醒
async fn pause(closed: &mut watch::Receiver<bool>, duration: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = closed.wait_for(|closed| *closed) => {}
    }
}

async fn connect(
    target: &Target,
    recv_buffer: usize,
    limit: Duration,
    closed: &mut watch::Receiver<bool>,
) -> DownloadResult<TcpStream> {
    let authority = target.authority();
    let addr = guarded(closed, limit, async {
        lookup_host((target.host.as_str(), target.port))
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "无法解析主机地址"))
    })
    .await
    .map_err(|e| DownloadError::connection(&authority, e))?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|e| DownloadError::connection(&authority, e))?;
    let recv_buffer = u32::try_from(recv_buffer).unwrap_or(u32::MAX);
    if let Err(e) = socket.set_recv_buffer_size(recv_buffer) {
        log::warn!("设置接收缓冲区失败: {}", e);
    }

    log::debug!("连接 {} ({})", authority, addr);
    guarded(closed, limit, socket.connect(addr))
        .await
        .map_err(|e| DownloadError::connection(authority, e))
}

async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// 重新下载前创建目录，删除旧的目标文件和临时文件
async fn prepare_fresh_files(file_path: &Path, temp_path: &Path) -> io::Result<()> {
    if let Some(dir) = file_path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).await?;
        }
    }
    remove_if_exists(file_path).await?;
    remove_if_exists(temp_path).await
}

fn header_error(e: io::Error) -> DownloadError {
    if e.kind() == io::ErrorKind::InvalidData {
        DownloadError::protocol(e.to_string())
    } else {
        DownloadError::Transfer(e)
    }
}

/// 根据响应头确定总长度；服务器不支持续传时从头开始
async fn apply_response(
    inner: &TaskInner,
    header: &ResponseHeader,
    resume_from: u64,
    temp_path: &Path,
) -> DownloadResult<()> {
    let status_line = header.status_line().unwrap_or_default();
    let code = header
        .status_code()
        .ok_or_else(|| DownloadError::protocol("缺少状态行"))?;
    if !(200..300).contains(&code) {
        return Err(DownloadError::protocol(format!("服务器返回 {}", status_line)));
    }
    if header.is_chunked() {
        return Err(DownloadError::protocol("不支持分块传输编码"));
    }

    if code == 206 && resume_from > 0 {
        let mut state = inner.state();
        if state.total == 0 {
            state.total = header
                .content_range_total()
                .unwrap_or(resume_from + header.content_length());
        }
        return Ok(());
    }

    if resume_from > 0 {
        log::warn!("服务器不支持断点续传 ({})，重新下载", status_line);
        remove_if_exists(temp_path)
            .await
            .map_err(DownloadError::Transfer)?;
        let mut state = inner.state();
        state.loaded = 0;
        state.total = 0;
    }
    if !header.has_content_length() {
        log::info!("响应未声明长度，读到连接关闭为止");
    }
    let mut state = inner.state();
    if state.total == 0 {
        state.total = header.content_length();
    }
    Ok(())
}

async fn transfer(
    inner: &TaskInner,
    session: &mut Session,
    closed: &mut watch::Receiver<bool>,
    plan: &RunPlan,
) -> DownloadResult<BodyEnd> {
    let target = Target::parse(&plan.url)?;
    let stream = connect(&target, plan.chunk_size, plan.timeout, closed).await?;
    let (read_half, write_half) = stream.into_split();
    let reader = session
        .reader
        .insert(BufReader::with_capacity(plan.chunk_size, read_half));
    let writer = session.writer.insert(BufWriter::new(write_half));

    inner.set_status(TaskStatus::SendingRequest);
    let resume_from = inner.state().loaded;
    if resume_from == 0 {
        prepare_fresh_files(&plan.file_path, &plan.temp_path)
            .await
            .map_err(DownloadError::Transfer)?;
    }
    let request = build_request(&target, resume_from);
    log::debug!("发送请求:\n{}", request.trim_end());
    guarded(closed, plan.timeout, async {
        writer.write_all(request.as_bytes()).await?;
        writer.flush().await
    })
    .await
    .map_err(DownloadError::Transfer)?;

    inner.set_status(TaskStatus::ReceivingHeaders);
    let mut header = ResponseHeader::new();
    loop {
        match guarded(closed, plan.timeout, read_header_line(&mut *reader))
            .await
            .map_err(header_error)?
        {
            HeaderLine::Line(line) => {
                log::debug!("响应头: {}", line);
                header.add_response_header_line(&line)?;
            }
            HeaderLine::End => break,
            HeaderLine::Eof => return Err(DownloadError::protocol("响应头结束前连接已关闭")),
        }
    }
    apply_response(inner, &header, resume_from, &plan.temp_path).await?;

    inner.set_status(TaskStatus::ReceivingBody);
    let output = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&plan.temp_path)
        .await
        .map_err(DownloadError::Transfer)?;
    session.output = Some(output);

    let mut limiter = (plan.rate_limit_kb > 0)
        .then(|| SpeedLimiter::new(plan.rate_limit_kb, Instant::now()));
    let mut chunk = vec![0u8; plan.chunk_size];
    loop {
        if !inner.is_running() {
            return Ok(BodyEnd::Stopped);
        }
        let want = {
            let state = inner.state();
            if state.total > 0 {
                let received = state.loaded + session.buffer.len() as u64;
                let remaining = state.total.saturating_sub(received);
                if remaining == 0 {
                    return Ok(BodyEnd::Complete);
                }
                remaining.min(chunk.len() as u64) as usize
            } else {
                chunk.len()
            }
        };

        let n = guarded(closed, plan.timeout, reader.read(&mut chunk[..want]))
            .await
            .map_err(DownloadError::Transfer)?;
        if n == 0 {
            return Ok(BodyEnd::Eof);
        }
        session.buffer.write(&chunk[..n]);
        if session.buffer.is_full() {
            flush_cache(inner, &mut session.buffer, &mut session.output, &plan.temp_path)
                .await?;
        }

        if let Some(limiter) = limiter.as_mut() {
            let wait = limiter.wait_if_needed(n, Instant::now());
            if !wait.is_zero() {
                pause(closed, wait).await;
            }
        }
    }
}

/// 把缓存写入临时文件并保存断点配置。
///
/// 临时文件不存在时先创建；配置文件写入失败只记录日志。
async fn flush_cache(
    inner: &TaskInner,
    buffer: &mut BufferManager,
    output: &mut Option<File>,
    temp_path: &Path,
) -> DownloadResult<()> {
    if output.is_none() && fs::metadata(temp_path).await.is_err() {
        if let Err(e) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(temp_path)
            .await
        {
            log::warn!("创建临时文件失败 {}: {}", temp_path.display(), e);
        }
    }

    let mut result = Ok(());
    if let Some(output) = output.as_mut() {
        match buffer.flush_into(output).await {
            Ok(written) => inner.state().loaded += written as u64,
            Err(e) => result = Err(DownloadError::Transfer(e)),
        }
    }

    if let Err(e) = inner.write_config_file() {
        log::warn!("{}", e);
    }
    inner.notify(|l, info| l.on_data_received(info));
    result
}

/// 下载完成时把临时文件改名为目标文件并删除断点配置。
///
/// 只会执行一次，未完成或已经执行过时返回 `false`。
pub(crate) fn promote(inner: &TaskInner) -> DownloadResult<bool> {
    promote_file(inner, false)
}

/// `empty_body` 表示未声明长度且没有收到任何数据，总长度为 0 也视为完成
fn promote_file(inner: &TaskInner, empty_body: bool) -> DownloadResult<bool> {
    let (file_path, temp_path, config_path) = {
        let state = inner.state();
        if state.promoted || !(empty_body || state.is_complete()) {
            return Ok(false);
        }
        (state.file_path(), state.temp_file_path(), state.config_file_path())
    };

    std::fs::rename(&temp_path, &file_path).map_err(DownloadError::Transfer)?;
    match std::fs::remove_file(&config_path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            log::warn!("删除断点配置失败 {}: {}", config_path.display(), e)
        }
        _ => {}
    }
    inner.state().promoted = true;
    Ok(true)
}

/// 检查本次运行是否完成，完成时转正文件并通知，返回是否完成
fn finish(inner: &TaskInner, end: BodyEnd) -> DownloadResult<bool> {
    let empty_body = {
        let mut state = inner.state();
        // 未声明长度，以连接正常关闭作为结束
        let unknown_length = end == BodyEnd::Eof && state.total == 0 && state.error.is_none();
        if unknown_length {
            state.total = state.loaded;
        }
        unknown_length && state.total == 0
    };
    if !promote_file(inner, empty_body)? {
        return Ok(false);
    }

    let succeeded = {
        let mut state = inner.state();
        state.status = TaskStatus::Completed;
        state.error.is_none()
    };
    inner.close();
    if succeeded {
        log::info!("下载完成: {}", inner.state().file_path().display());
        inner.notify(|l, info| l.on_finished(info));
    }
    Ok(true)
}
