use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::watch;
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::core::error::{DownloadError, DownloadResult};
use super::download;
use super::messages::{DownloadListener, TaskInfo};
use super::snapshot::{self, TaskSnapshot, SNAPSHOT_VERSION};
use super::state::TaskStatus;
use super::util::{DEFAULT_CHUNK_SIZE, DEFAULT_MEMORY_CACHE_KB};

/// 默认连接/读取超时
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(20000);
/// 未指定下载目录时使用
pub const DEFAULT_FOLDER_PATH: &str = "./downloads";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 从 URL 推断文件名：取最后一段路径（去掉查询串），
/// 不超过 4 个字符时在前面加上 uuid 避免重名。
pub fn guess_file_name(target_url: &str, uuid: &Uuid) -> String {
    let last = match Url::parse(target_url) {
        Ok(url) => url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string(),
        Err(_) => {
            let tail = target_url.rsplit('/').next().unwrap_or_default();
            tail.split('?').next().unwrap_or_default().to_string()
        }
    };
    if last.chars().count() > 4 {
        last
    } else {
        format!("{}{}", uuid, last)
    }
}

/// 任务数据，只在持有锁时读写
#[derive(Debug)]
pub(crate) struct TaskState {
    pub uuid: Uuid,
    pub url: String,
    pub file_name: Option<String>,
    pub file_path: Option<PathBuf>,
    pub download_dir: PathBuf,
    pub total: u64,
    pub loaded: u64,
    pub rate_limit_kb: u32,
    pub memory_cache_kb: u32,
    pub buffer_size: usize,
    pub timeout: Duration,
    pub tag: i32,
    pub status: TaskStatus,
    pub error: Option<String>,
    /// 临时文件已转正，防止重复执行
    pub promoted: bool,
}

impl TaskState {
    fn new(url: String) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            url,
            file_name: None,
            file_path: None,
            download_dir: PathBuf::from(DEFAULT_FOLDER_PATH),
            total: 0,
            loaded: 0,
            rate_limit_kb: 0,
            memory_cache_kb: 0,
            buffer_size: DEFAULT_CHUNK_SIZE,
            timeout: DEFAULT_TIMEOUT,
            tag: 0,
            status: TaskStatus::Idle,
            error: None,
            promoted: false,
        }
    }

    pub fn file_name(&self) -> String {
        match &self.file_name {
            Some(name) => name.clone(),
            None => guess_file_name(&self.url, &self.uuid),
        }
    }

    pub fn file_path(&self) -> PathBuf {
        match &self.file_path {
            Some(path) => path.clone(),
            None => self.download_dir.join(self.file_name()),
        }
    }

    pub fn temp_file_path(&self) -> PathBuf {
        snapshot::temp_file_path(&self.file_path())
    }

    pub fn config_file_path(&self) -> PathBuf {
        snapshot::config_file_path(&self.file_path())
    }

    pub fn memory_cache_size(&self) -> u32 {
        if self.memory_cache_kb == 0 {
            DEFAULT_MEMORY_CACHE_KB
        } else {
            self.memory_cache_kb
        }
    }

    /// 已知总长度且已全部写入
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.loaded >= self.total
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            version: SNAPSHOT_VERSION,
            uuid: self.uuid,
            target_url: self.url.clone(),
            loaded_byte_length: self.loaded,
            total_byte_length: self.total,
            download_rate_limit: self.rate_limit_kb,
            memory_cache_size: self.memory_cache_size(),
            tag: self.tag,
            file_path: self.file_path(),
            file_name: self.file_name(),
            saved_at: Some(chrono::Utc::now()),
        }
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            uuid: self.uuid,
            tag: self.tag,
            url: self.url.clone(),
            file_path: self.file_path(),
            loaded: self.loaded,
            total: self.total,
            status: self.status.clone(),
            error: self.error.clone(),
        }
    }
}

/// 任务和下载线程共享的部分
pub(crate) struct TaskInner {
    state: Mutex<TaskState>,
    pub running: AtomicBool,
    /// 当前下载线程，同时用于串行化 start/stop
    worker: Mutex<Option<JoinHandle<()>>>,
    /// 关闭信号，相当于关闭 socket
    closer: Mutex<Option<watch::Sender<bool>>>,
    listener: Mutex<Option<Arc<dyn DownloadListener>>>,
}

impl TaskInner {
    pub fn state(&self) -> MutexGuard<'_, TaskState> {
        lock(&self.state)
    }

    pub fn info(&self) -> TaskInfo {
        self.state().info()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_status(&self, status: TaskStatus) {
        self.state().status = status;
    }

    /// 调用回调；不持有任何锁
    pub fn notify(&self, callback: impl FnOnce(&dyn DownloadListener, &TaskInfo)) {
        let listener = lock(&self.listener).clone();
        if let Some(listener) = listener {
            let info = self.info();
            callback(listener.as_ref(), &info);
        }
    }

    pub fn write_config_file(&self) -> DownloadResult<()> {
        let (snapshot, path) = {
            let state = self.state();
            (state.snapshot(), state.config_file_path())
        };
        snapshot.save_to_file(&path)
    }

    /// 记录本次运行的错误；仍在运行时才算失败，结束运行后通知管理器
    pub fn capture_error(&self, error: DownloadError) {
        let still_running = self.is_running();
        // stop() 打断了等待中的 IO，不是错误
        if !still_running && error.is_closed() {
            log::debug!("下载已停止: {}", error);
            return;
        }
        let message = if error.is_timeout() {
            format!("{}（{} ms 内无响应）", error, self.state().timeout.as_millis())
        } else {
            error.to_string()
        };
        {
            let mut state = self.state();
            state.error = Some(message.clone());
            if still_running {
                state.status = TaskStatus::Failed(message.clone());
            }
        }
        if still_running {
            log::error!("下载失败: {}", message);
            self.close();
            self.notify(|l, info| l.on_failed(info));
        } else {
            log::debug!("任务停止后的错误: {}", message);
        }
    }

    /// 关闭 socket 并清除运行标志；未运行时什么都不做
    pub fn close(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        if let Some(closer) = lock(&self.closer).take() {
            let _ = closer.send(true);
        }
        true
    }
}

/// 单个下载任务。克隆得到的是同一个任务的句柄。
#[derive(Clone)]
pub struct DownloadTask {
    pub(crate) inner: Arc<TaskInner>,
}

impl DownloadTask {
    pub fn new(target_url: impl Into<String>) -> Self {
        Self::from_state(TaskState::new(target_url.into()))
    }

    /// 使用配置文件中的默认值创建任务
    pub fn with_config(target_url: impl Into<String>, config: &Config) -> Self {
        let mut state = TaskState::new(target_url.into());
        state.download_dir = PathBuf::from(&config.download_dir);
        state.rate_limit_kb = config.speed_limit_kb;
        state.memory_cache_kb = config.memory_cache_kb;
        state.buffer_size = config.buffer_size;
        state.timeout = config.timeout();
        Self::from_state(state)
    }

    /// 从断点配置文件恢复任务。
    ///
    /// 临时文件的实际长度与记录不一致时，已下载进度全部作废，下次启动重新下载。
    /// 记录显示已经下载完整时直接把临时文件转正。
    pub fn from_config_file(config_file: impl AsRef<Path>) -> DownloadResult<Self> {
        let snapshot = TaskSnapshot::load_from_file(config_file.as_ref())?;
        let mut state = TaskState::new(snapshot.target_url);
        state.uuid = snapshot.uuid;
        state.download_dir = snapshot
            .file_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        state.file_name = Some(snapshot.file_name);
        state.file_path = Some(snapshot.file_path);
        state.loaded = snapshot.loaded_byte_length;
        state.total = snapshot.total_byte_length;
        state.rate_limit_kb = snapshot.download_rate_limit;
        state.memory_cache_kb = snapshot.memory_cache_size;
        state.tag = snapshot.tag;

        let actual = snapshot::file_length(&state.temp_file_path());
        let overflow = state.total != 0 && state.loaded > state.total;
        if actual != state.loaded || overflow {
            log::info!(
                "临时文件长度 {} 与记录的 {} 不一致，将重新下载 {}",
                actual,
                state.loaded,
                state.url
            );
            state.loaded = 0;
            state.total = 0;
        }
        let complete = state.is_complete();
        let task = Self::from_state(state);

        // 上次写完最后一块后、改名前退出
        if complete {
            match download::promote(&task.inner) {
                Ok(_) => {
                    log::info!("补完上次未完成的改名: {}", task.file_path().display());
                    task.inner.set_status(TaskStatus::Completed);
                }
                Err(e) => log::warn!("无法完成 {}: {}", task.file_path().display(), e),
            }
        }
        Ok(task)
    }

    fn from_state(state: TaskState) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                state: Mutex::new(state),
                running: AtomicBool::new(false),
                worker: Mutex::new(None),
                closer: Mutex::new(None),
                listener: Mutex::new(None),
            }),
        }
    }

    /// 开始下载。已在运行或已经下载完成时什么都不做并返回 `false`。
    pub fn start(&self) -> bool {
        let mut worker = lock(&self.inner.worker);
        if self.inner.is_running() {
            return false;
        }
        {
            let state = self.inner.state();
            if state.is_complete() || state.status == TaskStatus::Completed {
                return false;
            }
        }
        // 上一次运行可能还在释放资源
        if let Some(previous) = worker.take() {
            if previous.join().is_err() {
                log::error!("上一次下载线程异常退出");
            }
        }

        let (closer, closed) = watch::channel(false);
        *lock(&self.inner.closer) = Some(closer);
        self.inner.running.store(true, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        let name = format!("download-{}", &self.uuid().simple().to_string()[..8]);
        match thread::Builder::new()
            .name(name)
            .spawn(move || download::run_worker(inner, closed))
        {
            Ok(handle) => {
                *worker = Some(handle);
                true
            }
            Err(e) => {
                log::error!("无法创建下载线程: {}", e);
                self.inner.running.store(false, Ordering::SeqCst);
                lock(&self.inner.closer).take();
                false
            }
        }
    }

    /// 停止下载，保留临时文件和断点配置以便续传。未运行时返回 `false`。
    pub fn stop(&self) -> bool {
        let _worker = lock(&self.inner.worker);
        let stopped = self.inner.close();
        if stopped {
            log::info!("停止下载: {}", self.target_url());
        }
        stopped
    }

    /// 等待当前下载线程结束
    pub fn join(&self) {
        let handle = lock(&self.inner.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("下载线程异常退出");
            }
        }
    }

    /// 立即写入断点配置文件，没有下载任何数据时也可调用
    pub fn write_config_file(&self) -> DownloadResult<()> {
        self.inner.write_config_file()
    }

    pub fn set_listener(&self, listener: Arc<dyn DownloadListener>) {
        *lock(&self.inner.listener) = Some(listener);
    }

    pub fn set_file_name(&self, file_name: impl Into<String>) {
        self.inner.state().file_name = Some(file_name.into());
    }

    /// 本地文件完整路径，包括文件名
    pub fn set_file_path(&self, file_path: impl Into<PathBuf>) {
        self.inner.state().file_path = Some(file_path.into());
    }

    pub fn set_download_dir(&self, dir: impl Into<PathBuf>) {
        self.inner.state().download_dir = dir.into();
    }

    /// 限速，单位 KB/s，0 为不限速
    pub fn set_download_rate_limit(&self, limit_kb: u32) {
        self.inner.state().rate_limit_kb = limit_kb;
    }

    /// 内存缓存大小，单位 KB，缓存满后写入文件
    pub fn set_memory_cache_size(&self, cache_kb: u32) {
        self.inner.state().memory_cache_kb = cache_kb;
    }

    pub fn set_buffer_size(&self, buffer_size: usize) {
        self.inner.state().buffer_size = buffer_size;
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.inner.state().timeout = timeout;
    }

    pub fn set_tag(&self, tag: i32) {
        self.inner.state().tag = tag;
    }

    pub fn uuid(&self) -> Uuid {
        self.inner.state().uuid
    }

    pub fn target_url(&self) -> String {
        self.inner.state().url.clone()
    }

    pub fn file_name(&self) -> String {
        self.inner.state().file_name()
    }

    pub fn file_path(&self) -> PathBuf {
        self.inner.state().file_path()
    }

    pub fn temp_file_path(&self) -> PathBuf {
        self.inner.state().temp_file_path()
    }

    pub fn config_file_path(&self) -> PathBuf {
        self.inner.state().config_file_path()
    }

    /// 目标文件总大小，0 表示未知
    pub fn total_byte_length(&self) -> u64 {
        self.inner.state().total
    }

    /// 已写入临时文件的字节数
    pub fn loaded_byte_length(&self) -> u64 {
        self.inner.state().loaded
    }

    /// 下载进度，0 到 1
    pub fn progress(&self) -> f32 {
        self.info().progress()
    }

    pub fn download_rate_limit(&self) -> u32 {
        self.inner.state().rate_limit_kb
    }

    pub fn memory_cache_size(&self) -> u32 {
        self.inner.state().memory_cache_size()
    }

    pub fn timeout(&self) -> Duration {
        self.inner.state().timeout
    }

    pub fn tag(&self) -> i32 {
        self.inner.state().tag
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.state().status.clone()
    }

    /// 最近一次运行的错误，没有出错时为 `None`
    pub fn error(&self) -> Option<String> {
        self.inner.state().error.clone()
    }

    pub fn is_downloading(&self) -> bool {
        self.inner.is_running()
    }

    pub fn info(&self) -> TaskInfo {
        self.inner.info()
    }
}

impl std::fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTask")
            .field("state", &*self.inner.state())
            .field("running", &self.inner.is_running())
            .finish()
    }
}
