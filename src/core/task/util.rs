use bytes::BytesMut;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// 默认读取块大小
pub const DEFAULT_CHUNK_SIZE: usize = 8192;
/// 默认内存缓存大小（KB）
pub const DEFAULT_MEMORY_CACHE_KB: u32 = 100;
/// 限速器每次调整的休眠步长
pub const SLEEP_TIME_DELTA: Duration = Duration::from_millis(100);
/// 测速窗口，超过后重新开始统计
pub const SPEED_WINDOW: Duration = Duration::from_millis(5000);

/// 计算本次运行的读取块大小，限速时不超过每秒预算
pub fn chunk_size_for(buffer_size: usize, rate_limit_kb: u32) -> usize {
    let buffer_size = buffer_size.max(1);
    if rate_limit_kb == 0 {
        return buffer_size;
    }
    let budget = (rate_limit_kb as usize).saturating_mul(1024);
    buffer_size.min(budget)
}

/// 内存缓冲区：累积到阈值后一次性写入文件，减少磁盘 IO 次数
#[derive(Debug)]
pub struct BufferManager {
    buffer: BytesMut,
    threshold: usize,
    flush_count: u64,
}

impl BufferManager {
    /// `memory_cache_kb` 为 0 时使用默认的 100 KB
    pub fn new(memory_cache_kb: u32) -> Self {
        let kb = if memory_cache_kb == 0 {
            DEFAULT_MEMORY_CACHE_KB
        } else {
            memory_cache_kb
        };
        let threshold = (kb as usize) << 10;
        Self {
            buffer: BytesMut::with_capacity(threshold + DEFAULT_CHUNK_SIZE),
            threshold,
            flush_count: 0,
        }
    }

    /// 向缓冲区追加数据
    pub fn write(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// 缓冲区是否达到刷新阈值
    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.threshold
    }

    /// 把缓冲区全部内容写入 `out` 并清空，返回写入的字节数。
    ///
    /// 缓冲区为空时不会触碰 `out`，也不计入刷新次数。
    pub async fn flush_into<W>(&mut self, out: &mut W) -> std::io::Result<usize>
    where
        W: AsyncWrite + Unpin,
    {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        out.write_all(&self.buffer).await?;
        out.flush().await?;
        let written = self.buffer.len();
        self.buffer.clear();
        self.flush_count += 1;
        Ok(written)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// 获取刷新次数
    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }

    /// 释放缓冲区内存，未写入的数据丢弃
    pub fn release(&mut self) {
        self.buffer = BytesMut::new();
    }
}

/// 速度限制器
///
/// 反馈式限速：根据测速窗口内的平均速度每次增减固定的休眠时间，
/// 逐步收敛到目标速度，而不是像令牌桶一样精确计算等待时间。
#[derive(Debug)]
pub struct SpeedLimiter {
    limit: u64, // B/s
    window_start: Instant,
    window_bytes: u64,
    sleep_time: Duration,
}

impl SpeedLimiter {
    pub fn new(limit_kb: u32, now: Instant) -> Self {
        Self {
            limit: (limit_kb as u64) << 10,
            window_start: now,
            window_bytes: 0,
            sleep_time: Duration::ZERO,
        }
    }

    /// 记录本次收到的字节数，返回本块之后应当休眠的时长
    pub fn wait_if_needed(&mut self, received: usize, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.window_start).as_millis() as u64;
        self.window_bytes += received as u64;
        if elapsed == 0 {
            return Duration::ZERO;
        }

        let byte_rate = self.window_bytes * 1000 / elapsed;
        if elapsed >= SPEED_WINDOW.as_millis() as u64 {
            self.window_start = now;
            self.window_bytes = 0;
        }

        if byte_rate >= self.limit {
            self.sleep_time += SLEEP_TIME_DELTA;
        } else if self.sleep_time >= SLEEP_TIME_DELTA {
            self.sleep_time -= SLEEP_TIME_DELTA;
        }
        self.sleep_time
    }
}
