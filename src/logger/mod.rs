//! 异步缓冲文件日志
//!
//! 多个任务并发产生日志，单个工作任务把记录拼接进聚合缓冲区，
//! 缓冲区满、收到刷写请求或长时间无新记录时才写文件。
//!
//! ```text
//!   生产者 ──取空闲槽──> free ──┐
//!     │ 格式化                    │
//!     └──入队──> pending ──> 工作任务 ──拼接──> 聚合缓冲区 ──> 文件
//!                                 └──归还槽──> free
//! ```
//!
//! 每个槽在任意时刻只属于 {空闲队列, 生产者, 写队列, 工作任务} 之一。
//! 调度器启动前没有工作任务，生产者直接写文件并归还槽位。
//!
//! - `record`: 记录格式
//! - `worker`: 工作任务与聚合缓冲区

pub mod record;
pub mod worker;

use core::cell::UnsafeCell;
use core::fmt;

use embassy_time::{with_timeout, Duration, Instant};
use heapless::Vec;
use portable_atomic::{AtomicU8, Ordering};

use crate::config::{
    LOGGER_BLOCK_TIME_MS, LOGGER_DEFAULT_PRINTF_MASK, LOGGER_FILENAME, LOGGER_MSG_MAX_LEN,
    LOGGER_NUM_BUFFERS,
};
use crate::fs::{FileSystem, FsError, OpenOptions, SeekFrom};
use crate::rtc::DateTime;
use crate::sync::primitives::{AtomicCounter, AtomicFlag, CriticalChannel, CriticalMutex, SchedulerState, Watermark};
use crate::time::uptime_ms;
use crate::{console_println, log_info};

pub use record::{Header, Severity};
pub use worker::LogWorker;

/// 板载配置的日志器
pub type BoardLogger<F> = Logger<F, LOGGER_NUM_BUFFERS, LOGGER_MSG_MAX_LEN>;

/// 日志错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogError {
    /// 未初始化
    NotInitialized,
    /// 没有空闲槽位 (同步路径不等待)
    NoSlot,
    /// 写队列已满 (同步路径不等待)
    QueueFull,
    /// 文件系统正被占用
    Busy,
    /// 文件写入失败或只写入了一部分
    Fs(FsError),
    /// 文件写入不完整
    Incomplete,
}

impl From<FsError> for LogError {
    fn from(e: FsError) -> Self {
        Self::Fs(e)
    }
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "Logger not initialized"),
            Self::NoSlot => write!(f, "No free log slot"),
            Self::QueueFull => write!(f, "Log write queue full"),
            Self::Busy => write!(f, "Log file busy"),
            Self::Fs(e) => write!(f, "Log file error: {}", e),
            Self::Incomplete => write!(f, "Log file write incomplete"),
        }
    }
}

/// 文件句柄策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePolicy {
    /// 始终打开，写入后 sync
    KeepOpen,
    /// 每次写入都 open / seek 末尾 / write / close
    OpenPerWrite,
}

impl FilePolicy {
    /// 由 `logger-keep-open` feature 选择
    pub const fn for_build() -> Self {
        if cfg!(feature = "logger-keep-open") {
            Self::KeepOpen
        } else {
            Self::OpenPerWrite
        }
    }
}

/// 日志文件与其所在的文件系统
pub struct Storage<F: FileSystem> {
    fs: F,
    file: Option<F::File>,
    policy: FilePolicy,
}

impl<F: FileSystem> Storage<F> {
    pub fn fs(&mut self) -> &mut F {
        &mut self.fs
    }
}

// ===== 槽位 =====

/// 固定数量的记录槽
///
/// 槽本身不加锁: 持有槽号的一方独占该槽，槽号只通过 `free` / `pending`
/// 两个队列转移。
struct Slots<const N: usize, const L: usize> {
    slots: [UnsafeCell<Vec<u8, L>>; N],
}

// Safety: 同一槽号同一时刻只有一个持有者，见 `get_mut`
unsafe impl<const N: usize, const L: usize> Sync for Slots<N, L> {}

impl<const N: usize, const L: usize> Slots<N, L> {
    const fn new() -> Self {
        Self {
            slots: [const { UnsafeCell::new(Vec::new()) }; N],
        }
    }

    /// # Safety
    /// 调用者必须持有 `index` (刚从 `free` 或 `pending` 取出且尚未交出)
    #[allow(clippy::mut_from_ref)]
    unsafe fn get_mut(&self, index: u8) -> &mut Vec<u8, L> {
        &mut *self.slots[usize::from(index)].get()
    }
}

// ===== 日志器 =====

/// 缓冲文件日志器
///
/// `N` 个槽位，每条记录最多 `L` 字节 (含换行)
pub struct Logger<F: FileSystem, const N: usize, const L: usize> {
    scheduler: &'static SchedulerState,
    path: &'static str,
    clock: fn() -> DateTime,
    slots: Slots<N, L>,
    free: CriticalChannel<u8, N>,
    pending: CriticalChannel<Option<u8>, N>,
    storage: CriticalMutex<Storage<F>>,
    initialized: AtomicFlag,
    printf_mask: AtomicU8,
    calls: [AtomicCounter; 4],
    blocked_calls: AtomicCounter,
    buffer_watermark: Watermark,
    highest_write_ms: Watermark,
}

impl<F: FileSystem, const N: usize, const L: usize> Logger<F, N, L> {
    /// `clock` 提供记录头中的日期时间 (通常读 RTC)
    pub const fn new(fs: F, scheduler: &'static SchedulerState, clock: fn() -> DateTime) -> Self {
        assert!(N > 0 && N <= u8::MAX as usize, "slot count must fit in u8");
        assert!(L > 2, "slot too small");
        Self {
            scheduler,
            path: LOGGER_FILENAME,
            clock,
            slots: Slots::new(),
            free: CriticalChannel::new(),
            pending: CriticalChannel::new(),
            storage: CriticalMutex::new(Storage {
                fs,
                file: None,
                policy: FilePolicy::for_build(),
            }),
            initialized: AtomicFlag::new(),
            printf_mask: AtomicU8::new(LOGGER_DEFAULT_PRINTF_MASK),
            calls: [const { AtomicCounter::new() }; 4],
            blocked_calls: AtomicCounter::new(),
            buffer_watermark: Watermark::new(),
            highest_write_ms: Watermark::new(),
        }
    }

    /// 改写日志文件路径与句柄策略 (仅在 `init` 前有效)
    pub fn with_file(mut self, path: &'static str, policy: FilePolicy) -> Self {
        self.path = path;
        self.storage.get_mut().policy = policy;
        self
    }

    /// 初始化: 填充空闲槽队列，保持打开模式下打开日志文件
    ///
    /// 重复调用直接返回成功
    pub fn init(&self) -> Result<(), LogError> {
        if self.initialized.is_set() {
            return Ok(());
        }

        {
            let mut storage = self.storage.try_lock().map_err(|_| LogError::Busy)?;
            if storage.policy == FilePolicy::KeepOpen && storage.file.is_none() {
                let Storage { fs, file, .. } = &mut *storage;
                let mut handle = fs.open(self.path, OpenOptions::open_always_write())?;
                fs.seek(&mut handle, SeekFrom::End(0))?;
                *file = Some(handle);
            }
        }

        for index in 0..N as u8 {
            let _ = self.free.try_send(index);
        }
        self.initialized.set();
        log_info!("File logger ready: {} slots x {} bytes", N, L);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.is_set()
    }

    // ===== 生产者 =====

    /// 标准记录
    ///
    /// 调度器运行前退化为同步直接写文件
    pub async fn log(&self, header: Header<'_>, message: fmt::Arguments<'_>) {
        if !self.is_initialized() {
            return;
        }
        if !self.scheduler.is_running() {
            let _ = self.log_now(Some(header), message);
            return;
        }
        let index = self.acquire().await;
        self.fill(index, Some(&header), message);
        self.pending.send(Some(index)).await;
    }

    /// 简单记录 (info，不带文件/函数/行号)
    pub async fn log_simple(&self, message: fmt::Arguments<'_>) {
        self.log(Header::simple(), message).await;
    }

    /// 原始记录 (无记录头，不计数也不回显)
    pub async fn log_raw(&self, message: fmt::Arguments<'_>) {
        if !self.is_initialized() {
            return;
        }
        if !self.scheduler.is_running() {
            let _ = self.log_now(None, message);
            return;
        }
        let index = self.acquire().await;
        self.fill(index, None, message);
        self.pending.send(Some(index)).await;
    }

    /// 同步产生一条记录，从不等待
    ///
    /// 调度器运行前直接写文件；运行后尝试入队，没有空闲槽或队列满时丢弃
    pub fn log_now(&self, header: Option<Header<'_>>, message: fmt::Arguments<'_>) -> Result<(), LogError> {
        if !self.is_initialized() {
            return Err(LogError::NotInitialized);
        }
        let index = self.free.try_receive().map_err(|_| LogError::NoSlot)?;
        self.fill(index, header.as_ref(), message);

        if self.scheduler.is_running() {
            return self.pending.try_send(Some(index)).map_err(|_| {
                self.release(index);
                LogError::QueueFull
            });
        }

        // Safety: 槽号刚从 free 取出
        let slot = unsafe { self.slots.get_mut(index) };
        let _ = slot.push(b'\n');
        let result = match self.storage.try_lock() {
            Ok(mut storage) => self.write_file(&mut storage, slot),
            Err(_) => Err(LogError::Busy),
        };
        self.release(index);
        result
    }

    async fn acquire(&self) -> u8 {
        if let Ok(index) = with_timeout(Duration::from_millis(LOGGER_BLOCK_TIME_MS), self.free.receive()).await {
            return index;
        }
        self.blocked_calls.increment();
        self.free.receive().await
    }

    fn release(&self, index: u8) {
        // 槽位总数等于队列容量，不会满
        let _ = self.free.try_send(index);
    }

    fn fill(&self, index: u8, header: Option<&Header<'_>>, message: fmt::Arguments<'_>) {
        // Safety: 槽号刚从 free 取出，尚未交出
        let slot = unsafe { self.slots.get_mut(index) };
        record::format_record(slot, header, &(self.clock)(), uptime_ms(), message);

        if let Some(header) = header {
            self.calls[header.severity as usize].increment();
            if self.printf_mask.load(Ordering::Relaxed) & header.severity.mask() != 0 {
                console_println!("{}", core::str::from_utf8(slot).unwrap_or(""));
            }
        }
    }

    /// 请求工作任务立即刷写，调度器运行前无效
    pub async fn flush(&self) {
        if self.scheduler.is_running() && self.is_initialized() {
            self.pending.send(None).await;
        }
    }

    // ===== 文件 =====

    /// 写入日志文件，记录最长写入耗时；失败时输出到控制台
    fn write_file(&self, storage: &mut Storage<F>, data: &[u8]) -> Result<(), LogError> {
        if data.is_empty() {
            return Ok(());
        }
        let start = Instant::now();
        let Storage { fs, file, policy } = storage;
        let result = match policy {
            FilePolicy::KeepOpen => match file.as_mut() {
                Some(handle) => fs
                    .write(handle, data)
                    .and_then(|written| fs.sync(handle).map(|_| written)),
                None => Err(FsError::InvalidHandle),
            },
            FilePolicy::OpenPerWrite => crate::fs::append(fs, self.path, data),
        };
        self.highest_write_ms
            .observe(start.elapsed().as_millis().min(u64::from(u32::MAX)) as u32);

        match result {
            Ok(written) if written == data.len() => Ok(()),
            Ok(written) => {
                console_println!("Error {} writing logfile. {}/{} written.", 0, written, data.len());
                Err(LogError::Incomplete)
            }
            Err(e) => {
                console_println!("Error {} writing logfile. {}/{} written.", e.code(), 0, data.len());
                Err(LogError::Fs(e))
            }
        }
    }

    /// 在持有日志文件系统锁的情况下访问文件系统
    pub async fn with_fs<R>(&self, f: impl FnOnce(&mut F) -> R) -> R {
        let mut storage = self.storage.lock().await;
        f(storage.fs())
    }

    /// 同步访问文件系统，正被占用时返回 `None`
    pub fn try_with_fs<R>(&self, f: impl FnOnce(&mut F) -> R) -> Option<R> {
        self.storage.try_lock().ok().map(|mut storage| f(storage.fs()))
    }

    // ===== 配置与统计 =====

    /// 设置回显到控制台的级别掩码 (`Severity::mask` 的组合)
    pub fn set_printf_mask(&self, mask: u8) {
        self.printf_mask.store(mask, Ordering::Relaxed);
    }

    pub fn printf_mask(&self) -> u8 {
        self.printf_mask.load(Ordering::Relaxed)
    }

    /// 该级别的调用次数
    pub fn call_count(&self, severity: Severity) -> u64 {
        self.calls[severity as usize].get()
    }

    /// 等待空闲槽超过短阻塞时间的次数
    pub fn blocked_calls(&self) -> u64 {
        self.blocked_calls.get()
    }

    /// 写队列深度水位线
    pub fn buffer_watermark(&self) -> u32 {
        self.buffer_watermark.get()
    }

    /// 最长文件写入耗时 (ms)
    pub fn highest_file_write_time_ms(&self) -> u32 {
        self.highest_write_ms.get()
    }

    /// 空闲槽数量
    pub fn free_slots(&self) -> usize {
        self.free.len()
    }
}

// ===== 宏 =====

/// 当前函数名 (不含模块路径)
#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            ::core::any::type_name::<T>()
        }
        let name = type_name_of(f);
        let name = name.strip_suffix("::f").unwrap_or(name);
        name.rsplit("::").find(|part| *part != "{{closure}}").unwrap_or(name)
    }};
}

/// 产生一条标准记录，返回的 future 需要 `.await`
///
/// ```ignore
/// file_log!(LOGGER, Severity::Warn, "temp={}", t).await;
/// ```
#[macro_export]
macro_rules! file_log {
    ($logger:expr, $severity:expr, $($arg:tt)*) => {
        $logger.log(
            $crate::logger::Header {
                severity: $severity,
                file: file!(),
                func: $crate::function_name!(),
                line: line!(),
            },
            format_args!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! file_log_debug {
    ($logger:expr, $($arg:tt)*) => { $crate::file_log!($logger, $crate::logger::Severity::Debug, $($arg)*) };
}

#[macro_export]
macro_rules! file_log_info {
    ($logger:expr, $($arg:tt)*) => { $crate::file_log!($logger, $crate::logger::Severity::Info, $($arg)*) };
}

#[macro_export]
macro_rules! file_log_warn {
    ($logger:expr, $($arg:tt)*) => { $crate::file_log!($logger, $crate::logger::Severity::Warn, $($arg)*) };
}

#[macro_export]
macro_rules! file_log_error {
    ($logger:expr, $($arg:tt)*) => { $crate::file_log!($logger, $crate::logger::Severity::Error, $($arg)*) };
}
