//! 同步原语封装
//!
//! 基于 embassy-sync 提供的同步原语，统一使用 CriticalSectionRawMutex，
//! 中断与任务之间共享时由临界区保证正确性 (LPC1758 单核)。
//!
//! 除类型别名外还提供:
//! - `Completion`: 中断置位、任务带超时等待的一次性完成信号
//! - `SchedulerState`: "调度器已运行" 单向锁存
//! - `AtomicFlag` / `AtomicCounter` / `Watermark`: 轻量原子状态

use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    channel::Channel,
    mutex::Mutex,
    signal::Signal,
};
use embassy_time::{with_timeout, Duration};

// ===== 类型别名: 简化使用 =====

/// 临界区信号量 - 用于任务间单值通知
///
/// 发送方可以发送一个值，接收方异步等待，多次发送只保留最后一个值
pub type CriticalSignal<T> = Signal<CriticalSectionRawMutex, T>;

/// 临界区通道 - 固定容量 MPMC 队列
///
/// 中断中使用 `try_send` / `try_receive`，任务中使用异步 `send` / `receive`
///
/// # Example
/// ```ignore
/// static RX: CriticalChannel<u8, 32> = CriticalChannel::new();
///
/// // 中断
/// let _ = RX.try_send(byte);
///
/// // 任务 (带超时)
/// let byte = with_timeout(Duration::from_millis(10), RX.receive()).await;
/// ```
pub type CriticalChannel<T, const N: usize> = Channel<CriticalSectionRawMutex, T, N>;

/// 临界区互斥锁 - 异步互斥访问
pub type CriticalMutex<T> = Mutex<CriticalSectionRawMutex, T>;

// ===== 超时 =====

/// 可选超时: `None` 表示无限等待
pub type Timeout = Option<Duration>;

/// 带可选超时执行一个 future，超时返回 `None`
pub async fn maybe_timeout<F: core::future::Future>(timeout: Timeout, fut: F) -> Option<F::Output> {
    match timeout {
        Some(limit) => with_timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

// ===== 完成信号 =====

/// 完成信号 - 中断中一次性置位，任务中带超时等待
///
/// 取代 "从中断 give 信号量 / 任务 take" 的组合:
/// - `complete()`: 可在中断中调用
/// - `reset()`: 发起新事务前清除遗留的完成状态
/// - `wait()`: 异步等待，超时返回 `false`
/// - `is_complete()`: 轮询模式下检查 (不消费)
pub struct Completion {
    signal: CriticalSignal<()>,
}

impl Completion {
    pub const fn new() -> Self {
        Self {
            signal: Signal::new(),
        }
    }

    /// 置位 (中断安全)
    #[inline]
    pub fn complete(&self) {
        self.signal.signal(());
    }

    /// 清除遗留状态
    #[inline]
    pub fn reset(&self) {
        self.signal.reset();
    }

    /// 是否已置位 (不消费)
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.signal.signaled()
    }

    /// 等待完成，消费置位状态
    ///
    /// # Returns
    /// - `true`: 在超时之前完成
    /// - `false`: 超时
    pub async fn wait(&self, timeout: Timeout) -> bool {
        maybe_timeout(timeout, self.signal.wait()).await.is_some()
    }

    /// 非阻塞消费
    #[inline]
    pub fn take(&self) -> bool {
        self.signal.try_take().is_some()
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

// ===== 调度器状态 =====

/// "调度器已运行" 单向锁存
///
/// 启动阶段 (调度器启动前) 各驱动使用轮询路径；第一个任务运行后
/// 调用 `mark_running()`，之后永不复位。
pub struct SchedulerState {
    running: AtomicFlag,
}

impl SchedulerState {
    pub const fn new() -> Self {
        Self {
            running: AtomicFlag::new(),
        }
    }

    /// 标记调度器已运行 (只能由第一个任务调用)
    #[inline]
    pub fn mark_running(&self) {
        self.running.set();
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.is_set()
    }
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

/// 全局调度器状态
pub static SCHEDULER: SchedulerState = SchedulerState::new();

// ===== 优化的原子操作封装 =====

use portable_atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// 原子标志 - 最快的任务间通知
///
/// 比 Signal 更轻量，适用于简单的布尔状态通知
pub struct AtomicFlag {
    flag: AtomicBool,
}

impl AtomicFlag {
    /// 创建新的原子标志
    pub const fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    /// 设置标志
    #[inline(always)]
    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// 检查并设置标志 (test-and-set)，返回之前的值
    ///
    /// 用于只允许发生一次的状态转换
    #[inline(always)]
    pub fn test_and_set(&self) -> bool {
        self.flag.swap(true, Ordering::AcqRel)
    }

    /// 检查标志 (不清除)
    #[inline(always)]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// 原子计数器 - 用于统计 (只增不减)
pub struct AtomicCounter {
    count: AtomicU64,
}

impl AtomicCounter {
    /// 创建新的计数器
    pub const fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
        }
    }

    /// 增加并返回新值
    #[inline(always)]
    pub fn increment(&self) -> u64 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// 获取当前值
    #[inline(always)]
    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// 水位线 - 单调不减的最大值记录
///
/// 只用于遥测，从不复位
pub struct Watermark {
    value: AtomicU32,
}

impl Watermark {
    pub const fn new() -> Self {
        Self {
            value: AtomicU32::new(0),
        }
    }

    /// 记录一次观测值，返回新的水位线
    #[inline(always)]
    pub fn observe(&self, value: u32) -> u32 {
        self.value.fetch_max(value, Ordering::Relaxed).max(value)
    }

    #[inline(always)]
    pub fn get(&self) -> u32 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for AtomicFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::new()
    }
}
