//! SJOne BSP - LPC1758 板级支持与运行时基础
//!
//! 本库提供以下核心功能:
//! - 系统时间与看门狗服务 (64 位微秒时钟、后台钩子、看门狗喂狗)
//! - 启动与故障基础 (启动原因分类、故障现场保存、有序底层初始化)
//! - 中断驱动总线 (I2C 主机状态机、环形队列 UART 字符设备)
//! - 外部中断复用、RTC 周期/定时闹钟
//! - 异步缓冲文件日志
//! - 通用小工具 (软定时器、秒表、环形缓冲区、采样器)
//!
//! 调度由 Embassy 执行器承担；各组件通过 `platform` 中的硬件 trait 访问寄存器，
//! 因此核心算法可以在主机上测试。

#![cfg_attr(not(test), no_std)]

pub mod boot;
pub mod bus;
pub mod console;
pub mod eint;
pub mod fs;
pub mod logger;
pub mod mem;
pub mod platform;
pub mod rtc;
pub mod sync;
pub mod time;
pub mod util;

#[cfg(target_os = "none")]
pub mod tasks;

// ===== 重导出常用类型 =====
pub use sync::primitives::{Completion, CriticalChannel, CriticalMutex, CriticalSignal, SchedulerState};
pub use time::{delay_ms, delay_us, uptime_ms, uptime_us};

// ===== 版本信息 =====
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// 系统配置常量
pub mod config {
    // ===== 时钟 =====

    /// 期望 CPU 频率 (Hz)
    pub const DESIRED_CPU_CLK_HZ: u32 = 48_000_000;

    /// PLL 找不到期望频率时使用的默认 CPU 频率 (Hz)
    pub const DEFAULT_CPU_CLK_HZ: u32 = 24_000_000;

    /// 内部 RC 振荡器 (Hz)
    pub const INTERNAL_CLOCK_HZ: u32 = 4_000_000;

    /// 外部晶振 (Hz)
    pub const EXTERNAL_CLOCK_HZ: u32 = 12_000_000;

    /// RTC 晶振 (Hz)
    pub const RTC_CLOCK_HZ: u32 = 32_768;

    /// 系统 Tick 频率 (Hz) - TIMER0 与 Embassy 时间驱动均为 1MHz
    pub const TICK_FREQ_HZ: u32 = 1_000_000;

    // ===== 看门狗与系统定时器 =====

    /// 看门狗超时 (ms)，喂狗周期为其一半
    pub const WATCHDOG_TIMEOUT_MS: u32 = 3000;

    /// 后台钩子周期 (us)
    pub const BACKGROUND_PERIOD_US: u32 = 1000;

    // ===== 启动 =====

    /// 正常启动后的等待时间 (ms)
    pub const STARTUP_DELAY_MS: u32 = 2000;

    /// 崩溃恢复启动后的等待时间 (ms)，留时间阅读崩溃信息
    pub const CRASH_STARTUP_DELAY_MS: u32 = 5000;

    /// 致命错误提示后到重启的等待时间 (ms)
    pub const FATAL_REBOOT_DELAY_MS: u32 = 3000;

    /// 启动信息日志文件 (feature = "boot-log")
    pub const BOOT_LOG_FILENAME: &str = "0:boot.csv";

    // ===== 控制台 UART0 =====

    /// 控制台波特率
    pub const UART0_BPS: u32 = 38_400;

    /// 控制台发送队列容量
    pub const UART0_TXQ_SIZE: usize = 256;

    /// 控制台接收队列容量
    pub const UART0_RXQ_SIZE: usize = 32;

    /// 硬件 FIFO 深度
    pub const UART_FIFO_DEPTH: usize = 16;

    // ===== I2C2 =====

    /// I2C2 总线频率 (kHz)
    pub const I2C2_CLK_KHZ: u32 = 100;

    /// 总线事务超时 (ms)，同时覆盖互斥锁获取与事务完成
    pub const BUS_TIMEOUT_MS: u64 = 1000;

    // ===== RTC =====

    /// RTC 有效年份下限
    pub const RTC_VALID_YEAR_MIN: u16 = 2010;

    /// RTC 有效年份上限
    pub const RTC_VALID_YEAR_MAX: u16 = 2025;

    // ===== 文件日志 =====

    /// 聚合缓冲区大小 (字节)
    pub const LOGGER_BUFFER_SIZE: usize = 1024;

    /// 日志槽位数量
    pub const LOGGER_NUM_BUFFERS: usize = 10;

    /// 单条日志最大长度 (含换行)
    pub const LOGGER_MSG_MAX_LEN: usize = 150;

    /// 日志文件
    pub const LOGGER_FILENAME: &str = "0:log.csv";

    /// 无新日志时的自动刷写周期 (s)
    pub const LOGGER_FLUSH_TIME_SEC: u64 = 60;

    /// 生产者等待空闲槽位的短阻塞时间 (ms)，超时后计数并无限等待
    pub const LOGGER_BLOCK_TIME_MS: u64 = 10;

    /// 默认回显到控制台的日志级别掩码 (仅 debug)
    pub const LOGGER_DEFAULT_PRINTF_MASK: u8 = 1 << 0;

    // ===== 外部中断 =====

    /// 每个 (端口, 边沿) 链表的最大回调数
    pub const EINT_MAX_CALLBACKS: usize = 8;

    // ===== 闹钟 =====

    /// 每个频率桶的最大信号数
    pub const ALARM_MAX_RECURRING: usize = 8;

    /// 最大墙钟闹钟数
    pub const ALARM_MAX_TIMED: usize = 8;
}
