//! 启动基础
//!
//! `low_level_init` 是唯一入口，严格按以下顺序执行，任何一步失败都是致命的:
//!
//! 1. 启动 RTC，记录启动时间
//! 2. 选择并配置 CPU 时钟 (PLL0)
//! 3. 按 CPU 频率设置 Flash 等待周期
//! 4. 分配中断优先级
//! 5. 初始化控制台 UART 并安装为输出端
//! 6. 使能看门狗 (调试构建只中断，发布构建复位)
//! 7. 分类启动原因，发布并打印横幅
//!
//! - `cause`: 复位源分类
//! - `fault`: 备份寄存器中的故障现场
//! - `clock`: PLL 搜索与 Flash 配置
//! - `priority`: 中断优先级策略
//! - `fatal`: 致命错误钩子
//! - `bootlog`: 启动信息文件

pub mod bootlog;
pub mod cause;
pub mod clock;
pub mod fatal;
pub mod fault;
pub mod priority;

use core::fmt;

use crate::config;
use crate::platform::lpc17xx::Interrupt;
use crate::rtc::DateTime;
use crate::time::watchdog::WatchdogMode;

pub use cause::{boot_cause, BootCause, PublishedCause, BOOT_CAUSE};
pub use clock::{ClockHw, ClockPlan, ClockSource, PllConfig};
pub use fault::{BackupRegisters, CrashReport, FaultRecord, FAULT_SENTINEL};
pub use priority::{may_use_kernel_from_isr, SystemHandler, SYSCALL_PRIORITY};

/// 启动错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// 振荡器或 PLL 未在限定时间内就绪
    ClockTimeout,
    /// 控制台初始化失败或已安装
    Console,
    /// 启动原因已经发布过 (重复初始化)
    AlreadyBooted,
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClockTimeout => f.write_str("clock did not lock"),
            Self::Console => f.write_str("console init failed"),
            Self::AlreadyBooted => f.write_str("boot cause already published"),
        }
    }
}

/// 启动阶段使用的板级操作
pub trait BootPlatform {
    type Clock: ClockHw;
    type Backup: BackupRegisters;

    fn clock(&self) -> &Self::Clock;
    fn backup(&self) -> &Self::Backup;

    /// 启动 RTC (必要时校正时间) 并返回当前时间
    fn start_rtc(&self) -> DateTime;

    fn set_system_priority(&self, handler: SystemHandler, priority: u8);
    fn set_irq_priority(&self, irq: Interrupt, priority: u8);

    /// 初始化控制台 UART 并安装为唯一输出端
    fn init_console(&self, cpu_hz: u32, bps: u32) -> bool;

    fn enable_watchdog(&self, timeout_ms: u32, mode: WatchdogMode);

    /// RSID
    fn reset_source(&self) -> u32;
    /// 写 1 清除 RSID 位
    fn clear_reset_source(&self, bits: u32);

    /// 控制台输出
    fn print(&self, args: fmt::Arguments<'_>);
    fn delay_ms(&self, ms: u32);
}

/// 启动参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    pub source: ClockSource,
    pub input_hz: u32,
    pub desired_cpu_hz: u32,
    pub default_cpu_hz: u32,
    pub internal_hz: u32,
    pub console_bps: u32,
    pub watchdog_timeout_ms: u32,
    pub watchdog_mode: WatchdogMode,
    pub startup_delay_ms: u32,
    pub crash_startup_delay_ms: u32,
}

impl BootConfig {
    /// 板级默认配置
    pub const fn board() -> Self {
        Self {
            source: ClockSource::External,
            input_hz: config::EXTERNAL_CLOCK_HZ,
            desired_cpu_hz: config::DESIRED_CPU_CLK_HZ,
            default_cpu_hz: config::DEFAULT_CPU_CLK_HZ,
            internal_hz: config::INTERNAL_CLOCK_HZ,
            console_bps: config::UART0_BPS,
            watchdog_timeout_ms: config::WATCHDOG_TIMEOUT_MS,
            watchdog_mode: WatchdogMode::for_build(),
            startup_delay_ms: config::STARTUP_DELAY_MS,
            crash_startup_delay_ms: config::CRASH_STARTUP_DELAY_MS,
        }
    }
}

impl Default for BootConfig {
    fn default() -> Self {
        Self::board()
    }
}

/// 启动结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootReport {
    pub cause: BootCause,
    pub boot_time: DateTime,
    pub clock: ClockPlan,
    /// 崩溃恢复时保存的现场
    pub fault: Option<FaultRecord>,
}

/// 底层初始化
pub fn low_level_init<P: BootPlatform>(
    platform: &P,
    published: &PublishedCause,
    cfg: &BootConfig,
) -> Result<BootReport, BootError> {
    if published.get().is_some() {
        return Err(BootError::AlreadyBooted);
    }

    // 1. RTC
    let boot_time = platform.start_rtc();

    // 2. 时钟
    let plan = clock::plan(
        cfg.source,
        cfg.input_hz,
        cfg.desired_cpu_hz,
        cfg.default_cpu_hz,
        cfg.internal_hz,
    );
    clock::apply(platform.clock(), &plan)?;
    crate::time::set_core_clock(plan.cpu_hz);

    // 3. Flash
    platform.clock().set_flash_config(clock::flash_config(plan.cpu_hz));

    // 4. 中断优先级
    for handler in SystemHandler::ALL {
        platform.set_system_priority(handler, priority::system_priority(handler));
    }
    for irq in Interrupt::ALL {
        platform.set_irq_priority(irq, priority::priority_of(irq));
    }

    // 5. 控制台
    if !platform.init_console(plan.cpu_hz, cfg.console_bps) {
        return Err(BootError::Console);
    }

    // 6. 看门狗
    platform.enable_watchdog(cfg.watchdog_timeout_ms, cfg.watchdog_mode);

    // 7. 启动原因
    let classified = cause::classify(platform.reset_source(), platform.backup());
    if classified.clear != 0 {
        platform.clear_reset_source(classified.clear);
    }
    if !published.publish(classified.cause) {
        return Err(BootError::AlreadyBooted);
    }
    if let Some(banner) = classified.cause.banner() {
        platform.print(format_args!("{}\n", banner));
    }

    let fault = classified
        .cause
        .is_crash()
        .then(|| FaultRecord::load(platform.backup()));

    Ok(BootReport {
        cause: classified.cause,
        boot_time,
        clock: plan,
        fault,
    })
}

/// 打印 CPU 频率与崩溃报告，然后等待启动延时
pub fn announce<P: BootPlatform>(platform: &P, report: &BootReport, cfg: &BootConfig) {
    platform.print(format_args!("{}\n", fault::SEPARATOR));
    platform.print(format_args!("System Boot @ {}\n", report.clock));
    match &report.fault {
        Some(record) => {
            platform.print(format_args!("{}", CrashReport(record)));
            platform.delay_ms(cfg.crash_startup_delay_ms);
        }
        None => platform.delay_ms(cfg.startup_delay_ms),
    }
}
