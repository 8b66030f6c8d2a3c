//! 系统时间模块
//!
//! - `service`: 基于 TIMER0 的 64 位微秒时钟、后台钩子、看门狗喂狗、MR2 定时事件
//! - `watchdog`: 看门狗驱动
//! - `driver`: Embassy 时间驱动 (仅目标板)
//!
//! 全局时间查询统一走 `embassy_time::Instant`：目标板上它由 `driver` 接到
//! TIMER0，主机测试中由 embassy-time 的 std 驱动提供。两者 tick 均为 1MHz。
//!
//! 目标板上时间驱动接入之前 `Instant::now()` 恒为 0，此时忙等待改为按
//! 当前 CPU 频率数周期。

pub mod service;
pub mod watchdog;

#[cfg(target_os = "none")]
pub mod driver;

pub use service::{
    BackgroundHook, HookControl, MatchChannel, SystemTimerHw, TimeService, TimerEvents,
    UnexpectedCause, WatchdogFeed,
};
pub use watchdog::{Watchdog, WatchdogHw, WatchdogMode};

use embassy_time::{Duration, Instant, Timer};
use portable_atomic::{AtomicU32, Ordering};

use crate::config;

/// 当前 CPU 频率，复位后为内部 RC
static CORE_HZ: AtomicU32 = AtomicU32::new(config::INTERNAL_CLOCK_HZ);

/// 时钟切换后登记新的 CPU 频率
#[inline]
pub fn set_core_clock(hz: u32) {
    CORE_HZ.store(hz, Ordering::Relaxed);
}

#[inline]
pub fn core_clock() -> u32 {
    CORE_HZ.load(Ordering::Relaxed)
}

/// `us` 微秒对应的 CPU 周期数
pub const fn cycles_for(us: u32, cpu_hz: u32) -> u32 {
    let cycles = us as u64 * cpu_hz as u64 / 1_000_000;
    if cycles > u32::MAX as u64 {
        u32::MAX
    } else {
        cycles as u32
    }
}

#[cfg(target_os = "none")]
#[inline]
fn clock_running() -> bool {
    driver::attached()
}

#[cfg(not(target_os = "none"))]
#[inline]
fn clock_running() -> bool {
    true
}

/// 开机以来的微秒数 (单调，不会挂起)
#[inline]
pub fn uptime_us() -> u64 {
    Instant::now().as_micros()
}

/// 开机以来的毫秒数
#[inline]
pub fn uptime_ms() -> u64 {
    Instant::now().as_millis()
}

/// 忙等待指定微秒 (任何上下文可用)
pub fn delay_us(us: u32) {
    if !clock_running() {
        spin_cycles(cycles_for(us, core_clock()));
        return;
    }
    let target = uptime_us() + u64::from(us);
    while uptime_us() < target {
        core::hint::spin_loop();
    }
}

/// 忙等待指定毫秒 (任何上下文可用)
pub fn delay_ms(ms: u32) {
    delay_us(ms.saturating_mul(1000));
}

#[cfg(target_os = "none")]
#[inline]
fn spin_cycles(cycles: u32) {
    cortex_m::asm::delay(cycles);
}

#[cfg(not(target_os = "none"))]
fn spin_cycles(cycles: u32) {
    for _ in 0..cycles {
        core::hint::spin_loop();
    }
}

/// 任务上下文睡眠，让出执行器
pub async fn sleep_ms(ms: u64) {
    Timer::after(Duration::from_millis(ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_us_waits_at_least() {
        let start = uptime_us();
        delay_us(2000);
        assert!(uptime_us() - start >= 2000);
    }

    #[test]
    fn test_cycle_count_for_polled_delay() {
        assert_eq!(cycles_for(1000, 4_000_000), 4000);
        assert_eq!(cycles_for(3_000_000, 48_000_000), 144_000_000);
        assert_eq!(cycles_for(u32::MAX, 100_000_000), u32::MAX);
    }

    #[test]
    fn test_uptime_non_decreasing() {
        let mut last = uptime_us();
        for _ in 0..1000 {
            let now = uptime_us();
            assert!(now >= last);
            last = now;
        }
    }
}
