//! 软件定时器
//!
//! 绝对到期时间 + 间隔，均以毫秒计。不占用任何硬件，只在查询时比较
//! 系统时钟。间隔为 0 表示停止，停止状态下 `expired()` 恒为 `false`。
//!
//! 每个查询都有一个 `_at(now_ms)` 形式，便于在已知时间点上计算。

use crate::time::uptime_ms;

/// 毫秒级软件定时器
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftTimer {
    target_ms: u64,
    interval_ms: u64,
}

impl SoftTimer {
    /// 停止状态的定时器
    pub const fn new() -> Self {
        Self {
            target_ms: 0,
            interval_ms: 0,
        }
    }

    /// 创建并立即以 `ms` 间隔启动
    pub fn start_new(ms: u64) -> Self {
        let mut timer = Self::new();
        timer.reset_with(ms);
        timer
    }

    #[inline]
    pub fn expired(&self) -> bool {
        self.expired_at(uptime_ms())
    }

    pub fn expired_at(&self, now_ms: u64) -> bool {
        self.is_running() && now_ms >= self.target_ms
    }

    /// 到期时间后移一个间隔，保持相位
    ///
    /// 周期性任务用它代替 `reset()`，避免处理耗时累积成漂移。
    #[inline]
    pub fn restart(&mut self) {
        self.target_ms = self.target_ms.saturating_add(self.interval_ms);
    }

    /// 以新的间隔从现在开始计时
    #[inline]
    pub fn reset_with(&mut self, ms: u64) {
        self.reset_with_at(ms, uptime_ms());
    }

    pub fn reset_with_at(&mut self, ms: u64, now_ms: u64) {
        self.interval_ms = ms;
        self.target_ms = now_ms.saturating_add(ms);
    }

    /// 沿用原间隔从现在开始计时
    #[inline]
    pub fn reset(&mut self) {
        self.reset_at(uptime_ms());
    }

    pub fn reset_at(&mut self, now_ms: u64) {
        self.target_ms = now_ms.saturating_add(self.interval_ms);
    }

    pub fn stop(&mut self) {
        self.target_ms = 0;
        self.interval_ms = 0;
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.interval_ms > 0
    }

    /// 当前间隔 (ms)
    #[inline]
    pub fn interval(&self) -> u64 {
        self.interval_ms
    }

    /// 绝对到期时间 (相对开机, ms)
    #[inline]
    pub fn target(&self) -> u64 {
        self.target_ms
    }

    #[inline]
    pub fn time_to_expiration(&self) -> u64 {
        self.time_to_expiration_at(uptime_ms())
    }

    /// 距到期还剩多少毫秒，已到期为 0
    pub fn time_to_expiration_at(&self, now_ms: u64) -> u64 {
        self.target_ms.saturating_sub(now_ms)
    }

    #[inline]
    pub fn time_since_expiration(&self) -> u64 {
        self.time_since_expiration_at(uptime_ms())
    }

    /// 已超过到期时间多少毫秒，未到期为 0
    pub fn time_since_expiration_at(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.target_ms)
    }
}
