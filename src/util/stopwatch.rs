//! 微秒秒表

use crate::time::uptime_us;

/// 微秒秒表，创建即开始计时
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stopwatch {
    start_us: u64,
    stop_us: u64,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::started_at(uptime_us())
    }

    pub const fn started_at(now_us: u64) -> Self {
        Self {
            start_us: now_us,
            stop_us: now_us,
        }
    }

    /// 重新开始，清除已捕获的时间
    #[inline]
    pub fn start(&mut self) {
        *self = Self::started_at(uptime_us());
    }

    #[inline]
    pub fn stop(&mut self) {
        self.stop_at(uptime_us());
    }

    pub fn stop_at(&mut self, now_us: u64) {
        self.stop_us = now_us;
    }

    /// 最近一次 start 与 stop 之间的微秒数
    #[inline]
    pub fn captured_us(&self) -> u64 {
        self.stop_us.saturating_sub(self.start_us)
    }

    /// 从 start 到现在的微秒数
    #[inline]
    pub fn elapsed_us(&self) -> u64 {
        uptime_us().saturating_sub(self.start_us)
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}
