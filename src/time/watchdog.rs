//! 硬件看门狗
//!
//! 看门狗时钟为内部 RC 4MHz / 4 = 1MHz，因此超时常数 `WDTC = timeout_ms * 1000`。
//! 喂狗序列 `0xAA, 0x55` 中间不能插入其他看门狗寄存器访问，所以在临界区内写入；
//! 反过来，`0xAA` 之后立即写其他看门狗寄存器会触发立即复位，`reboot()` 正是利用这一点。

use crate::time::service::WatchdogFeed;

/// WDMOD 位
pub mod mode_bits {
    /// 使能
    pub const WDEN: u32 = 1 << 0;
    /// 超时复位
    pub const WDRESET: u32 = 1 << 1;
}

/// 喂狗序列
pub const FEED_SEQUENCE: [u32; 2] = [0xAA, 0x55];

/// 看门狗工作模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogMode {
    /// 超时只产生中断 (调试构建，避免调试器断点时被复位)
    InterruptOnly,
    /// 超时复位 (发布构建)
    Reset,
}

impl WatchdogMode {
    /// 按构建类型选择
    pub const fn for_build() -> Self {
        if cfg!(debug_assertions) {
            Self::InterruptOnly
        } else {
            Self::Reset
        }
    }

    const fn bits(self) -> u32 {
        match self {
            Self::InterruptOnly => mode_bits::WDEN,
            Self::Reset => mode_bits::WDEN | mode_bits::WDRESET,
        }
    }
}

/// 看门狗寄存器接口
pub trait WatchdogHw {
    /// WDMOD
    fn write_mode(&self, bits: u32);
    /// WDTC
    fn write_constant(&self, ticks: u32);
    /// WDFEED
    fn write_feed(&self, value: u32);
}

/// 看门狗驱动
pub struct Watchdog<H> {
    hw: H,
}

impl<H: WatchdogHw> Watchdog<H> {
    pub const fn new(hw: H) -> Self {
        Self { hw }
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    /// 使能看门狗并立即喂狗一次 (模式与超时在第一次喂狗后生效)
    pub fn enable(&self, timeout_ms: u32, mode: WatchdogMode) {
        self.hw.write_constant(timeout_ms.saturating_mul(1000));
        self.hw.write_mode(mode.bits());
        self.feed();
    }

    /// 发出复位请求 (不返回等待部分见 `reboot`)
    pub fn trigger_reset(&self) {
        critical_section::with(|_| {
            self.hw.write_feed(FEED_SEQUENCE[0]);
            self.hw.write_mode(0);
        });
    }

    /// 立即复位系统
    pub fn reboot(&self) -> ! {
        self.trigger_reset();
        loop {
            core::hint::spin_loop();
        }
    }
}

impl<H: WatchdogHw> WatchdogFeed for Watchdog<H> {
    #[inline]
    fn feed(&self) {
        critical_section::with(|_| {
            for value in FEED_SEQUENCE {
                self.hw.write_feed(value);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::vec::Vec;

    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    enum Write {
        Mode(u32),
        Constant(u32),
        Feed(u32),
    }

    #[derive(Default)]
    struct Recorder {
        writes: RefCell<Vec<Write>>,
    }

    impl WatchdogHw for Recorder {
        fn write_mode(&self, bits: u32) {
            self.writes.borrow_mut().push(Write::Mode(bits));
        }
        fn write_constant(&self, ticks: u32) {
            self.writes.borrow_mut().push(Write::Constant(ticks));
        }
        fn write_feed(&self, value: u32) {
            self.writes.borrow_mut().push(Write::Feed(value));
        }
    }

    #[test]
    fn test_enable_sequence() {
        let wdt = Watchdog::new(Recorder::default());
        wdt.enable(3000, WatchdogMode::Reset);
        assert_eq!(
            wdt.hw().writes.borrow().as_slice(),
            &[
                Write::Constant(3_000_000),
                Write::Mode(mode_bits::WDEN | mode_bits::WDRESET),
                Write::Feed(0xAA),
                Write::Feed(0x55),
            ]
        );
    }

    #[test]
    fn test_reset_is_broken_feed() {
        let wdt = Watchdog::new(Recorder::default());
        wdt.trigger_reset();
        assert_eq!(
            wdt.hw().writes.borrow().as_slice(),
            &[Write::Feed(0xAA), Write::Mode(0)]
        );
    }

    #[test]
    fn test_interrupt_only_mode_never_resets() {
        assert_eq!(WatchdogMode::InterruptOnly.bits() & mode_bits::WDRESET, 0);
    }
}
