//! 实时时钟
//!
//! 合并寄存器 CTIME0..2 可能在读取中途进位，所以连续读两次，
//! 不一致则重读。设置时间需先停止时钟、逐个写时间计数器再重新启动。
//!
//! - `alarm`: 基于秒中断的周期/定时闹钟

pub mod alarm;

use core::fmt;
use core::ops::RangeInclusive;

use crate::config::{RTC_VALID_YEAR_MAX, RTC_VALID_YEAR_MIN};
use crate::log_warn;

pub use alarm::{AlarmError, AlarmFrequency, AlarmHandle, AlarmTime, Alarms};

/// 有效年份范围
pub const VALID_YEARS: RangeInclusive<u16> = RTC_VALID_YEAR_MIN..=RTC_VALID_YEAR_MAX;

/// 分解后的日历时间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTime {
    pub sec: u8,
    pub min: u8,
    pub hour: u8,
    /// 星期 (0..=6)
    pub dow: u8,
    /// 日 (1..=31)
    pub day: u8,
    /// 月 (1..=12)
    pub month: u8,
    pub year: u16,
    /// 年内第几天 (1..=366)
    pub doy: u16,
}

impl DateTime {
    /// `year`-01-01 00:00:00
    pub const fn start_of(year: u16) -> Self {
        Self {
            sec: 0,
            min: 0,
            hour: 0,
            dow: 0,
            day: 1,
            month: 1,
            year,
            doy: 1,
        }
    }

    /// 各字段是否在合法范围内
    pub fn is_valid(&self, years: &RangeInclusive<u16>) -> bool {
        years.contains(&self.year)
            && self.sec < 60
            && self.min < 60
            && self.hour < 24
            && self.doy <= 366
            && (1..=12).contains(&self.month)
            && (1..=31).contains(&self.day)
    }

    /// 从 CTIME0..2 解码
    pub const fn from_consolidated(ctime: [u32; 3]) -> Self {
        let [t0, t1, t2] = ctime;
        Self {
            sec: (t0 & 0x3F) as u8,
            min: ((t0 >> 8) & 0x3F) as u8,
            hour: ((t0 >> 16) & 0x1F) as u8,
            dow: ((t0 >> 24) & 0x7) as u8,
            day: (t1 & 0x1F) as u8,
            month: ((t1 >> 8) & 0xF) as u8,
            year: ((t1 >> 16) & 0xFFF) as u16,
            doy: (t2 & 0xFFF) as u16,
        }
    }

    /// 编码为 CTIME0..2
    pub const fn to_consolidated(&self) -> [u32; 3] {
        [
            (self.sec as u32 & 0x3F)
                | ((self.min as u32 & 0x3F) << 8)
                | ((self.hour as u32 & 0x1F) << 16)
                | ((self.dow as u32 & 0x7) << 24),
            (self.day as u32 & 0x1F) | ((self.month as u32 & 0xF) << 8) | ((self.year as u32 & 0xFFF) << 16),
            self.doy as u32 & 0xFFF,
        ]
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}/{:02}/{} {:02}:{:02}:{:02}",
            self.month, self.day, self.year, self.hour, self.min, self.sec
        )
    }
}

/// RTC 寄存器接口
pub trait RtcHw {
    /// CTIME0..2
    fn read_consolidated(&self) -> [u32; 3];
    /// CCR.CLKEN
    fn enable_clock(&self, enabled: bool);
    /// 写 SEC..DOY 时间计数器
    fn write_counters(&self, time: &DateTime);
    /// CIIR 秒递增中断
    fn enable_second_interrupt(&self);
    /// ILR 清除递增中断
    fn clear_increment_interrupt(&self);
}

/// RTC 驱动
pub struct Rtc<H> {
    hw: H,
}

impl<H: RtcHw> Rtc<H> {
    pub const fn new(hw: H) -> Self {
        Self { hw }
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    /// 启动时钟并校验时间，无效时重置为有效年份起点
    ///
    /// 返回是否发生了重置
    pub fn init(&self) -> bool {
        self.hw.enable_clock(true);
        let now = self.now();
        if now.is_valid(&VALID_YEARS) {
            return false;
        }
        log_warn!("RTC time invalid, resetting to {}-01-01", RTC_VALID_YEAR_MIN);
        self.set_time(&DateTime::start_of(RTC_VALID_YEAR_MIN));
        true
    }

    /// 当前时间 (两次读取一致才返回)
    pub fn now(&self) -> DateTime {
        loop {
            let first = self.hw.read_consolidated();
            let second = self.hw.read_consolidated();
            if first == second {
                return DateTime::from_consolidated(first);
            }
        }
    }

    /// 设置时间
    pub fn set_time(&self, time: &DateTime) {
        self.hw.enable_clock(false);
        self.hw.write_counters(time);
        self.hw.enable_clock(true);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    /// 时间寄存器模型，`scripted` 中的值按顺序先被读出
    #[derive(Default)]
    pub struct MockRtc {
        pub ctime: Cell<[u32; 3]>,
        pub scripted: RefCell<VecDeque<[u32; 3]>>,
        pub running: Cell<bool>,
        pub second_irq: Cell<bool>,
        pub acks: Cell<u32>,
        pub writes: Cell<u32>,
    }

    impl MockRtc {
        pub fn at(time: DateTime) -> Self {
            let rtc = Self::default();
            rtc.ctime.set(time.to_consolidated());
            rtc
        }
    }

    impl RtcHw for MockRtc {
        fn read_consolidated(&self) -> [u32; 3] {
            self.scripted.borrow_mut().pop_front().unwrap_or(self.ctime.get())
        }

        fn enable_clock(&self, enabled: bool) {
            self.running.set(enabled);
        }

        fn write_counters(&self, time: &DateTime) {
            assert!(!self.running.get(), "counters written while clock running");
            self.writes.set(self.writes.get() + 1);
            self.ctime.set(time.to_consolidated());
        }

        fn enable_second_interrupt(&self) {
            self.second_irq.set(true);
        }

        fn clear_increment_interrupt(&self) {
            self.acks.set(self.acks.get() + 1);
        }
    }

    fn sample() -> DateTime {
        DateTime {
            sec: 59,
            min: 30,
            hour: 23,
            dow: 4,
            day: 31,
            month: 12,
            year: 2015,
            doy: 365,
        }
    }

    #[test]
    fn test_consolidated_layout() {
        let words = sample().to_consolidated();
        assert_eq!(words[0], 59 | (30 << 8) | (23 << 16) | (4 << 24));
        assert_eq!(words[1], 31 | (12 << 8) | (2015 << 16));
        assert_eq!(DateTime::from_consolidated(words), sample());
    }

    #[test]
    fn test_read_twice_until_stable() {
        let rtc = Rtc::new(MockRtc::at(sample()));
        let torn = DateTime { sec: 0, ..sample() }.to_consolidated();
        rtc.hw().scripted.borrow_mut().extend([torn, sample().to_consolidated()]);
        assert_eq!(rtc.now(), sample());
    }

    #[test]
    fn test_init_resets_invalid_time() {
        let bad = DateTime { year: 2003, ..sample() };
        let rtc = Rtc::new(MockRtc::at(bad));
        assert!(rtc.init());
        assert_eq!(rtc.now(), DateTime::start_of(RTC_VALID_YEAR_MIN));
        assert!(rtc.hw().running.get());

        let rtc = Rtc::new(MockRtc::at(sample()));
        assert!(!rtc.init());
        assert_eq!(rtc.hw().writes.get(), 0);
    }

    #[test]
    fn test_validity_rules() {
        assert!(sample().is_valid(&VALID_YEARS));
        assert!(!DateTime { sec: 60, ..sample() }.is_valid(&VALID_YEARS));
        assert!(!DateTime { hour: 24, ..sample() }.is_valid(&VALID_YEARS));
        assert!(!DateTime { month: 0, ..sample() }.is_valid(&VALID_YEARS));
        assert!(!DateTime { year: 2026, ..sample() }.is_valid(&VALID_YEARS));
    }
}
