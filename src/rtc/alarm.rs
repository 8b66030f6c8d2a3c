//! 周期与定时闹钟
//!
//! RTC 每秒中断一次。每秒触发 `EverySecond` 表中的所有信号，秒为 0 时
//! 再触发每分钟表，依次级联到每小时、每天。之后遍历定时闹钟表，
//! 时分秒与当前时间一致的触发。
//!
//! 周期表只追加；定时闹钟通过把小时改为 25 关闭。第一个闹钟创建时
//! 打开 RTC 秒中断。

use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use heapless::Vec;
use portable_atomic::{AtomicBool, Ordering};

use super::{DateTime, Rtc, RtcHw};
use crate::config::{ALARM_MAX_RECURRING, ALARM_MAX_TIMED};
use crate::sync::primitives::Completion;

/// 关闭闹钟时写入的小时值
pub const ALARM_OFF_HOUR: u8 = 25;

/// 周期闹钟频率
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlarmFrequency {
    EverySecond = 0,
    EveryMinute = 1,
    EveryHour = 2,
    EveryDay = 3,
}

/// 闹钟时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmTime {
    pub hour: u8,
    pub min: u8,
    pub sec: u8,
}

impl AlarmTime {
    pub const fn new(hour: u8, min: u8, sec: u8) -> Self {
        Self { hour, min, sec }
    }

    fn matches(&self, now: &DateTime) -> bool {
        self.hour == now.hour && self.min == now.min && self.sec == now.sec
    }
}

/// 定时闹钟句柄，可用于修改或关闭
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmHandle(usize);

/// 闹钟错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmError {
    /// 表已满
    Full,
    /// 无效句柄
    InvalidHandle,
}

impl fmt::Display for AlarmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "Alarm table full"),
            Self::InvalidHandle => write!(f, "Invalid alarm handle"),
        }
    }
}

struct TimedAlarm {
    time: AlarmTime,
    signal: &'static Completion,
}

type Signals = Vec<&'static Completion, ALARM_MAX_RECURRING>;

/// 闹钟服务
pub struct Alarms<'r, H> {
    rtc: &'r Rtc<H>,
    recurring: Mutex<RefCell<[Signals; 4]>>,
    timed: Mutex<RefCell<Vec<TimedAlarm, ALARM_MAX_TIMED>>>,
    irq_enabled: AtomicBool,
}

impl<'r, H: RtcHw> Alarms<'r, H> {
    pub const fn new(rtc: &'r Rtc<H>) -> Self {
        Self {
            rtc,
            recurring: Mutex::new(RefCell::new([Vec::new(), Vec::new(), Vec::new(), Vec::new()])),
            timed: Mutex::new(RefCell::new(Vec::new())),
            irq_enabled: AtomicBool::new(false),
        }
    }

    fn ensure_interrupt(&self) {
        if !self.irq_enabled.swap(true, Ordering::AcqRel) {
            self.rtc.hw().enable_second_interrupt();
        }
    }

    /// 追加周期闹钟
    pub fn create_recurring(&self, freq: AlarmFrequency, signal: &'static Completion) -> Result<(), AlarmError> {
        critical_section::with(|cs| {
            self.recurring.borrow_ref_mut(cs)[freq as usize]
                .push(signal)
                .map_err(|_| AlarmError::Full)
        })?;
        self.ensure_interrupt();
        Ok(())
    }

    /// 创建定时闹钟
    pub fn create(&self, time: AlarmTime, signal: &'static Completion) -> Result<AlarmHandle, AlarmError> {
        let index = critical_section::with(|cs| {
            let mut timed = self.timed.borrow_ref_mut(cs);
            timed
                .push(TimedAlarm { time, signal })
                .map_err(|_| AlarmError::Full)?;
            Ok(timed.len() - 1)
        })?;
        self.ensure_interrupt();
        Ok(AlarmHandle(index))
    }

    /// 修改目标时间
    pub fn set(&self, handle: AlarmHandle, time: AlarmTime) -> Result<(), AlarmError> {
        critical_section::with(|cs| {
            let mut timed = self.timed.borrow_ref_mut(cs);
            let alarm = timed.get_mut(handle.0).ok_or(AlarmError::InvalidHandle)?;
            alarm.time = time;
            Ok(())
        })
    }

    /// 关闭 (小时置为 25)
    pub fn off(&self, handle: AlarmHandle) -> Result<(), AlarmError> {
        critical_section::with(|cs| {
            let mut timed = self.timed.borrow_ref_mut(cs);
            let alarm = timed.get_mut(handle.0).ok_or(AlarmError::InvalidHandle)?;
            alarm.time.hour = ALARM_OFF_HOUR;
            Ok(())
        })
    }

    /// 当前目标时间
    pub fn time(&self, handle: AlarmHandle) -> Option<AlarmTime> {
        critical_section::with(|cs| self.timed.borrow_ref(cs).get(handle.0).map(|a| a.time))
    }

    /// RTC 中断处理
    pub fn on_interrupt(&self) {
        self.rtc.hw().clear_increment_interrupt();
        let now = self.rtc.now();
        self.on_tick(&now);
    }

    /// 按当前时间派发
    pub fn on_tick(&self, now: &DateTime) {
        critical_section::with(|cs| {
            let recurring = self.recurring.borrow_ref(cs);
            let cascade = [true, now.sec == 0, now.sec == 0 && now.min == 0, now.sec == 0 && now.min == 0 && now.hour == 0];
            for (signals, fire) in recurring.iter().zip(cascade) {
                if !fire {
                    break;
                }
                for signal in signals {
                    signal.complete();
                }
            }

            for alarm in self.timed.borrow_ref(cs).iter() {
                if alarm.time.matches(now) {
                    alarm.signal.complete();
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtc::tests::MockRtc;

    fn at(hour: u8, min: u8, sec: u8) -> DateTime {
        DateTime {
            hour,
            min,
            sec,
            ..DateTime::start_of(2015)
        }
    }

    #[test]
    fn test_midnight_triggers_all_buckets() {
        static SIGNALS: [Completion; 4] = [Completion::new(), Completion::new(), Completion::new(), Completion::new()];
        let rtc = Rtc::new(MockRtc::default());
        let alarms = Alarms::new(&rtc);
        alarms.create_recurring(AlarmFrequency::EverySecond, &SIGNALS[0]).unwrap();
        alarms.create_recurring(AlarmFrequency::EveryMinute, &SIGNALS[1]).unwrap();
        alarms.create_recurring(AlarmFrequency::EveryHour, &SIGNALS[2]).unwrap();
        alarms.create_recurring(AlarmFrequency::EveryDay, &SIGNALS[3]).unwrap();
        assert!(rtc.hw().second_irq.get());

        alarms.on_tick(&at(0, 0, 0));
        assert!(SIGNALS.iter().all(|s| s.take()));

        alarms.on_tick(&at(0, 0, 1));
        assert!(SIGNALS[0].take());
        assert!(!SIGNALS[1].take() && !SIGNALS[2].take() && !SIGNALS[3].take());

        alarms.on_tick(&at(13, 0, 0));
        assert!(SIGNALS[0].take() && SIGNALS[1].take() && SIGNALS[2].take());
        assert!(!SIGNALS[3].take());
    }

    #[test]
    fn test_timed_alarm_edit_and_off() {
        static WAKE: Completion = Completion::new();
        let rtc = Rtc::new(MockRtc::default());
        let alarms = Alarms::new(&rtc);
        let handle = alarms.create(AlarmTime::new(12, 30, 15), &WAKE).unwrap();

        alarms.on_tick(&at(12, 30, 14));
        assert!(!WAKE.take());
        alarms.on_tick(&at(12, 30, 15));
        assert!(WAKE.take());

        alarms.set(handle, AlarmTime::new(7, 0, 0)).unwrap();
        alarms.on_tick(&at(7, 0, 0));
        assert!(WAKE.take());

        alarms.off(handle).unwrap();
        assert_eq!(alarms.time(handle).map(|t| t.hour), Some(ALARM_OFF_HOUR));
        alarms.on_tick(&at(7, 0, 0));
        assert!(!WAKE.take());
        assert_eq!(alarms.off(AlarmHandle(5)), Err(AlarmError::InvalidHandle));
    }

    #[test]
    fn test_interrupt_reads_rtc_and_acks() {
        static TICK: Completion = Completion::new();
        let rtc = Rtc::new(MockRtc::at(at(9, 15, 42)));
        let alarms = Alarms::new(&rtc);
        alarms.create(AlarmTime::new(9, 15, 42), &TICK).unwrap();
        alarms.on_interrupt();
        assert_eq!(rtc.hw().acks.get(), 1);
        assert!(TICK.take());
    }
}
