//! Embassy 时间驱动
//!
//! `now()` 直接读取系统时间服务的 64 位微秒时钟；定时队列的最近到期时间
//! 写入 TIMER0 的 MR2 (通用定时事件)。服务在启动阶段通过 `attach` 接入，
//! 之前 `now()` 返回 0。

use core::cell::RefCell;
use core::task::Waker;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time_driver::Driver;
use embassy_time_queue_utils::Queue;

use crate::platform::lpc17xx::{Timer0, Wdt};
use crate::time::service::TimeService;
use crate::time::watchdog::Watchdog;
use crate::util::anchor::Anchor;

/// 板上的系统时间服务
pub type BoardTimeService = TimeService<Timer0, Watchdog<Wdt>>;

struct TimerDriver {
    service: Anchor<BoardTimeService>,
    queue: Mutex<CriticalSectionRawMutex, RefCell<Queue>>,
}

embassy_time_driver::time_driver_impl!(static DRIVER: TimerDriver = TimerDriver {
    service: Anchor::new(),
    queue: Mutex::new(RefCell::new(Queue::new())),
});

/// 接入系统时间服务并安装 MR2 回调
pub fn attach(service: &'static BoardTimeService) -> bool {
    if !DRIVER.service.set(service) {
        return false;
    }
    service.install_timed_event_handler(on_timed_event);
    true
}

/// 时间驱动是否已接入
#[inline]
pub fn attached() -> bool {
    DRIVER.service.get().is_some()
}

impl TimerDriver {
    /// 设置下一次唤醒，时间点已过返回 `false`
    fn set_alarm(&self, at: u64) -> bool {
        let Some(service) = self.service.get() else {
            return true;
        };
        if at == u64::MAX {
            service.cancel_timed_event();
            return true;
        }
        service.set_timed_event(at)
    }

    fn rearm(&self, queue: &mut Queue) {
        let mut next = queue.next_expiration(self.now());
        while !self.set_alarm(next) {
            next = queue.next_expiration(self.now());
        }
    }
}

impl Driver for TimerDriver {
    #[inline]
    fn now(&self) -> u64 {
        self.service.get().map_or(0, |service| service.uptime_us())
    }

    fn schedule_wake(&self, at: u64, waker: &Waker) {
        critical_section::with(|cs| {
            let mut queue = self.queue.borrow(cs).borrow_mut();
            if queue.schedule_wake(at, waker) {
                self.rearm(&mut queue);
            }
        });
    }
}

/// MR2 到期 (中断上下文)
fn on_timed_event() {
    critical_section::with(|cs| {
        let mut queue = DRIVER.queue.borrow(cs).borrow_mut();
        DRIVER.rearm(&mut queue);
    });
}
