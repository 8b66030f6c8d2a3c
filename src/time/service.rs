//! 系统时间与看门狗服务
//!
//! 基于 1MHz 自由运行的 32 位硬件定时器 (TIMER0)，四个匹配寄存器分工:
//!
//! | 通道 | 用途 |
//! |------|------|
//! | MR0 | `u32::MAX`，溢出计数 (16 位) |
//! | MR1 | 后台钩子，周期 1ms，调度器运行后解除 |
//! | MR2 | 通用定时事件 (目标板上驱动 Embassy 时间队列) |
//! | MR3 | 看门狗喂狗，周期为看门狗超时的一半 |
//!
//! 该中断优先级高于内核，任务死锁也无法阻止喂狗；出现未知中断原因时
//! 由中断向量死循环，交给看门狗复位。

use core::cell::Cell;
use core::fmt;

use critical_section::Mutex;
use portable_atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};

use crate::sync::primitives::{Completion, SchedulerState, Timeout};

/// 中断标志位 (IR 寄存器)
pub mod cause {
    pub const MR0: u32 = 1 << 0;
    pub const MR1: u32 = 1 << 1;
    pub const MR2: u32 = 1 << 2;
    pub const MR3: u32 = 1 << 3;
    pub const CR0: u32 = 1 << 4;

    /// 本服务会处理的全部原因
    pub const KNOWN: u32 = MR0 | MR1 | MR2 | MR3 | CR0;
}

/// 匹配通道
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MatchChannel {
    /// MR0: 溢出
    Overflow = 0,
    /// MR1: 后台钩子
    Background = 1,
    /// MR2: 通用定时事件
    TimedEvent = 2,
    /// MR3: 喂狗
    Watchdog = 3,
}

/// 系统定时器硬件接口
pub trait SystemTimerHw {
    /// 当前计数值 (TC)
    fn counter(&self) -> u32;

    /// 挂起的中断原因 (IR)
    fn pending(&self) -> u32;

    /// 写 1 清除中断原因
    fn acknowledge(&self, causes: u32);

    /// 设置匹配值
    fn set_match(&self, channel: MatchChannel, value: u32);

    /// 读取匹配值
    fn match_value(&self, channel: MatchChannel) -> u32;

    /// 使能/禁止匹配中断 (MCR)
    fn set_match_interrupt(&self, channel: MatchChannel, enabled: bool);

    /// 捕获寄存器 CR0
    fn capture(&self) -> u32;
}

/// 看门狗喂狗接口
pub trait WatchdogFeed {
    fn feed(&self);
}

/// 后台钩子返回值: 是否继续接收 tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookControl {
    Keep,
    Detach,
}

/// 调度器启动前的 1ms tick 消费者
pub type BackgroundHook = fn() -> HookControl;

/// 本次中断处理了哪些原因
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvents {
    pub overflow: bool,
    pub background: bool,
    pub timed_event: bool,
    pub watchdog_fed: bool,
    pub captured: bool,
}

/// 未知中断原因 (致命)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnexpectedCause(pub u32);

impl fmt::Display for UnexpectedCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unexpected ISR call (IR=0x{:02X})", self.0)
    }
}

/// 系统时间服务
pub struct TimeService<H, W> {
    hw: H,
    watchdog: W,
    scheduler: &'static SchedulerState,
    /// MR0 溢出次数
    rollover: AtomicU16,
    /// 喂狗周期 (us)
    watchdog_period_us: AtomicU32,
    /// 后台钩子周期 (us)
    background_period_us: AtomicU32,
    /// 后台钩子 (单向锁存: 解除后不再安装)
    hook: Mutex<Cell<Option<BackgroundHook>>>,
    hook_detached: AtomicBool,
    /// MR2 定时事件消费者
    timed_event: Mutex<Cell<Option<fn()>>>,
    /// MR2 目标时间超出 32 位窗口，等待溢出后重新评估
    timed_event_far: AtomicBool,
    /// 最近一次输入捕获值
    captured: AtomicU32,
    capture_done: Completion,
}

impl<H: SystemTimerHw, W: WatchdogFeed> TimeService<H, W> {
    pub const fn new(hw: H, watchdog: W, scheduler: &'static SchedulerState) -> Self {
        Self {
            hw,
            watchdog,
            scheduler,
            rollover: AtomicU16::new(0),
            watchdog_period_us: AtomicU32::new(0),
            background_period_us: AtomicU32::new(0),
            hook: Mutex::new(Cell::new(None)),
            hook_detached: AtomicBool::new(false),
            timed_event: Mutex::new(Cell::new(None)),
            timed_event_far: AtomicBool::new(false),
            captured: AtomicU32::new(0),
            capture_done: Completion::new(),
        }
    }

    /// 硬件接口
    pub fn hw(&self) -> &H {
        &self.hw
    }

    pub fn watchdog(&self) -> &W {
        &self.watchdog
    }

    /// 启动服务
    ///
    /// 定时器必须已按 1MHz 计数；`watchdog_timeout_ms` 决定喂狗周期 (一半)
    pub fn start(&self, background_period_us: u32, watchdog_timeout_ms: u32) {
        let period = watchdog_timeout_ms.saturating_mul(1000) / 2;
        self.watchdog_period_us.store(period, Ordering::Relaxed);
        self.background_period_us.store(background_period_us, Ordering::Relaxed);

        self.hw.set_match(MatchChannel::Overflow, u32::MAX);
        self.hw.set_match(MatchChannel::Background, background_period_us);
        self.hw.set_match(MatchChannel::TimedEvent, 0);
        self.hw.set_match(MatchChannel::Watchdog, period);

        self.hw.set_match_interrupt(MatchChannel::Overflow, true);
        self.hw.set_match_interrupt(MatchChannel::Background, !self.hook_detached.load(Ordering::Acquire));
        self.hw.set_match_interrupt(MatchChannel::TimedEvent, false);
        self.hw.set_match_interrupt(MatchChannel::Watchdog, true);
    }

    // ===== 单调时钟 =====

    /// 64 位单调微秒时间
    ///
    /// 依次读取 {溢出计数, 计数器, 计数器, 溢出计数}，两次溢出计数不同或
    /// 计数器倒退时重读。中断被屏蔽期间 MR0 已挂起但尚未处理时，
    /// 按挂起标志补上这一次溢出。
    pub fn uptime_us(&self) -> u64 {
        loop {
            let roll_before = self.rollover.load(Ordering::Acquire);
            let before = self.hw.counter();
            let after = self.hw.counter();
            let roll_after = self.rollover.load(Ordering::Acquire);

            if roll_before != roll_after || after < before {
                continue;
            }

            let mut roll = u64::from(roll_after);
            if self.hw.pending() & cause::MR0 != 0 {
                // MR0 在 TC == u32::MAX 时触发，回绕前稍等一个 tick
                if after == u32::MAX {
                    continue;
                }
                if after < u32::MAX / 2 {
                    roll += 1;
                }
            }
            return (roll << 32) | u64::from(after);
        }
    }

    /// 毫秒时间
    #[inline]
    pub fn uptime_ms(&self) -> u64 {
        self.uptime_us() / 1000
    }

    /// 溢出次数
    pub fn rollovers(&self) -> u16 {
        self.rollover.load(Ordering::Relaxed)
    }

    // ===== 后台钩子 =====

    /// 安装调度器启动前的 tick 消费者
    ///
    /// 消费者在发现调度器已运行时返回 `Detach`，或服务在调度器运行后
    /// 的第一个 tick 自动解除，之后 MR1 中断永久关闭。
    pub fn install_background_hook(&self, hook: BackgroundHook) -> bool {
        if self.hook_detached.load(Ordering::Acquire) {
            return false;
        }
        critical_section::with(|cs| self.hook.borrow(cs).set(Some(hook)));
        true
    }

    fn detach_background(&self) {
        self.hook_detached.store(true, Ordering::Release);
        critical_section::with(|cs| self.hook.borrow(cs).set(None));
        self.hw.set_match_interrupt(MatchChannel::Background, false);
    }

    /// 后台钩子是否已解除
    pub fn background_detached(&self) -> bool {
        self.hook_detached.load(Ordering::Acquire)
    }

    fn service_background(&self) {
        if self.scheduler.is_running() {
            self.detach_background();
            return;
        }

        let hook = critical_section::with(|cs| self.hook.borrow(cs).get());
        if let Some(hook) = hook {
            if hook() == HookControl::Detach {
                self.detach_background();
                return;
            }
        }

        let period = self.background_period_us.load(Ordering::Relaxed);
        let next = self.hw.counter().wrapping_add(period);
        self.hw.set_match(MatchChannel::Background, next);
    }

    // ===== MR2 定时事件 =====

    /// 安装定时事件消费者
    pub fn install_timed_event_handler(&self, handler: fn()) {
        critical_section::with(|cs| self.timed_event.borrow(cs).set(Some(handler)));
    }

    /// 设置定时事件时间点
    ///
    /// # Returns
    /// - `true`: 已设置
    /// - `false`: 时间点已经过去，调用者应立即处理
    pub fn set_timed_event(&self, at_us: u64) -> bool {
        critical_section::with(|_| {
            let now = self.uptime_us();
            if at_us <= now {
                self.hw.set_match_interrupt(MatchChannel::TimedEvent, false);
                return false;
            }

            // 超出 32 位窗口: 先不设 MR2，等溢出时重新评估
            let far = (at_us >> 32) != (now >> 32) && (at_us - now) > u64::from(u32::MAX / 2);
            self.timed_event_far.store(far, Ordering::Release);
            if far {
                self.hw.set_match_interrupt(MatchChannel::TimedEvent, false);
                return true;
            }

            self.hw.set_match(MatchChannel::TimedEvent, at_us as u32);
            self.hw.set_match_interrupt(MatchChannel::TimedEvent, true);

            // 设置期间可能已经越过目标
            if self.uptime_us() >= at_us {
                self.hw.set_match_interrupt(MatchChannel::TimedEvent, false);
                return false;
            }
            true
        })
    }

    /// 取消定时事件
    pub fn cancel_timed_event(&self) {
        self.timed_event_far.store(false, Ordering::Release);
        self.hw.set_match_interrupt(MatchChannel::TimedEvent, false);
    }

    fn fire_timed_event(&self) {
        let handler = critical_section::with(|cs| self.timed_event.borrow(cs).get());
        if let Some(handler) = handler {
            handler();
        }
    }

    // ===== 输入捕获 =====

    /// 最近一次捕获值 (定时器 tick)
    pub fn last_capture(&self) -> u32 {
        self.captured.load(Ordering::Acquire)
    }

    /// 等待下一次输入捕获
    pub async fn wait_capture(&self, timeout: Timeout) -> Option<u32> {
        if self.capture_done.wait(timeout).await {
            Some(self.last_capture())
        } else {
            None
        }
    }

    // ===== 中断处理 =====

    /// TIMER0 中断处理
    ///
    /// 返回本次处理的原因；出现未知原因 (或无原因) 时返回 `Err`，
    /// 由中断向量负责打印并死循环。
    pub fn on_interrupt(&self) -> Result<TimerEvents, UnexpectedCause> {
        let pending = self.hw.pending();
        if pending == 0 || pending & !cause::KNOWN != 0 {
            return Err(UnexpectedCause(pending));
        }

        let mut events = TimerEvents::default();

        if pending & cause::MR0 != 0 {
            self.hw.acknowledge(cause::MR0);
            self.rollover.fetch_add(1, Ordering::AcqRel);
            events.overflow = true;

            if self.timed_event_far.swap(false, Ordering::AcqRel) {
                self.fire_timed_event();
            }
        }

        if pending & cause::MR1 != 0 {
            self.hw.acknowledge(cause::MR1);
            self.service_background();
            events.background = true;
        }

        if pending & cause::MR2 != 0 {
            self.hw.acknowledge(cause::MR2);
            self.hw.set_match_interrupt(MatchChannel::TimedEvent, false);
            self.fire_timed_event();
            events.timed_event = true;
        }

        if pending & cause::MR3 != 0 {
            self.hw.acknowledge(cause::MR3);
            self.watchdog.feed();
            let period = self.watchdog_period_us.load(Ordering::Relaxed);
            self.hw
                .set_match(MatchChannel::Watchdog, self.hw.counter().wrapping_add(period));
            events.watchdog_fed = true;
        }

        if pending & cause::CR0 != 0 {
            self.hw.acknowledge(cause::CR0);
            self.captured.store(self.hw.capture(), Ordering::Release);
            self.capture_done.complete();
            events.captured = true;
        }

        Ok(events)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::Cell as StdCell;

    /// 定时器模型: 计数值由测试推进，溢出时自动挂起 MR0
    pub struct MockTimer {
        pub tc: StdCell<u32>,
        pub ir: StdCell<u32>,
        pub matches: StdCell<[u32; 4]>,
        pub armed: StdCell<[bool; 4]>,
        pub cr0: StdCell<u32>,
        /// 每次读取 TC 自动前进的 tick 数
        pub step: StdCell<u32>,
    }

    impl MockTimer {
        pub fn new() -> Self {
            Self {
                tc: StdCell::new(0),
                ir: StdCell::new(0),
                matches: StdCell::new([0; 4]),
                armed: StdCell::new([false; 4]),
                cr0: StdCell::new(0),
                step: StdCell::new(0),
            }
        }

        /// 推进计数器，越过已使能的匹配值时挂起对应中断
        pub fn advance(&self, ticks: u32) {
            for _ in 0..ticks {
                let tc = self.tc.get();
                let matches = self.matches.get();
                let armed = self.armed.get();
                for ch in 0..4 {
                    if armed[ch] && matches[ch] == tc {
                        self.ir.set(self.ir.get() | (1 << ch));
                    }
                }
                self.tc.set(tc.wrapping_add(1));
            }
        }
    }

    impl SystemTimerHw for MockTimer {
        fn counter(&self) -> u32 {
            let tc = self.tc.get();
            let step = self.step.get();
            if step != 0 {
                self.advance(step);
            }
            tc
        }

        fn pending(&self) -> u32 {
            self.ir.get()
        }

        fn acknowledge(&self, causes: u32) {
            self.ir.set(self.ir.get() & !causes);
        }

        fn set_match(&self, channel: MatchChannel, value: u32) {
            let mut m = self.matches.get();
            m[channel as usize] = value;
            self.matches.set(m);
        }

        fn match_value(&self, channel: MatchChannel) -> u32 {
            self.matches.get()[channel as usize]
        }

        fn set_match_interrupt(&self, channel: MatchChannel, enabled: bool) {
            let mut a = self.armed.get();
            a[channel as usize] = enabled;
            self.armed.set(a);
        }

        fn capture(&self) -> u32 {
            self.cr0.get()
        }
    }

    #[derive(Default)]
    pub struct MockFeed {
        pub feeds: StdCell<u32>,
    }

    impl WatchdogFeed for MockFeed {
        fn feed(&self) {
            self.feeds.set(self.feeds.get() + 1);
        }
    }

    fn service(sched: &'static SchedulerState) -> TimeService<MockTimer, MockFeed> {
        let svc = TimeService::new(MockTimer::new(), MockFeed::default(), sched);
        svc.start(1000, 3000);
        svc
    }

    #[test]
    fn test_start_programs_match_channels() {
        static SCHED: SchedulerState = SchedulerState::new();
        let svc = service(&SCHED);
        let hw = svc.hw();
        assert_eq!(hw.match_value(MatchChannel::Overflow), u32::MAX);
        assert_eq!(hw.match_value(MatchChannel::Background), 1000);
        assert_eq!(hw.match_value(MatchChannel::Watchdog), 1_500_000);
        assert_eq!(hw.armed.get(), [true, true, false, true]);
    }

    #[test]
    fn test_uptime_monotonic_across_overflow() {
        static SCHED: SchedulerState = SchedulerState::new();
        let svc = service(&SCHED);
        svc.hw().tc.set(u32::MAX - 50);

        let mut last = svc.uptime_us();
        for _ in 0..100 {
            svc.hw().advance(1);
            // 模拟中断延迟: 每隔一段时间才处理溢出
            if svc.hw().tc.get() == 20 {
                svc.on_interrupt().unwrap();
            }
            let now = svc.uptime_us();
            assert!(now >= last, "uptime went backward: {} -> {}", last, now);
            last = now;
        }
        assert_eq!(svc.rollovers(), 1);
        assert_eq!(last, (1u64 << 32) | 49);
    }

    #[test]
    fn test_watchdog_fed_every_half_timeout() {
        static SCHED: SchedulerState = SchedulerState::new();
        let svc = service(&SCHED);
        svc.start(1000, 20);
        svc.hw().set_match_interrupt(MatchChannel::Background, false);

        for _ in 0..3 {
            svc.hw().advance(10_001);
            let events = svc.on_interrupt().unwrap();
            assert!(events.watchdog_fed);
        }
        assert_eq!(svc.watchdog.feeds.get(), 3);
    }

    #[test]
    fn test_background_hook_detaches_when_scheduler_runs() {
        static SCHED: SchedulerState = SchedulerState::new();
        static TICKS: portable_atomic::AtomicU32 = portable_atomic::AtomicU32::new(0);
        fn hook() -> HookControl {
            TICKS.fetch_add(1, Ordering::Relaxed);
            HookControl::Keep
        }

        let svc = service(&SCHED);
        assert!(svc.install_background_hook(hook));

        svc.hw().advance(1001);
        svc.on_interrupt().unwrap();
        svc.hw().advance(1001);
        svc.on_interrupt().unwrap();
        assert_eq!(TICKS.load(Ordering::Relaxed), 2);

        SCHED.mark_running();
        svc.hw().advance(1001);
        assert!(svc.on_interrupt().unwrap().background);
        assert_eq!(TICKS.load(Ordering::Relaxed), 2);
        assert!(svc.background_detached());
        assert!(!svc.hw().armed.get()[MatchChannel::Background as usize]);
        assert!(!svc.install_background_hook(hook));
    }

    #[test]
    fn test_hook_can_detach_itself() {
        static SCHED: SchedulerState = SchedulerState::new();
        let svc = service(&SCHED);
        svc.install_background_hook(|| HookControl::Detach);
        svc.hw().advance(1001);
        svc.on_interrupt().unwrap();
        assert!(svc.background_detached());
    }

    #[test]
    fn test_unexpected_cause_is_reported() {
        static SCHED: SchedulerState = SchedulerState::new();
        let svc = service(&SCHED);
        assert_eq!(svc.on_interrupt(), Err(UnexpectedCause(0)));
        svc.hw().ir.set(1 << 6);
        assert_eq!(svc.on_interrupt(), Err(UnexpectedCause(1 << 6)));
    }

    #[test]
    fn test_capture_stores_counter() {
        static SCHED: SchedulerState = SchedulerState::new();
        let svc = service(&SCHED);
        svc.hw().cr0.set(4242);
        svc.hw().ir.set(cause::CR0);
        assert!(svc.on_interrupt().unwrap().captured);
        assert_eq!(svc.last_capture(), 4242);
        let got = embassy_futures::block_on(svc.wait_capture(None));
        assert_eq!(got, Some(4242));
    }

    #[test]
    fn test_timed_event_fires_handler() {
        static SCHED: SchedulerState = SchedulerState::new();
        static FIRED: AtomicBool = AtomicBool::new(false);
        let svc = service(&SCHED);
        svc.hw().set_match_interrupt(MatchChannel::Background, false);
        svc.install_timed_event_handler(|| FIRED.store(true, Ordering::Relaxed));

        assert!(svc.set_timed_event(500));
        assert!(!svc.set_timed_event(0));
        assert!(svc.set_timed_event(500));
        svc.hw().advance(501);
        assert!(svc.on_interrupt().unwrap().timed_event);
        assert!(FIRED.load(Ordering::Relaxed));
    }
}
