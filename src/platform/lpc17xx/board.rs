//! 板级启动操作 (目标板)
//!
//! 把各外设句柄组合成 `BootPlatform`，供 `boot::low_level_init` 按顺序调用；
//! 另外给出板上各驱动的具体类型，以及启动后的系统定时器与 I2C2 初始化。

use core::fmt;

use cortex_m::peripheral::{NVIC, SCB};

use super::syscon::{PeripheralClock, PowerDomain};
use super::{GpioInt, I2c2, Interrupt, RtcRegs, Syscon, Uart0};
use crate::boot::priority::{nvic_value, SystemHandler};
use crate::boot::BootPlatform;
use crate::bus::i2c::I2cBus;
use crate::bus::uart::Uart;
use crate::config::{
    BACKGROUND_PERIOD_US, I2C2_CLK_KHZ, LOGGER_BUFFER_SIZE, LOGGER_MSG_MAX_LEN, LOGGER_NUM_BUFFERS,
    UART0_RXQ_SIZE, UART0_TXQ_SIZE, WATCHDOG_TIMEOUT_MS,
};
use crate::eint::ExternalInterrupts;
use crate::fs::RamFs;
use crate::logger::{BoardLogger, LogWorker};
use crate::rtc::alarm::Alarms;
use crate::rtc::{DateTime, Rtc};
use crate::time::driver::{self, BoardTimeService};
use crate::time::watchdog::WatchdogMode;

// ===== 板上驱动类型 =====

/// 控制台 UART
pub type ConsoleUart = Uart<Uart0, UART0_RXQ_SIZE, UART0_TXQ_SIZE>;

pub type BoardI2c = I2cBus<I2c2>;
pub type BoardEint = ExternalInterrupts<GpioInt>;
pub type BoardRtc = Rtc<RtcRegs>;
pub type BoardAlarms = Alarms<'static, RtcRegs>;

/// 日志后备卷 (外部 Flash 卷挂载前)
pub type LogFs = RamFs<2, 4096>;
pub type FileLogger = BoardLogger<LogFs>;
pub type FileLogWorker =
    LogWorker<'static, LogFs, LOGGER_NUM_BUFFERS, LOGGER_MSG_MAX_LEN, LOGGER_BUFFER_SIZE>;

/// 启动阶段用到的外设
pub struct Board<'a> {
    pub syscon: &'a Syscon,
    pub rtc: &'a Rtc<RtcRegs>,
    pub console: &'static ConsoleUart,
    pub time: &'static BoardTimeService,
}

impl BootPlatform for Board<'_> {
    type Clock = Syscon;
    type Backup = RtcRegs;

    fn clock(&self) -> &Syscon {
        self.syscon
    }

    fn backup(&self) -> &RtcRegs {
        self.rtc.hw()
    }

    fn start_rtc(&self) -> DateTime {
        self.syscon.power_on(PowerDomain::Rtc);
        self.rtc.init();
        self.rtc.now()
    }

    fn set_system_priority(&self, handler: SystemHandler, priority: u8) {
        // SHPR 下标 = 异常号 - 4
        let index = match handler {
            SystemHandler::MemoryManagement => 0,
            SystemHandler::BusFault => 1,
            SystemHandler::UsageFault => 2,
            SystemHandler::DebugMonitor => 8,
        };
        // Safety: 启动阶段单线程写优先级寄存器
        unsafe { (*SCB::PTR).shpr[index].write(nvic_value(priority)) };
    }

    fn set_irq_priority(&self, irq: Interrupt, priority: u8) {
        // Safety: 同上
        unsafe { (*NVIC::PTR).ipr[usize::from(irq.number())].write(nvic_value(priority)) };
    }

    fn init_console(&self, cpu_hz: u32, bps: u32) -> bool {
        self.syscon.power_on(PowerDomain::Uart0);
        let pclk = self.syscon.set_pclk_full_speed(PeripheralClock::Uart0, cpu_hz);
        self.console.hw().configure_pins();
        self.console.init(pclk, bps);
        // Safety: 中断处理只访问已初始化的控制台
        unsafe { NVIC::unmask(Interrupt::UART0) };
        crate::console::install(self.console)
    }

    fn enable_watchdog(&self, timeout_ms: u32, mode: WatchdogMode) {
        self.time.watchdog().enable(timeout_ms, mode);
    }

    fn reset_source(&self) -> u32 {
        self.syscon.reset_source()
    }

    fn clear_reset_source(&self, bits: u32) {
        self.syscon.clear_reset_source(bits);
    }

    fn print(&self, args: fmt::Arguments<'_>) {
        crate::console::_print(args);
    }

    fn delay_ms(&self, ms: u32) {
        crate::time::delay_ms(ms);
    }
}

/// 启动系统定时器并接入 Embassy 时间驱动
///
/// 必须在 `low_level_init` 之后、任何延时之前调用：看门狗已经使能，
/// 之后只由 TIMER0 的 MR3 喂狗。
pub fn start_system_timer(syscon: &Syscon, time: &'static BoardTimeService, cpu_hz: u32) -> bool {
    syscon.power_on(PowerDomain::Timer0);
    let pclk = syscon.set_pclk_full_speed(PeripheralClock::Timer0, cpu_hz);
    time.hw().init(pclk, false);
    time.start(BACKGROUND_PERIOD_US, WATCHDOG_TIMEOUT_MS);
    let attached = driver::attach(time);
    // Safety: 服务已启动，中断处理只访问 `time`
    unsafe { NVIC::unmask(Interrupt::TIMER0) };
    attached
}

/// 初始化 I2C2 主机 (100kHz)
pub fn start_i2c2(syscon: &Syscon, bus: &BoardI2c, cpu_hz: u32) -> bool {
    syscon.power_on(PowerDomain::I2c2);
    let pclk = syscon.set_pclk_full_speed(PeripheralClock::I2c2, cpu_hz);
    bus.hw().configure_pins();
    if !bus.init(pclk, I2C2_CLK_KHZ) {
        return false;
    }
    // Safety: 总线已初始化
    unsafe { NVIC::unmask(Interrupt::I2C2) };
    true
}

/// 打开 GPIO/EINT3 共用中断
pub fn start_eint() {
    // Safety: 没有注册回调时中断处理只清除挂起位
    unsafe { NVIC::unmask(Interrupt::EINT3) };
}

/// 打开 RTC 中断 (秒中断由第一个闹钟使能)
pub fn start_rtc_interrupt() {
    // Safety: 中断处理只访问闹钟表
    unsafe { NVIC::unmask(Interrupt::RTC) };
}
