//! SJOne 固件入口
//!
//! 启动顺序:
//! 1. 建立双区堆 (SRAM1 .bss 之后 + AHB SRAM)
//! 2. 构造各驱动并发布到锚点，中断向量与故障处理通过锚点找到它们
//! 3. `low_level_init`: RTC → 时钟 → Flash → 优先级 → 控制台 → 看门狗 → 启动原因
//! 4. 启动 TIMER0 系统时间服务 (之后由 MR3 喂狗) 并接入 Embassy 时间驱动
//! 5. 打印启动信息，初始化 I2C2 / 外部中断 / RTC 闹钟 / 文件日志
//! 6. 进入线程模式执行器
//!
//! 硬件目标: SJOne (LPC1758, Cortex-M3, 512K Flash, 32K + 32K SRAM)

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!(
        "{} {}: firmware image, build for thumbv7m-none-eabi",
        sjone_bsp::NAME,
        sjone_bsp::VERSION
    );
}

#[cfg(target_os = "none")]
#[allow(non_snake_case)]
mod firmware {
    use core::alloc::Layout;
    use core::ptr::addr_of;

    use cortex_m_rt::{entry, exception, ExceptionFrame};
    use embassy_executor::Executor;
    use static_cell::StaticCell;

    use sjone_bsp::boot::{self, fatal, BootConfig, BOOT_CAUSE};
    use sjone_bsp::bus::i2c::I2cBus;
    use sjone_bsp::bus::uart::Uart;
    use sjone_bsp::console_println;
    use sjone_bsp::eint::ExternalInterrupts;
    use sjone_bsp::fs::RamFs;
    use sjone_bsp::logger::Logger;
    use sjone_bsp::mem::{TwoArenaHeap, SRAM1_BASE};
    use sjone_bsp::platform::lpc17xx::board::{
        self, Board, BoardAlarms, BoardEint, BoardI2c, BoardRtc, ConsoleUart, FileLogger,
    };
    use sjone_bsp::platform::lpc17xx::Peripherals;
    use sjone_bsp::rtc::alarm::Alarms;
    use sjone_bsp::rtc::{DateTime, Rtc};
    use sjone_bsp::sync::primitives::SCHEDULER;
    use sjone_bsp::tasks;
    use sjone_bsp::time::driver::BoardTimeService;
    use sjone_bsp::time::{TimeService, Watchdog};
    use sjone_bsp::util::log::*;
    use sjone_bsp::util::Anchor;

    #[cfg(feature = "log-defmt")]
    use defmt_rtt as _;
    #[cfg(feature = "log-defmt")]
    use panic_probe as _;

    // ===== 堆 =====

    /// SRAM1 顶部留给主栈的空间
    const STACK_RESERVE: usize = 6 * 1024;

    #[global_allocator]
    static HEAP: TwoArenaHeap = TwoArenaHeap::new();

    extern "C" {
        static __sheap: u8;
        static _stack_start: u8;
        static _sram2_start: u8;
        static _sram2_end: u8;
    }

    // ===== 驱动单例 =====

    static RTC_CELL: StaticCell<BoardRtc> = StaticCell::new();
    static TIME_CELL: StaticCell<BoardTimeService> = StaticCell::new();
    static CONSOLE_CELL: StaticCell<ConsoleUart> = StaticCell::new();
    static I2C_CELL: StaticCell<BoardI2c> = StaticCell::new();
    static EINT_CELL: StaticCell<BoardEint> = StaticCell::new();
    static ALARMS_CELL: StaticCell<BoardAlarms> = StaticCell::new();
    static EXECUTOR: StaticCell<Executor> = StaticCell::new();

    static WALL_CLOCK: Anchor<BoardRtc> = Anchor::new();
    static TIME: Anchor<BoardTimeService> = Anchor::new();
    static CONSOLE: Anchor<ConsoleUart> = Anchor::new();
    static I2C: Anchor<BoardI2c> = Anchor::new();
    static EINT: Anchor<BoardEint> = Anchor::new();
    static ALARMS: Anchor<BoardAlarms> = Anchor::new();

    /// 文件日志 (整个日志器在编译期构造，不经过栈)
    static LOGGER: FileLogger = Logger::new(RamFs::new(), &SCHEDULER, rtc_now);

    fn rtc_now() -> DateTime {
        WALL_CLOCK
            .get()
            .map_or(DateTime::start_of(sjone_bsp::config::RTC_VALID_YEAR_MIN), |rtc| rtc.now())
    }

    fn on_out_of_memory(_layout: Layout) {
        match TIME.get() {
            Some(time) => fatal::out_of_memory(time.watchdog()),
            None => spin(),
        }
    }

    fn spin() -> ! {
        loop {
            cortex_m::asm::nop();
        }
    }

    // ===== 入口 =====

    #[entry]
    fn main() -> ! {
        // Safety: 符号由链接脚本给出，区域在 .bss 之后且不与栈重叠
        unsafe {
            let sram1_start = addr_of!(__sheap) as usize;
            let sram1_end = addr_of!(_stack_start) as usize - STACK_RESERVE;
            HEAP.init(
                sram1_start..sram1_end,
                addr_of!(_sram2_start) as usize..addr_of!(_sram2_end) as usize,
                sram1_start - SRAM1_BASE,
            );
        }
        HEAP.set_oom_hook(on_out_of_memory);

        let Some(p) = Peripherals::take() else { spin() };

        let rtc: &'static BoardRtc = RTC_CELL.init(Rtc::new(p.rtc));
        let time: &'static BoardTimeService =
            TIME_CELL.init(TimeService::new(p.timer0, Watchdog::new(p.wdt), &SCHEDULER));
        let console: &'static ConsoleUart = CONSOLE_CELL.init(Uart::new(p.uart0, &SCHEDULER));
        let i2c: &'static BoardI2c = I2C_CELL.init(I2cBus::new(p.i2c2, &SCHEDULER));
        let eint: &'static BoardEint = EINT_CELL.init(ExternalInterrupts::new(p.gpioint));
        let alarms: &'static BoardAlarms = ALARMS_CELL.init(Alarms::new(rtc));

        WALL_CLOCK.set(rtc);
        TIME.set(time);
        CONSOLE.set(console);
        I2C.set(i2c);
        EINT.set(eint);
        ALARMS.set(alarms);

        let syscon = &p.syscon;
        let platform = Board { syscon, rtc, console, time };
        let cfg = BootConfig::board();

        let report = match boot::low_level_init(&platform, &BOOT_CAUSE, &cfg) {
            Ok(report) => report,
            Err(e) => {
                // 控制台可能不可用，此时输出被丢弃
                console_println!("Boot failed: {}", e);
                time.watchdog().reboot()
            }
        };

        if !board::start_system_timer(syscon, time, report.clock.cpu_hz) {
            log_warn!("Time driver already attached");
        }
        boot::announce(&platform, &report, &cfg);

        if !board::start_i2c2(syscon, i2c, report.clock.cpu_hz) {
            log_warn!("I2C2 unavailable");
        }
        board::start_eint();
        board::start_rtc_interrupt();

        if let Err(e) = LOGGER.init() {
            console_println!("File logger init failed: {}", e);
        }

        #[cfg(feature = "boot-log")]
        {
            let logged = LOGGER.try_with_fs(|fs| {
                boot::bootlog::log_boot_info(
                    fs,
                    sjone_bsp::config::BOOT_LOG_FILENAME,
                    &report.boot_time,
                    sjone_bsp::VERSION,
                    report.fault.as_ref(),
                )
            });
            if logged != Some(true) {
                log_warn!("Boot info not logged");
            }
        }

        log_info!("Boot complete, CPU {} Hz", report.clock.cpu_hz);
        #[cfg(debug_assertions)]
        console_println!("{}", HEAP.info());

        let executor = EXECUTOR.init(Executor::new());
        executor.run(|spawner| {
            // 第一个任务锁存调度器状态
            spawner.must_spawn(tasks::system_task(&SCHEDULER, &LOGGER, alarms, console));
            spawner.must_spawn(tasks::logger_task(&LOGGER));
        })
    }

    // ===================================================================
    // 中断服务函数 (名字与向量表一致)
    // ===================================================================

    #[no_mangle]
    extern "C" fn TIMER0() {
        let Some(time) = TIME.get() else { return };
        if let Err(cause) = time.on_interrupt() {
            // 不再喂狗，由看门狗复位
            console_println!("{}", cause);
            spin();
        }
    }

    #[no_mangle]
    extern "C" fn UART0() {
        if let Some(console) = CONSOLE.get() {
            console.on_interrupt();
        }
    }

    #[no_mangle]
    extern "C" fn I2C2() {
        if let Some(i2c) = I2C.get() {
            i2c.on_interrupt();
        }
    }

    #[no_mangle]
    extern "C" fn EINT3() {
        if let Some(eint) = EINT.get() {
            eint.on_interrupt();
        }
    }

    #[no_mangle]
    extern "C" fn RTC() {
        if let Some(alarms) = ALARMS.get() {
            alarms.on_interrupt();
        }
    }

    // ===================================================================
    // 异常与 panic
    // ===================================================================

    #[exception]
    unsafe fn HardFault(frame: &ExceptionFrame) -> ! {
        if let Some(rtc) = WALL_CLOCK.get() {
            fatal::record_hard_fault(rtc.hw(), tasks::current(), frame.pc(), frame.lr(), frame.xpsr());
        }
        match TIME.get() {
            Some(time) => time.watchdog().reboot(),
            None => spin(),
        }
    }

    #[exception]
    unsafe fn DefaultHandler(irqn: i16) {
        console_println!("Unexpected ISR call (IRQ {})", irqn);
        spin();
    }

    #[cfg(not(feature = "log-defmt"))]
    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        match TIME.get() {
            Some(time) => fatal::halt(time.watchdog(), format_args!("PANIC: {}", info)),
            None => spin(),
        }
    }
}
