//! LPC1758 外设
//!
//! 每个外设一个寄存器块 (tock-registers `register_structs!`) 加一个句柄类型，
//! 句柄实现对应驱动声明的硬件 trait。所有句柄由 `Peripherals::take()`
//! 一次性交出，第二次调用返回 `None`。
//!
//! 中断号与向量表也在这里；中断服务函数本身由固件入口按名字提供
//! (`device.x` 把未提供的向量指向 `DefaultHandler`)。

pub mod gpioint;
pub mod i2c;
pub mod pincon;
pub mod rtc;
pub mod syscon;
pub mod timer;
pub mod uart;
pub mod wdt;

#[cfg(target_os = "none")]
pub mod board;

use portable_atomic::{AtomicBool, Ordering};

pub use gpioint::GpioInt;
pub use i2c::I2c2;
pub use rtc::RtcRegs;
pub use syscon::Syscon;
pub use timer::Timer0;
pub use uart::Uart0;
pub use wdt::Wdt;

// ===== 外设基地址 =====

pub const WDT_BASE: usize = 0x4000_0000;
pub const TIMER0_BASE: usize = 0x4000_4000;
pub const UART0_BASE: usize = 0x4000_C000;
pub const RTC_BASE: usize = 0x4002_4000;
pub const GPIOINT_BASE: usize = 0x4002_8080;
pub const PINCON_BASE: usize = 0x4002_C000;
pub const I2C2_BASE: usize = 0x400A_0000;
pub const SYSCON_BASE: usize = 0x400F_C000;
pub const GPIO0_BASE: usize = 0x2009_C000;

/// 设备中断号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
pub enum Interrupt {
    WDT = 0,
    TIMER0 = 1,
    TIMER1 = 2,
    TIMER2 = 3,
    TIMER3 = 4,
    UART0 = 5,
    UART1 = 6,
    UART2 = 7,
    UART3 = 8,
    PWM1 = 9,
    I2C0 = 10,
    I2C1 = 11,
    I2C2 = 12,
    SPI = 13,
    SSP0 = 14,
    SSP1 = 15,
    PLL0 = 16,
    RTC = 17,
    EINT0 = 18,
    EINT1 = 19,
    EINT2 = 20,
    /// 与 GPIO 中断共用
    EINT3 = 21,
    ADC = 22,
    BOD = 23,
    USB = 24,
    CAN = 25,
    DMA = 26,
    I2S = 27,
    ENET = 28,
    RIT = 29,
    MCPWM = 30,
    QEI = 31,
    PLL1 = 32,
    USBACT = 33,
    CANACT = 34,
}

impl Interrupt {
    pub const COUNT: usize = 35;

    pub const ALL: [Interrupt; Self::COUNT] = {
        use Interrupt::*;
        [
            WDT, TIMER0, TIMER1, TIMER2, TIMER3, UART0, UART1, UART2, UART3, PWM1, I2C0, I2C1,
            I2C2, SPI, SSP0, SSP1, PLL0, RTC, EINT0, EINT1, EINT2, EINT3, ADC, BOD, USB, CAN, DMA,
            I2S, ENET, RIT, MCPWM, QEI, PLL1, USBACT, CANACT,
        ]
    };

    #[inline]
    pub const fn number(self) -> u16 {
        self as u16
    }
}

#[cfg(target_os = "none")]
// Safety: 枚举值就是 NVIC 中断号，都小于 35
unsafe impl cortex_m::interrupt::InterruptNumber for Interrupt {
    #[inline]
    fn number(self) -> u16 {
        self as u16
    }
}

// ===================================================================
// 向量表 (cortex-m-rt `device` 特性从 __INTERRUPTS 取设备中断部分)
// ===================================================================

#[cfg(target_os = "none")]
mod vectors {
    extern "C" {
        fn WDT();
        fn TIMER0();
        fn TIMER1();
        fn TIMER2();
        fn TIMER3();
        fn UART0();
        fn UART1();
        fn UART2();
        fn UART3();
        fn PWM1();
        fn I2C0();
        fn I2C1();
        fn I2C2();
        fn SPI();
        fn SSP0();
        fn SSP1();
        fn PLL0();
        fn RTC();
        fn EINT0();
        fn EINT1();
        fn EINT2();
        fn EINT3();
        fn ADC();
        fn BOD();
        fn USB();
        fn CAN();
        fn DMA();
        fn I2S();
        fn ENET();
        fn RIT();
        fn MCPWM();
        fn QEI();
        fn PLL1();
        fn USBACT();
        fn CANACT();
    }

    #[doc(hidden)]
    pub union Vector {
        _handler: unsafe extern "C" fn(),
        _reserved: u32,
    }

    #[doc(hidden)]
    #[link_section = ".vector_table.interrupts"]
    #[no_mangle]
    pub static __INTERRUPTS: [Vector; super::Interrupt::COUNT] = [
        Vector { _handler: WDT },
        Vector { _handler: TIMER0 },
        Vector { _handler: TIMER1 },
        Vector { _handler: TIMER2 },
        Vector { _handler: TIMER3 },
        Vector { _handler: UART0 },
        Vector { _handler: UART1 },
        Vector { _handler: UART2 },
        Vector { _handler: UART3 },
        Vector { _handler: PWM1 },
        Vector { _handler: I2C0 },
        Vector { _handler: I2C1 },
        Vector { _handler: I2C2 },
        Vector { _handler: SPI },
        Vector { _handler: SSP0 },
        Vector { _handler: SSP1 },
        Vector { _handler: PLL0 },
        Vector { _handler: RTC },
        Vector { _handler: EINT0 },
        Vector { _handler: EINT1 },
        Vector { _handler: EINT2 },
        Vector { _handler: EINT3 },
        Vector { _handler: ADC },
        Vector { _handler: BOD },
        Vector { _handler: USB },
        Vector { _handler: CAN },
        Vector { _handler: DMA },
        Vector { _handler: I2S },
        Vector { _handler: ENET },
        Vector { _handler: RIT },
        Vector { _handler: MCPWM },
        Vector { _handler: QEI },
        Vector { _handler: PLL1 },
        Vector { _handler: USBACT },
        Vector { _handler: CANACT },
    ];
}

// ===================================================================
// 外设单例
// ===================================================================

static TAKEN: AtomicBool = AtomicBool::new(false);

/// 全部外设句柄
pub struct Peripherals {
    pub timer0: Timer0,
    pub wdt: Wdt,
    pub uart0: Uart0,
    pub i2c2: I2c2,
    pub gpioint: GpioInt,
    pub rtc: RtcRegs,
    pub syscon: Syscon,
}

impl Peripherals {
    /// 取得全部外设，只有第一次调用成功
    pub fn take() -> Option<Self> {
        if TAKEN.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Self {
            timer0: Timer0::new(),
            wdt: Wdt::new(),
            uart0: Uart0::new(),
            i2c2: I2c2::new(),
            gpioint: GpioInt::new(),
            rtc: RtcRegs::new(),
            syscon: Syscon::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_once() {
        // 只构造句柄，不访问寄存器
        assert!(Peripherals::take().is_some());
        assert!(Peripherals::take().is_none());
    }

    #[test]
    fn test_interrupt_numbers_are_dense() {
        for (index, irq) in Interrupt::ALL.iter().enumerate() {
            assert_eq!(irq.number() as usize, index);
        }
    }
}
