//! 系统控制块: 时钟、PLL0、Flash 加速器、外设电源与复位源

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::{register_bitfields, register_structs};

use super::SYSCON_BASE;
use crate::boot::clock::ClockHw;
use crate::platform::StaticRef;

register_structs! {
    pub SysconRegisters {
        (0x000 => flashcfg: ReadWrite<u32>),
        (0x004 => _reserved0),
        (0x080 => pll0con: ReadWrite<u32>),
        (0x084 => pll0cfg: ReadWrite<u32>),
        (0x088 => pll0stat: ReadOnly<u32>),
        (0x08C => pll0feed: WriteOnly<u32>),
        (0x090 => _reserved1),
        (0x0C0 => pcon: ReadWrite<u32>),
        /// 外设电源
        (0x0C4 => pconp: ReadWrite<u32>),
        (0x0C8 => _reserved2),
        (0x104 => cclkcfg: ReadWrite<u32>),
        (0x108 => _reserved3),
        (0x10C => clksrcsel: ReadWrite<u32>),
        (0x110 => _reserved4),
        /// 复位源标志，写 1 清除
        (0x180 => rsid: ReadWrite<u32>),
        (0x184 => _reserved5),
        (0x1A0 => scs: ReadWrite<u32, SCS::Register>),
        (0x1A4 => _reserved6),
        (0x1A8 => pclksel0: ReadWrite<u32, PCLKSEL0::Register>),
        (0x1AC => pclksel1: ReadWrite<u32, PCLKSEL1::Register>),
        (0x1B0 => @END),
    }
}

register_bitfields![u32,
    SCS [
        OSCRANGE OFFSET(4) NUMBITS(1) [],
        OSCEN OFFSET(5) NUMBITS(1) [],
        OSCSTAT OFFSET(6) NUMBITS(1) []
    ],
    PCLKSEL0 [
        TIMER0 OFFSET(2) NUMBITS(2) [Div4 = 0, Div1 = 1, Div2 = 2, Div8 = 3],
        UART0 OFFSET(6) NUMBITS(2) [Div4 = 0, Div1 = 1, Div2 = 2, Div8 = 3]
    ],
    PCLKSEL1 [
        I2C2 OFFSET(20) NUMBITS(2) [Div4 = 0, Div1 = 1, Div2 = 2, Div8 = 3]
    ]
];

/// PCONP 位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PowerDomain {
    Timer0 = 1,
    Uart0 = 3,
    Rtc = 9,
    I2c2 = 26,
}

/// 外设时钟 (本板都设为 CCLK/1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralClock {
    Timer0,
    Uart0,
    I2c2,
}

pub struct Syscon {
    regs: StaticRef<SysconRegisters>,
}

impl Syscon {
    pub(super) const fn new() -> Self {
        Self {
            // Safety: SYSCON 基地址
            regs: unsafe { StaticRef::new(SYSCON_BASE as *const SysconRegisters) },
        }
    }

    pub fn power_on(&self, domain: PowerDomain) {
        self.regs.pconp.set(self.regs.pconp.get() | (1 << domain as u32));
    }

    /// 外设时钟设为 CCLK，返回外设时钟频率
    pub fn set_pclk_full_speed(&self, clock: PeripheralClock, cpu_hz: u32) -> u32 {
        match clock {
            PeripheralClock::Timer0 => self.regs.pclksel0.modify(PCLKSEL0::TIMER0::Div1),
            PeripheralClock::Uart0 => self.regs.pclksel0.modify(PCLKSEL0::UART0::Div1),
            PeripheralClock::I2c2 => self.regs.pclksel1.modify(PCLKSEL1::I2C2::Div1),
        }
        cpu_hz
    }

    pub fn reset_source(&self) -> u32 {
        self.regs.rsid.get()
    }

    pub fn clear_reset_source(&self, bits: u32) {
        self.regs.rsid.set(bits);
    }
}

impl ClockHw for Syscon {
    fn set_pll_control(&self, value: u32) {
        self.regs.pll0con.set(value);
    }

    fn pll_control(&self) -> u32 {
        self.regs.pll0con.get()
    }

    fn set_pll_config(&self, value: u32) {
        self.regs.pll0cfg.set(value);
    }

    fn pll_status(&self) -> u32 {
        self.regs.pll0stat.get()
    }

    fn feed_pll(&self) {
        critical_section::with(|_| {
            self.regs.pll0feed.set(0xAA);
            self.regs.pll0feed.set(0x55);
        });
    }

    fn set_clock_source(&self, source: u32) {
        self.regs.clksrcsel.set(source);
    }

    fn set_cpu_divider(&self, value: u32) {
        self.regs.cclkcfg.set(value);
    }

    fn start_main_oscillator(&self) {
        // 12MHz 晶振低于 15MHz，OSCRANGE 保持 0
        self.regs.scs.write(SCS::OSCEN::SET);
    }

    fn main_oscillator_ready(&self) -> bool {
        self.regs.scs.is_set(SCS::OSCSTAT)
    }

    fn set_flash_config(&self, value: u32) {
        self.regs.flashcfg.set(value);
    }
}
