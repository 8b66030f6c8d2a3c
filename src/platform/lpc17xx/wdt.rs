//! 看门狗寄存器

use tock_registers::interfaces::Writeable;
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::register_structs;

use super::WDT_BASE;
use crate::platform::StaticRef;
use crate::time::watchdog::WatchdogHw;

register_structs! {
    pub WdtRegisters {
        (0x000 => wdmod: ReadWrite<u32>),
        (0x004 => wdtc: ReadWrite<u32>),
        (0x008 => wdfeed: WriteOnly<u32>),
        (0x00C => wdtv: ReadOnly<u32>),
        /// 时钟源: 0 = 内部 RC
        (0x010 => wdclksel: ReadWrite<u32>),
        (0x014 => @END),
    }
}

/// 看门狗句柄
pub struct Wdt {
    regs: StaticRef<WdtRegisters>,
}

impl Wdt {
    pub(super) const fn new() -> Self {
        Self {
            // Safety: WDT 基地址
            regs: unsafe { StaticRef::new(WDT_BASE as *const WdtRegisters) },
        }
    }
}

impl WatchdogHw for Wdt {
    fn write_mode(&self, bits: u32) {
        self.regs.wdclksel.set(0);
        self.regs.wdmod.set(bits);
    }

    fn write_constant(&self, ticks: u32) {
        self.regs.wdtc.set(ticks);
    }

    #[inline]
    fn write_feed(&self, value: u32) {
        self.regs.wdfeed.set(value);
    }
}
