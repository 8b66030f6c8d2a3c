//! I2C2 寄存器 (P0.10 SDA2 / P0.11 SCL2)

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::register_structs;

use super::{GPIO0_BASE, I2C2_BASE};
use crate::bus::i2c::I2cHw;
use crate::platform::StaticRef;

register_structs! {
    pub I2cRegisters {
        (0x000 => conset: ReadWrite<u32>),
        (0x004 => stat: ReadOnly<u32>),
        (0x008 => dat: ReadWrite<u32>),
        (0x00C => adr0: ReadWrite<u32>),
        (0x010 => sclh: ReadWrite<u32>),
        (0x014 => scll: ReadWrite<u32>),
        (0x018 => conclr: WriteOnly<u32>),
        (0x01C => mmctrl: ReadWrite<u32>),
        (0x020 => adr1: ReadWrite<u32>),
        (0x024 => adr2: ReadWrite<u32>),
        (0x028 => adr3: ReadWrite<u32>),
        (0x02C => data_buffer: ReadOnly<u32>),
        (0x030 => mask: [ReadWrite<u32>; 4]),
        (0x040 => @END),
    }
}

register_structs! {
    /// 快速 GPIO 端口 (只用来读引脚电平)
    pub FastGpioRegisters {
        (0x000 => fiodir: ReadWrite<u32>),
        (0x004 => _reserved0),
        (0x010 => fiomask: ReadWrite<u32>),
        (0x014 => fiopin: ReadWrite<u32>),
        (0x018 => fioset: ReadWrite<u32>),
        (0x01C => fioclr: WriteOnly<u32>),
        (0x020 => @END),
    }
}

const SDA_PIN: u8 = 10;
const SCL_PIN: u8 = 11;

/// I2C2 句柄
pub struct I2c2 {
    regs: StaticRef<I2cRegisters>,
    gpio0: StaticRef<FastGpioRegisters>,
}

impl I2c2 {
    pub(super) const fn new() -> Self {
        Self {
            // Safety: I2C2 与 GPIO0 基地址
            regs: unsafe { StaticRef::new(I2C2_BASE as *const I2cRegisters) },
            gpio0: unsafe { StaticRef::new(GPIO0_BASE as *const FastGpioRegisters) },
        }
    }

    /// 切换引脚到 I2C 功能 (开漏)，调用前应先用 `lines_high` 检查上拉
    pub fn configure_pins(&self) {
        for pin in [SDA_PIN, SCL_PIN] {
            super::pincon::select_function(0, pin, 2);
            super::pincon::set_open_drain(0, pin, true);
        }
    }
}

impl I2cHw for I2c2 {
    #[inline]
    fn status(&self) -> u8 {
        self.regs.stat.get() as u8
    }

    #[inline]
    fn control(&self) -> u8 {
        self.regs.conset.get() as u8
    }

    #[inline]
    fn set_control(&self, bits: u8) {
        self.regs.conset.set(u32::from(bits));
    }

    #[inline]
    fn clear_control(&self, bits: u8) {
        self.regs.conclr.set(u32::from(bits));
    }

    #[inline]
    fn read_data(&self) -> u8 {
        self.regs.dat.get() as u8
    }

    #[inline]
    fn write_data(&self, byte: u8) {
        self.regs.dat.set(u32::from(byte));
    }

    fn set_clock_dividers(&self, high: u32, low: u32) {
        self.regs.sclh.set(high);
        self.regs.scll.set(low);
    }

    fn clear_slave_addresses(&self) {
        self.regs.adr0.set(0);
        self.regs.adr1.set(0);
        self.regs.adr2.set(0);
        self.regs.adr3.set(0);
    }

    fn lines_high(&self) -> bool {
        let mask = (1 << SDA_PIN) | (1 << SCL_PIN);
        self.gpio0.fiopin.get() & mask == mask
    }
}
