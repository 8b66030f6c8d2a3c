//! 引脚功能选择

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::register_structs;

use super::PINCON_BASE;
use crate::platform::StaticRef;

register_structs! {
    pub PinconRegisters {
        (0x000 => pinsel: [ReadWrite<u32>; 11]),
        (0x02C => _reserved0),
        (0x040 => pinmode: [ReadWrite<u32>; 10]),
        (0x068 => pinmode_od: [ReadWrite<u32>; 5]),
        (0x07C => @END),
    }
}

const PINCON: StaticRef<PinconRegisters> =
    // Safety: PINCON 基地址
    unsafe { StaticRef::new(PINCON_BASE as *const PinconRegisters) };

/// 设置 `port.pin` 的功能 (0 = GPIO, 1..=3 = 复用功能)
pub fn select_function(port: u8, pin: u8, function: u32) {
    let index = usize::from(port) * 2 + usize::from(pin / 16);
    let shift = u32::from(pin % 16) * 2;
    critical_section::with(|_| {
        let reg = &PINCON.pinsel[index];
        reg.set((reg.get() & !(0b11 << shift)) | ((function & 0b11) << shift));
    });
}

/// 开漏输出 (I2C 引脚)
pub fn set_open_drain(port: u8, pin: u8, enabled: bool) {
    critical_section::with(|_| {
        let reg = &PINCON.pinmode_od[usize::from(port)];
        let bit = 1 << pin;
        reg.set(if enabled { reg.get() | bit } else { reg.get() & !bit });
    });
}
