//! RTC 寄存器，包括电池供电的通用寄存器 GPREG0..4

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite};
use tock_registers::{register_bitfields, register_structs};

use super::RTC_BASE;
use crate::boot::fault::BackupRegisters;
use crate::platform::StaticRef;
use crate::rtc::{DateTime, RtcHw};

register_structs! {
    pub RtcRegisters {
        /// 中断位置，写 1 清除
        (0x000 => ilr: ReadWrite<u32, ILR::Register>),
        (0x004 => _reserved0),
        (0x008 => ccr: ReadWrite<u32, CCR::Register>),
        /// 递增中断使能
        (0x00C => ciir: ReadWrite<u32, CIIR::Register>),
        (0x010 => amr: ReadWrite<u32>),
        (0x014 => ctime: [ReadOnly<u32>; 3]),
        (0x020 => sec: ReadWrite<u32>),
        (0x024 => min: ReadWrite<u32>),
        (0x028 => hour: ReadWrite<u32>),
        (0x02C => dom: ReadWrite<u32>),
        (0x030 => dow: ReadWrite<u32>),
        (0x034 => doy: ReadWrite<u32>),
        (0x038 => month: ReadWrite<u32>),
        (0x03C => year: ReadWrite<u32>),
        (0x040 => calibration: ReadWrite<u32>),
        (0x044 => gpreg: [ReadWrite<u32>; 5]),
        (0x058 => @END),
    }
}

register_bitfields![u32,
    ILR [
        RTCCIF OFFSET(0) NUMBITS(1) [],
        RTCALF OFFSET(1) NUMBITS(1) []
    ],
    CCR [
        CLKEN OFFSET(0) NUMBITS(1) [],
        CTCRST OFFSET(1) NUMBITS(1) [],
        CCALEN OFFSET(4) NUMBITS(1) []
    ],
    CIIR [
        IMSEC OFFSET(0) NUMBITS(1) []
    ]
];

/// RTC 句柄
pub struct RtcRegs {
    regs: StaticRef<RtcRegisters>,
}

impl RtcRegs {
    pub(super) const fn new() -> Self {
        Self {
            // Safety: RTC 基地址
            regs: unsafe { StaticRef::new(RTC_BASE as *const RtcRegisters) },
        }
    }
}

impl RtcHw for RtcRegs {
    #[inline]
    fn read_consolidated(&self) -> [u32; 3] {
        [
            self.regs.ctime[0].get(),
            self.regs.ctime[1].get(),
            self.regs.ctime[2].get(),
        ]
    }

    fn enable_clock(&self, enabled: bool) {
        // 校准关闭 (CCALEN = 1)，计数器不复位
        if enabled {
            self.regs.ccr.write(CCR::CLKEN::SET + CCR::CCALEN::SET);
        } else {
            self.regs.ccr.write(CCR::CCALEN::SET);
        }
    }

    fn write_counters(&self, time: &DateTime) {
        self.regs.sec.set(u32::from(time.sec));
        self.regs.min.set(u32::from(time.min));
        self.regs.hour.set(u32::from(time.hour));
        self.regs.dom.set(u32::from(time.day));
        self.regs.dow.set(u32::from(time.dow));
        self.regs.doy.set(u32::from(time.doy));
        self.regs.month.set(u32::from(time.month));
        self.regs.year.set(u32::from(time.year));
    }

    fn enable_second_interrupt(&self) {
        self.regs.ciir.modify(CIIR::IMSEC::SET);
    }

    fn clear_increment_interrupt(&self) {
        self.regs.ilr.write(ILR::RTCCIF::SET);
    }
}

impl BackupRegisters for RtcRegs {
    fn read(&self, index: usize) -> u32 {
        self.regs.gpreg.get(index).map_or(0, |reg| reg.get())
    }

    fn write(&self, index: usize, value: u32) {
        if let Some(reg) = self.regs.gpreg.get(index) {
            reg.set(value);
        }
    }
}
