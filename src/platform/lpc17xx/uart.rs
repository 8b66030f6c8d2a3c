//! UART0 寄存器 (控制台，P0.2 TXD0 / P0.3 RXD0)

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::register_structs;

use super::UART0_BASE;
use crate::bus::uart::UartHw;
use crate::platform::StaticRef;

register_structs! {
    pub UartRegisters {
        /// RBR (读) / THR (写) / DLL (DLAB = 1)
        (0x000 => data: ReadWrite<u32>),
        /// IER / DLM (DLAB = 1)
        (0x004 => ier: ReadWrite<u32>),
        /// IIR (读) / FCR (写)
        (0x008 => iir_fcr: ReadWrite<u32>),
        (0x00C => lcr: ReadWrite<u32>),
        (0x010 => _reserved0),
        (0x014 => lsr: ReadOnly<u32>),
        (0x018 => _reserved1),
        (0x01C => scr: ReadWrite<u32>),
        (0x020 => acr: ReadWrite<u32>),
        (0x024 => _reserved2),
        /// 小数分频，保持 DIVADDVAL = 0
        (0x028 => fdr: ReadWrite<u32>),
        (0x02C => _reserved3),
        (0x030 => ter: WriteOnly<u32>),
        (0x034 => @END),
    }
}

const LCR_8N1: u32 = 0x03;
const LCR_DLAB: u32 = 1 << 7;

/// FIFO 使能 + 复位 RX/TX，RX 触发深度 8 字节
const FCR_ENABLE_RESET: u32 = (1 << 0) | (1 << 1) | (1 << 2) | (2 << 6);

/// UART0 句柄
pub struct Uart0 {
    regs: StaticRef<UartRegisters>,
}

impl Uart0 {
    pub(super) const fn new() -> Self {
        Self {
            // Safety: UART0 基地址
            regs: unsafe { StaticRef::new(UART0_BASE as *const UartRegisters) },
        }
    }

    /// 切换引脚到 UART 功能
    pub fn configure_pins(&self) {
        super::pincon::select_function(0, 2, 1);
        super::pincon::select_function(0, 3, 1);
    }
}

impl UartHw for Uart0 {
    #[inline]
    fn interrupt_id(&self) -> u8 {
        self.regs.iir_fcr.get() as u8
    }

    #[inline]
    fn line_status(&self) -> u8 {
        self.regs.lsr.get() as u8
    }

    #[inline]
    fn read_byte(&self) -> u8 {
        self.regs.data.get() as u8
    }

    #[inline]
    fn write_byte(&self, byte: u8) {
        self.regs.data.set(u32::from(byte));
    }

    fn set_divisor(&self, divisor: u16) {
        self.regs.fdr.set(0x10);
        self.regs.lcr.set(LCR_DLAB);
        self.regs.data.set(u32::from(divisor & 0xFF));
        self.regs.ier.set(u32::from(divisor >> 8));
        self.regs.lcr.set(LCR_8N1);
    }

    fn reset_fifos(&self) {
        self.regs.iir_fcr.set(FCR_ENABLE_RESET);
    }

    fn enable_interrupts(&self, mask: u8) {
        self.regs.ier.set(u32::from(mask));
    }
}
