//! GPIO 中断寄存器 (端口 0 与端口 2，共用 EINT3 向量)

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::register_structs;

use super::GPIOINT_BASE;
use crate::eint::{Edge, PinIntHw, Port};
use crate::platform::StaticRef;

register_structs! {
    pub PortIntRegisters {
        (0x000 => stat_r: ReadOnly<u32>),
        (0x004 => stat_f: ReadOnly<u32>),
        (0x008 => clr: WriteOnly<u32>),
        (0x00C => en_r: ReadWrite<u32>),
        (0x010 => en_f: ReadWrite<u32>),
        (0x014 => @END),
    }
}

register_structs! {
    pub GpioIntRegisters {
        /// 哪些端口有挂起的中断
        (0x000 => status: ReadOnly<u32>),
        (0x004 => port0: PortIntRegisters),
        (0x018 => _reserved0),
        (0x024 => port2: PortIntRegisters),
        (0x038 => @END),
    }
}

/// GPIO 中断句柄
pub struct GpioInt {
    regs: StaticRef<GpioIntRegisters>,
}

impl GpioInt {
    pub(super) const fn new() -> Self {
        Self {
            // Safety: GPIO 中断寄存器基地址
            regs: unsafe { StaticRef::new(GPIOINT_BASE as *const GpioIntRegisters) },
        }
    }

    fn port(&self, port: Port) -> &PortIntRegisters {
        match port {
            Port::P0 => &self.regs.port0,
            Port::P2 => &self.regs.port2,
        }
    }
}

impl PinIntHw for GpioInt {
    fn status(&self, port: Port, edge: Edge) -> u32 {
        let regs = self.port(port);
        match edge {
            Edge::Rising => regs.stat_r.get(),
            Edge::Falling => regs.stat_f.get(),
        }
    }

    fn clear(&self, port: Port, mask: u32) {
        self.port(port).clr.set(mask);
    }

    fn enable(&self, port: Port, edge: Edge, mask: u32) {
        let regs = self.port(port);
        critical_section::with(|_| match edge {
            Edge::Rising => regs.en_r.set(regs.en_r.get() | mask),
            Edge::Falling => regs.en_f.set(regs.en_f.get() | mask),
        });
    }
}
