//! TIMER0: 1MHz 自由运行计数器，系统时间服务的硬件实现

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite};
use tock_registers::{register_bitfields, register_structs};

use super::TIMER0_BASE;
use crate::platform::StaticRef;
use crate::time::service::{MatchChannel, SystemTimerHw};

register_structs! {
    /// LPC17xx 通用定时器 (TIMER0..3)
    pub TimerRegisters {
        /// 中断标志，写 1 清除
        (0x000 => ir: ReadWrite<u32, IR::Register>),
        /// 定时器控制
        (0x004 => tcr: ReadWrite<u32, TCR::Register>),
        /// 定时器计数
        (0x008 => tc: ReadWrite<u32>),
        /// 预分频
        (0x00C => pr: ReadWrite<u32>),
        /// 预分频计数
        (0x010 => pc: ReadWrite<u32>),
        /// 匹配控制
        (0x014 => mcr: ReadWrite<u32, MCR::Register>),
        (0x018 => mr: [ReadWrite<u32>; 4]),
        /// 捕获控制
        (0x028 => ccr: ReadWrite<u32, CCR::Register>),
        (0x02C => cr0: ReadOnly<u32>),
        (0x030 => cr1: ReadOnly<u32>),
        (0x034 => _reserved0),
        (0x03C => emr: ReadWrite<u32>),
        (0x040 => _reserved1),
        /// 计数控制 (定时器/计数器模式)
        (0x070 => ctcr: ReadWrite<u32>),
        (0x074 => @END),
    }
}

register_bitfields![u32,
    IR [
        MR0INT OFFSET(0) NUMBITS(1) [],
        MR1INT OFFSET(1) NUMBITS(1) [],
        MR2INT OFFSET(2) NUMBITS(1) [],
        MR3INT OFFSET(3) NUMBITS(1) [],
        CR0INT OFFSET(4) NUMBITS(1) [],
        CR1INT OFFSET(5) NUMBITS(1) []
    ],
    TCR [
        CEN OFFSET(0) NUMBITS(1) [],
        CRST OFFSET(1) NUMBITS(1) []
    ],
    MCR [
        MR0I OFFSET(0) NUMBITS(1) [],
        MR1I OFFSET(3) NUMBITS(1) [],
        MR2I OFFSET(6) NUMBITS(1) [],
        MR3I OFFSET(9) NUMBITS(1) []
    ],
    CCR [
        CAP0RE OFFSET(0) NUMBITS(1) [],
        CAP0FE OFFSET(1) NUMBITS(1) [],
        CAP0I OFFSET(2) NUMBITS(1) []
    ]
];

/// TIMER0 句柄
pub struct Timer0 {
    regs: StaticRef<TimerRegisters>,
}

impl Timer0 {
    pub(super) const fn new() -> Self {
        Self {
            // Safety: TIMER0 基地址
            regs: unsafe { StaticRef::new(TIMER0_BASE as *const TimerRegisters) },
        }
    }

    /// 以 `pclk_hz` 配置为 1MHz 计数并启动
    ///
    /// `capture_edges` 使能 CAP0.0 双边沿捕获中断 (例如红外接收)
    pub fn init(&self, pclk_hz: u32, capture_edges: bool) {
        self.regs.tcr.write(TCR::CRST::SET);
        self.regs.ctcr.set(0);
        self.regs.pr.set((pclk_hz / crate::config::TICK_FREQ_HZ).saturating_sub(1));
        self.regs.mcr.set(0);
        if capture_edges {
            self.regs
                .ccr
                .write(CCR::CAP0RE::SET + CCR::CAP0FE::SET + CCR::CAP0I::SET);
        } else {
            self.regs.ccr.set(0);
        }
        self.regs.ir.set(0x3F);
        self.regs.tcr.write(TCR::CEN::SET);
    }
}

impl SystemTimerHw for Timer0 {
    #[inline]
    fn counter(&self) -> u32 {
        self.regs.tc.get()
    }

    #[inline]
    fn pending(&self) -> u32 {
        self.regs.ir.get()
    }

    #[inline]
    fn acknowledge(&self, causes: u32) {
        self.regs.ir.set(causes);
    }

    fn set_match(&self, channel: MatchChannel, value: u32) {
        self.regs.mr[channel as usize].set(value);
    }

    fn match_value(&self, channel: MatchChannel) -> u32 {
        self.regs.mr[channel as usize].get()
    }

    fn set_match_interrupt(&self, channel: MatchChannel, enabled: bool) {
        let field = match channel {
            MatchChannel::Overflow => MCR::MR0I,
            MatchChannel::Background => MCR::MR1I,
            MatchChannel::TimedEvent => MCR::MR2I,
            MatchChannel::Watchdog => MCR::MR3I,
        };
        // 中断与任务都会修改 MCR
        critical_section::with(|_| {
            self.regs.mcr.modify(field.val(u32::from(enabled)));
        });
    }

    #[inline]
    fn capture(&self) -> u32 {
        self.regs.cr0.get()
    }
}
