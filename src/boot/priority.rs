//! 中断优先级策略
//!
//! 数值越小优先级越高，LPC1758 实现 5 位优先级 (0..=31)。
//! 数值 >= `SYSCALL_PRIORITY` 的中断才可以调用执行器/同步原语的中断侧接口；
//! 更高优先级 (数值更小) 的中断不能触碰任务侧状态。

use crate::platform::lpc17xx::Interrupt;

/// NVIC 实现的优先级位数
pub const PRIORITY_BITS: u8 = 5;

/// 高于内核: 此优先级的中断不能使用内核接口
pub const ABOVE_KERNEL_PRIORITY: u8 = 1;
/// 系统调用门限
pub const SYSCALL_PRIORITY: u8 = 2;
/// 内核 (最低)
pub const KERNEL_PRIORITY: u8 = 31;

pub const DEFAULT_PRIORITY: u8 = 20;
pub const HIGH_PRIORITY: u8 = SYSCALL_PRIORITY + 1;
pub const LOW_PRIORITY: u8 = DEFAULT_PRIORITY + 1;

pub const EINT_PRIORITY: u8 = DEFAULT_PRIORITY - 9;
pub const SSP_PRIORITY: u8 = DEFAULT_PRIORITY - 6;
pub const CAN_PRIORITY: u8 = DEFAULT_PRIORITY - 5;
pub const I2C_PRIORITY: u8 = DEFAULT_PRIORITY - 2;
pub const UART_PRIORITY: u8 = DEFAULT_PRIORITY - 1;

/// 该优先级的中断能否调用内核的中断侧接口
pub const fn may_use_kernel_from_isr(priority: u8) -> bool {
    priority >= SYSCALL_PRIORITY
}

/// 写入 NVIC IPR 的字节 (优先级位在高位)
pub const fn nvic_value(priority: u8) -> u8 {
    priority << (8 - PRIORITY_BITS)
}

/// 可设置优先级的内核异常
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemHandler {
    MemoryManagement,
    BusFault,
    UsageFault,
    DebugMonitor,
}

impl SystemHandler {
    pub const ALL: [SystemHandler; 4] = [
        Self::MemoryManagement,
        Self::BusFault,
        Self::UsageFault,
        Self::DebugMonitor,
    ];
}

/// 内核异常的优先级
pub const fn system_priority(_handler: SystemHandler) -> u8 {
    ABOVE_KERNEL_PRIORITY
}

/// 外设中断的优先级
pub const fn priority_of(irq: Interrupt) -> u8 {
    use Interrupt::*;
    match irq {
        UART0 | UART1 | UART2 | UART3 => UART_PRIORITY,
        I2C0 | I2C1 | I2C2 => I2C_PRIORITY,
        SSP0 | SSP1 => SSP_PRIORITY,
        EINT0 | EINT1 | EINT2 | EINT3 => EINT_PRIORITY,
        CAN => CAN_PRIORITY,
        _ => DEFAULT_PRIORITY,
    }
}
