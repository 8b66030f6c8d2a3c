//! 平台层
//!
//! - `lpc17xx`: LPC1758 外设寄存器的类型化视图、中断号与向量表、
//!   各驱动硬件 trait 的寄存器实现
//! - `StaticRef`: 指向固定 MMIO 地址的静态引用
//!
//! 核心组件只依赖各自声明的硬件 trait，不直接依赖本模块。

pub mod lpc17xx;

use core::ops::Deref;

/// 指向固定地址寄存器块的引用
///
/// 只能由平台层用已知的外设基地址构造。
#[derive(Debug)]
pub struct StaticRef<T> {
    ptr: *const T,
}

impl<T> StaticRef<T> {
    /// # Safety
    /// `ptr` 必须指向在整个程序生命周期内有效且对齐的寄存器块
    pub const unsafe fn new(ptr: *const T) -> StaticRef<T> {
        StaticRef { ptr }
    }
}

impl<T> Clone for StaticRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StaticRef<T> {}

impl<T> Deref for StaticRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: 构造时保证地址有效
        unsafe { &*self.ptr }
    }
}

// Safety: 寄存器访问都是 volatile 的，多上下文共享由各驱动自己的临界区约束
unsafe impl<T> Send for StaticRef<T> {}
unsafe impl<T> Sync for StaticRef<T> {}
