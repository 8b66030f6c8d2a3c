//! 同步原语模块
//!
//! 提供中断/任务共享的同步原语，基于 embassy-sync 封装:
//! - `CriticalChannel`: 有界 FIFO (中断 try_send，任务带超时 receive)
//! - `CriticalMutex`: 异步互斥锁 (每条总线一把)
//! - `Completion`: 中断到任务的一次性完成信号
//! - `SchedulerState`: 调度器已运行锁存

pub mod primitives;

pub use primitives::{
    AtomicCounter, AtomicFlag, Completion, CriticalChannel, CriticalMutex,
    CriticalSignal, SchedulerState, Timeout, Watermark, SCHEDULER,
};
