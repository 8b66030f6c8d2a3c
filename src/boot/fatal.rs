//! 致命错误钩子
//!
//! 内存耗尽与栈溢出: 打印提示，等待 3s 让串口输出完成，然后看门狗复位。
//! 硬故障: 把现场写入备份寄存器并置哨兵后复位，下一次启动打印崩溃报告。

use core::fmt;

use super::fault::{BackupRegisters, FaultRecord};
use crate::config::FATAL_REBOOT_DELAY_MS;
use crate::console_println;
use crate::time::delay_ms;
use crate::time::watchdog::{Watchdog, WatchdogHw};

pub const OOM_MESSAGE: &str = "HALTING SYSTEM: Your system ran out of memory (RAM)!";

/// 栈溢出提示
pub struct StackOverflow<'a>(pub &'a str);

impl fmt::Display for StackOverflow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HALTING SYSTEM: Stack overflow by task: {}\nTry increasing stack memory of this task.",
            self.0
        )
    }
}

/// 打印提示后复位
pub fn halt<H: WatchdogHw>(watchdog: &Watchdog<H>, message: fmt::Arguments<'_>) -> ! {
    console_println!("{}", message);
    delay_ms(FATAL_REBOOT_DELAY_MS);
    watchdog.reboot()
}

pub fn out_of_memory<H: WatchdogHw>(watchdog: &Watchdog<H>) -> ! {
    halt(watchdog, format_args!("{}", OOM_MESSAGE))
}

pub fn stack_overflow<H: WatchdogHw>(watchdog: &Watchdog<H>, task: &str) -> ! {
    halt(watchdog, format_args!("{}", StackOverflow(task)))
}

/// 保存硬故障现场
pub fn record_hard_fault<B: BackupRegisters + ?Sized>(backup: &B, task: &str, pc: u32, lr: u32, psr: u32) {
    FaultRecord::new(task, pc, lr, psr).save(backup);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::fault::tests::MockBackup;
    use crate::boot::fault::{sentinel_present, GPREG_PC};
    use std::format;

    #[test]
    fn test_stack_overflow_message() {
        assert_eq!(
            format!("{}", StackOverflow("logger")),
            "HALTING SYSTEM: Stack overflow by task: logger\nTry increasing stack memory of this task."
        );
    }

    #[test]
    fn test_hard_fault_sets_sentinel() {
        let backup = MockBackup::default();
        record_hard_fault(&backup, "idle", 0x0800_0101, 0, 0x0100_0000);
        assert!(sentinel_present(&backup));
        assert_eq!(backup.read(GPREG_PC), 0x0800_0101);
    }
}
