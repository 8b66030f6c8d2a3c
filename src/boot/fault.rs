//! 故障现场
//!
//! RTC 的通用寄存器 GPREG0..4 由电池供电，软复位后仍保留，
//! 因此作为与下一次启动之间的约定:
//!
//! | 寄存器 | 内容 |
//! |--------|------|
//! | GPREG0 | 最后运行任务名的前 4 字节 |
//! | GPREG1 | 故障哨兵 `0xDEADBEEF` |
//! | GPREG2 | PC |
//! | GPREG3 | LR |
//! | GPREG4 | PSR |

use core::fmt;

use crate::time::watchdog::{Watchdog, WatchdogHw};

pub const GPREG_TASK: usize = 0;
pub const GPREG_SENTINEL: usize = 1;
pub const GPREG_PC: usize = 2;
pub const GPREG_LR: usize = 3;
pub const GPREG_PSR: usize = 4;

/// 故障哨兵
pub const FAULT_SENTINEL: u32 = 0xDEAD_BEEF;

/// 电池供电的备份寄存器
pub trait BackupRegisters {
    fn read(&self, index: usize) -> u32;
    fn write(&self, index: usize, value: u32);
}

pub fn sentinel_present<B: BackupRegisters + ?Sized>(backup: &B) -> bool {
    backup.read(GPREG_SENTINEL) == FAULT_SENTINEL
}

pub fn set_sentinel<B: BackupRegisters + ?Sized>(backup: &B) {
    backup.write(GPREG_SENTINEL, FAULT_SENTINEL);
}

pub fn clear_sentinel<B: BackupRegisters + ?Sized>(backup: &B) {
    backup.write(GPREG_SENTINEL, 0);
}

/// 保存的故障现场
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaultRecord {
    /// 任务名前 4 字节 (小端)
    pub task_tag: u32,
    pub pc: u32,
    pub lr: u32,
    pub psr: u32,
}

impl FaultRecord {
    /// 由任务名构造，只保留前 4 字节
    pub fn new(task_name: &str, pc: u32, lr: u32, psr: u32) -> Self {
        let mut tag = [0u8; 4];
        let len = task_name.len().min(4);
        tag[..len].copy_from_slice(&task_name.as_bytes()[..len]);
        Self {
            task_tag: u32::from_le_bytes(tag),
            pc,
            lr,
            psr,
        }
    }

    /// 任务名前缀 (去掉结尾的 0)
    pub fn task_name(&self) -> TaskTag {
        TaskTag(self.task_tag.to_le_bytes())
    }

    /// 写入备份寄存器并置哨兵
    pub fn save<B: BackupRegisters + ?Sized>(&self, backup: &B) {
        backup.write(GPREG_TASK, self.task_tag);
        backup.write(GPREG_PC, self.pc);
        backup.write(GPREG_LR, self.lr);
        backup.write(GPREG_PSR, self.psr);
        set_sentinel(backup);
    }

    /// 读取备份寄存器中的现场 (不检查哨兵)
    pub fn load<B: BackupRegisters + ?Sized>(backup: &B) -> Self {
        Self {
            task_tag: backup.read(GPREG_TASK),
            pc: backup.read(GPREG_PC),
            lr: backup.read(GPREG_LR),
            psr: backup.read(GPREG_PSR),
        }
    }
}

/// 任务名前缀
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTag([u8; 4]);

impl fmt::Display for TaskTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(4);
        for &byte in &self.0[..len] {
            let c = if byte.is_ascii_graphic() || byte == b' ' { byte as char } else { '?' };
            fmt::Write::write_char(f, c)?;
        }
        Ok(())
    }
}

/// 分隔线
pub const SEPARATOR: &str = "----------------------------------------------------------";

/// 崩溃报告 (崩溃恢复启动时打印)
pub struct CrashReport<'a>(pub &'a FaultRecord);

impl fmt::Display for CrashReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.0;
        writeln!(f, "{}", SEPARATOR)?;
        writeln!(f, "System rebooted after crash.  Relevant info:")?;
        writeln!(f, "PC: 0x{:08X}.  LR: 0x{:08X}.  PSR: 0x{:08X}", record.pc, record.lr, record.psr)?;
        writeln!(f, "Possible last running OS Task: '{}'", record.task_name())?;
        writeln!(f, "{}", SEPARATOR)
    }
}

/// 置故障哨兵后通过看门狗复位，下一次启动会被识别为崩溃恢复
pub fn abnormal_reboot<H: WatchdogHw, B: BackupRegisters + ?Sized>(watchdog: &Watchdog<H>, backup: &B) -> ! {
    set_sentinel(backup);
    watchdog.reboot()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::Cell;
    use std::format;

    #[derive(Default)]
    pub struct MockBackup {
        pub regs: [Cell<u32>; 5],
    }

    impl BackupRegisters for MockBackup {
        fn read(&self, index: usize) -> u32 {
            self.regs[index].get()
        }
        fn write(&self, index: usize, value: u32) {
            self.regs[index].set(value);
        }
    }

    #[test]
    fn test_save_layout() {
        let backup = MockBackup::default();
        FaultRecord::new("sensor", 0x0000_1234, 0xFFFF_FFF9, 0x2100_0000).save(&backup);

        assert_eq!(backup.read(GPREG_TASK), u32::from_le_bytes(*b"sens"));
        assert_eq!(backup.read(GPREG_SENTINEL), 0xDEAD_BEEF);
        assert_eq!(backup.read(GPREG_PC), 0x1234);
        assert_eq!(backup.read(GPREG_LR), 0xFFFF_FFF9);
        assert_eq!(backup.read(GPREG_PSR), 0x2100_0000);
        assert!(sentinel_present(&backup));

        let loaded = FaultRecord::load(&backup);
        assert_eq!(format!("{}", loaded.task_name()), "sens");
    }

    #[test]
    fn test_short_task_name() {
        let record = FaultRecord::new("io", 0, 0, 0);
        assert_eq!(format!("{}", record.task_name()), "io");
    }

    #[test]
    fn test_crash_report_text() {
        let record = FaultRecord::new("main", 0x100, 0x200, 0x300);
        let text = format!("{}", CrashReport(&record));
        assert!(text.contains("System rebooted after crash.  Relevant info:\n"));
        assert!(text.contains("PC: 0x00000100.  LR: 0x00000200.  PSR: 0x00000300\n"));
        assert!(text.contains("Possible last running OS Task: 'main'\n"));
        assert!(text.starts_with(SEPARATOR));
    }
}
