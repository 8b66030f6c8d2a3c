//! 启动原因分类
//!
//! 按优先级 {上电, 外部复位, 看门狗, 掉电} 检查复位源寄存器 RSID，
//! 命中的标志读取后立即清除。看门狗复位时再看备份寄存器中的故障哨兵:
//! 存在表示崩溃后恢复，否则是有意的看门狗复位；两种情况下哨兵都被清零。

use core::fmt;

use portable_atomic::{AtomicU8, Ordering};

use super::fault::{self, BackupRegisters};

/// RSID 位
pub mod rsid {
    /// 上电复位
    pub const POR: u32 = 1 << 0;
    /// 外部复位引脚
    pub const EXTR: u32 = 1 << 1;
    /// 看门狗复位
    pub const WDTR: u32 = 1 << 2;
    /// 掉电复位
    pub const BODR: u32 = 1 << 3;
}

/// 启动原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootCause {
    Unknown = 1,
    PowerOn = 2,
    Reset = 3,
    /// 有意的看门狗复位 (例如 `reboot()`)
    Watchdog = 4,
    /// 崩溃后由看门狗复位
    WatchdogRecover = 5,
    BrownOut = 6,
}

impl BootCause {
    const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Unknown),
            2 => Some(Self::PowerOn),
            3 => Some(Self::Reset),
            4 => Some(Self::Watchdog),
            5 => Some(Self::WatchdogRecover),
            6 => Some(Self::BrownOut),
            _ => None,
        }
    }

    /// 启动横幅，掉电和未知原因不打印
    pub const fn banner(self) -> Option<&'static str> {
        match self {
            Self::PowerOn => Some("System Power-on: Booting ..."),
            Self::Reset => Some("System Reset: Booting ..."),
            Self::Watchdog => Some("Watchdog System Reset: Booting ..."),
            Self::WatchdogRecover => Some("System Crash: Re-booting ..."),
            Self::BrownOut | Self::Unknown => None,
        }
    }

    pub const fn is_crash(self) -> bool {
        matches!(self, Self::WatchdogRecover)
    }
}

impl fmt::Display for BootCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::PowerOn => "power-on",
            Self::Reset => "reset",
            Self::Watchdog => "watchdog",
            Self::WatchdogRecover => "watchdog-recover",
            Self::BrownOut => "brown-out",
        };
        f.write_str(name)
    }
}

/// 分类结果: 原因与需要写回 RSID 清除的位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified {
    pub cause: BootCause,
    pub clear: u32,
}

/// 根据 RSID 与备份寄存器分类
///
/// 看门狗复位时会清零故障哨兵 (备份寄存器被修改)
pub fn classify<B: BackupRegisters + ?Sized>(rsid_value: u32, backup: &B) -> Classified {
    let (cause, clear) = if rsid_value & rsid::POR != 0 {
        (BootCause::PowerOn, rsid::POR)
    } else if rsid_value & rsid::EXTR != 0 {
        (BootCause::Reset, rsid::EXTR)
    } else if rsid_value & rsid::WDTR != 0 {
        let crashed = fault::sentinel_present(backup);
        fault::clear_sentinel(backup);
        let cause = if crashed {
            BootCause::WatchdogRecover
        } else {
            BootCause::Watchdog
        };
        (cause, rsid::WDTR)
    } else if rsid_value & rsid::BODR != 0 {
        (BootCause::BrownOut, rsid::BODR)
    } else {
        (BootCause::Unknown, 0)
    };
    Classified { cause, clear }
}

/// 只能发布一次的启动原因
pub struct PublishedCause {
    raw: AtomicU8,
}

impl PublishedCause {
    pub const fn new() -> Self {
        Self { raw: AtomicU8::new(0) }
    }

    /// 发布，只有第一次生效
    pub fn publish(&self, cause: BootCause) -> bool {
        self.raw
            .compare_exchange(0, cause as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn get(&self) -> Option<BootCause> {
        BootCause::from_u8(self.raw.load(Ordering::Acquire))
    }
}

impl Default for PublishedCause {
    fn default() -> Self {
        Self::new()
    }
}

/// 本次启动的原因 (由 `low_level_init` 发布)
pub static BOOT_CAUSE: PublishedCause = PublishedCause::new();

/// 查询本次启动原因，启动完成前为 `None`
pub fn boot_cause() -> Option<BootCause> {
    BOOT_CAUSE.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::fault::tests::MockBackup;
    use crate::boot::fault::{FAULT_SENTINEL, GPREG_SENTINEL};

    #[test]
    fn test_priority_order() {
        let backup = MockBackup::default();
        let all = rsid::POR | rsid::EXTR | rsid::WDTR | rsid::BODR;
        assert_eq!(
            classify(all, &backup),
            Classified { cause: BootCause::PowerOn, clear: rsid::POR }
        );
        assert_eq!(classify(rsid::EXTR | rsid::BODR, &backup).cause, BootCause::Reset);
        assert_eq!(classify(rsid::BODR, &backup).cause, BootCause::BrownOut);
        assert_eq!(classify(0, &backup), Classified { cause: BootCause::Unknown, clear: 0 });
    }

    #[test]
    fn test_watchdog_with_and_without_sentinel() {
        let backup = MockBackup::default();
        backup.write(GPREG_SENTINEL, FAULT_SENTINEL);
        let first = classify(rsid::WDTR, &backup);
        assert_eq!(first.cause, BootCause::WatchdogRecover);
        assert_eq!(first.clear, rsid::WDTR);
        assert_eq!(backup.read(GPREG_SENTINEL), 0);

        // 哨兵已清除，下一次看门狗复位是有意的
        assert_eq!(classify(rsid::WDTR, &backup).cause, BootCause::Watchdog);
    }

    #[test]
    fn test_banners() {
        assert_eq!(BootCause::PowerOn.banner(), Some("System Power-on: Booting ..."));
        assert_eq!(BootCause::WatchdogRecover.banner(), Some("System Crash: Re-booting ..."));
        assert_eq!(BootCause::BrownOut.banner(), None);
        assert!(BootCause::WatchdogRecover.is_crash());
    }

    #[test]
    fn test_publish_once() {
        let cell = PublishedCause::new();
        assert_eq!(cell.get(), None);
        assert!(cell.publish(BootCause::Reset));
        assert!(!cell.publish(BootCause::PowerOn));
        assert_eq!(cell.get(), Some(BootCause::Reset));
    }
}
