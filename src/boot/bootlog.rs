//! 启动信息日志
//!
//! 每次启动向 `0:boot.csv` 追加一行 (feature = "boot-log"):
//! 崩溃恢复时带上保存的 PC/LR/PSR。

use core::fmt::{self, Write};

use heapless::String;

use super::fault::FaultRecord;
use crate::console_println;
use crate::fs::FileSystem;
use crate::rtc::DateTime;

/// 附加信息的最大字符数
pub const EXTRA_MAX_LEN: usize = 128;

/// 一行的最大长度
pub const LINE_MAX_LEN: usize = 256;

const DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// `Www Mmm dd hh:mm:ss yyyy` 格式 (不带换行)
pub struct CTime<'a>(pub &'a DateTime);

impl fmt::Display for CTime<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.0;
        let day = DAYS.get(usize::from(t.dow)).copied().unwrap_or("???");
        let month = MONTHS
            .get(usize::from(t.month).wrapping_sub(1))
            .copied()
            .unwrap_or("???");
        write!(
            f,
            "{} {}{:3} {:02}:{:02}:{:02} {}",
            day, month, t.day, t.hour, t.min, t.sec, t.year
        )
    }
}

fn clip(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((at, _)) => &s[..at],
        None => s,
    }
}

/// 格式化一行启动记录
pub fn format_line(now: &DateTime, extra: &str, fault: Option<&FaultRecord>) -> String<LINE_MAX_LEN> {
    let mut line = String::new();
    let extra = clip(extra, EXTRA_MAX_LEN);
    // 最长约 220 字节，不会超出容量
    let _ = match fault {
        Some(fault) => writeln!(
            line,
            "{}: BAD BOOT ({}): PC: 0x{:08X} LR: 0x{:08X} PSR: 0x{:08X}",
            CTime(now),
            extra,
            fault.pc,
            fault.lr,
            fault.psr
        ),
        None => writeln!(line, "{}: NORMAL BOOT ({})", CTime(now), extra),
    };
    line
}

/// 追加启动记录，写入不完整时在控制台报告
pub fn log_boot_info<F: FileSystem>(
    fs: &mut F,
    path: &str,
    now: &DateTime,
    extra: &str,
    fault: Option<&FaultRecord>,
) -> bool {
    let line = format_line(now, extra, fault);
    let written = crate::fs::append(fs, path, line.as_bytes()).unwrap_or(0);
    if written != line.len() {
        console_println!("Error writing boot info");
        return false;
    }
    true
}
