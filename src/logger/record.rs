//! 日志记录格式
//!
//! 标准记录: `M/D,HH:MM:SS,uptime_ms,severity,file,func(),line,message`
//!
//! - 文件名只保留最后一个 `/` 或 `\` 之后的部分
//! - 函数名为空时不输出 `()`
//! - 整条记录 (含头) 最多 `L - 2` 字节，为换行和结尾留出位置，超出部分截断

use core::fmt::{self, Write};

use heapless::Vec;

use crate::rtc::DateTime;

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Severity {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Self::Debug, Self::Info, Self::Warn, Self::Error];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// 回显掩码中对应的位
    pub const fn mask(self) -> u8 {
        1 << self as u8
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 记录头
#[derive(Debug, Clone, Copy)]
pub struct Header<'a> {
    pub severity: Severity,
    pub file: &'a str,
    pub func: &'a str,
    pub line: u32,
}

impl<'a> Header<'a> {
    /// 简单记录: info 级别，不带文件/函数/行号
    pub const fn simple() -> Self {
        Self {
            severity: Severity::Info,
            file: "",
            func: "",
            line: 0,
        }
    }
}

/// 去掉路径，只保留文件名
pub fn basename(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(at) => &path[at + 1..],
        None => path,
    }
}

/// 截断写入器，超出上限的内容静默丢弃 (按字符边界)
struct Truncating<'b, const L: usize> {
    buf: &'b mut Vec<u8, L>,
    limit: usize,
}

impl<const L: usize> Write for Truncating<'_, L> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.limit.saturating_sub(self.buf.len());
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        // 容量由 limit <= L 保证
        let _ = self.buf.extend_from_slice(&s.as_bytes()[..take]);
        Ok(())
    }
}

/// 记录内容的最大长度
pub const fn max_record_len(slot_len: usize) -> usize {
    slot_len.saturating_sub(2)
}

/// 格式化一条记录到 `slot` (先清空)
///
/// `header` 为 `None` 时是原始记录，只有消息本身
pub fn format_record<const L: usize>(
    slot: &mut Vec<u8, L>,
    header: Option<&Header<'_>>,
    now: &DateTime,
    uptime_ms: u64,
    message: fmt::Arguments<'_>,
) {
    slot.clear();
    let mut out = Truncating {
        buf: slot,
        limit: max_record_len(L),
    };

    if let Some(header) = header {
        let parens = if header.func.is_empty() { "" } else { "()" };
        let _ = write!(
            out,
            "{}/{},{:02}:{:02}:{:02},{},{},{},{}{},{},",
            now.month,
            now.day,
            now.hour,
            now.min,
            now.sec,
            uptime_ms as u32,
            header.severity,
            basename(header.file),
            header.func,
            parens,
            header.line
        );
    }
    let _ = out.write_fmt(message);
}
