//! 控制台输出端
//!
//! 启动时选定唯一的控制台实现 (通常是 UART0) 并安装，之后
//! `console_print!` / `console_println!` / 日志宏都通过它输出。
//! 重复安装会被拒绝。
//!
//! 协作式执行器中同一时刻只有一个任务在格式化输出，因此行与行之间不会交错；
//! 中断上下文不应使用控制台。

use core::cell::Cell;
use core::fmt::{self, Write};

use critical_section::Mutex;

/// 控制台字节收发接口
pub trait ConsoleIo: Sync {
    /// 写出字节 (调度器感知: 启动前轮询发送，之后进入发送队列)
    fn write_bytes(&self, bytes: &[u8]);

    /// 读取一个字节，`timeout_ms` 内没有数据返回 `None`
    fn read_byte(&self, timeout_ms: u32) -> Option<u8>;
}

static CONSOLE: Mutex<Cell<Option<&'static dyn ConsoleIo>>> = Mutex::new(Cell::new(None));

/// 安装控制台，只有第一次调用生效
///
/// # Returns
/// - `true`: 安装成功
/// - `false`: 已经安装过
pub fn install(console: &'static dyn ConsoleIo) -> bool {
    critical_section::with(|cs| {
        let slot = CONSOLE.borrow(cs);
        if slot.get().is_some() {
            return false;
        }
        slot.set(Some(console));
        true
    })
}

/// 当前安装的控制台
pub fn get() -> Option<&'static dyn ConsoleIo> {
    critical_section::with(|cs| CONSOLE.borrow(cs).get())
}

/// `fmt::Write` 适配器
pub struct ConsoleWriter<'a> {
    io: &'a dyn ConsoleIo,
}

impl<'a> ConsoleWriter<'a> {
    pub fn new(io: &'a dyn ConsoleIo) -> Self {
        Self { io }
    }
}

impl Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.io.write_bytes(s.as_bytes());
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments<'_>) {
    if let Some(io) = get() {
        let _ = ConsoleWriter::new(io).write_fmt(args);
    }
}

/// 读取一行到 `buf`，遇到 `'\n'` 结束，丢弃 `'\r'`
///
/// 返回写入的字节数 (不含换行)；超时或缓冲区满时提前返回
pub fn read_line(buf: &mut [u8], timeout_ms: u32) -> usize {
    let Some(io) = get() else {
        return 0;
    };
    let mut len = 0;
    while len < buf.len() {
        match io.read_byte(timeout_ms) {
            Some(b'\n') | None => break,
            Some(b'\r') => {}
            Some(byte) => {
                buf[len] = byte;
                len += 1;
            }
        }
    }
    len
}

/// 输出到控制台 (无换行)
#[macro_export]
macro_rules! console_print {
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!($($arg)*))
    };
}

/// 输出到控制台并换行
#[macro_export]
macro_rules! console_println {
    () => {
        $crate::console::_print(format_args!("\n"))
    };
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!("{}\n", format_args!($($arg)*)))
    };
}
