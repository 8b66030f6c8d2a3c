//! 条件编译日志系统
//!
//! 根据 feature 选择不同的日志后端:
//! - `log-defmt`: 使用 defmt + RTT (高效二进制日志)
//! - `dev` / `log-console`: 通过控制台输出端 (UART0) 输出文本日志
//! - 默认 (release): 完全禁用日志 (零开销)
//!
//! 这里的宏面向固件开发者；面向应用的文件日志见 `logger` 模块。

// ===================================================================
// defmt 后端 (feature = "log-defmt")
// ===================================================================
#[cfg(feature = "log-defmt")]
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { defmt::info!($($arg)*) };
}

#[cfg(feature = "log-defmt")]
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { defmt::debug!($($arg)*) };
}

#[cfg(feature = "log-defmt")]
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { defmt::warn!($($arg)*) };
}

#[cfg(feature = "log-defmt")]
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { defmt::error!($($arg)*) };
}

#[cfg(feature = "log-defmt")]
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => { defmt::trace!($($arg)*) };
}

// ===================================================================
// 控制台后端 (feature = "dev" 或 "log-console")
// ===================================================================
#[cfg(all(feature = "log-console", not(feature = "log-defmt")))]
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::console_println!("[INFO] {}", format_args!($($arg)*)) };
}

#[cfg(all(feature = "log-console", not(feature = "log-defmt")))]
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::console_println!("[DEBUG] {}", format_args!($($arg)*)) };
}

#[cfg(all(feature = "log-console", not(feature = "log-defmt")))]
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::console_println!("[WARN] {}", format_args!($($arg)*)) };
}

#[cfg(all(feature = "log-console", not(feature = "log-defmt")))]
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::console_println!("[ERROR] {}", format_args!($($arg)*)) };
}

#[cfg(all(feature = "log-console", not(feature = "log-defmt")))]
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => { $crate::console_println!("[TRACE] {}", format_args!($($arg)*)) };
}

// ===================================================================
// 空实现 (无日志 feature)
// ===================================================================
// 参数仍然被求值类型检查，但不会产生任何输出
#[cfg(not(any(feature = "log-console", feature = "log-defmt")))]
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

#[cfg(not(any(feature = "log-console", feature = "log-defmt")))]
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

#[cfg(not(any(feature = "log-console", feature = "log-defmt")))]
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

#[cfg(not(any(feature = "log-console", feature = "log-defmt")))]
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

#[cfg(not(any(feature = "log-console", feature = "log-defmt")))]
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

// ===================================================================
// 便捷重导出
// ===================================================================
pub use log_debug;
pub use log_error;
pub use log_info;
pub use log_trace;
pub use log_warn;
