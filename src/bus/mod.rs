//! 中断驱动总线
//!
//! 共同约定: 任务上下文使用异步阻塞接口，调度器运行前退化为轮询，
//! 中断推进显式状态机 (I2C) 或搬运 FIFO (UART)。
//!
//! - `i2c`: I2C 主机状态机，实现 embedded-hal 阻塞与异步接口
//! - `uart`: 环形队列字符设备
//! - `char_dev`: 字符设备的字符串/行辅助

pub mod char_dev;
pub mod i2c;
pub mod uart;

pub use char_dev::CharDev;
pub use i2c::{BusState, I2cBus, I2cError, I2cHw};
pub use uart::{Uart, UartHw};
