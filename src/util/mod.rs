//! 通用小工具
//!
//! - `log`: 条件编译日志宏
//! - `anchor`: 只能设置一次的 `&'static` 锚点
//! - `soft_timer` / `stopwatch`: 基于系统微秒时钟的计时工具
//! - `circular_buffer` / `sampler`: 定容数据结构

pub mod anchor;
pub mod circular_buffer;
pub mod log;
pub mod sampler;
pub mod soft_timer;
pub mod stopwatch;

pub use anchor::Anchor;
pub use circular_buffer::CircularBuffer;
pub use sampler::Sampler;
pub use soft_timer::SoftTimer;
pub use stopwatch::Stopwatch;
