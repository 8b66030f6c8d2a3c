//! 环形队列 UART 字符设备
//!
//! 两个有界字节队列: 中断是 RX 的唯一生产者和 TX 的唯一消费者，
//! 任务从 RX 取字节、向 TX 放字节。
//!
//! - THRE 中断: 从 TX 队列最多搬 16 字节 (硬件 FIFO 深度) 到 THR
//! - RDA / CTI 中断: LSR.RDR 置位期间持续读 RBR 入 RX 队列，队列满也要读
//! - 其他原因: 读 LSR 清除线路状态
//!
//! 调度器运行前 `put_char` 直接写 THR 并等待发送器空闲，`get_char`
//! 以截止时间轮询 RX 队列。

use embassy_time::{Duration, Instant, Timer};
use portable_atomic::{AtomicU32, AtomicU64, Ordering};

use crate::config;
use crate::console::ConsoleIo;
use crate::sync::primitives::{maybe_timeout, CriticalChannel, SchedulerState, Timeout, Watermark};
use crate::time::uptime_ms;

/// LSR 位
pub mod lsr {
    /// 接收数据就绪
    pub const RDR: u8 = 1 << 0;
    /// THR 空
    pub const THRE: u8 = 1 << 5;
    /// 发送器完全空闲
    pub const TEMT: u8 = 1 << 6;
}

/// IIR[3:1] 中断原因
pub mod iir {
    pub const THRE: u8 = 0x2;
    pub const RDA: u8 = 0x4;
    pub const RLS: u8 = 0x6;
    pub const CTI: u8 = 0xC;
    pub const MASK: u8 = 0xE;
}

/// IER 位
pub mod ier {
    pub const RBR: u8 = 1 << 0;
    pub const THRE: u8 = 1 << 1;
    pub const RLS: u8 = 1 << 2;
}

/// 队列最小容量
pub const MIN_QUEUE_SIZE: usize = 8;

/// UART 寄存器接口
pub trait UartHw {
    /// IIR (调用者按 `iir::MASK` 取原因)
    fn interrupt_id(&self) -> u8;
    /// LSR
    fn line_status(&self) -> u8;
    /// RBR
    fn read_byte(&self) -> u8;
    /// THR
    fn write_byte(&self, byte: u8);
    /// 经 DLAB 写入 DLM/DLL，之后设置 8N1
    fn set_divisor(&self, divisor: u16);
    /// 使能并复位 FIFO
    fn reset_fifos(&self);
    /// IER
    fn enable_interrupts(&self, mask: u8);
}

/// 波特率分频 `pclk / (16 * bps)`，四舍五入
pub const fn baud_divisor(pclk_hz: u32, bps: u32) -> u16 {
    let div = 16 * bps;
    ((pclk_hz + div / 2) / div) as u16
}

/// UART 字符设备
///
/// `RX` / `TX` 为队列容量，至少 `MIN_QUEUE_SIZE`
pub struct Uart<H, const RX: usize, const TX: usize> {
    hw: H,
    scheduler: &'static SchedulerState,
    rx: CriticalChannel<u8, RX>,
    tx: CriticalChannel<u8, TX>,
    pclk_hz: AtomicU32,
    rx_watermark: Watermark,
    tx_watermark: Watermark,
    last_activity_ms: AtomicU64,
}

impl<H: UartHw, const RX: usize, const TX: usize> Uart<H, RX, TX> {
    pub const fn new(hw: H, scheduler: &'static SchedulerState) -> Self {
        assert!(RX >= MIN_QUEUE_SIZE && TX >= MIN_QUEUE_SIZE, "UART queues need at least 8 entries");
        Self {
            hw,
            scheduler,
            rx: CriticalChannel::new(),
            tx: CriticalChannel::new(),
            pclk_hz: AtomicU32::new(0),
            rx_watermark: Watermark::new(),
            tx_watermark: Watermark::new(),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    /// 配置 FIFO、波特率并打开 RX/TX/线路状态中断
    pub fn init(&self, pclk_hz: u32, bps: u32) {
        self.pclk_hz.store(pclk_hz, Ordering::Relaxed);
        self.hw.reset_fifos();
        self.set_baud(bps);
        self.hw.enable_interrupts(ier::RBR | ier::THRE | ier::RLS);
    }

    /// 重新装载分频锁存器
    pub fn set_baud(&self, bps: u32) {
        let pclk = self.pclk_hz.load(Ordering::Relaxed);
        self.hw.set_divisor(baud_divisor(pclk, bps));
    }

    // ===== 接收 =====

    /// 取一个字节，超时返回 `None`
    pub async fn get_char(&self, timeout: Timeout) -> Option<u8> {
        if !self.scheduler.is_running() {
            return self.get_char_polled(timeout);
        }
        maybe_timeout(timeout, self.rx.receive()).await
    }

    /// 以截止时间轮询 RX 队列
    pub fn get_char_polled(&self, timeout: Timeout) -> Option<u8> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Ok(byte) = self.rx.try_receive() {
                return Some(byte);
            }
            if deadline.is_some_and(|d| Instant::now() > d) {
                return None;
            }
            core::hint::spin_loop();
        }
    }

    /// 最近 `ms` 毫秒内是否收到过字节
    pub fn recently_active(&self, ms: u64) -> bool {
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        uptime_ms().saturating_sub(last) < ms
    }

    // ===== 发送 =====

    /// 放入一个字节，队列在超时内仍满时返回 `false`
    pub async fn put_char(&self, byte: u8, timeout: Timeout) -> bool {
        if !self.scheduler.is_running() {
            self.put_char_polled(byte);
            return true;
        }
        if maybe_timeout(timeout, self.tx.send(byte)).await.is_none() {
            return false;
        }
        self.kick_tx();
        true
    }

    /// 直接写 THR 并等待发送器空闲
    pub fn put_char_polled(&self, byte: u8) {
        self.hw.write_byte(byte);
        while self.hw.line_status() & lsr::TEMT == 0 {
            core::hint::spin_loop();
        }
    }

    /// 同步写字节 (控制台用)
    ///
    /// 调度器运行后在 `BUS_TIMEOUT_MS` 内等待队列空间，超时丢弃
    pub fn write_byte(&self, byte: u8) -> bool {
        if !self.scheduler.is_running() {
            self.put_char_polled(byte);
            return true;
        }
        let deadline = Instant::now() + Duration::from_millis(config::BUS_TIMEOUT_MS);
        while self.tx.try_send(byte).is_err() {
            self.kick_tx();
            if Instant::now() > deadline {
                return false;
            }
        }
        self.kick_tx();
        true
    }

    /// 发送器空闲时立即发出最早的字节，之后由 THRE 中断接力
    fn kick_tx(&self) {
        critical_section::with(|_| {
            if self.hw.line_status() & lsr::TEMT != 0 {
                if let Ok(byte) = self.tx.try_receive() {
                    self.hw.write_byte(byte);
                }
            }
        });
    }

    /// 等待 TX 队列清空
    pub async fn flush(&self) -> bool {
        if self.scheduler.is_running() {
            while !self.tx.is_empty() {
                Timer::after(Duration::from_millis(1)).await;
            }
        }
        true
    }

    // ===== 遥测 =====

    pub fn rx_watermark(&self) -> u32 {
        self.rx_watermark.get()
    }

    pub fn tx_watermark(&self) -> u32 {
        self.tx_watermark.get()
    }

    pub fn tx_queue_len(&self) -> usize {
        self.tx.len()
    }

    pub fn rx_queue_len(&self) -> usize {
        self.rx.len()
    }

    // ===== 中断 =====

    /// UART 中断处理
    ///
    /// 同时出现多个原因时只处理当前最高优先级的一个，其余原因会再次进入中断
    pub fn on_interrupt(&self) {
        match self.hw.interrupt_id() & iir::MASK {
            iir::THRE => {
                self.tx_watermark.observe(self.tx.len() as u32);
                for _ in 0..config::UART_FIFO_DEPTH {
                    match self.tx.try_receive() {
                        Ok(byte) => self.hw.write_byte(byte),
                        Err(_) => break,
                    }
                }
            }
            iir::RDA | iir::CTI => {
                self.last_activity_ms.store(uptime_ms(), Ordering::Relaxed);
                while self.hw.line_status() & lsr::RDR != 0 {
                    let byte = self.hw.read_byte();
                    let _ = self.rx.try_send(byte);
                }
                self.rx_watermark.observe(self.rx.len() as u32);
            }
            _ => {
                let _ = self.hw.line_status();
            }
        }
    }
}

impl<H: UartHw + Sync, const RX: usize, const TX: usize> ConsoleIo for Uart<H, RX, TX> {
    fn write_bytes(&self, bytes: &[u8]) {
        for &byte in bytes {
            if !self.write_byte(byte) {
                break;
            }
        }
    }

    fn read_byte(&self, timeout_ms: u32) -> Option<u8> {
        self.get_char_polled(Some(Duration::from_millis(u64::from(timeout_ms))))
    }
}

impl<H: UartHw, const RX: usize, const TX: usize> super::CharDev for Uart<H, RX, TX> {
    async fn put_char(&self, byte: u8, timeout: Timeout) -> bool {
        Uart::put_char(self, byte, timeout).await
    }

    async fn get_char(&self, timeout: Timeout) -> Option<u8> {
        Uart::get_char(self, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::CharDev;
    use embassy_futures::block_on;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::vec::Vec;

    /// 线路模型: `line_in` 是硬件接收 FIFO，`wire` 记录写入 THR 的字节
    struct MockUart {
        line_in: RefCell<VecDeque<u8>>,
        wire: RefCell<Vec<u8>>,
        iir: Cell<u8>,
        tx_idle: Cell<bool>,
        divisor: Cell<u16>,
        ier: Cell<u8>,
        lsr_reads: Cell<u32>,
    }

    impl MockUart {
        fn new() -> Self {
            Self {
                line_in: RefCell::new(VecDeque::new()),
                wire: RefCell::new(Vec::new()),
                iir: Cell::new(0x1),
                tx_idle: Cell::new(true),
                divisor: Cell::new(0),
                ier: Cell::new(0),
                lsr_reads: Cell::new(0),
            }
        }
    }

    impl UartHw for MockUart {
        fn interrupt_id(&self) -> u8 {
            self.iir.get()
        }

        fn line_status(&self) -> u8 {
            self.lsr_reads.set(self.lsr_reads.get() + 1);
            let mut lsr = 0;
            if !self.line_in.borrow().is_empty() {
                lsr |= lsr::RDR;
            }
            if self.tx_idle.get() {
                lsr |= lsr::THRE | lsr::TEMT;
            }
            lsr
        }

        fn read_byte(&self) -> u8 {
            self.line_in.borrow_mut().pop_front().unwrap_or(0)
        }

        fn write_byte(&self, byte: u8) {
            self.wire.borrow_mut().push(byte);
        }

        fn set_divisor(&self, divisor: u16) {
            self.divisor.set(divisor);
        }

        fn reset_fifos(&self) {}

        fn enable_interrupts(&self, mask: u8) {
            self.ier.set(mask);
        }
    }

    type TestUart = Uart<MockUart, 8, 32>;

    fn uart(sched: &'static SchedulerState) -> TestUart {
        let uart = Uart::new(MockUart::new(), sched);
        uart.init(48_000_000, 38_400);
        uart
    }

    #[test]
    fn test_init_programs_divisor_and_interrupts() {
        static SCHED: SchedulerState = SchedulerState::new();
        let uart = uart(&SCHED);
        assert_eq!(uart.hw().divisor.get(), 78);
        assert_eq!(uart.hw().ier.get(), ier::RBR | ier::THRE | ier::RLS);
        assert_eq!(baud_divisor(12_000_000, 115_200), 7);
    }

    #[test]
    fn test_rx_drains_hardware_even_when_queue_full() {
        static SCHED: SchedulerState = SchedulerState::new();
        let uart = uart(&SCHED);
        uart.hw().line_in.borrow_mut().extend(0u8..12);
        uart.hw().iir.set(iir::RDA);
        uart.on_interrupt();

        assert!(uart.hw().line_in.borrow().is_empty());
        assert_eq!(uart.rx_queue_len(), 8);
        assert_eq!(uart.rx_watermark(), 8);
        for expected in 0u8..8 {
            assert_eq!(uart.get_char_polled(None), Some(expected));
        }
        assert_eq!(uart.get_char_polled(Some(Duration::from_millis(2))), None);
        assert!(uart.recently_active(1000));
    }

    #[test]
    fn test_thre_drains_fifo_depth_per_interrupt() {
        static SCHED: SchedulerState = SchedulerState::new();
        SCHED.mark_running();
        let uart = uart(&SCHED);
        uart.hw().tx_idle.set(false);

        block_on(async {
            for byte in 0u8..20 {
                assert!(uart.put_char(byte, None).await);
            }
        });
        assert!(uart.hw().wire.borrow().is_empty());

        uart.hw().iir.set(iir::THRE);
        uart.on_interrupt();
        assert_eq!(uart.hw().wire.borrow().len(), 16);
        uart.on_interrupt();
        assert_eq!(*uart.hw().wire.borrow(), (0u8..20).collect::<Vec<_>>());
        assert_eq!(uart.tx_watermark(), 20);
    }

    #[test]
    fn test_put_fast_path_when_transmitter_idle() {
        static SCHED: SchedulerState = SchedulerState::new();
        SCHED.mark_running();
        let uart = uart(&SCHED);
        assert!(block_on(uart.put_char(b'x', None)));
        assert_eq!(*uart.hw().wire.borrow(), b"x");
        assert_eq!(uart.tx_queue_len(), 0);
    }

    #[test]
    fn test_put_times_out_on_full_queue() {
        static SCHED: SchedulerState = SchedulerState::new();
        SCHED.mark_running();
        let uart: Uart<MockUart, 8, 8> = Uart::new(MockUart::new(), &SCHED);
        uart.hw().tx_idle.set(false);
        block_on(async {
            for byte in 0u8..8 {
                assert!(uart.put_char(byte, Some(Duration::from_millis(5))).await);
            }
            assert!(!uart.put_char(9, Some(Duration::from_millis(5))).await);
        });
    }

    #[test]
    fn test_polled_put_before_scheduler() {
        static SCHED: SchedulerState = SchedulerState::new();
        let uart = uart(&SCHED);
        for &byte in b"boot" {
            assert!(uart.write_byte(byte));
        }
        assert_eq!(*uart.hw().wire.borrow(), b"boot");
    }

    #[test]
    fn test_line_status_cause_reads_lsr() {
        static SCHED: SchedulerState = SchedulerState::new();
        let uart = uart(&SCHED);
        uart.hw().iir.set(iir::RLS);
        let before = uart.hw().lsr_reads.get();
        uart.on_interrupt();
        assert_eq!(uart.hw().lsr_reads.get(), before + 1);
    }

    #[test]
    fn test_char_dev_line_helpers() {
        static SCHED: SchedulerState = SchedulerState::new();
        let uart = uart(&SCHED);
        assert!(block_on(uart.putline("hello", None)));
        assert_eq!(*uart.hw().wire.borrow(), b"hello\r\n");

        uart.hw().line_in.borrow_mut().extend(b"ab\r\ncd".iter().copied());
        uart.hw().iir.set(iir::RDA);
        uart.on_interrupt();
        let mut buf = [0u8; 16];
        let (len, complete) = block_on(uart.gets(&mut buf, Some(Duration::from_millis(2))));
        assert!(complete);
        assert_eq!(&buf[..len], b"ab");
    }
}
