//! 中断驱动的 I2C 主机
//!
//! 一个总线同一时刻只有一个事务。事务记录在发起后由中断状态机独占，
//! 状态机每收到一次 SI 推进一步，结束时置位完成信号:
//!
//! ```text
//! 写:         Start -> AddrAckW -> (DataAckW)* -> Stop
//! 写后读:     Start -> AddrAckW -> (DataAckW)* -> RepeatStart -> AddrAckR
//!             -> (DataAckR)* -> DataNackR -> Stop
//! 探测 (0 字节): Start -> AddrAckW -> Stop
//! ```
//!
//! 地址使用 8 位形式，最低位为方向位 (1 = 读)。
//!
//! 调度器运行前 `transfer` 以绝对截止时间轮询状态机；运行后先在超时内获取
//! 总线互斥锁，清除遗留完成信号，发起事务并以同一超时等待完成。
//!
//! 超时或 `disable_operation` 时事务被放弃：记录当时的 I2STAT，发送停止条件
//! 并经 I2EN 复位控制器。之后迟到的 SI 只会释放总线，不会再推进旧事务。

use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use embassy_time::{Duration, Instant};
use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource, Operation};
use heapless::Vec;
use portable_atomic::{AtomicU8, Ordering};

use crate::config;
use crate::sync::primitives::{maybe_timeout, AtomicFlag, Completion, CriticalMutex, SchedulerState};
use crate::{log_error, log_warn};

/// 单个事务的最大写/读长度
pub const MAX_TRANSFER: usize = 64;

/// `last_error` 中表示成功的值 (I2STAT 只会是 8 的倍数)
const NO_ERROR: u8 = 0xFF;

/// I2CONSET / I2CONCLR 位
pub mod control {
    /// 应答
    pub const AA: u8 = 1 << 2;
    /// 中断标志
    pub const SI: u8 = 1 << 3;
    /// 停止条件
    pub const STO: u8 = 1 << 4;
    /// 起始条件
    pub const STA: u8 = 1 << 5;
    /// 使能
    pub const I2EN: u8 = 1 << 6;
    /// 初始化时清除的全部标志
    pub const CLEAR_ALL: u8 = AA | SI | STA | I2EN;
}

/// I2STAT 状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BusState {
    BusError = 0x00,
    Start = 0x08,
    RepeatStart = 0x10,
    AddrAckW = 0x18,
    AddrNackW = 0x20,
    DataAckW = 0x28,
    DataNackW = 0x30,
    ArbLost = 0x38,
    AddrAckR = 0x40,
    AddrNackR = 0x48,
    DataAckR = 0x50,
    DataNackR = 0x58,
}

impl BusState {
    pub const fn from_status(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => Self::BusError,
            0x08 => Self::Start,
            0x10 => Self::RepeatStart,
            0x18 => Self::AddrAckW,
            0x20 => Self::AddrNackW,
            0x28 => Self::DataAckW,
            0x30 => Self::DataNackW,
            0x38 => Self::ArbLost,
            0x40 => Self::AddrAckR,
            0x48 => Self::AddrNackR,
            0x50 => Self::DataAckR,
            0x58 => Self::DataNackR,
            _ => return None,
        })
    }
}

/// I2C 控制器寄存器接口
pub trait I2cHw {
    /// I2STAT
    fn status(&self) -> u8;
    /// 读 I2CONSET
    fn control(&self) -> u8;
    /// 写 I2CONSET
    fn set_control(&self, bits: u8);
    /// 写 I2CONCLR
    fn clear_control(&self, bits: u8);
    /// 读 I2DAT
    fn read_data(&self) -> u8;
    /// 写 I2DAT
    fn write_data(&self, byte: u8);
    /// I2SCLH / I2SCLL
    fn set_clock_dividers(&self, high: u32, low: u32);
    /// 清零从机地址寄存器 ADR0..3
    fn clear_slave_addresses(&self);
    /// SDA 与 SCL 是否都被上拉为高电平
    fn lines_high(&self) -> bool;
}

/// I2C 错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cError {
    /// 总线已被 `disable_operation` 永久禁用
    Disabled,
    /// 超过 `MAX_TRANSFER`
    TooLong,
    /// 互斥锁或事务完成超时
    Timeout,
    /// 操作序列中读之后还有写
    Unsupported,
    /// 总线状态错误 (I2STAT)
    Bus(u8),
}

impl fmt::Display for I2cError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "I2C bus disabled"),
            Self::TooLong => write!(f, "I2C transfer exceeds {} bytes", MAX_TRANSFER),
            Self::Timeout => write!(f, "I2C transfer timed out"),
            Self::Unsupported => write!(f, "I2C operation sequence not supported"),
            Self::Bus(code) => write!(f, "I2C bus status 0x{:02X}", code),
        }
    }
}

impl embedded_hal::i2c::Error for I2cError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Bus(code) => match BusState::from_status(*code) {
                Some(BusState::AddrNackW | BusState::AddrNackR) => {
                    ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
                }
                Some(BusState::DataNackW) => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
                Some(BusState::ArbLost) => ErrorKind::ArbitrationLoss,
                Some(BusState::BusError) => ErrorKind::Bus,
                _ => ErrorKind::Other,
            },
            _ => ErrorKind::Other,
        }
    }
}

/// 状态机单步结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Busy,
    Done,
}

/// 进行中的事务 (发起后由中断独占)
struct Transaction {
    /// 8 位地址，最低位为方向
    addr: u8,
    write: Vec<u8, MAX_TRANSFER>,
    written: usize,
    read: Vec<u8, MAX_TRANSFER>,
    read_len: usize,
    /// 失败时的 I2STAT
    error: Option<u8>,
    /// 已发起且尚未结束
    active: bool,
}

impl Transaction {
    const fn new() -> Self {
        Self {
            addr: 0,
            write: Vec::new(),
            written: 0,
            read: Vec::new(),
            read_len: 0,
            error: None,
            active: false,
        }
    }

    #[inline]
    fn is_read(&self) -> bool {
        self.addr & 1 != 0
    }

    #[inline]
    fn read_remaining(&self) -> usize {
        self.read_len.saturating_sub(self.read.len())
    }
}

/// 40% 高电平 / 60% 低电平的 SCL 分频
///
/// 超过 1000kHz 的请求按 100kHz 处理
pub const fn clock_dividers(pclk_hz: u32, bus_khz: u32) -> (u32, u32) {
    const PERCENT_HIGH: u32 = 40;
    const PERCENT_LOW: u32 = 100 - PERCENT_HIGH;
    let freq_hz = if bus_khz > 1000 { 100 * 1000 } else { bus_khz * 1000 };
    let half = (pclk_hz / freq_hz) / 2;
    (half * PERCENT_HIGH / 100, half * PERCENT_LOW / 100)
}

/// I2C 主机总线
pub struct I2cBus<H> {
    hw: H,
    scheduler: &'static SchedulerState,
    timeout: Duration,
    disabled: AtomicFlag,
    last_error: AtomicU8,
    transaction: Mutex<RefCell<Transaction>>,
    done: Completion,
    lock: CriticalMutex<()>,
}

impl<H: I2cHw> I2cBus<H> {
    pub const fn new(hw: H, scheduler: &'static SchedulerState) -> Self {
        Self {
            hw,
            scheduler,
            timeout: Duration::from_millis(config::BUS_TIMEOUT_MS),
            disabled: AtomicFlag::new(),
            last_error: AtomicU8::new(NO_ERROR),
            transaction: Mutex::new(RefCell::new(Transaction::new())),
            done: Completion::new(),
            lock: CriticalMutex::new(()),
        }
    }

    /// 自定义事务超时 (同时用于互斥锁获取与完成等待)
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    /// 初始化控制器
    ///
    /// SDA/SCL 未被上拉时总线被永久禁用并返回 `false`
    pub fn init(&self, pclk_hz: u32, bus_khz: u32) -> bool {
        if self.is_disabled() {
            return false;
        }
        if !self.hw.lines_high() {
            log_error!("I2C SDA/SCL not pulled high, bus disabled");
            self.disable_operation();
            return false;
        }

        self.hw.clear_control(control::CLEAR_ALL);
        let (high, low) = clock_dividers(pclk_hz, bus_khz);
        self.hw.set_clock_dividers(high, low);
        self.hw.clear_slave_addresses();
        self.hw.set_control(control::I2EN);
        true
    }

    /// 永久禁用总线 (不可恢复)
    ///
    /// 进行中的事务被放弃，等待它的任务以 `Disabled` 返回
    pub fn disable_operation(&self) {
        if self.disabled.test_and_set() {
            return;
        }
        if self.abort(false) {
            self.done.complete();
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.is_set()
    }

    /// 最近一次事务失败时的 I2STAT，成功为 `None`
    pub fn last_error(&self) -> Option<u8> {
        match self.last_error.load(Ordering::Relaxed) {
            NO_ERROR => None,
            code => Some(code),
        }
    }

    // ===== 中断 =====

    /// I2C 中断处理，SI 未置位时直接返回
    pub fn on_interrupt(&self) {
        let finished = critical_section::with(|cs| {
            if self.hw.control() & control::SI == 0 {
                return false;
            }
            let mut trx = self.transaction.borrow_ref_mut(cs);
            if !trx.active {
                // 已放弃的事务，只释放总线
                self.stop();
                return false;
            }
            let done = self.step(&mut trx) == Step::Done;
            if done {
                trx.active = false;
            }
            done
        });
        if finished {
            self.done.complete();
        }
    }

    fn step(&self, trx: &mut Transaction) -> Step {
        let status = self.hw.status();
        let Some(state) = BusState::from_status(status) else {
            trx.error = Some(status);
            return self.stop();
        };

        match state {
            BusState::Start => {
                // 没有前导写字节时直接发读地址
                let addr = if trx.is_read() && trx.write.is_empty() {
                    trx.addr | 1
                } else {
                    trx.addr & 0xFE
                };
                self.hw.write_data(addr);
                self.clear_si();
                Step::Busy
            }
            BusState::RepeatStart => {
                self.hw.write_data(trx.addr | 1);
                self.clear_si();
                Step::Busy
            }
            BusState::AddrAckW | BusState::DataAckW => {
                self.hw.clear_control(control::STA);
                if let Some(&byte) = trx.write.get(trx.written) {
                    trx.written += 1;
                    self.hw.write_data(byte);
                    self.clear_si();
                    Step::Busy
                } else if trx.is_read() {
                    self.hw.set_control(control::STA);
                    self.clear_si();
                    Step::Busy
                } else {
                    self.stop()
                }
            }
            BusState::AddrAckR => {
                self.hw.clear_control(control::STA);
                self.arm_ack(trx.read_len > 1);
                self.clear_si();
                Step::Busy
            }
            BusState::DataAckR => {
                let _ = trx.read.push(self.hw.read_data());
                self.arm_ack(trx.read_remaining() > 1);
                self.clear_si();
                Step::Busy
            }
            BusState::DataNackR => {
                let _ = trx.read.push(self.hw.read_data());
                self.stop()
            }
            BusState::ArbLost => {
                // 总线已释放，不发送停止条件
                trx.error = Some(status);
                self.hw.clear_control(control::STA);
                self.clear_si();
                Step::Done
            }
            BusState::AddrNackW | BusState::DataNackW | BusState::AddrNackR | BusState::BusError => {
                trx.error = Some(status);
                self.stop()
            }
        }
    }

    #[inline]
    fn clear_si(&self) {
        self.hw.clear_control(control::SI);
    }

    #[inline]
    fn arm_ack(&self, ack: bool) {
        if ack {
            self.hw.set_control(control::AA);
        } else {
            self.hw.clear_control(control::AA);
        }
    }

    fn stop(&self) -> Step {
        self.hw.clear_control(control::STA);
        self.hw.set_control(control::STO);
        self.clear_si();
        while self.hw.control() & control::STO != 0 {
            core::hint::spin_loop();
        }
        Step::Done
    }

    /// 放弃进行中的事务
    ///
    /// 不等待 STO 自清 (卡死的从机可能永远不放开 SCL)，直接关闭 I2EN 复位
    /// 控制器。`reenable` 为 `false` 时控制器保持关闭。事务已经结束时什么也
    /// 不做并返回 `false`。
    fn abort(&self, reenable: bool) -> bool {
        let status = critical_section::with(|cs| {
            let mut trx = self.transaction.borrow_ref_mut(cs);
            if !trx.active {
                return None;
            }
            let status = self.hw.status();
            trx.active = false;
            trx.error = Some(status);

            self.hw.set_control(control::STO);
            self.hw.clear_control(control::STA | control::AA | control::SI);
            self.hw.clear_control(control::I2EN);
            if reenable {
                self.hw.set_control(control::I2EN);
            }
            Some(status)
        });

        match status {
            Some(code) => {
                self.last_error.store(code, Ordering::Relaxed);
                log_warn!("I2C transaction abandoned at status {}", code);
                true
            }
            None => false,
        }
    }

    // ===== 事务 =====

    fn kick_off(&self, addr: u8, write: &[u8], read_len: usize) -> Result<(), I2cError> {
        if self.is_disabled() {
            return Err(I2cError::Disabled);
        }
        if write.len() > MAX_TRANSFER || read_len > MAX_TRANSFER {
            return Err(I2cError::TooLong);
        }

        critical_section::with(|cs| {
            let mut trx = self.transaction.borrow_ref_mut(cs);
            trx.addr = if read_len > 0 { addr | 1 } else { addr & 0xFE };
            trx.write.clear();
            let _ = trx.write.extend_from_slice(write);
            trx.written = 0;
            trx.read.clear();
            trx.read_len = read_len;
            trx.error = None;
            trx.active = true;
        });

        self.hw.set_control(control::STA);
        Ok(())
    }

    fn finish(&self, read: &mut [u8]) -> Result<(), I2cError> {
        let error = critical_section::with(|cs| {
            let trx = self.transaction.borrow_ref(cs);
            let n = trx.read.len().min(read.len());
            read[..n].copy_from_slice(&trx.read[..n]);
            trx.error
        });
        self.last_error.store(error.unwrap_or(NO_ERROR), Ordering::Relaxed);
        match error {
            None => Ok(()),
            Some(code) => Err(I2cError::Bus(code)),
        }
    }

    /// 轮询方式执行事务 (调度器运行前，或阻塞式 embedded-hal 接口)
    pub fn transfer_blocking(&self, addr: u8, write: &[u8], read: &mut [u8]) -> Result<(), I2cError> {
        self.done.reset();
        self.kick_off(addr, write, read.len())?;

        let deadline = Instant::now() + self.timeout;
        loop {
            self.on_interrupt();
            if self.done.take() {
                break;
            }
            if Instant::now() > deadline {
                if self.abort(true) {
                    log_warn!("I2C polled transfer to {} timed out", addr);
                    return Err(I2cError::Timeout);
                }
                // 截止前一刻刚好结束
                break;
            }
        }
        if self.is_disabled() {
            return Err(I2cError::Disabled);
        }
        self.finish(read)
    }

    /// 调度器感知的事务
    ///
    /// 调度器运行前退化为 `transfer_blocking`
    pub async fn transfer(&self, addr: u8, write: &[u8], read: &mut [u8]) -> Result<(), I2cError> {
        if !self.scheduler.is_running() {
            return self.transfer_blocking(addr, write, read);
        }
        if self.is_disabled() {
            return Err(I2cError::Disabled);
        }

        let Some(_guard) = maybe_timeout(Some(self.timeout), self.lock.lock()).await else {
            return Err(I2cError::Timeout);
        };

        self.done.reset();
        self.kick_off(addr, write, read.len())?;
        let completed = self.done.wait(Some(self.timeout)).await;
        if self.is_disabled() {
            return Err(I2cError::Disabled);
        }
        if !completed && self.abort(true) {
            log_warn!("I2C transfer to {} timed out", addr);
            return Err(I2cError::Timeout);
        }
        self.finish(read)
    }

    // ===== 寄存器读写辅助 =====

    fn reg_frame(first_reg: u8, data: &[u8]) -> Option<Vec<u8, MAX_TRANSFER>> {
        let mut frame = Vec::new();
        frame.push(first_reg).ok()?;
        frame.extend_from_slice(data).ok()?;
        Some(frame)
    }

    /// 读单个寄存器，失败返回 0
    pub async fn read_reg(&self, dev: u8, reg: u8) -> u8 {
        let mut byte = [0u8; 1];
        let _ = self.read_regs(dev, reg, &mut byte).await;
        byte[0]
    }

    pub async fn write_reg(&self, dev: u8, reg: u8, value: u8) -> bool {
        self.write_regs(dev, reg, &[value]).await
    }

    /// 从 `first_reg` 开始连续读取 (写后读)
    pub async fn read_regs(&self, dev: u8, first_reg: u8, buf: &mut [u8]) -> bool {
        self.transfer(dev | 1, &[first_reg], buf).await.is_ok()
    }

    /// 从 `first_reg` 开始连续写入
    pub async fn write_regs(&self, dev: u8, first_reg: u8, data: &[u8]) -> bool {
        match Self::reg_frame(first_reg, data) {
            Some(frame) => self.transfer(dev & 0xFE, &frame, &mut []).await.is_ok(),
            None => false,
        }
    }

    /// 设备是否应答 (只发地址)
    pub async fn probe(&self, dev: u8) -> bool {
        self.transfer(dev & 0xFE, &[], &mut []).await.is_ok()
    }

    pub fn read_reg_blocking(&self, dev: u8, reg: u8) -> u8 {
        let mut byte = [0u8; 1];
        let _ = self.read_regs_blocking(dev, reg, &mut byte);
        byte[0]
    }

    pub fn write_reg_blocking(&self, dev: u8, reg: u8, value: u8) -> bool {
        self.write_regs_blocking(dev, reg, &[value])
    }

    pub fn read_regs_blocking(&self, dev: u8, first_reg: u8, buf: &mut [u8]) -> bool {
        self.transfer_blocking(dev | 1, &[first_reg], buf).is_ok()
    }

    pub fn write_regs_blocking(&self, dev: u8, first_reg: u8, data: &[u8]) -> bool {
        match Self::reg_frame(first_reg, data) {
            Some(frame) => self.transfer_blocking(dev & 0xFE, &frame, &mut []).is_ok(),
            None => false,
        }
    }

    pub fn probe_blocking(&self, dev: u8) -> bool {
        self.transfer_blocking(dev & 0xFE, &[], &mut []).is_ok()
    }
}

// ===== embedded-hal =====

/// 把 "若干写 + 若干读" 的操作序列合并成一次写后读事务
fn gather_writes(operations: &[Operation<'_>]) -> Result<(Vec<u8, MAX_TRANSFER>, usize), I2cError> {
    let mut write = Vec::new();
    let mut read_len = 0usize;
    for op in operations {
        match op {
            Operation::Write(bytes) => {
                if read_len > 0 {
                    return Err(I2cError::Unsupported);
                }
                write.extend_from_slice(bytes).map_err(|_| I2cError::TooLong)?;
            }
            Operation::Read(buf) => read_len += buf.len(),
        }
    }
    if read_len > MAX_TRANSFER {
        return Err(I2cError::TooLong);
    }
    Ok((write, read_len))
}

fn scatter_reads(operations: &mut [Operation<'_>], data: &[u8]) {
    let mut offset = 0;
    for op in operations {
        if let Operation::Read(buf) = op {
            let n = buf.len();
            buf.copy_from_slice(&data[offset..offset + n]);
            offset += n;
        }
    }
}

impl<H: I2cHw> embedded_hal::i2c::ErrorType for I2cBus<H> {
    type Error = I2cError;
}

impl<H: I2cHw> embedded_hal::i2c::I2c for I2cBus<H> {
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        let (write, read_len) = gather_writes(operations)?;
        let mut read = [0u8; MAX_TRANSFER];
        self.transfer_blocking(address << 1, &write, &mut read[..read_len])?;
        scatter_reads(operations, &read[..read_len]);
        Ok(())
    }
}

impl<H: I2cHw> embedded_hal_async::i2c::I2c for I2cBus<H> {
    async fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        let (write, read_len) = gather_writes(operations)?;
        let mut read = [0u8; MAX_TRANSFER];
        self.transfer(address << 1, &write, &mut read[..read_len]).await?;
        scatter_reads(operations, &read[..read_len]);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use embassy_futures::select::{select, Either};
    use embassy_futures::{block_on, yield_now};
    use std::cell::Cell;
    use std::vec::Vec as StdVec;

    /// 控制器 + 单个寄存器型从机的总线模型
    ///
    /// 清 SI 时根据上一个状态和控制位计算下一个状态
    pub struct MockI2c {
        pub slave_addr: Cell<Option<u8>>,
        pub regs: Cell<[u8; 256]>,
        pointer: Cell<u8>,
        expect_pointer: Cell<bool>,
        status: Cell<u8>,
        conset: Cell<u8>,
        dat: Cell<u8>,
        pub lose_arbitration: Cell<bool>,
        pub stuck: Cell<bool>,
        /// 从机拉住 SCL：清 SI 后状态不再前进
        pub hold_clock: Cell<bool>,
        pub lines_high: Cell<bool>,
        pub dividers: Cell<(u32, u32)>,
        /// 依次经过的状态码
        pub trace: std::cell::RefCell<StdVec<u8>>,
        pub stops: Cell<u32>,
        /// 经 I2EN 复位的次数 (init 也算一次)
        pub resets: Cell<u32>,
    }

    impl MockI2c {
        pub fn new(slave_addr: Option<u8>) -> Self {
            Self {
                slave_addr: Cell::new(slave_addr),
                regs: Cell::new([0; 256]),
                pointer: Cell::new(0),
                expect_pointer: Cell::new(false),
                status: Cell::new(0xF8),
                conset: Cell::new(0),
                dat: Cell::new(0),
                lose_arbitration: Cell::new(false),
                stuck: Cell::new(false),
                hold_clock: Cell::new(false),
                lines_high: Cell::new(true),
                dividers: Cell::new((0, 0)),
                trace: std::cell::RefCell::new(StdVec::new()),
                stops: Cell::new(0),
                resets: Cell::new(0),
            }
        }

        /// 控制器是否回到空闲
        pub fn is_idle(&self) -> bool {
            self.status.get() == 0xF8 && self.conset.get() & (control::SI | control::STO) == 0
        }

        pub fn enter(&self, status: u8) {
            self.status.set(status);
            self.trace.borrow_mut().push(status);
            self.conset.set(self.conset.get() | control::SI);
        }

        fn advance(&self) {
            let con = self.conset.get();
            if con & control::STO != 0 {
                self.conset.set(con & !(control::STO | control::SI));
                self.status.set(0xF8);
                self.stops.set(self.stops.get() + 1);
                return;
            }

            match self.status.get() {
                0x08 | 0x10 => {
                    let byte = self.dat.get();
                    let read = byte & 1 != 0;
                    let acked = self.slave_addr.get() == Some(byte & 0xFE);
                    self.expect_pointer.set(!read);
                    self.enter(match (acked, read) {
                        (true, false) => 0x18,
                        (false, false) => 0x20,
                        (true, true) => 0x40,
                        (false, true) => 0x48,
                    });
                }
                0x18 | 0x28 if con & control::STA != 0 => self.enter(0x10),
                0x18 | 0x28 => {
                    let byte = self.dat.get();
                    if self.expect_pointer.replace(false) {
                        self.pointer.set(byte);
                    } else {
                        let mut regs = self.regs.get();
                        regs[self.pointer.get() as usize] = byte;
                        self.regs.set(regs);
                        self.pointer.set(self.pointer.get().wrapping_add(1));
                    }
                    self.enter(0x28);
                }
                0x40 | 0x50 => {
                    self.dat.set(self.regs.get()[self.pointer.get() as usize]);
                    self.pointer.set(self.pointer.get().wrapping_add(1));
                    self.enter(if con & control::AA != 0 { 0x50 } else { 0x58 });
                }
                _ => self.conset.set(con & !control::SI),
            }
        }
    }

    impl I2cHw for MockI2c {
        fn status(&self) -> u8 {
            self.status.get()
        }

        fn control(&self) -> u8 {
            self.conset.get()
        }

        fn set_control(&self, bits: u8) {
            let before = self.conset.get();
            self.conset.set(before | bits);
            let idle = self.status.get() == 0xF8;
            if bits & control::STA != 0 && idle && !self.stuck.get() {
                self.enter(if self.lose_arbitration.get() { 0x38 } else { 0x08 });
            }
        }

        fn clear_control(&self, bits: u8) {
            let before = self.conset.get();
            if bits & control::I2EN != 0 {
                // 关闭控制器会清空全部标志与状态
                self.conset.set(0);
                self.status.set(0xF8);
                self.resets.set(self.resets.get() + 1);
                return;
            }
            self.conset.set(before & !bits);
            if bits & control::SI != 0 && before & control::SI != 0 {
                if self.hold_clock.get() {
                    return;
                }
                if self.status.get() == 0x38 {
                    self.status.set(0xF8);
                    return;
                }
                // STO 之后的释放由 advance 处理
                self.conset.set(self.conset.get() | (before & control::STO));
                self.advance();
            }
        }

        fn read_data(&self) -> u8 {
            self.dat.get()
        }

        fn write_data(&self, byte: u8) {
            self.dat.set(byte);
        }

        fn set_clock_dividers(&self, high: u32, low: u32) {
            self.dividers.set((high, low));
        }

        fn clear_slave_addresses(&self) {}

        fn lines_high(&self) -> bool {
            self.lines_high.get()
        }
    }

    fn bus(slave: Option<u8>, sched: &'static SchedulerState) -> I2cBus<MockI2c> {
        let bus = I2cBus::new(MockI2c::new(slave), sched);
        assert!(bus.init(12_000_000, 100));
        bus
    }

    /// 在任务上下文运行 future，同时模拟中断
    fn run_with_isr<F: core::future::Future>(bus: &I2cBus<MockI2c>, fut: F) -> F::Output {
        block_on(async {
            match select(fut, async {
                loop {
                    bus.on_interrupt();
                    yield_now().await;
                }
            })
            .await
            {
                Either::First(out) => out,
                Either::Second(()) => unreachable!(),
            }
        })
    }

    #[test]
    fn test_probe_present_and_absent() {
        static SCHED: SchedulerState = SchedulerState::new();
        let present = bus(Some(0x38), &SCHED);
        assert!(present.probe_blocking(0x38));
        assert_eq!(*present.hw().trace.borrow(), [0x08, 0x18]);
        assert_eq!(present.hw().stops.get(), 1);

        let absent = bus(None, &SCHED);
        let start = Instant::now();
        assert!(!absent.probe_blocking(0x38));
        assert!(start.elapsed() < Duration::from_millis(1000));
        assert_eq!(absent.last_error(), Some(BusState::AddrNackW as u8));
    }

    #[test]
    fn test_write_then_read_register() {
        static SCHED: SchedulerState = SchedulerState::new();
        SCHED.mark_running();
        let bus = bus(Some(0x40), &SCHED);

        assert!(run_with_isr(&bus, bus.write_reg(0x40, 0x02, 0xA5)));
        assert_eq!(run_with_isr(&bus, bus.read_reg(0x40, 0x02)), 0xA5);
    }

    #[test]
    fn test_one_byte_read_nacks_immediately() {
        static SCHED: SchedulerState = SchedulerState::new();
        let bus = bus(Some(0x40), &SCHED);
        let mut regs = [0u8; 256];
        regs[7] = 0x5A;
        bus.hw().regs.set(regs);

        assert_eq!(bus.read_reg_blocking(0x40, 7), 0x5A);
        assert_eq!(*bus.hw().trace.borrow(), [0x08, 0x18, 0x28, 0x10, 0x40, 0x58]);
    }

    #[test]
    fn test_multi_byte_round_trip() {
        static SCHED: SchedulerState = SchedulerState::new();
        let bus = bus(Some(0x40), &SCHED);
        let data = [1u8, 2, 3, 4, 5];
        assert!(bus.write_regs_blocking(0x40, 0x10, &data));

        bus.hw().trace.borrow_mut().clear();
        let mut back = [0u8; 5];
        assert!(bus.read_regs_blocking(0x40, 0x10, &mut back));
        assert_eq!(back, data);
        assert_eq!(
            *bus.hw().trace.borrow(),
            [0x08, 0x18, 0x28, 0x10, 0x40, 0x50, 0x50, 0x50, 0x50, 0x58]
        );
    }

    #[test]
    fn test_arbitration_lost_without_stop() {
        static SCHED: SchedulerState = SchedulerState::new();
        let bus = bus(Some(0x40), &SCHED);
        bus.hw().lose_arbitration.set(true);
        assert!(!bus.write_reg_blocking(0x40, 0, 1));
        assert_eq!(bus.last_error(), Some(BusState::ArbLost as u8));
        assert_eq!(bus.hw().stops.get(), 0);
    }

    #[test]
    fn test_polled_timeout() {
        static SCHED: SchedulerState = SchedulerState::new();
        let bus = I2cBus::new(MockI2c::new(Some(0x40)), &SCHED).with_timeout(Duration::from_millis(20));
        assert!(bus.init(12_000_000, 100));
        bus.hw().stuck.set(true);
        assert_eq!(bus.transfer_blocking(0x40, &[0], &mut []), Err(I2cError::Timeout));
    }

    #[test]
    fn test_async_timeout_releases_bus() {
        static SCHED: SchedulerState = SchedulerState::new();
        SCHED.mark_running();
        let bus = I2cBus::new(MockI2c::new(Some(0x40)), &SCHED).with_timeout(Duration::from_millis(20));
        assert!(bus.init(12_000_000, 100));
        let resets_after_init = bus.hw().resets.get();

        // 地址发出后从机一直拉住时钟
        bus.hw().hold_clock.set(true);
        assert!(!run_with_isr(&bus, bus.write_reg(0x40, 0x01, 0x77)));
        assert_eq!(bus.last_error(), Some(BusState::Start as u8));
        assert_eq!(bus.hw().resets.get(), resets_after_init + 1);
        assert!(bus.hw().is_idle());

        // 旧事务迟到的 SI 只释放总线，不置位完成信号
        bus.hw().hold_clock.set(false);
        bus.hw().enter(BusState::DataAckW as u8);
        bus.on_interrupt();
        assert!(!bus.done.is_complete());
        assert!(bus.hw().is_idle());
        assert_eq!(bus.hw().regs.get()[0x01], 0);

        // 下一个事务正常完成
        assert!(run_with_isr(&bus, bus.write_reg(0x40, 0x01, 0x77)));
        assert_eq!(bus.last_error(), None);
        assert_eq!(bus.hw().regs.get()[0x01], 0x77);
    }

    #[test]
    fn test_polled_timeout_abandons_transaction() {
        static SCHED: SchedulerState = SchedulerState::new();
        let bus = I2cBus::new(MockI2c::new(Some(0x40)), &SCHED).with_timeout(Duration::from_millis(20));
        assert!(bus.init(12_000_000, 100));
        bus.hw().hold_clock.set(true);

        assert!(!bus.probe_blocking(0x40));
        assert_eq!(bus.last_error(), Some(BusState::Start as u8));
        assert!(bus.hw().is_idle());

        bus.hw().hold_clock.set(false);
        assert!(bus.probe_blocking(0x40));
        assert_eq!(bus.last_error(), None);
    }

    #[test]
    fn test_disable_during_transfer() {
        static SCHED: SchedulerState = SchedulerState::new();
        SCHED.mark_running();
        let bus = bus(Some(0x40), &SCHED);
        bus.hw().hold_clock.set(true);

        let result = block_on(async {
            let (result, ()) = embassy_futures::join::join(bus.transfer(0x40, &[0x01, 0x02], &mut []), async {
                for _ in 0..3 {
                    bus.on_interrupt();
                    yield_now().await;
                }
                bus.disable_operation();
            })
            .await;
            result
        });

        assert_eq!(result, Err(I2cError::Disabled));
        assert!(bus.is_disabled());
        // 控制器保持关闭，后续事务立即失败
        assert!(bus.hw().is_idle());
        bus.hw().hold_clock.set(false);
        assert!(!bus.probe_blocking(0x40));
        assert_eq!(run_with_isr(&bus, bus.transfer(0x40, &[0], &mut [])), Err(I2cError::Disabled));
    }

    #[test]
    fn test_extra_read_byte_does_not_underflow() {
        let mut trx = Transaction::new();
        trx.read_len = 1;
        trx.read.push(0x11).unwrap();
        trx.read.push(0x22).unwrap();
        assert_eq!(trx.read_remaining(), 0);
    }

    #[test]
    fn test_clock_split_and_clamp() {
        assert_eq!(clock_dividers(12_000_000, 100), (24, 36));
        assert_eq!(clock_dividers(12_000_000, 5000), clock_dividers(12_000_000, 100));
    }

    #[test]
    fn test_disabled_when_lines_low() {
        static SCHED: SchedulerState = SchedulerState::new();
        let mock = MockI2c::new(Some(0x40));
        mock.lines_high.set(false);
        let bus = I2cBus::new(mock, &SCHED);
        assert!(!bus.init(12_000_000, 100));
        assert!(bus.is_disabled());

        bus.hw().lines_high.set(true);
        assert!(!bus.init(12_000_000, 100));
        assert!(!bus.probe_blocking(0x40));
    }

    #[test]
    fn test_embedded_hal_write_read() {
        use embedded_hal::i2c::I2c;
        static SCHED: SchedulerState = SchedulerState::new();
        let mut bus = bus(Some(0x40), &SCHED);
        bus.write(0x20, &[0x03, 0x11, 0x22]).unwrap();
        let mut out = [0u8; 2];
        bus.write_read(0x20, &[0x03], &mut out).unwrap();
        assert_eq!(out, [0x11, 0x22]);

        let err = bus.write(0x21, &[0]).unwrap_err();
        assert_eq!(
            embedded_hal::i2c::Error::kind(&err),
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
        );
    }
}
