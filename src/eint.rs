//! 外部中断复用 (GPIO 端口 0/2 共用 EINT3)
//!
//! 每个 (端口, 边沿) 一张回调表，只增不删。中断时先读出四个状态寄存器的
//! 快照，再按 P0 上升、P0 下降、P2 上升、P2 下降的固定顺序遍历各表:
//! 表内最后登记的先派发，命中的回调执行后从快照和硬件中清除该位。
//! 派发结束后快照中仍有残留位的端口整体清除。

use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use heapless::Vec;

use crate::config::EINT_MAX_CALLBACKS;

/// 支持中断的 GPIO 端口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    P0,
    P2,
}

/// 触发边沿
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// 回调
pub type PinCallback = fn();

/// GPIO 中断寄存器接口
pub trait PinIntHw {
    /// IOxIntStatR / IOxIntStatF
    fn status(&self, port: Port, edge: Edge) -> u32;
    /// IOxIntClr
    fn clear(&self, port: Port, mask: u32);
    /// IOxIntEnR / IOxIntEnF 置位
    fn enable(&self, port: Port, edge: Edge, mask: u32);
}

/// 外部中断错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EintError {
    /// 引脚号超过 31
    InvalidPin(u8),
    /// 该 (端口, 边沿) 的回调表已满
    TableFull,
}

impl fmt::Display for EintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPin(pin) => write!(f, "Invalid EINT pin {}", pin),
            Self::TableFull => write!(f, "EINT callback table full"),
        }
    }
}

#[derive(Clone, Copy)]
struct Entry {
    pin_mask: u32,
    callback: PinCallback,
}

type List = Vec<Entry, EINT_MAX_CALLBACKS>;

/// 派发顺序
const ORDER: [(Port, Edge); 4] = [
    (Port::P0, Edge::Rising),
    (Port::P0, Edge::Falling),
    (Port::P2, Edge::Rising),
    (Port::P2, Edge::Falling),
];

const fn list_index(port: Port, edge: Edge) -> usize {
    match (port, edge) {
        (Port::P0, Edge::Rising) => 0,
        (Port::P0, Edge::Falling) => 1,
        (Port::P2, Edge::Rising) => 2,
        (Port::P2, Edge::Falling) => 3,
    }
}

/// 外部中断复用器
pub struct ExternalInterrupts<H> {
    hw: H,
    lists: Mutex<RefCell<[List; 4]>>,
}

impl<H: PinIntHw> ExternalInterrupts<H> {
    pub const fn new(hw: H) -> Self {
        Self {
            hw,
            lists: Mutex::new(RefCell::new([Vec::new(), Vec::new(), Vec::new(), Vec::new()])),
        }
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    /// 登记回调并打开该引脚的边沿中断
    pub fn enable(&self, port: Port, pin: u8, edge: Edge, callback: PinCallback) -> Result<(), EintError> {
        if pin > 31 {
            return Err(EintError::InvalidPin(pin));
        }
        let pin_mask = 1u32 << pin;

        critical_section::with(|cs| {
            let mut lists = self.lists.borrow_ref_mut(cs);
            lists[list_index(port, edge)]
                .push(Entry { pin_mask, callback })
                .map_err(|_| EintError::TableFull)
        })?;

        self.hw.enable(port, edge, pin_mask);
        Ok(())
    }

    pub fn enable_port0(&self, pin: u8, edge: Edge, callback: PinCallback) -> Result<(), EintError> {
        self.enable(Port::P0, pin, edge, callback)
    }

    pub fn enable_port2(&self, pin: u8, edge: Edge, callback: PinCallback) -> Result<(), EintError> {
        self.enable(Port::P2, pin, edge, callback)
    }

    /// EINT3 中断处理
    pub fn on_interrupt(&self) {
        let mut snapshots = [0u32; 4];
        for (slot, &(port, edge)) in snapshots.iter_mut().zip(ORDER.iter()) {
            *slot = self.hw.status(port, edge);
        }

        for (index, &(port, _)) in ORDER.iter().enumerate() {
            if snapshots[index] == 0 {
                continue;
            }
            let list = critical_section::with(|cs| self.lists.borrow_ref(cs)[index].clone());
            for entry in list.iter().rev() {
                if snapshots[index] == 0 {
                    break;
                }
                if entry.pin_mask & snapshots[index] != 0 {
                    (entry.callback)();
                    snapshots[index] &= !entry.pin_mask;
                    self.hw.clear(port, entry.pin_mask);
                }
            }
        }

        if snapshots[0] != 0 || snapshots[1] != 0 {
            self.hw.clear(Port::P0, u32::MAX);
        }
        if snapshots[2] != 0 || snapshots[3] != 0 {
            self.hw.clear(Port::P2, u32::MAX);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::Mutex as StdMutex;
    use std::vec::Vec as StdVec;

    #[derive(Default)]
    struct MockGpioInt {
        status: Cell<[u32; 4]>,
        enabled: Cell<[u32; 4]>,
        clears: std::cell::RefCell<StdVec<(Port, u32)>>,
    }

    impl PinIntHw for MockGpioInt {
        fn status(&self, port: Port, edge: Edge) -> u32 {
            self.status.get()[list_index(port, edge)]
        }

        fn clear(&self, port: Port, mask: u32) {
            self.clears.borrow_mut().push((port, mask));
        }

        fn enable(&self, port: Port, edge: Edge, mask: u32) {
            let mut en = self.enabled.get();
            en[list_index(port, edge)] |= mask;
            self.enabled.set(en);
        }
    }

    static CALLS: StdMutex<StdVec<&'static str>> = StdMutex::new(StdVec::new());

    fn record(name: &'static str) {
        CALLS.lock().unwrap().push(name);
    }

    #[test]
    fn test_dispatch_order_and_clear() {
        let eint = ExternalInterrupts::new(MockGpioInt::default());
        eint.enable_port2(0, Edge::Rising, || record("p2.0 rise")).unwrap();
        eint.enable_port0(1, Edge::Falling, || record("p0.1 fall")).unwrap();
        eint.enable_port2(5, Edge::Rising, || record("p2.5 rise")).unwrap();
        eint.enable_port0(29, Edge::Rising, || record("p0.29 rise")).unwrap();

        assert_eq!(eint.hw().enabled.get(), [1 << 29, 1 << 1, (1 << 0) | (1 << 5), 0]);

        eint.hw().status.set([1 << 29, 1 << 1, (1 << 0) | (1 << 5), 0]);
        CALLS.lock().unwrap().clear();
        eint.on_interrupt();

        assert_eq!(
            *CALLS.lock().unwrap(),
            ["p0.29 rise", "p0.1 fall", "p2.5 rise", "p2.0 rise"]
        );
        assert_eq!(
            *eint.hw().clears.borrow(),
            [(Port::P0, 1 << 29), (Port::P0, 1 << 1), (Port::P2, 1 << 5), (Port::P2, 1 << 0)]
        );
    }

    #[test]
    fn test_unclaimed_bits_cleared_wholesale() {
        let eint = ExternalInterrupts::new(MockGpioInt::default());
        eint.hw().status.set([0, 0, 0, 1 << 7]);
        eint.on_interrupt();
        assert_eq!(*eint.hw().clears.borrow(), [(Port::P2, u32::MAX)]);
    }

    #[test]
    fn test_invalid_pin_and_full_table() {
        let eint = ExternalInterrupts::new(MockGpioInt::default());
        assert_eq!(eint.enable_port0(32, Edge::Rising, || {}), Err(EintError::InvalidPin(32)));
        for _ in 0..EINT_MAX_CALLBACKS {
            eint.enable_port0(3, Edge::Rising, || {}).unwrap();
        }
        assert_eq!(eint.enable_port0(3, Edge::Rising, || {}), Err(EintError::TableFull));
    }
}
