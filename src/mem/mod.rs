//! 内存管理模块
//!
//! LPC1758 有两块互不相邻的 SRAM，堆由两个独立区域组成:
//!
//! | 区域 | 地址 | 内容 |
//! |------|------|------|
//! | SRAM1 | `0x1000_0000`, 32K | .data/.bss、栈，之后的空间作为第一堆区 |
//! | SRAM2 | `0x2007_C000`, 32K | 整块作为第二堆区 |
//!
//! 分配先尝试 SRAM1，不足时再用 SRAM2；释放时用 `which_arena` 找回所属区域。
//! 两个区域都耗尽时调用安装的内存耗尽钩子 (通常打印后重启)。
//!
//! - `arena`: 单区域可增长堆

pub mod arena;

use core::alloc::{GlobalAlloc, Layout};
use core::cell::{Cell, RefCell};
use core::fmt;
use core::ops::Range;
use core::ptr::{self, NonNull};

use critical_section::Mutex;

pub use arena::{Arena, ArenaId, SbrkStats};

/// SRAM1 基地址
pub const SRAM1_BASE: usize = 0x1000_0000;

/// SRAM2 (AHB SRAM) 基地址
pub const SRAM2_BASE: usize = 0x2007_C000;

/// 每块 SRAM 的大小
pub const SRAM_BLOCK_SIZE: usize = 32 * 1024;

/// 内存耗尽钩子
pub type OomHook = fn(Layout);

struct Inner {
    arenas: [Arena; 2],
    stats: SbrkStats,
    used_global: usize,
}

/// 双区域堆分配器
pub struct TwoArenaHeap {
    inner: Mutex<RefCell<Inner>>,
    oom_hook: Mutex<Cell<Option<OomHook>>>,
}

impl TwoArenaHeap {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                arenas: [Arena::empty(), Arena::empty()],
                stats: SbrkStats {
                    calls: 0,
                    last_ptr: 0,
                    last_size: 0,
                    next_ptr: 0,
                },
                used_global: 0,
            })),
            oom_hook: Mutex::new(Cell::new(None)),
        }
    }

    /// 设置两个区域
    ///
    /// `used_global` 是静态数据占用的字节数，只用于统计
    ///
    /// # Safety
    /// 两个区域必须互不重叠、在程序生命周期内有效且没有其他使用者
    pub unsafe fn init(&self, sram1: Range<usize>, sram2: Range<usize>, used_global: usize) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            inner.arenas[0].set_region(sram1.start, sram1.end);
            inner.arenas[1].set_region(sram2.start, sram2.end);
            inner.stats.next_ptr = inner.arenas[0].brk();
            inner.used_global = used_global;
        });
    }

    /// 安装内存耗尽钩子
    pub fn set_oom_hook(&self, hook: OomHook) {
        critical_section::with(|cs| self.oom_hook.borrow(cs).set(Some(hook)));
    }

    /// 指针属于哪个区域
    pub fn which_arena(&self, ptr: *const u8) -> Option<ArenaId> {
        critical_section::with(|cs| {
            let inner = self.inner.borrow_ref(cs);
            let addr = ptr as usize;
            if inner.arenas[0].contains(addr) {
                Some(ArenaId::Sram1)
            } else if inner.arenas[1].contains(addr) {
                Some(ArenaId::Sram2)
            } else {
                None
            }
        })
    }

    /// 内存统计
    pub fn info(&self) -> MemInfo {
        critical_section::with(|cs| {
            let inner = self.inner.borrow_ref(cs);
            let [sram1, sram2] = &inner.arenas;
            MemInfo {
                used_global: inner.used_global,
                used_heap: sram1.used() + sram2.used(),
                avail_heap: sram1.free() + sram2.free(),
                avail_sys: sram1.unreserved() + sram2.unreserved(),
                next_heap_ptr: inner.stats.next_ptr,
                last_sbrk_ptr: inner.stats.last_ptr,
                last_sbrk_size: inner.stats.last_size,
                sbrk_calls: inner.stats.calls,
            }
        })
    }

    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let Inner { arenas, stats, .. } = &mut *inner;
            arenas.iter_mut().find_map(|arena| arena.allocate(layout, stats))
        })
    }
}

impl Default for TwoArenaHeap {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl GlobalAlloc for TwoArenaHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        match self.allocate(layout) {
            Some(ptr) => ptr.as_ptr(),
            None => {
                let hook = critical_section::with(|cs| self.oom_hook.borrow(cs).get());
                if let Some(hook) = hook {
                    hook(layout);
                }
                ptr::null_mut()
            }
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };
        let owner = self.which_arena(ptr.as_ptr());
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            match owner {
                Some(ArenaId::Sram1) => inner.arenas[0].deallocate(ptr, layout),
                Some(ArenaId::Sram2) => inner.arenas[1].deallocate(ptr, layout),
                None => {}
            }
        });
    }
}

/// 内存统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    pub used_global: usize,
    pub used_heap: usize,
    pub avail_heap: usize,
    /// 尚未交给堆的区域空间
    pub avail_sys: usize,
    pub next_heap_ptr: usize,
    pub last_sbrk_ptr: usize,
    pub last_sbrk_size: usize,
    pub sbrk_calls: u32,
}

impl fmt::Display for MemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Memory Information:\n\
             Global Used   : {:5}\n\
             malloc Used   : {:5}\n\
             malloc Avail. : {:5}\n\
             System Avail. : {:5}\n\
             Next Heap ptr    : 0x{:08X}\n\
             Last sbrk() ptr  : 0x{:08X}\n\
             Last sbrk() size : {}\n\
             Num  sbrk() calls: {}\n",
            self.used_global,
            self.used_heap,
            self.avail_heap,
            self.avail_sys,
            self.next_heap_ptr,
            self.last_sbrk_ptr,
            self.last_sbrk_size,
            self.sbrk_calls
        )
    }
}
