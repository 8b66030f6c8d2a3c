//! 单个 SRAM 区域上的可增长堆
//!
//! 区域 `[start, end)` 中只有 `[start, brk)` 交给 linked_list_allocator 管理，
//! 分配失败时按块向上推进 `brk` (sbrk 语义) 后重试。

use core::alloc::Layout;
use core::ptr::NonNull;

use linked_list_allocator::hole::HoleList;
use linked_list_allocator::Heap;

/// 每次增长的最小字节数
pub const SBRK_CHUNK: usize = 1024;

const ALIGN: usize = 8;

const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// 区域编号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaId {
    /// 本地 SRAM (.bss 之后到栈保留区)
    Sram1,
    /// AHB SRAM
    Sram2,
}

/// sbrk 统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SbrkStats {
    pub calls: u32,
    pub last_ptr: usize,
    pub last_size: usize,
    /// 下一次增长的起点
    pub next_ptr: usize,
}

/// 单区域堆
pub struct Arena {
    heap: Heap,
    start: usize,
    end: usize,
    brk: usize,
}

impl Arena {
    pub const fn empty() -> Self {
        Self {
            heap: Heap::empty(),
            start: 0,
            end: 0,
            brk: 0,
        }
    }

    /// 设置区域边界，此时尚未向堆交出任何内存
    pub fn set_region(&mut self, start: usize, end: usize) {
        let start = align_up(start, ALIGN);
        self.start = start;
        self.end = end.max(start);
        self.brk = start;
    }

    pub fn contains(&self, addr: usize) -> bool {
        (self.start..self.brk).contains(&addr)
    }

    /// 当前断点
    pub fn brk(&self) -> usize {
        self.brk
    }

    /// 尚未交给堆的区域空间
    pub fn unreserved(&self) -> usize {
        self.end - self.brk
    }

    pub fn used(&self) -> usize {
        self.heap.used()
    }

    pub fn free(&self) -> usize {
        self.heap.free()
    }

    /// 向上推进断点，返回新内存起点
    fn sbrk(&mut self, bytes: usize, stats: &mut SbrkStats) -> Option<usize> {
        let bytes = align_up(bytes.max(SBRK_CHUNK), ALIGN).min(self.unreserved());
        if bytes < HoleList::min_size() {
            return None;
        }

        let old = self.brk;
        // Safety: [old, old + bytes) 在本区域内且从未交出过
        unsafe {
            if self.heap.size() == 0 {
                self.heap.init(old as *mut u8, bytes);
            } else {
                self.heap.extend(bytes);
            }
        }
        self.brk = old + bytes;

        stats.calls += 1;
        stats.last_ptr = old;
        stats.last_size = bytes;
        stats.next_ptr = self.brk;
        Some(old)
    }

    /// 分配，空间不足时先增长一次
    pub fn allocate(&mut self, layout: Layout, stats: &mut SbrkStats) -> Option<NonNull<u8>> {
        if let Ok(ptr) = self.heap.allocate_first_fit(layout) {
            return Some(ptr);
        }
        let need = layout.size() + layout.align() + HoleList::min_size();
        self.sbrk(need, stats)?;
        self.heap.allocate_first_fit(layout).ok()
    }

    /// # Safety
    /// `ptr` 必须由本区域以相同 `layout` 分配
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout) {
        self.heap.deallocate(ptr, layout);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::boxed::Box;
    use std::vec;

    pub(crate) fn region(bytes: usize) -> (usize, usize) {
        let mem: &'static mut [u64] = Box::leak(vec![0u64; bytes / 8].into_boxed_slice());
        let start = mem.as_mut_ptr() as usize;
        (start, start + bytes)
    }

    #[test]
    fn test_grows_in_chunks() {
        let (start, end) = region(4096);
        let mut arena = Arena::empty();
        arena.set_region(start, end);
        let mut stats = SbrkStats::default();

        assert_eq!(arena.unreserved(), 4096);
        let ptr = arena.allocate(Layout::from_size_align(100, 4).unwrap(), &mut stats).unwrap();
        assert!(arena.contains(ptr.as_ptr() as usize));
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.last_ptr, start);
        assert_eq!(stats.last_size, SBRK_CHUNK);
        assert_eq!(arena.brk(), start + SBRK_CHUNK);

        // 放得下的分配不再增长
        arena.allocate(Layout::from_size_align(200, 4).unwrap(), &mut stats).unwrap();
        assert_eq!(stats.calls, 1);

        let big = arena.allocate(Layout::from_size_align(2000, 8).unwrap(), &mut stats);
        assert!(big.is_some());
        assert_eq!(stats.calls, 2);
    }

    #[test]
    fn test_exhausted_region_fails() {
        let (start, end) = region(2048);
        let mut arena = Arena::empty();
        arena.set_region(start, end);
        let mut stats = SbrkStats::default();
        assert!(arena.allocate(Layout::from_size_align(4096, 8).unwrap(), &mut stats).is_none());

        let ptr = arena.allocate(Layout::from_size_align(512, 8).unwrap(), &mut stats).unwrap();
        let used = arena.used();
        unsafe { arena.deallocate(ptr, Layout::from_size_align(512, 8).unwrap()) };
        assert!(arena.used() < used);
    }
}
