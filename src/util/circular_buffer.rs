//! 定容环形缓冲区
//!
//! 与 `heapless::Deque` 不同，这里的写入可以选择强制覆盖最旧元素，
//! 下标与迭代都按 FIFO 顺序 (下标 0 是最旧的元素)。
//!
//! 没有内部同步；跨上下文共享时放进 `CriticalMutex`。

use core::mem::MaybeUninit;
use core::ops::Index;

/// 容量为 `N` 的 FIFO 环形缓冲区
///
/// # Example
/// ```ignore
/// let mut buf: CircularBuffer<i32, 3> = CircularBuffer::new();
/// buf.push(1, false);
/// buf.push(2, false);
/// buf.push(3, false);
/// assert!(!buf.push(0, false)); // 已满
/// assert!(buf.push(4, true));   // 覆盖 1
/// // 内容: 2 3 4
/// ```
pub struct CircularBuffer<T, const N: usize> {
    /// 元素存储，`[read, read + count)` (取模) 已初始化
    buffer: [MaybeUninit<T>; N],
    /// 最旧元素位置
    read: usize,
    count: usize,
}

impl<T, const N: usize> CircularBuffer<T, N> {
    pub const fn new() -> Self {
        assert!(N > 0, "capacity must be non-zero");
        Self {
            buffer: [const { MaybeUninit::uninit() }; N],
            read: 0,
            count: 0,
        }
    }

    #[inline(always)]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.count == N
    }

    #[inline(always)]
    fn slot(&self, index: usize) -> usize {
        (self.read + index) % N
    }

    /// 追加到尾部
    ///
    /// # Returns
    /// - `true`: 已写入 (满且 `force` 时最旧元素被丢弃)
    /// - `false`: 已满且未强制，元素被丢弃
    pub fn push(&mut self, value: T, force: bool) -> bool {
        if self.is_full() {
            if !force {
                return false;
            }
            drop(self.pop_front());
        }
        let slot = self.slot(self.count);
        self.buffer[slot].write(value);
        self.count += 1;
        true
    }

    /// 取出最旧元素
    pub fn pop_front(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let slot = self.read;
        self.read = (self.read + 1) % N;
        self.count -= 1;
        // Safety: slot 在已初始化区间内，移出后不再属于该区间
        Some(unsafe { self.buffer[slot].assume_init_read() })
    }

    /// 查看最旧元素但不移除
    #[inline]
    pub fn peek_front(&self) -> Option<&T> {
        self.get(0)
    }

    /// 按 FIFO 顺序取第 `index` 个元素
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.count {
            return None;
        }
        // Safety: index < count，slot 已初始化
        Some(unsafe { self.buffer[self.slot(index)].assume_init_ref() })
    }

    pub fn clear(&mut self) {
        while self.pop_front().is_some() {}
        self.read = 0;
    }

    /// 从最旧到最新遍历，不移除元素
    pub fn iter(&self) -> Iter<'_, T, N> {
        Iter {
            buffer: self,
            index: 0,
        }
    }
}

impl<T, const N: usize> Default for CircularBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for CircularBuffer<T, N> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T, const N: usize> Index<usize> for CircularBuffer<T, N> {
    type Output = T;

    /// 越界会 panic，与切片一致
    fn index(&self, index: usize) -> &T {
        match self.get(index) {
            Some(value) => value,
            None => panic!("index {} out of range for length {}", index, self.count),
        }
    }
}

/// FIFO 顺序迭代器
pub struct Iter<'a, T, const N: usize> {
    buffer: &'a CircularBuffer<T, N>,
    index: usize,
}

impl<'a, T, const N: usize> Iterator for Iter<'a, T, N> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let item = self.buffer.get(self.index)?;
        self.index += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.buffer.len() - self.index;
        (remaining, Some(remaining))
    }
}

impl<T, const N: usize> ExactSizeIterator for Iter<'_, T, N> {}

impl<'a, T, const N: usize> IntoIterator for &'a CircularBuffer<T, N> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T, N>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
