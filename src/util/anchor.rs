//! 单例锚点
//!
//! 外设驱动在启动阶段只构造一次 (放入 `StaticCell`)，随后把 `&'static` 引用
//! 发布到锚点，中断向量与故障处理通过锚点找到它。锚点只能设置一次。

use portable_atomic::{AtomicPtr, Ordering};

/// 只能设置一次的 `&'static T` 锚点
pub struct Anchor<T> {
    ptr: AtomicPtr<T>,
}

impl<T> Anchor<T> {
    pub const fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// 发布引用
    ///
    /// # Returns
    /// - `true`: 第一次发布
    /// - `false`: 已经发布过，本次被忽略
    pub fn set(&self, value: &'static T) -> bool {
        self.ptr
            .compare_exchange(
                core::ptr::null_mut(),
                value as *const T as *mut T,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// 获取已发布的引用
    #[inline]
    pub fn get(&self) -> Option<&'static T> {
        let ptr = self.ptr.load(Ordering::Acquire);
        // Safety: 只可能存放来自 `&'static T` 的指针
        unsafe { ptr.cast_const().as_ref() }
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        !self.ptr.load(Ordering::Acquire).is_null()
    }
}

impl<T> Default for Anchor<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: 只共享 `&'static T`，要求 T: Sync
unsafe impl<T: Sync> Sync for Anchor<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_set_once() {
        static FIRST: u32 = 1;
        static SECOND: u32 = 2;
        let anchor: Anchor<u32> = Anchor::new();

        assert!(anchor.get().is_none());
        assert!(anchor.set(&FIRST));
        assert!(!anchor.set(&SECOND));
        assert_eq!(anchor.get().copied(), Some(1));
    }
}
