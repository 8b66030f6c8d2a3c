//! 滑动窗口采样器
//!
//! 保存最近 `N` 个样本，按需计算最新值、最大、最小与平均值 (O(N))。
//! 窗口未填满时统计只覆盖已收到的样本，调用方可用 `count()` 判断。

use core::ops::{Add, Div};

/// 可参与平均值计算的样本类型
pub trait Sample: Copy + PartialOrd + Default + Add<Output = Self> + Div<Output = Self> {
    fn from_count(count: usize) -> Self;
}

macro_rules! impl_sample {
    ($($ty:ty),*) => {
        $(
            impl Sample for $ty {
                #[inline]
                fn from_count(count: usize) -> Self {
                    count as $ty
                }
            }
        )*
    };
}

impl_sample!(u8, u16, u32, u64, i8, i16, i32, i64, usize, f32, f64);

/// 保存最近 `N` 个样本
#[derive(Debug, Clone)]
pub struct Sampler<T, const N: usize> {
    samples: [T; N],
    /// 下一个样本的写入位置
    index: usize,
    all_ready: bool,
}

impl<T: Sample, const N: usize> Sampler<T, N> {
    pub fn new() -> Self {
        Self {
            samples: [T::default(); N],
            index: 0,
            all_ready: false,
        }
    }

    pub fn store(&mut self, sample: T) {
        self.samples[self.index] = sample;
        self.index += 1;
        if self.index >= N {
            self.index = 0;
            self.all_ready = true;
        }
    }

    /// 窗口是否已填满
    #[inline]
    pub fn all_ready(&self) -> bool {
        self.all_ready
    }

    /// 参与统计的样本数
    #[inline]
    pub fn count(&self) -> usize {
        if self.all_ready {
            N
        } else {
            self.index
        }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline]
    fn window(&self) -> &[T] {
        &self.samples[..self.count()]
    }

    pub fn latest(&self) -> Option<T> {
        if self.count() == 0 {
            return None;
        }
        let index = if self.index == 0 { N - 1 } else { self.index - 1 };
        Some(self.samples[index])
    }

    pub fn highest(&self) -> Option<T> {
        self.window()
            .iter()
            .copied()
            .reduce(|acc, s| if s > acc { s } else { acc })
    }

    pub fn lowest(&self) -> Option<T> {
        self.window()
            .iter()
            .copied()
            .reduce(|acc, s| if s < acc { s } else { acc })
    }

    /// 样本均值，整数类型向零截断
    pub fn average(&self) -> Option<T> {
        let count = self.count();
        if count == 0 {
            return None;
        }
        let sum = self.window().iter().fold(T::default(), |acc, &s| acc + s);
        Some(sum / T::from_count(count))
    }

    /// 丢弃所有样本
    pub fn clear(&mut self) {
        self.index = 0;
        self.all_ready = false;
    }
}

impl<T: Sample, const N: usize> Default for Sampler<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
