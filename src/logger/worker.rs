//! 日志工作任务
//!
//! 聚合缓冲区只属于工作任务。每轮从写队列取一个槽号 (带超时):
//! 超时或收到刷写哨兵时把 `[0, cursor)` 写入文件；否则追加换行，
//! 放得下就拷贝进缓冲区，放不下 (`cursor + len >= B`) 就先填满缓冲区
//! 写出整块 B 字节，剩余部分拷到缓冲区开头。

use embassy_time::Duration;

use super::{LogError, Logger};
use crate::config::LOGGER_FLUSH_TIME_SEC;
use crate::fs::FileSystem;
use crate::sync::primitives::{maybe_timeout, Timeout};

/// 本轮做了什么
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    /// 记录已放入缓冲区
    Buffered,
    /// 缓冲区写满并写出了一整块
    Overflowed,
    /// 超时或刷写请求，写出了缓冲区中的内容
    Flushed,
}

/// 工作任务状态: 聚合缓冲区与游标
pub struct LogWorker<'a, F: FileSystem, const N: usize, const L: usize, const B: usize> {
    logger: &'a Logger<F, N, L>,
    buffer: [u8; B],
    cursor: usize,
}

impl<'a, F: FileSystem, const N: usize, const L: usize, const B: usize> LogWorker<'a, F, N, L, B> {
    pub const fn new(logger: &'a Logger<F, N, L>) -> Self {
        assert!(L <= B, "aggregation buffer smaller than one record");
        Self {
            logger,
            buffer: [0; B],
            cursor: 0,
        }
    }

    /// 缓冲区中尚未写出的字节数
    pub fn buffered(&self) -> usize {
        self.cursor
    }

    /// 处理一个写队列项
    pub async fn service_once(&mut self, timeout: Timeout) -> Result<WorkerEvent, LogError> {
        let index = match maybe_timeout(timeout, self.logger.pending.receive()).await {
            Some(Some(index)) => index,
            Some(None) | None => return self.flush().await.map(|_| WorkerEvent::Flushed),
        };

        let logger = self.logger;
        // 加上刚取出的这一条
        logger.buffer_watermark.observe(1 + logger.pending.len() as u32);

        // Safety: 槽号刚从 pending 取出，归还前由本任务独占
        let record = unsafe { logger.slots.get_mut(index) };
        let _ = record.push(b'\n');
        let result = self.append(record).await;
        logger.release(index);
        result
    }

    async fn append(&mut self, record: &[u8]) -> Result<WorkerEvent, LogError> {
        let len = record.len();
        if self.cursor + len < B {
            self.buffer[self.cursor..self.cursor + len].copy_from_slice(record);
            self.cursor += len;
            return Ok(WorkerEvent::Buffered);
        }

        let head = B - self.cursor;
        self.buffer[self.cursor..].copy_from_slice(&record[..head]);
        let written = {
            let mut storage = self.logger.storage.lock().await;
            self.logger.write_file(&mut storage, &self.buffer)
        };

        // 剩余部分可能为 0 (正好填满)
        let rest = len - head;
        self.buffer[..rest].copy_from_slice(&record[head..]);
        self.cursor = rest;
        written.map(|_| WorkerEvent::Overflowed)
    }

    /// 写出 `[0, cursor)` 并清零游标
    pub async fn flush(&mut self) -> Result<(), LogError> {
        let result = {
            let mut storage = self.logger.storage.lock().await;
            self.logger.write_file(&mut storage, &self.buffer[..self.cursor])
        };
        self.cursor = 0;
        result
    }

    /// 工作任务主循环，无新记录 60s 后自动刷写
    pub async fn run(&mut self) -> ! {
        let timeout = Some(Duration::from_secs(LOGGER_FLUSH_TIME_SEC));
        loop {
            // 写入失败已在控制台报告，流水线继续运行
            let _ = self.service_once(timeout).await;
        }
    }
}
