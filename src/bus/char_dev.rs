//! 字符设备公共接口
//!
//! 具体设备只需提供 `put_char` / `get_char`，字符串和行读写由默认方法完成。

use crate::sync::primitives::Timeout;

/// 字符设备
#[allow(async_fn_in_trait)]
pub trait CharDev {
    /// 发送一个字节
    async fn put_char(&self, byte: u8, timeout: Timeout) -> bool;

    /// 接收一个字节
    async fn get_char(&self, timeout: Timeout) -> Option<u8>;

    /// 发送字符串，任一字节超时即返回 `false`
    async fn put(&self, s: &str, timeout: Timeout) -> bool {
        for byte in s.bytes() {
            if !self.put_char(byte, timeout).await {
                return false;
            }
        }
        true
    }

    /// 发送字符串并追加 `"\r\n"`
    async fn putline(&self, s: &str, timeout: Timeout) -> bool {
        self.put(s, timeout).await && self.put("\r\n", timeout).await
    }

    /// 读取一行 (丢弃 `'\r'` 与 `'\n'`)
    ///
    /// 返回 (写入长度, 是否读到换行)。缓冲区满或超时时第二项为 `false`
    async fn gets(&self, buf: &mut [u8], timeout: Timeout) -> (usize, bool) {
        let mut len = 0;
        let mut count = 0;
        while let Some(byte) = self.get_char(timeout).await {
            if byte != b'\r' && byte != b'\n' && len < buf.len() {
                buf[len] = byte;
                len += 1;
            }
            if byte == b'\n' {
                return (len, true);
            }
            count += 1;
            if count >= buf.len() {
                break;
            }
        }
        (len, false)
    }
}
