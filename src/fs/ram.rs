//! 内存文件系统
//!
//! 固定数量、固定容量的文件，全部放在静态内存里。除了作为主机测试中的
//! 文件系统模型，也在外部 Flash 卷尚未挂载时作为日志的后备卷。
//!
//! 统计写入调用次数和每次写入长度，测试通过它们观察日志刷写的粒度。

use heapless::{String, Vec};

use super::{FileSystem, FsError, OpenOptions, SeekFrom};

/// 文件名最大长度
pub const MAX_NAME_LEN: usize = 32;

/// 记录最近多少次写入的长度
const WRITE_HISTORY: usize = 32;

struct Entry<const CAP: usize> {
    name: String<MAX_NAME_LEN>,
    data: Vec<u8, CAP>,
}

/// 打开的文件
#[derive(Debug)]
pub struct RamFile {
    index: usize,
    pos: u32,
    writable: bool,
}

/// 内存文件系统: 最多 `FILES` 个文件，每个最多 `CAP` 字节
pub struct RamFs<const FILES: usize, const CAP: usize> {
    entries: Vec<Entry<CAP>, FILES>,
    open_files: usize,
    write_calls: u32,
    sync_calls: u32,
    write_sizes: Vec<usize, WRITE_HISTORY>,
    fail_writes: Option<FsError>,
}

impl<const FILES: usize, const CAP: usize> RamFs<FILES, CAP> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            open_files: 0,
            write_calls: 0,
            sync_calls: 0,
            write_sizes: Vec::new(),
            fail_writes: None,
        }
    }

    fn find(&self, path: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name.as_str() == path)
    }

    fn entry(&mut self, file: &RamFile) -> Result<&mut Entry<CAP>, FsError> {
        self.entries.get_mut(file.index).ok_or(FsError::InvalidHandle)
    }

    /// 文件全部内容
    pub fn contents(&self, path: &str) -> Option<&[u8]> {
        self.find(path).map(|i| self.entries[i].data.as_slice())
    }

    /// 删除文件 (不检查是否仍被打开)
    pub fn remove(&mut self, path: &str) -> Result<(), FsError> {
        let index = self.find(path).ok_or(FsError::NotFound)?;
        self.entries.swap_remove(index);
        Ok(())
    }

    /// 写入调用次数
    pub fn write_calls(&self) -> u32 {
        self.write_calls
    }

    /// sync 调用次数
    pub fn sync_calls(&self) -> u32 {
        self.sync_calls
    }

    /// 最近的写入长度 (按时间顺序)
    pub fn write_sizes(&self) -> &[usize] {
        &self.write_sizes
    }

    /// 当前打开的文件数
    pub fn open_files(&self) -> usize {
        self.open_files
    }

    /// 让之后的写入都以 `error` 失败，`None` 恢复
    pub fn fail_writes(&mut self, error: Option<FsError>) {
        self.fail_writes = error;
    }
}

impl<const FILES: usize, const CAP: usize> Default for RamFs<FILES, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const FILES: usize, const CAP: usize> FileSystem for RamFs<FILES, CAP> {
    type File = RamFile;

    fn open(&mut self, path: &str, options: OpenOptions) -> Result<RamFile, FsError> {
        if path.len() > MAX_NAME_LEN {
            return Err(FsError::InvalidParam);
        }
        if self.open_files >= FILES {
            return Err(FsError::TooManyOpenFiles);
        }

        let index = match self.find(path) {
            Some(index) => index,
            None if options.create => {
                let mut name = String::new();
                name.push_str(path).map_err(|_| FsError::InvalidParam)?;
                self.entries
                    .push(Entry { name, data: Vec::new() })
                    .map_err(|_| FsError::Denied)?;
                self.entries.len() - 1
            }
            None => return Err(FsError::NotFound),
        };

        if options.truncate {
            self.entries[index].data.clear();
        }
        self.open_files += 1;
        Ok(RamFile {
            index,
            pos: 0,
            writable: options.write,
        })
    }

    fn seek(&mut self, file: &mut RamFile, pos: SeekFrom) -> Result<u32, FsError> {
        let len = self.entry(file)?.data.len() as i64;
        let target = match pos {
            SeekFrom::Start(offset) => i64::from(offset),
            SeekFrom::End(delta) => len + i64::from(delta),
            SeekFrom::Current(delta) => i64::from(file.pos) + i64::from(delta),
        };
        if !(0..=len).contains(&target) {
            return Err(FsError::InvalidParam);
        }
        file.pos = target as u32;
        Ok(file.pos)
    }

    fn write(&mut self, file: &mut RamFile, data: &[u8]) -> Result<usize, FsError> {
        if !file.writable {
            return Err(FsError::Denied);
        }
        if let Some(error) = self.fail_writes {
            return Err(error);
        }
        self.write_calls += 1;
        if self.write_sizes.is_full() {
            self.write_sizes.remove(0);
        }
        let _ = self.write_sizes.push(data.len());

        let pos = file.pos as usize;
        let entry = self.entry(file)?;
        let mut written = 0;
        for &byte in data {
            let at = pos + written;
            if at < entry.data.len() {
                entry.data[at] = byte;
            } else if entry.data.push(byte).is_err() {
                break;
            }
            written += 1;
        }
        file.pos += written as u32;
        Ok(written)
    }

    fn read(&mut self, file: &mut RamFile, buf: &mut [u8]) -> Result<usize, FsError> {
        let pos = file.pos as usize;
        let entry = self.entry(file)?;
        let available = entry.data.len().saturating_sub(pos);
        let count = available.min(buf.len());
        buf[..count].copy_from_slice(&entry.data[pos..pos + count]);
        file.pos += count as u32;
        Ok(count)
    }

    fn sync(&mut self, file: &mut RamFile) -> Result<(), FsError> {
        self.entry(file)?;
        self.sync_calls += 1;
        Ok(())
    }

    fn close(&mut self, file: RamFile) -> Result<(), FsError> {
        self.entry(&file)?;
        self.open_files = self.open_files.saturating_sub(1);
        Ok(())
    }

    fn size(&mut self, path: &str) -> Result<u32, FsError> {
        self.contents(path).map(|d| d.len() as u32).ok_or(FsError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::append;

    #[test]
    fn test_append_creates_then_extends() {
        let mut fs: RamFs<2, 64> = RamFs::new();
        assert_eq!(append(&mut fs, "0:boot.csv", b"one\n"), Ok(4));
        assert_eq!(append(&mut fs, "0:boot.csv", b"two\n"), Ok(4));
        assert_eq!(fs.contents("0:boot.csv"), Some(&b"one\ntwo\n"[..]));
        assert_eq!(fs.open_files(), 0);
        assert_eq!(fs.write_sizes(), &[4, 4]);
    }

    #[test]
    fn test_partial_write_when_full() {
        let mut fs: RamFs<1, 8> = RamFs::new();
        let mut file = fs.open("a", OpenOptions::open_always_write()).unwrap();
        assert_eq!(fs.write(&mut file, b"0123456789"), Ok(8));
        assert_eq!(fs.size("a"), Ok(8));
    }

    #[test]
    fn test_open_missing_and_read_only() {
        let mut fs: RamFs<2, 16> = RamFs::new();
        assert!(matches!(fs.open("x", OpenOptions::read_only()), Err(FsError::NotFound)));

        append(&mut fs, "x", b"abc").unwrap();
        let mut file = fs.open("x", OpenOptions::read_only()).unwrap();
        assert_eq!(fs.write(&mut file, b"z"), Err(FsError::Denied));
        let mut buf = [0u8; 8];
        assert_eq!(fs.read(&mut file, &mut buf), Ok(3));
        assert_eq!(&buf[..3], b"abc");
        fs.close(file).unwrap();
    }

    #[test]
    fn test_injected_failure() {
        let mut fs: RamFs<1, 16> = RamFs::new();
        fs.fail_writes(Some(FsError::Disk));
        assert_eq!(append(&mut fs, "x", b"abc"), Err(FsError::Disk));
        assert_eq!(FsError::Disk.code(), 1);
    }
}
