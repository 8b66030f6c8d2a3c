//! 文件系统接口
//!
//! 板上的 FAT 卷 ("0:" SPI Flash, "1:" SD 卡) 由外部文件系统实现提供，
//! 本模块只定义日志和启动记录需要的最小句柄式接口:
//! `open` / `seek` / `write` / `sync` / `close`。
//!
//! - `ram`: 基于静态内存的实现，用于主机测试和未挂载 Flash 时的后备卷

pub mod ram;

use core::fmt;

pub use ram::{RamFile, RamFs};

/// 文件系统错误
///
/// `code()` 与 FAT 层的结果码一致，日志中输出的是这个数字
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// 底层存储 IO 错误
    Disk,
    /// 文件不存在
    NotFound,
    /// 访问被拒绝 (只读打开或卷已满)
    Denied,
    /// 文件已存在
    AlreadyExists,
    /// 无效的文件句柄
    InvalidHandle,
    /// 卷未挂载
    NotMounted,
    /// 无效参数 (路径过长等)
    InvalidParam,
    /// 打开的文件过多
    TooManyOpenFiles,
}

impl FsError {
    /// 结果码
    pub const fn code(self) -> u8 {
        match self {
            Self::Disk => 1,
            Self::NotFound => 4,
            Self::Denied => 7,
            Self::AlreadyExists => 8,
            Self::InvalidHandle => 9,
            Self::NotMounted => 12,
            Self::InvalidParam => 19,
            Self::TooManyOpenFiles => 18,
        }
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disk => write!(f, "Disk error"),
            Self::NotFound => write!(f, "Not found"),
            Self::Denied => write!(f, "Access denied"),
            Self::AlreadyExists => write!(f, "Already exists"),
            Self::InvalidHandle => write!(f, "Invalid handle"),
            Self::NotMounted => write!(f, "Not mounted"),
            Self::InvalidParam => write!(f, "Invalid parameter"),
            Self::TooManyOpenFiles => write!(f, "Too many open files"),
        }
    }
}

/// 文件打开选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// 读取权限
    pub read: bool,
    /// 写入权限
    pub write: bool,
    /// 不存在时创建 (FA_OPEN_ALWAYS)
    pub create: bool,
    /// 截断已有内容
    pub truncate: bool,
}

impl OpenOptions {
    pub const fn new() -> Self {
        Self {
            read: false,
            write: false,
            create: false,
            truncate: false,
        }
    }

    pub const fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub const fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub const fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub const fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// 只读打开
    pub const fn read_only() -> Self {
        Self::new().read(true)
    }

    /// 写入打开，不存在则创建，保留已有内容
    pub const fn open_always_write() -> Self {
        Self::new().write(true).create(true)
    }
}

/// 定位方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    /// 从文件开头
    Start(u32),
    /// 从文件末尾
    End(i32),
    /// 从当前位置
    Current(i32),
}

/// 句柄式文件系统
///
/// 写入可能只完成一部分: `write` 返回实际写入的字节数，由调用者判断。
pub trait FileSystem {
    /// 打开文件句柄
    type File;

    fn open(&mut self, path: &str, options: OpenOptions) -> Result<Self::File, FsError>;

    /// 返回新的读写位置
    fn seek(&mut self, file: &mut Self::File, pos: SeekFrom) -> Result<u32, FsError>;

    fn write(&mut self, file: &mut Self::File, data: &[u8]) -> Result<usize, FsError>;

    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize, FsError>;

    /// 把缓存数据写到介质
    fn sync(&mut self, file: &mut Self::File) -> Result<(), FsError>;

    fn close(&mut self, file: Self::File) -> Result<(), FsError>;

    /// 文件大小，不存在返回 `NotFound`
    fn size(&mut self, path: &str) -> Result<u32, FsError>;
}

/// 追加写入: 打开 (不存在则创建)、定位到末尾、写入、关闭
///
/// 返回写入的字节数；关闭失败时已写入的数据视为未确认，返回错误
pub fn append<F: FileSystem>(fs: &mut F, path: &str, data: &[u8]) -> Result<usize, FsError> {
    let mut file = fs.open(path, OpenOptions::open_always_write())?;
    let written = fs
        .seek(&mut file, SeekFrom::End(0))
        .and_then(|_| fs.write(&mut file, data));
    let closed = fs.close(file);
    let written = written?;
    closed?;
    Ok(written)
}
