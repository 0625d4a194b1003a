use crate::core::Result;
use log::info;
use parking_lot::Mutex;

// 当前存活的句柄数量
static HANDLES: Mutex<usize> = parking_lot::const_mutex(0);

/// 进程级的解码库句柄
///
/// 第一个会话打开前获取，最后一个句柄释放时做收尾。
/// 不依赖全局构造顺序，初始化时机完全由调用方决定。
#[derive(Debug)]
pub struct MediaLibrary {
    _private: (),
}

impl MediaLibrary {
    /// 获取句柄，必要时初始化解码库
    pub fn acquire() -> Result<Self> {
        let mut handles = HANDLES.lock();
        if *handles == 0 {
            Self::init_backend()?;
            info!("✅ 解码库初始化成功");
        }
        *handles += 1;
        Ok(Self { _private: () })
    }

    /// 当前存活的句柄数量
    pub fn active_handles() -> usize {
        *HANDLES.lock()
    }

    #[cfg(feature = "ffmpeg")]
    fn init_backend() -> Result<()> {
        ffmpeg_next::init()?;
        Ok(())
    }

    #[cfg(not(feature = "ffmpeg"))]
    fn init_backend() -> Result<()> {
        Ok(())
    }
}

impl Clone for MediaLibrary {
    fn clone(&self) -> Self {
        *HANDLES.lock() += 1;
        Self { _private: () }
    }
}

impl Drop for MediaLibrary {
    fn drop(&mut self) {
        let mut handles = HANDLES.lock();
        *handles = handles.saturating_sub(1);
        if *handles == 0 {
            info!("🗑️  最后一个解码库句柄已释放");
        }
    }
}
