// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 录制系统 (Recorders)
///
/// - VideoRecorder:  视频录制 (FFmpeg, MP4)
/// - MotionRecorder: 陀螺仪读数录制 (JSON Lines)
///
/// 两个录制器都在首帧到达后才启动, 共用同一个会话时间戳.
pub mod motion;
pub mod video;

pub use motion::MotionRecorder;
pub use video::{EncoderBackend, FfmpegBackend, VideoEncoder, VideoRecorder};

use std::fmt;

/// 视频文件名前缀
pub const VIDEO_PREFIX: &str = "recording";

/// 陀螺仪文件名前缀
pub const MOTION_PREFIX: &str = "gyro";

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// 会话时间戳 `YYYYMMDD_HHMMSS` (本地时间)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionStamp(String);

impl SessionStamp {
    pub fn now() -> Self {
        Self(chrono::Local::now().format(STAMP_FORMAT).to_string())
    }

    pub fn new(stamp: impl Into<String>) -> Self {
        Self(stamp.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `<prefix>_<stamp>.<extension>`
    pub fn file_name(&self, prefix: &str, extension: &str) -> String {
        format!("{}_{}.{}", prefix, self.0, extension)
    }
}

impl fmt::Display for SessionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 录制器状态: 首帧前 Armed, 之后 Recording, 停止后不再写入
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Armed,
    Recording,
    Stopped,
}
