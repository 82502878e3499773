// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 相机采集系统 (Camera Source)
///
/// 拉取式接口, 从不阻塞:
/// - DepthCamera:   FFmpeg 视频流 (V4L2/AVFoundation/DirectShow) + IIO 陀螺仪
/// - GyroSampler:   陀螺仪后台采样线程 (100Hz)
pub mod depth_camera;
pub mod imu;

pub use depth_camera::DepthCamera;
pub use imu::{GyroSampler, IioGyroscope};

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::PipelineResult;

/// 采集帧 (BGR 三通道, 紧密排列)
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    /// 全黑帧
    pub fn zeros(width: u32, height: u32) -> Self {
        Self::new(width, height, vec![0; width as usize * height as usize * 3])
    }

    /// 缓冲区长度与尺寸一致
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == self.width as usize * self.height as usize * 3
    }

    /// BGR → RGB 图像 (推理与绘制使用)
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        if !self.is_valid() {
            return None;
        }
        let mut rgb = self.data.clone();
        for px in rgb.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        RgbImage::from_raw(self.width, self.height, rgb)
    }

    /// BGR → RGBA (预览纹理)
    pub fn to_rgba(&self) -> Vec<u8> {
        let mut rgba = Vec::with_capacity(self.data.len() / 3 * 4);
        for px in self.data.chunks_exact(3) {
            rgba.push(px[2]); // R
            rgba.push(px[1]); // G
            rgba.push(px[0]); // B
            rgba.push(255); // A
        }
        rgba
    }
}

/// 陀螺仪读数 (角速度, rad/s)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionReading {
    pub timestamp: f64, // 秒
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// 拉取式帧源
///
/// 所有读取接口非阻塞; 调用方负责轮询频率 (空轮询之间短暂休眠)
pub trait FrameSource {
    /// 连接设备并启动视频流 (以及可选的陀螺仪流)
    fn start(&mut self) -> PipelineResult<()>;

    /// 最新可用帧, 没有则返回 None
    fn get_frame(&mut self) -> Option<Frame>;

    /// 上次轮询以来累积的陀螺仪读数, 没有则返回 None
    fn get_gyro_data(&mut self) -> Option<Vec<MotionReading>>;

    /// 关闭流并释放设备 (可重复调用)
    fn stop(&mut self);
}
