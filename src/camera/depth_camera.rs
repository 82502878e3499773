// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 深度相机 - 彩色视频流 + 陀螺仪
//!
//! 彩色流经 FFmpeg 采集 (DirectShow(Windows) / AVFoundation(macOS) / V4L2(Linux)),
//! 由滤镜转换为 bgr24 后放入有界队列; 主循环非阻塞地取最新一帧.

use std::path::{Path, PathBuf};

use crossbeam_channel::{bounded, Receiver, Sender};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::core::scheduler::ffmpeg_scheduler::{FfmpegScheduler, Running};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame as AvFrame, Input};

use super::imu::{push_latest, GyroSampler, IioGyroscope, GYRO_RATE_HZ};
use super::{Frame, FrameSource, MotionReading};
use crate::error::{PipelineError, PipelineResult};

/// 固定采集分辨率 (1080P)
pub const CAPTURE_WIDTH: u32 = 1920;
pub const CAPTURE_HEIGHT: u32 = 1080;

/// 视频队列容量 (满了丢弃最旧帧)
pub const VIDEO_QUEUE_SIZE: usize = 4;

/// FFmpeg 帧滤镜: bgr24 AVFrame → Frame → 视频队列
#[derive(Clone)]
pub struct CaptureFilter {
    tx: Sender<Frame>,
    rx: Receiver<Frame>, // 队列满时用于丢弃最旧帧
    total_frames: usize,
    dropped_frames: usize,
}

impl CaptureFilter {
    pub fn new(tx: Sender<Frame>, rx: Receiver<Frame>) -> Self {
        Self {
            tx,
            rx,
            total_frames: 0,
            dropped_frames: 0,
        }
    }
}

impl FrameFilter for CaptureFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        tracing::debug!("✅ 采集线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: AvFrame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<AvFrame>, String> {
        unsafe {
            self.total_frames += 1;

            // 基本检查：空帧或损坏帧
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                self.dropped_frames += 1;
                return Ok(None);
            }

            let w = (*frame.as_ptr()).width as usize;
            let h = (*frame.as_ptr()).height as usize;
            let plane = (*frame.as_ptr()).data[0];
            let linesize = (*frame.as_ptr()).linesize[0];
            let stride = match row_stride(linesize, w) {
                Some(stride) if w > 0 && h > 0 && !plane.is_null() => stride,
                _ => {
                    self.dropped_frames += 1;
                    if self.dropped_frames <= 10 {
                        tracing::warn!(
                            "⚠️ 丢弃帧 #{}: {}x{} linesize={}",
                            self.total_frames,
                            w,
                            h,
                            linesize
                        );
                    }
                    return Ok(None);
                }
            };

            // 按行拷贝, 去掉行尾填充
            let mut data = Vec::with_capacity(w * h * 3);
            for y in 0..h {
                let row = std::slice::from_raw_parts(plane.add(y * stride), w * 3);
                data.extend_from_slice(row);
            }

            push_latest(&self.tx, &self.rx, Frame::new(w as u32, h as u32, data));
        }

        Ok(Some(frame))
    }
}

/// 深度相机 (单设备)
pub struct DepthCamera {
    device: String,
    fps: u32,
    record_gyroscope: bool,
    imu_device: Option<PathBuf>,

    scheduler: Option<FfmpegScheduler<Running>>,
    frames: Option<Receiver<Frame>>,
    gyro: Option<GyroSampler>,
}

impl DepthCamera {
    pub fn new(
        device: impl Into<String>,
        fps: u32,
        record_gyroscope: bool,
        imu_device: Option<&Path>,
    ) -> Self {
        Self {
            device: device.into(),
            fps,
            record_gyroscope,
            imu_device: imu_device.map(Path::to_path_buf),
            scheduler: None,
            frames: None,
            gyro: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.scheduler.is_some()
    }

    /// 输入格式 - 根据平台选择
    fn input_format() -> &'static str {
        #[cfg(target_os = "windows")]
        {
            "dshow" // DirectShow
        }
        #[cfg(target_os = "macos")]
        {
            "avfoundation" // AVFoundation
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            "v4l2" // Video4Linux2
        }
    }

    /// 格式化设备URL
    fn device_url(&self) -> String {
        #[cfg(target_os = "windows")]
        {
            format!("video={}", self.device)
        }
        #[cfg(not(target_os = "windows"))]
        {
            self.device.clone()
        }
    }

    fn open_video(&self) -> PipelineResult<(FfmpegScheduler<Running>, Receiver<Frame>)> {
        // 设备节点不存在时不必等待 FFmpeg
        if self.device.starts_with("/dev/") && !Path::new(&self.device).exists() {
            return Err(PipelineError::DeviceUnavailable(format!(
                "camera device {} not found",
                self.device
            )));
        }

        let (tx, rx) = bounded(VIDEO_QUEUE_SIZE);
        let filter = CaptureFilter::new(tx, rx.clone());

        // 构建帧处理管线
        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("capture", Box::new(filter));
        let out = create_null_output().add_frame_pipeline(pipe);

        let framerate = self.fps.to_string();
        let video_size = format!("{}x{}", CAPTURE_WIDTH, CAPTURE_HEIGHT);
        let input = Input::new(self.device_url())
            .set_format(Self::input_format())
            .set_input_opts(
                [
                    ("framerate", framerate.as_str()),
                    ("video_size", video_size.as_str()),
                ]
                .into(),
            );

        let ctx = FfmpegContext::builder()
            .input(input)
            .filter_desc("format=bgr24")
            .output(out)
            .build()
            .map_err(|e| PipelineError::DeviceUnavailable(format!("{}: {}", self.device, e)))?;

        let sch = ctx
            .start()
            .map_err(|e| PipelineError::DeviceUnavailable(format!("{}: {}", self.device, e)))?;

        Ok((sch, rx))
    }
}

impl FrameSource for DepthCamera {
    fn start(&mut self) -> PipelineResult<()> {
        if self.is_started() {
            return Ok(());
        }

        tracing::info!(
            "📷 连接相机: {} ({}x{} @ {}fps)",
            self.device,
            CAPTURE_WIDTH,
            CAPTURE_HEIGHT,
            self.fps
        );

        // 陀螺仪先于视频打开, 失败时无需回收 FFmpeg 上下文
        let gyro = if self.record_gyroscope {
            let imu = IioGyroscope::open(self.imu_device.as_deref())?;
            Some(GyroSampler::spawn(imu, GYRO_RATE_HZ))
        } else {
            None
        };

        let (sch, rx) = match self.open_video() {
            Ok(opened) => opened,
            Err(e) => {
                tracing::error!("❌ 相机连接失败: {}", e);
                return Err(e);
            }
        };

        self.scheduler = Some(sch);
        self.frames = Some(rx);
        self.gyro = gyro;
        tracing::info!("✅ 相机连接成功,开始采集!");
        Ok(())
    }

    fn get_frame(&mut self) -> Option<Frame> {
        // 只保留最新一帧，丢弃旧帧
        self.frames.as_ref()?.try_iter().last()
    }

    fn get_gyro_data(&mut self) -> Option<Vec<MotionReading>> {
        let readings = self.gyro.as_ref()?.drain();
        if readings.is_empty() {
            None
        } else {
            Some(readings)
        }
    }

    fn stop(&mut self) {
        if let Some(mut gyro) = self.gyro.take() {
            gyro.stop();
        }
        self.frames = None;
        if let Some(sch) = self.scheduler.take() {
            sch.abort();
            tracing::info!("📷 相机已停止");
        }
    }
}

impl Drop for DepthCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

/// bgr24 单行字节跨度; 负值 (自底向上存储) 或小于一行像素时拒绝
fn row_stride(linesize: i32, width: usize) -> Option<usize> {
    if linesize <= 0 {
        return None;
    }
    let stride = linesize as usize;
    (stride >= width * 3).then_some(stride)
}
