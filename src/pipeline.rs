// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 主循环 (Orchestration Loop)
//!
//! 状态: Idle → Starting → Running → ShuttingDown → Stopped
//!
//! 每次迭代: 取最新帧 → (首帧) 启动录制 → 推理 + 叠加绘制 → 写视频
//! → 写陀螺仪 → 预览. 外部中断、预览退出或录制无法打开时结束,
//! 结束时按固定顺序关闭所有组件.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::camera::{DepthCamera, Frame, FrameSource};
use crate::detection::{Detector, ObjectDetector};
use crate::display::{LiveView, MacroquadView, ViewEvent};
use crate::error::{PipelineError, PipelineResult};
use crate::overlay::{load_font, OverlayRenderer, DEFAULT_FONT_PATH};
use crate::recording::{
    EncoderBackend, FfmpegBackend, MotionRecorder, SessionStamp, VideoRecorder, MOTION_PREFIX,
    VIDEO_PREFIX,
};
use crate::settings::Settings;

/// 空轮询之间的休眠
pub const EMPTY_POLL_SLEEP: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

/// 一次运行的结果
#[derive(Debug)]
pub enum RunOutcome {
    /// 外部中断 (Ctrl+C)
    Interrupted,
    /// 预览窗口退出 (q / Esc / 关闭窗口)
    Quit,
    /// 相机连接失败
    StartFailed(PipelineError),
    /// 运行中不可恢复的错误 (录制文件无法打开)
    Failed(PipelineError),
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Interrupted | RunOutcome::Quit => 0,
            RunOutcome::StartFailed(_) | RunOutcome::Failed(_) => 1,
        }
    }
}

/// 按配置创建录制器: 未启用录制时都为 None, 陀螺仪录制还需 record_gyroscope
pub fn recorders(
    settings: &Settings,
    backend: Box<dyn EncoderBackend>,
) -> (Option<VideoRecorder>, Option<MotionRecorder>) {
    if !settings.recording_enabled() {
        return (None, None);
    }
    let video = VideoRecorder::new(settings.output_dir(), VIDEO_PREFIX, backend);
    let motion = settings
        .record_gyroscope()
        .then(|| MotionRecorder::new(settings.output_dir(), MOTION_PREFIX));
    (Some(video), motion)
}

pub struct Pipeline<V: LiveView = MacroquadView> {
    settings: Settings,
    source: Box<dyn FrameSource>,
    detector: Option<Box<dyn ObjectDetector>>,
    overlay: OverlayRenderer,
    video: Option<VideoRecorder>,
    motion: Option<MotionRecorder>,
    view: Option<V>,
    stop: Arc<AtomicBool>,

    state: PipelineState,
    stamp: Option<SessionStamp>,
    frames: u64,
}

impl<V: LiveView> Pipeline<V> {
    pub fn new(
        settings: Settings,
        source: Box<dyn FrameSource>,
        detector: Option<Box<dyn ObjectDetector>>,
        video: Option<VideoRecorder>,
        motion: Option<MotionRecorder>,
        view: Option<V>,
    ) -> Self {
        let overlay = match &detector {
            Some(detector) => OverlayRenderer::new(
                load_font(&settings.root().join(DEFAULT_FONT_PATH)),
                detector.class_names().to_vec(),
            ),
            None => OverlayRenderer::default(),
        };

        Self {
            settings,
            source,
            detector,
            overlay,
            video,
            motion,
            view,
            stop: Arc::new(AtomicBool::new(false)),
            state: PipelineState::Idle,
            stamp: None,
            frames: 0,
        }
    }

    /// 生产组件: 深度相机, 可选的检测器与录制器 (预览窗口另行挂载)
    pub fn from_settings(settings: &Settings) -> PipelineResult<Self> {
        let source = DepthCamera::new(
            settings.camera_device(),
            settings.fps(),
            settings.record_gyroscope(),
            settings.imu_device(),
        );

        let detector: Option<Box<dyn ObjectDetector>> = if settings.inference_enabled() {
            let detector = Detector::new(
                settings.model_path(),
                settings.model_config(),
                settings.runtime_target(),
            )
            .map_err(|e| PipelineError::ModelLoad(format!("{:#}", e)))?;
            Some(Box::new(detector))
        } else {
            None
        };

        let (video, motion) = recorders(settings, Box::new(FfmpegBackend::default()));

        Ok(Self::new(
            settings.clone(),
            Box::new(source),
            detector,
            video,
            motion,
            None,
        ))
    }

    /// 挂载预览窗口 (窗口需在 macroquad 事件循环内创建)
    pub fn attach_view(&mut self, view: V) {
        self.view = Some(view);
    }

    /// 置位后主循环在下一次迭代前退出
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stamp(&self) -> Option<&SessionStamp> {
        self.stamp.as_ref()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    /// 连接相机; 失败时直接进入 Stopped
    pub fn start(&mut self) -> PipelineResult<()> {
        match self.state {
            PipelineState::Idle => {}
            PipelineState::Running => return Ok(()),
            state => {
                return Err(PipelineError::DeviceUnavailable(format!(
                    "pipeline cannot start from {:?}",
                    state
                )))
            }
        }

        tracing::info!("🚀 启动流水线...");
        self.state = PipelineState::Starting;
        if let Err(e) = self.source.start() {
            tracing::error!("❌ 相机不可用, 中止: {}", e);
            self.shutdown();
            return Err(e);
        }
        self.state = PipelineState::Running;
        Ok(())
    }

    /// 首帧到达: 生成会话时间戳并启动录制器
    fn begin_session(&mut self, frame: &Frame) -> PipelineResult<()> {
        let stamp = SessionStamp::now();
        tracing::info!("🕒 会话: {} ({}x{})", stamp, frame.width, frame.height);

        if let Some(video) = self.video.as_mut() {
            video.start(frame.width, frame.height, self.settings.fps(), Some(stamp.clone()))?;
        }
        if let Some(motion) = self.motion.as_mut() {
            motion.start(Some(stamp.clone()))?;
        }
        self.stamp = Some(stamp);
        Ok(())
    }

    /// 单次迭代; 没有新帧时返回 None
    pub fn step(&mut self) -> PipelineResult<Option<Frame>> {
        if self.state != PipelineState::Running {
            return Ok(None);
        }
        let Some(frame) = self.source.get_frame() else {
            return Ok(None);
        };
        self.frames += 1;

        if self.stamp.is_none() {
            self.begin_session(&frame)?;
        }

        let output = match self.detector.as_mut() {
            Some(detector) => match detector.run(&frame) {
                Some(result) => self.overlay.draw(&frame, &result),
                None => frame,
            },
            None => frame,
        };

        if let Some(video) = self.video.as_mut() {
            video.write(&output);
        }

        if self.settings.record_gyroscope() {
            if let Some(readings) = self.source.get_gyro_data() {
                match self.motion.as_mut() {
                    Some(motion) => motion.write(&readings),
                    None => tracing::debug!("🧭 陀螺仪: {:?}", readings),
                }
            }
        }

        Ok(Some(output))
    }

    /// 运行直到中断/退出/致命错误, 然后关闭所有组件
    pub async fn run(&mut self) -> RunOutcome {
        if let Err(e) = self.start() {
            return RunOutcome::StartFailed(e);
        }

        let outcome = loop {
            if self.stop.load(Ordering::Relaxed) {
                tracing::info!("🛑 收到中断信号");
                break RunOutcome::Interrupted;
            }

            match self.step() {
                Ok(Some(frame)) => {
                    if let Some(view) = self.view.as_mut() {
                        if view.present(&frame).await == ViewEvent::Quit {
                            break RunOutcome::Quit;
                        }
                    }
                }
                Ok(None) => match self.view.as_mut() {
                    // 预览窗口每次空轮询都要交出一帧, 否则按键和关闭事件无法处理
                    Some(view) => {
                        if view.idle().await == ViewEvent::Quit {
                            break RunOutcome::Quit;
                        }
                    }
                    None => std::thread::sleep(EMPTY_POLL_SLEEP),
                },
                Err(e) => {
                    tracing::error!("❌ 流水线错误: {}", e);
                    break RunOutcome::Failed(e);
                }
            }
        };

        self.shutdown();
        outcome
    }

    /// 按顺序关闭: 视频 → 陀螺仪 → 相机 → 预览 (可重复调用)
    pub fn shutdown(&mut self) {
        if matches!(self.state, PipelineState::Stopped | PipelineState::ShuttingDown) {
            return;
        }
        self.state = PipelineState::ShuttingDown;

        if let Some(video) = self.video.as_mut() {
            video.stop();
        }
        if let Some(motion) = self.motion.as_mut() {
            motion.stop();
        }
        self.source.stop();
        if let Some(view) = self.view.as_mut() {
            view.close();
        }

        self.state = PipelineState::Stopped;
        tracing::info!("✅ 流水线已关闭 (共处理 {} 帧)", self.frames);
    }
}
