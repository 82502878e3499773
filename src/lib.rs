// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod camera; // 相机采集 (视频 + 陀螺仪)
pub mod config; // 配置文档
pub mod detection; // 目标检测与跟踪
pub mod display; // 实时预览窗口
pub mod error; // 错误类型
pub mod overlay; // 检测结果绘制
pub mod pipeline; // 主循环
pub mod recording; // 视频与陀螺仪录制
pub mod settings; // 运行设置

pub use crate::camera::{DepthCamera, Frame, FrameSource, MotionReading};
pub use crate::config::{ClassFilter, ModelConfig, PipelineConfig, RuntimeTarget};
pub use crate::detection::{Bbox, DetectionResult, Detector, ObjectDetector};
pub use crate::display::{LiveView, MacroquadView, ViewEvent};
pub use crate::error::{PipelineError, PipelineResult};
pub use crate::overlay::OverlayRenderer;
pub use crate::pipeline::{Pipeline, PipelineState, RunOutcome};
pub use crate::recording::{MotionRecorder, SessionStamp, VideoRecorder};
pub use crate::settings::Settings;
