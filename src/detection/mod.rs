// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 目标检测系统 (Detector)
///
/// - YOLOv8:      ONNX Runtime 推理 + 前后处理
/// - ByteTracker: 跟踪模式下的轨迹ID
/// - Detector:    主循环使用的检测器 (失败不中断)
pub mod bytetrack;
pub mod detector;
pub mod types;
pub mod yolov8;

pub use bytetrack::{ByteTracker, Track};
pub use detector::{Detector, ObjectDetector};
pub use types::{non_max_suppression, Bbox, DetectionResult};
pub use yolov8::{Model, YOLOv8, YoloDecoder, COCO_NAMES};
