// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测器 (Detector)
//!
//! 对单帧执行检测, 跟踪模式下跨帧保持轨迹ID.
//! 推理失败或帧无效时只记录日志并返回 None, 从不中断主循环.

use std::path::Path;
use std::time::Instant;

use anyhow::Result;

use super::bytetrack::ByteTracker;
use super::types::DetectionResult;
use super::yolov8::{Model, YOLOv8};
use crate::camera::Frame;
use crate::config::{ModelConfig, RuntimeTarget};

/// 连续失败时只输出前 N 条警告, 之后每 N 帧汇总一次
const FAILURE_LOG_LIMIT: u64 = 10;

/// 主循环使用的检测接口
pub trait ObjectDetector {
    /// None: 无检测结果或推理失败
    fn run(&mut self, frame: &Frame) -> Option<DetectionResult>;

    /// 类别名 (按 class_id 索引)
    fn class_names(&self) -> &[String] {
        &[]
    }
}

pub struct Detector {
    model: Box<dyn Model>,
    tracker: Option<ByteTracker>,
    verbose: bool,
    frame_count: u64,
    failures: u64,
}

impl Detector {
    /// 加载 ONNX 模型 (`dev`: CUDA 优先, `pi`: CPU)
    pub fn new(model_path: &Path, config: &ModelConfig, target: RuntimeTarget) -> Result<Self> {
        let model = YOLOv8::new(model_path, config, target)?;
        Ok(Self::with_model(Box::new(model), config))
    }

    pub fn with_model(model: Box<dyn Model>, config: &ModelConfig) -> Self {
        // 新轨迹阈值与 conf 一致, 通过 conf 的框都会得到轨迹ID
        let tracker = config
            .persist
            .then(|| ByteTracker::new().with_high_score_threshold(config.conf));
        tracing::info!(
            "🎯 检测器就绪: {}",
            if tracker.is_some() { "跟踪模式 (ByteTrack)" } else { "检测模式" }
        );
        Self {
            model,
            tracker,
            verbose: config.verbose,
            frame_count: 0,
            failures: 0,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.tracker.is_some()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn should_log_failure(&self) -> bool {
        self.failures <= FAILURE_LOG_LIMIT || self.failures % FAILURE_LOG_LIMIT == 0
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let bboxes = self.model.forward(frame)?;
        let bboxes = match self.tracker.as_mut() {
            Some(tracker) => tracker
                .update(&bboxes)
                .iter()
                .filter(|t| t.is_active())
                .map(|t| t.to_bbox())
                .collect(),
            None => bboxes,
        };
        Ok(DetectionResult::new(bboxes))
    }
}

impl ObjectDetector for Detector {
    fn run(&mut self, frame: &Frame) -> Option<DetectionResult> {
        self.frame_count += 1;
        let t = Instant::now();

        match self.detect(frame) {
            Ok(result) => {
                if self.verbose {
                    tracing::debug!(
                        "🔍 帧 #{}: {} 个目标, 耗时 {:.1}ms",
                        self.frame_count,
                        result.len(),
                        t.elapsed().as_secs_f64() * 1000.0
                    );
                    if let Some(tracker) = self.tracker.as_ref() {
                        tracing::debug!("🔗 {}", tracker.get_stats());
                    }
                }
                if result.is_empty() {
                    None
                } else {
                    Some(result)
                }
            }
            Err(e) => {
                self.failures += 1;
                if self.should_log_failure() {
                    tracing::warn!("⚠️ 帧 #{} 推理失败 (累计 {} 次): {:#}", self.frame_count, self.failures, e);
                }
                None
            }
        }
    }

    fn class_names(&self) -> &[String] {
        self.model.names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::yolov8::YoloDecoder;
    use crate::detection::Bbox;
    use ndarray::{Array, IxDyn};

    /// 固定输出的模型 (用真实的前后处理)
    struct FixedModel {
        decoder: YoloDecoder,
        output: Array<f32, IxDyn>,
        names: Vec<String>,
    }

    impl Model for FixedModel {
        fn preprocess(&mut self, frame: &Frame) -> Result<Array<f32, IxDyn>> {
            self.decoder.preprocess(frame)
        }

        fn run(&mut self, _xs: Array<f32, IxDyn>) -> Result<Array<f32, IxDyn>> {
            Ok(self.output.clone())
        }

        fn postprocess(&self, ys: Array<f32, IxDyn>, frame: &Frame) -> Result<Vec<Bbox>> {
            self.decoder.postprocess(ys, frame)
        }

        fn names(&self) -> &[String] {
            &self.names
        }
    }

    fn config(persist: bool) -> ModelConfig {
        ModelConfig {
            imgsz: 32,
            conf: 0.25,
            persist,
            ..ModelConfig::default()
        }
    }

    fn detector(persist: bool) -> Detector {
        detector_with_score(persist, 0.9)
    }

    /// 一个 anchor: 中心 (16, 16), 8x8, 类别 0
    fn detector_with_score(persist: bool, score: f32) -> Detector {
        let mut output: Array<f32, IxDyn> = Array::zeros((1, 5, 1)).into_dyn();
        output[[0, 0, 0]] = 16.;
        output[[0, 1, 0]] = 16.;
        output[[0, 2, 0]] = 8.;
        output[[0, 3, 0]] = 8.;
        output[[0, 4, 0]] = score;
        let model = FixedModel {
            decoder: YoloDecoder::new(&config(persist)),
            output,
            names: vec!["person".to_string()],
        };
        Detector::with_model(Box::new(model), &config(persist))
    }

    #[test]
    fn test_detection_mode_has_no_track_ids() {
        let mut det = detector(false);
        let result = det.run(&Frame::zeros(32, 32)).unwrap();
        assert_eq!(result.len(), 1);
        assert!(!result.has_track_ids());
        assert_eq!(det.class_names(), ["person".to_string()]);
    }

    #[test]
    fn test_tracking_mode_keeps_ids() {
        let mut det = detector(true);
        assert!(det.is_tracking());
        let first = det.run(&Frame::zeros(32, 32)).unwrap();
        let second = det.run(&Frame::zeros(32, 32)).unwrap();
        assert_eq!(first.bboxes()[0].track_id(), Some(1));
        assert_eq!(second.bboxes()[0].track_id(), Some(1));
    }

    #[test]
    fn test_tracking_keeps_boxes_above_conf() {
        // conf 0.25 < 0.4 < ByteTrack 默认高分阈值 0.5
        let mut det = detector_with_score(true, 0.4);
        for _ in 0..3 {
            let result = det.run(&Frame::zeros(32, 32)).unwrap();
            assert_eq!(result.len(), 1);
            assert_eq!(result.bboxes()[0].track_id(), Some(1));
        }
    }

    #[test]
    fn test_below_conf_is_dropped_in_both_modes() {
        assert!(detector_with_score(false, 0.2).run(&Frame::zeros(32, 32)).is_none());
        assert!(detector_with_score(true, 0.2).run(&Frame::zeros(32, 32)).is_none());
    }

    #[test]
    fn test_failure_log_is_rate_limited() {
        let mut det = detector(false);
        let bad = Frame::new(32, 32, vec![0; 10]);
        let logged = (0..100)
            .filter(|_| {
                assert!(det.run(&bad).is_none());
                det.should_log_failure()
            })
            .count();
        assert_eq!(det.failures(), 100);
        // 前 10 次 + 第 20, 30, ..., 100 次
        assert_eq!(logged, 19);
    }

    #[test]
    fn test_malformed_frame_returns_none() {
        let mut det = detector(false);
        assert!(det.run(&Frame::new(32, 32, vec![0; 10])).is_none());
        assert!(det.run(&Frame::new(0, 0, vec![])).is_none());
        assert_eq!(det.frame_count(), 2);
    }

    #[test]
    fn test_no_detections_returns_none() {
        let mut det = detector(false);
        det.model = Box::new(FixedModel {
            decoder: YoloDecoder::new(&config(false)),
            output: Array::zeros((1, 5, 4)).into_dyn(),
            names: vec![],
        });
        assert!(det.run(&Frame::zeros(32, 32)).is_none());
    }
}
