// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! YOLOv8 检测模型 (ONNX Runtime)
//!
//! 输入 `images`: [1, 3, imgsz, imgsz] RGB 归一化, 左上角对齐的等比缩放 (灰色填充)
//! 输出 `output0`: [1, 4 + nc, anchors], 每个 anchor 为 cx, cy, w, h + 各类别分数

use std::path::Path;

use anyhow::{bail, Context, Result};
use fast_image_resize as fr;
use ndarray::{s, Array, Axis, IxDyn};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use super::types::{non_max_suppression, Bbox};
use crate::camera::Frame;
use crate::config::{ClassFilter, ModelConfig, RuntimeTarget};

const CXYWH_OFFSET: usize = 4;

/// 填充色 (与训练时 letterbox 一致)
const PAD_VALUE: f32 = 144.0 / 255.0;

/// COCO 类别名 (80类)
pub const COCO_NAMES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// 统一的模型接口: preprocess → run → postprocess
pub trait Model: Send {
    fn preprocess(&mut self, frame: &Frame) -> Result<Array<f32, IxDyn>>;

    fn run(&mut self, xs: Array<f32, IxDyn>) -> Result<Array<f32, IxDyn>>;

    fn postprocess(&self, ys: Array<f32, IxDyn>, frame: &Frame) -> Result<Vec<Bbox>>;

    fn names(&self) -> &[String];

    fn forward(&mut self, frame: &Frame) -> Result<Vec<Bbox>> {
        let xs = self.preprocess(frame)?;
        let ys = self.run(xs)?;
        self.postprocess(ys, frame)
    }
}

/// YOLOv8 前后处理 (不依赖推理引擎)
#[derive(Clone, Debug)]
pub struct YoloDecoder {
    width: u32,
    height: u32,
    conf: f32,
    iou: f32,
    classes: Option<ClassFilter>,
}

impl YoloDecoder {
    pub fn new(config: &ModelConfig) -> Self {
        let size = config.imgsz.max(32);
        Self {
            width: size,
            height: size,
            conf: config.conf,
            iou: config.iou,
            classes: config.classes.clone(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn scale_wh(&self, w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
        let r = (w1 / w0).min(h1 / h0);
        (r, (w0 * r).round(), (h0 * r).round())
    }

    /// BGR 帧 → [1, 3, H, W] RGB 张量
    pub fn preprocess(&self, frame: &Frame) -> Result<Array<f32, IxDyn>> {
        if !frame.is_valid() {
            bail!(
                "malformed frame: {}x{} with {} bytes",
                frame.width,
                frame.height,
                frame.data.len()
            );
        }

        let (_, w_new, h_new) = self.scale_wh(
            frame.width as f32,
            frame.height as f32,
            self.width as f32,
            self.height as f32,
        );
        let w_new = (w_new as u32).clamp(1, self.width);
        let h_new = (h_new as u32).clamp(1, self.height);

        // 通道顺序不影响缩放, 直接缩放 BGR
        let src_image =
            fr::images::Image::from_vec_u8(frame.width, frame.height, frame.data.clone(), fr::PixelType::U8x3)?;
        let mut dst_image = fr::images::Image::new(w_new, h_new, fr::PixelType::U8x3);
        let mut resizer = fr::Resizer::new();
        resizer.resize(
            &src_image,
            &mut dst_image,
            &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )?;

        let mut ys: Array<f32, IxDyn> =
            Array::ones((1, 3, self.height as usize, self.width as usize)).into_dyn();
        ys.fill(PAD_VALUE);
        let pixels = dst_image.buffer();
        let row = w_new as usize * 3;
        for y in 0..h_new as usize {
            for x in 0..w_new as usize {
                let i = y * row + x * 3;
                ys[[0, 0, y, x]] = pixels[i + 2] as f32 / 255.0; // R
                ys[[0, 1, y, x]] = pixels[i + 1] as f32 / 255.0; // G
                ys[[0, 2, y, x]] = pixels[i] as f32 / 255.0; // B
            }
        }
        Ok(ys)
    }

    /// [1, 4 + nc, anchors] → 原图坐标检测框 (置信度/类别过滤 + NMS)
    pub fn postprocess(&self, preds: Array<f32, IxDyn>, frame: &Frame) -> Result<Vec<Bbox>> {
        let shape = preds.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= CXYWH_OFFSET {
            bail!("unexpected YOLOv8 output shape {:?}", shape);
        }
        let nc = shape[1] - CXYWH_OFFSET;

        let width_original = frame.width as f32;
        let height_original = frame.height as f32;
        let ratio = (self.width as f32 / width_original).min(self.height as f32 / height_original);

        let mut data: Vec<Bbox> = Vec::new();
        let anchor = preds.index_axis(Axis(0), 0);
        for pred in anchor.axis_iter(Axis(1)) {
            let bbox = pred.slice(s![0..CXYWH_OFFSET]);
            let clss = pred.slice(s![CXYWH_OFFSET..CXYWH_OFFSET + nc]);

            let Some((id, &confidence)) = clss
                .into_iter()
                .enumerate()
                .reduce(|max, x| if x.1 > max.1 { x } else { max })
            else {
                continue;
            };

            if confidence < self.conf {
                continue;
            }
            if let Some(classes) = &self.classes {
                if !classes.contains(id) {
                    continue;
                }
            }

            let cx = bbox[0] / ratio;
            let cy = bbox[1] / ratio;
            let w = bbox[2] / ratio;
            let h = bbox[3] / ratio;
            let x1 = (cx - w / 2.).max(0.0f32).min(width_original);
            let y1 = (cy - h / 2.).max(0.0f32).min(height_original);
            let x2 = (cx + w / 2.).max(0.0f32).min(width_original);
            let y2 = (cy + h / 2.).max(0.0f32).min(height_original);
            if x2 <= x1 || y2 <= y1 {
                continue;
            }
            data.push(Bbox::from_xyxy(x1, y1, x2, y2, id, confidence));
        }

        non_max_suppression(&mut data, self.iou);
        Ok(data)
    }
}

/// YOLOv8 ONNX 模型
pub struct YOLOv8 {
    session: Session,
    input_name: String,
    output_name: String,
    decoder: YoloDecoder,
    names: Vec<String>,
}

/// 取模型的第一个输入/输出名 (导出工具不同, 名字不一定是 images/output0)
fn first_tensor_name<'a>(mut names: impl Iterator<Item = &'a str>, kind: &str) -> Result<String> {
    match names.next() {
        Some(name) => Ok(name.to_string()),
        None => bail!("Model has no {}", kind),
    }
}

impl YOLOv8 {
    pub fn new(model_path: &Path, config: &ModelConfig, target: RuntimeTarget) -> Result<Self> {
        let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

        // dev: 优先 CUDA, 不可用时回退 CPU; pi: 仅 CPU
        let builder = match target {
            RuntimeTarget::Dev => builder.with_execution_providers([
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ])?,
            RuntimeTarget::Pi => builder
                .with_execution_providers([CPUExecutionProvider::default().build()])?
                .with_intra_threads(4)?,
        };

        let session = builder
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load model {}", model_path.display()))?;
        let input_name = first_tensor_name(session.inputs.iter().map(|i| i.name.as_str()), "input")?;
        let output_name = first_tensor_name(session.outputs.iter().map(|o| o.name.as_str()), "output")?;

        let names = COCO_NAMES.iter().map(|s| s.to_string()).collect();
        tracing::info!(
            "🧠 模型加载完成: {} (imgsz={}, conf={}, iou={}, target={:?})",
            model_path.display(),
            config.imgsz,
            config.conf,
            config.iou,
            target
        );

        Ok(Self {
            session,
            input_name,
            output_name,
            decoder: YoloDecoder::new(config),
            names,
        })
    }
}

impl Model for YOLOv8 {
    fn preprocess(&mut self, frame: &Frame) -> Result<Array<f32, IxDyn>> {
        self.decoder.preprocess(frame)
    }

    fn run(&mut self, xs: Array<f32, IxDyn>) -> Result<Array<f32, IxDyn>> {
        let input_tensor = Tensor::from_array(xs)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .context("Inference failed")?;
        let output: ndarray::ArrayViewD<f32> = outputs
            .get(self.output_name.as_str())
            .with_context(|| format!("Missing output `{}`", self.output_name))?
            .try_extract_array()
            .context("Failed to extract output")?;
        Ok(output.to_owned())
    }

    fn postprocess(&self, ys: Array<f32, IxDyn>, frame: &Frame) -> Result<Vec<Bbox>> {
        self.decoder.postprocess(ys, frame)
    }

    fn names(&self) -> &[String] {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(conf: f32, classes: Option<ClassFilter>) -> YoloDecoder {
        let config = ModelConfig {
            conf,
            classes,
            imgsz: 64,
            ..ModelConfig::default()
        };
        YoloDecoder::new(&config)
    }

    /// 构造 [1, 4 + nc, anchors] 输出
    fn output(anchors: &[([f32; 4], Vec<f32>)]) -> Array<f32, IxDyn> {
        let nc = anchors[0].1.len();
        let mut ys: Array<f32, IxDyn> = Array::zeros((1, CXYWH_OFFSET + nc, anchors.len())).into_dyn();
        for (i, (bbox, scores)) in anchors.iter().enumerate() {
            for (j, v) in bbox.iter().enumerate() {
                ys[[0, j, i]] = *v;
            }
            for (j, v) in scores.iter().enumerate() {
                ys[[0, CXYWH_OFFSET + j, i]] = *v;
            }
        }
        ys
    }

    #[test]
    fn test_preprocess_letterbox() {
        let d = decoder(0.25, None);
        let frame = Frame::new(4, 2, [10u8, 20, 30].repeat(8));
        let xs = d.preprocess(&frame).unwrap();
        assert_eq!(xs.shape(), &[1, 3, 64, 64]);
        // 左上角为图像内容 (RGB 顺序)
        assert!((xs[[0, 0, 0, 0]] - 30.0 / 255.0).abs() < 1e-3);
        assert!((xs[[0, 2, 0, 0]] - 10.0 / 255.0).abs() < 1e-3);
        // 下半部分为填充
        assert!((xs[[0, 0, 63, 0]] - PAD_VALUE).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_rejects_malformed_frame() {
        let d = decoder(0.25, None);
        assert!(d.preprocess(&Frame::new(4, 4, vec![0; 7])).is_err());
        assert!(d.preprocess(&Frame::new(0, 0, vec![])).is_err());
    }

    #[test]
    fn test_postprocess_scales_to_frame() {
        let d = decoder(0.25, None);
        // 128x64 帧 → ratio 0.5
        let frame = Frame::zeros(128, 64);
        let ys = output(&[
            ([16., 16., 8., 8.], vec![0.1, 0.9]),
            ([40., 20., 8., 8.], vec![0.1, 0.2]), // 低于阈值
        ]);
        let boxes = d.postprocess(ys, &frame).unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].class_id(), 1);
        assert!((boxes[0].xmin() - 24.).abs() < 1e-4);
        assert!((boxes[0].width() - 16.).abs() < 1e-4);
        assert!(boxes[0].track_id().is_none());
    }

    #[test]
    fn test_postprocess_class_filter_and_nms() {
        let frame = Frame::zeros(64, 64);
        let anchors = [
            ([20., 20., 10., 10.], vec![0.8, 0.0]),
            ([21., 21., 10., 10.], vec![0.7, 0.0]), // 与上一个重叠
            ([50., 50., 6., 6.], vec![0.0, 0.6]),
        ];

        let boxes = decoder(0.25, None).postprocess(output(&anchors), &frame).unwrap();
        assert_eq!(boxes.len(), 2);

        let only_one = decoder(0.25, Some(ClassFilter::One(1)));
        let boxes = only_one.postprocess(output(&anchors), &frame).unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].class_id(), 1);
    }

    #[test]
    fn test_first_tensor_name() {
        let name = first_tensor_name(["logits", "aux"].into_iter(), "output").unwrap();
        assert_eq!(name, "logits");
        let err = first_tensor_name(std::iter::empty(), "output").unwrap_err();
        assert_eq!(err.to_string(), "Model has no output");
    }

    #[test]
    fn test_postprocess_rejects_bad_shape() {
        let d = decoder(0.25, None);
        let ys: Array<f32, IxDyn> = Array::zeros((1, 3)).into_dyn();
        assert!(d.postprocess(ys, &Frame::zeros(8, 8)).is_err());
    }
}
