// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测结果叠加绘制 (Overlay Renderer)
//!
//! 在 BGR 帧的副本上绘制检测框与标签, 原帧不变.
//! 标签字体可选: 找不到字体文件时只绘制检测框.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::camera::Frame;
use crate::detection::{Bbox, DetectionResult};

/// 默认标签字体 (相对项目根目录)
pub const DEFAULT_FONT_PATH: &str = "assets/font/DejaVuSans.ttf";

const LABEL_SCALE: f32 = 20.0;
const LINE_THICKNESS: i32 = 2;

/// 调色板 (RGB)
const PALETTE: [(u8, u8, u8); 12] = [
    (255, 0, 0),     // 红色
    (0, 255, 0),     // 绿色
    (0, 0, 255),     // 蓝色
    (255, 255, 0),   // 黄色
    (255, 0, 255),   // 品红
    (0, 255, 255),   // 青色
    (255, 128, 0),   // 橙色
    (255, 0, 128),   // 粉红
    (128, 255, 0),   // 黄绿
    (0, 128, 255),   // 天蓝
    (255, 255, 255), // 白色
    (128, 0, 255),   // 紫色
];

/// 读取 TTF/OTF 字体, 失败返回 None
pub fn load_font(path: &Path) -> Option<FontArc> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => {
            tracing::warn!("⚠️ 未找到标签字体: {}, 只绘制检测框", path.display());
            return None;
        }
    };
    match FontArc::try_from_vec(bytes) {
        Ok(font) => {
            tracing::debug!("✅ 标签字体加载成功: {}", path.display());
            Some(font)
        }
        Err(e) => {
            tracing::warn!("⚠️ 字体解析失败 {}: {}", path.display(), e);
            None
        }
    }
}

#[derive(Clone, Default)]
pub struct OverlayRenderer {
    font: Option<FontArc>,
    names: Vec<String>,
}

impl OverlayRenderer {
    pub fn new(font: Option<FontArc>, names: Vec<String>) -> Self {
        Self { font, names }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 轨迹ID优先决定颜色, 同一目标颜色稳定
    fn color(&self, bbox: &Bbox) -> Rgb<u8> {
        let key = match bbox.track_id() {
            Some(id) => id as usize,
            None => bbox.class_id(),
        };
        let (r, g, b) = PALETTE[key % PALETTE.len()];
        Rgb([b, g, r]) // 画布为 BGR 顺序
    }

    fn label(&self, bbox: &Bbox) -> String {
        let name = self
            .names
            .get(bbox.class_id())
            .cloned()
            .unwrap_or_else(|| format!("class {}", bbox.class_id()));
        match bbox.track_id() {
            Some(id) => format!("#{} {} {:.2}", id, name, bbox.confidence()),
            None => format!("{} {:.2}", name, bbox.confidence()),
        }
    }

    /// 返回带标注的新帧; 帧无效时原样返回副本
    pub fn draw(&self, frame: &Frame, result: &DetectionResult) -> Frame {
        if !frame.is_valid() {
            return frame.clone();
        }
        let Some(mut canvas) = RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
        else {
            return frame.clone();
        };

        let (w, h) = (frame.width as i32, frame.height as i32);
        for bbox in result.bboxes() {
            let x1 = (bbox.xmin().round() as i32).clamp(0, w - 1);
            let y1 = (bbox.ymin().round() as i32).clamp(0, h - 1);
            let x2 = (bbox.xmax().round() as i32).clamp(0, w - 1);
            let y2 = (bbox.ymax().round() as i32).clamp(0, h - 1);
            let color = self.color(bbox);

            for t in 0..LINE_THICKNESS {
                let bw = (x2 - x1 - 2 * t).max(1) as u32;
                let bh = (y2 - y1 - 2 * t).max(1) as u32;
                draw_hollow_rect_mut(&mut canvas, Rect::at(x1 + t, y1 + t).of_size(bw, bh), color);
            }

            if let Some(font) = &self.font {
                let text = self.label(bbox);
                let scale = PxScale::from(LABEL_SCALE);
                let (tw, th) = text_size(scale, font, &text);
                // 标签放在框上方, 放不下时放在框内
                let ty = if y1 >= th as i32 + 4 { y1 - th as i32 - 4 } else { y1 };
                draw_filled_rect_mut(
                    &mut canvas,
                    Rect::at(x1, ty).of_size(tw.max(1) + 4, th.max(1) + 4),
                    color,
                );
                draw_text_mut(&mut canvas, Rgb([0, 0, 0]), x1 + 2, ty + 2, scale, font, &text);
            }
        }

        Frame::new(frame.width, frame.height, canvas.into_raw())
    }
}
