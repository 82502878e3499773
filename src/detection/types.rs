// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统数据结构定义
/// Data structures for the detection system

/// 检测框 (Detection bounding box), 原始帧像素坐标
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bbox {
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
    class_id: usize,
    confidence: f32,
    track_id: Option<u32>, // 跟踪模式下的轨迹ID
}

impl Bbox {
    pub fn new(
        xmin: f32,
        ymin: f32,
        width: f32,
        height: f32,
        class_id: usize,
        confidence: f32,
    ) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
            class_id,
            confidence,
            track_id: None,
        }
    }

    pub fn from_xyxy(x1: f32, y1: f32, x2: f32, y2: f32, class_id: usize, confidence: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1, class_id, confidence)
    }

    pub fn with_track_id(mut self, track_id: u32) -> Self {
        self.track_id = Some(track_id);
        self
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    pub fn cxcy(&self) -> (f32, f32) {
        (self.xmin + self.width / 2., self.ymin + self.height / 2.)
    }

    pub fn class_id(&self) -> usize {
        self.class_id
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn track_id(&self) -> Option<u32> {
        self.track_id
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax().min(another.xmax());
        let t = self.ymin.max(another.ymin);
        let b = self.ymax().min(another.ymax());
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &Bbox) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }
}

/// 单帧推理结果: 检测框 (跟踪模式下带轨迹ID)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionResult {
    bboxes: Vec<Bbox>,
}

impl DetectionResult {
    pub fn new(bboxes: Vec<Bbox>) -> Self {
        Self { bboxes }
    }

    pub fn bboxes(&self) -> &[Bbox] {
        &self.bboxes
    }

    pub fn len(&self) -> usize {
        self.bboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bboxes.is_empty()
    }

    /// 是否包含轨迹ID (跟踪模式)
    pub fn has_track_ids(&self) -> bool {
        self.bboxes.iter().any(|b| b.track_id().is_some())
    }
}

/// 非极大值抑制: 按置信度降序保留与已保留框 IOU 不超过阈值的框
pub fn non_max_suppression(xs: &mut Vec<Bbox>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence().total_cmp(&b1.confidence()));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].iou(&xs[index]);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou() {
        let a = Bbox::new(0., 0., 10., 10., 0, 0.9);
        let b = Bbox::new(5., 0., 10., 10., 0, 0.8);
        assert!((a.iou(&b) - 50. / 150.).abs() < 1e-6);
        assert_eq!(a.iou(&Bbox::new(20., 20., 5., 5., 0, 0.5)), 0.);
        assert!((a.iou(&a) - 1.).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let mut boxes = vec![
            Bbox::new(0., 0., 10., 10., 0, 0.6),
            Bbox::new(1., 1., 10., 10., 0, 0.9),
            Bbox::new(50., 50., 10., 10., 1, 0.3),
        ];
        non_max_suppression(&mut boxes, 0.45);
        assert_eq!(boxes.len(), 2);
        assert!((boxes[0].confidence() - 0.9).abs() < 1e-6);
        assert_eq!(boxes[1].class_id(), 1);
    }

    #[test]
    fn test_track_ids() {
        let result = DetectionResult::new(vec![Bbox::new(0., 0., 1., 1., 0, 0.5)]);
        assert!(!result.has_track_ids());
        let tracked = DetectionResult::new(vec![Bbox::new(0., 0., 1., 1., 0, 0.5).with_track_id(7)]);
        assert!(tracked.has_track_ids());
        assert_eq!(tracked.bboxes()[0].track_id(), Some(7));
    }
}
