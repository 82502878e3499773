// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// ByteTrack 算法实现
/// ByteTrack: Simple and effective multi-object tracking
///
/// 核心思想:
/// 1. 高低分检测框分开处理
/// 2. 高分框优先匹配 (IOU)
/// 3. 低分框救援丢失的轨迹
/// 4. 纯运动模型,无需外观特征
use super::types::Bbox;

/// 简化卡尔曼滤波器 (用于单个边界框)
#[derive(Clone, Debug)]
struct KalmanBoxFilter {
    // 状态估计: [cx, cy, w, h, vx, vy, vw, vh]
    state: [f32; 8],
    // 估计误差协方差 (简化为对角阵)
    p: [f32; 8],
    // 过程噪声
    q: f32,
    // 观测噪声
    r: f32,
}

impl KalmanBoxFilter {
    fn new(bbox: &Bbox) -> Self {
        let (cx, cy) = bbox.cxcy();
        Self {
            state: [cx, cy, bbox.width(), bbox.height(), 0.0, 0.0, 0.0, 0.0],
            p: [10.0; 8],
            q: 0.1,
            r: 1.0,
        }
    }

    fn predict(&mut self) {
        // 匀速运动模型
        for i in 0..4 {
            self.state[i] += self.state[i + 4];
        }
        for i in 0..8 {
            self.p[i] += self.q;
        }
    }

    fn update(&mut self, bbox: &Bbox) {
        let (cx, cy) = bbox.cxcy();
        let z = [cx, cy, bbox.width(), bbox.height()];

        // 卡尔曼增益 (速度增益降低)
        let mut k = [0.0f32; 8];
        for i in 0..8 {
            let r = if i < 4 { self.r } else { self.r * 5.0 };
            k[i] = self.p[i] / (self.p[i] + r);
        }

        // 观测残差
        let mut y = [0.0f32; 4];
        for i in 0..4 {
            y[i] = z[i] - self.state[i];
        }

        for i in 0..4 {
            self.state[i] += k[i] * y[i];
            self.state[i + 4] += k[i + 4] * y[i];
        }
        for i in 0..8 {
            self.p[i] *= 1.0 - k[i];
        }
    }

    fn bbox_from(cx: f32, cy: f32, w: f32, h: f32, class_id: usize, confidence: f32) -> Bbox {
        let w = w.max(1.0);
        let h = h.max(1.0);
        Bbox::new(cx - w / 2.0, cy - h / 2.0, w, h, class_id, confidence)
    }

    fn get_bbox(&self, class_id: usize, confidence: f32) -> Bbox {
        let s = &self.state;
        Self::bbox_from(s[0], s[1], s[2], s[3], class_id, confidence)
    }

    fn get_predicted_bbox(&self) -> Bbox {
        let s = &self.state;
        Self::bbox_from(s[0] + s[4], s[1] + s[5], s[2] + s[6], s[3] + s[7], 0, 1.0)
    }
}

/// ByteTrack 跟踪对象
#[derive(Clone, Debug)]
pub struct Track {
    /// 唯一跟踪ID
    pub id: u32,

    /// 当前边界框 (卡尔曼滤波平滑后)
    pub bbox: Bbox,

    kalman: KalmanBoxFilter,

    /// 连续丢失帧数
    pub frames_lost: u32,

    /// 总共被跟踪的帧数
    pub total_frames: u32,

    /// 最近一次匹配的检测置信度
    pub score: f32,

    pub class_id: usize,
}

impl Track {
    fn new(id: u32, detection: &Bbox) -> Self {
        let kalman = KalmanBoxFilter::new(detection);
        Self {
            id,
            bbox: kalman.get_bbox(detection.class_id(), detection.confidence()),
            kalman,
            frames_lost: 0,
            total_frames: 1,
            score: detection.confidence(),
            class_id: detection.class_id(),
        }
    }

    fn predict(&mut self) {
        self.kalman.predict();
        self.bbox = self.kalman.get_bbox(self.class_id, self.score);
    }

    fn update(&mut self, detection: &Bbox) {
        self.kalman.update(detection);
        self.frames_lost = 0;
        self.total_frames += 1;
        self.score = detection.confidence();
        self.class_id = detection.class_id();
        self.bbox = self.kalman.get_bbox(self.class_id, self.score);
    }

    fn mark_lost(&mut self) {
        self.frames_lost += 1;
    }

    fn get_predicted_bbox(&self) -> Bbox {
        self.kalman.get_predicted_bbox()
    }

    /// 本帧是否匹配到检测
    pub fn is_active(&self) -> bool {
        self.frames_lost == 0
    }

    /// 带轨迹ID的输出框
    pub fn to_bbox(&self) -> Bbox {
        self.bbox.clone().with_track_id(self.id)
    }
}

/// ByteTrack 追踪器
#[derive(Debug)]
pub struct ByteTracker {
    tracks: Vec<Track>,

    /// 下一个分配的ID
    next_id: u32,

    /// 最大允许丢失帧数
    max_lost_frames: u32,

    /// 高分检测阈值
    high_score_threshold: f32,

    /// 低分检测阈值 (用于救援)
    low_score_threshold: f32,

    /// 高分匹配 IOU 阈值
    high_iou_threshold: f32,

    /// 低分匹配 IOU 阈值
    low_iou_threshold: f32,
}

impl ByteTracker {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            max_lost_frames: 30,       // 30帧 ≈ 1秒@30fps
            high_score_threshold: 0.5, // 高分阈值
            low_score_threshold: 0.1,  // 低分阈值 (救援用)
            high_iou_threshold: 0.3,   // 高分匹配阈值
            low_iou_threshold: 0.5,    // 低分匹配阈值 (更严格)
        }
    }

    /// 高分阈值不高于检测置信度阈值时, 所有检测都可以新建轨迹
    pub fn with_high_score_threshold(mut self, threshold: f32) -> Self {
        self.high_score_threshold = threshold;
        self.low_score_threshold = self.low_score_threshold.min(threshold);
        self
    }

    /// 更新跟踪 (ByteTrack 三步匹配)
    pub fn update(&mut self, detections: &[Bbox]) -> &[Track] {
        // 1. 所有轨迹先预测
        for track in &mut self.tracks {
            track.predict();
        }

        // 2. 分离高低分检测框
        let mut high_dets: Vec<usize> = Vec::new();
        let mut low_dets: Vec<usize> = Vec::new();
        for (idx, det) in detections.iter().enumerate() {
            if det.confidence() >= self.high_score_threshold {
                high_dets.push(idx);
            } else if det.confidence() >= self.low_score_threshold {
                low_dets.push(idx);
            }
        }

        // 3. 第一轮匹配: 高分检测 + 所有轨迹
        let mut matched_det = vec![false; detections.len()];
        let mut matched_track = vec![false; self.tracks.len()];

        let all_tracks: Vec<usize> = (0..self.tracks.len()).collect();
        let assignments =
            self.match_detections_to_tracks(detections, &high_dets, &all_tracks, self.high_iou_threshold);
        for (det_idx, track_idx) in assignments {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(&detections[det_idx]);
        }

        // 4. 第二轮匹配: 低分检测 + 未匹配的轨迹 (救援)
        let unmatched_tracks: Vec<usize> =
            (0..self.tracks.len()).filter(|&idx| !matched_track[idx]).collect();
        let low_assignments = self.match_detections_to_tracks(
            detections,
            &low_dets,
            &unmatched_tracks,
            self.low_iou_threshold,
        );
        for (det_idx, track_idx) in low_assignments {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(&detections[det_idx]);
        }

        // 5. 未匹配的轨迹 → 标记丢失
        for (track_idx, &matched) in matched_track.iter().enumerate() {
            if !matched {
                self.tracks[track_idx].mark_lost();
            }
        }

        // 6. 未匹配的高分检测 → 新建轨迹
        for (det_idx, &matched) in matched_det.iter().enumerate() {
            if !matched && detections[det_idx].confidence() >= self.high_score_threshold {
                self.tracks.push(Track::new(self.next_id, &detections[det_idx]));
                self.next_id += 1;
            }
        }

        // 7. 删除丢失太久的轨迹
        let max_lost = self.max_lost_frames;
        self.tracks.retain(|t| t.frames_lost <= max_lost);

        &self.tracks
    }

    /// 贪心 IOU 匹配, 返回 (检测索引, 轨迹索引)
    fn match_detections_to_tracks(
        &self,
        detections: &[Bbox],
        det_indices: &[usize],
        track_indices: &[usize],
        iou_threshold: f32,
    ) -> Vec<(usize, usize)> {
        if det_indices.is_empty() || track_indices.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for (local_det_idx, &det_idx) in det_indices.iter().enumerate() {
            for (local_track_idx, &track_idx) in track_indices.iter().enumerate() {
                let predicted = self.tracks[track_idx].get_predicted_bbox();
                let iou = detections[det_idx].iou(&predicted);
                if iou >= iou_threshold {
                    candidates.push((1.0 - iou, det_idx, local_det_idx, track_idx, local_track_idx));
                }
            }
        }

        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut assignments = Vec::new();
        let mut used_det = vec![false; det_indices.len()];
        let mut used_track = vec![false; track_indices.len()];
        for (_, det_idx, local_det_idx, track_idx, local_track_idx) in candidates {
            if !used_det[local_det_idx] && !used_track[local_track_idx] {
                assignments.push((det_idx, track_idx));
                used_det[local_det_idx] = true;
                used_track[local_track_idx] = true;
            }
        }
        assignments
    }

    /// 获取跟踪统计信息
    pub fn get_stats(&self) -> String {
        format!("跟踪: {} 个 | 总ID: {}", self.tracks.len(), self.next_id - 1)
    }
}

impl Default for ByteTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_persist_across_frames() {
        let mut tracker = ByteTracker::new();
        let a = Bbox::new(10., 10., 20., 20., 0, 0.9);
        let b = Bbox::new(100., 100., 20., 20., 2, 0.8);

        let ids: Vec<u32> = tracker.update(&[a.clone(), b.clone()]).iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2]);

        // 轻微移动后仍保持ID
        let a2 = Bbox::new(12., 11., 20., 20., 0, 0.9);
        let b2 = Bbox::new(101., 102., 20., 20., 2, 0.8);
        let tracks = tracker.update(&[b2, a2]);
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|t| t.is_active()));
        let a_track = tracks.iter().find(|t| t.class_id == 0).unwrap();
        assert_eq!(a_track.id, 1);
        assert_eq!(a_track.to_bbox().track_id(), Some(1));
    }

    #[test]
    fn test_low_score_does_not_spawn_track() {
        let mut tracker = ByteTracker::new();
        assert!(tracker.update(&[Bbox::new(0., 0., 10., 10., 0, 0.3)]).is_empty());

        let mut tracker = ByteTracker::new().with_high_score_threshold(0.25);
        assert_eq!(tracker.update(&[Bbox::new(0., 0., 10., 10., 0, 0.3)]).len(), 1);
    }

    #[test]
    fn test_lost_tracks_expire() {
        let mut tracker = ByteTracker::new();
        tracker.update(&[Bbox::new(0., 0., 10., 10., 0, 0.9)]);
        for _ in 0..29 {
            tracker.update(&[]);
        }
        let tracks = tracker.update(&[]);
        assert_eq!(tracks.len(), 1);
        assert!(!tracks[0].is_active());
        assert!(tracker.update(&[]).is_empty());
        assert_eq!(tracker.get_stats(), "跟踪: 0 个 | 总ID: 1");
    }
}
