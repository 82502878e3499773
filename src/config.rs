// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 配置文档加载 - 通过YAML文件调整参数
//!
//! 两个文档:
//! - pipeline_config.yaml: 功能开关 / 输出目录 / 相机参数
//! - model_config.yaml:    模型文件 + 推理参数 (conf / classes / persist / verbose)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::{PipelineError, PipelineResult};

/// 覆盖项目根目录的环境变量
pub const PROJECT_ROOT_ENV: &str = "OAKD_PROJECT_ROOT";

/// 项目根目录: 所有相对路径 (输出目录、models/) 以此为锚点
pub fn project_root() -> PathBuf {
    std::env::var_os(PROJECT_ROOT_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")))
}

/// 读取一个YAML键值文档
///
/// - 文件不存在 → `ConfigNotFound`
/// - 解析结果为空 (空文件 / 只有注释 / `null`) → `ConfigEmpty`
/// - 语法错误或顶层不是映射 → `ConfigParse`
pub fn load_document(path: impl AsRef<Path>) -> PipelineResult<Mapping> {
    let path = path.as_ref();
    if !path.is_file() {
        tracing::error!("❌ 配置文件不存在: {}", path.display());
        return Err(PipelineError::ConfigNotFound(path.to_path_buf()));
    }

    let text = std::fs::read_to_string(path)?;
    let value: Value = serde_yaml::from_str(&text).map_err(|e| PipelineError::ConfigParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    match value {
        Value::Null => {
            tracing::error!("❌ 配置文件为空: {}", path.display());
            Err(PipelineError::ConfigEmpty(path.to_path_buf()))
        }
        Value::Mapping(map) => {
            tracing::debug!("📄 已加载配置: {}", path.display());
            Ok(map)
        }
        other => Err(PipelineError::ConfigParse {
            path: path.to_path_buf(),
            reason: format!("expected a key-value mapping, found {}", value_kind(&other)),
        }),
    }
}

/// 把原始映射解码为带默认值的强类型视图
pub fn decode<T: serde::de::DeserializeOwned>(doc: &Mapping, origin: &Path) -> PipelineResult<T> {
    serde_yaml::from_value(Value::Mapping(doc.clone())).map_err(|e| PipelineError::ConfigParse {
        path: origin.to_path_buf(),
        reason: e.to_string(),
    })
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// 运行环境 (开发机 / 树莓派)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeTarget {
    #[default]
    Dev,
    Pi,
}

/// 流水线配置 (pipeline_config.yaml)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub inference_enabled: bool,
    pub recording_enabled: bool,
    pub live_view_enabled: bool,
    pub record_gyroscope: bool,
    pub camera_feed_output_dir: String,
    pub dev_or_pi: RuntimeTarget,

    // === 相机参数 ===
    pub fps: u32,
    pub camera_device: String,
    pub imu_device: Option<String>, // None: 自动查找IIO陀螺仪
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inference_enabled: false,
            recording_enabled: false,
            live_view_enabled: true,
            record_gyroscope: false,
            camera_feed_output_dir: "output/recordings/".to_string(),
            dev_or_pi: RuntimeTarget::Dev,
            fps: 30,
            camera_device: default_camera_device(),
            imu_device: None,
        }
    }
}

fn default_camera_device() -> String {
    #[cfg(target_os = "linux")]
    {
        "/dev/video0".to_string()
    }
    #[cfg(not(target_os = "linux"))]
    {
        "0".to_string()
    }
}

/// 类别过滤: 单个类别ID或ID列表
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassFilter {
    One(usize),
    Many(Vec<usize>),
}

impl ClassFilter {
    pub fn contains(&self, class_id: usize) -> bool {
        match self {
            ClassFilter::One(id) => *id == class_id,
            ClassFilter::Many(ids) => ids.contains(&class_id),
        }
    }
}

/// 模型配置 (model_config.yaml)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model: String, // models/ 目录下的文件名

    // === 推理参数 ===
    pub conf: f32,                     // 置信度阈值
    pub classes: Option<ClassFilter>,  // None: 全部类别
    pub persist: bool,                 // true: 跟踪模式 (ByteTrack), false: 单帧检测
    pub verbose: bool,                 // 逐帧调试日志
    pub iou: f32,                      // NMS IOU阈值
    pub imgsz: u32,                    // 模型输入尺寸 (动态输入时使用)
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            conf: 0.25,
            classes: None,
            persist: false,
            verbose: false,
            iou: 0.45,
            imgsz: 640,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_doc(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_missing_document() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_document(dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigNotFound(_)));
    }

    #[test]
    fn test_empty_and_comment_only_documents() {
        let dir = tempfile::tempdir().unwrap();
        let empty = write_doc(dir.path(), "empty.yaml", "");
        let comments = write_doc(dir.path(), "comments.yaml", "# nothing here\n");
        assert!(matches!(load_document(empty), Err(PipelineError::ConfigEmpty(_))));
        assert!(matches!(load_document(comments), Err(PipelineError::ConfigEmpty(_))));
    }

    #[test]
    fn test_non_mapping_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(dir.path(), "list.yaml", "- a\n- b\n");
        assert!(matches!(
            load_document(path),
            Err(PipelineError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_pipeline_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(dir.path(), "p.yaml", "recording_enabled: true\n");
        let doc = load_document(&path).unwrap();
        let cfg: PipelineConfig = decode(&doc, &path).unwrap();
        assert!(cfg.recording_enabled);
        assert!(!cfg.inference_enabled);
        assert!(cfg.live_view_enabled);
        assert!(!cfg.record_gyroscope);
        assert_eq!(cfg.camera_feed_output_dir, "output/recordings/");
        assert_eq!(cfg.dev_or_pi, RuntimeTarget::Dev);
        assert_eq!(cfg.fps, 30);
    }

    #[test]
    fn test_model_config_classes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(
            dir.path(),
            "m.yaml",
            "model: boats.onnx\nconf: 0.4\nclasses: [8]\npersist: true\nverbose: false\nunknown_key: 3\n",
        );
        let doc = load_document(&path).unwrap();
        let cfg: ModelConfig = decode(&doc, &path).unwrap();
        assert_eq!(cfg.model, "boats.onnx");
        assert!((cfg.conf - 0.4).abs() < 1e-6);
        assert!(cfg.persist);
        let classes = cfg.classes.unwrap();
        assert!(classes.contains(8));
        assert!(!classes.contains(0));

        let single = write_doc(dir.path(), "s.yaml", "model: a.onnx\nclasses: 3\n");
        let doc = load_document(&single).unwrap();
        let cfg: ModelConfig = decode(&doc, &single).unwrap();
        assert_eq!(cfg.classes, Some(ClassFilter::One(3)));
    }
}
