// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 错误类型 (Error taxonomy)
//!
//! - 配置错误: 缺失/空配置文档, 模型文件不存在 → 启动前致命
//! - 设备错误: 相机连接失败, 编码器打开失败 → 致命
//! - 单帧错误不在此列: 推理失败在检测器内部降级为 "无结果"

use std::path::PathBuf;

use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("config empty: {0}")]
    ConfigEmpty(PathBuf),

    #[error("config invalid: {path}: {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    #[error("model not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("model failed to load: {0}")]
    ModelLoad(String),

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("cannot open output {path}: {reason}")]
    OutputUnavailable { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// 配置类错误 (任何硬件访问之前发生)
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            PipelineError::ConfigNotFound(_)
                | PipelineError::ConfigEmpty(_)
                | PipelineError::ConfigParse { .. }
                | PipelineError::ModelNotFound(_)
        )
    }
}
