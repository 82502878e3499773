// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 运行设置 (Settings)
//!
//! 读取两个配置文档, 以项目根目录解析所有相对路径,
//! 并在连接相机之前校验模型文件是否存在.

use std::path::{Path, PathBuf};

use serde_yaml::Mapping;

use crate::config::{self, ModelConfig, PipelineConfig, RuntimeTarget};
use crate::error::{PipelineError, PipelineResult};

/// 已解析、已校验的运行配置 (构造后不可变)
#[derive(Clone, Debug)]
pub struct Settings {
    root: PathBuf,
    pipeline_document: Mapping,
    model_document: Mapping,
    pipeline: PipelineConfig,
    model: ModelConfig,
    output_dir: PathBuf,
    model_path: PathBuf,
}

impl Settings {
    /// 从配置文件路径构造, 以 [`config::project_root`] 为根目录
    pub fn load(
        pipeline_config_path: impl AsRef<Path>,
        model_config_path: impl AsRef<Path>,
    ) -> PipelineResult<Self> {
        Self::load_with_root(pipeline_config_path, model_config_path, config::project_root())
    }

    pub fn load_with_root(
        pipeline_config_path: impl AsRef<Path>,
        model_config_path: impl AsRef<Path>,
        root: impl Into<PathBuf>,
    ) -> PipelineResult<Self> {
        let pipeline_path = pipeline_config_path.as_ref();
        let model_path = model_config_path.as_ref();
        let pipeline_document = config::load_document(pipeline_path)?;
        let model_document = config::load_document(model_path)?;

        let pipeline: PipelineConfig = config::decode(&pipeline_document, pipeline_path)?;
        let model: ModelConfig = config::decode(&model_document, model_path)?;

        Self::from_parts(root.into(), pipeline_document, model_document, pipeline, model)
    }

    /// 从内存中的文档构造 (不触碰配置文件)
    pub fn from_documents(
        pipeline_document: Mapping,
        model_document: Mapping,
        root: impl Into<PathBuf>,
    ) -> PipelineResult<Self> {
        let origin = Path::new("<memory>");
        let pipeline: PipelineConfig = config::decode(&pipeline_document, origin)?;
        let model: ModelConfig = config::decode(&model_document, origin)?;
        Self::from_parts(root.into(), pipeline_document, model_document, pipeline, model)
    }

    fn from_parts(
        root: PathBuf,
        pipeline_document: Mapping,
        model_document: Mapping,
        pipeline: PipelineConfig,
        model: ModelConfig,
    ) -> PipelineResult<Self> {
        let output_dir = root.join(&pipeline.camera_feed_output_dir);
        let model_path = root.join("models").join(&model.model);

        let settings = Self {
            root,
            pipeline_document,
            model_document,
            pipeline,
            model,
            output_dir,
            model_path,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> PipelineResult<()> {
        if self.inference_enabled() && !self.model_path.is_file() {
            tracing::error!("❌ 模型文件不存在: {}", self.model_path.display());
            return Err(PipelineError::ModelNotFound(self.model_path.clone()));
        }
        tracing::debug!("✅ 配置校验通过, 项目根目录: {}", self.root.display());
        Ok(())
    }

    /// 是否对每帧执行推理
    pub fn inference_enabled(&self) -> bool {
        self.pipeline.inference_enabled
    }

    /// 是否录制视频到磁盘
    pub fn recording_enabled(&self) -> bool {
        self.pipeline.recording_enabled
    }

    /// 是否显示实时预览窗口
    pub fn live_view_enabled(&self) -> bool {
        self.pipeline.live_view_enabled
    }

    /// 是否采集陀螺仪数据
    pub fn record_gyroscope(&self) -> bool {
        self.pipeline.record_gyroscope
    }

    pub fn fps(&self) -> u32 {
        self.pipeline.fps
    }

    pub fn runtime_target(&self) -> RuntimeTarget {
        self.pipeline.dev_or_pi
    }

    pub fn camera_device(&self) -> &str {
        &self.pipeline.camera_device
    }

    pub fn imu_device(&self) -> Option<&Path> {
        self.pipeline.imu_device.as_deref().map(Path::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn model_config(&self) -> &ModelConfig {
        &self.model
    }

    pub fn pipeline_config(&self) -> &PipelineConfig {
        &self.pipeline
    }

    /// 原始流水线文档 (供需要额外键的组件读取)
    pub fn pipeline_document(&self) -> &Mapping {
        &self.pipeline_document
    }

    /// 原始模型文档
    pub fn model_document(&self) -> &Mapping {
        &self.model_document
    }
}
