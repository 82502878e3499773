// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// OAK-D 采集 / 检测 / 录制 主程序
///
/// 直接运行: cargo run --bin run-pipeline --release
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use oakd_tracking::display::{window_conf, MacroquadView};
use oakd_tracking::{Pipeline, Settings};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "OAK-D 相机采集与目标检测", long_about = None)]
struct Args {
    /// 流水线配置 (pipeline_config.yaml)
    #[arg(long, default_value = "configs/pipeline_config.yaml")]
    pipeline_config: PathBuf,

    /// 模型配置 (model_config.yaml)
    #[arg(long, default_value = "configs/model_config.yaml")]
    model_config: PathBuf,
}

fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();

    let settings = match Settings::load(&args.pipeline_config, &args.model_config) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("❌ 配置错误: {}", e);
            std::process::exit(1);
        }
    };

    let pipeline: Pipeline<MacroquadView> = match Pipeline::from_settings(&settings) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!("❌ 初始化失败: {}", e);
            std::process::exit(1);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        handler_shutdown.store(true, Ordering::SeqCst);
    }) {
        tracing::warn!("⚠️ 无法注册 Ctrl+C 处理: {}", err);
    }
    let mut pipeline = pipeline.with_stop_flag(shutdown);

    if settings.live_view_enabled() {
        // 预览窗口必须在 macroquad 事件循环内创建
        macroquad::Window::from_config(window_conf(), async move {
            pipeline.attach_view(MacroquadView::new());
            let outcome = pipeline.run().await;
            tracing::info!("🏁 结束: {:?}", outcome);
            std::process::exit(outcome.exit_code());
        });
    } else {
        let outcome = pollster::block_on(pipeline.run());
        tracing::info!("🏁 结束: {:?}", outcome);
        std::process::exit(outcome.exit_code());
    }
}
