// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 实时预览窗口 (Live View)

use macroquad::prelude::*;

use crate::camera::Frame;

/// 预览窗口标题
pub const WINDOW_TITLE: &str = "OAK-D Feed";

/// 预览窗口反馈给主循环的事件
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewEvent {
    Continue,
    Quit,
}

/// 逐帧显示; 每次显示后让出一次事件循环
#[allow(async_fn_in_trait)]
pub trait LiveView {
    async fn present(&mut self, frame: &Frame) -> ViewEvent;

    /// 相机暂无新帧时调用, 窗口仍需处理按键和关闭事件
    async fn idle(&mut self) -> ViewEvent {
        ViewEvent::Continue
    }

    fn close(&mut self);
}

/// 默认窗口配置
pub fn window_conf() -> Conf {
    Conf {
        window_title: WINDOW_TITLE.to_owned(),
        window_width: 1280,
        window_height: 720,
        high_dpi: true,
        ..Default::default()
    }
}

/// macroquad 窗口 (必须在 macroquad 的事件循环内创建)
pub struct MacroquadView {
    texture: Option<Texture2D>,
    closed: bool,
}

impl MacroquadView {
    pub fn new() -> Self {
        // 关闭按钮与按键 q 走同一个退出流程
        prevent_quit();
        Self {
            texture: None,
            closed: false,
        }
    }

    fn upload(&mut self, frame: &Frame) {
        let rgba = frame.to_rgba();
        // 只在分辨率变化时重建纹理，否则更新像素数据
        let needs_rebuild = match &self.texture {
            Some(tex) => tex.width() != frame.width as f32 || tex.height() != frame.height as f32,
            None => true,
        };

        if needs_rebuild {
            let texture = Texture2D::from_rgba8(frame.width as u16, frame.height as u16, &rgba);
            texture.set_filter(FilterMode::Linear);
            self.texture = Some(texture);
        } else if let Some(tex) = &self.texture {
            let img = Image {
                bytes: rgba,
                width: frame.width as u16,
                height: frame.height as u16,
            };
            tex.update(&img);
        }
    }

    fn draw(&self) {
        clear_background(BLACK);
        let Some(texture) = &self.texture else {
            return;
        };

        // 等比缩放并居中
        let scale = (screen_width() / texture.width()).min(screen_height() / texture.height());
        let scaled_width = texture.width() * scale;
        let scaled_height = texture.height() * scale;
        draw_texture_ex(
            texture,
            (screen_width() - scaled_width) / 2.0,
            (screen_height() - scaled_height) / 2.0,
            WHITE,
            DrawTextureParams {
                dest_size: Some(vec2(scaled_width, scaled_height)),
                ..Default::default()
            },
        );
    }

    /// 绘制当前纹理并交出一帧给 macroquad
    async fn finish_frame(&mut self) -> ViewEvent {
        self.draw();

        let quit = is_key_pressed(KeyCode::Q) || is_key_pressed(KeyCode::Escape) || is_quit_requested();
        next_frame().await;

        if quit {
            tracing::info!("👋 预览窗口请求退出");
            ViewEvent::Quit
        } else {
            ViewEvent::Continue
        }
    }
}

impl Default for MacroquadView {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveView for MacroquadView {
    async fn present(&mut self, frame: &Frame) -> ViewEvent {
        if self.closed {
            return ViewEvent::Quit;
        }
        if frame.is_valid() && frame.width <= u16::MAX as u32 && frame.height <= u16::MAX as u32 {
            self.upload(frame);
        }
        self.finish_frame().await
    }

    async fn idle(&mut self) -> ViewEvent {
        if self.closed {
            return ViewEvent::Quit;
        }
        self.finish_frame().await
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.texture = None;
        tracing::debug!("🪟 预览窗口已关闭");
    }
}
