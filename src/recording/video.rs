// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 视频录制 (Video Recorder)
//!
//! 编码交给 `ffmpeg` 可执行文件: 从 stdin 读取 bgr24 原始帧,
//! 输出 MPEG-4 Part 2 (mp4v) 的 MP4 文件, 帧率与分辨率在启动时固定.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use super::{RecorderState, SessionStamp};
use crate::camera::Frame;
use crate::error::{PipelineError, PipelineResult};

/// 已打开的编码器
pub trait VideoEncoder {
    fn write_frame(&mut self, frame: &Frame) -> PipelineResult<()>;

    /// 写入文件尾并关闭
    fn finish(self: Box<Self>) -> PipelineResult<()>;
}

/// 编码器工厂
pub trait EncoderBackend {
    fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> PipelineResult<Box<dyn VideoEncoder>>;
}

fn output_unavailable(path: &Path, reason: impl ToString) -> PipelineError {
    PipelineError::OutputUnavailable {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// `ffmpeg` 子进程编码
#[derive(Clone, Debug)]
pub struct FfmpegBackend {
    program: String,
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
        }
    }
}

impl FfmpegBackend {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl EncoderBackend for FfmpegBackend {
    fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> PipelineResult<Box<dyn VideoEncoder>> {
        // 先确认文件可写, 错误信息比 ffmpeg 的更直接
        std::fs::File::create(path).map_err(|e| output_unavailable(path, e))?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("bgr24")
            .arg("-s")
            .arg(format!("{}x{}", width, height))
            .arg("-r")
            .arg(fps.to_string())
            .arg("-i")
            .arg("-")
            .arg("-an")
            .arg("-c:v")
            .arg("mpeg4")
            .arg("-tag:v")
            .arg("mp4v")
            .arg("-q:v")
            .arg("5")
            .arg("-f")
            .arg("mp4")
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = std::fs::remove_file(path);
                return Err(output_unavailable(
                    path,
                    format!("failed to spawn {}: {}", self.program, e),
                ));
            }
        };
        let stdin = child.stdin.take();

        Ok(Box::new(FfmpegEncoder {
            child,
            stdin,
            frame_bytes: width as usize * height as usize * 3,
        }))
    }
}

struct FfmpegEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    frame_bytes: usize,
}

impl FfmpegEncoder {
    fn close(&mut self) -> std::io::Result<std::process::ExitStatus> {
        drop(self.stdin.take()); // EOF → ffmpeg 写入文件尾
        self.child.wait()
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn write_frame(&mut self, frame: &Frame) -> PipelineResult<()> {
        if frame.data.len() != self.frame_bytes {
            return Err(PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("frame has {} bytes, encoder expects {}", frame.data.len(), self.frame_bytes),
            )));
        }
        match self.stdin.as_mut() {
            Some(stdin) => Ok(stdin.write_all(&frame.data)?),
            None => Err(PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "encoder already closed",
            ))),
        }
    }

    fn finish(mut self: Box<Self>) -> PipelineResult<()> {
        let status = self.close()?;
        if !status.success() {
            return Err(PipelineError::Io(std::io::Error::other(format!(
                "ffmpeg exited with {}",
                status
            ))));
        }
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            let _ = self.close();
        }
    }
}

/// 视频录制器: Armed → Recording → Stopped
pub struct VideoRecorder {
    output_dir: PathBuf,
    prefix: String,
    backend: Box<dyn EncoderBackend>,

    state: RecorderState,
    encoder: Option<Box<dyn VideoEncoder>>,
    stamp: Option<SessionStamp>,
    path: Option<PathBuf>,
    frame_size: (u32, u32),
    frames_written: u64,
    frames_skipped: u64,
}

impl VideoRecorder {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        backend: Box<dyn EncoderBackend>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            prefix: prefix.into(),
            backend,
            state: RecorderState::Armed,
            encoder: None,
            stamp: None,
            path: None,
            frame_size: (0, 0),
            frames_written: 0,
            frames_skipped: 0,
        }
    }

    /// 打开输出文件; 未传入时间戳时生成一个新的
    pub fn start(
        &mut self,
        width: u32,
        height: u32,
        fps: u32,
        stamp: Option<SessionStamp>,
    ) -> PipelineResult<SessionStamp> {
        match self.state {
            RecorderState::Armed => {}
            RecorderState::Recording => {
                if let Some(stamp) = &self.stamp {
                    return Ok(stamp.clone());
                }
            }
            RecorderState::Stopped => {
                return Err(output_unavailable(&self.output_dir, "recorder already stopped"));
            }
        }

        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| output_unavailable(&self.output_dir, e))?;

        let stamp = stamp.unwrap_or_else(SessionStamp::now);
        let path = self.output_dir.join(stamp.file_name(&self.prefix, "mp4"));
        let encoder = match self.backend.open(&path, width, height, fps) {
            Ok(encoder) => encoder,
            Err(e) => {
                tracing::error!("❌ 无法打开视频文件 {}: {}", path.display(), e);
                return Err(e);
            }
        };

        tracing::info!(
            "🎬 开始录制: {} ({}x{} @ {}fps)",
            path.display(),
            width,
            height,
            fps
        );
        self.encoder = Some(encoder);
        self.stamp = Some(stamp.clone());
        self.path = Some(path);
        self.frame_size = (width, height);
        self.state = RecorderState::Recording;
        Ok(stamp)
    }

    /// 写入一帧; 未在录制时什么也不做
    pub fn write(&mut self, frame: &Frame) {
        if self.state != RecorderState::Recording {
            return;
        }
        if (frame.width, frame.height) != self.frame_size || !frame.is_valid() {
            self.frames_skipped += 1;
            if self.frames_skipped == 1 {
                tracing::warn!(
                    "⚠️ 跳过尺寸不符的帧: {}x{} (录制尺寸 {}x{})",
                    frame.width,
                    frame.height,
                    self.frame_size.0,
                    self.frame_size.1
                );
            }
            return;
        }
        let Some(encoder) = self.encoder.as_mut() else {
            return;
        };
        match encoder.write_frame(frame) {
            Ok(()) => self.frames_written += 1,
            Err(e) => {
                tracing::error!("❌ 视频写入失败, 停止录制: {}", e);
                self.stop();
            }
        }
    }

    /// 结束录制 (可重复调用)
    pub fn stop(&mut self) {
        if self.state == RecorderState::Stopped {
            return;
        }
        self.state = RecorderState::Stopped;
        if let Some(encoder) = self.encoder.take() {
            match encoder.finish() {
                Ok(()) => tracing::info!(
                    "💾 录制完成: {} ({} 帧)",
                    self.path.as_deref().unwrap_or(Path::new("")).display(),
                    self.frames_written
                ),
                Err(e) => tracing::error!("❌ 视频文件关闭失败: {}", e),
            }
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Recording
    }

    pub fn stamp(&self) -> Option<&SessionStamp> {
        self.stamp.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Drop for VideoRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// 记录写入帧数的编码器
    #[derive(Clone, Default)]
    struct CountingBackend {
        frames: Arc<Mutex<Vec<usize>>>,
        finished: Arc<Mutex<bool>>,
        fail_after: Option<usize>,
    }

    struct CountingEncoder {
        backend: CountingBackend,
    }

    impl EncoderBackend for CountingBackend {
        fn open(&self, path: &Path, _w: u32, _h: u32, _fps: u32) -> PipelineResult<Box<dyn VideoEncoder>> {
            std::fs::write(path, b"")?;
            Ok(Box::new(CountingEncoder {
                backend: self.clone(),
            }))
        }
    }

    impl VideoEncoder for CountingEncoder {
        fn write_frame(&mut self, frame: &Frame) -> PipelineResult<()> {
            let mut frames = self.backend.frames.lock().unwrap();
            if Some(frames.len()) == self.backend.fail_after {
                return Err(PipelineError::Io(std::io::Error::other("disk full")));
            }
            frames.push(frame.data.len());
            Ok(())
        }

        fn finish(self: Box<Self>) -> PipelineResult<()> {
            *self.backend.finished.lock().unwrap() = true;
            Ok(())
        }
    }

    #[test]
    fn test_write_before_start_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("rec");
        let backend = CountingBackend::default();
        let mut recorder = VideoRecorder::new(&out, "recording", Box::new(backend.clone()));

        recorder.write(&Frame::zeros(8, 8));
        assert_eq!(recorder.state(), RecorderState::Armed);
        assert_eq!(recorder.frames_written(), 0);
        assert!(!out.exists());
        assert!(backend.frames.lock().unwrap().is_empty());
    }

    #[test]
    fn test_start_write_stop() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CountingBackend::default();
        let mut recorder = VideoRecorder::new(dir.path(), "recording", Box::new(backend.clone()));

        let stamp = SessionStamp::new("20240101_000000");
        let used = recorder.start(8, 8, 30, Some(stamp.clone())).unwrap();
        assert_eq!(used, stamp);
        assert_eq!(recorder.path().unwrap(), dir.path().join("recording_20240101_000000.mp4"));
        assert!(recorder.path().unwrap().exists());

        for _ in 0..3 {
            recorder.write(&Frame::zeros(8, 8));
        }
        recorder.write(&Frame::zeros(4, 4)); // 尺寸不符, 跳过
        assert_eq!(recorder.frames_written(), 3);

        recorder.stop();
        recorder.stop();
        assert_eq!(recorder.state(), RecorderState::Stopped);
        assert!(*backend.finished.lock().unwrap());

        recorder.write(&Frame::zeros(8, 8));
        assert_eq!(backend.frames.lock().unwrap().len(), 3);
        assert!(recorder.start(8, 8, 30, None).is_err());
    }

    #[test]
    fn test_write_failure_stops_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CountingBackend {
            fail_after: Some(2),
            ..CountingBackend::default()
        };
        let mut recorder = VideoRecorder::new(dir.path(), "recording", Box::new(backend));
        recorder.start(8, 8, 30, None).unwrap();
        for _ in 0..5 {
            recorder.write(&Frame::zeros(8, 8));
        }
        assert_eq!(recorder.frames_written(), 2);
        assert_eq!(recorder.state(), RecorderState::Stopped);
    }

    #[test]
    fn test_unwritable_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let mut recorder = VideoRecorder::new(&blocker, "recording", Box::new(FfmpegBackend::default()));
        let err = recorder.start(8, 8, 30, None).unwrap_err();
        assert!(matches!(err, PipelineError::OutputUnavailable { .. }));
        assert_eq!(recorder.state(), RecorderState::Armed);
    }

    #[test]
    fn test_missing_encoder_program() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FfmpegBackend::with_program("ffmpeg-binary-that-does-not-exist");
        let mut recorder = VideoRecorder::new(dir.path(), "recording", Box::new(backend));
        let err = recorder.start(8, 8, 30, None).unwrap_err();
        assert!(matches!(err, PipelineError::OutputUnavailable { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
