// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 陀螺仪录制 (Motion Recorder) - 每行一个 JSON 对象

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{RecorderState, SessionStamp};
use crate::camera::MotionReading;
use crate::error::{PipelineError, PipelineResult};

pub struct MotionRecorder {
    output_dir: PathBuf,
    prefix: String,

    state: RecorderState,
    writer: Option<BufWriter<File>>,
    stamp: Option<SessionStamp>,
    path: Option<PathBuf>,
    readings_written: u64,
}

impl MotionRecorder {
    pub fn new(output_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            prefix: prefix.into(),
            state: RecorderState::Armed,
            writer: None,
            stamp: None,
            path: None,
            readings_written: 0,
        }
    }

    pub fn start(&mut self, stamp: Option<SessionStamp>) -> PipelineResult<SessionStamp> {
        match self.state {
            RecorderState::Armed => {}
            RecorderState::Recording => {
                if let Some(stamp) = &self.stamp {
                    return Ok(stamp.clone());
                }
            }
            RecorderState::Stopped => {
                return Err(PipelineError::OutputUnavailable {
                    path: self.output_dir.clone(),
                    reason: "recorder already stopped".to_string(),
                });
            }
        }

        let stamp = stamp.unwrap_or_else(SessionStamp::now);
        let path = self.output_dir.join(stamp.file_name(&self.prefix, "jsonl"));
        let file = std::fs::create_dir_all(&self.output_dir)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&path))
            .map_err(|e| PipelineError::OutputUnavailable {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!("🧭 开始记录陀螺仪: {}", path.display());
        self.writer = Some(BufWriter::new(file));
        self.stamp = Some(stamp.clone());
        self.path = Some(path);
        self.state = RecorderState::Recording;
        Ok(stamp)
    }

    /// 追加读数并刷新; 未在录制时什么也不做
    pub fn write(&mut self, readings: &[MotionReading]) {
        if self.state != RecorderState::Recording {
            return;
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        match write_lines(writer, readings) {
            Ok(()) => self.readings_written += readings.len() as u64,
            Err(e) => {
                tracing::error!("❌ 陀螺仪数据写入失败, 停止记录: {}", e);
                self.stop();
            }
        }
    }

    /// 刷新并关闭 (可重复调用)
    pub fn stop(&mut self) {
        if self.state == RecorderState::Stopped {
            return;
        }
        self.state = RecorderState::Stopped;
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                tracing::error!("❌ 陀螺仪文件关闭失败: {}", e);
            } else {
                tracing::info!(
                    "💾 陀螺仪记录完成: {} ({} 条)",
                    self.path.as_deref().unwrap_or(Path::new("")).display(),
                    self.readings_written
                );
            }
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn stamp(&self) -> Option<&SessionStamp> {
        self.stamp.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn readings_written(&self) -> u64 {
        self.readings_written
    }
}

fn write_lines(writer: &mut BufWriter<File>, readings: &[MotionReading]) -> std::io::Result<()> {
    for reading in readings {
        serde_json::to_writer(&mut *writer, reading)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

impl Drop for MotionRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(t: f64) -> MotionReading {
        MotionReading {
            timestamp: t,
            x: 0.1,
            y: -0.2,
            z: 0.3,
        }
    }

    #[test]
    fn test_write_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = MotionRecorder::new(dir.path().join("out"), "gyro");
        recorder.write(&[reading(0.0)]); // 未启动, 忽略
        assert!(!dir.path().join("out").exists());

        let stamp = recorder.start(Some(SessionStamp::new("20240101_000000"))).unwrap();
        assert_eq!(stamp.as_str(), "20240101_000000");
        recorder.write(&[reading(1.0), reading(2.0)]);
        recorder.write(&[reading(3.0)]);

        // 每次写入后已刷新
        let path = dir.path().join("out/gyro_20240101_000000.jsonl");
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);

        let value: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(value["timestamp"], 2.0);
        assert_eq!(value["y"], -0.2);
        let parsed: MotionReading = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(parsed, reading(3.0));

        recorder.stop();
        recorder.stop();
        recorder.write(&[reading(4.0)]);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
        assert_eq!(recorder.readings_written(), 3);
    }

    #[test]
    fn test_unwritable_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let mut recorder = MotionRecorder::new(&blocker, "gyro");
        let err = recorder.start(None).unwrap_err();
        assert!(matches!(err, PipelineError::OutputUnavailable { .. }));
    }
}
