// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 陀螺仪采集 - Linux IIO 子系统
//!
//! 深度相机的IMU以 IIO 设备出现 (例如 `hid-sensor-gyro-3d`),
//! 通过 sysfs 读取 `in_anglvel_{x,y,z}_raw` 并乘以比例系数得到 rad/s.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use super::MotionReading;
use crate::error::{PipelineError, PipelineResult};

/// IIO 设备根目录
pub const IIO_DEVICES_DIR: &str = "/sys/bus/iio/devices";

/// 陀螺仪采样率
pub const GYRO_RATE_HZ: u32 = 100;

/// 陀螺仪队列容量 (满了丢弃最旧读数)
pub const GYRO_QUEUE_SIZE: usize = 50;

/// 单个 IIO 陀螺仪设备
#[derive(Clone, Debug)]
pub struct IioGyroscope {
    dir: PathBuf,
    scale: [f64; 3],
}

impl IioGyroscope {
    /// 打开指定设备目录, 或在 `/sys/bus/iio/devices` 下查找第一个陀螺仪
    pub fn open(device: Option<&Path>) -> PipelineResult<Self> {
        let dir = match device {
            Some(dir) => dir.to_path_buf(),
            None => Self::discover(Path::new(IIO_DEVICES_DIR)).ok_or_else(|| {
                PipelineError::DeviceUnavailable("no IIO gyroscope found".to_string())
            })?,
        };
        Self::open_dir(dir)
    }

    /// 查找第一个暴露角速度通道的 IIO 设备
    pub fn discover(root: &Path) -> Option<PathBuf> {
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(root)
            .ok()?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.join("in_anglvel_x_raw").is_file())
            .collect();
        candidates.sort();
        candidates.into_iter().next()
    }

    fn open_dir(dir: PathBuf) -> PipelineResult<Self> {
        if !dir.join("in_anglvel_x_raw").is_file() {
            return Err(PipelineError::DeviceUnavailable(format!(
                "{} is not an IIO gyroscope",
                dir.display()
            )));
        }

        // 共享比例系数 in_anglvel_scale, 或每轴 in_anglvel_{axis}_scale
        let shared = read_f64(&dir.join("in_anglvel_scale")).ok();
        let mut scale = [1.0; 3];
        for (i, axis) in ["x", "y", "z"].iter().enumerate() {
            scale[i] = read_f64(&dir.join(format!("in_anglvel_{}_scale", axis)))
                .ok()
                .or(shared)
                .unwrap_or(1.0);
        }

        tracing::info!("🧭 陀螺仪: {}", dir.display());
        Ok(Self { dir, scale })
    }

    /// 读取一个样本 (墙钟时间戳, 便于与视频帧离线对齐)
    pub fn sample(&self) -> std::io::Result<MotionReading> {
        let x = read_f64(&self.dir.join("in_anglvel_x_raw"))? * self.scale[0];
        let y = read_f64(&self.dir.join("in_anglvel_y_raw"))? * self.scale[1];
        let z = read_f64(&self.dir.join("in_anglvel_z_raw"))? * self.scale[2];
        Ok(MotionReading {
            timestamp: wall_clock_seconds(),
            x,
            y,
            z,
        })
    }
}

fn read_f64(path: &Path) -> std::io::Result<f64> {
    let text = std::fs::read_to_string(path)?;
    text.trim()
        .parse::<f64>()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

fn wall_clock_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// 陀螺仪后台采样线程
pub struct GyroSampler {
    rx: Receiver<MotionReading>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl GyroSampler {
    pub fn spawn(gyro: IioGyroscope, rate_hz: u32) -> Self {
        let (tx, rx) = bounded(GYRO_QUEUE_SIZE);
        let stop = Arc::new(AtomicBool::new(false));
        let period = Duration::from_secs_f64(1.0 / rate_hz.max(1) as f64);

        let stop_flag = stop.clone();
        let drain = rx.clone();
        let handle = std::thread::spawn(move || {
            let mut failures = 0u32;
            while !stop_flag.load(Ordering::Relaxed) {
                match gyro.sample() {
                    Ok(reading) => {
                        failures = 0;
                        push_latest(&tx, &drain, reading);
                    }
                    Err(e) => {
                        failures += 1;
                        if failures == 1 {
                            tracing::warn!("⚠️ 陀螺仪读取失败: {}", e);
                        }
                    }
                }
                std::thread::sleep(period);
            }
            tracing::debug!("🧭 陀螺仪采样线程结束");
        });

        Self {
            rx,
            stop,
            handle: Some(handle),
        }
    }

    /// 取出所有已累积的读数
    pub fn drain(&self) -> Vec<MotionReading> {
        self.rx.try_iter().collect()
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for GyroSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 有界队列: 满了先丢弃最旧的元素再写入
pub(crate) fn push_latest<T>(tx: &Sender<T>, rx: &Receiver<T>, item: T) {
    if let Err(crossbeam_channel::TrySendError::Full(item)) = tx.try_send(item) {
        let _ = rx.try_recv();
        let _ = tx.try_send(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_device(root: &Path, name: &str, raw: [&str; 3], scale: &str) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        for (axis, value) in ["x", "y", "z"].iter().zip(raw) {
            std::fs::write(dir.join(format!("in_anglvel_{}_raw", axis)), value).unwrap();
        }
        std::fs::write(dir.join("in_anglvel_scale"), scale).unwrap();
        dir
    }

    #[test]
    fn test_discover_and_sample() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("iio:device0")).unwrap(); // 加速度计, 无陀螺仪通道
        fake_device(root.path(), "iio:device1", ["100\n", "-50\n", "0\n"], "0.01\n");

        let dir = IioGyroscope::discover(root.path()).unwrap();
        assert!(dir.ends_with("iio:device1"));

        let gyro = IioGyroscope::open(Some(&dir)).unwrap();
        let reading = gyro.sample().unwrap();
        assert!((reading.x - 1.0).abs() < 1e-9);
        assert!((reading.y + 0.5).abs() < 1e-9);
        assert_eq!(reading.z, 0.0);
        assert!(reading.timestamp > 0.0);
    }

    #[test]
    fn test_open_rejects_non_gyro() {
        let root = tempfile::tempdir().unwrap();
        let err = IioGyroscope::open(Some(root.path())).unwrap_err();
        assert!(matches!(err, PipelineError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_push_latest_drops_oldest() {
        let (tx, rx) = bounded(2);
        for i in 0..5 {
            push_latest(&tx, &rx, i);
        }
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn test_sampler_collects_readings() {
        let root = tempfile::tempdir().unwrap();
        let dir = fake_device(root.path(), "iio:device0", ["1", "2", "3"], "1");
        let gyro = IioGyroscope::open(Some(&dir)).unwrap();

        let mut sampler = GyroSampler::spawn(gyro, 1000);
        std::thread::sleep(Duration::from_millis(50));
        sampler.stop();
        let readings = sampler.drain();
        assert!(!readings.is_empty());
        assert!(readings.len() <= GYRO_QUEUE_SIZE);
        assert_eq!(readings[0].z, 3.0);
    }
}
