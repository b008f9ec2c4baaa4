// ffmpeg.rs - Camera backend driving the system `ffmpeg` binary.
//
// Each open stream is one ffmpeg child reading the platform video input and
// writing fixed-size raw RGBA frames to stdout. A reader task keeps the newest
// frame in a watch channel. Killing the child releases the device.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::camera::{CameraDevice, FacingMode, MediaStream, NoCamera, VideoConstraints};
use super::CaptureError;
use crate::settings::CameraSettings;

/// Pick the camera backend for this host: ffmpeg when the binary runs and an
/// input is configured, otherwise [`NoCamera`].
pub async fn detect(settings: &CameraSettings) -> Arc<dyn CameraDevice> {
    if settings.input_format.is_empty() || settings.device.is_empty() {
        log::warn!("No camera input configured (set camera.inputFormat and camera.device)");
        return Arc::new(NoCamera);
    }

    let probe = Command::new(&settings.ffmpeg_path)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match probe {
        Ok(status) if status.success() => {
            log::info!("Camera backend: {} ({})", settings.ffmpeg_path, settings.input_format);
            Arc::new(FfmpegCamera::new(settings.clone()))
        }
        Ok(status) => {
            log::warn!("{} -version exited with {}", settings.ffmpeg_path, status);
            Arc::new(NoCamera)
        }
        Err(e) => {
            log::warn!("Could not run {}: {}", settings.ffmpeg_path, e);
            Arc::new(NoCamera)
        }
    }
}

pub struct FfmpegCamera {
    settings: CameraSettings,
}

impl FfmpegCamera {
    pub fn new(mut settings: CameraSettings) -> Self {
        settings.width = settings.width.max(1);
        settings.height = settings.height.max(1);
        settings.framerate = settings.framerate.max(1);
        Self { settings }
    }

    /// Video device satisfying `constraints`. A rear request needs an explicit
    /// `rearDevice`; ffmpeg has no notion of facing.
    fn device_for(&self, constraints: VideoConstraints) -> Result<&str, CaptureError> {
        match constraints.facing_mode {
            Some(FacingMode::Environment) => self
                .settings
                .rear_device
                .as_deref()
                .ok_or_else(|| CaptureError::CameraUnavailable("no rear camera configured".into())),
            Some(FacingMode::User) | None => Ok(&self.settings.device),
        }
    }

    fn args(&self, device: &str) -> Vec<String> {
        let s = &self.settings;
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
        args.extend(["-f".to_string(), s.input_format.clone()]);
        args.extend(s.input_args.iter().cloned());
        args.extend(["-i".to_string(), device.to_string()]);
        args.extend([
            "-vf".to_string(),
            format!("scale={}:{}", s.width, s.height),
            "-r".to_string(),
            s.framerate.to_string(),
            "-pix_fmt".to_string(),
            "rgba".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-".to_string(),
        ]);
        args
    }
}

#[async_trait]
impl CameraDevice for FfmpegCamera {
    async fn open(
        &self,
        constraints: VideoConstraints,
    ) -> Result<Box<dyn MediaStream>, CaptureError> {
        let device = self.device_for(constraints)?;
        let s = &self.settings;

        log::debug!("Starting {} for {}", s.ffmpeg_path, device);
        let mut child = Command::new(&s.ffmpeg_path)
            .args(self.args(device))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CaptureError::CameraUnavailable(format!("could not start {}: {}", s.ffmpeg_path, e))
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::CameraUnavailable("no stdout from ffmpeg".into()))?;

        let (tx, mut first) = watch::channel(None);
        let reader = tokio::spawn(read_frames(stdout, s.width, s.height, tx));
        let mut stream = FfmpegStream {
            child: Some(child),
            reader,
            frames: first.clone(),
        };

        match tokio::time::timeout(s.open_timeout(), first.changed()).await {
            Ok(Ok(())) => {
                log::info!("Streaming {}x{} from {}", s.width, s.height, device);
                Ok(Box::new(stream))
            }
            Ok(Err(_)) => {
                stream.stop_tracks();
                Err(CaptureError::CameraUnavailable(format!(
                    "{} produced no frames from {}",
                    s.ffmpeg_path, device
                )))
            }
            Err(_) => {
                stream.stop_tracks();
                Err(CaptureError::CameraUnavailable(format!(
                    "no frame from {} within {:?}",
                    device,
                    s.open_timeout()
                )))
            }
        }
    }
}

async fn read_frames(
    mut stdout: ChildStdout,
    width: u32,
    height: u32,
    frames: watch::Sender<Option<RgbaImage>>,
) {
    let frame_len = width as usize * height as usize * 4;
    loop {
        let mut buf = vec![0u8; frame_len];
        if let Err(e) = stdout.read_exact(&mut buf).await {
            log::debug!("Camera frame reader stopped: {}", e);
            break;
        }
        let Some(frame) = RgbaImage::from_raw(width, height, buf) else {
            break;
        };
        if frames.send(Some(frame)).is_err() {
            break;
        }
    }
}

struct FfmpegStream {
    child: Option<Child>,
    reader: JoinHandle<()>,
    frames: watch::Receiver<Option<RgbaImage>>,
}

impl MediaStream for FfmpegStream {
    fn grab_frame(&mut self) -> Result<RgbaImage, CaptureError> {
        self.frames
            .borrow_and_update()
            .clone()
            .ok_or_else(|| CaptureError::CameraUnavailable("no frame received".into()))
    }

    fn stop_tracks(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                log::warn!("Could not stop ffmpeg: {}", e);
            }
        }
        self.reader.abort();
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.child.is_some())
    }
}

impl Drop for FfmpegStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(rear: Option<&str>) -> FfmpegCamera {
        FfmpegCamera::new(CameraSettings {
            input_format: "v4l2".into(),
            input_args: vec!["-input_format".into(), "mjpeg".into()],
            device: "/dev/video0".into(),
            rear_device: rear.map(str::to_string),
            width: 320,
            height: 240,
            framerate: 5,
            ..CameraSettings::default()
        })
    }

    #[test]
    fn rear_request_needs_a_rear_device() {
        let cam = camera(None);
        assert!(matches!(
            cam.device_for(VideoConstraints::rear()),
            Err(CaptureError::CameraUnavailable(_))
        ));
        assert_eq!(cam.device_for(VideoConstraints::any()).unwrap(), "/dev/video0");

        let cam = camera(Some("/dev/video2"));
        assert_eq!(cam.device_for(VideoConstraints::rear()).unwrap(), "/dev/video2");
    }

    #[test]
    fn args_read_the_device_and_emit_raw_rgba() {
        let args = camera(None).args("/dev/video0");
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input + 1], "/dev/video0");
        // Input options must precede -i.
        let input_format = args.iter().position(|a| a == "-input_format").unwrap();
        assert!(input_format < input);
        assert_eq!(&args[1..3], ["-loglevel", "error"]);
        assert!(args.contains(&"scale=320:240".to_string()));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "rgba"]));
        assert!(args.windows(2).any(|w| w == ["-f", "rawvideo"]));
        assert_eq!(args.last().unwrap(), "-");
    }

    #[test]
    fn zero_dimensions_are_raised_to_one() {
        let cam = FfmpegCamera::new(CameraSettings {
            width: 0,
            height: 0,
            framerate: 0,
            ..CameraSettings::default()
        });
        assert_eq!((cam.settings.width, cam.settings.height, cam.settings.framerate), (1, 1, 1));
    }

    #[tokio::test]
    async fn missing_binary_means_unsupported() {
        let device = detect(&CameraSettings {
            ffmpeg_path: "/nonexistent/ffmpeg-for-ecoscan".into(),
            input_format: "v4l2".into(),
            device: "/dev/video0".into(),
            ..CameraSettings::default()
        })
        .await;
        assert!(!device.is_supported());
    }

    #[tokio::test]
    async fn unconfigured_input_means_unsupported() {
        let device = detect(&CameraSettings {
            input_format: String::new(),
            ..CameraSettings::default()
        })
        .await;
        assert!(!device.is_supported());
    }
}
