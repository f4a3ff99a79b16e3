use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureAPIs},
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;
use log::{info, warn};

use super::source::{MediaBackend, MediaElement, MediaEventKind, MediaEvents, VideoSource};
use crate::error::{ClientError, ClientResult};

const DEFAULT_FILE_FPS: f64 = 30.0;

/// Opens cameras and video files through OpenCV.
pub struct OpenCvBackend {
    camera_index: i32,
}

impl OpenCvBackend {
    pub fn new(camera_index: i32) -> Self {
        Self { camera_index }
    }
}

impl MediaBackend for OpenCvBackend {
    fn open_camera(&mut self, resolution_hint: (u32, u32), events: MediaEvents) -> ClientResult<Box<dyn MediaElement>> {
        let denied = |e: opencv::Error| ClientError::CameraAccessDenied(e.to_string());

        let mut capture = VideoCapture::new(self.camera_index, VideoCaptureAPIs::CAP_ANY as i32).map_err(denied)?;
        if !capture.is_opened().map_err(denied)? {
            return Err(ClientError::CameraAccessDenied(format!(
                "camera {} is not available",
                self.camera_index
            )));
        }

        // Hints only; the device picks the closest mode it supports
        let (w, h) = resolution_hint;
        capture.set(videoio::CAP_PROP_FRAME_WIDTH, w as f64).map_err(denied)?;
        capture.set(videoio::CAP_PROP_FRAME_HEIGHT, h as f64).map_err(denied)?;
        capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0).map_err(denied)?;

        Ok(Box::new(PlaybackThread::start(capture, VideoSource::Camera, None, events)))
    }

    fn open_file(&mut self, path: &Path, events: MediaEvents) -> ClientResult<Box<dyn MediaElement>> {
        let media = |e: opencv::Error| ClientError::MediaError(e.to_string());

        let name = path
            .to_str()
            .ok_or_else(|| ClientError::MediaError(format!("non UTF-8 path: {}", path.display())))?;
        let capture = VideoCapture::from_file(name, VideoCaptureAPIs::CAP_ANY as i32).map_err(media)?;
        if !capture.is_opened().map_err(media)? {
            return Err(ClientError::MediaError(format!("cannot open {}", path.display())));
        }

        let fps = capture.get(videoio::CAP_PROP_FPS).unwrap_or(0.0);
        let fps = if fps > 0.0 { fps } else { DEFAULT_FILE_FPS };
        let interval = Duration::from_secs_f64(1.0 / fps);
        info!("[video] {} at {:.1} fps", path.display(), fps);

        Ok(Box::new(PlaybackThread::start(capture, VideoSource::File, Some(interval), events)))
    }
}

struct Shared {
    latest: Mutex<Option<Mat>>,
    width: AtomicU32,
    height: AtomicU32,
    paused: AtomicBool,
}

/// Decodes frames on a background thread and keeps the latest one.
///
/// Files are paced to their frame rate and stop at the end; cameras block on
/// the device.
pub struct PlaybackThread {
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PlaybackThread {
    fn start(mut capture: VideoCapture, source: VideoSource, interval: Option<Duration>, events: MediaEvents) -> Self {
        let shared = Arc::new(Shared {
            latest: Mutex::new(None),
            width: AtomicU32::new(0),
            height: AtomicU32::new(0),
            paused: AtomicBool::new(true),
        });
        let running = Arc::new(AtomicBool::new(true));

        let shared_ref = shared.clone();
        let running_ref = running.clone();
        let handle = thread::spawn(move || {
            let mut announced = false;
            while running_ref.load(Ordering::Acquire) {
                let started = Instant::now();
                let mut frame = Mat::default();
                match capture.read(&mut frame) {
                    Ok(true) if !frame.empty() => {
                        if !announced {
                            shared_ref.width.store(frame.cols() as u32, Ordering::Release);
                            shared_ref.height.store(frame.rows() as u32, Ordering::Release);
                        }
                        if let Ok(mut latest) = shared_ref.latest.lock() {
                            *latest = Some(frame);
                        }
                        if !announced {
                            announced = true;
                            events.emit(MediaEventKind::LoadedMetadata);
                            shared_ref.paused.store(false, Ordering::Release);
                            events.emit(MediaEventKind::Playing);
                        }
                    }
                    Ok(_) => {
                        if source == VideoSource::File {
                            shared_ref.paused.store(true, Ordering::Release);
                            events.emit(MediaEventKind::Ended);
                            break;
                        }
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(e) => {
                        events.emit(MediaEventKind::Error(e.to_string()));
                        thread::sleep(Duration::from_millis(100));
                    }
                }

                if let Some(interval) = interval {
                    if let Some(rest) = interval.checked_sub(started.elapsed()) {
                        thread::sleep(rest);
                    }
                }
            }
            let _ = capture.release();
        });

        Self {
            shared,
            running,
            handle: Some(handle),
        }
    }
}

impl MediaElement for PlaybackThread {
    fn intrinsic_size(&self) -> (u32, u32) {
        (
            self.shared.width.load(Ordering::Acquire),
            self.shared.height.load(Ordering::Acquire),
        )
    }

    fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    fn copy_frame_into(&self, surface: &mut RgbImage) -> ClientResult<bool> {
        let media = |e: opencv::Error| ClientError::MediaError(e.to_string());

        let bgr = {
            let latest = self
                .shared
                .latest
                .lock()
                .map_err(|_| ClientError::MediaError("frame lock poisoned".into()))?;
            match latest.as_ref() {
                Some(frame) => frame.clone(),
                None => return Ok(false),
            }
        };

        let mut rgb = Mat::default();
        imgproc::cvt_color_def(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB).map_err(media)?;
        if rgb.cols() as u32 != surface.width() || rgb.rows() as u32 != surface.height() {
            // Device switched modes mid-stream; skip until the caller refits
            warn!(
                "[video] frame {}x{} does not match surface {}x{}",
                rgb.cols(),
                rgb.rows(),
                surface.width(),
                surface.height()
            );
            return Ok(false);
        }

        let bytes = rgb.data_bytes().map_err(media)?;
        let target: &mut [u8] = surface;
        if bytes.len() != target.len() {
            return Err(ClientError::MediaError(format!(
                "frame holds {} bytes, surface expects {}",
                bytes.len(),
                target.len()
            )));
        }
        target.copy_from_slice(bytes);
        Ok(true)
    }

    fn release(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("[video] playback thread panicked");
            }
        }
        self.shared.paused.store(true, Ordering::Release);
    }
}

impl Drop for PlaybackThread {
    fn drop(&mut self) {
        self.release();
    }
}
