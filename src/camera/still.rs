//! Still-image media backend for headless runs.
//!
//! The "camera" is a fixed frame and files are decoded with `image::open`.
//! Both report loaded and playing as soon as they open.

use std::path::Path;

use image::RgbImage;
use log::info;

use super::source::{MediaBackend, MediaElement, MediaEventKind, MediaEvents};
use crate::error::{ClientError, ClientResult};

pub struct StillBackend {
    camera_frame: Option<RgbImage>,
}

impl StillBackend {
    /// Camera yields a black frame of the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            camera_frame: Some(RgbImage::new(width, height)),
        }
    }

    /// Camera access is always denied.
    pub fn without_camera() -> Self {
        Self { camera_frame: None }
    }
}

impl MediaBackend for StillBackend {
    fn open_camera(&mut self, _resolution_hint: (u32, u32), events: MediaEvents) -> ClientResult<Box<dyn MediaElement>> {
        let frame = self
            .camera_frame
            .clone()
            .ok_or_else(|| ClientError::CameraAccessDenied("no camera attached".into()))?;
        Ok(Box::new(StillFrame::play(frame, events)))
    }

    fn open_file(&mut self, path: &Path, events: MediaEvents) -> ClientResult<Box<dyn MediaElement>> {
        let frame = image::open(path)
            .map_err(|e| ClientError::MediaError(format!("{}: {e}", path.display())))?
            .to_rgb8();
        info!("[video] loaded still {} ({}x{})", path.display(), frame.width(), frame.height());
        Ok(Box::new(StillFrame::play(frame, events)))
    }
}

pub struct StillFrame {
    frame: Option<RgbImage>,
}

impl StillFrame {
    fn play(frame: RgbImage, events: MediaEvents) -> Self {
        events.emit(MediaEventKind::LoadedMetadata);
        events.emit(MediaEventKind::Playing);
        Self { frame: Some(frame) }
    }
}

impl MediaElement for StillFrame {
    fn intrinsic_size(&self) -> (u32, u32) {
        self.frame.as_ref().map_or((0, 0), |f| f.dimensions())
    }

    fn is_paused(&self) -> bool {
        self.frame.is_none()
    }

    fn copy_frame_into(&self, surface: &mut RgbImage) -> ClientResult<bool> {
        match &self.frame {
            Some(frame) if frame.dimensions() == surface.dimensions() => {
                surface.copy_from_slice(frame.as_raw());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn release(&mut self) {
        self.frame = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::source::MediaEvent;
    use tokio::sync::mpsc;

    #[test]
    fn test_blank_camera_announces_playback() {
        let (tx, mut rx) = mpsc::unbounded_channel::<MediaEvent>();
        let mut backend = StillBackend::blank(32, 24);
        let element = backend.open_camera((640, 480), MediaEvents::new(7, tx)).unwrap();

        assert_eq!(element.intrinsic_size(), (32, 24));
        assert!(!element.is_paused());
        assert_eq!(rx.try_recv().unwrap().kind, MediaEventKind::LoadedMetadata);
        let playing = rx.try_recv().unwrap();
        assert_eq!(playing.kind, MediaEventKind::Playing);
        assert_eq!(playing.generation, 7);
    }

    #[test]
    fn test_without_camera_is_denied() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = StillBackend::without_camera().open_camera((640, 480), MediaEvents::new(1, tx));
        assert!(matches!(result, Err(ClientError::CameraAccessDenied(_))));
    }

    #[test]
    fn test_open_png_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pose.png");
        let mut img = RgbImage::new(4, 2);
        img.put_pixel(1, 1, image::Rgb([200, 10, 10]));
        img.save(&path).unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut element = StillBackend::without_camera()
            .open_file(&path, MediaEvents::new(1, tx))
            .unwrap();
        let mut surface = RgbImage::new(4, 2);
        assert!(element.copy_frame_into(&mut surface).unwrap());
        assert_eq!(surface.get_pixel(1, 1).0, [200, 10, 10]);

        element.release();
        assert_eq!(element.intrinsic_size(), (0, 0));
        assert!(!element.copy_frame_into(&mut surface).unwrap());
    }

    #[test]
    fn test_missing_file_is_media_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = StillBackend::blank(1, 1).open_file(Path::new("/nonexistent/clip.png"), MediaEvents::new(1, tx));
        assert!(matches!(result, Err(ClientError::MediaError(_))));
    }
}
