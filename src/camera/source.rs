//! Video Source Controller: owns the one live video input and its readiness.

use std::path::{Path, PathBuf};

use image::RgbImage;
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::error::{ClientError, ClientResult};

/// Kind of video input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoSource {
    Camera,
    File,
}

/// Activation request. A file activation carries its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRequest {
    Camera,
    File(PathBuf),
}

impl SourceRequest {
    pub fn source(&self) -> VideoSource {
        match self {
            SourceRequest::Camera => VideoSource::Camera,
            SourceRequest::File(_) => VideoSource::File,
        }
    }
}

/// Playback notifications from a media element.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEventKind {
    /// Intrinsic geometry is known. Files may not be decodable yet.
    LoadedMetadata,
    /// Frames are being produced.
    Playing,
    Paused,
    Ended,
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaEvent {
    /// Activation the event belongs to; stale generations are discarded.
    pub generation: u64,
    pub kind: MediaEventKind,
}

pub type MediaEventSender = mpsc::UnboundedSender<MediaEvent>;

/// Event emitter handed to a media element, stamped with its activation.
#[derive(Debug, Clone)]
pub struct MediaEvents {
    generation: u64,
    tx: MediaEventSender,
}

impl MediaEvents {
    pub fn new(generation: u64, tx: MediaEventSender) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, kind: MediaEventKind) {
        // Receiver gone means the app is shutting down
        let _ = self.tx.send(MediaEvent {
            generation: self.generation,
            kind,
        });
    }
}

/// A playing video input, the equivalent of a `<video>` element.
pub trait MediaElement {
    /// Native frame size; `(0, 0)` until metadata is known.
    fn intrinsic_size(&self) -> (u32, u32);

    fn is_paused(&self) -> bool;

    /// Copies the current frame into `surface`, which the caller has already
    /// sized to [`intrinsic_size`](Self::intrinsic_size). `Ok(false)` when no
    /// frame has been decoded yet.
    fn copy_frame_into(&self, surface: &mut RgbImage) -> ClientResult<bool>;

    /// Stops playback and frees the device or file handle. Must not return
    /// before the underlying stream is released.
    fn release(&mut self);
}

/// Opens media elements for the controller.
pub trait MediaBackend {
    /// Requests camera access. Denial maps to `ClientError::CameraAccessDenied`.
    fn open_camera(&mut self, resolution_hint: (u32, u32), events: MediaEvents)
        -> ClientResult<Box<dyn MediaElement>>;

    fn open_file(&mut self, path: &Path, events: MediaEvents) -> ClientResult<Box<dyn MediaElement>>;
}

struct ActiveSource {
    source: VideoSource,
    element: Box<dyn MediaElement>,
}

pub struct VideoSourceController {
    backend: Box<dyn MediaBackend>,
    camera_hint: (u32, u32),
    events: MediaEventSender,
    active: Option<ActiveSource>,
    generation: u64,
    ready: bool,
}

impl VideoSourceController {
    pub fn new(backend: Box<dyn MediaBackend>, camera_hint: (u32, u32), events: MediaEventSender) -> Self {
        Self {
            backend,
            camera_hint,
            events,
            active: None,
            generation: 0,
            ready: false,
        }
    }

    /// Switches to `request`, tearing down the current source first.
    ///
    /// Readiness is false on return; it turns true only once the new element
    /// reports playable geometry through a media event.
    pub fn activate(&mut self, request: SourceRequest) -> ClientResult<()> {
        if let SourceRequest::File(path) = &request {
            if path.as_os_str().is_empty() {
                return Err(ClientError::EmptyFileHandle);
            }
        }

        self.release_active();
        self.generation += 1;
        let events = MediaEvents::new(self.generation, self.events.clone());

        let source = request.source();
        let element = match &request {
            SourceRequest::Camera => {
                info!("[video] requesting camera ({}x{} hint)", self.camera_hint.0, self.camera_hint.1);
                self.backend.open_camera(self.camera_hint, events)?
            }
            SourceRequest::File(path) => {
                info!("[video] opening file {}", path.display());
                self.backend.open_file(path, events)?
            }
        };

        self.active = Some(ActiveSource { source, element });
        Ok(())
    }

    /// Releases the active source (component teardown).
    pub fn deactivate(&mut self) {
        self.release_active();
        // Invalidate anything still queued from the released element
        self.generation += 1;
    }

    /// Applies a media event. Returns true if readiness changed.
    pub fn handle_event(&mut self, event: &MediaEvent) -> bool {
        if event.generation != self.generation {
            debug!("[video] dropping stale {:?} (gen {} != {})", event.kind, event.generation, self.generation);
            return false;
        }
        let Some(active) = &self.active else {
            return false;
        };

        let before = self.ready;
        match &event.kind {
            MediaEventKind::LoadedMetadata | MediaEventKind::Playing => {
                self.ready = Self::playable(active);
            }
            MediaEventKind::Paused | MediaEventKind::Ended => {
                // A paused file still shows a frame; a paused camera has no live feed
                if active.source == VideoSource::Camera {
                    self.ready = false;
                }
            }
            MediaEventKind::Error(message) => {
                warn!("[video] media error: {message}");
                self.ready = false;
            }
        }

        if self.ready != before {
            info!("[video] ready={} ({:?})", self.ready, event.kind);
        }
        self.ready != before
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn active_source(&self) -> Option<VideoSource> {
        self.active.as_ref().map(|a| a.source)
    }

    pub fn element(&self) -> Option<&dyn MediaElement> {
        self.active.as_ref().map(|a| a.element.as_ref())
    }

    /// Intrinsic size of the active element, `(0, 0)` without one.
    pub fn intrinsic_size(&self) -> (u32, u32) {
        self.element().map_or((0, 0), |e| e.intrinsic_size())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn playable(active: &ActiveSource) -> bool {
        let (w, h) = active.element.intrinsic_size();
        let geometry = w > 0 && h > 0;
        match active.source {
            VideoSource::Camera => geometry && !active.element.is_paused(),
            VideoSource::File => geometry,
        }
    }

    fn release_active(&mut self) {
        self.ready = false;
        if let Some(mut active) = self.active.take() {
            active.element.release();
            info!("[video] released {:?}", active.source);
        }
    }
}

impl Drop for VideoSourceController {
    fn drop(&mut self) {
        self.release_active();
    }
}
