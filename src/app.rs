//! Single-threaded event dispatcher wiring source, connection, streamer and overlay.
//!
//! The caller owns the runtime loop and feeds [`App`] media events, connection
//! events and ticks in arrival order. Nothing here blocks.

use std::path::PathBuf;
use std::time::Instant;

use image::RgbImage;
use log::{debug, info, warn};

use crate::camera::{MediaBackend, MediaEvent, MediaEventSender, SourceRequest, VideoSourceController};
use crate::config::Config;
use crate::connection::{ConnectionEvent, ConnectionEventSender, ConnectionState, ConnectionUpdate, SessionConnection};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{FeedbackPayload, InboundEnvelope, OutboundEnvelope, ReportPayload};
use crate::render::OverlayRenderer;
use crate::streaming::{ArmReason, FrameStreamer, Pacing, ReadinessState, SendOutcome, StreamInputs, StreamStats};

/// Settings the app needs out of [`Config`].
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub endpoint: Option<String>,
    pub fallback_file: Option<PathBuf>,
    pub camera_hint: (u32, u32),
    pub pacing: Pacing,
    pub jpeg_quality: f32,
    pub announce_session: bool,
    pub visibility_threshold: f32,
    pub surface: (usize, usize),
}

impl AppSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            endpoint: config.endpoint().ok().map(str::to_string),
            fallback_file: config.source.fallback_file.clone(),
            camera_hint: (config.camera.width, config.camera.height),
            pacing: config.pacing(),
            jpeg_quality: config.stream.jpeg_quality,
            announce_session: config.stream.announce_session,
            visibility_threshold: config.overlay.visibility_threshold,
            surface: (config.window.width, config.window.height),
        }
    }
}

/// What presentation reads. Slots are replaced wholesale and independently.
#[derive(Debug, Default)]
pub struct SessionModel {
    pub feedback: Option<FeedbackPayload>,
    pub report: Option<ReportPayload>,
    /// Last user-facing error, cleared when a connection opens.
    pub notice: Option<String>,
    pub feedback_count: u64,
}

pub struct App {
    settings: AppSettings,
    video: VideoSourceController,
    connection: Option<SessionConnection>,
    connection_events: ConnectionEventSender,
    streamer: FrameStreamer,
    overlay: OverlayRenderer,
    model: SessionModel,
    /// Responses still owed for frames of a replaced source.
    stale_responses: usize,
}

impl App {
    pub fn new(
        settings: AppSettings,
        backend: Box<dyn MediaBackend>,
        media_events: MediaEventSender,
        connection_events: ConnectionEventSender,
    ) -> Self {
        let (w, h) = settings.surface;
        Self {
            video: VideoSourceController::new(backend, settings.camera_hint, media_events),
            connection: None,
            connection_events,
            streamer: FrameStreamer::new(settings.pacing, settings.jpeg_quality),
            overlay: OverlayRenderer::new(w, h, settings.visibility_threshold),
            model: SessionModel::default(),
            stale_responses: 0,
            settings,
        }
    }

    pub fn from_config(
        config: &Config,
        backend: Box<dyn MediaBackend>,
        media_events: MediaEventSender,
        connection_events: ConnectionEventSender,
    ) -> Self {
        Self::new(AppSettings::from_config(config), backend, media_events, connection_events)
    }

    pub fn model(&self) -> &SessionModel {
        &self.model
    }

    pub fn overlay(&self) -> &OverlayRenderer {
        &self.overlay
    }

    pub fn video(&self) -> &VideoSourceController {
        &self.video
    }

    pub fn stream_stats(&self) -> StreamStats {
        self.streamer.stats()
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.connection.as_ref().map(SessionConnection::state)
    }

    pub fn readiness(&self) -> ReadinessState {
        ReadinessState {
            video_ready: self.video.is_ready(),
            connection_ready: self.connection.as_ref().is_some_and(SessionConnection::is_ready),
        }
    }

    /// Switches the video source. On camera denial, plays the fallback file if
    /// one is configured; the denial is still returned.
    pub fn activate_source(&mut self, request: SourceRequest) -> ClientResult<()> {
        let result = self.video.activate(request);
        // Landmarks belonged to the previous source, and so do the frames in
        // flight: their responses are not drawn and no longer hold a slot
        self.overlay.clear();
        self.stale_responses += self.streamer.in_flight();
        self.streamer.reset_in_flight();
        self.overlay.set_intrinsic(self.video.intrinsic_size());

        if let Err(e) = &result {
            warn!("[app] {e}");
            self.model.notice = Some(e.to_string());
            if let (ClientError::CameraAccessDenied(_), Some(fallback)) = (e, self.settings.fallback_file.clone()) {
                info!("[app] falling back to {}", fallback.display());
                if let Err(fallback_err) = self.video.activate(SourceRequest::File(fallback)) {
                    warn!("[app] fallback failed: {fallback_err}");
                }
            }
        }
        result
    }

    /// Plays the configured fallback file.
    pub fn activate_fallback(&mut self) -> ClientResult<()> {
        let path = self.settings.fallback_file.clone().ok_or(ClientError::EmptyFileHandle)?;
        self.activate_source(SourceRequest::File(path))
    }

    /// Opens a connection to the configured endpoint, replacing any existing one.
    pub fn connect(&mut self) -> ClientResult<()> {
        let Some(endpoint) = self.settings.endpoint.clone() else {
            self.model.notice = Some(ClientError::MissingEndpointConfig.to_string());
            return Err(ClientError::MissingEndpointConfig);
        };
        let connection = SessionConnection::connect(&endpoint, self.connection_events.clone());
        self.attach_connection(connection);
        Ok(())
    }

    /// User-initiated retry after a close or error.
    pub fn reconnect(&mut self) -> ClientResult<()> {
        info!("[app] reconnecting");
        self.connect()
    }

    fn attach_connection(&mut self, connection: SessionConnection) {
        if let Some(mut old) = self.connection.replace(connection) {
            old.close();
        }
        self.forget_in_flight();
    }

    fn forget_in_flight(&mut self) {
        self.streamer.reset_in_flight();
        self.stale_responses = 0;
    }

    /// Counts off one response; true when it answers a frame of a replaced source.
    fn take_stale_response(&mut self) -> bool {
        if self.stale_responses == 0 {
            return false;
        }
        self.stale_responses -= 1;
        true
    }

    /// Sends one END_SESSION. The video and the connection stay up; the
    /// REPORT arrives through the normal dispatch path.
    pub fn end_session(&mut self) -> ClientResult<bool> {
        match self.connection.as_mut() {
            Some(connection) => {
                let sent = connection.send(&OutboundEnvelope::EndSession {})?;
                if sent {
                    info!("[app] END_SESSION sent");
                }
                Ok(sent)
            }
            None => Ok(false),
        }
    }

    pub fn handle_media_event(&mut self, event: MediaEvent) {
        if self.video.handle_event(&event) {
            self.overlay.set_intrinsic(self.video.intrinsic_size());
            self.arm(ArmReason::ReadinessChanged);
        }
    }

    pub fn handle_connection_event(&mut self, event: ConnectionEvent) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        let Some(update) = connection.handle_event(event) else {
            return;
        };

        match update {
            ConnectionUpdate::Opened => {
                self.model.notice = None;
                self.streamer.reset_in_flight();
                self.stale_responses = 0;
                if self.settings.announce_session {
                    if let Err(e) = connection.send(&OutboundEnvelope::StartSession {}) {
                        warn!("[app] START_SESSION: {e}");
                    }
                }
                self.arm(ArmReason::ReadinessChanged);
            }
            ConnectionUpdate::Inbound(envelope) => self.dispatch(envelope),
            ConnectionUpdate::Malformed(e) => {
                self.model.notice = Some(e.to_string());
                // Most likely the answer to a frame; keep the loop going
                self.take_stale_response();
                self.arm(ArmReason::Acknowledged);
            }
            ConnectionUpdate::Error(e) => {
                self.model.notice = Some(e.to_string());
            }
            ConnectionUpdate::Closed { reason } => {
                info!("[app] connection closed ({reason}); press reconnect to retry");
                self.forget_in_flight();
            }
        }
    }

    fn dispatch(&mut self, envelope: InboundEnvelope) {
        match envelope {
            InboundEnvelope::Feedback(payload) => {
                if self.take_stale_response() {
                    debug!("[app] feedback for a replaced source; overlay unchanged");
                } else {
                    self.overlay.render(payload.landmarks(), self.video.intrinsic_size());
                }
                let rep_changed = self.model.feedback.as_ref().map(|f| f.rep_count) != Some(payload.rep_count);
                if rep_changed {
                    debug!("[app] reps={}", payload.rep_count);
                }
                self.model.feedback = Some(payload);
                self.model.feedback_count += 1;
                self.arm(ArmReason::Acknowledged);
            }
            InboundEnvelope::Report(report) => {
                info!(
                    "[app] report: {} reps, {} good, {} error kinds",
                    report.total_reps,
                    report.good_reps,
                    report.error_counts.len()
                );
                self.model.report = Some(report);
            }
            InboundEnvelope::ServerError { message } => {
                warn!("[app] server error: {message}");
                self.model.notice = Some(format!("server: {message}"));
                self.take_stale_response();
                // The frame that caused it will get no FEEDBACK
                self.arm(ArmReason::Acknowledged);
            }
            InboundEnvelope::Info { payload } => info!("[app] server info: {payload}"),
            InboundEnvelope::Unrecognized { kind } => debug!("[app] ignoring {kind} envelope"),
        }
    }

    /// Timer pacing tick.
    pub fn tick(&mut self) {
        self.arm(ArmReason::Tick);
    }

    /// Display surface size changed.
    pub fn resize_surface(&mut self, width: usize, height: usize) {
        self.overlay.resize(width, height);
    }

    /// Copies the current video frame for display, resizing `preview` to the
    /// intrinsic size. False when there is nothing to show.
    pub fn preview_frame(&self, preview: &mut RgbImage) -> bool {
        let Some(element) = self.video.element() else {
            return false;
        };
        let (w, h) = element.intrinsic_size();
        if w == 0 || h == 0 {
            return false;
        }
        if preview.dimensions() != (w, h) {
            *preview = RgbImage::new(w, h);
        }
        element.copy_frame_into(preview).unwrap_or(false)
    }

    /// Teardown: closes the connection and releases the source.
    pub fn shutdown(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        self.video.deactivate();
        self.overlay.clear();
    }

    fn arm(&mut self, reason: ArmReason) {
        let readiness = self.readiness();
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        let inputs = StreamInputs {
            readiness,
            source: self.video.active_source(),
            element: self.video.element(),
            now: Instant::now(),
        };
        match self.streamer.arm(reason, inputs, connection) {
            Ok(SendOutcome::Sent { .. }) | Ok(SendOutcome::Skipped(_)) => {}
            Err(e) => {
                warn!("[app] frame not sent: {e}");
                self.model.notice = Some(e.to_string());
            }
        }
    }
}
