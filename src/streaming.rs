//! Frame Streamer: readiness gating, pacing and JPEG capture of outbound frames.

use std::time::{Duration, Instant};

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use log::{debug, trace};

use crate::camera::{MediaElement, VideoSource};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{jpeg_data_uri, OutboundEnvelope};

pub const DEFAULT_JPEG_QUALITY: f32 = 0.7;
pub const DEFAULT_TIMER_INTERVAL: Duration = Duration::from_millis(100);

/// Both halves of the "may stream" predicate, read at the moment of use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadinessState {
    pub video_ready: bool,
    pub connection_ready: bool,
}

impl ReadinessState {
    pub fn streaming_enabled(&self) -> bool {
        self.video_ready && self.connection_ready
    }
}

/// When the next frame may go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// One frame per server response.
    Feedback,
    /// Up to `max_in_flight` frames awaiting a response.
    Pipelined { max_in_flight: usize },
    /// Fixed cadence, independent of responses.
    Timer { interval: Duration },
}

impl Pacing {
    fn in_flight_limit(&self) -> Option<usize> {
        match self {
            Pacing::Feedback => Some(1),
            Pacing::Pipelined { max_in_flight } => Some((*max_in_flight).max(1)),
            Pacing::Timer { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Armed,
    Sending,
}

/// What armed the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmReason {
    ReadinessChanged,
    /// A response acknowledged the oldest in-flight frame.
    Acknowledged,
    Tick,
}

/// Why an armed loop did not send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    VideoNotReady,
    ConnectionNotReady,
    NoSource,
    SourcePaused,
    NoGeometry,
    NoFrame,
    InFlightLimit,
    RateLimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { bytes: usize },
    Skipped(SkipReason),
}

/// Destination for outbound envelopes. `Ok(false)` means the sink is not open.
pub trait FrameSink {
    fn send(&mut self, envelope: &OutboundEnvelope) -> ClientResult<bool>;
}

/// Inputs the streamer needs from the rest of the app for one arming.
pub struct StreamInputs<'a> {
    pub readiness: ReadinessState,
    pub source: Option<VideoSource>,
    pub element: Option<&'a dyn MediaElement>,
    pub now: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub last_encode: Duration,
}

pub struct FrameStreamer {
    state: LoopState,
    pacing: Pacing,
    quality: u8,
    surface: RgbImage,
    in_flight: usize,
    last_sent: Option<Instant>,
    stats: StreamStats,
}

impl FrameStreamer {
    /// `quality` is the 0..=1 JPEG quality factor.
    pub fn new(pacing: Pacing, quality: f32) -> Self {
        Self {
            state: LoopState::Idle,
            pacing,
            quality: jpeg_quality_percent(quality),
            surface: RgbImage::new(0, 0),
            in_flight: 0,
            last_sent: None,
            stats: StreamStats::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Capture surface, sized to the last frame sent.
    pub fn surface(&self) -> &RgbImage {
        &self.surface
    }

    /// Frees one in-flight slot.
    pub fn acknowledge(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Forgets outstanding frames; their responses can no longer arrive.
    pub fn reset_in_flight(&mut self) {
        self.in_flight = 0;
        self.last_sent = None;
    }

    /// Arms the loop and attempts one send. Always returns to `Idle`.
    pub fn arm(&mut self, reason: ArmReason, inputs: StreamInputs<'_>, sink: &mut dyn FrameSink) -> ClientResult<SendOutcome> {
        if reason == ArmReason::Acknowledged {
            self.acknowledge();
        }
        self.state = LoopState::Armed;
        let result = self.try_send(inputs, sink);
        self.state = LoopState::Idle;

        match &result {
            Ok(SendOutcome::Sent { bytes }) => debug!(
                "[stream] {reason:?}: sent {bytes} bytes, encode {:.1} ms",
                self.stats.last_encode.as_secs_f64() * 1000.0
            ),
            Ok(SendOutcome::Skipped(why)) => trace!("[stream] {reason:?}: skipped ({why:?})"),
            Err(e) => debug!("[stream] {reason:?}: {e}"),
        }
        result
    }

    fn try_send(&mut self, inputs: StreamInputs<'_>, sink: &mut dyn FrameSink) -> ClientResult<SendOutcome> {
        let readiness = inputs.readiness;
        if !readiness.video_ready {
            return Ok(SendOutcome::Skipped(SkipReason::VideoNotReady));
        }
        if !readiness.connection_ready {
            return Ok(SendOutcome::Skipped(SkipReason::ConnectionNotReady));
        }
        let (Some(source), Some(element)) = (inputs.source, inputs.element) else {
            return Ok(SendOutcome::Skipped(SkipReason::NoSource));
        };
        if source == VideoSource::Camera && element.is_paused() {
            return Ok(SendOutcome::Skipped(SkipReason::SourcePaused));
        }
        let (width, height) = element.intrinsic_size();
        if width == 0 || height == 0 {
            return Ok(SendOutcome::Skipped(SkipReason::NoGeometry));
        }

        match self.pacing {
            Pacing::Timer { interval } => {
                if let Some(last) = self.last_sent {
                    if inputs.now.saturating_duration_since(last) < interval {
                        return Ok(SendOutcome::Skipped(SkipReason::RateLimited));
                    }
                }
            }
            _ => {
                if let Some(limit) = self.pacing.in_flight_limit() {
                    if self.in_flight >= limit {
                        return Ok(SendOutcome::Skipped(SkipReason::InFlightLimit));
                    }
                }
            }
        }

        self.state = LoopState::Sending;
        if self.surface.dimensions() != (width, height) {
            self.surface = RgbImage::new(width, height);
        }
        if !element.copy_frame_into(&mut self.surface)? {
            return Ok(SendOutcome::Skipped(SkipReason::NoFrame));
        }

        let started = Instant::now();
        let jpeg = encode_jpeg(&self.surface, self.quality)?;
        self.stats.last_encode = started.elapsed();
        let bytes = jpeg.len();

        if !sink.send(&OutboundEnvelope::pose_data(jpeg_data_uri(&jpeg)))? {
            return Ok(SendOutcome::Skipped(SkipReason::ConnectionNotReady));
        }

        if self.pacing.in_flight_limit().is_some() {
            self.in_flight += 1;
        }
        self.last_sent = Some(inputs.now);
        self.stats.frames_sent += 1;
        self.stats.bytes_sent += bytes as u64;
        Ok(SendOutcome::Sent { bytes })
    }
}

/// Maps a 0..=1 quality factor to the encoder's 1..=100 scale.
pub fn jpeg_quality_percent(quality: f32) -> u8 {
    (quality.clamp(0.01, 1.0) * 100.0).round() as u8
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> ClientResult<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(image)
        .map_err(|e| ClientError::EncodeError(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::FakeBackend;
    use crate::camera::{MediaBackend, MediaEvents};
    use crate::protocol::JPEG_DATA_URI_PREFIX;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingSink {
        open: bool,
        frames: Vec<String>,
    }

    impl FrameSink for RecordingSink {
        fn send(&mut self, envelope: &OutboundEnvelope) -> ClientResult<bool> {
            if !self.open {
                return Ok(false);
            }
            if let OutboundEnvelope::PoseData { frame } = envelope {
                self.frames.push(frame.clone());
            }
            Ok(true)
        }
    }

    fn playing_camera(width: u32, height: u32) -> (FakeBackend, Box<dyn MediaElement>) {
        let mut backend = FakeBackend::new();
        backend.control.set_size(width, height);
        backend.control.set_paused(false);
        let (tx, _rx) = mpsc::unbounded_channel();
        let element = backend.open_camera((width, height), MediaEvents::new(1, tx)).unwrap();
        (backend, element)
    }

    fn inputs(element: &dyn MediaElement, video_ready: bool, connection_ready: bool, now: Instant) -> StreamInputs<'_> {
        StreamInputs {
            readiness: ReadinessState {
                video_ready,
                connection_ready,
            },
            source: Some(VideoSource::Camera),
            element: Some(element),
            now,
        }
    }

    fn open_sink() -> RecordingSink {
        RecordingSink {
            open: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_readiness_table() {
        let (_backend, element) = playing_camera(64, 48);
        let now = Instant::now();
        let cases = [
            (false, false, SendOutcome::Skipped(SkipReason::VideoNotReady)),
            (false, true, SendOutcome::Skipped(SkipReason::VideoNotReady)),
            (true, false, SendOutcome::Skipped(SkipReason::ConnectionNotReady)),
        ];
        for (video, connection, expected) in cases {
            let mut streamer = FrameStreamer::new(Pacing::Feedback, DEFAULT_JPEG_QUALITY);
            let mut sink = open_sink();
            let outcome = streamer
                .arm(ArmReason::ReadinessChanged, inputs(element.as_ref(), video, connection, now), &mut sink)
                .unwrap();
            assert_eq!(outcome, expected, "video={video} connection={connection}");
            assert!(sink.frames.is_empty());
            assert_eq!(streamer.state(), LoopState::Idle);
        }

        let mut streamer = FrameStreamer::new(Pacing::Feedback, DEFAULT_JPEG_QUALITY);
        let mut sink = open_sink();
        let outcome = streamer
            .arm(ArmReason::ReadinessChanged, inputs(element.as_ref(), true, true, now), &mut sink)
            .unwrap();
        assert!(matches!(outcome, SendOutcome::Sent { .. }));
        assert_eq!(sink.frames.len(), 1);
        assert_eq!(streamer.state(), LoopState::Idle);
    }

    #[test]
    fn test_frame_is_jpeg_data_uri_at_intrinsic_size() {
        let (_backend, element) = playing_camera(640, 480);
        let mut streamer = FrameStreamer::new(Pacing::Feedback, DEFAULT_JPEG_QUALITY);
        let mut sink = open_sink();
        streamer
            .arm(ArmReason::ReadinessChanged, inputs(element.as_ref(), true, true, Instant::now()), &mut sink)
            .unwrap();

        assert!(sink.frames[0].starts_with(JPEG_DATA_URI_PREFIX));
        assert_eq!(streamer.surface().dimensions(), (640, 480));

        use base64::Engine;
        let jpeg = base64::engine::general_purpose::STANDARD
            .decode(&sink.frames[0][JPEG_DATA_URI_PREFIX.len()..])
            .unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (640, 480));
    }

    #[test]
    fn test_paused_camera_is_not_captured() {
        let (backend, element) = playing_camera(64, 48);
        backend.control.set_paused(true);
        let mut streamer = FrameStreamer::new(Pacing::Feedback, DEFAULT_JPEG_QUALITY);
        let mut sink = open_sink();
        let outcome = streamer
            .arm(ArmReason::Tick, inputs(element.as_ref(), true, true, Instant::now()), &mut sink)
            .unwrap();
        assert_eq!(outcome, SendOutcome::Skipped(SkipReason::SourcePaused));
    }

    #[test]
    fn test_zero_geometry_is_not_captured() {
        let (_backend, element) = playing_camera(0, 480);
        let mut streamer = FrameStreamer::new(Pacing::Feedback, DEFAULT_JPEG_QUALITY);
        let mut sink = open_sink();
        let outcome = streamer
            .arm(ArmReason::Tick, inputs(element.as_ref(), true, true, Instant::now()), &mut sink)
            .unwrap();
        assert_eq!(outcome, SendOutcome::Skipped(SkipReason::NoGeometry));
    }

    #[test]
    fn test_feedback_pacing_sends_one_per_acknowledgement() {
        let (_backend, element) = playing_camera(32, 24);
        let mut streamer = FrameStreamer::new(Pacing::Feedback, DEFAULT_JPEG_QUALITY);
        let mut sink = open_sink();
        let now = Instant::now();

        streamer
            .arm(ArmReason::ReadinessChanged, inputs(element.as_ref(), true, true, now), &mut sink)
            .unwrap();
        // Extra arming before any response does not duplicate the frame
        let outcome = streamer
            .arm(ArmReason::ReadinessChanged, inputs(element.as_ref(), true, true, now), &mut sink)
            .unwrap();
        assert_eq!(outcome, SendOutcome::Skipped(SkipReason::InFlightLimit));
        assert_eq!(streamer.in_flight(), 1);

        for _ in 0..3 {
            streamer
                .arm(ArmReason::Acknowledged, inputs(element.as_ref(), true, true, now), &mut sink)
                .unwrap();
        }
        assert_eq!(sink.frames.len(), 4);
        assert_eq!(streamer.stats().frames_sent, 4);
        assert_eq!(streamer.in_flight(), 1);
    }

    #[test]
    fn test_pipelined_pacing_fills_window() {
        let (_backend, element) = playing_camera(16, 16);
        let mut streamer = FrameStreamer::new(Pacing::Pipelined { max_in_flight: 2 }, DEFAULT_JPEG_QUALITY);
        let mut sink = open_sink();
        let now = Instant::now();
        for _ in 0..4 {
            streamer
                .arm(ArmReason::Tick, inputs(element.as_ref(), true, true, now), &mut sink)
                .unwrap();
        }
        assert_eq!(sink.frames.len(), 2);
        streamer
            .arm(ArmReason::Acknowledged, inputs(element.as_ref(), true, true, now), &mut sink)
            .unwrap();
        assert_eq!(sink.frames.len(), 3);
    }

    #[test]
    fn test_timer_pacing_is_rate_limited() {
        let (_backend, element) = playing_camera(16, 16);
        let interval = Duration::from_millis(100);
        let mut streamer = FrameStreamer::new(Pacing::Timer { interval }, DEFAULT_JPEG_QUALITY);
        let mut sink = open_sink();
        let t0 = Instant::now();

        streamer.arm(ArmReason::Tick, inputs(element.as_ref(), true, true, t0), &mut sink).unwrap();
        let early = streamer
            .arm(ArmReason::Tick, inputs(element.as_ref(), true, true, t0 + Duration::from_millis(40)), &mut sink)
            .unwrap();
        assert_eq!(early, SendOutcome::Skipped(SkipReason::RateLimited));
        streamer
            .arm(ArmReason::Tick, inputs(element.as_ref(), true, true, t0 + interval), &mut sink)
            .unwrap();
        assert_eq!(sink.frames.len(), 2);
        assert_eq!(streamer.in_flight(), 0);
    }

    #[test]
    fn test_closed_sink_does_not_count_in_flight() {
        let (_backend, element) = playing_camera(16, 16);
        let mut streamer = FrameStreamer::new(Pacing::Feedback, DEFAULT_JPEG_QUALITY);
        let mut sink = RecordingSink::default();
        let outcome = streamer
            .arm(ArmReason::Tick, inputs(element.as_ref(), true, true, Instant::now()), &mut sink)
            .unwrap();
        assert_eq!(outcome, SendOutcome::Skipped(SkipReason::ConnectionNotReady));
        assert_eq!(streamer.in_flight(), 0);
    }

    #[test]
    fn test_reset_in_flight_unblocks() {
        let (_backend, element) = playing_camera(16, 16);
        let mut streamer = FrameStreamer::new(Pacing::Feedback, DEFAULT_JPEG_QUALITY);
        let mut sink = open_sink();
        let now = Instant::now();
        streamer.arm(ArmReason::Tick, inputs(element.as_ref(), true, true, now), &mut sink).unwrap();
        streamer.reset_in_flight();
        streamer.arm(ArmReason::Tick, inputs(element.as_ref(), true, true, now), &mut sink).unwrap();
        assert_eq!(sink.frames.len(), 2);
    }

    #[test]
    fn test_quality_factor_mapping() {
        assert_eq!(jpeg_quality_percent(0.7), 70);
        assert_eq!(jpeg_quality_percent(1.5), 100);
        assert_eq!(jpeg_quality_percent(0.0), 1);
    }
}
