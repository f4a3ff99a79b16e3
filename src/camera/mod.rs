#[cfg(feature = "desktop")]
pub mod capture;
pub mod source;
pub mod still;
#[cfg(test)]
pub(crate) mod testing;

#[cfg(feature = "desktop")]
pub use capture::OpenCvBackend;
pub use source::{
    MediaBackend, MediaElement, MediaEvent, MediaEventKind, MediaEventSender, MediaEvents, SourceRequest, VideoSource,
    VideoSourceController,
};
pub use still::StillBackend;
