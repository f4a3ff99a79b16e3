pub mod letterbox;
pub mod overlay;
pub mod skeleton;
#[cfg(feature = "desktop")]
pub mod window;

pub use letterbox::LetterboxFit;
#[cfg(feature = "desktop")]
pub use minifb::Key;
pub use overlay::{plan_scene, OverlayRenderer, OverlayScene, OverlaySurface, DEFAULT_VISIBILITY_THRESHOLD};
pub use skeleton::POSE_CONNECTIONS;
#[cfg(feature = "desktop")]
pub use window::OverlayWindow;
