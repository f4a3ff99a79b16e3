pub mod landmark;

pub use landmark::{landmark_at, Landmark, LandmarkIndex};
