pub mod app;
pub mod camera;
pub mod config;
pub mod connection;
pub mod error;
pub mod feedback;
pub mod logging;
pub mod pose;
pub mod protocol;
pub mod render;
pub mod streaming;
