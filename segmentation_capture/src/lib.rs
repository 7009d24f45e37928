mod converter;
mod routes;
mod server;
mod stream;

pub mod app;
pub mod camera;
pub mod config;
pub mod coordinator;
pub mod display;
pub mod frame;
#[cfg(feature = "opencv")]
pub mod opencv_device;
pub mod telemetry;

pub use app::start_app;
pub use converter::{image_from_pixel_buffer, pixel_buffer_from_image};
