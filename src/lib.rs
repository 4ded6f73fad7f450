pub mod error;
pub mod geometry;
pub mod sketch;

pub use error::SketchError;

pub fn version() -> &'static str {
    "0.1.0"
}
