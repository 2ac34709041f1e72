//! Widgets
//!
//! - [`Picture`]: draws an RGB frame with half-block cells

mod picture;

pub use picture::Picture;
