//! Image Synthesis Backends
//!
//! Implementations of [`ImageSynthesizer`](crate::pipeline::ImageSynthesizer).

mod diffusion;

pub use diffusion::{DiffusionHttpSynthesizer, SynthesisMode};
