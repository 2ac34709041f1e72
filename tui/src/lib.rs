//! stockvision TUI - Terminal surface for the refresh core
//!
//! Full-screen display of crossfading market art with a text overlay.
//!
//! # Architecture
//!
//! - **App**: the fixed-tick render loop (scheduling, hand-off, crossfade, draw)
//! - **Overlay**: stock panel, details panel and status line
//! - **Widgets**: half-block picture rendering
//! - **Input**: key bindings onto core control signals

pub mod app;
pub mod input;
pub mod overlay;
pub mod theme;
pub mod widgets;

pub use app::App;
pub use overlay::{OverlayStatus, StockOverlay};
