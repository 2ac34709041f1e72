//! Picture Widget
//!
//! Draws an `RgbImage` using upper half blocks: each terminal cell shows two
//! vertically stacked pixels, the upper one as foreground and the lower one
//! as background. A frame of `cols × rows*2` pixels fills the area exactly.
//! Smaller frames are centred.

use image::{Rgb, RgbImage};
use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::Color;
use ratatui::widgets::Widget;

const HALF_BLOCK: &str = "▀";

/// A borrowed frame to draw
pub struct Picture<'a> {
    image: &'a RgbImage,
}

impl<'a> Picture<'a> {
    pub fn new(image: &'a RgbImage) -> Self {
        Self { image }
    }
}

fn color(pixel: Rgb<u8>) -> Color {
    let [r, g, b] = pixel.0;
    Color::Rgb(r, g, b)
}

impl Widget for Picture<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let (width, height) = self.image.dimensions();
        let cols = area.width.min(u16::try_from(width).unwrap_or(u16::MAX));
        let rows = area
            .height
            .min(u16::try_from(height.div_ceil(2)).unwrap_or(u16::MAX));
        let left = area.x + (area.width - cols) / 2;
        let top = area.y + (area.height - rows) / 2;

        for row in 0..rows {
            let upper_y = u32::from(row) * 2;
            let lower_y = (upper_y + 1).min(height - 1);
            for col in 0..cols {
                let x = u32::from(col);
                let upper = *self.image.get_pixel(x, upper_y);
                let lower = *self.image.get_pixel(x, lower_y);
                buf[(left + col, top + row)]
                    .set_symbol(HALF_BLOCK)
                    .set_fg(color(upper))
                    .set_bg(color(lower));
            }
        }
    }
}
