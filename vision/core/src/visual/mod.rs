//! Chart Rasterisation
//!
//! [`ChartRenderer`] draws the control visual for a snapshot: a price chart
//! on a dark grid, coloured by the direction of the latest move. It is pure
//! and deterministic, so the same snapshot always yields the same pixels.

use image::{Rgb, RgbImage};

use crate::config::{ChartConfig, ChartType};
use crate::pipeline::VisualRenderer;
use crate::snapshot::{StockSnapshot, Trend};

const BACKGROUND: Rgb<u8> = Rgb([14, 17, 23]);
const GRID: Rgb<u8> = Rgb([38, 44, 56]);
const RISING: Rgb<u8> = Rgb([46, 204, 113]);
const FALLING: Rgb<u8> = Rgb([231, 76, 60]);
const FLAT: Rgb<u8> = Rgb([149, 165, 166]);

/// Grid divisions per axis
const GRID_LINES: u32 = 6;
/// Opacity of the area under a line chart
const AREA_ALPHA: f32 = 0.3;

/// Rasterises snapshots into line or candlestick charts
#[derive(Clone, Copy, Debug)]
pub struct ChartRenderer {
    width: u32,
    height: u32,
    chart_type: ChartType,
}

impl ChartRenderer {
    /// Create a renderer producing `width` x `height` images
    #[must_use]
    pub fn new(width: u32, height: u32, chart_type: ChartType) -> Self {
        Self {
            width: width.max(16),
            height: height.max(16),
            chart_type,
        }
    }

    /// Create from the chart section of the configuration
    #[must_use]
    pub fn from_config(config: &ChartConfig) -> Self {
        Self::new(config.width, config.height, config.chart_type)
    }
}

impl Default for ChartRenderer {
    fn default() -> Self {
        Self::from_config(&ChartConfig::default())
    }
}

impl VisualRenderer for ChartRenderer {
    fn render(&self, snapshot: &StockSnapshot) -> anyhow::Result<RgbImage> {
        let (low, high) = snapshot
            .price_bounds()
            .ok_or_else(|| anyhow::anyhow!("cannot chart an empty snapshot"))?;

        let mut image = RgbImage::from_pixel(self.width, self.height, BACKGROUND);
        let plot = PlotArea::new(self.width, self.height, low, high);
        plot.draw_grid(&mut image);

        let color = match snapshot.trend() {
            Trend::Rising => RISING,
            Trend::Falling => FALLING,
            Trend::Flat => FLAT,
        };

        match self.chart_type {
            ChartType::Line => plot.draw_line_chart(&mut image, snapshot, color),
            ChartType::Candle => plot.draw_candles(&mut image, snapshot),
        }

        Ok(image)
    }
}

/// Maps prices and bar indices to pixel coordinates
#[derive(Clone, Copy, Debug)]
struct PlotArea {
    left: f32,
    right: f32,
    top: f32,
    bottom: f32,
    low: f64,
    high: f64,
}

impl PlotArea {
    fn new(width: u32, height: u32, low: f64, high: f64) -> Self {
        let (w, h) = (width as f32, height as f32);
        // Keep a flat series in the middle instead of dividing by zero
        let (low, high) = if (high - low).abs() < f64::EPSILON {
            (low - 1.0, high + 1.0)
        } else {
            let pad = (high - low) * 0.05;
            (low - pad, high + pad)
        };
        Self {
            left: w * 0.04,
            right: w * 0.96 - 1.0,
            top: h * 0.06,
            bottom: h * 0.94 - 1.0,
            low,
            high,
        }
    }

    fn y(&self, price: f64) -> f32 {
        let t = ((price - self.low) / (self.high - self.low)) as f32;
        self.bottom - t * (self.bottom - self.top)
    }

    fn x_point(&self, index: usize, count: usize) -> f32 {
        if count <= 1 {
            return (self.left + self.right) / 2.0;
        }
        self.left + (self.right - self.left) * index as f32 / (count - 1) as f32
    }

    fn slot_width(&self, count: usize) -> f32 {
        (self.right - self.left) / count.max(1) as f32
    }

    fn draw_grid(&self, image: &mut RgbImage) {
        for i in 0..=GRID_LINES {
            let t = i as f32 / GRID_LINES as f32;
            let y = self.top + (self.bottom - self.top) * t;
            let x = self.left + (self.right - self.left) * t;
            fill_rect(image, self.left, y, self.right, y, GRID);
            fill_rect(image, x, self.top, x, self.bottom, GRID);
        }
    }

    fn draw_line_chart(&self, image: &mut RgbImage, snapshot: &StockSnapshot, color: Rgb<u8>) {
        let count = snapshot.history.len();
        let points: Vec<(f32, f32)> = snapshot
            .history
            .iter()
            .enumerate()
            .map(|(i, p)| (self.x_point(i, count), self.y(p.close)))
            .collect();

        if let [(x, y)] = points.as_slice() {
            fill_rect(image, self.left, *y - 1.0, self.right, *y + 1.0, color);
            fill_rect(image, *x - 2.0, *y - 2.0, *x + 2.0, *y + 2.0, color);
            return;
        }

        let area = blend(BACKGROUND, color, AREA_ALPHA);
        for pair in points.windows(2) {
            let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
            let mut x = x0.floor();
            while x <= x1.ceil() {
                let t = if (x1 - x0).abs() < f32::EPSILON {
                    0.0
                } else {
                    ((x - x0) / (x1 - x0)).clamp(0.0, 1.0)
                };
                let y = y0 + (y1 - y0) * t;
                fill_rect(image, x, y, x, self.bottom, area);
                x += 1.0;
            }
        }
        for pair in points.windows(2) {
            draw_line(image, pair[0], pair[1], color);
        }
    }

    fn draw_candles(&self, image: &mut RgbImage, snapshot: &StockSnapshot) {
        let count = snapshot.history.len();
        let slot = self.slot_width(count);
        let body_half = (slot * 0.35).max(0.5);

        for (i, bar) in snapshot.history.iter().enumerate() {
            let color = if bar.close >= bar.open { RISING } else { FALLING };
            let center = self.left + slot * (i as f32 + 0.5);

            fill_rect(image, center, self.y(bar.high), center, self.y(bar.low), color);

            let (top, bottom) = (self.y(bar.open.max(bar.close)), self.y(bar.open.min(bar.close)));
            fill_rect(image, center - body_half, top, center + body_half, bottom.max(top + 1.0), color);
        }
    }
}

/// Fill the inclusive pixel rectangle spanned by two corners
fn fill_rect(image: &mut RgbImage, x0: f32, y0: f32, x1: f32, y1: f32, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    let clamp_x = |v: f32| v.round().clamp(0.0, (width - 1) as f32) as u32;
    let clamp_y = |v: f32| v.round().clamp(0.0, (height - 1) as f32) as u32;

    let (xa, xb) = (clamp_x(x0.min(x1)), clamp_x(x0.max(x1)));
    let (ya, yb) = (clamp_y(y0.min(y1)), clamp_y(y0.max(y1)));
    for y in ya..=yb {
        for x in xa..=xb {
            image.put_pixel(x, y, color);
        }
    }
}

/// Three-pixel-wide line between two points
fn draw_line(image: &mut RgbImage, (x0, y0): (f32, f32), (x1, y1): (f32, f32), color: Rgb<u8>) {
    let steps = (x1 - x0).abs().max((y1 - y0).abs()).ceil().max(1.0) as u32;
    for step in 0..=steps {
        let t = step as f32 / steps as f32;
        let x = x0 + (x1 - x0) * t;
        let y = y0 + (y1 - y0) * t;
        fill_rect(image, x - 1.0, y - 1.0, x + 1.0, y + 1.0, color);
    }
}

fn blend(under: Rgb<u8>, over: Rgb<u8>, alpha: f32) -> Rgb<u8> {
    let mix = |a: u8, b: u8| (f32::from(a) + (f32::from(b) - f32::from(a)) * alpha).round() as u8;
    Rgb([
        mix(under[0], over[0]),
        mix(under[1], over[1]),
        mix(under[2], over[2]),
    ])
}
