//! Drawing capability the card renderer paints through
//!
//! Coordinates are logical page units (595×842); implementations apply the
//! DPI scale themselves.

use super::canvas::Logo;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextAlign {
    /// Anchor at the start of the run
    #[default]
    Left,
    /// Anchor at the middle of the run
    Center,
}

/// How a run of text is painted
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextStyle {
    /// Font size in logical units
    pub size: f32,
    pub align: TextAlign,
    /// Fill opacity, 0.0–1.0
    pub opacity: f32,
    /// Quarter turn counter-clockwise around this pivot before placing the run
    pub rotated_about: Option<Point>,
}

impl TextStyle {
    #[must_use]
    pub const fn new(size: f32) -> Self {
        Self {
            size,
            align: TextAlign::Left,
            opacity: 1.0,
            rotated_about: None,
        }
    }

    #[must_use]
    pub const fn centered(mut self) -> Self {
        self.align = TextAlign::Center;
        self
    }

    #[must_use]
    pub const fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    #[must_use]
    pub const fn rotated_about(mut self, pivot: Point) -> Self {
        self.rotated_about = Some(pivot);
        self
    }
}

/// Raster drawing surface.
///
/// Strokes are 1 unit wide and black; text uses the surface's typeface.
pub trait Surface {
    /// Wipe the whole page back to blank paper
    fn clear(&mut self);

    fn stroke_rect(&mut self, rect: Rect);

    fn stroke_circle(&mut self, center: Point, radius: f32);

    /// Paint `text` with its baseline anchored at `at`. With a rotation
    /// pivot, `at` is relative to the pivot in the rotated frame.
    fn fill_text(&mut self, text: &str, at: Point, style: &TextStyle);

    /// Advance width of `text` in logical units
    fn measure_text(&mut self, text: &str, style: &TextStyle) -> f32;

    /// Blit a bitmap scaled into `dest`
    fn draw_image(&mut self, image: &Logo, dest: Rect);
}
