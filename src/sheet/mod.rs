//! Raffle sheet rendering infrastructure
//!
//! Lays out five numbered ticket cards per page, rasterizes the pages in
//! parallel rendering units and assembles them into a single PDF.

mod canvas;
mod card;
mod compositor;
mod document;
mod metrics;
mod paginator;
mod progress;
mod request;
mod service;
mod surface;
mod types;
mod worker;

pub use canvas::{Logo, PageCanvas, Typeface};
pub use card::{CardOptions, LOGO_BOX, draw_card, draw_information, prize_line};
pub use compositor::{PageCompositor, compose_page};
pub use document::{SheetDocument, page_size_pt};
pub use metrics::TextMetricsCache;
pub use paginator::{PageProgress, Paginator, RenderConfig, render_pages};
pub use progress::{Progress, ProgressPolicy, ProgressTracker};
pub use request::{RenderError, RenderRequest, StatusMessage, WorkerEvent};
pub use service::{CancelToken, DispatchConfig, Dispatcher, partition};
pub use worker::render_worker;
pub use surface::{Point, Rect, Surface, TextAlign, TextStyle};
pub use types::*;

/// Logical page width (canvas units)
pub const PAGE_WIDTH: f32 = 595.0;
/// Logical page height (canvas units)
pub const PAGE_HEIGHT: f32 = 842.0;
/// Physical page size in millimetres (A4)
pub const PAGE_SIZE_MM: (f32, f32) = (210.0, 297.0);

/// Cards stacked on every page
pub const CARDS_PER_PAGE: usize = 5;
/// Vertical distance between card origins
pub const ROW_PITCH: f32 = 146.0;

/// Resolution pages are rasterized at unless configured otherwise
pub const DEFAULT_DPI: f32 = 300.0;
/// Baseline the DPI scale factor is computed against
pub const BASE_DPI: f32 = 96.0;
/// Upper bound on rendering units when parallelism is auto-detected
pub const DEFAULT_MAX_WORKERS: usize = 16;
/// Text metric entries kept per rendering unit
pub const DEFAULT_METRICS_CACHE_SIZE: usize = 64;

/// Scale factor applied to logical coordinates for a target DPI.
#[must_use]
pub fn dpi_scale(dpi: f32) -> f32 {
    dpi / BASE_DPI
}

/// Raster dimensions of a page at the given DPI.
#[must_use]
pub fn page_pixel_size(dpi: f32) -> (u32, u32) {
    let scale = dpi_scale(dpi);
    (
        (PAGE_WIDTH * scale).ceil() as u32,
        (PAGE_HEIGHT * scale).ceil() as u32,
    )
}
