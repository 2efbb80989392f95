//! Pagination driver - renders one unit's page range in order

use std::ops::{ControlFlow, Range};
use std::sync::Arc;
use std::time::Instant;

use log::debug;

use super::canvas::{Logo, PageCanvas, Typeface};
use super::card::{CardOptions, LOGO_BOX};
use super::compositor::PageCompositor;
use super::request::RenderError;
use super::types::{PageRange, RaffleDetails, RenderedPage, TicketCounter};
use super::{CARDS_PER_PAGE, DEFAULT_DPI};

/// Settings every rendering unit is started with
#[derive(Clone, Debug)]
pub struct RenderConfig {
    /// Raster resolution of each page
    pub dpi: f32,
    pub card: CardOptions,
    /// TrueType/OpenType bytes to prefer over system fonts
    pub font: Option<Arc<[u8]>>,
    /// Generic family used when `font` is absent or lacks a glyph
    pub font_family: String,
    /// Panic while rendering this page index, to exercise unit failure paths
    #[cfg(any(test, feature = "test-utils"))]
    pub panic_on_page: Option<usize>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            dpi: DEFAULT_DPI,
            card: CardOptions::default(),
            font: None,
            font_family: "serif".to_string(),
            #[cfg(any(test, feature = "test-utils"))]
            panic_on_page: None,
        }
    }
}

/// Progress of a single unit after a page completes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageProgress {
    pub pages_done: usize,
    pub pages_total: usize,
    pub tickets_rendered: u64,
}

impl PageProgress {
    /// Completion of the unit, 0–100 rounded
    #[must_use]
    pub fn percent(&self) -> u8 {
        if self.pages_total == 0 {
            return 0;
        }
        ((self.pages_done as f64 / self.pages_total as f64) * 100.0).round() as u8
    }
}

/// Lazy sequence of rendered pages for one range.
///
/// Owns the unit's canvas, logo and fonts; they are released when the
/// paginator is dropped. Not restartable, and fused after the first error.
pub struct Paginator {
    compositor: PageCompositor,
    details: Arc<RaffleDetails>,
    range: PageRange,
    pages: Range<usize>,
    counter: TicketCounter,
    #[cfg(any(test, feature = "test-utils"))]
    panic_on_page: Option<usize>,
}

impl Paginator {
    /// Acquire the unit's resources: fonts, page surface and decoded logo.
    ///
    /// The range is clipped to the document's page count.
    pub fn new(
        details: Arc<RaffleDetails>,
        range: PageRange,
        config: &RenderConfig,
    ) -> Result<Self, RenderError> {
        let quantity = details.quantity as usize;
        let range = PageRange::new(range.start.min(quantity), range.end.min(quantity));

        let typeface = Typeface::load(config.font.as_deref(), &config.font_family);
        let canvas = PageCanvas::new(config.dpi, typeface)?;
        let logo_px = canvas.to_px(LOGO_BOX);
        let logo = Logo::decode(&details.logo, logo_px, logo_px)?;

        debug!(
            "Paginator for pages {range} at {} dpi ({}x{} px)",
            config.dpi,
            canvas.width_px(),
            canvas.height_px()
        );

        Ok(Self {
            compositor: PageCompositor::new(canvas, logo, config.card),
            details,
            range,
            pages: range.pages(),
            counter: TicketCounter::for_range(&range),
            #[cfg(any(test, feature = "test-utils"))]
            panic_on_page: config.panic_on_page,
        })
    }

    #[must_use]
    pub fn range(&self) -> PageRange {
        self.range
    }
}

impl Iterator for Paginator {
    type Item = Result<RenderedPage, RenderError>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.pages.next()?;
        #[cfg(any(test, feature = "test-utils"))]
        if self.panic_on_page == Some(index) {
            panic!("forced panic on page {index}");
        }
        let result = self
            .compositor
            .render_page(index, &self.details, &mut self.counter);
        if result.is_err() {
            self.pages = self.pages.end..self.pages.end;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pages.size_hint()
    }
}

impl ExactSizeIterator for Paginator {}

/// Render every page of `range`, calling `on_progress` after each one.
///
/// Returning `ControlFlow::Break` from `on_progress` stops the unit with
/// `RenderError::Cancelled`; pages rendered so far are discarded.
pub fn render_pages(
    details: Arc<RaffleDetails>,
    range: PageRange,
    config: &RenderConfig,
    mut on_progress: impl FnMut(&PageProgress) -> ControlFlow<()>,
) -> Result<Vec<RenderedPage>, RenderError> {
    let started = Instant::now();
    let paginator = Paginator::new(details, range, config)?;
    let range = paginator.range();
    let pages_total = paginator.len();
    let mut pages = Vec::with_capacity(pages_total);

    for page in paginator {
        pages.push(page?);
        let progress = PageProgress {
            pages_done: pages.len(),
            pages_total,
            tickets_rendered: (pages.len() * CARDS_PER_PAGE) as u64,
        };
        if on_progress(&progress).is_break() {
            debug!("Stopped {range} after {} of {pages_total} pages", pages.len());
            return Err(RenderError::Cancelled);
        }
    }

    debug!(
        "Rendered {} pages of {range} in {:?}",
        pages.len(),
        started.elapsed()
    );
    Ok(pages)
}
