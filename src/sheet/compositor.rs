//! Page compositor - five cards per page

use log::debug;

use super::canvas::{Logo, PageCanvas};
use super::card::{CardOptions, draw_card, draw_information};
use super::request::RenderError;
use super::surface::Surface;
use super::types::{RaffleDetails, RenderedPage, TicketCounter, TicketNumber};
use super::{CARDS_PER_PAGE, ROW_PITCH};

/// Clear `surface` and draw one page worth of cards, numbering them from
/// `counter`. Returns the numbers printed, top to bottom.
pub fn compose_page<S: Surface + ?Sized>(
    surface: &mut S,
    details: &RaffleDetails,
    logo: &Logo,
    counter: &mut TicketCounter,
    options: &CardOptions,
) -> [TicketNumber; CARDS_PER_PAGE] {
    surface.clear();

    std::array::from_fn(|row| {
        let origin_y = row as f32 * ROW_PITCH;
        let ticket = counter.advance();
        draw_card(surface, origin_y, ticket, options);
        draw_information(surface, origin_y, details, logo);
        ticket
    })
}

/// Owns the raster surface and logo of one rendering unit
pub struct PageCompositor {
    canvas: PageCanvas,
    logo: Logo,
    options: CardOptions,
}

impl PageCompositor {
    #[must_use]
    pub fn new(canvas: PageCanvas, logo: Logo, options: CardOptions) -> Self {
        Self {
            canvas,
            logo,
            options,
        }
    }

    /// Render page `index` and encode it; the surface is blank again afterwards.
    pub fn render_page(
        &mut self,
        index: usize,
        details: &RaffleDetails,
        counter: &mut TicketCounter,
    ) -> Result<RenderedPage, RenderError> {
        let tickets = compose_page(
            &mut self.canvas,
            details,
            &self.logo,
            counter,
            &self.options,
        );
        let image = self.canvas.finish_page()?;
        self.canvas.clear();

        debug!(
            "Page {index}: tickets {}-{} ({} bytes)",
            tickets[0],
            tickets[CARDS_PER_PAGE - 1],
            image.png.len()
        );

        Ok(RenderedPage {
            index,
            image,
            tickets,
        })
    }
}
