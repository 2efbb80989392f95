//! Fixed geometry of a single raffle ticket
//!
//! A card is 594×141 units: a 142-unit stub on the left (owner name, phone
//! and ticket number, written sideways) and the information area on the
//! right with the organizer details, prizes, price badge and logo.

use super::PAGE_WIDTH;
use super::canvas::Logo;
use super::surface::{Point, Rect, Surface, TextStyle};
use super::types::{RaffleDetails, TicketNumber};

const CARD_WIDTH: f32 = 594.0;
const CARD_HEIGHT: f32 = 141.0;
const STUB_WIDTH: f32 = 142.0;
const INFO_LEFT: f32 = STUB_WIDTH + 1.0;
const INFO_WIDTH: f32 = 382.0;
const TEXT_INDENT: f32 = 24.0;
const LINE_HEIGHT: f32 = 24.0;

const BADGE_CENTER_X: f32 = 559.0;
const BADGE_OFFSET_Y: f32 = 106.0;
const BADGE_RADIUS: f32 = 33.0;
const PRICE_BASELINE_SHIFT: f32 = 6.0;

const STUB_PIVOT_Y: f32 = 129.0;

const TEXT_SIZE: f32 = 18.0;
const TITLE_SIZE: f32 = 24.0;
const WATERMARK_SIZE: f32 = 110.0;
const WATERMARK_OPACITY: f32 = 0.06;
const WATERMARK_BASELINE: f32 = 110.0;

/// Side of the square box the logo is scaled into
pub const LOGO_BOX: f32 = 70.0;

/// Per-card rendering switches
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CardOptions {
    /// Print the ticket number as a faint backdrop across the information area
    pub watermark: bool,
}

impl Default for CardOptions {
    fn default() -> Self {
        Self { watermark: true }
    }
}

/// Draw the card frame, the stub and (optionally) the watermark.
pub fn draw_card<S: Surface + ?Sized>(
    surface: &mut S,
    origin_y: f32,
    ticket: TicketNumber,
    options: &CardOptions,
) {
    surface.stroke_rect(Rect::new(1.0, origin_y + 1.0, CARD_WIDTH, CARD_HEIGHT));
    surface.stroke_rect(Rect::new(STUB_WIDTH, origin_y + 1.0, 1.0, CARD_HEIGHT));
    surface.stroke_circle(
        Point::new(BADGE_CENTER_X, origin_y + BADGE_OFFSET_Y),
        BADGE_RADIUS,
    );

    let number = ticket.to_string();

    if options.watermark {
        let style = TextStyle::new(WATERMARK_SIZE)
            .centered()
            .with_opacity(WATERMARK_OPACITY);
        surface.fill_text(
            &number,
            Point::new(INFO_LEFT + INFO_WIDTH / 2.0, origin_y + WATERMARK_BASELINE),
            &style,
        );
    }

    let stub = TextStyle::new(TEXT_SIZE).rotated_about(Point::new(0.0, origin_y + STUB_PIVOT_Y));
    surface.fill_text("Nombre: ", Point::new(0.0, 26.0), &stub);
    surface.fill_text("Cel: ", Point::new(0.0, 50.0), &stub);
    surface.fill_text(&format!("N°: {number}"), Point::new(0.0, 129.0), &stub);
}

/// Draw the organizer details, prizes, price and logo.
///
/// The logo goes last so it sits above any long title text.
pub fn draw_information<S: Surface + ?Sized>(
    surface: &mut S,
    origin_y: f32,
    details: &RaffleDetails,
    logo: &Logo,
) {
    surface.fill_text(
        &details.organization_name,
        Point::new(INFO_LEFT + INFO_WIDTH / 2.0, origin_y + 30.0),
        &TextStyle::new(TITLE_SIZE).centered(),
    );

    let body = TextStyle::new(TEXT_SIZE);
    let left = INFO_LEFT + TEXT_INDENT;
    surface.fill_text(
        &details.raffle_name,
        Point::new(left, origin_y + 30.0 + LINE_HEIGHT),
        &body,
    );

    let prizes = [
        &details.first_prize,
        &details.second_prize,
        &details.third_prize,
    ];
    for (i, prize) in prizes.into_iter().enumerate() {
        let baseline = origin_y + 30.0 + LINE_HEIGHT * (i as f32 + 2.0);
        surface.fill_text(&prize_line(i + 1, prize), Point::new(left, baseline), &body);
    }

    let price_width = surface.measure_text(&details.price, &body);
    surface.fill_text(
        &details.price,
        Point::new(
            BADGE_CENTER_X - price_width / 2.0,
            origin_y + BADGE_OFFSET_Y + PRICE_BASELINE_SHIFT,
        ),
        &body,
    );

    surface.draw_image(
        logo,
        Rect::new(PAGE_WIDTH - LOGO_BOX, origin_y + 1.0, LOGO_BOX, LOGO_BOX),
    );
}

/// "Premio N: <prize>"
#[must_use]
pub fn prize_line(place: usize, prize: &str) -> String {
    format!("Premio {place}: {prize}")
}
