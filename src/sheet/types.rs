//! Core types for raffle sheet rendering

use std::fmt;
use std::ops::Range;

use super::CARDS_PER_PAGE;

/// Everything printed on the tickets, as submitted by the caller.
///
/// Shared read-only with every rendering unit; nothing mutates it once a
/// dispatch has started.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RaffleDetails {
    /// Number of pages to generate (five tickets each)
    pub quantity: u32,
    pub organization_name: String,
    pub raffle_name: String,
    pub first_prize: String,
    pub second_prize: String,
    pub third_prize: String,
    pub price: String,
    /// Raw PNG bytes of the organizer logo
    pub logo: Vec<u8>,
}

impl RaffleDetails {
    /// Total tickets the whole document will carry
    #[must_use]
    pub fn ticket_total(&self) -> u64 {
        u64::from(self.quantity) * CARDS_PER_PAGE as u64
    }

    /// The page range covering the entire document
    #[must_use]
    pub fn full_range(&self) -> PageRange {
        PageRange::new(0, self.quantity as usize)
    }
}

/// Half-open range of page indices owned by one rendering unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    /// Create a range; an inverted range collapses to an empty one at `start`.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        if end < start {
            Self { start, end: start }
        } else {
            Self { start, end }
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Ticket number printed on the first card of the range
    #[must_use]
    pub const fn first_ticket(&self) -> TicketNumber {
        TicketNumber((self.start * CARDS_PER_PAGE) as u64 + 1)
    }

    /// Number of tickets the range renders
    #[must_use]
    pub const fn ticket_count(&self) -> u64 {
        (self.len() * CARDS_PER_PAGE) as u64
    }

    #[must_use]
    pub fn pages(&self) -> Range<usize> {
        self.start..self.end
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Global 1-based ticket number.
///
/// Displays zero-padded to three digits; larger numbers print in full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TicketNumber(pub u64);

impl TicketNumber {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

/// Running ticket sequence for one rendering unit
#[derive(Debug)]
pub struct TicketCounter {
    next: u64,
}

impl TicketCounter {
    /// Counter whose first number matches the start of `range`
    #[must_use]
    pub const fn for_range(range: &PageRange) -> Self {
        Self {
            next: range.first_ticket().0,
        }
    }

    /// Hand out the next number
    pub fn advance(&mut self) -> TicketNumber {
        let current = TicketNumber(self.next);
        self.next += 1;
        current
    }
}

/// Losslessly encoded page raster, ready for embedding.
#[derive(Clone)]
pub struct PageImage {
    /// PNG stream (8-bit RGB)
    pub png: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("png_len", &self.png.len())
            .field("width_px", &self.width_px)
            .field("height_px", &self.height_px)
            .finish()
    }
}

/// One finished page: its image and the tickets printed on it
#[derive(Clone, Debug)]
pub struct RenderedPage {
    /// Page index within the document (0-indexed)
    pub index: usize,
    pub image: PageImage,
    pub tickets: [TicketNumber; CARDS_PER_PAGE],
}

impl RenderedPage {
    #[must_use]
    pub fn summary(&self) -> PageSummary {
        PageSummary {
            index: self.index,
            first_ticket: self.tickets[0],
            last_ticket: self.tickets[CARDS_PER_PAGE - 1],
        }
    }
}

/// Bookkeeping kept for every page of an assembled document
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageSummary {
    pub index: usize,
    pub first_ticket: TicketNumber,
    pub last_ticket: TicketNumber,
}

/// Output of one rendering unit, keyed by worker ordinal
#[derive(Debug)]
pub struct WorkerResult {
    pub index: usize,
    pub pages: Vec<RenderedPage>,
}

/// The serialized document plus what ended up on each page
#[derive(Clone)]
pub struct OutputDocument {
    pub bytes: Vec<u8>,
    pub pages: Vec<PageSummary>,
}

impl OutputDocument {
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Every ticket number in document order
    pub fn tickets(&self) -> impl Iterator<Item = TicketNumber> + '_ {
        self.pages
            .iter()
            .flat_map(|p| (p.first_ticket.0..=p.last_ticket.0).map(TicketNumber))
    }
}

impl fmt::Debug for OutputDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputDocument")
            .field("bytes_len", &self.bytes.len())
            .field("page_count", &self.pages.len())
            .finish()
    }
}
