//! Messages exchanged between the coordinator and rendering units

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::types::{PageRange, RaffleDetails, WorkerResult};

/// Request sent to render workers
#[derive(Debug)]
pub enum RenderRequest {
    /// Render a contiguous page range as one unit
    Range {
        /// Worker ordinal the result is merged under
        unit: usize,
        details: Arc<RaffleDetails>,
        /// `None` renders the whole document
        range: Option<PageRange>,
    },

    /// Stop the worker thread
    Shutdown,
}

/// Event sent back by render workers
#[derive(Debug)]
pub enum WorkerEvent {
    /// A page of the unit finished
    PageRendered {
        unit: usize,
        pages_done: usize,
        pages_total: usize,
    },

    /// All pages of the unit are rendered
    Complete(WorkerResult),

    /// The unit stopped because cancellation was requested
    Cancelled { unit: usize },

    /// The unit gave up
    Failed { unit: usize, error: RenderError },
}

/// Errors surfaced by the rendering pipeline
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("logo is not a decodable PNG image: {0}")]
    LogoDecode(#[source] image::ImageError),

    #[error("rendering unit {unit} failed: {detail}")]
    RenderUnitFailure { unit: usize, detail: String },

    #[error("rendering did not finish within {0:?}")]
    UnitTimeout(Duration),

    #[error("rendering was cancelled")]
    Cancelled,

    #[error("page scene could not be parsed: {detail}")]
    Scene { detail: String },

    #[error("page encoding: {0}")]
    Encode(#[from] png::EncodingError),

    #[error("cannot allocate a {width}x{height} drawing surface")]
    Surface { width: u32, height: u32 },

    #[error("PDF assembly: {0}")]
    Document(#[from] lopdf::Error),

    #[error("{detail}")]
    Generic { detail: String },
}

impl RenderError {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }

    pub fn unit_failure(unit: usize, detail: impl Into<String>) -> Self {
        Self::RenderUnitFailure {
            unit,
            detail: detail.into(),
        }
    }
}

/// Status line handed to whatever displays progress
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StatusMessage {
    /// Overall completion, 0–100
    Progress { value: u8 },
    /// Tickets rendered so far across all units
    TicketCount { value: u64 },
    /// Document finished
    #[serde(rename_all = "camelCase")]
    Complete {
        page_count: usize,
        document_bytes: usize,
    },
}
