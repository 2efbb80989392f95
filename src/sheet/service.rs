//! Dispatch service - partitions a document across worker threads and merges
//! their pages back in order

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};

use super::DEFAULT_MAX_WORKERS;
use super::canvas::Logo;
use super::document::SheetDocument;
use super::paginator::RenderConfig;
use super::progress::{Progress, ProgressPolicy, ProgressTracker};
use super::request::{RenderError, RenderRequest, WorkerEvent};
use super::types::{OutputDocument, PageRange, RaffleDetails, WorkerResult};
use super::worker::render_worker;

/// How often the coordinator wakes up to look at cancellation and deadlines
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long a failed dispatch waits for its units to stop before detaching them
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Cooperative cancellation flag shared across threads.
///
/// A child token observes its parent's cancellation, but cancelling the child
/// leaves the parent untouched.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Box<CancelToken>>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Box::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }
}

/// Pool and rendering settings for one dispatcher
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Fixed worker count; `None` uses the available parallelism
    pub workers: Option<usize>,
    /// Cap applied to the auto-detected worker count
    pub max_workers: usize,
    pub progress: ProgressPolicy,
    /// Wall-clock limit for a whole dispatch
    pub unit_timeout: Option<Duration>,
    pub render: RenderConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: None,
            max_workers: DEFAULT_MAX_WORKERS,
            progress: ProgressPolicy::default(),
            unit_timeout: None,
            render: RenderConfig::default(),
        }
    }
}

impl DispatchConfig {
    /// Number of ranges the document is split into
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| {
                thread::available_parallelism()
                    .map_or(1, std::num::NonZeroUsize::get)
                    .min(self.max_workers)
            })
            .max(1)
    }
}

/// Split `[0, quantity)` into `workers` contiguous ranges of
/// `ceil(quantity / workers)` pages. Trailing ranges may be empty.
#[must_use]
pub fn partition(quantity: usize, workers: usize) -> Vec<PageRange> {
    let workers = workers.max(1);
    let per_worker = quantity.div_ceil(workers);

    (0..workers)
        .map(|i| {
            PageRange::new(
                (i * per_worker).min(quantity),
                ((i + 1) * per_worker).min(quantity),
            )
        })
        .collect()
}

/// Renders whole documents by fanning page ranges out to worker threads
pub struct Dispatcher {
    config: DispatchConfig,
    cancel: CancelToken,
}

impl Dispatcher {
    #[must_use]
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Token that aborts every dispatch of this dispatcher when cancelled
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Render `details` into a single PDF.
    ///
    /// `on_progress` runs on the calling thread after every page any unit
    /// finishes. No partial document is returned on failure.
    pub fn dispatch(
        &self,
        details: RaffleDetails,
        mut on_progress: impl FnMut(&Progress),
    ) -> Result<OutputDocument, RenderError> {
        if self.cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }

        let (logo_width, logo_height) = Logo::validate(&details.logo)?;
        let started = Instant::now();
        let quantity = details.quantity as usize;
        let ranges = partition(quantity, self.config.worker_count());
        let unit_pages: Vec<usize> = ranges.iter().map(PageRange::len).collect();
        let plan: Vec<(usize, PageRange)> = ranges
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, range)| !range.is_empty())
            .collect();

        info!(
            "Dispatching {quantity} pages ({} tickets) over {} units ({} ranges, logo {logo_width}x{logo_height})",
            details.ticket_total(),
            plan.len(),
            ranges.len()
        );

        let results = if plan.is_empty() {
            Vec::new()
        } else {
            self.run_units(details, &plan, &unit_pages, &mut on_progress)?
        };

        let document = merge_results(results)?;
        info!(
            "Document ready: {} pages, {} bytes in {:?}",
            document.page_count(),
            document.bytes.len(),
            started.elapsed()
        );
        Ok(document)
    }

    fn run_units(
        &self,
        details: RaffleDetails,
        plan: &[(usize, PageRange)],
        unit_pages: &[usize],
        on_progress: &mut dyn FnMut(&Progress),
    ) -> Result<Vec<WorkerResult>, RenderError> {
        let cancel = self.cancel.child();
        let details = Arc::new(details);
        let render = Arc::new(self.config.render.clone());

        let (request_tx, request_rx) = flume::unbounded();
        let (event_tx, event_rx) = flume::unbounded();

        let mut handles = Vec::with_capacity(plan.len());
        for i in 0..plan.len() {
            let rx = request_rx.clone();
            let tx = event_tx.clone();
            let render = Arc::clone(&render);
            let unit_cancel = cancel.clone();

            let handle = thread::Builder::new()
                .name(format!("rifagen-unit-{i}"))
                .spawn(move || render_worker(rx, tx, render, unit_cancel))
                .map_err(|e| {
                    cancel_remaining(&cancel);
                    RenderError::generic(format!("failed to spawn worker thread: {e}"))
                })?;
            handles.push(handle);
        }
        drop(event_tx);
        drop(request_rx);

        for &(unit, range) in plan {
            debug!("Unit {unit} gets pages {range}");
            let _ = request_tx.send(RenderRequest::Range {
                unit,
                details: Arc::clone(&details),
                range: Some(range),
            });
        }
        for _ in 0..handles.len() {
            let _ = request_tx.send(RenderRequest::Shutdown);
        }

        let mut tracker = ProgressTracker::new(self.config.progress, unit_pages);
        let units: Vec<usize> = plan.iter().map(|&(unit, _)| unit).collect();
        let outcome = collect_results(
            &event_rx,
            &units,
            &mut tracker,
            &cancel,
            self.config.unit_timeout,
            on_progress,
        );

        match outcome {
            Ok(results) => {
                for handle in handles {
                    let _ = handle.join();
                }
                Ok(results)
            }
            Err(e) => {
                error!("Dispatch failed: {e}");
                cancel_remaining(&cancel);
                join_workers(handles, SHUTDOWN_GRACE);
                Err(e)
            }
        }
    }
}

fn cancel_remaining(cancel: &CancelToken) {
    debug!("Cancelling outstanding units");
    cancel.cancel();
}

/// Join unit threads that exit within `grace`.
///
/// Units stop at the next page boundary once cancelled; any still running at
/// the deadline are detached. Returns how many were detached.
fn join_workers(handles: Vec<JoinHandle<()>>, grace: Duration) -> usize {
    let deadline = Instant::now() + grace;
    while handles.iter().any(|h| !h.is_finished()) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }

    let mut detached = 0;
    for handle in handles {
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            detached += 1;
        }
    }
    if detached > 0 {
        warn!("{detached} rendering units still busy after {grace:?}, detaching");
    }
    detached
}

/// Wait until every unit in `units` has reported completion.
///
/// The barrier is an explicit count of outstanding units, decremented once per
/// unit. Results come back sorted by worker index.
fn collect_results(
    events: &Receiver<WorkerEvent>,
    units: &[usize],
    tracker: &mut ProgressTracker,
    cancel: &CancelToken,
    timeout: Option<Duration>,
    on_progress: &mut dyn FnMut(&Progress),
) -> Result<Vec<WorkerResult>, RenderError> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut pending: BTreeSet<usize> = units.iter().copied().collect();
    let mut outstanding = pending.len();
    let mut results = Vec::with_capacity(outstanding);

    while outstanding > 0 {
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
            if Instant::now() >= deadline {
                return Err(RenderError::UnitTimeout(timeout));
            }
        }

        match events.recv_timeout(POLL_INTERVAL) {
            Ok(WorkerEvent::PageRendered {
                unit, pages_done, ..
            }) => {
                on_progress(&tracker.record(unit, pages_done));
            }
            Ok(WorkerEvent::Complete(result)) => {
                if pending.remove(&result.index) {
                    outstanding -= 1;
                    debug!(
                        "Unit {} complete with {} pages, {outstanding} outstanding",
                        result.index,
                        result.pages.len()
                    );
                    results.push(result);
                }
            }
            Ok(WorkerEvent::Cancelled { unit }) => {
                debug!("Unit {unit} acknowledged cancellation");
                return Err(RenderError::Cancelled);
            }
            Ok(WorkerEvent::Failed { unit, error }) => {
                return Err(unit_error(unit, error));
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                let unit = pending.first().copied().unwrap_or_default();
                return Err(RenderError::unit_failure(
                    unit,
                    "worker disconnected before reporting completion",
                ));
            }
        }
    }

    results.sort_by_key(|r| r.index);
    Ok(results)
}

/// Logo and unit failures pass through; anything else is attributed to the unit.
fn unit_error(unit: usize, error: RenderError) -> RenderError {
    match error {
        e @ (RenderError::LogoDecode(_) | RenderError::RenderUnitFailure { .. }) => e,
        other => RenderError::unit_failure(unit, other.to_string()),
    }
}

fn merge_results(results: Vec<WorkerResult>) -> Result<OutputDocument, RenderError> {
    let mut document = SheetDocument::new();
    let mut summaries = Vec::new();

    for result in results {
        for page in result.pages {
            debug_assert_eq!(page.index, summaries.len(), "pages merged out of order");
            document.append_page(&page.image)?;
            summaries.push(page.summary());
        }
    }

    Ok(OutputDocument {
        bytes: document.serialize()?,
        pages: summaries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::types::{RenderedPage, TicketNumber};
    use crate::test_utils::test_helpers::{low_dpi_config, sample_details, sample_page_image};

    fn dispatcher(workers: usize) -> Dispatcher {
        Dispatcher::new(DispatchConfig {
            workers: Some(workers),
            render: low_dpi_config(),
            ..DispatchConfig::default()
        })
    }

    fn fake_result(index: usize, pages: std::ops::Range<usize>) -> WorkerResult {
        let pages = pages
            .map(|p| RenderedPage {
                index: p,
                image: sample_page_image(),
                tickets: std::array::from_fn(|i| TicketNumber((p * 5 + i + 1) as u64)),
            })
            .collect();
        WorkerResult { index, pages }
    }

    #[test]
    fn partition_of_ten_pages_over_four_workers() {
        assert_eq!(
            partition(10, 4),
            vec![
                PageRange::new(0, 3),
                PageRange::new(3, 6),
                PageRange::new(6, 9),
                PageRange::new(9, 10),
            ]
        );
    }

    #[test]
    fn partition_covers_every_page_exactly_once() {
        for quantity in 0..40 {
            for workers in 1..12 {
                let ranges = partition(quantity, workers);
                assert_eq!(ranges.len(), workers);

                let mut next = 0;
                for range in &ranges {
                    if range.is_empty() {
                        continue;
                    }
                    assert_eq!(range.start, next, "gap or overlap for Q={quantity} W={workers}");
                    assert_eq!(range.first_ticket().get(), (range.start * 5 + 1) as u64);
                    next = range.end;
                }
                assert_eq!(next, quantity);
            }
        }
    }

    #[test]
    fn partition_treats_zero_workers_as_one() {
        assert_eq!(partition(3, 0), vec![PageRange::new(0, 3)]);
    }

    #[test]
    fn auto_worker_count_is_capped() {
        let config = DispatchConfig {
            max_workers: 1,
            ..DispatchConfig::default()
        };
        assert_eq!(config.worker_count(), 1);

        let fixed = DispatchConfig {
            workers: Some(0),
            ..DispatchConfig::default()
        };
        assert_eq!(fixed.worker_count(), 1);
    }

    #[test]
    fn child_token_follows_parent_only() {
        let parent = CancelToken::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn barrier_merges_in_worker_order() {
        let (tx, rx) = flume::unbounded();
        tx.send(WorkerEvent::Complete(fake_result(1, 2..4))).unwrap();
        tx.send(WorkerEvent::PageRendered {
            unit: 0,
            pages_done: 1,
            pages_total: 2,
        })
        .unwrap();
        tx.send(WorkerEvent::Complete(fake_result(0, 0..2))).unwrap();

        let mut tracker = ProgressTracker::new(ProgressPolicy::TicketCount, &[2, 2]);
        let mut seen = Vec::new();
        let results = collect_results(
            &rx,
            &[0, 1],
            &mut tracker,
            &CancelToken::new(),
            None,
            &mut |p: &Progress| seen.push(p.percent),
        )
        .unwrap();

        assert_eq!(results.iter().map(|r| r.index).collect::<Vec<_>>(), [0, 1]);
        assert_eq!(seen, vec![25]);
    }

    #[test]
    fn barrier_counts_each_unit_once() {
        let (tx, rx) = flume::unbounded();
        tx.send(WorkerEvent::Complete(fake_result(0, 0..1))).unwrap();
        tx.send(WorkerEvent::Complete(fake_result(0, 0..1))).unwrap();
        drop(tx);

        let mut tracker = ProgressTracker::new(ProgressPolicy::TicketCount, &[1, 1]);
        let err = collect_results(
            &rx,
            &[0, 1],
            &mut tracker,
            &CancelToken::new(),
            None,
            &mut |_| {},
        )
        .unwrap_err();

        assert!(matches!(err, RenderError::RenderUnitFailure { unit: 1, .. }));
    }

    #[test]
    fn barrier_propagates_unit_failure() {
        let (tx, rx) = flume::unbounded();
        tx.send(WorkerEvent::Failed {
            unit: 2,
            error: RenderError::generic("encoder exploded"),
        })
        .unwrap();

        let mut tracker = ProgressTracker::new(ProgressPolicy::TicketCount, &[1, 1, 1]);
        let err = collect_results(
            &rx,
            &[0, 1, 2],
            &mut tracker,
            &CancelToken::new(),
            None,
            &mut |_| {},
        )
        .unwrap_err();

        match err {
            RenderError::RenderUnitFailure { unit, detail } => {
                assert_eq!(unit, 2);
                assert!(detail.contains("encoder exploded"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn barrier_gives_up_after_timeout() {
        let (_tx, rx) = flume::unbounded();
        let mut tracker = ProgressTracker::new(ProgressPolicy::TicketCount, &[1]);
        let err = collect_results(
            &rx,
            &[0],
            &mut tracker,
            &CancelToken::new(),
            Some(Duration::ZERO),
            &mut |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::UnitTimeout(_)));
    }

    #[test]
    fn dispatch_renders_pages_in_ticket_order() {
        let document = dispatcher(2).dispatch(sample_details(3), |_| {}).unwrap();

        assert_eq!(document.page_count(), 3);
        let tickets: Vec<u64> = document.tickets().map(TicketNumber::get).collect();
        assert_eq!(tickets, (1..=15).collect::<Vec<_>>());
        assert!(document.bytes.starts_with(b"%PDF-"));
    }

    #[test]
    fn dispatch_reports_progress_up_to_complete() {
        let mut percents = Vec::new();
        dispatcher(2)
            .dispatch(sample_details(2), |p| percents.push(p.percent))
            .unwrap();

        assert_eq!(percents.len(), 2);
        assert_eq!(percents.iter().copied().max(), Some(100));
    }

    #[test]
    fn dispatch_with_zero_quantity_is_empty() {
        let document = dispatcher(4).dispatch(sample_details(0), |_| {}).unwrap();
        assert_eq!(document.page_count(), 0);
        assert!(document.bytes.starts_with(b"%PDF-"));
    }

    #[test]
    fn dispatch_rejects_bad_logo_even_without_pages() {
        let mut details = sample_details(0);
        details.logo = b"not a png".to_vec();
        let err = dispatcher(1).dispatch(details, |_| {}).unwrap_err();
        assert!(matches!(err, RenderError::LogoDecode(_)));
    }

    #[test]
    fn cancelled_dispatcher_produces_nothing() {
        let dispatcher = dispatcher(2);
        dispatcher.cancel_token().cancel();
        let err = dispatcher.dispatch(sample_details(2), |_| {}).unwrap_err();
        assert!(matches!(err, RenderError::Cancelled));
    }

    #[test]
    fn cancelling_mid_render_stops_the_dispatch() {
        let dispatcher = dispatcher(1);
        let token = dispatcher.cancel_token();
        let mut updates = 0;

        let err = dispatcher
            .dispatch(sample_details(6), |_| {
                updates += 1;
                if updates == 1 {
                    let token = token.clone();
                    thread::spawn(move || token.cancel()).join().unwrap();
                }
            })
            .unwrap_err();

        assert!(matches!(err, RenderError::Cancelled));
        assert!(updates < 6, "every page was reported after cancellation");
    }

    #[test]
    fn panicking_unit_fails_the_dispatch() {
        let dispatcher = Dispatcher::new(DispatchConfig {
            workers: Some(3),
            render: RenderConfig {
                panic_on_page: Some(1),
                ..low_dpi_config()
            },
            ..DispatchConfig::default()
        });

        let err = dispatcher.dispatch(sample_details(3), |_| {}).unwrap_err();
        match err {
            RenderError::RenderUnitFailure { unit, detail } => {
                assert_eq!(unit, 1);
                assert!(detail.contains("forced panic"), "{detail}");
            }
            other => panic!("expected unit failure, got {other:?}"),
        }

        // the dispatcher is still usable afterwards
        let healthy = dispatcher.dispatch(sample_details(1), |_| {}).unwrap();
        assert_eq!(healthy.page_count(), 1);
    }

    #[test]
    fn join_detaches_threads_past_the_grace_period() {
        let quick = thread::spawn(|| {});
        assert_eq!(join_workers(vec![quick], Duration::from_secs(5)), 0);

        let (release, wait) = flume::bounded::<()>(0);
        let stuck = thread::spawn(move || {
            let _ = wait.recv();
        });
        assert_eq!(join_workers(vec![stuck], Duration::from_millis(20)), 1);
        drop(release);
    }

    #[test]
    fn merge_rejects_nothing_for_empty_input() {
        let document = merge_results(Vec::new()).unwrap();
        assert_eq!(document.page_count(), 0);
    }
}
