//! Render worker - runs in separate thread(s)

use std::ops::ControlFlow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use flume::{Receiver, Sender};
use log::{debug, warn};

use super::paginator::{RenderConfig, render_pages};
use super::request::{RenderError, RenderRequest, WorkerEvent};
use super::service::CancelToken;
use super::types::{PageRange, RaffleDetails, WorkerResult};

/// Pull unit requests off the shared queue until `Shutdown` or disconnect.
pub fn render_worker(
    requests: Receiver<RenderRequest>,
    events: Sender<WorkerEvent>,
    config: Arc<RenderConfig>,
    cancel: CancelToken,
) {
    for request in requests {
        match request {
            RenderRequest::Range {
                unit,
                details,
                range,
            } => {
                let range = range.unwrap_or_else(|| details.full_range());
                let event = handle_range_request(unit, details, range, &config, &cancel, &events);
                let _ = events.send(event);
            }

            RenderRequest::Shutdown => break,
        }
    }
}

fn handle_range_request(
    unit: usize,
    details: Arc<RaffleDetails>,
    range: PageRange,
    config: &RenderConfig,
    cancel: &CancelToken,
    events: &Sender<WorkerEvent>,
) -> WorkerEvent {
    if cancel.is_cancelled() {
        return WorkerEvent::Cancelled { unit };
    }

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        render_pages(details, range, config, |progress| {
            let _ = events.send(WorkerEvent::PageRendered {
                unit,
                pages_done: progress.pages_done,
                pages_total: progress.pages_total,
            });
            if cancel.is_cancelled() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
    }));

    match outcome {
        Ok(Ok(pages)) => WorkerEvent::Complete(WorkerResult { index: unit, pages }),
        Ok(Err(RenderError::Cancelled)) => {
            debug!("Unit {unit} stopped on cancellation");
            WorkerEvent::Cancelled { unit }
        }
        Ok(Err(error)) => {
            warn!("Unit {unit} failed on {range}: {error}");
            WorkerEvent::Failed { unit, error }
        }
        Err(panic) => {
            let detail = panic_detail(panic.as_ref());
            warn!("Unit {unit} panicked on {range}: {detail}");
            WorkerEvent::Failed {
                unit,
                error: RenderError::unit_failure(unit, detail),
            }
        }
    }
}

fn panic_detail(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_helpers::{low_dpi_config, sample_details};

    fn run_requests(requests: Vec<RenderRequest>, cancel: CancelToken) -> Vec<WorkerEvent> {
        run_with_config(requests, cancel, low_dpi_config())
    }

    fn run_with_config(
        requests: Vec<RenderRequest>,
        cancel: CancelToken,
        config: RenderConfig,
    ) -> Vec<WorkerEvent> {
        let (request_tx, request_rx) = flume::unbounded();
        let (event_tx, event_rx) = flume::unbounded();
        for request in requests {
            request_tx.send(request).unwrap();
        }
        request_tx.send(RenderRequest::Shutdown).unwrap();

        render_worker(request_rx, event_tx, Arc::new(config), cancel);
        event_rx.drain().collect()
    }

    #[test]
    fn renders_unit_and_reports_each_page() {
        let events = run_requests(
            vec![RenderRequest::Range {
                unit: 2,
                details: Arc::new(sample_details(3)),
                range: Some(PageRange::new(1, 3)),
            }],
            CancelToken::new(),
        );

        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[0],
            WorkerEvent::PageRendered {
                unit: 2,
                pages_done: 1,
                pages_total: 2
            }
        ));
        match &events[2] {
            WorkerEvent::Complete(result) => {
                assert_eq!(result.index, 2);
                assert_eq!(result.pages.len(), 2);
                assert_eq!(result.pages[0].tickets[0].get(), 6);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn missing_range_renders_whole_document() {
        let events = run_requests(
            vec![RenderRequest::Range {
                unit: 0,
                details: Arc::new(sample_details(2)),
                range: None,
            }],
            CancelToken::new(),
        );

        match events.last() {
            Some(WorkerEvent::Complete(result)) => assert_eq!(result.pages.len(), 2),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn bad_logo_becomes_failed_event() {
        let mut details = sample_details(1);
        details.logo = vec![0, 1, 2, 3];
        let events = run_requests(
            vec![RenderRequest::Range {
                unit: 1,
                details: Arc::new(details),
                range: None,
            }],
            CancelToken::new(),
        );

        assert!(matches!(
            events.as_slice(),
            [WorkerEvent::Failed {
                unit: 1,
                error: RenderError::LogoDecode(_)
            }]
        ));
    }

    #[test]
    fn cancelled_token_skips_rendering() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let events = run_requests(
            vec![RenderRequest::Range {
                unit: 0,
                details: Arc::new(sample_details(2)),
                range: None,
            }],
            cancel,
        );

        assert!(matches!(events.as_slice(), [WorkerEvent::Cancelled { unit: 0 }]));
    }

    #[test]
    fn panicking_unit_fails_and_the_worker_keeps_serving() {
        let config = RenderConfig {
            panic_on_page: Some(0),
            ..low_dpi_config()
        };
        let details = Arc::new(sample_details(2));
        let events = run_with_config(
            vec![
                RenderRequest::Range {
                    unit: 0,
                    details: details.clone(),
                    range: Some(PageRange::new(0, 1)),
                },
                RenderRequest::Range {
                    unit: 1,
                    details,
                    range: Some(PageRange::new(1, 2)),
                },
            ],
            CancelToken::new(),
            config,
        );

        match &events[0] {
            WorkerEvent::Failed {
                unit: 0,
                error: RenderError::RenderUnitFailure { unit: 0, detail },
            } => assert!(detail.contains("forced panic on page 0"), "{detail}"),
            other => panic!("expected unit 0 failure, got {other:?}"),
        }
        match events.last() {
            Some(WorkerEvent::Complete(result)) => {
                assert_eq!(result.index, 1);
                assert_eq!(result.pages[0].tickets[0].get(), 6);
            }
            other => panic!("expected unit 1 completion, got {other:?}"),
        }
    }

    #[test]
    fn cancellation_between_pages_stops_the_unit() {
        let (request_tx, request_rx) = flume::unbounded();
        // rendezvous: the worker cannot run ahead of the cancelling reader
        let (event_tx, event_rx) = flume::bounded(0);
        let cancel = CancelToken::new();
        request_tx
            .send(RenderRequest::Range {
                unit: 0,
                details: Arc::new(sample_details(4)),
                range: None,
            })
            .unwrap();
        request_tx.send(RenderRequest::Shutdown).unwrap();

        let worker_cancel = cancel.clone();
        let worker = std::thread::spawn(move || {
            render_worker(request_rx, event_tx, Arc::new(low_dpi_config()), worker_cancel)
        });

        let mut events = Vec::new();
        for event in event_rx.iter() {
            if matches!(event, WorkerEvent::PageRendered { pages_done: 1, .. }) {
                cancel.cancel();
            }
            events.push(event);
        }
        worker.join().unwrap();

        assert!(matches!(events.last(), Some(WorkerEvent::Cancelled { unit: 0 })));
        let rendered = events
            .iter()
            .filter(|e| matches!(e, WorkerEvent::PageRendered { .. }))
            .count();
        assert!(rendered <= 2, "unit kept rendering after cancellation: {rendered}");
    }

    #[test]
    fn shutdown_stops_before_later_requests() {
        let (request_tx, request_rx) = flume::unbounded();
        let (event_tx, event_rx) = flume::unbounded();
        request_tx.send(RenderRequest::Shutdown).unwrap();
        request_tx
            .send(RenderRequest::Range {
                unit: 0,
                details: Arc::new(sample_details(1)),
                range: None,
            })
            .unwrap();

        render_worker(
            request_rx,
            event_tx,
            Arc::new(low_dpi_config()),
            CancelToken::new(),
        );
        assert!(event_rx.is_empty());
    }

    #[test]
    fn panic_payloads_are_described() {
        assert_eq!(panic_detail(&"boom"), "boom");
        assert_eq!(panic_detail(&String::from("bang")), "bang");
        assert_eq!(panic_detail(&42_u8), "worker panicked");
    }
}
