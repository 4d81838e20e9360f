//! Linear concatenation of a paged log listing.
//!
//! Unlike the stream merger there is no ordering work here: pages are
//! delivered in the order the source returns them, following its
//! continuation token until the listing is exhausted.

use tracing::{debug, info, warn};

use crate::error::TailError;
use crate::record::Record;
use crate::signal::StopSignal;
use crate::sink::{OutputSink, SinkError};
use crate::source::SourceError;
use crate::timing;

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPage {
    pub events: Vec<Record>,
    /// Token for the following page; `None` on the last page.
    pub next_token: Option<String>,
}

/// A listing that can be read page by page.
pub trait PageSource {
    /// Fetch the page for `token`, or the first page when `token` is `None`.
    ///
    /// # Errors
    ///
    /// Any non-success response from the source.
    fn fetch_page(&mut self, token: Option<&str>) -> Result<EventPage, SourceError>;
}

impl<P: PageSource + ?Sized> PageSource for &mut P {
    fn fetch_page(&mut self, token: Option<&str>) -> Result<EventPage, SourceError> {
        (**self).fetch_page(token)
    }
}

/// Why [`concat_pages`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// The last page had no continuation token.
    Exhausted,
    /// The source handed back the token it was just given.
    RepeatedToken,
    SinkClosed,
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSummary {
    pub outcome: PageOutcome,
    pub pages: u64,
    pub delivered: u64,
}

/// Deliver every event of every page to `sink`, in listing order.
///
/// # Errors
///
/// [`TailError::Page`] if a page request fails, [`TailError::Sink`] if the
/// sink fails for a reason other than its consumer going away.
pub fn concat_pages<P, K>(
    source: &mut P,
    sink: &mut K,
    stop: &StopSignal,
) -> Result<PageSummary, TailError>
where
    P: PageSource + ?Sized,
    K: OutputSink + ?Sized,
{
    let mut token: Option<String> = None;
    let mut pages = 0_u64;
    let mut delivered = 0_u64;

    let outcome = 'pages: loop {
        if stop.is_triggered() {
            break PageOutcome::Interrupted;
        }

        let page = match timing::timed("source.fetch_page", || source.fetch_page(token.as_deref())) {
            Ok(page) => page,
            Err(_) if stop.is_triggered() => break PageOutcome::Interrupted,
            Err(err) => {
                let (request, detail) = err.into_context();
                return Err(TailError::Page { request, detail });
            }
        };
        pages += 1;
        debug!(
            page = pages,
            events = page.events.len(),
            more = page.next_token.is_some(),
            "fetched page"
        );

        for event in page.events {
            if stop.is_triggered() {
                break 'pages PageOutcome::Interrupted;
            }
            match sink.deliver(event) {
                Ok(()) => delivered += 1,
                Err(SinkError::Closed) => break 'pages PageOutcome::SinkClosed,
                Err(SinkError::Io(err)) => return Err(TailError::Sink(err)),
            }
        }

        match page.next_token {
            None => break PageOutcome::Exhausted,
            Some(next) if token.as_deref() == Some(next.as_str()) => {
                warn!(token = %next, "source repeated its continuation token, stopping");
                break PageOutcome::RepeatedToken;
            }
            Some(next) => token = Some(next),
        }
    };

    info!(?outcome, pages, delivered, "listing finished");
    Ok(PageSummary {
        outcome,
        pages,
        delivered,
    })
}
