//! The dispatcher routing logical requests to transports
//!
//! The [`Dispatcher`] accepts [`RequestDescription`]s, creates one
//! [`Transport`] per description, tracks every in-flight exchange in a
//! registry keyed by the caller-chosen identifier, forwards cancellations,
//! and republishes each settled exchange as exactly one
//! [`DispatcherEvent::Response`] on its event channel — for every terminal
//! state, including abort. The settlement continuation is the only code path
//! that removes a registry entry.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::config::DispatcherConfig;
use crate::error::{Error, Result};
use crate::request::RequestDescription;
use crate::transport::{
    AbortHandle, ExchangeReport, Progress, ResponseBody, Transport,
};

/// Notifications published by the dispatcher.
#[derive(Debug)]
pub enum DispatcherEvent {
    /// A submitted request settled. Exactly one per accepted identifier.
    Response(RequestOutcome),
    /// The process-wide loading indicator flipped.
    LoadingChanged(bool),
    /// A new request became the most recent one.
    LastRequestChanged(String),
    /// Body progress for an in-flight request.
    Progress {
        /// Identifier of the request reporting progress.
        id: String,
        /// Current progress snapshot.
        progress: Progress,
    },
}

/// Response portion of a settled outcome.
#[derive(Debug)]
pub struct ResponseRecord {
    /// Final status code; 0 when no response was reached.
    pub status: u16,
    /// Final status text; can be empty.
    pub status_text: String,
    /// Parsed response body.
    pub body: ResponseBody,
    /// Collected raw response header text.
    pub headers: Option<String>,
}

/// Normalized outcome of one settled request.
#[derive(Debug)]
pub struct RequestOutcome {
    /// The identifier the caller submitted.
    pub id: String,
    /// The original request description.
    pub request: Arc<RequestDescription>,
    /// Final response state.
    pub response: ResponseRecord,
    /// Wall-clock time from submission to settlement.
    pub elapsed: Duration,
    /// True when the request failed for any reason, including abort.
    pub is_error: bool,
    /// The failure, when `is_error` is set.
    pub error: Option<Error>,
}

#[derive(Debug)]
struct ActiveExchange {
    request: Arc<RequestDescription>,
    abort: AbortHandle,
    started_at: Instant,
}

#[derive(Debug)]
struct Inner {
    client: reqwest::Client,
    config: DispatcherConfig,
    active: Mutex<HashMap<String, ActiveExchange>>,
    loading: AtomicBool,
    last_request: Mutex<Option<String>>,
    events: mpsc::UnboundedSender<DispatcherEvent>,
}

/// Routes logical requests to transports and republishes normalized outcomes.
///
/// Cloning the dispatcher is cheap and shares the registry and event channel.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Create a dispatcher and the receiving end of its event channel.
    ///
    /// Builds the shared HTTP client from the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(
        config: DispatcherConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<DispatcherEvent>)> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.default_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder
            .build()
            .map_err(|e| Error::HttpClient(e.to_string()))?;

        let (events, receiver) = mpsc::unbounded_channel();
        let dispatcher = Self {
            inner: Arc::new(Inner {
                client,
                config,
                active: Mutex::new(HashMap::new()),
                loading: AtomicBool::new(false),
                last_request: Mutex::new(None),
                events,
            }),
        };
        Ok((dispatcher, receiver))
    }

    /// Submit a request for transport.
    ///
    /// Creates and configures a transport with the standing configuration,
    /// records the identifier in the registry, starts the exchange, and
    /// returns immediately. The outcome arrives later as a
    /// [`DispatcherEvent::Response`]. Requires a running Tokio runtime.
    ///
    /// # Errors
    ///
    /// Rejects a duplicate in-flight identifier with
    /// [`Error::DuplicateRequestId`], and invalid URLs or methods with the
    /// respective validation error. Nothing is put in flight and no outcome
    /// event is published for a rejected submission.
    pub fn submit(&self, description: RequestDescription) -> Result<()> {
        let request = Arc::new(description);
        let id = request.id.clone();

        let mut transport = Transport::new(self.inner.client.clone(), &self.inner.config);
        transport.configure(&request)?;

        let progress_events = self.inner.events.clone();
        let progress_id = id.clone();
        transport.on_progress(move |progress| {
            let _ = progress_events.send(DispatcherEvent::Progress {
                id: progress_id.clone(),
                progress,
            });
        });

        let abort = transport.abort_handle();
        let started_at = Instant::now();
        {
            let mut active = self.inner.active.lock().expect("registry poisoned");
            match active.entry(id.clone()) {
                Entry::Occupied(_) => {
                    return Err(Error::DuplicateRequestId(id));
                }
                Entry::Vacant(slot) => {
                    slot.insert(ActiveExchange {
                        request: Arc::clone(&request),
                        abort,
                        started_at,
                    });
                }
            }
        }

        let Some(completion) = transport.send() else {
            // Unreachable for a freshly configured transport; keep the
            // registry invariant if it ever happens.
            self.inner.active.lock().expect("registry poisoned").remove(&id);
            return Err(Error::HttpClient(
                "transport refused to start the exchange".to_string(),
            ));
        };
        tracing::debug!(%id, method = %request.method, url = %request.url, "request submitted");

        *self.inner.last_request.lock().expect("last request poisoned") = Some(id.clone());
        let _ = self
            .inner
            .events
            .send(DispatcherEvent::LastRequestChanged(id.clone()));
        if !self.inner.loading.swap(true, Ordering::SeqCst) {
            let _ = self.inner.events.send(DispatcherEvent::LoadingChanged(true));
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let report = completion.settled().await;
            inner.settle(&id, report);
        });

        Ok(())
    }

    /// Request cancellation of an in-flight request.
    ///
    /// A no-op when the identifier is not in flight. The registry entry is
    /// not removed here; removal happens through the settlement continuation,
    /// which also publishes the aborted outcome.
    pub fn cancel(&self, id: &str) {
        let active = self.inner.active.lock().expect("registry poisoned");
        if let Some(entry) = active.get(id) {
            tracing::debug!(%id, "aborting request");
            entry.abort.abort();
        }
    }

    /// True while the most recently started request is still loading.
    pub fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::SeqCst)
    }

    /// Number of requests currently in flight.
    pub fn active_count(&self) -> usize {
        self.inner.active.lock().expect("registry poisoned").len()
    }

    /// Identifier of the most recently submitted request.
    pub fn last_request(&self) -> Option<String> {
        self.inner
            .last_request
            .lock()
            .expect("last request poisoned")
            .clone()
    }
}

impl Inner {
    /// Settlement continuation: the single removal path for registry
    /// entries, regardless of terminal state.
    fn settle(&self, id: &str, report: ExchangeReport) {
        let Some(entry) = self.active.lock().expect("registry poisoned").remove(id)
        else {
            tracing::warn!(%id, "settled request missing from registry");
            return;
        };
        let elapsed = entry.started_at.elapsed();

        let ExchangeReport {
            state,
            status,
            status_text,
            body,
            headers,
            progress: _,
            error,
        } = report;
        let error = error.map(Error::normalized);
        let is_error = error.is_some();

        if self.loading.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(DispatcherEvent::LoadingChanged(false));
        }

        tracing::debug!(%id, status, ?state, is_error, ?elapsed, "request settled");
        let outcome = RequestOutcome {
            id: id.to_string(),
            request: entry.request,
            response: ResponseRecord {
                status,
                status_text,
                body,
                headers,
            },
            elapsed,
            is_error,
            error,
        };
        let _ = self.events.send(DispatcherEvent::Response(outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_unknown_id_is_noop() {
        let (dispatcher, _events) = Dispatcher::new(DispatcherConfig::default()).unwrap();
        dispatcher.cancel("missing");
        assert_eq!(dispatcher.active_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_url() {
        let (dispatcher, mut events) =
            Dispatcher::new(DispatcherConfig::default()).unwrap();

        let result = dispatcher.submit(RequestDescription::new("r1", "::nope::"));
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
        assert_eq!(dispatcher.active_count(), 0);
        // Nothing was put in flight, so no events either.
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fresh_dispatcher_state() {
        let (dispatcher, _events) = Dispatcher::new(DispatcherConfig::default()).unwrap();
        assert!(!dispatcher.is_loading());
        assert_eq!(dispatcher.active_count(), 0);
        assert!(dispatcher.last_request().is_none());
    }
}
