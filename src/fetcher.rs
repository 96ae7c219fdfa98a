use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::api::{AdminApi, ApiError};
use crate::entity::{CollectionKind, NormalizedPage, normalize};
use crate::state::Delta;

/// Query for a collection read. Every field is optional; blank text, `false`
/// flags and unset paging never reach the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    fields: Vec<(String, String)>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, field: &str, value: &str) -> Self {
        self.set_text(field, value);
        self
    }

    pub fn flag(mut self, field: &str, on: bool) -> Self {
        self.set_flag(field, on);
        self
    }

    pub fn paged(mut self, page: u32, page_size: u32) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }

    pub fn set_text(&mut self, field: &str, value: &str) {
        self.fields.retain(|(k, _)| k != field);
        self.fields.push((field.to_string(), value.to_string()));
    }

    pub fn set_flag(&mut self, field: &str, on: bool) {
        let value = if on { "true" } else { "" };
        self.set_text(field, value);
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == field)
            .map(|(_, v)| v.as_str())
    }

    /// Outgoing query pairs with empty constraints omitted.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .fields
            .iter()
            .filter_map(|(k, v)| {
                let v = v.trim();
                (!v.is_empty()).then(|| (k.clone(), v.to_string()))
            })
            .collect();
        if let Some(page) = self.page.filter(|p| *p > 0) {
            pairs.push(("page".to_string(), page.to_string()));
        }
        if let Some(size) = self.page_size.filter(|s| *s > 0) {
            pairs.push(("page_size".to_string(), size.to_string()));
        }
        pairs
    }
}

/// One read. Always returns a fresh snapshot; never touches a previous one.
pub fn fetch(
    api: &dyn AdminApi,
    kind: CollectionKind,
    filter: &Filter,
) -> Result<NormalizedPage, ApiError> {
    let raw = api.get(kind.endpoint(), &filter.query_pairs())?;
    Ok(normalize(kind, &raw))
}

#[derive(Debug, Clone)]
pub enum PollControl {
    /// Fetch now. The sender, if any, is signalled once the snapshot is delivered.
    Refresh(Option<Sender<()>>),
    SetFilter(Filter),
    Stop,
}

/// Owner side of a polling worker. Dropping it stops the worker.
pub struct PollHandle {
    kind: CollectionKind,
    ctrl: Option<Sender<PollControl>>,
    stopped: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

/// Cloneable trigger for a poller's next fetch, for work that finishes elsewhere.
#[derive(Debug, Clone)]
pub struct Refresher {
    ctrl: Sender<PollControl>,
    stopped: Arc<AtomicBool>,
}

impl Refresher {
    /// Blocks until the poller has delivered a fresh snapshot. Returns false
    /// when the poller was cancelled first; nothing was delivered then.
    pub fn refresh(&self) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.ctrl.send(PollControl::Refresh(Some(ack_tx))).is_err() {
            return false;
        }
        ack_rx.recv().is_ok()
    }
}

impl PollHandle {
    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn refresher(&self) -> Option<Refresher> {
        self.ctrl.as_ref().map(|ctrl| Refresher {
            ctrl: ctrl.clone(),
            stopped: self.stopped.clone(),
        })
    }

    /// Skips the rest of the current wait and fetches now.
    pub fn refresh_now(&self) {
        if let Some(ctrl) = &self.ctrl {
            let _ = ctrl.send(PollControl::Refresh(None));
        }
    }

    /// Swaps the filter and fetches with it immediately.
    pub fn set_filter(&self, filter: Filter) {
        if let Some(ctrl) = &self.ctrl {
            let _ = ctrl.send(PollControl::SetFilter(filter));
        }
    }

    /// Stops scheduling further ticks and wakes the worker so it exits. A
    /// request already in flight completes but its result is discarded.
    pub fn cancel(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(ctrl) = self.ctrl.take() {
            let _ = ctrl.send(PollControl::Stop);
        }
    }

    /// Cancels and waits for the worker to exit.
    pub fn shutdown(mut self) {
        self.cancel();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Starts a worker that fetches `kind` right away and then every `interval`,
/// measured from the end of the previous fetch so ticks never overlap.
pub fn spawn_poller(
    api: Arc<dyn AdminApi>,
    kind: CollectionKind,
    filter: Filter,
    interval: Duration,
    tx: Sender<Delta>,
) -> PollHandle {
    let (ctrl_tx, ctrl_rx) = mpsc::channel::<PollControl>();
    let stopped = Arc::new(AtomicBool::new(false));
    let stopped_worker = stopped.clone();

    let join = thread::spawn(move || {
        let mut filter = filter;
        // Acks owed for the next delivered snapshot. Returning drops them,
        // which tells each waiting refresher nothing was delivered.
        let mut waiters: Vec<Sender<()>> = Vec::new();
        loop {
            if stopped_worker.load(Ordering::SeqCst) {
                return;
            }
            let result = fetch(api.as_ref(), kind, &filter);
            if stopped_worker.load(Ordering::SeqCst) {
                return;
            }
            let delta = match result {
                Ok(page) => Delta::SetCollection {
                    kind,
                    filter: filter.clone(),
                    page,
                },
                Err(error) => Delta::CollectionFailed {
                    kind,
                    filter: filter.clone(),
                    error,
                },
            };
            if tx.send(delta).is_err() {
                return;
            }
            for waiter in waiters.drain(..) {
                let _ = waiter.send(());
            }

            let deadline = Instant::now() + interval;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match ctrl_rx.recv_timeout(remaining) {
                    Ok(PollControl::Refresh(ack)) => {
                        waiters.extend(ack);
                        break;
                    }
                    Ok(PollControl::SetFilter(next)) => {
                        filter = next;
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) => break,
                    Ok(PollControl::Stop) | Err(RecvTimeoutError::Disconnected) => return,
                }
            }
            // Coalesce requests that piled up while we were fetching.
            loop {
                match ctrl_rx.try_recv() {
                    Ok(PollControl::Refresh(ack)) => waiters.extend(ack),
                    Ok(PollControl::SetFilter(next)) => filter = next,
                    Err(TryRecvError::Empty) => break,
                    Ok(PollControl::Stop) | Err(TryRecvError::Disconnected) => return,
                }
            }
        }
    });

    PollHandle {
        kind,
        ctrl: Some(ctrl_tx),
        stopped,
        join: Some(join),
    }
}
