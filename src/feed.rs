use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::api::AdminApi;
use crate::config::Config;
use crate::dispatch::{DispatchPlan, Dispatcher};
use crate::entity::CollectionKind;
use crate::fetcher::{Filter, PollHandle, Refresher, fetch, spawn_poller};
use crate::state::{Delta, ProviderCommand};

/// Owns the pollers and the dispatcher on behalf of the UI thread. Only the
/// watched view is polled; switching views cancels the previous poller.
pub fn spawn_provider(
    api: Arc<dyn AdminApi>,
    config: Config,
    tx: Sender<Delta>,
    cmd_rx: Receiver<ProviderCommand>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let dispatcher = Arc::new(Dispatcher::new(
            api.clone(),
            config.action_inflight_max,
            &config.operator,
        ));
        let mut poller: Option<PollHandle> = None;
        let mut filters: HashMap<CollectionKind, Filter> = HashMap::new();

        while let Ok(cmd) = cmd_rx.recv() {
            match cmd {
                ProviderCommand::Watch { kind, filter } => {
                    if let Some(old) = poller.take() {
                        let _ = tx.send(Delta::Log(format!(
                            "[INFO] Stopped polling {}",
                            old.kind().label()
                        )));
                    }
                    filters.insert(kind, filter.clone());
                    let interval = config.poll_interval(kind);
                    poller = Some(spawn_poller(
                        api.clone(),
                        kind,
                        filter,
                        interval,
                        tx.clone(),
                    ));
                    let _ = tx.send(Delta::Log(format!(
                        "[INFO] Polling {} every {}s",
                        kind.label(),
                        interval.as_secs()
                    )));
                }
                ProviderCommand::Refresh { kind } => {
                    refresh_kind(&api, poller.as_ref(), &filters, kind, &tx);
                }
                ProviderCommand::SetFilter { kind, filter } => {
                    filters.insert(kind, filter.clone());
                    match poller.as_ref().filter(|p| p.kind() == kind) {
                        Some(p) => p.set_filter(filter),
                        None => one_shot_fetch(api.clone(), kind, filter, tx.clone()),
                    }
                }
                ProviderCommand::Dispatch { kind, plan } => {
                    let refresher = poller
                        .as_ref()
                        .filter(|p| p.kind() == kind)
                        .and_then(PollHandle::refresher);
                    let filter = filters.get(&kind).cloned().unwrap_or_default();
                    spawn_dispatch(
                        dispatcher.clone(),
                        api.clone(),
                        kind,
                        plan,
                        refresher,
                        filter,
                        tx.clone(),
                    );
                }
                ProviderCommand::Shutdown => break,
            }
        }

        if let Some(poller) = poller.take() {
            poller.shutdown();
        }
    })
}

fn refresh_kind(
    api: &Arc<dyn AdminApi>,
    poller: Option<&PollHandle>,
    filters: &HashMap<CollectionKind, Filter>,
    kind: CollectionKind,
    tx: &Sender<Delta>,
) {
    match poller.filter(|p| p.kind() == kind) {
        Some(p) => p.refresh_now(),
        None => {
            let filter = filters.get(&kind).cloned().unwrap_or_default();
            one_shot_fetch(api.clone(), kind, filter, tx.clone());
        }
    }
}

fn spawn_dispatch(
    dispatcher: Arc<Dispatcher>,
    api: Arc<dyn AdminApi>,
    kind: CollectionKind,
    plan: DispatchPlan,
    refresher: Option<Refresher>,
    filter: Filter,
    tx: Sender<Delta>,
) {
    thread::spawn(move || {
        let refresh_tx = tx.clone();
        // Falls back to a one-shot read when the poller was cancelled before
        // it delivered, e.g. after a tab switch mid-dispatch.
        let mut refresh = move || {
            let poked = refresher.as_ref().is_some_and(Refresher::refresh);
            if !poked {
                one_shot_fetch(api.clone(), kind, filter.clone(), refresh_tx.clone());
            }
        };
        let report = dispatcher.execute(plan, &mut refresh);
        let _ = tx.send(Delta::ActionSettled { kind, report });
    });
}

fn one_shot_fetch(api: Arc<dyn AdminApi>, kind: CollectionKind, filter: Filter, tx: Sender<Delta>) {
    thread::spawn(move || {
        let delta = match fetch(api.as_ref(), kind, &filter) {
            Ok(page) => Delta::SetCollection { kind, filter, page },
            Err(error) => Delta::CollectionFailed { kind, filter, error },
        };
        let _ = tx.send(delta);
    });
}
