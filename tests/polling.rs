use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use crcon_terminal::api::{AdminApi, ApiError};
use crcon_terminal::entity::CollectionKind;
use crcon_terminal::fetcher::{Filter, fetch, spawn_poller};
use crcon_terminal::state::{AppState, Delta, apply_delta};

/// Serves scripted GET results in order, repeating the last one.
struct ScriptedApi {
    responses: Mutex<VecDeque<Result<Value, ApiError>>>,
    queries: Mutex<Vec<Vec<(String, String)>>>,
}

impl ScriptedApi {
    fn new(responses: Vec<Result<Value, ApiError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            queries: Mutex::new(Vec::new()),
        }
    }

    fn queries(&self) -> Vec<Vec<(String, String)>> {
        self.queries.lock().unwrap().clone()
    }
}

impl AdminApi for ScriptedApi {
    fn get(&self, _endpoint: &str, query: &[(String, String)]) -> Result<Value, ApiError> {
        self.queries.lock().unwrap().push(query.to_vec());
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            responses.pop_front().unwrap()
        } else {
            responses.front().cloned().unwrap()
        }
    }

    fn post(&self, endpoint: &str, _body: &Value) -> Result<Value, ApiError> {
        Err(ApiError::Http {
            status: 405,
            body: format!("{endpoint} not allowed"),
        })
    }
}

fn players(ids: &[&str]) -> Value {
    Value::Array(
        ids.iter()
            .map(|id| json!({"player_id": id, "name": format!("p{id}")}))
            .collect(),
    )
}

const WAIT: Duration = Duration::from_secs(2);

#[test]
fn filter_omits_blank_and_false_constraints() {
    let filter = Filter::new()
        .text("player_name", "  ")
        .text("country", "FR")
        .flag("is_blacklisted", false)
        .flag("ignore_accent", true)
        .paged(2, 25);

    let pairs = filter.query_pairs();
    assert_eq!(
        pairs,
        vec![
            ("country".to_string(), "FR".to_string()),
            ("ignore_accent".to_string(), "true".to_string()),
            ("page".to_string(), "2".to_string()),
            ("page_size".to_string(), "25".to_string()),
        ]
    );
}

#[test]
fn fetch_sends_the_filter_and_normalizes() {
    let api = ScriptedApi::new(vec![Ok(players(&["1", "2"]))]);
    let filter = Filter::new().text("player_name", "bob");

    let page = fetch(&api, CollectionKind::Live, &filter).expect("fetch ok");
    assert_eq!(page.collection.len(), 2);
    assert_eq!(
        api.queries(),
        vec![vec![("player_name".to_string(), "bob".to_string())]]
    );
}

#[test]
fn poller_fetches_immediately_and_on_refresh() {
    let api = Arc::new(ScriptedApi::new(vec![
        Ok(players(&["1"])),
        Ok(players(&["1", "2"])),
    ]));
    let (tx, rx) = mpsc::channel();
    let handle = spawn_poller(
        api.clone(),
        CollectionKind::Live,
        Filter::new(),
        Duration::from_secs(60),
        tx,
    );

    match rx.recv_timeout(WAIT).expect("first tick") {
        Delta::SetCollection { kind, filter, page } => {
            assert_eq!(kind, CollectionKind::Live);
            assert_eq!(filter, Filter::new());
            assert_eq!(page.collection.len(), 1);
        }
        other => panic!("unexpected delta {other:?}"),
    }

    handle.refresh_now();
    match rx.recv_timeout(WAIT).expect("refresh tick") {
        Delta::SetCollection { page, .. } => assert_eq!(page.collection.len(), 2),
        other => panic!("unexpected delta {other:?}"),
    }

    handle.shutdown();
}

#[test]
fn poller_applies_a_new_filter_right_away() {
    let api = Arc::new(ScriptedApi::new(vec![Ok(players(&["1"]))]));
    let (tx, rx) = mpsc::channel();
    let handle = spawn_poller(
        api.clone(),
        CollectionKind::History,
        Filter::new().paged(1, 50),
        Duration::from_secs(60),
        tx,
    );
    rx.recv_timeout(WAIT).expect("first tick");

    handle.set_filter(Filter::new().paged(3, 50));
    match rx.recv_timeout(WAIT).expect("filtered tick") {
        Delta::SetCollection { filter, .. } => assert_eq!(filter.page, Some(3)),
        other => panic!("unexpected delta {other:?}"),
    }
    handle.shutdown();

    let queries = api.queries();
    assert_eq!(queries.len(), 2);
    assert!(queries[1].contains(&("page".to_string(), "3".to_string())));
}

#[test]
fn cancelled_poller_stops_emitting() {
    let api = Arc::new(ScriptedApi::new(vec![Ok(players(&["1"]))]));
    let (tx, rx) = mpsc::channel();
    let mut handle = spawn_poller(
        api.clone(),
        CollectionKind::Live,
        Filter::new(),
        Duration::from_millis(10),
        tx,
    );
    rx.recv_timeout(WAIT).expect("first tick");

    let refresher = handle.refresher().expect("live poller has a refresher");
    handle.cancel();
    assert!(handle.is_cancelled());
    handle.shutdown();

    while rx.try_recv().is_ok() {}
    // A late poke must not revive the worker, and says nothing was delivered.
    assert!(!refresher.refresh());
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn failed_fetch_keeps_the_previous_snapshot() {
    let api = Arc::new(ScriptedApi::new(vec![
        Ok(players(&["1", "2"])),
        Err(ApiError::Transport("connection refused".to_string())),
    ]));
    let (tx, rx) = mpsc::channel();
    let handle = spawn_poller(
        api.clone(),
        CollectionKind::Live,
        Filter::new(),
        Duration::from_secs(60),
        tx,
    );
    let mut state = AppState::new();

    apply_delta(&mut state, rx.recv_timeout(WAIT).expect("first tick"));
    handle.refresh_now();
    let failure = rx.recv_timeout(WAIT).expect("failed tick");
    assert!(matches!(failure, Delta::CollectionFailed { .. }));
    apply_delta(&mut state, failure);
    handle.shutdown();

    let view = state.view(CollectionKind::Live);
    assert_eq!(view.collection.len(), 2);
    assert!(
        view.last_error
            .as_deref()
            .is_some_and(|e| e.contains("connection refused"))
    );
    assert!(!view.loading);
}

#[test]
fn refresher_returns_once_the_snapshot_is_delivered() {
    let api = Arc::new(ScriptedApi::new(vec![
        Ok(players(&["1"])),
        Ok(players(&["1", "2"])),
    ]));
    let (tx, rx) = mpsc::channel();
    let handle = spawn_poller(
        api.clone(),
        CollectionKind::Live,
        Filter::new(),
        Duration::from_secs(60),
        tx,
    );
    rx.recv_timeout(WAIT).expect("first tick");

    let refresher = handle.refresher().expect("live poller has a refresher");
    assert!(refresher.refresh());
    // Already queued by the time refresh() returned.
    match rx.try_recv().expect("refreshed snapshot") {
        Delta::SetCollection { page, .. } => assert_eq!(page.collection.len(), 2),
        other => panic!("unexpected delta {other:?}"),
    }
    handle.shutdown();
}

#[test]
fn cancel_wakes_a_poller_held_open_by_a_refresher() {
    let api = Arc::new(ScriptedApi::new(vec![Ok(players(&["1"]))]));
    let (tx, rx) = mpsc::channel();
    let mut handle = spawn_poller(
        api.clone(),
        CollectionKind::Live,
        Filter::new(),
        Duration::from_secs(3600),
        tx,
    );
    rx.recv_timeout(WAIT).expect("first tick");
    let _refresher = handle.refresher().expect("live poller has a refresher");

    handle.cancel();
    // The worker must exit without waiting out the hour-long interval.
    let (done_tx, done_rx) = mpsc::channel();
    std::thread::spawn(move || {
        handle.shutdown();
        let _ = done_tx.send(());
    });
    done_rx.recv_timeout(WAIT).expect("poller exited after cancel");
}
