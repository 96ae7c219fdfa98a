use serde_json::json;

use crcon_terminal::dispatch::{ActionPayload, ActionType};
use crcon_terminal::entity::{CollectionKind, normalize};
use crcon_terminal::fetcher::Filter;
use crcon_terminal::state::{AppState, Delta, InputMode, ProviderCommand, Row, apply_delta};

fn seeded_state() -> AppState {
    let mut state = AppState::with_operator("mod_a", 2);
    let page = normalize(
        CollectionKind::Live,
        &json!([
            {"player_id": "1", "name": "Ann", "team": "allies"},
            {"player_id": "2", "name": "Bob", "team": "axis"},
            {"player_id": "3", "name": "Cid", "team": "allies"},
            {"player_id": "4", "name": "Dee"},
        ]),
    );
    apply_delta(
        &mut state,
        Delta::SetCollection {
            kind: CollectionKind::Live,
            filter: Filter::new(),
            page,
        },
    );
    state
}

#[test]
fn grouped_rows_put_headers_before_members() {
    let mut state = seeded_state();
    state.cycle_group();
    assert_eq!(state.current().options.group_by.as_deref(), Some("team"));

    let rows = state.current().rows();
    assert_eq!(
        rows[0],
        Row::Group {
            key: "allies".to_string(),
            keys: vec!["1".to_string(), "3".to_string()],
        }
    );
    assert_eq!(rows[1], Row::Entity { key: "1".to_string() });
    assert!(matches!(&rows[rows.len() - 2], Row::Group { key, .. } if key == "unassigned"));
    assert_eq!(rows.len(), 7);
}

#[test]
fn space_on_a_header_toggles_the_whole_group() {
    let mut state = seeded_state();
    state.cycle_group();
    state.current_mut().selection.toggle("2");

    state.toggle_cursor();
    let selection = &state.current().selection;
    assert!(selection.contains("1") && selection.contains("3"));
    assert!(selection.contains("2"));

    state.toggle_cursor();
    assert_eq!(state.current().selection.sorted_keys(), vec!["2".to_string()]);
}

#[test]
fn toggle_all_visible_respects_the_filter() {
    let mut state = seeded_state();
    state.set_filter_text("b");
    state.toggle_all_visible();
    assert_eq!(state.current().selection.sorted_keys(), vec!["2".to_string()]);
}

#[test]
fn action_targets_fall_back_to_the_cursor_row() {
    let mut state = seeded_state();
    state.select_next();
    assert_eq!(state.action_targets(), vec!["2".to_string()]);

    state.current_mut().selection.toggle("4");
    state.current_mut().selection.toggle("1");
    assert_eq!(state.action_targets(), vec!["1".to_string(), "4".to_string()]);
}

#[test]
fn reasoned_action_opens_the_prompt_until_a_reason_is_typed() {
    let mut state = seeded_state();
    state.current_mut().selection.toggle("1");

    assert!(
        state
            .begin_action(ActionType::Kick, ActionPayload::default())
            .is_none()
    );
    assert!(matches!(state.mode, InputMode::Reason { .. }));
    assert!(state.pending.is_empty());

    // Blank reason keeps the prompt open.
    assert!(state.confirm_reason().is_none());
    assert!(matches!(state.mode, InputMode::Reason { .. }));

    if let InputMode::Reason { buffer, .. } = &mut state.mode {
        buffer.push_str("team killing");
    }
    let cmd = state.confirm_reason().expect("reason supplied");
    match cmd {
        ProviderCommand::Dispatch { kind, plan } => {
            assert_eq!(kind, CollectionKind::Live);
            assert_eq!(plan.calls.len(), 1);
            assert_eq!(plan.calls[0].body["reason"], "team killing");
            assert_eq!(plan.calls[0].body["by"], "mod_a");
        }
        other => panic!("unexpected command {other:?}"),
    }
    assert_eq!(state.mode, InputMode::Normal);
    assert_eq!(state.pending.len(), 1);
    assert_eq!(state.templates, vec!["team killing".to_string()]);
    assert!(state.settings_dirty);
}

#[test]
fn templates_cycle_in_the_reason_prompt() {
    let mut state = seeded_state();
    state.remember_template("spam");
    state.remember_template("afk");
    state.remember_template("spam");
    assert_eq!(state.templates, vec!["spam".to_string(), "afk".to_string()]);

    state.begin_action(ActionType::Message, ActionPayload::default());
    state.cycle_template();
    state.cycle_template();
    match &state.mode {
        InputMode::Reason {
            buffer, template, ..
        } => {
            assert_eq!(buffer, "afk");
            assert_eq!(*template, Some(1));
        }
        other => panic!("unexpected mode {other:?}"),
    }
}

#[test]
fn exempt_action_dispatches_without_a_prompt() {
    let mut state = seeded_state();
    let cmd = state.begin_action(ActionType::SwitchNow, ActionPayload::default());
    assert!(matches!(cmd, Some(ProviderCommand::Dispatch { .. })));
    assert_eq!(state.mode, InputMode::Normal);
}

#[test]
fn paging_stops_at_both_ends() {
    let mut state = AppState::with_operator("mod_a", 2);
    state.switch_tab(CollectionKind::History);
    assert!(state.change_page(false).is_none());

    let page = normalize(
        CollectionKind::History,
        &json!({"players": [{"player_id": "1"}, {"player_id": "2"}], "total": 3}),
    );
    let filter = state.current().filter.clone();
    apply_delta(
        &mut state,
        Delta::SetCollection {
            kind: CollectionKind::History,
            filter,
            page,
        },
    );

    let next = state.change_page(true).expect("second page exists");
    assert_eq!(next.page, Some(2));
    assert_eq!(next.page_size, Some(2));
    assert!(state.change_page(true).is_none());
    assert_eq!(state.change_page(false).and_then(|f| f.page), Some(1));
}

#[test]
fn live_tab_is_not_paginated() {
    let mut state = seeded_state();
    assert!(state.change_page(true).is_none());
    assert_eq!(state.current().filter.page, None);
}

#[test]
fn typed_reason_keeps_the_rest_of_the_payload() {
    let mut state = seeded_state();
    state.current_mut().selection.toggle("2");
    let payload = ActionPayload {
        duration_hours: Some(6),
        comment: Some("repeat offender".to_string()),
        ..ActionPayload::default()
    };

    assert!(state.begin_action(ActionType::TempBan, payload).is_none());
    if let InputMode::Reason { buffer, .. } = &mut state.mode {
        buffer.push_str("griefing");
    }
    match state.confirm_reason() {
        Some(ProviderCommand::Dispatch { plan, .. }) => {
            assert_eq!(plan.calls[0].body["duration_hours"], 6);
            assert_eq!(plan.calls[0].body["reason"], "griefing");
            assert_eq!(plan.pending.payload.comment.as_deref(), Some("repeat offender"));
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn unsent_dispatch_does_not_stay_pending() {
    let mut state = seeded_state();
    let cmd = state
        .begin_action(ActionType::SwitchNow, ActionPayload::default())
        .expect("exempt action dispatches");
    assert_eq!(state.pending.len(), 1);

    state.command_not_sent(&cmd);
    assert!(state.pending.is_empty());
    assert!(
        state
            .notifications
            .iter()
            .any(|n| n.text.contains("Provider is not running"))
    );
}
