use std::collections::{HashMap, VecDeque};
use std::time::{Instant, SystemTime};

use crate::api::ApiError;
use crate::dispatch::{
    ActionPayload, ActionRequest, ActionType, ConfirmationRequest, DispatchPlan, DispatchReport,
    PendingAction, plan,
};
use crate::entity::{Collection, CollectionKind, Entity, NormalizedPage};
use crate::fetcher::Filter;
use crate::selection::SelectionSet;
use crate::view::{ProjectOptions, project_grouped};

const MAX_LOGS: usize = 200;
const MAX_NOTIFICATIONS: usize = 6;
pub const NOTIFICATION_TTL_SECS: u64 = 8;
pub const MAX_TEMPLATES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warn,
}

/// A toast. Every toast is mirrored into the console log.
#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NoticeLevel,
    pub text: String,
    pub at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Filter { buffer: String },
    ActionMenu { cursor: usize },
    Reason {
        request: ConfirmationRequest,
        payload: ActionPayload,
        buffer: String,
        template: Option<usize>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    Group { key: String, keys: Vec<String> },
    Entity { key: String },
}

/// Per-tab state: the current snapshot plus everything the user layered on it.
#[derive(Debug, Clone)]
pub struct RosterView {
    pub kind: CollectionKind,
    pub collection: Collection,
    pub selection: SelectionSet,
    pub options: ProjectOptions,
    pub filter: Filter,
    pub cursor: usize,
    pub total: Option<u64>,
    pub loading: bool,
    pub fetched_at: Option<SystemTime>,
    pub last_error: Option<String>,
}

impl RosterView {
    pub fn new(kind: CollectionKind, page_size: u32) -> Self {
        let filter = if kind.paginated() {
            Filter::new().paged(1, page_size)
        } else {
            Filter::new()
        };
        Self {
            kind,
            collection: Collection::default(),
            selection: SelectionSet::new(),
            options: ProjectOptions::default(),
            filter,
            cursor: 0,
            total: None,
            loading: true,
            fetched_at: None,
            last_error: None,
        }
    }

    pub fn rows(&self) -> Vec<Row> {
        let grouped = project_grouped(&self.collection, &self.options);
        let show_headers = self
            .options
            .group_by
            .as_deref()
            .is_some_and(|g| !g.is_empty());
        let mut rows = Vec::new();
        for (key, members) in grouped {
            if show_headers {
                rows.push(Row::Group {
                    key,
                    keys: members.iter().map(|e| e.key.clone()).collect(),
                });
            }
            rows.extend(
                members
                    .into_iter()
                    .map(|e| Row::Entity { key: e.key.clone() }),
            );
        }
        rows
    }

    pub fn visible_keys(&self) -> Vec<String> {
        self.rows()
            .into_iter()
            .filter_map(|row| match row {
                Row::Entity { key } => Some(key),
                Row::Group { .. } => None,
            })
            .collect()
    }

    pub fn cursor_row(&self) -> Option<Row> {
        self.rows().into_iter().nth(self.cursor)
    }

    pub fn cursor_entity(&self) -> Option<&Entity> {
        match self.cursor_row()? {
            Row::Entity { key } => self.collection.get(&key),
            Row::Group { .. } => None,
        }
    }

    /// Selected keys the latest snapshot no longer has.
    pub fn absent_selected(&self) -> Vec<String> {
        self.selection.absent_from(&self.collection)
    }

    fn clamp_cursor(&mut self) {
        let len = self.rows().len();
        self.cursor = self.cursor.min(len.saturating_sub(1));
    }
}

#[derive(Debug, Clone)]
pub enum Delta {
    /// `filter` is the query the page was read with.
    SetCollection {
        kind: CollectionKind,
        filter: Filter,
        page: NormalizedPage,
    },
    CollectionFailed {
        kind: CollectionKind,
        filter: Filter,
        error: ApiError,
    },
    ActionSettled {
        kind: CollectionKind,
        report: DispatchReport,
    },
    Log(String),
}

#[derive(Debug, Clone)]
pub enum ProviderCommand {
    /// Make `kind` the polled view; any other poller is cancelled.
    Watch {
        kind: CollectionKind,
        filter: Filter,
    },
    Refresh {
        kind: CollectionKind,
    },
    SetFilter {
        kind: CollectionKind,
        filter: Filter,
    },
    Dispatch {
        kind: CollectionKind,
        plan: DispatchPlan,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub tab: CollectionKind,
    pub views: HashMap<CollectionKind, RosterView>,
    pub operator: String,
    pub page_size: u32,
    pub mode: InputMode,
    pub pending: Vec<PendingAction>,
    pub templates: Vec<String>,
    pub logs: VecDeque<String>,
    pub notifications: VecDeque<Notification>,
    pub help_overlay: bool,
    pub settings_dirty: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self::with_operator("crcon_terminal", 50)
    }

    pub fn with_operator(operator: &str, page_size: u32) -> Self {
        let views = CollectionKind::ALL
            .iter()
            .map(|kind| (*kind, RosterView::new(*kind, page_size)))
            .collect();
        Self {
            tab: CollectionKind::Live,
            views,
            operator: operator.to_string(),
            page_size,
            mode: InputMode::Normal,
            pending: Vec::new(),
            templates: Vec::new(),
            logs: VecDeque::with_capacity(MAX_LOGS),
            notifications: VecDeque::with_capacity(MAX_NOTIFICATIONS),
            help_overlay: false,
            settings_dirty: false,
        }
    }

    pub fn view(&self, kind: CollectionKind) -> &RosterView {
        &self.views[&kind]
    }

    pub fn view_mut(&mut self, kind: CollectionKind) -> &mut RosterView {
        let page_size = self.page_size;
        self.views
            .entry(kind)
            .or_insert_with(|| RosterView::new(kind, page_size))
    }

    pub fn current(&self) -> &RosterView {
        self.view(self.tab)
    }

    pub fn current_mut(&mut self) -> &mut RosterView {
        let tab = self.tab;
        self.view_mut(tab)
    }

    pub fn push_log(&mut self, line: impl Into<String>) {
        if self.logs.len() >= MAX_LOGS {
            self.logs.pop_front();
        }
        self.logs.push_back(line.into());
    }

    /// Shows a toast and logs it. `[WARN]`-prefixed text is a warning.
    pub fn notify(&mut self, line: impl Into<String>) {
        let line = line.into();
        let level = if line.starts_with("[WARN]") {
            NoticeLevel::Warn
        } else {
            NoticeLevel::Info
        };
        let text = line
            .trim_start_matches("[WARN]")
            .trim_start_matches("[INFO]")
            .trim()
            .to_string();
        if self.notifications.len() >= MAX_NOTIFICATIONS {
            self.notifications.pop_front();
        }
        self.notifications.push_back(Notification {
            level,
            text,
            at: Instant::now(),
        });
        self.push_log(line);
    }

    pub fn expire_notifications(&mut self, now: Instant) {
        self.notifications
            .retain(|n| now.duration_since(n.at).as_secs() < NOTIFICATION_TTL_SECS);
    }

    pub fn switch_tab(&mut self, kind: CollectionKind) -> bool {
        if self.tab == kind {
            return false;
        }
        self.tab = kind;
        self.mode = InputMode::Normal;
        true
    }

    pub fn select_next(&mut self) {
        let view = self.current_mut();
        let len = view.rows().len();
        if len > 0 {
            view.cursor = (view.cursor + 1).min(len - 1);
        }
    }

    pub fn select_prev(&mut self) {
        let view = self.current_mut();
        view.cursor = view.cursor.saturating_sub(1);
    }

    /// Space on a row: toggles the entity, or the whole group on a header.
    pub fn toggle_cursor(&mut self) {
        let view = self.current_mut();
        match view.cursor_row() {
            Some(Row::Entity { key }) => view.selection.toggle(&key),
            Some(Row::Group { keys, .. }) => view.selection.toggle_all(&keys),
            None => {}
        }
    }

    pub fn toggle_all_visible(&mut self) {
        let view = self.current_mut();
        let keys = view.visible_keys();
        view.selection.toggle_all(&keys);
    }

    pub fn clear_selection(&mut self) {
        self.current_mut().selection.clear();
    }

    /// Drops selected keys that vanished from the snapshot. Returns how many.
    pub fn prune_absent_selection(&mut self) -> usize {
        let view = self.current_mut();
        let collection = view.collection.clone();
        view.selection.retain_present(&collection)
    }

    pub fn sort_choices(kind: CollectionKind) -> &'static [&'static str] {
        match kind {
            CollectionKind::Live => &[
                "",
                "name_asc",
                "penalty_weight_desc",
                "country_asc",
                "level_desc",
            ],
            CollectionKind::History => &["", "name_asc", "penalty_weight_desc", "country_asc"],
            CollectionKind::Vip => &["", "name_asc", "vip_expiration_asc"],
            CollectionKind::Blacklist => &["", "name_asc", "expires_at_asc", "created_at_desc"],
        }
    }

    pub fn group_choices(kind: CollectionKind) -> &'static [&'static str] {
        match kind {
            CollectionKind::Live => &["", "team", "unit_name"],
            CollectionKind::Blacklist => &["", "blacklist_name"],
            CollectionKind::History | CollectionKind::Vip => &["", "country"],
        }
    }

    pub fn cycle_sort(&mut self) {
        let choices = Self::sort_choices(self.tab);
        let view = self.current_mut();
        view.options.sort_key = next_choice(choices, &view.options.sort_key).to_string();
        view.clamp_cursor();
        self.settings_dirty = true;
    }

    pub fn cycle_group(&mut self) {
        let choices = Self::group_choices(self.tab);
        let view = self.current_mut();
        let current = view.options.group_by.clone().unwrap_or_default();
        let next = next_choice(choices, &current);
        view.options.group_by = (!next.is_empty()).then(|| next.to_string());
        view.cursor = 0;
    }

    pub fn toggle_accent_folding(&mut self) {
        let view = self.current_mut();
        view.options.ignore_accents = !view.options.ignore_accents;
        let on = view.options.ignore_accents;
        view.clamp_cursor();
        self.push_log(format!(
            "[INFO] Accent-insensitive filter {}",
            if on { "on" } else { "off" }
        ));
    }

    pub fn set_filter_text(&mut self, text: &str) {
        let view = self.current_mut();
        view.options.filter_text = text.to_string();
        view.cursor = 0;
    }

    /// Moves the server-side page for paginated tabs. Returns the new filter to
    /// send to the poller, or `None` when nothing changed.
    pub fn change_page(&mut self, forward: bool) -> Option<Filter> {
        let page_size = self.page_size;
        let view = self.current_mut();
        if !view.kind.paginated() {
            return None;
        }
        let page = view.filter.page.unwrap_or(1);
        let last_page = view
            .total
            .map(|t| t.div_ceil(u64::from(page_size.max(1))).max(1) as u32);
        let next = if forward {
            match last_page {
                Some(last) if page >= last => return None,
                _ => page + 1,
            }
        } else if page <= 1 {
            return None;
        } else {
            page - 1
        };
        view.filter.page = Some(next);
        view.filter.page_size = Some(page_size);
        view.cursor = 0;
        view.loading = true;
        Some(view.filter.clone())
    }

    /// Selected keys, or the row under the cursor when nothing is selected.
    pub fn action_targets(&self) -> Vec<String> {
        let view = self.current();
        if !view.selection.is_empty() {
            return view.selection.sorted_keys();
        }
        view.cursor_entity()
            .map(|e| vec![e.key.clone()])
            .unwrap_or_default()
    }

    /// Starts an action on the current tab. Either switches to the reason
    /// prompt or returns the command that executes the planned calls.
    pub fn begin_action(
        &mut self,
        action: ActionType,
        payload: ActionPayload,
    ) -> Option<ProviderCommand> {
        let targets = self.action_targets();
        self.begin_action_on(action, targets, payload)
    }

    pub fn begin_action_on(
        &mut self,
        action: ActionType,
        target_keys: Vec<String>,
        payload: ActionPayload,
    ) -> Option<ProviderCommand> {
        if target_keys.is_empty() {
            self.notify("[INFO] Nothing selected");
            self.mode = InputMode::Normal;
            return None;
        }
        let kind = self.tab;
        let request = ActionRequest {
            action,
            target_keys,
            payload,
        };
        let operator = self.operator.clone();
        let view = self.view_mut(kind);
        let outcome = plan(&request, &view.collection, &mut view.selection, &operator);
        match outcome {
            Err(confirm) => {
                self.mode = InputMode::Reason {
                    request: confirm,
                    payload: request.payload,
                    buffer: String::new(),
                    template: None,
                };
                None
            }
            Ok(plan) => {
                self.mode = InputMode::Normal;
                if let Some(reason) = request.payload.reason.as_deref() {
                    self.remember_template(reason);
                }
                self.push_log(format!(
                    "[INFO] {} sent for {} target(s)",
                    action.label(),
                    plan.calls.len()
                ));
                self.pending.push(plan.pending.clone());
                Some(ProviderCommand::Dispatch { kind, plan })
            }
        }
    }

    /// Re-invokes the confirmed action with the typed reason on top of the
    /// original payload. A blank reason keeps the prompt open.
    pub fn confirm_reason(&mut self) -> Option<ProviderCommand> {
        let (action, target_keys, payload) = match &self.mode {
            InputMode::Reason {
                request,
                payload,
                buffer,
                ..
            } if !buffer.trim().is_empty() => (
                request.action,
                request.target_keys.clone(),
                ActionPayload {
                    reason: Some(buffer.trim().to_string()),
                    ..payload.clone()
                },
            ),
            _ => return None,
        };
        self.begin_action_on(action, target_keys, payload)
    }

    /// Called when the provider could not take `cmd`. A dispatch that never
    /// left must not stay pending.
    pub fn command_not_sent(&mut self, cmd: &ProviderCommand) {
        if let ProviderCommand::Dispatch { plan, .. } = cmd {
            self.drop_pending(&plan.pending);
        }
        self.notify("[WARN] Provider is not running");
    }

    fn drop_pending(&mut self, done: &PendingAction) {
        if let Some(pos) = self
            .pending
            .iter()
            .position(|p| p.action == done.action && p.target_keys == done.target_keys)
        {
            self.pending.remove(pos);
        }
    }

    /// Cycles the reason buffer through remembered templates.
    pub fn cycle_template(&mut self) {
        let count = self.templates.len();
        if count == 0 {
            return;
        }
        if let InputMode::Reason {
            buffer, template, ..
        } = &mut self.mode
        {
            let next = template.map(|t| (t + 1) % count).unwrap_or(0);
            *template = Some(next);
            *buffer = self.templates[next].clone();
        }
    }

    /// Most-recent-first, deduplicated, capped.
    pub fn remember_template(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.templates.retain(|t| t != text);
        self.templates.insert(0, text.to_string());
        self.templates.truncate(MAX_TEMPLATES);
        self.settings_dirty = true;
    }
}

fn next_choice<'a>(choices: &[&'a str], current: &str) -> &'a str {
    let pos = choices.iter().position(|c| *c == current);
    match pos {
        Some(idx) => choices[(idx + 1) % choices.len()],
        None => choices.first().copied().unwrap_or(""),
    }
}

pub fn apply_delta(state: &mut AppState, delta: Delta) {
    match delta {
        Delta::SetCollection { kind, filter, page } => {
            if !answers_current_query(state, kind, &filter) {
                return;
            }
            for warning in &page.warnings {
                state.push_log(format!("[WARN] {warning}"));
            }
            let view = state.view_mut(kind);
            view.collection = page.collection;
            view.total = page.total;
            view.loading = false;
            view.last_error = None;
            view.fetched_at = Some(SystemTime::now());
            view.clamp_cursor();
        }
        Delta::CollectionFailed {
            kind,
            filter,
            error,
        } => {
            if !answers_current_query(state, kind, &filter) {
                return;
            }
            // Keep whatever snapshot we had; a failed read never blanks the list.
            let view = state.view_mut(kind);
            view.loading = false;
            view.last_error = Some(error.to_string());
            state.notify(format!("[WARN] {} refresh failed: {error}", kind.label()));
        }
        Delta::ActionSettled { kind, report } => {
            state.drop_pending(&report.pending);
            for line in report.messages() {
                state.notify(line);
            }
            state.push_log(format!(
                "[INFO] {} on {}: {} ok, {} failed, {} stale",
                report.pending.action.label(),
                kind.label(),
                report.succeeded(),
                report.failed(),
                report.stale()
            ));
        }
        Delta::Log(line) => state.push_log(line),
    }
}

// Reads answer in whatever order their threads finish; one issued with an
// older filter or page must not overwrite the newer one.
fn answers_current_query(state: &mut AppState, kind: CollectionKind, filter: &Filter) -> bool {
    if state.view(kind).filter == *filter {
        return true;
    }
    state.push_log(format!("[INFO] Dropped out-of-date {} result", kind.label()));
    false
}
