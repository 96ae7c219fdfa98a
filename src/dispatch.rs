use std::collections::BTreeSet;
use std::sync::Arc;

use rayon::prelude::*;
use serde_json::{Value, json};

use crate::api::{AdminApi, ApiError};
use crate::entity::{Collection, Entity};
use crate::selection::SelectionSet;

const COMMENT_ENDPOINT: &str = "post_player_comment";
const DEFAULT_TEMPBAN_HOURS: u32 = 2;
const DEFAULT_FLAG: &str = "🚩";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    Punish,
    Kick,
    TempBan,
    PermaBan,
    Message,
    Watch,
    Unwatch,
    SwitchNow,
    SwitchOnDeath,
    Flag,
    AddVip,
    RemoveVip,
    Blacklist,
    Unban,
}

impl ActionType {
    pub const ALL: [ActionType; 14] = [
        ActionType::Punish,
        ActionType::Kick,
        ActionType::TempBan,
        ActionType::PermaBan,
        ActionType::Message,
        ActionType::Watch,
        ActionType::Unwatch,
        ActionType::SwitchNow,
        ActionType::SwitchOnDeath,
        ActionType::Flag,
        ActionType::AddVip,
        ActionType::RemoveVip,
        ActionType::Blacklist,
        ActionType::Unban,
    ];

    pub fn endpoint(self) -> &'static str {
        match self {
            ActionType::Punish => "punish",
            ActionType::Kick => "kick",
            ActionType::TempBan => "temp_ban",
            ActionType::PermaBan => "perma_ban",
            ActionType::Message => "message_player",
            ActionType::Watch => "watch_player",
            ActionType::Unwatch => "unwatch_player",
            ActionType::SwitchNow => "switch_player_now",
            ActionType::SwitchOnDeath => "switch_player_on_death",
            ActionType::Flag => "flag_player",
            ActionType::AddVip => "add_vip",
            ActionType::RemoveVip => "remove_vip",
            ActionType::Blacklist => "add_blacklist_record",
            ActionType::Unban => "unban",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ActionType::Punish => "Punish",
            ActionType::Kick => "Kick",
            ActionType::TempBan => "Temp ban",
            ActionType::PermaBan => "Perma ban",
            ActionType::Message => "Message",
            ActionType::Watch => "Watch",
            ActionType::Unwatch => "Unwatch",
            ActionType::SwitchNow => "Switch now",
            ActionType::SwitchOnDeath => "Switch on death",
            ActionType::Flag => "Flag",
            ActionType::AddVip => "Add VIP",
            ActionType::RemoveVip => "Remove VIP",
            ActionType::Blacklist => "Blacklist",
            ActionType::Unban => "Unban",
        }
    }

    pub fn requires_reason(self) -> bool {
        matches!(
            self,
            ActionType::Punish
                | ActionType::Kick
                | ActionType::TempBan
                | ActionType::PermaBan
                | ActionType::Message
                | ActionType::Watch
                | ActionType::Blacklist
        )
    }

    /// Never routed through the confirmation prompt, whatever the payload says.
    pub fn confirmation_exempt(self) -> bool {
        matches!(
            self,
            ActionType::SwitchNow
                | ActionType::SwitchOnDeath
                | ActionType::Unwatch
                | ActionType::RemoveVip
        )
    }

    fn body(self, entity: &Entity, payload: &ActionPayload, operator: &str) -> Value {
        let player_id = entity.player_id();
        let player_name = entity.name();
        let reason = payload.reason_text();
        match self {
            ActionType::Punish | ActionType::Kick | ActionType::PermaBan | ActionType::Watch => {
                json!({
                    "player_id": player_id,
                    "player_name": player_name,
                    "reason": reason,
                    "by": operator,
                })
            }
            ActionType::TempBan => json!({
                "player_id": player_id,
                "player_name": player_name,
                "duration_hours": payload.duration_hours.unwrap_or(DEFAULT_TEMPBAN_HOURS),
                "reason": reason,
                "by": operator,
            }),
            ActionType::Message => json!({
                "player_id": player_id,
                "player_name": player_name,
                "message": reason,
                "by": operator,
            }),
            ActionType::Unwatch => json!({
                "player_id": player_id,
                "player_name": player_name,
            }),
            ActionType::SwitchNow | ActionType::SwitchOnDeath => json!({
                "player_id": player_id,
                "player_name": player_name,
                "by": operator,
            }),
            ActionType::Flag => json!({
                "player_id": player_id,
                "flag": payload.flag.as_deref().unwrap_or(DEFAULT_FLAG),
                "comment": reason,
            }),
            ActionType::AddVip => json!({
                "player_id": player_id,
                "description": player_name,
                "expiration": payload.expiration,
            }),
            ActionType::RemoveVip => json!({ "player_id": player_id }),
            ActionType::Blacklist => json!({
                "player_id": player_id,
                "blacklist_id": payload.blacklist_id.unwrap_or(0),
                "reason": reason,
                "expires_at": payload.expiration,
                "admin_name": operator,
            }),
            ActionType::Unban => json!({
                "player_id": player_id,
                "by": operator,
            }),
        }
    }
}

/// Extra fields an action may carry. Blank strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionPayload {
    pub reason: Option<String>,
    pub comment: Option<String>,
    pub duration_hours: Option<u32>,
    pub flag: Option<String>,
    pub expiration: Option<String>,
    pub blacklist_id: Option<u32>,
}

impl ActionPayload {
    pub fn with_reason(reason: &str) -> Self {
        Self {
            reason: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn reason_text(&self) -> &str {
        self.reason.as_deref().map(str::trim).unwrap_or("")
    }

    fn comment_text(&self) -> Option<&str> {
        self.comment
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub action: ActionType,
    pub target_keys: Vec<String>,
    pub payload: ActionPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Pending,
    Succeeded,
    Failed,
}

/// The in-flight view of one user command. Dropped once its toast is shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub action: ActionType,
    pub target_keys: BTreeSet<String>,
    pub payload: ActionPayload,
    pub status: ActionStatus,
}

/// Returned instead of calling the API when a required reason is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub action: ActionType,
    pub target_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCall {
    pub key: String,
    pub name: String,
    pub body: Value,
}

/// Calls resolved against one collection snapshot, ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchPlan {
    pub pending: PendingAction,
    pub calls: Vec<PlannedCall>,
    pub stale: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TargetOutcome {
    Stale,
    Succeeded,
    Failed(ApiError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetReport {
    pub key: String,
    pub name: String,
    pub outcome: TargetOutcome,
    /// Result of the follow-up comment call, when one was made.
    pub comment: Option<Result<(), ApiError>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub pending: PendingAction,
    pub targets: Vec<TargetReport>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, TargetOutcome::Succeeded))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TargetOutcome::Failed(_)))
    }

    pub fn stale(&self) -> usize {
        self.count(|o| matches!(o, TargetOutcome::Stale))
    }

    fn count(&self, pred: impl Fn(&TargetOutcome) -> bool) -> usize {
        self.targets.iter().filter(|t| pred(&t.outcome)).count()
    }

    /// One line per target worth telling the user about, `[INFO]`/`[WARN]` prefixed.
    pub fn messages(&self) -> Vec<String> {
        let label = self.pending.action.label();
        let mut out = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            match &target.outcome {
                TargetOutcome::Stale => out.push(format!(
                    "[WARN] {label}: {} is no longer present, deselected",
                    target.key
                )),
                TargetOutcome::Succeeded => {
                    out.push(format!("[INFO] {label}: {} done", target.name))
                }
                TargetOutcome::Failed(err) => {
                    out.push(format!("[WARN] {label}: {} failed: {err}", target.name))
                }
            }
            if let Some(Err(err)) = &target.comment {
                out.push(format!("[WARN] Comment on {} failed: {err}", target.name));
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    NeedsConfirmation(ConfirmationRequest),
    Settled(DispatchReport),
}

/// Resolves each target against `collection`. Absent keys are removed from
/// `selection` and get no call. Fails with a confirmation request, touching
/// nothing, when a required reason is missing.
pub fn plan(
    request: &ActionRequest,
    collection: &Collection,
    selection: &mut SelectionSet,
    operator: &str,
) -> Result<DispatchPlan, ConfirmationRequest> {
    let action = request.action;
    if action.requires_reason()
        && !action.confirmation_exempt()
        && request.payload.reason_text().is_empty()
    {
        return Err(ConfirmationRequest {
            action,
            target_keys: request.target_keys.clone(),
        });
    }

    let mut calls = Vec::with_capacity(request.target_keys.len());
    let mut stale = Vec::new();
    let mut seen = BTreeSet::new();
    for key in &request.target_keys {
        if !seen.insert(key.clone()) {
            continue;
        }
        match collection.get(key) {
            Some(entity) => calls.push(PlannedCall {
                key: key.clone(),
                name: entity.name().to_string(),
                body: action.body(entity, &request.payload, operator),
            }),
            None => {
                selection.remove(key);
                stale.push(key.clone());
            }
        }
    }

    Ok(DispatchPlan {
        pending: PendingAction {
            action,
            target_keys: seen,
            payload: request.payload.clone(),
            status: ActionStatus::Pending,
        },
        calls,
        stale,
    })
}

/// Runs action calls on a bounded pool, one request per target.
pub struct Dispatcher {
    api: Arc<dyn AdminApi>,
    pool: Option<rayon::ThreadPool>,
    operator: String,
}

impl Dispatcher {
    pub fn new(api: Arc<dyn AdminApi>, max_inflight: usize, operator: &str) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_inflight.clamp(1, 64))
            .thread_name(|idx| format!("dispatch-{idx}"))
            .build()
            .ok();
        Self {
            api,
            pool,
            operator: operator.to_string(),
        }
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }

    /// Plan and execute in one go.
    pub fn dispatch(
        &self,
        request: &ActionRequest,
        collection: &Collection,
        selection: &mut SelectionSet,
        refresh: &mut dyn FnMut(),
    ) -> DispatchOutcome {
        match plan(request, collection, selection, &self.operator) {
            Ok(plan) => DispatchOutcome::Settled(self.execute(plan, refresh)),
            Err(confirm) => DispatchOutcome::NeedsConfirmation(confirm),
        }
    }

    /// Issues every planned call, waits for all of them, then calls `refresh`
    /// exactly once regardless of how the calls went.
    pub fn execute(&self, plan: DispatchPlan, refresh: &mut dyn FnMut()) -> DispatchReport {
        let DispatchPlan {
            mut pending,
            calls,
            stale,
        } = plan;
        let endpoint = pending.action.endpoint();
        let comment = pending.payload.comment_text().map(str::to_string);

        let run = || {
            calls
                .par_iter()
                .map(|call| self.run_call(endpoint, call, comment.as_deref()))
                .collect::<Vec<_>>()
        };
        let mut targets = match self.pool.as_ref() {
            Some(pool) => pool.install(run),
            None => run(),
        };
        targets.extend(stale.into_iter().map(|key| TargetReport {
            name: key.clone(),
            key,
            outcome: TargetOutcome::Stale,
            comment: None,
        }));

        let any_failed = targets
            .iter()
            .any(|t| matches!(t.outcome, TargetOutcome::Failed(_)));
        let any_ok = targets
            .iter()
            .any(|t| matches!(t.outcome, TargetOutcome::Succeeded));
        pending.status = if any_ok && !any_failed {
            ActionStatus::Succeeded
        } else {
            ActionStatus::Failed
        };

        refresh();
        DispatchReport { pending, targets }
    }

    fn run_call(&self, endpoint: &str, call: &PlannedCall, comment: Option<&str>) -> TargetReport {
        let outcome = match self.api.post(endpoint, &call.body) {
            Ok(_) => TargetOutcome::Succeeded,
            Err(err) => TargetOutcome::Failed(err),
        };
        // The comment rides on a successful action only and never undoes it.
        let comment = match (&outcome, comment) {
            (TargetOutcome::Succeeded, Some(text)) => {
                let player_id = call
                    .body
                    .get("player_id")
                    .and_then(Value::as_str)
                    .unwrap_or(&call.key);
                let body = json!({ "player_id": player_id, "comment": text });
                Some(self.api.post(COMMENT_ENDPOINT, &body).map(|_| ()))
            }
            _ => None,
        };
        TargetReport {
            key: call.key.clone(),
            name: call.name.clone(),
            outcome,
            comment,
        }
    }
}
