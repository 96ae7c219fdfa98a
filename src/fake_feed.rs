use std::sync::Mutex;

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::{Value, json};

use crate::api::{AdminApi, ApiError};

const NAMES: &[&str] = &[
    "Ámelie", "Bjørn", "Chloé", "Dmitri", "Élodie", "Franz", "Grégoire", "Hana", "Ignacio",
    "Jürgen", "Kasia", "Lukáš", "Mateus", "Noémie", "Oskar", "Paweł", "Quentin", "René",
    "Søren", "Tomás", "Ursula", "Valérie", "Wojtek", "Xavier", "Yusuf", "Zoë",
];
const COUNTRIES: &[&str] = &["FR", "DE", "PL", "GB", "US", "BR", "CZ", "DK", "ES", "NL"];
const SQUADS: &[&str] = &["able", "baker", "charlie", "dog", "easy", "fox"];
const MAX_ONLINE: usize = 24;

/// Offline stand-in for the CRCON API: a small churning server with VIP and
/// blacklist lists, so the console can be driven without a backend.
pub struct DemoApi {
    server: Mutex<DemoServer>,
    failure_rate: f64,
}

#[derive(Debug, Default)]
struct DemoServer {
    next_id: u64,
    online: Vec<Value>,
    known: Vec<Value>,
    vips: Vec<Value>,
    blacklist: Vec<Value>,
    next_record: u64,
}

impl Default for DemoApi {
    fn default() -> Self {
        Self::new(0.05)
    }
}

impl DemoApi {
    /// `failure_rate` is the chance an action answers `failed: true`.
    pub fn new(failure_rate: f64) -> Self {
        let mut server = DemoServer {
            next_id: 76_561_198_000_000_000,
            ..DemoServer::default()
        };
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_ONLINE / 2 {
            server.join(&mut rng);
        }
        Self {
            server: Mutex::new(server),
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }
}

impl DemoServer {
    fn join(&mut self, rng: &mut impl Rng) {
        self.next_id += rng.gen_range(1..5000);
        let name = NAMES.choose(rng).copied().unwrap_or("Player");
        let team = if rng.gen_bool(0.5) { "allies" } else { "axis" };
        let squad = if rng.gen_bool(0.85) {
            Value::String(SQUADS.choose(rng).copied().unwrap_or("able").to_string())
        } else {
            Value::Null
        };
        let player = json!({
            "player_id": self.next_id.to_string(),
            "name": format!("{name}{}", rng.gen_range(1..99)),
            "country": COUNTRIES.choose(rng).copied().unwrap_or("FR"),
            "team": team,
            "unit_name": squad,
            "level": rng.gen_range(1..250),
            "profile": {
                "penalty_count": {
                    "PUNISH": rng.gen_range(0..4),
                    "KICK": rng.gen_range(0..3),
                    "TEMPBAN": rng.gen_range(0..2),
                    "PERMABAN": 0,
                },
                "flags": [],
            },
        });
        self.known.push(player.clone());
        self.online.push(player);
    }

    fn churn(&mut self, rng: &mut impl Rng) {
        if !self.online.is_empty() && rng.gen_bool(0.3) {
            let idx = rng.gen_range(0..self.online.len());
            self.online.remove(idx);
        }
        if self.online.len() < MAX_ONLINE && rng.gen_bool(0.4) {
            self.join(rng);
        }
    }

    fn find_known(&self, player_id: &str) -> Option<&Value> {
        self.known
            .iter()
            .find(|p| p.get("player_id").and_then(Value::as_str) == Some(player_id))
    }

    fn drop_online(&mut self, player_id: &str) -> bool {
        let before = self.online.len();
        self.online
            .retain(|p| p.get("player_id").and_then(Value::as_str) != Some(player_id));
        before != self.online.len()
    }

    fn history_page(&self, query: &[(String, String)]) -> Value {
        let param = |name: &str| {
            query
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        let page = param("page")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);
        let page_size = param("page_size")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(50)
            .max(1);
        let name_filter = param("player_name").map(str::to_lowercase);
        let matching: Vec<&Value> = self
            .known
            .iter()
            .rev()
            .filter(|p| match &name_filter {
                Some(needle) => p
                    .get("name")
                    .and_then(Value::as_str)
                    .is_some_and(|n| n.to_lowercase().contains(needle)),
                None => true,
            })
            .collect();
        let players: Vec<Value> = matching
            .iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .map(|p| (*p).clone())
            .collect();
        json!({
            "players": players,
            "page": page,
            "page_size": page_size,
            "total": matching.len(),
        })
    }
}

impl AdminApi for DemoApi {
    fn get(&self, endpoint: &str, query: &[(String, String)]) -> Result<Value, ApiError> {
        let mut server = self.server.lock().unwrap_or_else(|e| e.into_inner());
        let mut rng = rand::thread_rng();
        match endpoint {
            "get_players" => {
                server.churn(&mut rng);
                Ok(Value::Array(server.online.clone()))
            }
            "get_players_history" => Ok(server.history_page(query)),
            "get_vip_ids" => Ok(Value::Array(server.vips.clone())),
            "get_blacklist_records" => Ok(json!({
                "records": server.blacklist.clone(),
                "total": server.blacklist.len(),
            })),
            other => Err(ApiError::Http {
                status: 404,
                body: format!("unknown endpoint {other}"),
            }),
        }
    }

    fn post(&self, endpoint: &str, body: &Value) -> Result<Value, ApiError> {
        let mut rng = rand::thread_rng();
        if rng.gen_bool(self.failure_rate) {
            return Err(ApiError::Failed {
                command: endpoint.to_string(),
                message: "demo server refused the command".to_string(),
            });
        }
        let player_id = body
            .get("player_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut server = self.server.lock().unwrap_or_else(|e| e.into_inner());
        match endpoint {
            "kick" | "temp_ban" | "perma_ban" => {
                server.drop_online(&player_id);
            }
            "add_vip" => {
                server
                    .vips
                    .retain(|v| v.get("player_id").and_then(Value::as_str) != Some(player_id.as_str()));
                let name = body
                    .get("description")
                    .cloned()
                    .unwrap_or(Value::Null);
                let expiration = body
                    .get("expiration")
                    .filter(|v| !v.is_null())
                    .cloned()
                    .unwrap_or_else(|| {
                        Value::String((Utc::now() + ChronoDuration::days(30)).to_rfc3339())
                    });
                server.vips.push(json!({
                    "player_id": player_id,
                    "name": name,
                    "vip_expiration": expiration,
                }));
            }
            "remove_vip" => {
                server
                    .vips
                    .retain(|v| v.get("player_id").and_then(Value::as_str) != Some(player_id.as_str()));
            }
            "add_blacklist_record" => {
                server.next_record += 1;
                let id = server.next_record;
                let name = server
                    .find_known(&player_id)
                    .and_then(|p| p.get("name"))
                    .cloned()
                    .unwrap_or(Value::Null);
                server.blacklist.push(json!({
                    "id": id,
                    "player_id": player_id,
                    "name": name,
                    "reason": body.get("reason").cloned().unwrap_or(Value::Null),
                    "admin_name": body.get("admin_name").cloned().unwrap_or(Value::Null),
                    "created_at": Utc::now().to_rfc3339(),
                    "expires_at": body.get("expires_at").cloned().unwrap_or(Value::Null),
                    "blacklist": { "id": 0, "name": "Default" },
                }));
                server.drop_online(&player_id);
            }
            "unban" => {
                server
                    .blacklist
                    .retain(|r| r.get("player_id").and_then(Value::as_str) != Some(player_id.as_str()));
            }
            _ => {}
        }
        Ok(Value::Bool(true))
    }
}
