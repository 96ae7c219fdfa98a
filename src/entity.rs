use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The roster-like lists the console can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    Live,
    History,
    Vip,
    Blacklist,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 4] = [
        CollectionKind::Live,
        CollectionKind::History,
        CollectionKind::Vip,
        CollectionKind::Blacklist,
    ];

    pub fn endpoint(self) -> &'static str {
        match self {
            CollectionKind::Live => "get_players",
            CollectionKind::History => "get_players_history",
            CollectionKind::Vip => "get_vip_ids",
            CollectionKind::Blacklist => "get_blacklist_records",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CollectionKind::Live => "Live",
            CollectionKind::History => "History",
            CollectionKind::Vip => "VIP",
            CollectionKind::Blacklist => "Blacklist",
        }
    }

    pub fn storage_key(self) -> &'static str {
        match self {
            CollectionKind::Live => "live",
            CollectionKind::History => "history",
            CollectionKind::Vip => "vip",
            CollectionKind::Blacklist => "blacklist",
        }
    }

    /// History and blacklist records are paginated server-side.
    pub fn paginated(self) -> bool {
        matches!(self, CollectionKind::History | CollectionKind::Blacklist)
    }

    fn key_fields(self) -> &'static [&'static str] {
        match self {
            CollectionKind::Blacklist => &["id"],
            _ => &["player_id", "steam_id_64"],
        }
    }
}

/// One roster row. The key is stable across refreshes; fields are a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub key: String,
    pub fields: Map<String, Value>,
}

impl Entity {
    pub fn new(key: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            key: key.into(),
            fields,
        }
    }

    pub fn get(&self, attr: &str) -> Option<&Value> {
        self.fields.get(attr).filter(|v| !v.is_null())
    }

    pub fn str_field(&self, attr: &str) -> Option<&str> {
        self.get(attr)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn num_field(&self, attr: &str) -> Option<f64> {
        self.get(attr).and_then(Value::as_f64)
    }

    pub fn name(&self) -> &str {
        self.str_field("name").unwrap_or(&self.key)
    }

    /// The player id an action should target. Blacklist records are keyed by
    /// record id but act on the player they reference.
    pub fn player_id(&self) -> &str {
        self.str_field("player_id").unwrap_or(&self.key)
    }
}

/// Ordered, keyed snapshot in server response order. Never mutated after build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    entities: Vec<Entity>,
    index: HashMap<String, usize>,
}

impl Collection {
    /// Builds a snapshot, keeping the first entity for any repeated key.
    /// Returns the keys that were dropped as duplicates.
    pub fn from_entities(entities: Vec<Entity>) -> (Self, Vec<String>) {
        let mut out = Vec::with_capacity(entities.len());
        let mut index = HashMap::with_capacity(entities.len());
        let mut duplicates = Vec::new();
        for entity in entities {
            if index.contains_key(&entity.key) {
                duplicates.push(entity.key);
                continue;
            }
            index.insert(entity.key.clone(), out.len());
            out.push(entity);
        }
        (
            Self {
                entities: out,
                index,
            },
            duplicates,
        )
    }

    pub fn get(&self, key: &str) -> Option<&Entity> {
        self.index.get(key).and_then(|idx| self.entities.get(*idx))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entity> {
        self.entities.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a Entity;
    type IntoIter = std::slice::Iter<'a, Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.iter()
    }
}

/// Result of normalizing one response.
#[derive(Debug, Clone, Default)]
pub struct NormalizedPage {
    pub collection: Collection,
    pub total: Option<u64>,
    pub warnings: Vec<String>,
}

/// Turns a raw `result` payload into a keyed collection for `kind`.
pub fn normalize(kind: CollectionKind, raw: &Value) -> NormalizedPage {
    let (rows, total) = split_rows(raw);
    let mut warnings = Vec::new();
    let mut entities = Vec::with_capacity(rows.len());
    let mut missing_keys = 0usize;

    for row in rows {
        let Some(obj) = row.as_object() else {
            missing_keys += 1;
            continue;
        };
        let Some(key) = pick_key(obj, kind.key_fields()) else {
            missing_keys += 1;
            continue;
        };
        entities.push(Entity::new(key, flatten_record(kind, obj)));
    }

    if missing_keys > 0 {
        warnings.push(format!(
            "{}: skipped {missing_keys} row(s) without an id",
            kind.label()
        ));
    }
    let (collection, duplicates) = Collection::from_entities(entities);
    if !duplicates.is_empty() {
        warnings.push(format!(
            "{}: ignored duplicate id(s) {}",
            kind.label(),
            duplicates.join(", ")
        ));
    }

    NormalizedPage {
        collection,
        total,
        warnings,
    }
}

fn split_rows(raw: &Value) -> (&[Value], Option<u64>) {
    match raw {
        Value::Array(rows) => (rows.as_slice(), None),
        Value::Object(obj) => {
            let total = obj.get("total").and_then(Value::as_u64);
            let rows = ["players", "records", "vips", "items"]
                .iter()
                .find_map(|k| obj.get(*k).and_then(Value::as_array))
                .map(|rows| rows.as_slice())
                .unwrap_or(&[]);
            (rows, total)
        }
        _ => (&[], None),
    }
}

fn pick_key(obj: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|f| match obj.get(*f) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn flatten_record(kind: CollectionKind, obj: &Map<String, Value>) -> Map<String, Value> {
    let mut fields = obj.clone();

    if let Some(name) = record_name(obj) {
        fields.insert("name".to_string(), Value::String(name));
    }
    if let Some(country) = pick_path_str(
        obj,
        &[&["country"], &["steaminfo", "country"], &["player", "country"]],
    ) {
        fields.insert("country".to_string(), Value::String(country));
    }
    if let Some(squad) = pick_path_str(obj, &[&["unit_name"], &["squad"]]) {
        fields.insert("unit_name".to_string(), Value::String(squad));
    }

    let profile = obj.get("profile").and_then(Value::as_object);
    let penalties = obj
        .get("penalty_count")
        .or_else(|| profile.and_then(|p| p.get("penalty_count")));
    if let Some(penalties) = penalties {
        fields.insert(
            "penalty_weight".to_string(),
            Value::from(penalty_weight(penalties)),
        );
    }
    let flags = obj
        .get("flags")
        .or_else(|| profile.and_then(|p| p.get("flags")));
    if let Some(Value::Array(flags)) = flags {
        let joined: String = flags
            .iter()
            .filter_map(|f| f.get("flag").and_then(Value::as_str))
            .collect();
        fields.insert("flags".to_string(), Value::String(joined));
    }

    match kind {
        CollectionKind::Vip => {
            fields.insert("is_vip".to_string(), Value::Bool(true));
        }
        CollectionKind::Blacklist => {
            if let Some(list) = obj
                .get("blacklist")
                .and_then(|b| b.get("name"))
                .and_then(Value::as_str)
            {
                fields.insert("blacklist_name".to_string(), Value::String(list.to_string()));
            }
            if let Some(player_id) =
                pick_path_str(obj, &[&["player_id"], &["player", "player_id"]])
            {
                fields.insert("player_id".to_string(), Value::String(player_id));
            }
        }
        CollectionKind::History => {
            let blacklisted = obj
                .get("is_blacklisted")
                .and_then(Value::as_bool)
                .unwrap_or_else(|| obj.get("blacklist").is_some_and(|b| !b.is_null()));
            fields.insert("is_blacklisted".to_string(), Value::Bool(blacklisted));
        }
        CollectionKind::Live => {}
    }

    fields
}

fn record_name(obj: &Map<String, Value>) -> Option<String> {
    if let Some(name) = obj.get("name").and_then(Value::as_str)
        && !name.trim().is_empty()
    {
        return Some(name.to_string());
    }
    let names = obj
        .get("names")
        .or_else(|| obj.get("player").and_then(|p| p.get("names")))?;
    names.as_array()?.iter().find_map(|n| match n {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(o) => o.get("name").and_then(Value::as_str).map(str::to_string),
        _ => None,
    })
}

fn pick_path_str(obj: &Map<String, Value>, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|path| {
        let (first, rest) = path.split_first()?;
        let mut cur = obj.get(*first)?;
        for seg in rest {
            cur = cur.get(*seg)?;
        }
        match cur {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    })
}

/// Weighted sum of a `penalty_count` object; heavier sanctions count more.
pub fn penalty_weight(counts: &Value) -> u64 {
    const WEIGHTS: [(&str, u64); 4] = [
        ("PUNISH", 1),
        ("KICK", 2),
        ("TEMPBAN", 3),
        ("PERMABAN", 4),
    ];
    WEIGHTS
        .iter()
        .map(|(name, weight)| counts.get(*name).and_then(Value::as_u64).unwrap_or(0) * weight)
        .sum()
}
