use std::cmp::Ordering;

use serde_json::Value;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::entity::{Collection, Entity};

/// Group for entities that lack the grouping attribute.
pub const UNASSIGNED_GROUP: &str = "unassigned";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Parsed `{attribute}_{asc|desc}` sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub attribute: String,
    pub direction: SortDirection,
}

impl SortKey {
    /// `None` for empty or malformed keys; callers keep the input order then.
    pub fn parse(raw: &str) -> Option<Self> {
        let (attribute, dir) = raw.trim().rsplit_once('_')?;
        let direction = match dir.to_ascii_lowercase().as_str() {
            "asc" => SortDirection::Asc,
            "desc" => SortDirection::Desc,
            _ => return None,
        };
        if attribute.is_empty() {
            return None;
        }
        Some(Self {
            attribute: attribute.to_string(),
            direction,
        })
    }

    pub fn as_string(&self) -> String {
        let dir = match self.direction {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        };
        format!("{}_{dir}", self.attribute)
    }
}

#[derive(Debug, Clone)]
pub struct ProjectOptions {
    pub filter_text: String,
    pub ignore_accents: bool,
    pub country: Option<String>,
    pub sort_key: String,
    pub group_by: Option<String>,
}

impl Default for ProjectOptions {
    fn default() -> Self {
        Self {
            filter_text: String::new(),
            ignore_accents: true,
            country: None,
            sort_key: String::new(),
            group_by: None,
        }
    }
}

/// Filtered, sorted, read-only view over `collection`.
pub fn project<'a>(collection: &'a Collection, opts: &ProjectOptions) -> Vec<&'a Entity> {
    let needle = fold_text(opts.filter_text.trim(), opts.ignore_accents);
    let country = opts
        .country
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    let mut out: Vec<&Entity> = collection
        .iter()
        .filter(|e| needle.is_empty() || matches_text(e, &needle, opts.ignore_accents))
        .filter(|e| {
            country.is_none_or(|c| {
                e.str_field("country")
                    .is_some_and(|ec| ec.eq_ignore_ascii_case(c))
            })
        })
        .collect();

    if let Some(key) = SortKey::parse(&opts.sort_key) {
        sort_entities(&mut out, &key);
    }
    out
}

/// `project` followed by grouping on `opts.group_by`; a single unnamed group
/// when no grouping attribute is set.
pub fn project_grouped<'a>(
    collection: &'a Collection,
    opts: &ProjectOptions,
) -> Vec<(String, Vec<&'a Entity>)> {
    let rows = project(collection, opts);
    match opts.group_by.as_deref().filter(|g| !g.is_empty()) {
        Some(attr) => group_by(rows, attr),
        None => vec![(String::new(), rows)],
    }
}

/// Groups in order of first appearance; the unassigned group always comes last.
pub fn group_by<'a>(entities: Vec<&'a Entity>, attr: &str) -> Vec<(String, Vec<&'a Entity>)> {
    let mut groups: Vec<(String, Vec<&'a Entity>)> = Vec::new();
    let mut unassigned: Vec<&'a Entity> = Vec::new();
    for entity in entities {
        let Some(key) = group_key(entity, attr) else {
            unassigned.push(entity);
            continue;
        };
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(entity),
            None => groups.push((key, vec![entity])),
        }
    }
    if !unassigned.is_empty() {
        groups.push((UNASSIGNED_GROUP.to_string(), unassigned));
    }
    groups
}

fn group_key(entity: &Entity, attr: &str) -> Option<String> {
    match entity.get(attr)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn matches_text(entity: &Entity, needle: &str, ignore_accents: bool) -> bool {
    fold_text(entity.name(), ignore_accents).contains(needle) || entity.key.contains(needle)
}

/// Lowercases and, when asked, strips accents so "Ámelie" matches "ame".
pub fn fold_text(raw: &str, ignore_accents: bool) -> String {
    if !ignore_accents {
        return raw.to_lowercase();
    }
    let mut out = String::with_capacity(raw.len());
    for c in raw.nfd().filter(|c| !is_combining_mark(*c)) {
        // Letters with no canonical decomposition.
        match c {
            'ø' | 'Ø' => out.push('o'),
            'ł' | 'Ł' => out.push('l'),
            'đ' | 'Đ' => out.push('d'),
            'ß' => out.push_str("ss"),
            'æ' | 'Æ' => out.push_str("ae"),
            'œ' | 'Œ' => out.push_str("oe"),
            _ => out.extend(c.to_lowercase()),
        }
    }
    out
}

#[derive(Debug, PartialEq, PartialOrd)]
enum SortValue {
    Missing,
    Num(f64),
    Text(String),
}

fn sort_value(entity: &Entity, attr: &str) -> SortValue {
    match entity.get(attr) {
        Some(Value::Number(n)) => n.as_f64().map_or(SortValue::Missing, SortValue::Num),
        Some(Value::Bool(b)) => SortValue::Num(if *b { 1.0 } else { 0.0 }),
        Some(Value::String(s)) if !s.trim().is_empty() => SortValue::Text(fold_text(s, true)),
        Some(Value::Array(items)) => SortValue::Num(items.len() as f64),
        _ => SortValue::Missing,
    }
}

fn compare_values(a: &SortValue, b: &SortValue) -> Ordering {
    match (a, b) {
        (SortValue::Num(x), SortValue::Num(y)) => x.total_cmp(y),
        _ => a.partial_cmp(b).unwrap_or(Ordering::Equal),
    }
}

fn sort_entities(rows: &mut [&Entity], key: &SortKey) {
    // Decorate once so folding is not repeated per comparison.
    let mut decorated: Vec<(SortValue, &Entity)> = rows
        .iter()
        .map(|e| (sort_value(e, &key.attribute), *e))
        .collect();
    decorated.sort_by(|(a, _), (b, _)| match key.direction {
        SortDirection::Asc => compare_values(a, b),
        SortDirection::Desc => compare_values(b, a),
    });
    for (slot, (_, entity)) in rows.iter_mut().zip(decorated) {
        *slot = entity;
    }
}
