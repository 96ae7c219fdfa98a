use serde_json::json;

use crcon_terminal::entity::{Collection, CollectionKind, normalize};
use crcon_terminal::selection::{SelectionSet, SetMode};
use crcon_terminal::view::{
    ProjectOptions, SortDirection, SortKey, UNASSIGNED_GROUP, fold_text, project, project_grouped,
};

fn roster() -> Collection {
    normalize(
        CollectionKind::Live,
        &json!([
            {"player_id": "1", "name": "Élodie", "team": "allies", "unit_name": "able", "country": "FR", "level": 40},
            {"player_id": "2", "name": "Bjørn", "team": "axis", "unit_name": "baker", "country": "DK", "level": 12},
            {"player_id": "3", "name": "Zoë", "team": "allies", "country": "nl"},
            {"player_id": "4", "name": "elodie_fan", "team": "axis", "unit_name": "able", "country": "FR", "level": 90},
        ]),
    )
    .collection
}

fn keys(rows: &[&crcon_terminal::entity::Entity]) -> Vec<String> {
    rows.iter().map(|e| e.key.clone()).collect()
}

#[test]
fn toggle_twice_restores_selection() {
    let mut selection: SelectionSet = ["a", "b"].into_iter().collect();
    let before = selection.clone();
    selection.toggle("c");
    assert!(selection.contains("c"));
    selection.toggle("c");
    assert_eq!(selection, before);

    selection.toggle("a");
    selection.toggle("a");
    assert_eq!(selection, before);
}

#[test]
fn set_many_add_makes_superset_and_delete_removes_exactly() {
    let mut selection: SelectionSet = ["x"].into_iter().collect();
    let group = vec!["1".to_string(), "2".to_string()];

    selection.set_many(&group, SetMode::Add);
    assert!(selection.is_superset(&group));
    assert_eq!(selection.len(), 3);

    selection.set_many(&group, SetMode::Delete);
    assert!(!selection.contains("1"));
    assert!(!selection.contains("2"));
    assert!(selection.contains("x"));
}

#[test]
fn toggle_all_only_touches_the_given_group() {
    let group = vec!["1".to_string(), "2".to_string()];
    let mut selection: SelectionSet = ["2", "9"].into_iter().collect();

    // Partially selected: adds the rest.
    selection.toggle_all(&group);
    assert!(selection.is_superset(&group));
    assert!(selection.contains("9"));

    // Fully selected: removes exactly the group.
    selection.toggle_all(&group);
    assert_eq!(selection.sorted_keys(), vec!["9".to_string()]);
}

#[test]
fn selection_survives_a_snapshot_without_its_keys() {
    let collection = roster();
    let mut selection: SelectionSet = ["1", "gone"].into_iter().collect();

    assert_eq!(selection.absent_from(&collection), vec!["gone".to_string()]);
    assert!(selection.contains("gone"));

    assert_eq!(selection.retain_present(&collection), 1);
    assert_eq!(selection.sorted_keys(), vec!["1".to_string()]);
}

#[test]
fn sort_key_parse_splits_on_last_underscore() {
    let key = SortKey::parse("penalty_weight_desc").expect("valid key");
    assert_eq!(key.attribute, "penalty_weight");
    assert_eq!(key.direction, SortDirection::Desc);
    assert_eq!(key.as_string(), "penalty_weight_desc");

    assert!(SortKey::parse("name").is_none());
    assert!(SortKey::parse("name_sideways").is_none());
    assert!(SortKey::parse("").is_none());
}

#[test]
fn unparsable_sort_key_keeps_server_order() {
    let collection = roster();
    let opts = ProjectOptions {
        sort_key: "level_upwards".to_string(),
        ..ProjectOptions::default()
    };
    assert_eq!(keys(&project(&collection, &opts)), vec!["1", "2", "3", "4"]);
}

#[test]
fn missing_values_sort_lowest() {
    let collection = roster();
    let asc = ProjectOptions {
        sort_key: "level_asc".to_string(),
        ..ProjectOptions::default()
    };
    assert_eq!(keys(&project(&collection, &asc)), vec!["3", "2", "1", "4"]);

    let desc = ProjectOptions {
        sort_key: "level_desc".to_string(),
        ..ProjectOptions::default()
    };
    assert_eq!(keys(&project(&collection, &desc)), vec!["4", "1", "2", "3"]);
}

#[test]
fn name_sort_ignores_case_and_accents() {
    let collection = roster();
    let opts = ProjectOptions {
        sort_key: "name_asc".to_string(),
        ..ProjectOptions::default()
    };
    assert_eq!(keys(&project(&collection, &opts)), vec!["2", "1", "4", "3"]);
}

#[test]
fn accent_folding_controls_name_matching() {
    let collection = roster();
    let mut opts = ProjectOptions {
        filter_text: "elodie".to_string(),
        ..ProjectOptions::default()
    };
    assert_eq!(keys(&project(&collection, &opts)), vec!["1", "4"]);

    opts.ignore_accents = false;
    assert_eq!(keys(&project(&collection, &opts)), vec!["4"]);

    opts.filter_text = "Élo".to_string();
    assert_eq!(keys(&project(&collection, &opts)), vec!["1"]);
}

#[test]
fn filter_matches_key_and_country() {
    let collection = roster();
    let by_key = ProjectOptions {
        filter_text: "3".to_string(),
        ..ProjectOptions::default()
    };
    assert_eq!(keys(&project(&collection, &by_key)), vec!["3"]);

    let by_country = ProjectOptions {
        country: Some("NL".to_string()),
        ..ProjectOptions::default()
    };
    assert_eq!(keys(&project(&collection, &by_country)), vec!["3"]);
}

#[test]
fn grouping_keeps_first_appearance_and_unassigned_last() {
    let collection = roster();
    let opts = ProjectOptions {
        group_by: Some("unit_name".to_string()),
        ..ProjectOptions::default()
    };
    let groups = project_grouped(&collection, &opts);
    let names: Vec<&str> = groups.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(names, vec!["able", "baker", UNASSIGNED_GROUP]);
    assert_eq!(keys(&groups[0].1), vec!["1", "4"]);
    assert_eq!(keys(&groups[2].1), vec!["3"]);
}

#[test]
fn no_grouping_yields_one_unnamed_group() {
    let collection = roster();
    let groups = project_grouped(&collection, &ProjectOptions::default());
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].0, "");
    assert_eq!(groups[0].1.len(), 4);
}

#[test]
fn fold_text_handles_letters_without_decomposition() {
    assert_eq!(fold_text("Bjørn Łukasz", true), "bjorn lukasz");
    assert_eq!(fold_text("Straße", true), "strasse");
    assert_eq!(fold_text("Zoë", false), "zoë");
}

#[test]
fn name_filter_picks_only_the_matching_player() {
    let collection = normalize(
        CollectionKind::Live,
        &json!([
            {"player_id": "a", "name": "Bob"},
            {"player_id": "b", "name": "Ann"},
        ]),
    )
    .collection;
    let opts = ProjectOptions {
        filter_text: "an".to_string(),
        ..ProjectOptions::default()
    };
    assert_eq!(keys(&project(&collection, &opts)), vec!["b"]);
}
