// Filter predicates, conditional formats, row ordering and grouping

use crate::document::CellValue;
use crate::schema::{
    ConditionalStyle, DatabaseFilter, DatabaseRow, DatabaseSort, FilterOperator, PropertyDef,
    PropertyKind, SortDirection,
};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Test one cell against a filter operator and operand.
///
/// Unknown operators match everything.
pub fn apply_filter(
    cell: &CellValue,
    operator: &FilterOperator,
    filter_value: &CellValue,
    property: &PropertyDef,
) -> bool {
    match operator {
        FilterOperator::IsEmpty => cell.is_empty(),
        FilterOperator::IsNotEmpty => !cell.is_empty(),
        FilterOperator::Equals => cell_equals(cell, filter_value, property),
        FilterOperator::NotEquals => !cell_equals(cell, filter_value, property),
        FilterOperator::Contains => contains_ignore_case(cell, filter_value),
        FilterOperator::DoesNotContain => !contains_ignore_case(cell, filter_value),
        FilterOperator::Gt => cell.to_number() > filter_value.to_number(),
        FilterOperator::Gte => cell.to_number() >= filter_value.to_number(),
        FilterOperator::Lt => cell.to_number() < filter_value.to_number(),
        FilterOperator::Lte => cell.to_number() <= filter_value.to_number(),
        FilterOperator::Before => {
            !cell.is_empty() && cell.to_display_string() < filter_value.to_display_string()
        }
        FilterOperator::After => {
            !cell.is_empty() && cell.to_display_string() > filter_value.to_display_string()
        }
        FilterOperator::Unknown(name) => {
            log::debug!("Unknown filter operator '{name}' matches all rows");
            true
        }
    }
}

fn cell_equals(cell: &CellValue, filter_value: &CellValue, property: &PropertyDef) -> bool {
    match property.kind {
        PropertyKind::Checkbox => cell.is_truthy() == as_bool(filter_value),
        PropertyKind::MultiSelect { .. } => {
            let needle = filter_value.to_display_string();
            cell.as_id_list().iter().any(|id| *id == needle)
        }
        _ => cell.to_display_string() == filter_value.to_display_string(),
    }
}

fn as_bool(value: &CellValue) -> bool {
    match value {
        CellValue::Text(s) => s.eq_ignore_ascii_case("true"),
        other => other.is_truthy(),
    }
}

fn contains_ignore_case(cell: &CellValue, needle: &CellValue) -> bool {
    cell.to_display_string()
        .to_lowercase()
        .contains(&needle.to_display_string().to_lowercase())
}

/// True when a row passes every filter (filters are AND-combined).
/// `value_of` maps a property id to the row's value for that property.
pub fn matches_filters<F>(filters: &[DatabaseFilter], properties: &[PropertyDef], value_of: F) -> bool
where
    F: Fn(&str) -> CellValue,
{
    filters.iter().all(|filter| {
        match properties.iter().find(|p| p.id == filter.property_id) {
            Some(property) => apply_filter(
                &value_of(&filter.property_id),
                &filter.operator,
                &filter.value,
                property,
            ),
            // A filter on a deleted column no longer constrains anything
            None => true,
        }
    })
}

/// The style of the first conditional format matching `cell`, if any.
pub fn matching_conditional_style<'a>(
    cell: &CellValue,
    property: &'a PropertyDef,
) -> Option<&'a ConditionalStyle> {
    property
        .conditional_formats
        .iter()
        .find(|format| apply_filter(cell, &format.operator, &format.value, property))
        .map(|format| &format.style)
}

/// Total order used by view sorts. Null sorts before every other value.
pub fn compare_cell_values(a: &CellValue, b: &CellValue) -> Ordering {
    match (a, b) {
        (CellValue::Null, CellValue::Null) => Ordering::Equal,
        (CellValue::Null, _) => Ordering::Less,
        (_, CellValue::Null) => Ordering::Greater,
        (CellValue::Number(x), CellValue::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (CellValue::Bool(x), CellValue::Bool(y)) => x.cmp(y),
        (CellValue::List(x), CellValue::List(y)) => locale_compare(&x.join(","), &y.join(",")),
        _ => locale_compare(&a.to_display_string(), &b.to_display_string()),
    }
}

// Case-insensitive first, then case-sensitive as tie-break
fn locale_compare(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Stable multi-key sort. Earlier sorts take priority; `desc` flips the comparison.
pub fn sort_rows<'a, F>(rows: &mut Vec<&'a DatabaseRow>, sorts: &[DatabaseSort], value_of: F)
where
    F: Fn(&DatabaseRow, &str) -> CellValue,
{
    if sorts.is_empty() || rows.len() < 2 {
        return;
    }

    let mut keyed: Vec<(Vec<CellValue>, &'a DatabaseRow)> = rows
        .iter()
        .map(|row| {
            let keys = sorts.iter().map(|s| value_of(row, &s.property_id)).collect();
            (keys, *row)
        })
        .collect();

    keyed.sort_by(|(a, _), (b, _)| {
        for (i, sort) in sorts.iter().enumerate() {
            let ord = compare_cell_values(&a[i], &b[i]);
            let ord = match sort.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });

    *rows = keyed.into_iter().map(|(_, row)| row).collect();
}

/// One group of a grouped view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowGroup {
    /// Option id for select groups, the string form of the value otherwise;
    /// `None` for the trailing no-value group.
    pub key: Option<String>,
    pub label: String,
    pub row_ids: Vec<String>,
}

/// Partition rows by `property`, preserving row order within each group.
///
/// Select groups follow option order; a multiSelect row joins one group per
/// selected option; other types group by string form in first-seen order.
/// Rows without a value land in a trailing group labelled `no_value_label`.
/// Groups without rows are never emitted.
pub fn group_rows<F>(
    rows: &[&DatabaseRow],
    property: &PropertyDef,
    no_value_label: &str,
    value_of: F,
) -> Vec<RowGroup>
where
    F: Fn(&DatabaseRow) -> CellValue,
{
    let mut groups: Vec<RowGroup> = Vec::new();
    let mut no_value = Vec::new();

    match &property.kind {
        PropertyKind::Select { options } | PropertyKind::MultiSelect { options } => {
            let mut members: HashMap<&str, Vec<String>> = HashMap::new();
            for row in rows {
                let value = value_of(row);
                let mut placed = false;
                for id in value.as_id_list() {
                    if let Some(option) = options.iter().find(|o| o.id == id) {
                        let bucket = members.entry(option.id.as_str()).or_default();
                        if !bucket.contains(&row.id) {
                            bucket.push(row.id.clone());
                        }
                        placed = true;
                    }
                }
                if !placed {
                    no_value.push(row.id.clone());
                }
            }
            for option in options {
                if let Some(row_ids) = members.remove(option.id.as_str()) {
                    groups.push(RowGroup {
                        key: Some(option.id.clone()),
                        label: option.label.clone(),
                        row_ids,
                    });
                }
            }
        }
        _ => {
            let mut index: HashMap<String, usize> = HashMap::new();
            for row in rows {
                let value = value_of(row);
                if value.is_empty() {
                    no_value.push(row.id.clone());
                    continue;
                }
                let key = value.to_display_string();
                match index.get(&key) {
                    Some(&i) => groups[i].row_ids.push(row.id.clone()),
                    None => {
                        index.insert(key.clone(), groups.len());
                        groups.push(RowGroup {
                            key: Some(key.clone()),
                            label: key,
                            row_ids: vec![row.id.clone()],
                        });
                    }
                }
            }
        }
    }

    if !no_value.is_empty() {
        groups.push(RowGroup {
            key: None,
            label: no_value_label.to_string(),
            row_ids: no_value,
        });
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ConditionalFormat, PropertyKind, SelectOption};
    use pretty_assertions::assert_eq;

    fn prop(kind: PropertyKind) -> PropertyDef {
        PropertyDef::new("P", kind)
    }

    fn select_prop(multi: bool) -> PropertyDef {
        let options = vec![
            SelectOption { id: "a".into(), label: "Alpha".into(), color: String::new() },
            SelectOption { id: "b".into(), label: "Beta".into(), color: String::new() },
        ];
        if multi {
            prop(PropertyKind::MultiSelect { options })
        } else {
            prop(PropertyKind::Select { options })
        }
    }

    fn row(id: &str, value: CellValue) -> DatabaseRow {
        let mut row = DatabaseRow::new();
        row.id = id.to_string();
        row.set_cell("p", value);
        row
    }

    fn sample_values() -> Vec<CellValue> {
        vec![
            CellValue::Null,
            CellValue::text(""),
            CellValue::text("x"),
            CellValue::Number(0.0),
            CellValue::Number(-2.5),
            CellValue::Bool(false),
            CellValue::Bool(true),
            CellValue::List(vec![]),
            CellValue::list(["a"]),
        ]
    }

    #[test]
    fn test_is_empty_and_is_not_empty_are_complements() {
        let kinds = vec![
            PropertyKind::Text,
            PropertyKind::Number { format: None },
            PropertyKind::Checkbox,
            PropertyKind::Date,
            PropertyKind::MultiSelect { options: vec![] },
            PropertyKind::Formula { expression: String::new() },
        ];
        for kind in kinds {
            let property = prop(kind);
            for value in sample_values() {
                let empty = apply_filter(&value, &FilterOperator::IsEmpty, &CellValue::Null, &property);
                let not_empty =
                    apply_filter(&value, &FilterOperator::IsNotEmpty, &CellValue::Null, &property);
                assert_ne!(empty, not_empty, "{value:?}");
            }
        }
        let text = prop(PropertyKind::Text);
        assert!(apply_filter(&CellValue::List(vec![]), &FilterOperator::IsEmpty, &CellValue::Null, &text));
    }

    #[test]
    fn test_equals_by_property_type() {
        let checkbox = prop(PropertyKind::Checkbox);
        assert!(apply_filter(&CellValue::Null, &FilterOperator::Equals, &CellValue::Bool(false), &checkbox));
        assert!(apply_filter(&CellValue::Bool(true), &FilterOperator::Equals, &CellValue::text("true"), &checkbox));

        let multi = select_prop(true);
        let cell = CellValue::list(["a", "b"]);
        assert!(apply_filter(&cell, &FilterOperator::Equals, &CellValue::text("b"), &multi));
        assert!(apply_filter(&cell, &FilterOperator::NotEquals, &CellValue::text("c"), &multi));

        let number = prop(PropertyKind::Number { format: None });
        assert!(apply_filter(&CellValue::Number(3.0), &FilterOperator::Equals, &CellValue::text("3"), &number));
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let text = prop(PropertyKind::Text);
        let cell = CellValue::text("Hello World");
        assert!(apply_filter(&cell, &FilterOperator::Contains, &CellValue::text("WORLD"), &text));
        assert!(apply_filter(&cell, &FilterOperator::DoesNotContain, &CellValue::text("moon"), &text));
    }

    #[test]
    fn test_numeric_and_date_comparisons() {
        let number = prop(PropertyKind::Number { format: None });
        assert!(apply_filter(&CellValue::text("10"), &FilterOperator::Gt, &CellValue::Number(9.0), &number));
        assert!(apply_filter(&CellValue::Null, &FilterOperator::Lte, &CellValue::Number(0.0), &number));
        assert!(!apply_filter(&CellValue::text("abc"), &FilterOperator::Gte, &CellValue::Number(0.0), &number));

        let date = prop(PropertyKind::Date);
        let cell = CellValue::text("2024-03-01");
        assert!(apply_filter(&cell, &FilterOperator::Before, &CellValue::text("2024-04-01"), &date));
        assert!(apply_filter(&cell, &FilterOperator::After, &CellValue::text("2024-02-29"), &date));
        assert!(!apply_filter(&CellValue::Null, &FilterOperator::Before, &CellValue::text("2024-04-01"), &date));
        assert!(!apply_filter(&CellValue::Null, &FilterOperator::After, &CellValue::text(""), &date));
    }

    #[test]
    fn test_unknown_operator_matches() {
        let text = prop(PropertyKind::Text);
        let op = FilterOperator::from("startsWith".to_string());
        assert!(apply_filter(&CellValue::Null, &op, &CellValue::text("x"), &text));
    }

    #[test]
    fn test_first_matching_conditional_format_wins() {
        let mut property = prop(PropertyKind::Number { format: None });
        let style = |color: &str| ConditionalStyle {
            background_color: Some(color.to_string()),
            ..ConditionalStyle::default()
        };
        property.conditional_formats = vec![
            ConditionalFormat { operator: FilterOperator::Gt, value: CellValue::Number(10.0), style: style("red") },
            ConditionalFormat { operator: FilterOperator::Gt, value: CellValue::Number(5.0), style: style("amber") },
        ];
        let matched = matching_conditional_style(&CellValue::Number(20.0), &property).unwrap();
        assert_eq!(matched.background_color.as_deref(), Some("red"));
        let matched = matching_conditional_style(&CellValue::Number(7.0), &property).unwrap();
        assert_eq!(matched.background_color.as_deref(), Some("amber"));
        assert!(matching_conditional_style(&CellValue::Number(1.0), &property).is_none());
    }

    #[test]
    fn test_compare_null_first() {
        for value in sample_values().into_iter().skip(1) {
            assert_eq!(compare_cell_values(&CellValue::Null, &value), Ordering::Less);
            assert_eq!(compare_cell_values(&value, &CellValue::Null), Ordering::Greater);
        }
        assert_eq!(compare_cell_values(&CellValue::Null, &CellValue::Null), Ordering::Equal);
        assert_eq!(
            compare_cell_values(&CellValue::Number(9.0), &CellValue::Number(10.0)),
            Ordering::Less
        );
        assert_eq!(
            compare_cell_values(&CellValue::text("apple"), &CellValue::text("Banana")),
            Ordering::Less
        );
    }

    #[test]
    fn test_sort_is_stable_for_equal_keys() {
        let rows: Vec<DatabaseRow> = (0..6).map(|i| row(&format!("r{i}"), CellValue::text("same"))).collect();
        let mut refs: Vec<&DatabaseRow> = rows.iter().collect();
        let sorts = vec![DatabaseSort { property_id: "p".into(), direction: SortDirection::Desc }];
        sort_rows(&mut refs, &sorts, |row, id| row.cell(id).clone());
        let ids: Vec<&str> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r0", "r1", "r2", "r3", "r4", "r5"]);
    }

    #[test]
    fn test_multi_key_sort() {
        let mut rows = vec![
            row("a", CellValue::Number(2.0)),
            row("b", CellValue::Null),
            row("c", CellValue::Number(1.0)),
            row("d", CellValue::Number(2.0)),
        ];
        rows[0].set_cell("q", CellValue::text("x"));
        rows[3].set_cell("q", CellValue::text("y"));
        let mut refs: Vec<&DatabaseRow> = rows.iter().collect();
        let sorts = vec![
            DatabaseSort { property_id: "p".into(), direction: SortDirection::Asc },
            DatabaseSort { property_id: "q".into(), direction: SortDirection::Desc },
        ];
        sort_rows(&mut refs, &sorts, |row, id| row.cell(id).clone());
        let ids: Vec<&str> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "d", "a"]);
    }

    #[test]
    fn test_group_by_select_follows_option_order() {
        let property = select_prop(false);
        let rows = vec![
            row("r1", CellValue::text("b")),
            row("r2", CellValue::Null),
            row("r3", CellValue::text("a")),
            row("r4", CellValue::text("b")),
        ];
        let refs: Vec<&DatabaseRow> = rows.iter().collect();
        let groups = group_rows(&refs, &property, "No value", |row| row.cell("p").clone());
        assert_eq!(
            groups,
            vec![
                RowGroup { key: Some("a".into()), label: "Alpha".into(), row_ids: vec!["r3".into()] },
                RowGroup { key: Some("b".into()), label: "Beta".into(), row_ids: vec!["r1".into(), "r4".into()] },
                RowGroup { key: None, label: "No value".into(), row_ids: vec!["r2".into()] },
            ]
        );
    }

    #[test]
    fn test_group_by_multi_select_places_row_in_each_group() {
        let property = select_prop(true);
        let rows = vec![row("r1", CellValue::list(["b", "a"])), row("r2", CellValue::List(vec![]))];
        let refs: Vec<&DatabaseRow> = rows.iter().collect();
        let groups = group_rows(&refs, &property, "None", |row| row.cell("p").clone());
        let summary: Vec<(Option<&str>, Vec<&str>)> = groups
            .iter()
            .map(|g| (g.key.as_deref(), g.row_ids.iter().map(String::as_str).collect()))
            .collect();
        assert_eq!(
            summary,
            vec![(Some("a"), vec!["r1"]), (Some("b"), vec!["r1"]), (None, vec!["r2"])]
        );
    }

    #[test]
    fn test_group_by_other_types_uses_first_seen_order() {
        let property = prop(PropertyKind::Text);
        let rows = vec![
            row("r1", CellValue::text("z")),
            row("r2", CellValue::text("a")),
            row("r3", CellValue::text("z")),
        ];
        let refs: Vec<&DatabaseRow> = rows.iter().collect();
        let groups = group_rows(&refs, &property, "No value", |row| row.cell("p").clone());
        let labels: Vec<&str> = groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["z", "a"]);
        assert_eq!(groups[0].row_ids, vec!["r1", "r3"]);
    }
}
