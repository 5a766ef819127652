//! View materialization: the full pipeline for one (content, view) pair.
//!
//! relations -> rollups -> formulas -> filter -> sort -> group, with footer
//! summaries over the filtered and sorted rows. Every call builds a fresh
//! [`MaterializedView`]; nothing is cached between calls except the documents
//! held in the caller's [`DocumentCache`].

use crate::config::EngineConfig;
use crate::dependency::{resolve_formulas, FormulaResolution};
use crate::document::{CellValue, ColumnValues};
use crate::error::{CellDbError, Result};
use crate::filter::{group_rows, matches_filters, matching_conditional_style, sort_rows, RowGroup};
use crate::formula::Evaluator;
use crate::relation::{resolve_relations, DocumentCache, RelationResolution, RelationTarget};
use crate::rollup::resolve_rollups;
use crate::schema::{
    ConditionalStyle, DatabaseContent, DatabaseRow, DatabaseView, PropertyDef, PropertyKind,
    ViewConfig, ViewType,
};
use crate::store::DocumentStore;
use crate::summary::summarize_values;
use serde::Serialize;
use std::collections::BTreeMap;

/// Derived values of every computed column of a document.
#[derive(Debug, Clone, Default)]
pub struct ComputedValues {
    pub relations: RelationResolution,
    pub rollups: ColumnValues,
    pub formulas: FormulaResolution,
}

impl ComputedValues {
    /// Resolve relations, then rollups, then formulas (which may read both).
    pub fn compute<S: DocumentStore + ?Sized>(
        content: &DatabaseContent,
        store: &S,
        cache: &mut DocumentCache,
        evaluator: &Evaluator,
    ) -> Self {
        let relations = resolve_relations(content, store, cache);
        let rollups = resolve_rollups(content, &relations, store, cache, evaluator);

        let mut linked = relations.column_values();
        linked.extend(rollups.iter().map(|(k, v)| (k.clone(), v.clone())));
        let formulas = resolve_formulas(content, &linked, evaluator);

        ComputedValues {
            relations,
            rollups,
            formulas,
        }
    }

    /// The value filters, sorts, groups and summaries see for a cell: the
    /// computed value for formula, rollup and relation columns, the stored
    /// cell otherwise. A formula cell that failed reads as null.
    pub fn value_of(&self, property: &PropertyDef, row: &DatabaseRow) -> CellValue {
        match &property.kind {
            PropertyKind::Formula { .. } => self
                .formulas
                .value(&row.id, &property.id)
                .cloned()
                .unwrap_or_default(),
            PropertyKind::Rollup(_) => self
                .rollups
                .get(&property.id)
                .and_then(|rows| rows.get(&row.id))
                .cloned()
                .unwrap_or_default(),
            PropertyKind::Relation(_) => match self.relations.values.get(&property.id) {
                Some(rows) => CellValue::List(rows.get(&row.id).cloned().unwrap_or_default()),
                None => row.cell(&property.id).clone(),
            },
            _ => row.cell(&property.id).clone(),
        }
    }

    fn value_by_id(&self, content: &DatabaseContent, property_id: &str, row: &DatabaseRow) -> CellValue {
        match content.property(property_id) {
            Some(property) => self.value_of(property, row),
            None => row.cell(property_id).clone(),
        }
    }
}

/// The result of materializing one view: row order, grouping and every
/// derived value the renderer needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializedView {
    pub view_id: String,
    pub view_name: String,
    pub view_type: ViewType,
    /// Rows passing the view's filters, in sorted order
    pub row_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<RowGroup>>,
    /// row id -> formula property id -> value
    pub formula_values: BTreeMap<String, BTreeMap<String, CellValue>>,
    /// row id -> formula property id -> error message
    pub formula_errors: BTreeMap<String, BTreeMap<String, String>>,
    /// relation property id -> row id -> linked row ids
    pub relation_values: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    pub relation_targets: BTreeMap<String, Vec<RelationTarget>>,
    /// rollup property id -> row id -> value
    pub rollup_values: ColumnValues,
    /// property id -> footer text
    pub summaries: BTreeMap<String, String>,
    /// row id -> property id -> style of the first matching conditional format
    pub conditional_styles: BTreeMap<String, BTreeMap<String, ConditionalStyle>>,
    /// Presentation settings, carried through unchanged
    pub config: ViewConfig,
}

/// Materialize `view` from already-computed values. Pure; performs no I/O.
pub fn materialize_with(
    content: &DatabaseContent,
    view: &DatabaseView,
    computed: &ComputedValues,
    config: &EngineConfig,
) -> MaterializedView {
    let mut rows: Vec<&DatabaseRow> = content
        .rows
        .iter()
        .filter(|row| {
            matches_filters(&view.filters, &content.properties, |property_id| {
                computed.value_by_id(content, property_id, row)
            })
        })
        .collect();

    sort_rows(&mut rows, &view.sorts, |row, property_id| {
        computed.value_by_id(content, property_id, row)
    });

    let mut summaries = BTreeMap::new();
    for (property_id, aggregation) in &view.property_summaries {
        let Some(property) = content.property(property_id) else {
            log::debug!("Skipping summary for unknown property {property_id}");
            continue;
        };
        let values: Vec<CellValue> = rows.iter().map(|row| computed.value_of(property, row)).collect();
        summaries.insert(
            property_id.clone(),
            summarize_values(&values, *aggregation, property),
        );
    }

    let groups = view
        .config
        .group_by_property_id
        .as_deref()
        .and_then(|id| content.property(id))
        .map(|property| {
            group_rows(&rows, property, &config.no_value_label, |row| {
                computed.value_of(property, row)
            })
        });

    let mut conditional_styles: BTreeMap<String, BTreeMap<String, ConditionalStyle>> = BTreeMap::new();
    for property in content.properties.iter().filter(|p| !p.conditional_formats.is_empty()) {
        for row in &rows {
            let value = computed.value_of(property, row);
            if let Some(style) = matching_conditional_style(&value, property) {
                conditional_styles
                    .entry(row.id.clone())
                    .or_default()
                    .insert(property.id.clone(), style.clone());
            }
        }
    }

    MaterializedView {
        view_id: view.id.clone(),
        view_name: view.name.clone(),
        view_type: view.view_type,
        row_ids: rows.iter().map(|row| row.id.clone()).collect(),
        groups,
        formula_values: computed.formulas.values.clone(),
        formula_errors: computed.formulas.errors.clone(),
        relation_values: computed.relations.values.clone(),
        relation_targets: computed.relations.targets.clone(),
        rollup_values: computed.rollups.clone(),
        summaries,
        conditional_styles,
        config: view.config.clone(),
    }
}

/// Compute all derived values and materialize the view `view_id`.
///
/// Related documents are read through `cache`, loading from `store` on a miss.
pub fn materialize<S: DocumentStore + ?Sized>(
    content: &DatabaseContent,
    view_id: &str,
    store: &S,
    cache: &mut DocumentCache,
    config: &EngineConfig,
) -> Result<MaterializedView> {
    let view = content
        .view(view_id)
        .ok_or_else(|| CellDbError::ViewNotFound(view_id.to_string()))?;
    let evaluator = Evaluator::new(config.today());
    let computed = ComputedValues::compute(content, store, cache, &evaluator);
    Ok(materialize_with(content, view, &computed, config))
}

/// Materialize every view of `content`, sharing one computation pass.
pub fn materialize_all<S: DocumentStore + ?Sized>(
    content: &DatabaseContent,
    store: &S,
    cache: &mut DocumentCache,
    config: &EngineConfig,
) -> Vec<MaterializedView> {
    let evaluator = Evaluator::new(config.today());
    let computed = ComputedValues::compute(content, store, cache, &evaluator);
    content
        .views
        .iter()
        .map(|view| materialize_with(content, view, &computed, config))
        .collect()
}

/// Entry point for hosts after any mutation: drops every cached related
/// document and materializes the view from scratch.
pub fn recompute<S: DocumentStore + ?Sized>(
    content: &DatabaseContent,
    view_id: &str,
    store: &S,
    cache: &mut DocumentCache,
    config: &EngineConfig,
) -> Result<MaterializedView> {
    cache.clear();
    materialize(content, view_id, store, cache, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::update_back_relation;
    use crate::schema::parse_content_str;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn config() -> EngineConfig {
        EngineConfig {
            today: NaiveDate::from_ymd_opt(2024, 6, 1),
            ..EngineConfig::default()
        }
    }

    const SCORES: &str = r#"{
        "properties": [
            { "id": "name", "name": "Name", "type": "text" },
            { "id": "score", "name": "Score", "type": "number",
              "conditionalFormats": [
                { "operator": "gte", "value": 5, "style": { "backgroundColor": "green" } }
              ] },
            { "id": "bonus", "name": "Bonus", "type": "formula", "formulaExpression": "Score * 2" },
            { "id": "level", "name": "Level", "type": "select",
              "options": [{ "id": "hi", "label": "High", "color": "" },
                          { "id": "lo", "label": "Low", "color": "" }] },
            { "id": "stamp", "name": "Stamp", "type": "formula", "formulaExpression": "now()" }
        ],
        "rows": [
            { "id": "a", "cells": { "name": "A", "score": 5, "level": "hi" } },
            { "id": "b", "cells": { "name": "B" } },
            { "id": "c", "cells": { "name": "C", "score": 1, "level": "lo" } }
        ],
        "views": [
            { "id": "table", "name": "Table", "type": "table",
              "sorts": [{ "propertyId": "bonus", "direction": "desc" }],
              "propertySummaries": { "score": "sum", "bonus": "countValues" },
              "config": { "groupByPropertyId": "level", "hiddenProperties": ["stamp"] } },
            { "id": "board", "name": "Board", "type": "board",
              "filters": [{ "propertyId": "bonus", "operator": "gt", "value": 0 }],
              "propertySummaries": { "name": "count" } }
        ]
    }"#;

    #[test]
    fn test_end_to_end_formula_values() {
        let content = parse_content_str(SCORES).unwrap();
        let store = MemoryStore::new();
        let view = materialize(&content, "table", &store, &mut DocumentCache::new(), &config()).unwrap();

        assert_eq!(view.formula_values["a"]["bonus"], CellValue::Number(10.0));
        assert_eq!(view.formula_values["b"]["bonus"], CellValue::Number(0.0));
        assert!(view.formula_errors.is_empty());
        assert_eq!(view.formula_values["c"]["stamp"], CellValue::text("2024-06-01"));
    }

    #[test]
    fn test_sort_group_and_summaries() {
        let content = parse_content_str(SCORES).unwrap();
        let store = MemoryStore::new();
        let view = materialize(&content, "table", &store, &mut DocumentCache::new(), &config()).unwrap();

        // sorted by computed Bonus, descending
        assert_eq!(view.row_ids, vec!["a", "c", "b"]);
        let groups = view.groups.unwrap();
        let labels: Vec<&str> = groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["High", "Low", "No value"]);
        assert_eq!(view.summaries["score"], "6");
        assert_eq!(view.summaries["bonus"], "3");
        assert_eq!(view.config.hidden_properties, vec!["stamp"]);
        assert_eq!(
            view.conditional_styles["a"]["score"].background_color.as_deref(),
            Some("green")
        );
        assert!(!view.conditional_styles.contains_key("c"));
    }

    #[test]
    fn test_filters_use_formula_values_and_summaries_follow_filter() {
        let content = parse_content_str(SCORES).unwrap();
        let store = MemoryStore::new();
        let view = materialize(&content, "board", &store, &mut DocumentCache::new(), &config()).unwrap();

        assert_eq!(view.row_ids, vec!["a", "c"]);
        assert_eq!(view.summaries["name"], "2");
        assert!(view.groups.is_none());
    }

    #[test]
    fn test_materialization_is_idempotent() {
        let content = parse_content_str(SCORES).unwrap();
        let store = MemoryStore::new();
        let mut cache = DocumentCache::new();
        let first = materialize(&content, "table", &store, &mut cache, &config()).unwrap();
        let second = recompute(&content, "table", &store, &mut cache, &config()).unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_unknown_view() {
        let content = parse_content_str(SCORES).unwrap();
        let err = materialize(&content, "nope", &MemoryStore::new(), &mut DocumentCache::new(), &config())
            .unwrap_err();
        assert!(matches!(err, CellDbError::ViewNotFound(_)));
    }

    #[test]
    fn test_materialize_all_views() {
        let content = parse_content_str(SCORES).unwrap();
        let views = materialize_all(&content, &MemoryStore::new(), &mut DocumentCache::new(), &config());
        let ids: Vec<&str> = views.iter().map(|v| v.view_id.as_str()).collect();
        assert_eq!(ids, vec!["table", "board"]);
    }

    const TEAMS: &str = r#"{
        "properties": [
            { "id": "t-name", "name": "Team", "type": "text" },
            { "id": "t-people", "name": "People", "type": "relation",
              "relationConfig": { "databasePageId": "people", "direction": "back",
                                  "backRelationPropertyId": "p-team" } },
            { "id": "t-headcount", "name": "Headcount", "type": "rollup",
              "rollupConfig": { "relationPropertyId": "t-people", "targetPropertyId": "p-name",
                                "aggregation": "countValues" } },
            { "id": "t-label", "name": "Label", "type": "formula",
              "formulaExpression": "Team + \" (\" + Headcount + \")\"" }
        ],
        "rows": [
            { "id": "red", "cells": { "t-name": "Red" } },
            { "id": "blue", "cells": { "t-name": "Blue" } }
        ],
        "views": [
            { "id": "staffed", "name": "Staffed", "type": "list",
              "filters": [{ "propertyId": "t-people", "operator": "isNotEmpty" }] }
        ]
    }"#;

    const PEOPLE: &str = r#"{
        "properties": [
            { "id": "p-name", "name": "Name", "type": "text" },
            { "id": "p-team", "name": "Team", "type": "relation",
              "relationConfig": { "databasePageId": "teams" } }
        ],
        "rows": [
            { "id": "ann", "cells": { "p-name": "Ann", "p-team": ["red"] } },
            { "id": "bob", "cells": { "p-name": "Bob" } }
        ]
    }"#;

    #[test]
    fn test_back_relations_rollups_and_formulas_together() {
        let store = MemoryStore::new();
        store.insert_json("people", PEOPLE).unwrap();
        let teams = parse_content_str(TEAMS).unwrap();
        let mut cache = DocumentCache::new();

        let view = materialize(&teams, "staffed", &store, &mut cache, &config()).unwrap();
        assert_eq!(view.row_ids, vec!["red"]);
        assert_eq!(view.rollup_values["t-headcount"]["red"], CellValue::Number(1.0));
        assert_eq!(view.formula_values["red"]["t-label"], CellValue::text("Red (1)"));
        // no linked rows: the rollup is null, which concatenates as ""
        assert_eq!(view.formula_values["blue"]["t-label"], CellValue::text("Blue ()"));

        let bob = vec!["bob".to_string()];
        update_back_relation(&store, &mut cache, &teams, "t-people", "blue", &bob).unwrap();
        let view = recompute(&teams, "staffed", &store, &mut cache, &config()).unwrap();
        assert_eq!(view.row_ids, vec!["red", "blue"]);
        assert_eq!(view.relation_values["t-people"]["blue"], vec!["bob"]);
    }
}
