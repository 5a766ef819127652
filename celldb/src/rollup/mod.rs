use crate::dependency::{resolve_formulas, FormulaResolution};
use crate::document::{CellValue, ColumnValues};
use crate::formula::Evaluator;
use crate::format::resolve_option_label;
use crate::relation::{DocumentCache, RelationResolution};
use crate::schema::{Aggregation, DatabaseContent, PropertyKind, PropertyType, RollupConfig};
use crate::store::DocumentStore;
use crate::summary::aggregate;
use std::collections::{BTreeMap, HashMap};

/// Compute every rollup column of `content`: property id -> row id -> value.
///
/// Linked rows come from `relations`, so a rollup works over forward and
/// back relations alike. A rollup whose relation, target document or target
/// property cannot be found yields null for every row, as does a row with no
/// linked rows.
///
/// Formula targets are evaluated in the target document first. Relation and
/// rollup columns of the target document are not resolved for this.
pub fn resolve_rollups<S: DocumentStore + ?Sized>(
    content: &DatabaseContent,
    relations: &RelationResolution,
    store: &S,
    cache: &mut DocumentCache,
    evaluator: &Evaluator,
) -> ColumnValues {
    let mut columns = ColumnValues::new();
    let mut target_formulas: HashMap<String, FormulaResolution> = HashMap::new();

    for prop in &content.properties {
        let PropertyKind::Rollup(config) = &prop.kind else {
            continue;
        };
        let values = rollup_column(content, config, relations, store, cache, evaluator, &mut target_formulas)
            .unwrap_or_else(|| {
                content
                    .rows
                    .iter()
                    .map(|row| (row.id.clone(), CellValue::Null))
                    .collect()
            });
        columns.insert(prop.id.clone(), values);
    }

    columns
}

fn rollup_column<S: DocumentStore + ?Sized>(
    content: &DatabaseContent,
    config: &RollupConfig,
    relations: &RelationResolution,
    store: &S,
    cache: &mut DocumentCache,
    evaluator: &Evaluator,
    target_formulas: &mut HashMap<String, FormulaResolution>,
) -> Option<BTreeMap<String, CellValue>> {
    let Some(relation) = content
        .property(&config.relation_property_id)
        .and_then(|p| p.relation_config())
    else {
        log::warn!(
            "Rollup relation {} is missing or not a relation",
            config.relation_property_id
        );
        return None;
    };
    let page_id = relation.database_page_id.as_str();
    let target = cache.get(store, page_id)?;
    let Some(target_prop) = target.property(&config.target_property_id) else {
        log::warn!(
            "Rollup target property {} not found in {page_id}",
            config.target_property_id
        );
        return None;
    };

    if target_prop.property_type() == PropertyType::Formula && !target_formulas.contains_key(page_id) {
        let resolution = resolve_formulas(target, &ColumnValues::new(), evaluator);
        target_formulas.insert(page_id.to_string(), resolution);
    }
    let formulas = target_formulas.get(page_id);
    let dates = target_prop.property_type() == PropertyType::Date;

    let mut column = BTreeMap::new();
    for row in &content.rows {
        let linked = relations.linked(&config.relation_property_id, &row.id);
        let mut values: Vec<CellValue> = Vec::with_capacity(linked.len());
        for id in linked {
            let Some(target_row) = target.row(id) else {
                continue;
            };
            let value = match (&target_prop.kind, formulas) {
                (PropertyKind::Formula { .. }, Some(formulas)) => formulas
                    .value(&target_row.id, &target_prop.id)
                    .cloned()
                    .unwrap_or_default(),
                _ => target_row.cell(&target_prop.id).clone(),
            };
            values.push(value);
        }

        let value = if values.is_empty() {
            CellValue::Null
        } else if config.aggregation == Aggregation::ShowOriginal {
            let labels: Vec<CellValue> = values
                .iter()
                .map(|v| CellValue::Text(resolve_option_label(v, target_prop)))
                .collect();
            aggregate(&labels, config.aggregation, dates)
        } else {
            aggregate(&values, config.aggregation, dates)
        };
        column.insert(row.id.clone(), value);
    }

    Some(column)
}
