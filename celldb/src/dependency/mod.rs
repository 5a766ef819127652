//! Formula dependency ordering and per-row formula resolution.

use crate::document::{CellValue, ColumnValues};
use crate::error::{CellDbError, Result};
use crate::formula::{self, Evaluator, Expr};
use crate::schema::{DatabaseContent, DatabaseRow, PropertyDef, PropertyKind};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Column names referenced by a formula, excluding built-in function names.
pub fn extract_column_references(expression: &str) -> Result<BTreeSet<String>> {
    let expr = formula::parse(expression)?;
    Ok(references_in(&expr))
}

fn references_in(expr: &Expr) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    expr.walk(&mut |node| {
        if let Expr::Ident(name) = node {
            if !formula::is_builtin(name) {
                refs.insert(name.clone());
            }
        }
    });
    refs
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Visiting,
    Visited,
}

/// Order nodes so that every node comes after the nodes it depends on.
///
/// Only edges whose target is itself a key are followed; anything else is a leaf.
/// A cycle fails with [`CellDbError::CircularReference`] carrying the cycle path.
pub fn topological_sort(dependencies: &[(String, Vec<String>)]) -> Result<Vec<String>> {
    let graph: HashMap<&str, &[String]> = dependencies
        .iter()
        .map(|(id, deps)| (id.as_str(), deps.as_slice()))
        .collect();
    let mut state = HashMap::new();
    let mut stack = Vec::new();
    let mut order = Vec::with_capacity(dependencies.len());

    for (id, _) in dependencies {
        visit(id, &graph, &mut state, &mut stack, &mut order)?;
    }
    Ok(order)
}

fn visit<'a>(
    id: &'a str,
    graph: &HashMap<&'a str, &'a [String]>,
    state: &mut HashMap<&'a str, VisitState>,
    stack: &mut Vec<&'a str>,
    order: &mut Vec<String>,
) -> Result<()> {
    match state.get(id) {
        Some(VisitState::Visited) => return Ok(()),
        Some(VisitState::Visiting) => {
            let start = stack.iter().position(|s| *s == id).unwrap_or(0);
            let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(id.to_string());
            return Err(CellDbError::CircularReference(cycle));
        }
        None => {}
    }

    state.insert(id, VisitState::Visiting);
    stack.push(id);
    if let Some(deps) = graph.get(id) {
        for dep in deps.iter() {
            if graph.contains_key(dep.as_str()) {
                visit(dep.as_str(), graph, state, stack, order)?;
            }
        }
    }
    stack.pop();
    state.insert(id, VisitState::Visited);
    order.push(id.to_string());
    Ok(())
}

/// Computed formula values for every row, with per-cell errors kept alongside.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaResolution {
    /// Formula property ids in evaluation order (cyclic columns excluded)
    pub order: Vec<String>,
    /// row id -> formula property id -> value
    pub values: BTreeMap<String, BTreeMap<String, CellValue>>,
    /// row id -> formula property id -> error message
    pub errors: BTreeMap<String, BTreeMap<String, String>>,
}

impl FormulaResolution {
    pub fn value(&self, row_id: &str, property_id: &str) -> Option<&CellValue> {
        self.values.get(row_id).and_then(|row| row.get(property_id))
    }

    pub fn error(&self, row_id: &str, property_id: &str) -> Option<&str> {
        self.errors
            .get(row_id)
            .and_then(|row| row.get(property_id))
            .map(String::as_str)
    }
}

/// Formula columns of one document, parsed and ordered for evaluation.
#[derive(Debug, Clone)]
pub struct FormulaPlan {
    steps: Vec<FormulaStep>,
    /// Columns that cannot be evaluated, with the message reported on every row
    failed: BTreeMap<String, String>,
}

/// One formula column, in dependency order.
#[derive(Debug, Clone)]
struct FormulaStep {
    id: String,
    /// None for a blank expression
    expr: Option<Expr>,
    /// Formula columns this one reads
    deps: Vec<String>,
}

impl FormulaPlan {
    pub fn new(properties: &[PropertyDef]) -> Self {
        let formulas: Vec<(&PropertyDef, &str)> = properties
            .iter()
            .filter_map(|p| p.formula_expression().map(|e| (p, e)))
            .collect();

        let id_by_name: HashMap<&str, &str> = formulas
            .iter()
            .rev()
            .map(|(p, _)| (p.name.as_str(), p.id.as_str()))
            .collect();
        let name_by_id: HashMap<&str, &str> = formulas
            .iter()
            .map(|(p, _)| (p.id.as_str(), p.name.as_str()))
            .collect();

        let mut parsed: HashMap<String, Option<Expr>> = HashMap::new();
        let mut failed = BTreeMap::new();
        let mut graph: Vec<(String, Vec<String>)> = Vec::new();

        for (prop, expression) in &formulas {
            let mut deps = Vec::new();
            if expression.trim().is_empty() {
                parsed.insert(prop.id.clone(), None);
            } else {
                match formula::parse(expression) {
                    Ok(expr) => {
                        deps = references_in(&expr)
                            .iter()
                            .filter_map(|name| id_by_name.get(name.as_str()))
                            .map(|id| id.to_string())
                            .collect();
                        parsed.insert(prop.id.clone(), Some(expr));
                    }
                    Err(e) => {
                        failed.insert(prop.id.clone(), e.to_string());
                    }
                }
            }
            graph.push((prop.id.clone(), deps));
        }

        let all_deps: HashMap<String, Vec<String>> = graph.iter().cloned().collect();

        // Peel off cycles one at a time until the rest sorts cleanly
        let order = loop {
            match topological_sort(&graph) {
                Ok(order) => break order,
                Err(CellDbError::CircularReference(cycle)) => {
                    let names: Vec<String> = cycle
                        .iter()
                        .map(|id| {
                            name_by_id
                                .get(id.as_str())
                                .copied()
                                .unwrap_or(id.as_str())
                                .to_string()
                        })
                        .collect();
                    let message = CellDbError::CircularReference(names).to_string();
                    log::debug!("Removing formula cycle from evaluation: {message}");
                    let members: HashSet<&String> = cycle.iter().collect();
                    for id in &members {
                        failed.insert((*id).clone(), message.clone());
                    }
                    graph.retain(|(id, _)| !members.contains(id));
                }
                Err(other) => {
                    // topological_sort only fails with cycles
                    log::warn!("Unexpected formula ordering failure: {other}");
                    break Vec::new();
                }
            }
        };

        let mut steps = Vec::with_capacity(order.len());
        for id in order {
            if failed.contains_key(&id) {
                continue;
            }
            // A column downstream of a cycle fails with the cycle's message
            let upstream_failure = all_deps
                .get(&id)
                .into_iter()
                .flatten()
                .find_map(|dep| failed.get(dep).cloned());
            if let Some(message) = upstream_failure {
                failed.insert(id, message);
                continue;
            }
            let expr = parsed.remove(&id).flatten();
            let deps = all_deps.get(&id).cloned().unwrap_or_default();
            steps.push(FormulaStep { id, expr, deps });
        }

        FormulaPlan { steps, failed }
    }

    pub fn order(&self) -> Vec<String> {
        self.steps.iter().map(|step| step.id.clone()).collect()
    }

    /// Evaluate every formula for every row. `computed` supplies relation and
    /// rollup values, which formulas may reference.
    pub fn resolve(
        &self,
        content: &DatabaseContent,
        computed: &ColumnValues,
        evaluator: &Evaluator,
    ) -> FormulaResolution {
        let mut resolution = FormulaResolution {
            order: self.order(),
            ..FormulaResolution::default()
        };

        for row in &content.rows {
            let mut context = row_context(content, row, computed);
            let mut row_values = BTreeMap::new();
            let mut row_errors = BTreeMap::new();

            for (id, message) in &self.failed {
                row_errors.insert(id.clone(), message.clone());
            }

            for step in &self.steps {
                // A failed input fails this cell with the same message
                let upstream_error = step
                    .deps
                    .iter()
                    .find_map(|dep| row_errors.get(dep).cloned());
                if let Some(message) = upstream_error {
                    row_errors.insert(step.id.clone(), message);
                    continue;
                }

                let result = match &step.expr {
                    Some(expr) => evaluator.evaluate(expr, &context),
                    None => Ok(CellValue::Null),
                };
                match result {
                    Ok(value) => {
                        if let Some(prop) = content.property(&step.id) {
                            context.insert(prop.name.clone(), value.clone());
                        }
                        row_values.insert(step.id.clone(), value);
                    }
                    Err(e) => {
                        row_errors.insert(step.id.clone(), e.to_string());
                    }
                }
            }

            if !row_errors.is_empty() {
                resolution.errors.insert(row.id.clone(), row_errors);
            }
            resolution.values.insert(row.id.clone(), row_values);
        }

        resolution
    }
}

/// Resolve all formula columns of `content`.
pub fn resolve_formulas(
    content: &DatabaseContent,
    computed: &ColumnValues,
    evaluator: &Evaluator,
) -> FormulaResolution {
    FormulaPlan::new(&content.properties).resolve(content, computed, evaluator)
}

/// Formula-facing view of a row: property name -> value.
///
/// Select cells show their option label, multiSelect cells their labels, and
/// computed columns their value from `computed`. Formula columns start out null
/// and are filled in as they are evaluated.
pub fn row_context(
    content: &DatabaseContent,
    row: &DatabaseRow,
    computed: &ColumnValues,
) -> HashMap<String, CellValue> {
    let mut context = HashMap::with_capacity(content.properties.len());
    for prop in &content.properties {
        if context.contains_key(&prop.name) {
            continue;
        }
        let raw = row.cell(&prop.id);
        let value = match &prop.kind {
            PropertyKind::Select { .. } => match raw {
                CellValue::Text(id) => prop
                    .option_label(id)
                    .map(CellValue::text)
                    .unwrap_or_else(|| raw.clone()),
                other => other.clone(),
            },
            PropertyKind::MultiSelect { .. } => CellValue::List(
                raw.as_id_list()
                    .iter()
                    .map(|id| prop.option_label(id).unwrap_or(id).to_string())
                    .collect(),
            ),
            PropertyKind::Checkbox => CellValue::Bool(raw.is_truthy()),
            PropertyKind::Relation(_) | PropertyKind::Rollup(_) => computed
                .get(&prop.id)
                .and_then(|rows| rows.get(&row.id))
                .cloned()
                .unwrap_or_else(|| raw.clone()),
            PropertyKind::Formula { .. } => CellValue::Null,
            _ => raw.clone(),
        };
        context.insert(prop.name.clone(), value);
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_content_str;
    use chrono::NaiveDate;

    fn deps(pairs: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    fn evaluator() -> Evaluator {
        Evaluator::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    #[test]
    fn test_extract_column_references() {
        let refs = extract_column_references("if(Score > 3, `Full Name`, lower(Tag)) + now()").unwrap();
        let expected: BTreeSet<String> = ["Full Name", "Score", "Tag"].iter().map(|s| s.to_string()).collect();
        assert_eq!(refs, expected);
        assert!(extract_column_references("1 +").is_err());
    }

    #[test]
    fn test_builtin_names_are_not_references() {
        let refs = extract_column_references("now + trim").unwrap();
        assert!(refs.is_empty());
    }

    #[test]
    fn test_topological_sort_orders_dependencies_first() {
        let order = topological_sort(&deps(&[("c", &["b"]), ("b", &["a"]), ("a", &[])])).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_topological_sort_ignores_leaf_edges() {
        let order = topological_sort(&deps(&[("f", &["Score", "g"]), ("g", &["Name"])])).unwrap();
        assert_eq!(order, vec!["g", "f"]);
    }

    #[test]
    fn test_self_reference_is_circular() {
        match topological_sort(&deps(&[("a", &["a"])])) {
            Err(CellDbError::CircularReference(cycle)) => assert_eq!(cycle, vec!["a", "a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_cycles_of_any_length_are_detected() {
        for len in 2..6 {
            let ids: Vec<String> = (0..len).map(|i| format!("n{i}")).collect();
            let graph: Vec<(String, Vec<String>)> = ids
                .iter()
                .enumerate()
                .map(|(i, id)| (id.clone(), vec![ids[(i + 1) % len].clone()]))
                .collect();
            let err = topological_sort(&graph).unwrap_err();
            assert!(err.to_string().starts_with("Circular reference"), "{err}");
        }
    }

    const CONTENT: &str = r#"{
        "properties": [
            { "id": "name", "name": "Name", "type": "text" },
            { "id": "score", "name": "Score", "type": "number" },
            { "id": "total", "name": "Total", "type": "formula", "formulaExpression": "Bonus + 1" },
            { "id": "bonus", "name": "Bonus", "type": "formula", "formulaExpression": "Score * 2" },
            { "id": "loop-a", "name": "A", "type": "formula", "formulaExpression": "B" },
            { "id": "loop-b", "name": "B", "type": "formula", "formulaExpression": "A" },
            { "id": "after", "name": "After", "type": "formula", "formulaExpression": "A + 1" },
            { "id": "bad", "name": "Bad", "type": "formula", "formulaExpression": "Score +" },
            { "id": "div", "name": "Div", "type": "formula", "formulaExpression": "10 / Score" }
        ],
        "rows": [
            { "id": "r1", "cells": { "name": "A", "score": 5 } },
            { "id": "r2", "cells": { "name": "B" } }
        ],
        "views": []
    }"#;

    #[test]
    fn test_resolve_formulas_in_dependency_order() {
        let content = parse_content_str(CONTENT).unwrap();
        let resolution = resolve_formulas(&content, &ColumnValues::new(), &evaluator());

        assert_eq!(resolution.value("r1", "bonus"), Some(&CellValue::Number(10.0)));
        assert_eq!(resolution.value("r1", "total"), Some(&CellValue::Number(11.0)));
        // null Score coerces to 0
        assert_eq!(resolution.value("r2", "bonus"), Some(&CellValue::Number(0.0)));
        assert_eq!(resolution.value("r1", "div"), Some(&CellValue::Number(2.0)));
    }

    #[test]
    fn test_errors_are_per_cell() {
        let content = parse_content_str(CONTENT).unwrap();
        let resolution = resolve_formulas(&content, &ColumnValues::new(), &evaluator());

        assert_eq!(resolution.error("r2", "div"), Some("Division by zero"));
        assert_eq!(resolution.error("r1", "div"), None);
        assert!(resolution.error("r1", "bad").unwrap().starts_with("Parse error"));
        // other columns of the same row still resolve
        assert_eq!(resolution.value("r2", "total"), Some(&CellValue::Number(1.0)));
    }

    #[test]
    fn test_row_errors_reach_dependent_formulas() {
        let content = parse_content_str(
            r#"{
            "properties": [
                { "id": "score", "name": "Score", "type": "number" },
                { "id": "ratio", "name": "Ratio", "type": "formula", "formulaExpression": "Div + 1" },
                { "id": "div", "name": "Div", "type": "formula", "formulaExpression": "10 / Score" },
                { "id": "label", "name": "Label", "type": "formula", "formulaExpression": "concat(\"r=\", Ratio)" },
                { "id": "plain", "name": "Plain", "type": "formula", "formulaExpression": "Score + 1" }
            ],
            "rows": [
                { "id": "r1", "cells": { "score": 5 } },
                { "id": "r2", "cells": {} }
            ]
        }"#,
        )
        .unwrap();
        let resolution = resolve_formulas(&content, &ColumnValues::new(), &evaluator());

        assert_eq!(resolution.error("r2", "div"), Some("Division by zero"));
        assert_eq!(resolution.error("r2", "ratio"), Some("Division by zero"));
        assert_eq!(resolution.error("r2", "label"), Some("Division by zero"));
        assert_eq!(resolution.value("r2", "ratio"), None);
        assert_eq!(resolution.value("r2", "plain"), Some(&CellValue::Number(1.0)));

        // the same columns resolve on a row where the division succeeds
        assert_eq!(resolution.value("r1", "ratio"), Some(&CellValue::Number(3.0)));
        assert_eq!(resolution.value("r1", "label"), Some(&CellValue::text("r=3")));
        assert_eq!(resolution.error("r1", "ratio"), None);
    }

    #[test]
    fn test_cycle_fails_only_affected_columns() {
        let content = parse_content_str(CONTENT).unwrap();
        let resolution = resolve_formulas(&content, &ColumnValues::new(), &evaluator());

        let a = resolution.error("r1", "loop-a").unwrap();
        assert!(a.starts_with("Circular reference: "), "{a}");
        assert!(a.contains("A") && a.contains("B"));
        assert!(resolution.error("r1", "loop-b").is_some());
        assert!(resolution
            .error("r1", "after")
            .unwrap()
            .starts_with("Circular reference"));
        assert!(!resolution.order.contains(&"loop-a".to_string()));
        assert_eq!(resolution.value("r1", "bonus"), Some(&CellValue::Number(10.0)));
    }

    #[test]
    fn test_row_context_uses_labels() {
        let content = parse_content_str(
            r#"{
            "properties": [
                { "id": "s", "name": "Status", "type": "select",
                  "options": [{ "id": "o1", "label": "Done", "color": "" }] },
                { "id": "t", "name": "Tags", "type": "multiSelect",
                  "options": [{ "id": "t1", "label": "red", "color": "" }, { "id": "t2", "label": "blue", "color": "" }] },
                { "id": "c", "name": "Checked", "type": "checkbox" },
                { "id": "f", "name": "Label", "type": "formula",
                  "formulaExpression": "if(Status == \"Done\" and not Checked, Tags, \"-\")" }
            ],
            "rows": [{ "id": "r", "cells": { "s": "o1", "t": ["t1", "t2"] } }]
        }"#,
        )
        .unwrap();
        let resolution = resolve_formulas(&content, &ColumnValues::new(), &evaluator());
        assert_eq!(resolution.value("r", "f"), Some(&CellValue::text("red, blue")));
    }
}
