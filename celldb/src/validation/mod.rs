use crate::dependency::extract_column_references;
use crate::document::CellValue;
use crate::error::{CellDbError, Result};
use crate::schema::{DatabaseContent, DatabaseView, PropertyDef, PropertyKind};
use crate::summary::is_valid_aggregation;
use serde::Serialize;
use std::collections::HashSet;

/// Result of validating a database document
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Validate the structure of a database document.
///
/// Duplicate ids and rollups over non-relations are always errors. Everything
/// else (stray cells, type mismatches, broken formulas, views naming missing
/// properties) is an error in strict mode and a warning otherwise.
pub fn validate_content(content: &DatabaseContent, strict: bool) -> ValidationResult {
    let mut result = ValidationResult::default();

    check_unique(
        content.properties.iter().map(|p| p.id.as_str()),
        "property id",
        &mut result,
    );
    check_unique(content.rows.iter().map(|r| r.id.as_str()), "row id", &mut result);
    check_unique(content.views.iter().map(|v| v.id.as_str()), "view id", &mut result);

    let mut names = HashSet::new();
    for prop in &content.properties {
        if !names.insert(prop.name.as_str()) {
            add_issue(
                &mut result,
                strict,
                format!("Property name '{}' is used more than once; formulas see the first", prop.name),
            );
        }
        validate_property(content, prop, strict, &mut result);
    }

    if content.views.is_empty() {
        add_issue(&mut result, strict, "Database has no views".to_string());
    }
    for view in &content.views {
        validate_view(content, view, strict, &mut result);
    }

    for row in &content.rows {
        for (property_id, value) in &row.cells {
            match content.property(property_id) {
                None => add_issue(
                    &mut result,
                    strict,
                    format!("Row '{}' has a cell for unknown property '{property_id}'", row.id),
                ),
                Some(prop) => validate_cell(prop, &row.id, value, strict, &mut result),
            }
        }
    }

    result
}

fn check_unique<'a>(ids: impl Iterator<Item = &'a str>, what: &str, result: &mut ValidationResult) {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            result.errors.push(format!("Duplicate {what} '{id}'"));
        }
    }
}

fn validate_property(
    content: &DatabaseContent,
    prop: &PropertyDef,
    strict: bool,
    result: &mut ValidationResult,
) {
    match &prop.kind {
        PropertyKind::Select { options } | PropertyKind::MultiSelect { options } => {
            check_unique(
                options.iter().map(|o| o.id.as_str()),
                &format!("option id in '{}'", prop.name),
                result,
            );
        }
        PropertyKind::Rollup(config) => {
            match content.property(&config.relation_property_id) {
                Some(relation) if relation.relation_config().is_some() => {}
                Some(other) => result.errors.push(format!(
                    "Rollup '{}' uses '{}', which is not a relation",
                    prop.name, other.name
                )),
                None => result.errors.push(format!(
                    "Rollup '{}' uses unknown relation property '{}'",
                    prop.name, config.relation_property_id
                )),
            }
        }
        PropertyKind::Formula { expression } if !expression.trim().is_empty() => {
            match extract_column_references(expression) {
                Ok(references) => {
                    for name in references {
                        if content.property_by_name(&name).is_none() {
                            add_issue(
                                result,
                                strict,
                                format!("Formula '{}' references unknown column '{name}'", prop.name),
                            );
                        }
                    }
                }
                Err(e) => add_issue(result, strict, format!("Formula '{}': {e}", prop.name)),
            }
        }
        _ => {}
    }
}

fn validate_view(
    content: &DatabaseContent,
    view: &DatabaseView,
    strict: bool,
    result: &mut ValidationResult,
) {
    let mut check = |property_id: &str, role: &str| {
        if content.property(property_id).is_none() {
            add_issue(
                result,
                strict,
                format!("View '{}' {role} unknown property '{property_id}'", view.name),
            );
        }
    };

    for filter in &view.filters {
        check(&filter.property_id, "filters on");
    }
    for sort in &view.sorts {
        check(&sort.property_id, "sorts by");
    }
    if let Some(group_by) = &view.config.group_by_property_id {
        check(group_by, "groups by");
    }
    if let Some(date_property) = &view.config.date_property_id {
        check(date_property, "places rows by");
    }

    for (property_id, aggregation) in &view.property_summaries {
        match content.property(property_id) {
            None => add_issue(
                result,
                strict,
                format!("View '{}' summarizes unknown property '{property_id}'", view.name),
            ),
            Some(prop) if !is_valid_aggregation(prop.property_type(), *aggregation) => add_issue(
                result,
                strict,
                format!(
                    "View '{}' summary {:?} is not available for {} property '{}'",
                    view.name,
                    aggregation,
                    prop.property_type().as_str(),
                    prop.name
                ),
            ),
            Some(_) => {}
        }
    }
}

fn validate_cell(
    prop: &PropertyDef,
    row_id: &str,
    value: &CellValue,
    strict: bool,
    result: &mut ValidationResult,
) {
    if value.is_null() {
        return;
    }
    let field = format!("Row '{row_id}' property '{}'", prop.name);

    if prop.is_computed() {
        add_issue(
            result,
            strict,
            format!("{field} stores a value for a computed {} column", prop.property_type().as_str()),
        );
        return;
    }

    match &prop.kind {
        PropertyKind::Number { .. } => {
            if value.as_number().is_none() && !value.is_empty() {
                add_issue(result, strict, format!("{field} expected number, got {}", type_name(value)));
            }
        }
        PropertyKind::Checkbox => {
            if !matches!(value, CellValue::Bool(_)) {
                add_issue(result, strict, format!("{field} expected boolean, got {}", type_name(value)));
            }
        }
        PropertyKind::Select { .. } => match value {
            CellValue::Text(id) if id.is_empty() || prop.option_label(id).is_some() => {}
            CellValue::Text(id) => {
                add_issue(result, strict, format!("{field} refers to unknown option '{id}'"))
            }
            other => add_issue(
                result,
                strict,
                format!("{field} expected option id, got {}", type_name(other)),
            ),
        },
        PropertyKind::MultiSelect { .. } => match value {
            CellValue::List(ids) => {
                for id in ids {
                    if prop.option_label(id).is_none() {
                        add_issue(result, strict, format!("{field} refers to unknown option '{id}'"));
                    }
                }
            }
            other => add_issue(
                result,
                strict,
                format!("{field} expected list of option ids, got {}", type_name(other)),
            ),
        },
        PropertyKind::Relation(_) => {
            if !matches!(value, CellValue::List(_)) {
                add_issue(
                    result,
                    strict,
                    format!("{field} expected list of row ids, got {}", type_name(value)),
                );
            }
        }
        PropertyKind::Text | PropertyKind::Date | PropertyKind::Url | PropertyKind::PageLink => {
            if matches!(value, CellValue::List(_)) {
                add_issue(result, strict, format!("{field} expected string, got list"));
            }
        }
        PropertyKind::Rollup(_) | PropertyKind::Formula { .. } => {}
    }
}

fn add_issue(result: &mut ValidationResult, strict: bool, message: String) {
    if strict {
        result.errors.push(message);
    } else {
        result.warnings.push(message);
    }
}

fn type_name(value: &CellValue) -> &'static str {
    match value {
        CellValue::Null => "null",
        CellValue::Bool(_) => "boolean",
        CellValue::Number(_) => "number",
        CellValue::Text(_) => "string",
        CellValue::List(_) => "list",
    }
}

/// Validate before a save. Returns the warnings, or an error listing every failure.
pub fn validate_and_prepare(content: &DatabaseContent, strict: bool) -> Result<Vec<String>> {
    let result = validate_content(content, strict);

    if !result.is_ok() {
        return Err(CellDbError::Validation(format!(
            "Database validation failed:\n  - {}",
            result.errors.join("\n  - ")
        )));
    }

    Ok(result.warnings)
}
