use super::types::DatabaseContent;
use crate::error::Result;
use std::path::Path;

/// Parse a database document from a JSON file
pub fn parse_content(path: &Path) -> Result<DatabaseContent> {
    let content = std::fs::read_to_string(path)?;
    parse_content_str(&content)
}

/// Parse a database document from a JSON string
pub fn parse_content_str(content: &str) -> Result<DatabaseContent> {
    let content: DatabaseContent = serde_json::from_str(content)?;
    Ok(content)
}

/// Serialize a database document to pretty-printed JSON
pub fn content_to_string(content: &DatabaseContent) -> Result<String> {
    Ok(serde_json::to_string_pretty(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::CellValue;
    use crate::schema::{Aggregation, FilterOperator, PropertyKind, PropertyType};

    const SAMPLE: &str = r##"{
        "properties": [
            { "id": "p-name", "name": "Name", "type": "text", "width": 240 },
            { "id": "p-status", "name": "Status", "type": "select",
              "options": [{ "id": "o-todo", "label": "Todo", "color": "#ef4444" }] },
            { "id": "p-bonus", "name": "Bonus", "type": "formula", "formulaExpression": "Score * 2" },
            { "id": "p-tasks", "name": "Tasks", "type": "relation",
              "relationConfig": { "databasePageId": "page-2", "direction": "back", "backRelationPropertyId": "p-owner" } },
            { "id": "p-total", "name": "Total", "type": "rollup",
              "rollupConfig": { "relationPropertyId": "p-tasks", "targetPropertyId": "p-hours", "aggregation": "percent_empty" } }
        ],
        "rows": [
            { "id": "r1", "cells": { "p-name": "A", "p-status": "o-todo" },
              "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-02T00:00:00Z" }
        ],
        "views": [
            { "id": "v1", "name": "Table", "type": "table",
              "filters": [{ "propertyId": "p-name", "operator": "startsWith", "value": "A" }],
              "config": { "groupByPropertyId": "p-status", "rowHeight": "tall" },
              "propertySummaries": { "p-name": "countValues" } }
        ]
    }"##;

    #[test]
    fn test_parse_content() {
        let content = parse_content_str(SAMPLE).unwrap();
        assert_eq!(content.properties.len(), 5);
        assert_eq!(content.properties[1].property_type(), PropertyType::Select);
        assert_eq!(content.properties[1].option_label("o-todo"), Some("Todo"));
        assert_eq!(content.properties[1].options()[0].color, "#ef4444");
        assert_eq!(
            content.properties[2].kind,
            PropertyKind::Formula {
                expression: "Score * 2".into()
            }
        );
        assert!(content.properties[3].is_back_relation());
        assert_eq!(
            content.properties[4].rollup_config().unwrap().aggregation,
            Aggregation::PercentEmpty
        );
        assert_eq!(content.rows[0].cell("p-name"), &CellValue::text("A"));
        assert_eq!(content.rows[0].cell("missing"), &CellValue::Null);
        assert_eq!(
            content.views[0].filters[0].operator,
            FilterOperator::Unknown("startsWith".into())
        );
    }

    #[test]
    fn test_round_trip_preserves_unknown_keys() {
        let content = parse_content_str(SAMPLE).unwrap();
        let json = content_to_string(&content).unwrap();
        let reparsed = parse_content_str(&json).unwrap();
        assert_eq!(content, reparsed);
        assert!(json.contains("\"width\": 240"));
        assert!(json.contains("\"rowHeight\": \"tall\""));
        assert!(json.contains("\"operator\": \"startsWith\""));
    }

    #[test]
    fn test_formula_without_expression_is_rejected() {
        let json = r#"{ "properties": [{ "id": "f", "name": "F", "type": "formula" }] }"#;
        let err = parse_content_str(json).unwrap_err();
        assert!(err.to_string().contains("formulaExpression"));
    }

    #[test]
    fn test_back_relation_requires_forward_property() {
        let json = r#"{ "properties": [{ "id": "b", "name": "B", "type": "relation",
            "relationConfig": { "databasePageId": "x", "direction": "back" } }] }"#;
        assert!(parse_content_str(json).is_err());
    }

    #[test]
    fn test_config_on_wrong_type_is_dropped() {
        let json = r#"{ "properties": [{ "id": "t", "name": "T", "type": "text",
            "formulaExpression": "1 + 1" }] }"#;
        let content = parse_content_str(json).unwrap();
        assert_eq!(content.properties[0].kind, PropertyKind::Text);
        assert!(!content_to_string(&content).unwrap().contains("formulaExpression"));
    }

    #[test]
    fn test_set_cell_rejects_computed_property() {
        let mut content = parse_content_str(SAMPLE).unwrap();
        let before = content.rows[0].updated_at;
        assert!(content.set_cell("r1", "p-bonus", CellValue::Number(1.0)).is_err());
        content.set_cell("r1", "p-name", CellValue::text("B")).unwrap();
        assert_eq!(content.rows[0].cell("p-name"), &CellValue::text("B"));
        assert!(content.rows[0].updated_at > before);
    }

    #[test]
    fn test_default_content() {
        let content = DatabaseContent::default();
        assert_eq!(content.properties.len(), 1);
        assert_eq!(content.title_property().unwrap().name, "Name");
        assert_eq!(content.views.len(), 1);
    }
}
