//! Column aggregation shared by view footers and rollups.
//!
//! [`aggregate`] produces the raw value of an aggregation; [`summarize_values`]
//! renders it for a footer.

use crate::document::{self, CellValue};
use crate::format;
use crate::schema::{Aggregation, DatabaseRow, PropertyDef, PropertyType};
use chrono::NaiveDate;
use std::collections::BTreeSet;

const ALL_COUNTS: &[Aggregation] = &[
    Aggregation::Count,
    Aggregation::CountValues,
    Aggregation::CountUnique,
    Aggregation::PercentEmpty,
    Aggregation::PercentNotEmpty,
];

const NUMERIC: &[Aggregation] = &[
    Aggregation::Count,
    Aggregation::CountValues,
    Aggregation::CountUnique,
    Aggregation::Sum,
    Aggregation::Average,
    Aggregation::Min,
    Aggregation::Max,
    Aggregation::Range,
    Aggregation::PercentEmpty,
    Aggregation::PercentNotEmpty,
];

const DATES: &[Aggregation] = &[
    Aggregation::Count,
    Aggregation::CountValues,
    Aggregation::CountUnique,
    Aggregation::Min,
    Aggregation::Max,
    Aggregation::Range,
    Aggregation::PercentEmpty,
    Aggregation::PercentNotEmpty,
];

const LINKS: &[Aggregation] = &[
    Aggregation::Count,
    Aggregation::PercentEmpty,
    Aggregation::PercentNotEmpty,
];

/// Footer aggregations offered for a property type.
pub fn valid_aggregations(property_type: PropertyType) -> &'static [Aggregation] {
    match property_type {
        PropertyType::Number => NUMERIC,
        PropertyType::Date => DATES,
        PropertyType::Relation | PropertyType::Rollup | PropertyType::PageLink => LINKS,
        PropertyType::Text
        | PropertyType::Select
        | PropertyType::MultiSelect
        | PropertyType::Checkbox
        | PropertyType::Url
        | PropertyType::Formula => ALL_COUNTS,
    }
}

pub fn is_valid_aggregation(property_type: PropertyType, aggregation: Aggregation) -> bool {
    valid_aggregations(property_type).contains(&aggregation)
}

/// Raw result of an aggregation over a set of values.
///
/// Numeric aggregations only consider values with a numeric reading; with
/// `dates` set, min/max compare ISO date strings lexically and range counts
/// whole days. Returns null when nothing qualifies.
pub fn aggregate(values: &[CellValue], aggregation: Aggregation, dates: bool) -> CellValue {
    let non_empty = || values.iter().filter(|v| !v.is_empty());

    match aggregation {
        Aggregation::Count => CellValue::Number(values.len() as f64),
        Aggregation::CountValues => CellValue::Number(non_empty().count() as f64),
        Aggregation::CountUnique => {
            let unique: BTreeSet<String> = non_empty().map(CellValue::serialized).collect();
            CellValue::Number(unique.len() as f64)
        }
        Aggregation::PercentEmpty | Aggregation::PercentNotEmpty => {
            if values.is_empty() {
                return CellValue::Null;
            }
            let empty = values.len() - non_empty().count();
            let part = if aggregation == Aggregation::PercentEmpty {
                empty
            } else {
                values.len() - empty
            };
            CellValue::Number(round_half_up(part as f64 * 100.0 / values.len() as f64))
        }
        Aggregation::ShowOriginal => {
            let parts: Vec<String> = non_empty().map(CellValue::to_display_string).collect();
            if parts.is_empty() {
                CellValue::Null
            } else {
                CellValue::Text(parts.join(", "))
            }
        }
        Aggregation::Min | Aggregation::Max | Aggregation::Range if dates => {
            date_aggregate(values, aggregation)
        }
        Aggregation::Sum
        | Aggregation::Average
        | Aggregation::Min
        | Aggregation::Max
        | Aggregation::Range => {
            let numbers: Vec<f64> = values.iter().filter_map(CellValue::as_number).collect();
            if numbers.is_empty() {
                return CellValue::Null;
            }
            let sum: f64 = numbers.iter().sum();
            let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
            let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let result = match aggregation {
                Aggregation::Sum => sum,
                Aggregation::Average => sum / numbers.len() as f64,
                Aggregation::Min => min,
                Aggregation::Max => max,
                _ => max - min,
            };
            CellValue::Number(result)
        }
    }
}

fn date_aggregate(values: &[CellValue], aggregation: Aggregation) -> CellValue {
    let dates: Vec<String> = values
        .iter()
        .filter(|v| !v.is_empty())
        .map(CellValue::to_display_string)
        .collect();
    let (Some(min), Some(max)) = (dates.iter().min(), dates.iter().max()) else {
        return CellValue::Null;
    };
    match aggregation {
        Aggregation::Min => CellValue::text(min.clone()),
        Aggregation::Max => CellValue::text(max.clone()),
        _ => match (parse_iso_date(min), parse_iso_date(max)) {
            (Some(a), Some(b)) => CellValue::Number((b - a).num_days() as f64),
            _ => CellValue::Null,
        },
    }
}

fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    let head = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

pub(crate) fn round_half_up(n: f64) -> f64 {
    (n + 0.5).floor()
}

/// Footer text for an aggregation over already-resolved values.
///
/// An empty set renders "-" except for `count`, which renders "0".
pub fn summarize_values(values: &[CellValue], aggregation: Aggregation, property: &PropertyDef) -> String {
    if values.is_empty() && aggregation != Aggregation::Count {
        return "-".to_string();
    }
    let dates = property.property_type() == PropertyType::Date;
    let result = aggregate(values, aggregation, dates);
    let n = match result {
        CellValue::Null => return "-".to_string(),
        CellValue::Number(n) => n,
        other => return other.to_display_string(),
    };

    match aggregation {
        Aggregation::Count | Aggregation::CountValues | Aggregation::CountUnique => {
            document::format_number(n)
        }
        Aggregation::PercentEmpty | Aggregation::PercentNotEmpty => {
            format!("{}%", document::format_number(n))
        }
        Aggregation::Range if dates => {
            let unit = if n == 1.0 { "day" } else { "days" };
            format!("{} {unit}", document::format_number(n))
        }
        Aggregation::Average if property.number_format().is_none() => {
            document::format_number((n * 100.0).round() / 100.0)
        }
        _ => format::format_cell_number(n, property),
    }
}

/// Footer summary of `property_id` over `rows`, read from stored cells.
pub fn compute_summary(
    rows: &[&DatabaseRow],
    property_id: &str,
    aggregation: Aggregation,
    property: &PropertyDef,
) -> String {
    let values: Vec<CellValue> = rows.iter().map(|r| r.cell(property_id).clone()).collect();
    summarize_values(&values, aggregation, property)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{NumberFormat, NumberStyle, PropertyKind};

    fn number_prop() -> PropertyDef {
        PropertyDef::new("Score", PropertyKind::Number { format: None })
    }

    fn values() -> Vec<CellValue> {
        vec![CellValue::Number(3.0), CellValue::Null, CellValue::Number(7.0)]
    }

    #[test]
    fn test_aggregate_numbers() {
        let v = values();
        assert_eq!(aggregate(&v, Aggregation::Sum, false), CellValue::Number(10.0));
        assert_eq!(aggregate(&v, Aggregation::Average, false), CellValue::Number(5.0));
        assert_eq!(aggregate(&v, Aggregation::CountValues, false), CellValue::Number(2.0));
        assert_eq!(aggregate(&v, Aggregation::PercentEmpty, false), CellValue::Number(33.0));
        assert_eq!(aggregate(&v, Aggregation::PercentNotEmpty, false), CellValue::Number(67.0));
        assert_eq!(aggregate(&v, Aggregation::Range, false), CellValue::Number(4.0));
        assert_eq!(aggregate(&v, Aggregation::Count, false), CellValue::Number(3.0));
    }

    #[test]
    fn test_numeric_aggregations_skip_non_numbers() {
        let v = vec![CellValue::text("x"), CellValue::text("4"), CellValue::Bool(true)];
        assert_eq!(aggregate(&v, Aggregation::Sum, false), CellValue::Number(4.0));
        assert_eq!(aggregate(&[CellValue::text("x")], Aggregation::Max, false), CellValue::Null);
    }

    #[test]
    fn test_count_unique_compares_arrays_by_content() {
        let v = vec![
            CellValue::list(["a", "b"]),
            CellValue::list(["a", "b"]),
            CellValue::list(["b"]),
            CellValue::List(vec![]),
        ];
        assert_eq!(aggregate(&v, Aggregation::CountUnique, false), CellValue::Number(2.0));
    }

    #[test]
    fn test_summary_of_empty_set() {
        let prop = number_prop();
        assert_eq!(summarize_values(&[], Aggregation::Count, &prop), "0");
        assert_eq!(summarize_values(&[], Aggregation::Sum, &prop), "-");
        assert_eq!(summarize_values(&[], Aggregation::PercentEmpty, &prop), "-");
        assert_eq!(summarize_values(&[CellValue::text("n/a")], Aggregation::Average, &prop), "-");
    }

    #[test]
    fn test_summary_rendering() {
        let prop = number_prop();
        let v = values();
        assert_eq!(summarize_values(&v, Aggregation::Sum, &prop), "10");
        assert_eq!(summarize_values(&v, Aggregation::PercentEmpty, &prop), "33%");
        let thirds = vec![CellValue::Number(1.0), CellValue::Number(2.0), CellValue::Number(2.0)];
        assert_eq!(summarize_values(&thirds, Aggregation::Average, &prop), "1.67");

        let money = PropertyDef::new(
            "Price",
            PropertyKind::Number {
                format: Some(NumberFormat {
                    style: NumberStyle::Currency,
                    decimals: None,
                    thousands_separator: true,
                    currency_symbol: None,
                }),
            },
        );
        let prices = vec![CellValue::Number(1000.0), CellValue::Number(250.5)];
        assert_eq!(summarize_values(&prices, Aggregation::Sum, &money), "$1,250.50");
    }

    #[test]
    fn test_date_range_and_extremes() {
        let due = PropertyDef::new("Due", PropertyKind::Date);
        let v = vec![
            CellValue::text("2024-03-10"),
            CellValue::Null,
            CellValue::text("2024-03-01"),
        ];
        assert_eq!(summarize_values(&v, Aggregation::Range, &due), "9 days");
        assert_eq!(summarize_values(&v, Aggregation::Min, &due), "2024-03-01");
        assert_eq!(summarize_values(&v, Aggregation::Max, &due), "2024-03-10");
    }

    #[test]
    fn test_aggregations_are_type_gated() {
        assert!(is_valid_aggregation(PropertyType::Number, Aggregation::Sum));
        assert!(is_valid_aggregation(PropertyType::Date, Aggregation::Range));
        assert!(!is_valid_aggregation(PropertyType::Date, Aggregation::Sum));
        assert!(!is_valid_aggregation(PropertyType::Text, Aggregation::Average));
        assert!(!is_valid_aggregation(PropertyType::Relation, Aggregation::CountValues));
        assert!(is_valid_aggregation(PropertyType::Relation, Aggregation::PercentEmpty));
    }

    #[test]
    fn test_compute_summary_reads_cells() {
        let prop = number_prop();
        let mut a = DatabaseRow::new();
        a.set_cell(&prop.id, CellValue::Number(2.0));
        let b = DatabaseRow::new();
        let rows = vec![&a, &b];
        assert_eq!(compute_summary(&rows, &prop.id, Aggregation::CountValues, &prop), "1");
        assert_eq!(compute_summary(&rows, &prop.id, Aggregation::PercentNotEmpty, &prop), "50%");
    }
}
