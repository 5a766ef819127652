// Display formatting: number formats, option labels, label input, markdown export

use crate::document::{self, CellValue};
use crate::schema::{
    DatabaseContent, NumberFormat, NumberStyle, PropertyDef, PropertyKind, SelectOption,
};

/// Render a number with a property's number format.
pub fn format_number(value: f64, format: &NumberFormat) -> String {
    if !value.is_finite() {
        return document::format_number(value);
    }

    let decimals = match (format.decimals, format.style) {
        (Some(d), _) => Some(d as usize),
        (None, NumberStyle::Currency) => Some(2),
        (None, _) => None,
    };
    let body = match decimals {
        Some(d) => format!("{:.*}", d, value.abs()),
        None => document::format_number(value.abs()),
    };
    let body = if format.thousands_separator {
        group_thousands(&body)
    } else {
        body
    };
    let sign = if value < 0.0 && body.chars().any(|c| c.is_ascii_digit() && c != '0') {
        "-"
    } else {
        ""
    };

    match format.style {
        NumberStyle::Plain => format!("{sign}{body}"),
        NumberStyle::Currency => {
            let symbol = format.currency_symbol.as_deref().unwrap_or("$");
            format!("{sign}{symbol}{body}")
        }
        NumberStyle::Percent => format!("{sign}{body}%"),
    }
}

fn group_thousands(digits: &str) -> String {
    let (int_part, frac_part) = match digits.find('.') {
        Some(pos) => digits.split_at(pos),
        None => (digits, ""),
    };
    let len = int_part.len();
    let mut out = String::with_capacity(digits.len() + len / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out.push_str(frac_part);
    out
}

/// Render a number cell, using the property's format when it has one.
pub fn format_cell_number(value: f64, property: &PropertyDef) -> String {
    match property.number_format() {
        Some(format) => format_number(value, format),
        None => document::format_number(value),
    }
}

/// Stored value -> display text. Option ids become labels (multiSelect labels
/// are joined with ", "), booleans render as `true`/`false` and null as "".
pub fn resolve_option_label(value: &CellValue, property: &PropertyDef) -> String {
    match (&property.kind, value) {
        (PropertyKind::Select { .. }, CellValue::Text(id)) => property
            .option_label(id)
            .unwrap_or(id)
            .to_string(),
        (PropertyKind::MultiSelect { .. }, CellValue::List(ids)) => ids
            .iter()
            .map(|id| property.option_label(id).unwrap_or(id))
            .collect::<Vec<_>>()
            .join(", "),
        _ => value.to_display_string(),
    }
}

/// User-facing input -> stored value.
///
/// Select labels (and multiSelect label lists) are matched case-insensitively
/// against the property's options; labels with no option get a new one,
/// coloured by its position in the palette. Other values pass through.
pub fn resolve_cell_input(value: CellValue, property: &mut PropertyDef) -> CellValue {
    let multi = matches!(property.kind, PropertyKind::MultiSelect { .. });
    let Some(options) = property.options_mut() else {
        return value;
    };

    match (multi, value) {
        (false, CellValue::Text(label)) => CellValue::Text(option_id_for(options, &label)),
        (true, CellValue::List(labels)) => CellValue::List(
            labels
                .iter()
                .map(|label| option_id_for(options, label))
                .collect(),
        ),
        (true, CellValue::Text(label)) if !label.is_empty() => {
            CellValue::List(vec![option_id_for(options, &label)])
        }
        (_, other) => other,
    }
}

fn option_id_for(options: &mut Vec<SelectOption>, label: &str) -> String {
    let wanted = label.to_lowercase();
    if let Some(option) = options.iter().find(|o| o.label.to_lowercase() == wanted) {
        return option.id.clone();
    }
    let option = SelectOption::new(label, options.len());
    let id = option.id.clone();
    log::debug!("Created option '{label}' ({id})");
    options.push(option);
    id
}

/// Render a database as a markdown table preceded by YAML-style front matter.
pub fn format_as_markdown_table(content: &DatabaseContent, title: &str) -> String {
    let summary = content
        .properties
        .iter()
        .map(|p| format!("{} ({})", p.name, p.property_type().as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    let mut lines = vec![
        "---".to_string(),
        format!("title: {title}"),
        format!("properties: {summary}"),
        format!("rows: {}", content.rows.len()),
        "---".to_string(),
        String::new(),
    ];

    if content.properties.is_empty() {
        lines.push("(no properties defined)".to_string());
        return lines.join("\n");
    }

    let headers: Vec<&str> = content.properties.iter().map(|p| p.name.as_str()).collect();
    lines.push(format!("| {} |", headers.join(" | ")));
    lines.push(format!("|{}|", vec!["---"; headers.len()].join("|")));

    for row in &content.rows {
        let values: Vec<String> = content
            .properties
            .iter()
            .map(|p| resolve_option_label(row.cell(&p.id), p).replace('|', "\\|"))
            .collect();
        lines.push(format!("| {} |", values.join(" | ")));
    }

    lines.join("\n")
}
