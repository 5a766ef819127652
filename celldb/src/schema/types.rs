use crate::document::CellValue;
use crate::error::{CellDbError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Colours cycled through when new select options are created
pub const OPTION_COLORS: [&str; 10] = [
    "#ef4444", "#f97316", "#eab308", "#22c55e", "#06b6d4", "#3b82f6", "#8b5cf6", "#ec4899",
    "#6b7280", "#a855f7",
];

static NULL_CELL: CellValue = CellValue::Null;

/// Property (column) type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyType {
    Text,
    Number,
    Select,
    MultiSelect,
    Checkbox,
    Date,
    Url,
    PageLink,
    Relation,
    Rollup,
    Formula,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Text => "text",
            PropertyType::Number => "number",
            PropertyType::Select => "select",
            PropertyType::MultiSelect => "multiSelect",
            PropertyType::Checkbox => "checkbox",
            PropertyType::Date => "date",
            PropertyType::Url => "url",
            PropertyType::PageLink => "pageLink",
            PropertyType::Relation => "relation",
            PropertyType::Rollup => "rollup",
            PropertyType::Formula => "formula",
        }
    }
}

/// A single choice of a select / multiSelect property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub color: String,
}

impl SelectOption {
    /// Create an option with a fresh id, coloured by its position in the palette.
    pub fn new(label: impl Into<String>, color_index: usize) -> Self {
        SelectOption {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.into(),
            color: OPTION_COLORS[color_index % OPTION_COLORS.len()].to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberStyle {
    #[default]
    Plain,
    Currency,
    Percent,
}

/// Display format of a number property
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberFormat {
    #[serde(default)]
    pub style: NumberStyle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u32>,
    #[serde(default)]
    pub thousands_separator: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency_symbol: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationDirection {
    #[default]
    Forward,
    Back,
}

/// Link from this database to rows of another database document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationConfig {
    pub database_page_id: String,
    #[serde(default)]
    pub direction: RelationDirection,
    /// For back relations: the forward relation property in the target document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_relation_property_id: Option<String>,
}

impl RelationConfig {
    pub fn is_back(&self) -> bool {
        self.direction == RelationDirection::Back
    }
}

/// Aggregation vocabulary shared by footer summaries and rollups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Aggregation {
    #[serde(rename = "count")]
    Count,
    #[serde(rename = "countValues")]
    CountValues,
    #[serde(rename = "countUnique")]
    CountUnique,
    #[serde(rename = "sum")]
    Sum,
    #[serde(rename = "average")]
    Average,
    #[serde(rename = "min")]
    Min,
    #[serde(rename = "max")]
    Max,
    #[serde(rename = "range")]
    Range,
    #[serde(rename = "percent_empty")]
    PercentEmpty,
    #[serde(rename = "percent_not_empty")]
    PercentNotEmpty,
    /// Rollup only: comma-joined list of the linked values.
    #[serde(rename = "show_original")]
    ShowOriginal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupConfig {
    pub relation_property_id: String,
    pub target_property_id: String,
    pub aggregation: Aggregation,
}

/// Operators shared by view filters and conditional formats.
///
/// Operator names the engine does not know are kept verbatim so they survive a
/// round trip; they match every value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FilterOperator {
    IsEmpty,
    IsNotEmpty,
    Equals,
    NotEquals,
    Contains,
    DoesNotContain,
    Gt,
    Gte,
    Lt,
    Lte,
    Before,
    After,
    Unknown(String),
}

impl FilterOperator {
    pub fn as_str(&self) -> &str {
        match self {
            FilterOperator::IsEmpty => "isEmpty",
            FilterOperator::IsNotEmpty => "isNotEmpty",
            FilterOperator::Equals => "equals",
            FilterOperator::NotEquals => "notEquals",
            FilterOperator::Contains => "contains",
            FilterOperator::DoesNotContain => "doesNotContain",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::Before => "before",
            FilterOperator::After => "after",
            FilterOperator::Unknown(name) => name,
        }
    }
}

impl From<String> for FilterOperator {
    fn from(name: String) -> Self {
        match name.as_str() {
            "isEmpty" => FilterOperator::IsEmpty,
            "isNotEmpty" => FilterOperator::IsNotEmpty,
            "equals" => FilterOperator::Equals,
            "notEquals" => FilterOperator::NotEquals,
            "contains" => FilterOperator::Contains,
            "doesNotContain" => FilterOperator::DoesNotContain,
            "gt" => FilterOperator::Gt,
            "gte" => FilterOperator::Gte,
            "lt" => FilterOperator::Lt,
            "lte" => FilterOperator::Lte,
            "before" => FilterOperator::Before,
            "after" => FilterOperator::After,
            _ => FilterOperator::Unknown(name),
        }
    }
}

impl From<FilterOperator> for String {
    fn from(op: FilterOperator) -> Self {
        match op {
            FilterOperator::Unknown(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

/// Style applied to a cell by a matching conditional format
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bold: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalFormat {
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: CellValue,
    pub style: ConditionalStyle,
}

/// Type-specific configuration of a property.
///
/// Each variant carries exactly the configuration its type needs, so a text
/// column can never hold a rollup config.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKind {
    Text,
    Number { format: Option<NumberFormat> },
    Select { options: Vec<SelectOption> },
    MultiSelect { options: Vec<SelectOption> },
    Checkbox,
    Date,
    Url,
    PageLink,
    Relation(RelationConfig),
    Rollup(RollupConfig),
    Formula { expression: String },
}

impl PropertyKind {
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyKind::Text => PropertyType::Text,
            PropertyKind::Number { .. } => PropertyType::Number,
            PropertyKind::Select { .. } => PropertyType::Select,
            PropertyKind::MultiSelect { .. } => PropertyType::MultiSelect,
            PropertyKind::Checkbox => PropertyType::Checkbox,
            PropertyKind::Date => PropertyType::Date,
            PropertyKind::Url => PropertyType::Url,
            PropertyKind::PageLink => PropertyType::PageLink,
            PropertyKind::Relation(_) => PropertyType::Relation,
            PropertyKind::Rollup(_) => PropertyType::Rollup,
            PropertyKind::Formula { .. } => PropertyType::Formula,
        }
    }
}

/// A typed column definition shared by all rows of a database document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PropertyWire", into = "PropertyWire")]
pub struct PropertyDef {
    pub id: String,
    pub name: String,
    pub kind: PropertyKind,
    /// Evaluated in order, first match wins.
    pub conditional_formats: Vec<ConditionalFormat>,
    /// Host-specific keys the engine does not interpret.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        PropertyDef {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
            conditional_formats: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Build a select or multiSelect property from option labels.
    /// `color_index` is advanced past the colours used.
    pub fn with_option_labels(
        name: impl Into<String>,
        labels: &[&str],
        multi: bool,
        color_index: &mut usize,
    ) -> Self {
        let mut options = Vec::with_capacity(labels.len());
        for label in labels {
            options.push(SelectOption::new(*label, *color_index));
            *color_index += 1;
        }
        let kind = if multi {
            PropertyKind::MultiSelect { options }
        } else {
            PropertyKind::Select { options }
        };
        PropertyDef::new(name, kind)
    }

    pub fn property_type(&self) -> PropertyType {
        self.kind.property_type()
    }

    pub fn options(&self) -> &[SelectOption] {
        match &self.kind {
            PropertyKind::Select { options } | PropertyKind::MultiSelect { options } => options,
            _ => &[],
        }
    }

    pub fn options_mut(&mut self) -> Option<&mut Vec<SelectOption>> {
        match &mut self.kind {
            PropertyKind::Select { options } | PropertyKind::MultiSelect { options } => Some(options),
            _ => None,
        }
    }

    pub fn option_label(&self, option_id: &str) -> Option<&str> {
        self.options()
            .iter()
            .find(|o| o.id == option_id)
            .map(|o| o.label.as_str())
    }

    pub fn number_format(&self) -> Option<&NumberFormat> {
        match &self.kind {
            PropertyKind::Number { format } => format.as_ref(),
            _ => None,
        }
    }

    pub fn relation_config(&self) -> Option<&RelationConfig> {
        match &self.kind {
            PropertyKind::Relation(config) => Some(config),
            _ => None,
        }
    }

    pub fn rollup_config(&self) -> Option<&RollupConfig> {
        match &self.kind {
            PropertyKind::Rollup(config) => Some(config),
            _ => None,
        }
    }

    pub fn formula_expression(&self) -> Option<&str> {
        match &self.kind {
            PropertyKind::Formula { expression } => Some(expression),
            _ => None,
        }
    }

    pub fn is_back_relation(&self) -> bool {
        self.relation_config().is_some_and(RelationConfig::is_back)
    }

    /// Formula, rollup and back-relation values are derived, never stored in cells.
    pub fn is_computed(&self) -> bool {
        matches!(
            self.kind,
            PropertyKind::Formula { .. } | PropertyKind::Rollup(_)
        ) || self.is_back_relation()
    }
}

/// Flat on-disk shape of a property, with every type-specific config optional.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertyWire {
    id: String,
    name: String,
    #[serde(rename = "type")]
    property_type: PropertyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    options: Option<Vec<SelectOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    number_format: Option<NumberFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    relation_config: Option<RelationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rollup_config: Option<RollupConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    formula_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    conditional_formats: Vec<ConditionalFormat>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl TryFrom<PropertyWire> for PropertyDef {
    type Error = CellDbError;

    fn try_from(wire: PropertyWire) -> Result<Self> {
        let PropertyWire {
            id,
            name,
            property_type,
            options,
            number_format,
            relation_config,
            rollup_config,
            formula_expression,
            conditional_formats,
            extra,
        } = wire;
        let missing = |what: &str| CellDbError::InvalidProperty {
            name: name.clone(),
            reason: format!("{} property is missing {what}", property_type.as_str()),
        };

        let kind = match property_type {
            PropertyType::Text => PropertyKind::Text,
            PropertyType::Number => PropertyKind::Number {
                format: number_format,
            },
            PropertyType::Select => PropertyKind::Select {
                options: options.unwrap_or_default(),
            },
            PropertyType::MultiSelect => PropertyKind::MultiSelect {
                options: options.unwrap_or_default(),
            },
            PropertyType::Checkbox => PropertyKind::Checkbox,
            PropertyType::Date => PropertyKind::Date,
            PropertyType::Url => PropertyKind::Url,
            PropertyType::PageLink => PropertyKind::PageLink,
            PropertyType::Relation => {
                let config = relation_config.ok_or_else(|| missing("relationConfig"))?;
                if config.is_back() && config.back_relation_property_id.is_none() {
                    return Err(missing("backRelationPropertyId"));
                }
                PropertyKind::Relation(config)
            }
            PropertyType::Rollup => {
                PropertyKind::Rollup(rollup_config.ok_or_else(|| missing("rollupConfig"))?)
            }
            PropertyType::Formula => PropertyKind::Formula {
                expression: formula_expression.ok_or_else(|| missing("formulaExpression"))?,
            },
        };

        Ok(PropertyDef {
            id,
            name,
            kind,
            conditional_formats,
            extra,
        })
    }
}

impl From<PropertyDef> for PropertyWire {
    fn from(prop: PropertyDef) -> Self {
        let mut wire = PropertyWire {
            id: prop.id,
            name: prop.name,
            property_type: prop.kind.property_type(),
            options: None,
            number_format: None,
            relation_config: None,
            rollup_config: None,
            formula_expression: None,
            conditional_formats: prop.conditional_formats,
            extra: prop.extra,
        };
        match prop.kind {
            PropertyKind::Number { format } => wire.number_format = format,
            PropertyKind::Select { options } | PropertyKind::MultiSelect { options } => {
                wire.options = Some(options)
            }
            PropertyKind::Relation(config) => wire.relation_config = Some(config),
            PropertyKind::Rollup(config) => wire.rollup_config = Some(config),
            PropertyKind::Formula { expression } => wire.formula_expression = Some(expression),
            PropertyKind::Text
            | PropertyKind::Checkbox
            | PropertyKind::Date
            | PropertyKind::Url
            | PropertyKind::PageLink => {}
        }
        wire
    }
}

/// One row of a database document. Only stored (non-computed) values live in `cells`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseRow {
    pub id: String,
    #[serde(default)]
    pub cells: BTreeMap<String, CellValue>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl DatabaseRow {
    pub fn new() -> Self {
        let now = Utc::now();
        DatabaseRow {
            id: uuid::Uuid::new_v4().to_string(),
            cells: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The stored value of a cell; a missing key reads as null.
    pub fn cell(&self, property_id: &str) -> &CellValue {
        self.cells.get(property_id).unwrap_or(&NULL_CELL)
    }

    /// Write a cell and bump `updated_at`. Writing null removes the key.
    pub fn set_cell(&mut self, property_id: &str, value: CellValue) {
        if value.is_null() {
            self.cells.remove(property_id);
        } else {
            self.cells.insert(property_id.to_string(), value);
        }
        self.updated_at = Utc::now();
    }
}

impl Default for DatabaseRow {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewType {
    #[default]
    Table,
    Board,
    Gallery,
    List,
    Calendar,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSort {
    pub property_id: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseFilter {
    pub property_id: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: CellValue,
}

/// View-type-specific presentation settings. They never change which rows a view includes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by_property_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collapsed_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hidden_properties: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pinned_properties: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub property_widths: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_size: Option<String>,
    /// Calendar views: the date property rows are placed by.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_property_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseView {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub view_type: ViewType,
    #[serde(default)]
    pub sorts: Vec<DatabaseSort>,
    #[serde(default)]
    pub filters: Vec<DatabaseFilter>,
    #[serde(default)]
    pub config: ViewConfig,
    #[serde(default)]
    pub property_summaries: BTreeMap<String, Aggregation>,
}

impl DatabaseView {
    pub fn new(name: impl Into<String>, view_type: ViewType) -> Self {
        DatabaseView {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            view_type,
            sorts: Vec::new(),
            filters: Vec::new(),
            config: ViewConfig::default(),
            property_summaries: BTreeMap::new(),
        }
    }
}

/// The full payload of a database page: columns, rows and views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseContent {
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub rows: Vec<DatabaseRow>,
    #[serde(default)]
    pub views: Vec<DatabaseView>,
}

impl Default for DatabaseContent {
    /// A fresh database: one title column and one table view.
    fn default() -> Self {
        DatabaseContent {
            properties: vec![PropertyDef::new("Name", PropertyKind::Text)],
            rows: Vec::new(),
            views: vec![DatabaseView::new("Table", ViewType::Table)],
        }
    }
}

impl DatabaseContent {
    pub fn property(&self, id: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.id == id)
    }

    pub fn property_mut(&mut self, id: &str) -> Option<&mut PropertyDef> {
        self.properties.iter_mut().find(|p| p.id == id)
    }

    pub fn property_by_name(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// The first text property, which supplies row titles.
    pub fn title_property(&self) -> Option<&PropertyDef> {
        self.properties
            .iter()
            .find(|p| p.property_type() == PropertyType::Text)
    }

    pub fn row(&self, id: &str) -> Option<&DatabaseRow> {
        self.rows.iter().find(|r| r.id == id)
    }

    pub fn row_mut(&mut self, id: &str) -> Option<&mut DatabaseRow> {
        self.rows.iter_mut().find(|r| r.id == id)
    }

    pub fn view(&self, id: &str) -> Option<&DatabaseView> {
        self.views.iter().find(|v| v.id == id)
    }

    /// Append a new empty row and return its id.
    pub fn add_row(&mut self) -> String {
        let row = DatabaseRow::new();
        let id = row.id.clone();
        self.rows.push(row);
        id
    }

    pub fn delete_row(&mut self, id: &str) -> Result<DatabaseRow> {
        let pos = self
            .rows
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| CellDbError::RowNotFound(id.to_string()))?;
        Ok(self.rows.remove(pos))
    }

    /// Write a stored cell. Computed properties cannot be written.
    pub fn set_cell(&mut self, row_id: &str, property_id: &str, value: CellValue) -> Result<()> {
        let property = self
            .property(property_id)
            .ok_or_else(|| CellDbError::PropertyNotFound(property_id.to_string()))?;
        if property.is_computed() {
            return Err(CellDbError::InvalidProperty {
                name: property.name.clone(),
                reason: format!(
                    "{} values are computed and cannot be written",
                    property.property_type().as_str()
                ),
            });
        }
        let row = self
            .row_mut(row_id)
            .ok_or_else(|| CellDbError::RowNotFound(row_id.to_string()))?;
        row.set_cell(property_id, value);
        Ok(())
    }
}
