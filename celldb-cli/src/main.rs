use celldb::config::{parse_config, EngineConfig};
use celldb::dependency::extract_column_references;
use celldb::format::{format_as_markdown_table, resolve_cell_input};
use celldb::formula::{self, Evaluator};
use celldb::relation::update_back_relation;
use celldb::schema::parse_content;
use celldb::validation::{validate_and_prepare, validate_content};
use celldb::view::materialize_all;
use celldb::{CellValue, DocumentCache, DocumentStore, SqliteStore};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::process;

/// celldb CLI: evaluate formulas and materialize database views from the command line
#[derive(Parser)]
#[command(name = "celldb", version, about)]
struct Cli {
    /// Path to the SQLite document store
    #[arg(long, default_value = "celldb.sqlite")]
    db: String,

    /// Engine config file (YAML)
    #[arg(long)]
    config: Option<String>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Import a database document from a JSON file
    Import {
        /// Page id to store the document under
        page_id: String,
        /// JSON file holding the document
        file: String,
        /// Notebook the page belongs to
        #[arg(long, default_value = "")]
        notebook: String,
    },

    /// Print a stored document as JSON
    Export {
        /// Page id
        page_id: String,
    },

    /// List stored documents
    List {
        /// Only documents of this notebook
        #[arg(long)]
        notebook: Option<String>,
    },

    /// Evaluate a formula expression
    Eval {
        /// Formula expression
        expression: String,
        /// Column values (e.g. --var Score=5 --var "Full Name=Ann")
        #[arg(long = "var", value_parser = parse_key_value)]
        vars: Vec<(String, String)>,
    },

    /// List the columns a formula references
    Refs {
        /// Formula expression
        expression: String,
    },

    /// Materialize views of a stored document
    Materialize {
        /// Page id
        page_id: String,
        /// Only this view (default: all views)
        #[arg(long)]
        view: Option<String>,
    },

    /// Set one cell, by property name or id. Select values are given as labels.
    Set {
        /// Page id
        page_id: String,
        /// Row id
        row_id: String,
        /// Property name or id
        property: String,
        /// Value; parsed as JSON when possible, else taken as text
        value: String,
    },

    /// Set the rows linked to a row through a back relation
    Link {
        /// Page id
        page_id: String,
        /// Back relation property name or id
        property: String,
        /// Row id
        row_id: String,
        /// Target row ids (e.g. --target t1 --target t2)
        #[arg(long = "target")]
        targets: Vec<String>,
    },

    /// Check a stored document for structural problems
    Validate {
        /// Page id
        page_id: String,
    },

    /// Render a stored document as a markdown table
    Table {
        /// Page id
        page_id: String,
        /// Table title (default: the page id)
        #[arg(long)]
        title: Option<String>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=').ok_or_else(|| {
        format!("Invalid key=value pair: no '=' found in '{s}'")
    })?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => parse_config(Path::new(path))?,
        None => EngineConfig::default(),
    };

    // Formula commands never touch the store
    match &cli.command {
        Command::Eval { expression, vars } => {
            let context: HashMap<String, CellValue> = vars
                .iter()
                .map(|(name, raw)| (name.clone(), parse_cell(raw)))
                .collect();
            let expr = formula::parse(expression)?;
            let value = Evaluator::new(config.today()).evaluate(&expr, &context)?;
            return print_output(&serde_json::json!({ "value": value }), &cli.format);
        }
        Command::Refs { expression } => {
            let refs = extract_column_references(expression)?;
            return print_output(&refs, &cli.format);
        }
        _ => {}
    }

    let store = SqliteStore::open(Path::new(&cli.db))?;

    match cli.command {
        Command::Import {
            page_id,
            file,
            notebook,
        } => {
            let content = parse_content(Path::new(&file))?;
            let warnings = validate_and_prepare(&content, config.strict_validation)?;
            for warning in &warnings {
                log::warn!("{warning}");
            }
            store.upsert_document(&page_id, &notebook, &content)?;
            print_output(
                &serde_json::json!({
                    "ok": true,
                    "page_id": page_id,
                    "rows": content.rows.len(),
                    "warnings": warnings,
                }),
                &cli.format,
            )?;
        }

        Command::Export { page_id } => {
            let content = store.load_document(&page_id)?;
            println!("{}", celldb::schema::content_to_string(&content)?);
        }

        Command::List { notebook } => {
            let docs: Vec<serde_json::Value> = store
                .list_documents(notebook.as_deref())?
                .into_iter()
                .map(|d| {
                    serde_json::json!({
                        "page_id": d.page_id,
                        "notebook_id": d.notebook_id,
                        "updated_at": d.updated_at,
                    })
                })
                .collect();
            print_output(&docs, &cli.format)?;
        }

        Command::Materialize { page_id, view } => {
            let content = store.load_document(&page_id)?;
            let mut cache = DocumentCache::new();
            match view {
                Some(view_id) => {
                    let result = celldb::materialize(&content, &view_id, &store, &mut cache, &config)?;
                    print_output(&result, &cli.format)?;
                }
                None => {
                    let results = materialize_all(&content, &store, &mut cache, &config);
                    print_output(&results, &cli.format)?;
                }
            }
        }

        Command::Set {
            page_id,
            row_id,
            property,
            value,
        } => {
            let mut content = store.load_document(&page_id)?;
            let property_id = find_property_id(&content, &property)?;
            let Some(prop) = content.property_mut(&property_id) else {
                return Err(format!("Property not found: {property}").into());
            };
            let stored = resolve_cell_input(parse_cell(&value), prop);
            content.set_cell(&row_id, &property_id, stored.clone())?;
            validate_and_prepare(&content, config.strict_validation)?;
            store.save_document(&page_id, &content)?;
            print_output(
                &serde_json::json!({ "ok": true, "row_id": row_id, "property_id": property_id, "value": stored }),
                &cli.format,
            )?;
        }

        Command::Link {
            page_id,
            property,
            row_id,
            targets,
        } => {
            let content = store.load_document(&page_id)?;
            let property_id = find_property_id(&content, &property)?;
            let mut cache = DocumentCache::new();
            let update = update_back_relation(&store, &mut cache, &content, &property_id, &row_id, &targets)?;
            print_output(&update, &cli.format)?;
        }

        Command::Validate { page_id } => {
            let content = store.load_document(&page_id)?;
            let result = validate_content(&content, config.strict_validation);
            print_output(&result, &cli.format)?;
        }

        Command::Table { page_id, title } => {
            let content = store.load_document(&page_id)?;
            let title = title.unwrap_or_else(|| page_id.clone());
            println!("{}", format_as_markdown_table(&content, &title));
        }

        Command::Eval { .. } | Command::Refs { .. } => {}
    }

    Ok(())
}

fn print_output<T: Serialize + ?Sized>(
    value: &T,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value)?);
        }
    }
    Ok(())
}

/// Command-line value -> cell. JSON literals (numbers, booleans, arrays, null)
/// are parsed; anything else is text.
fn parse_cell(raw: &str) -> CellValue {
    serde_json::from_str::<serde_json::Value>(raw)
        .map(CellValue::from)
        .unwrap_or_else(|_| CellValue::text(raw))
}

fn find_property_id(
    content: &celldb::DatabaseContent,
    name_or_id: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    content
        .property(name_or_id)
        .or_else(|| content.property_by_name(name_or_id))
        .map(|p| p.id.clone())
        .ok_or_else(|| celldb::CellDbError::PropertyNotFound(name_or_id.to_string()).into())
}
