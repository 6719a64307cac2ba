use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;
use templatedb::catalog::FieldType;
use templatedb::{Archive, Catalog, Config, Fields, StoredKey, TemplateDb, Value};

/// templatedb: import, export and inspect building template archives
#[derive(Parser)]
#[command(name = "templatedb", version, about)]
struct Cli {
    /// Config file (default: ./templatedb.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database file, overriding the config and environment
    #[arg(long)]
    db: Option<PathBuf>,

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
    /// Import an archive (JSON) into the store
    Import {
        /// Archive file
        archive: PathBuf,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        year_from: Option<String>,
        #[arg(long)]
        year_to: Option<String>,
        #[arg(long)]
        climate_zone: Option<String>,
        /// Extra metadata values (e.g. --meta Source=survey)
        #[arg(long = "meta", value_parser = parse_key_value)]
        meta: Vec<(String, String)>,
        /// Stop at the first failing root instead of importing the rest
        #[arg(long)]
        strict: bool,
    },

    /// Export one record and everything it references, as nested JSON
    Export {
        /// Kind name
        kind: String,
        /// Record key
        key: String,
        /// Write the archive arena instead of the nested rendering
        #[arg(long)]
        archive: bool,
    },

    /// Export every stored record in the serialized collection format
    ExportAll {
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Get a single stored record
    Get {
        /// Kind name
        kind: String,
        /// Record key
        key: String,
    },

    /// List the records of a kind
    List {
        /// Kind name
        kind: String,
    },

    /// Delete a record that nothing references
    Delete {
        /// Kind name
        kind: String,
        /// Record key
        key: String,
        /// Show what would be deleted without actually deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Check all stored records against the catalog
    Validate,

    /// Show catalog hash, record counts and recent imports
    Status,

    /// Show the catalog, or one kind with its resolved fields
    Catalog {
        /// Kind name
        kind: Option<String>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=').ok_or_else(|| {
        format!("Invalid key=value pair: no '=' found in '{s}'")
    })?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::discover(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database = db;
    }
    let store = TemplateDb::open(config)?;

    match cli.command {
        Command::Import {
            archive,
            author,
            country,
            description,
            year_from,
            year_to,
            climate_zone,
            meta,
            strict,
        } => {
            let content = std::fs::read_to_string(&archive)
                .map_err(|e| format!("Failed to read archive '{}': {e}", archive.display()))?;
            let parsed: Archive = serde_json::from_str(&content)?;

            let mut extra = Fields::new();
            for (name, value) in [
                ("Author", author),
                ("Country", country),
                ("Description", description),
                ("YearFrom", year_from),
                ("YearTo", year_to),
                ("ClimateZone", climate_zone),
            ] {
                if let Some(v) = value {
                    extra.insert(name.to_string(), Value::String(v));
                }
            }
            for (name, raw) in meta {
                let value = parse_meta_value(store.catalog(), &name, &raw);
                extra.insert(name, value);
            }

            if strict {
                let keys = store.import(&parsed, &extra)?;
                print_output(&serde_json::json!({ "imported": keys_json(&keys) }), &cli.format)?;
            } else {
                let report = store.import_each(&parsed, &extra)?;
                let failed: Vec<_> = report
                    .failed
                    .iter()
                    .map(|(node, e)| serde_json::json!({ "node": node.to_string(), "error": e.to_string() }))
                    .collect();
                print_output(
                    &serde_json::json!({
                        "session": report.session,
                        "imported": keys_json(&report.imported),
                        "failed": failed,
                    }),
                    &cli.format,
                )?;
                if !report.is_complete() {
                    return Err(format!("{} root(s) failed to import", report.failed.len()).into());
                }
            }
        }

        Command::Export { kind, key, archive } => {
            let exported = store.export(&kind, &key)?;
            if archive {
                print_output(&serde_json::to_value(&exported)?, &cli.format)?;
            } else {
                let root = exported
                    .roots()
                    .first()
                    .copied()
                    .ok_or("export produced no root")?;
                print_output(&exported.to_nested(root)?, &cli.format)?;
            }
        }

        Command::ExportAll { output } => {
            let document = store.export_all()?.to_document(store.catalog())?;
            match output {
                Some(path) => {
                    std::fs::write(&path, serde_json::to_string_pretty(&document)?)?;
                    print_output(
                        &serde_json::json!({ "ok": true, "written": path.display().to_string() }),
                        &cli.format,
                    )?;
                }
                None => print_output(&document, &cli.format)?,
            }
        }

        Command::Get { kind, key } => {
            let record = store.get(&kind, &key)?;
            print_output(&serde_json::to_value(&record)?, &cli.format)?;
        }

        Command::List { kind } => {
            let records = store.list(&kind)?;
            let rows: Vec<_> = records
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "key": r.key,
                        "name": r.fields.get("Name").cloned().unwrap_or_default(),
                        "modified_at": r.modified_at.to_rfc3339(),
                    })
                })
                .collect();
            print_output(&serde_json::Value::Array(rows), &cli.format)?;
        }

        Command::Delete { kind, key, dry_run } => {
            if dry_run {
                let record = store.get(&kind, &key)?;
                let referrers = store.referrers(&record.stored_key())?;
                print_output(
                    &serde_json::json!({
                        "dry_run": true,
                        "would_delete": { "kind": kind, "key": key },
                        "blocked_by": keys_json(&referrers),
                    }),
                    &cli.format,
                )?;
            } else {
                store.delete(&kind, &key)?;
                print_output(&serde_json::json!({ "ok": true, "deleted": key }), &cli.format)?;
            }
        }

        Command::Validate => {
            let result = store.validate_all()?;
            print_output(&result, &cli.format)?;
        }

        Command::Status => {
            let result = store.status()?;
            print_output(&result, &cli.format)?;
        }

        Command::Catalog { kind } => {
            let catalog = store.catalog();
            match kind {
                Some(name) => {
                    let entry = catalog
                        .get(&name)
                        .ok_or_else(|| format!("Unknown kind '{name}'"))?;
                    print_output(
                        &serde_json::json!({
                            "kind": entry.name,
                            "collection": entry.collection,
                            "abstract": entry.is_abstract,
                            "embedded": entry.embedded,
                            "ancestors": entry.ancestors,
                            "fields": serde_json::to_value(&entry.fields)?,
                        }),
                        &cli.format,
                    )?;
                }
                None => {
                    let kinds: Vec<_> = catalog
                        .kinds()
                        .map(|k| {
                            serde_json::json!({
                                "kind": k.name,
                                "stored": k.is_stored(),
                                "fields": k.fields.len(),
                            })
                        })
                        .collect();
                    print_output(
                        &serde_json::json!({
                            "hash": catalog.hash(),
                            "root": catalog.root_kind(),
                            "kinds": kinds,
                        }),
                        &cli.format,
                    )?;
                }
            }
        }
    }

    Ok(())
}

fn keys_json(keys: &[StoredKey]) -> serde_json::Value {
    serde_json::Value::Array(
        keys.iter()
            .map(|k| serde_json::json!({ "kind": k.kind, "key": k.key }))
            .collect(),
    )
}

fn parse_meta_value(catalog: &Catalog, name: &str, raw: &str) -> Value {
    let declared = catalog
        .metadata_kind()
        .and_then(|kind| kind.field(name))
        .map(|field| field.spec.field_type);
    match declared {
        Some(FieldType::String | FieldType::Datetime) => Value::String(raw.to_string()),
        // Numbers and booleans are kept typed; anything else is a string.
        _ => match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(json) => {
                Value::from_json_scalar(&json).unwrap_or_else(|| Value::String(raw.to_string()))
            }
            Err(_) => Value::String(raw.to_string()),
        },
    }
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
