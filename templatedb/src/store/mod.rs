use crate::backend::{Backend, Record, SqliteBackend, StoredKey};
use crate::catalog::{Catalog, KindEntry, BUILTIN_CATALOG};
use crate::config::Config;
use crate::error::{NodeLocation, Result, TemplateDbError};
use crate::export::{Exporter, Snapshot};
use crate::import::{ImportOptions, ImportReport, Importer};
use crate::node::{Archive, Fields};
use crate::validation;

/// The main entry point: a catalog plus a SQLite record store.
/// Records the catalog revision at boot and exposes import, export and
/// maintenance operations.
pub struct TemplateDb {
    config: Config,
    catalog: Catalog,
    catalog_yaml: String,
    db: SqliteBackend,
}

impl TemplateDb {
    /// Open the database named by `config.database`, creating it if needed.
    pub fn open(config: Config) -> Result<Self> {
        if let Some(parent) = config.database.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = SqliteBackend::open(&config.database)?;
        Self::with_backend(config, db)
    }

    /// Open a throwaway in-memory database (for testing).
    pub fn open_in_memory(config: Config) -> Result<Self> {
        let db = SqliteBackend::open_in_memory()?;
        Self::with_backend(config, db)
    }

    fn with_backend(config: Config, db: SqliteBackend) -> Result<Self> {
        let catalog_yaml = match &config.catalog {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                TemplateDbError::Catalog(format!("cannot read {}: {e}", path.display()))
            })?,
            None => BUILTIN_CATALOG.to_string(),
        };
        let catalog = Catalog::from_yaml(&catalog_yaml)?;

        let store = TemplateDb {
            config,
            catalog,
            catalog_yaml,
            db,
        };
        store.boot()?;
        Ok(store)
    }

    /// Boot lifecycle: remember the catalog revision the store is used with.
    fn boot(&self) -> Result<()> {
        let current_hash = self.catalog.hash();
        let last_hash = self.db.get_last_catalog_hash()?;
        if last_hash.as_deref() != Some(current_hash) {
            log::info!(
                "Catalog changed ({} -> {current_hash})",
                last_hash.as_deref().unwrap_or("none")
            );
            self.db.record_catalog(current_hash, &self.catalog_yaml)?;
        }
        Ok(())
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &SqliteBackend {
        &self.db
    }

    pub fn importer(&self) -> Importer<'_, SqliteBackend> {
        Importer::new(&self.catalog, &self.db, ImportOptions::from(&self.config))
    }

    pub fn exporter(&self) -> Exporter<'_, SqliteBackend> {
        Exporter::new(&self.catalog, &self.db)
    }

    // ── Import / export ──────────────────────────────────────────────

    /// Import every root, stopping at the first failure.
    pub fn import(&self, archive: &Archive, extra_metadata: &Fields) -> Result<Vec<StoredKey>> {
        self.importer().import(archive, extra_metadata)
    }

    /// Import every root independently and log the outcome.
    pub fn import_each(&self, archive: &Archive, extra_metadata: &Fields) -> Result<ImportReport> {
        let report = self.importer().import_each(archive, extra_metadata);
        self.db
            .record_import(&report.session, report.imported.len(), report.failed.len())?;
        Ok(report)
    }

    pub fn export(&self, kind: &str, key: &str) -> Result<Archive> {
        self.stored_entry(kind)?;
        self.exporter().export(kind, key)
    }

    pub fn export_all(&self) -> Result<Snapshot> {
        self.exporter().export_all()
    }

    // ── Records ──────────────────────────────────────────────────────

    pub fn get(&self, kind: &str, key: &str) -> Result<Record> {
        self.stored_entry(kind)?;
        self.db.get_record(kind, key)
    }

    pub fn list(&self, kind: &str) -> Result<Vec<Record>> {
        self.stored_entry(kind)?;
        self.db.list_records(kind)
    }

    /// Delete a record. Fails while any other record still references it.
    pub fn delete(&self, kind: &str, key: &str) -> Result<()> {
        self.stored_entry(kind)?;
        let target = StoredKey::new(kind, key);
        if self.db.load_record(kind, key)?.is_none() {
            return Err(TemplateDbError::NotFound {
                kind: kind.to_string(),
                key: key.to_string(),
            });
        }

        let referrers = self.referrers(&target)?;
        if !referrers.is_empty() {
            let names: Vec<String> = referrers.iter().map(|k| k.to_string()).collect();
            return Err(TemplateDbError::ReferentialIntegrity(format!(
                "{target} is referenced by {}",
                names.join(", ")
            )));
        }

        self.db.delete_record(kind, key)?;
        log::info!("Deleted {target}");
        Ok(())
    }

    /// Records holding a reference to `target`
    pub fn referrers(&self, target: &StoredKey) -> Result<Vec<StoredKey>> {
        let mut out = Vec::new();
        for entry in self.catalog.stored_kinds() {
            for record in self.db.list_records(&entry.name)? {
                if record.references().contains(target) {
                    out.push(record.stored_key());
                }
            }
        }
        Ok(out)
    }

    fn stored_entry(&self, kind: &str) -> Result<&KindEntry> {
        match self.catalog.get(kind) {
            Some(entry) if entry.is_stored() => Ok(entry),
            Some(_) => Err(TemplateDbError::Catalog(format!(
                "Kind '{kind}' is not stored on its own"
            ))),
            None => Err(TemplateDbError::Catalog(format!("Unknown kind '{kind}'"))),
        }
    }

    // ── Maintenance ──────────────────────────────────────────────────

    /// Re-check every stored record against the catalog.
    pub fn validate_all(&self) -> Result<serde_json::Value> {
        let mut results = serde_json::Map::new();

        for entry in self.catalog.stored_kinds() {
            let records = self.db.list_records(&entry.name)?;
            if records.is_empty() {
                continue;
            }
            let mut issues = Vec::new();

            for record in &records {
                let mut issue = serde_json::Map::new();
                match self.exporter().export(&record.kind, &record.key) {
                    Ok(archive) => {
                        let Some(node) = archive.roots().first().and_then(|id| archive.node(*id))
                        else {
                            continue;
                        };
                        let vr = validation::validate_fields(
                            &self.catalog,
                            entry,
                            &node.fields,
                            &archive,
                        );
                        let location =
                            NodeLocation::new(&node.kind, &node.name).with_key(&record.key);
                        let warnings = vr.warnings.clone();
                        if let Some(err) = vr.into_error(&location) {
                            issue.insert("errors".into(), serde_json::json!([err.to_string()]));
                        }
                        if !warnings.is_empty() {
                            issue.insert("warnings".into(), serde_json::json!(warnings));
                        }
                    }
                    Err(e) => {
                        issue.insert("errors".into(), serde_json::json!([e.to_string()]));
                    }
                }
                if !issue.is_empty() {
                    issue.insert("key".into(), serde_json::Value::String(record.key.clone()));
                    issues.push(serde_json::Value::Object(issue));
                }
            }

            results.insert(
                entry.name.clone(),
                serde_json::json!({
                    "total": records.len(),
                    "issues": issues,
                }),
            );
        }

        Ok(serde_json::Value::Object(results))
    }

    /// Catalog hash, record counts per kind, and recent imports.
    pub fn status(&self) -> Result<serde_json::Value> {
        let mut kinds = serde_json::Map::new();
        for entry in self.catalog.stored_kinds() {
            let count = self.db.count_records(&entry.name)?;
            if count > 0 {
                kinds.insert(entry.name.clone(), serde_json::json!({ "count": count }));
            }
        }
        let imports = self.db.list_imports()?;

        Ok(serde_json::json!({
            "catalog_hash": self.catalog.hash(),
            "root_kind": self.catalog.root_kind(),
            "key_scheme": self.config.key_scheme,
            "kinds": kinds,
            "imports": imports,
        }))
    }
}
