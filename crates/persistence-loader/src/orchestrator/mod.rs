//! Loader: the run-level coordinator.
//!
//! `initialize` stands up the layout and loads initial data;
//! `apply_migrations` evolves an existing layout. [`Loader::run`] wraps
//! either or both in the whole-run lock.

mod import;
mod lock;

pub use import::Importer;
pub use lock::RunLock;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::core::layout::IndexSpec;
use crate::core::schema::SchemaCatalog;
use crate::core::traits::BackendAdapter;
use crate::error::Result;
use crate::ldif::{collect_ldif_files, read_ldif, LdifRecord};
use crate::migration::{MigrationEngine, MigrationPlan};
use crate::planner::{create_indexes, IndexPlanner, TablePlan, TablePlanner};
use crate::policy::{read_policy, Policies};
use crate::report::{MigrationReport, RunReport};
use crate::typemap::TypeResolver;

/// Which phases a locked run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phases {
    pub initialize: bool,
    pub migrate: bool,
}

impl Phases {
    pub const ALL: Phases = Phases {
        initialize: true,
        migrate: true,
    };
    pub const INITIALIZE: Phases = Phases {
        initialize: true,
        migrate: false,
    };
    pub const MIGRATE: Phases = Phases {
        initialize: false,
        migrate: true,
    };
}

/// Load the schema catalog and policy documents named by the configuration.
pub fn load_schema(config: &Config) -> Result<(SchemaCatalog, Policies)> {
    let fallback: HashMap<String, String> = match &config.schema.attribute_syntax {
        Some(path) => read_policy(path)?,
        None => HashMap::new(),
    };
    let catalog = SchemaCatalog::load(&config.schema.files, fallback)?;
    let policies = Policies::load(&config.policy, config.backend.kind()?)?;
    info!(
        "Loaded {} object classes and {} attributes",
        catalog.object_classes().len(),
        catalog.attributes().len()
    );
    Ok((catalog, policies))
}

/// Coordinates planning, DDL, data import and migrations against one backend.
pub struct Loader {
    config: Config,
    catalog: SchemaCatalog,
    policies: Policies,
    adapter: Arc<dyn BackendAdapter>,
}

impl Loader {
    /// Load schema and policies from the configuration.
    pub fn new(config: Config, adapter: Arc<dyn BackendAdapter>) -> Result<Self> {
        let (catalog, policies) = load_schema(&config)?;
        Ok(Self::with_parts(config, catalog, policies, adapter))
    }

    pub fn with_parts(
        config: Config,
        catalog: SchemaCatalog,
        policies: Policies,
        adapter: Arc<dyn BackendAdapter>,
    ) -> Self {
        Self {
            config,
            catalog,
            policies,
            adapter,
        }
    }

    pub fn adapter(&self) -> &dyn BackendAdapter {
        self.adapter.as_ref()
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn resolver(&self) -> TypeResolver<'_> {
        TypeResolver::new(&self.catalog, &self.policies.types)
    }

    /// Desired tables and subtables.
    pub fn plan_tables(&self) -> Result<TablePlan> {
        TablePlanner::new(
            self.resolver(),
            &self.policies.sub_tables,
            self.adapter.dialect(),
        )
        .plan()
    }

    /// Desired indexes for `plan` on the connected server.
    ///
    /// Multivalued attributes the directory backend indexes are added to the
    /// common index fields.
    pub async fn plan_indexes(&self, plan: &TablePlan) -> Result<Vec<IndexSpec>> {
        let server = self.adapter.server_version().await?;
        let mut policy = self.policies.index.clone();
        policy.promote_common(
            self.policies
                .directory_index
                .iter()
                .filter(|a| self.catalog.is_structured(a))
                .cloned(),
        );
        let planner = IndexPlanner::new(&policy, self.adapter.dialect(), &server);
        Ok(plan.indexes(&planner))
    }

    /// Run the requested phases under the run lock.
    ///
    /// The lock is released whether or not the phases succeed.
    pub async fn run(&self, phases: Phases) -> Result<RunReport> {
        let lock = if self.config.lock.enabled {
            Some(RunLock::acquire(self.adapter(), &self.config.lock).await?)
        } else {
            None
        };

        let mut report = self.new_report();
        let result = self.run_phases(phases, &mut report).await;

        if let Some(lock) = lock {
            lock.release().await;
        }
        result?;
        report.finish();
        info!("{}", report.summary().trim_end());
        Ok(report)
    }

    async fn run_phases(&self, phases: Phases, report: &mut RunReport) -> Result<()> {
        if phases.initialize {
            self.initialize_into(report).await?;
        }
        if phases.migrate {
            self.migrate_into(report).await?;
        }
        Ok(())
    }

    /// Create missing tables, subtables, columns and indexes, then import data.
    pub async fn initialize(&self) -> Result<RunReport> {
        let mut report = self.new_report();
        self.initialize_into(&mut report).await?;
        report.finish();
        Ok(report)
    }

    /// Apply the versioned migration plan.
    pub async fn apply_migrations(&self) -> Result<RunReport> {
        let mut report = self.new_report();
        self.migrate_into(&mut report).await?;
        report.finish();
        Ok(report)
    }

    fn new_report(&self) -> RunReport {
        let run_id = uuid::Uuid::new_v4().to_string();
        let hash = self.config.hash();
        info!("Run {} (config hash {})", run_id, &hash[..12.min(hash.len())]);
        RunReport::new(run_id, self.adapter.dialect().name(), hash)
    }

    async fn initialize_into(&self, report: &mut RunReport) -> Result<()> {
        // Schema and LDIF errors surface before any DDL.
        let plan = self.plan_tables()?;
        let records = self.read_records()?;
        info!(
            "Planned {} tables and {} subtables; {} LDIF records",
            plan.tables.len(),
            plan.subtables.len(),
            records.len()
        );

        self.apply_layout(&plan, report).await?;

        let importer = Importer::new(self.adapter(), &plan);
        report.rows.merge(importer.import(&records).await);
        Ok(())
    }

    /// Create missing tables, subtables, columns and indexes without importing data.
    pub async fn create_layout(&self) -> Result<RunReport> {
        let mut report = self.new_report();
        let plan = self.plan_tables()?;
        self.apply_layout(&plan, &mut report).await?;
        report.finish();
        Ok(report)
    }

    async fn apply_layout(&self, plan: &TablePlan, report: &mut RunReport) -> Result<()> {
        report.tables.merge(plan.create_missing(self.adapter()).await);

        if self.config.migration.sync_missing_columns {
            let engine = MigrationEngine::new(self.adapter(), self.resolver());
            let migration = report.migration.get_or_insert_with(MigrationReport::default);
            engine.sync_missing_columns(plan, migration).await?;
        }

        let indexes = self.plan_indexes(plan).await?;
        report
            .indexes
            .merge(create_indexes(self.adapter(), &indexes).await);
        Ok(())
    }

    async fn migrate_into(&self, report: &mut RunReport) -> Result<()> {
        if !self.config.migration.enabled {
            info!("Column migrations disabled");
            return Ok(());
        }
        let plan = match &self.config.migration.plan {
            Some(path) => MigrationPlan::load(path)?,
            None => MigrationPlan::builtin()?,
        };
        let engine = MigrationEngine::new(self.adapter(), self.resolver());
        let migration = report.migration.get_or_insert_with(MigrationReport::default);
        engine.apply(&plan, migration).await
    }

    /// Template records followed by custom records.
    fn read_records(&self) -> Result<Vec<LdifRecord>> {
        let load = &self.config.load;
        let mut files = load.templates.clone();
        if let Some(dir) = &load.custom_dir {
            if dir.is_dir() {
                files.extend(collect_ldif_files(dir)?);
            } else {
                debug!("Custom LDIF directory {} not present", dir.display());
            }
        }

        let mut records = Vec::new();
        for file in &files {
            records.extend(read_ldif(Path::new(file), &load.context)?);
        }
        Ok(records)
    }
}
