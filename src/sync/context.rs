/// Multi-table synchronization in foreign-key order.
///
/// Writes run in one transaction: inserts parents first, then updates in the
/// same order, then deletes children first. Nothing in any changelog is
/// cleared unless the whole transaction commits.

use crate::context::DataContext;
use crate::error::{Error, Result};
use crate::sync::mapping::SchemaMapping;
use crate::sync::provider::SqlProvider;
use crate::sync::synchronizer::{ChangeKind, StagedVersions, TableSynchronizer};
use crate::table::Table;

pub struct DataSyncContext {
    context: DataContext,
    synchronizers: Vec<TableSynchronizer>,
}

impl DataSyncContext {
    pub fn new(context: &DataContext) -> Self {
        DataSyncContext {
            context: context.clone(),
            synchronizers: Vec::new(),
        }
    }

    pub fn context(&self) -> &DataContext {
        &self.context
    }

    /// Starts synchronizing the context's table for `mapping`'s schema.
    pub fn add_mapping(&mut self, mapping: SchemaMapping) -> Result<TableSynchronizer> {
        let table = self.context.table(mapping.schema()).ok_or_else(|| {
            Error::invalid(format!(
                "data context has no table for schema '{}'",
                mapping.schema().name()
            ))
        })?;
        if self.synchronizer(&table).is_some() {
            return Err(Error::invalid(format!(
                "table '{}' is already synchronized",
                mapping.schema().name()
            )));
        }
        let synchronizer = TableSynchronizer::new(&table, mapping)?;
        self.synchronizers.push(synchronizer.clone());
        Ok(synchronizer)
    }

    /// Maps every table of the context with the default mapping.
    pub fn add_all_tables(&mut self) -> Result<()> {
        for table in self.context.tables() {
            if self.synchronizer(&table).is_none() {
                self.add_mapping(SchemaMapping::new(&table.schema())?)?;
            }
        }
        Ok(())
    }

    pub fn synchronizer(&self, table: &Table) -> Option<TableSynchronizer> {
        self.synchronizers.iter().find(|s| s.table() == table).cloned()
    }

    pub fn synchronizers(&self) -> &[TableSynchronizer] {
        &self.synchronizers
    }

    pub fn has_changes(&self) -> bool {
        self.synchronizers.iter().any(TableSynchronizer::has_changes)
    }

    /// Synchronizers ordered parents first.
    fn ordered(&self) -> Result<Vec<TableSynchronizer>> {
        Ok(self
            .context
            .sorted_tables()?
            .iter()
            .filter_map(|table| self.synchronizer(table))
            .collect())
    }

    /// Reads every table, parents first so foreign keys resolve. Rows a
    /// read removes take their children with them without recording
    /// changes in the children's tables.
    pub fn read_data(&self, provider: &mut dyn SqlProvider) -> Result<()> {
        let _load = self.context.begin_load();
        for synchronizer in self.ordered()? {
            synchronizer.read_data(provider)?;
        }
        Ok(())
    }

    /// Writes every pending change of every table in one transaction.
    pub fn write_data(&self, provider: &mut dyn SqlProvider) -> Result<()> {
        let ordered = self.ordered()?;
        provider.begin()?;
        let mut staged: Vec<StagedVersions> = ordered.iter().map(|_| StagedVersions::new()).collect();
        if let Err(err) = Self::write_ordered(&ordered, provider, &mut staged) {
            if let Err(rollback) = provider.rollback() {
                log::warn!("rollback failed: {}", rollback);
            }
            return Err(err);
        }
        provider.commit()?;
        for (synchronizer, versions) in ordered.iter().zip(staged) {
            synchronizer.complete(versions);
        }
        log::debug!("wrote changes of {} tables", ordered.len());
        Ok(())
    }

    fn write_ordered(
        ordered: &[TableSynchronizer],
        provider: &mut dyn SqlProvider,
        staged: &mut [StagedVersions],
    ) -> Result<()> {
        for kind in [ChangeKind::Added, ChangeKind::Changed] {
            for (synchronizer, versions) in ordered.iter().zip(staged.iter_mut()) {
                synchronizer.write_kind(provider, kind, versions)?;
            }
        }
        for (synchronizer, versions) in ordered.iter().zip(staged.iter_mut()).rev() {
            synchronizer.write_kind(provider, ChangeKind::Removed, versions)?;
        }
        Ok(())
    }
}
