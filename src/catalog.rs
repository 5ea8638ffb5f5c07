//! Mapping of table names to table directories.
//!
//! ```text
//! <warehouse>/
//!   <database>.db/
//!     <table>/       // snapshot/, manifest/, bucket-N/ ...
//! ```

use crate::error::{Error, Result};
use crate::fs::{FileIO, LocalFileIO};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DB_SUFFIX: &str = ".db";

/// Option key naming the warehouse directory
pub const WAREHOUSE: &str = "warehouse";

/// Resolves databases and tables to locations.
pub trait Catalog: Send + Sync {
    /// Names of every database
    fn list_databases(&self) -> Result<Vec<String>>;

    /// Returns true if the database exists
    fn database_exists(&self, database: &str) -> Result<bool>;

    /// Create a database
    fn create_database(&self, database: &str, ignore_if_exists: bool) -> Result<()>;

    /// Drop a database and every table in it
    fn drop_database(&self, database: &str, ignore_if_not_exists: bool) -> Result<()>;

    /// Names of the tables of a database
    fn list_tables(&self, database: &str) -> Result<Vec<String>>;

    /// Location of a table, whether it exists or not
    fn table_path(&self, database: &str, table: &str) -> PathBuf;

    /// Returns true if the table exists
    fn table_exists(&self, database: &str, table: &str) -> Result<bool>;

    /// Create a table directory and return its location
    fn create_table(&self, database: &str, table: &str, ignore_if_exists: bool) -> Result<PathBuf>;

    /// Drop a table with all its files
    fn drop_table(&self, database: &str, table: &str, ignore_if_not_exists: bool) -> Result<()>;
}

/// A [`Catalog`] kept entirely in the directory layout of a warehouse.
#[derive(Debug, Clone)]
pub struct FileSystemCatalog {
    file_io: Arc<dyn FileIO>,
    warehouse: PathBuf,
}

impl FileSystemCatalog {
    /// Create a catalog rooted at `warehouse`
    pub fn new(file_io: Arc<dyn FileIO>, warehouse: impl Into<PathBuf>) -> Result<Self> {
        let warehouse = warehouse.into();
        if warehouse.as_os_str().is_empty() {
            return Err(Error::invalid_argument("Warehouse path must not be empty"));
        }
        Ok(Self { file_io, warehouse })
    }

    /// Create a local catalog from string options; `warehouse` is required.
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self> {
        let warehouse = options.get(WAREHOUSE).ok_or_else(|| {
            Error::invalid_argument(format!("{} must be set for the filesystem catalog", WAREHOUSE))
        })?;
        Self::new(Arc::new(LocalFileIO::new()), warehouse)
    }

    /// The warehouse directory
    pub fn warehouse(&self) -> &Path {
        &self.warehouse
    }

    fn database_path(&self, database: &str) -> PathBuf {
        self.warehouse.join(format!("{}{}", database, DB_SUFFIX))
    }

    fn check_database(&self, database: &str) -> Result<()> {
        if !self.database_exists(database)? {
            return Err(Error::not_found(format!("Database {}", database)));
        }
        Ok(())
    }
}

fn file_names(paths: Vec<PathBuf>) -> impl Iterator<Item = String> {
    paths.into_iter().filter_map(|p| p.file_name()?.to_str().map(str::to_string))
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return Err(Error::invalid_argument(format!("Invalid name '{}'", name)));
    }
    Ok(())
}

impl Catalog for FileSystemCatalog {
    fn list_databases(&self) -> Result<Vec<String>> {
        Ok(file_names(self.file_io.list(&self.warehouse)?)
            .filter_map(|name| name.strip_suffix(DB_SUFFIX).map(str::to_string))
            .collect())
    }

    fn database_exists(&self, database: &str) -> Result<bool> {
        self.file_io.exists(&self.database_path(database))
    }

    fn create_database(&self, database: &str, ignore_if_exists: bool) -> Result<()> {
        check_name(database)?;
        if self.database_exists(database)? {
            if ignore_if_exists {
                return Ok(());
            }
            return Err(Error::AlreadyExists(format!("Database {}", database)));
        }
        self.file_io.mkdirs(&self.database_path(database))?;
        log::info!("Created database {}", database);
        Ok(())
    }

    fn drop_database(&self, database: &str, ignore_if_not_exists: bool) -> Result<()> {
        if !self.file_io.delete_dir(&self.database_path(database))? && !ignore_if_not_exists {
            return Err(Error::not_found(format!("Database {}", database)));
        }
        Ok(())
    }

    fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        self.check_database(database)?;
        Ok(file_names(self.file_io.list(&self.database_path(database))?)
            .filter(|name| !name.starts_with('.'))
            .collect())
    }

    fn table_path(&self, database: &str, table: &str) -> PathBuf {
        self.database_path(database).join(table)
    }

    fn table_exists(&self, database: &str, table: &str) -> Result<bool> {
        self.file_io.exists(&self.table_path(database, table))
    }

    fn create_table(&self, database: &str, table: &str, ignore_if_exists: bool) -> Result<PathBuf> {
        check_name(table)?;
        self.check_database(database)?;
        let path = self.table_path(database, table);
        if self.table_exists(database, table)? {
            if ignore_if_exists {
                return Ok(path);
            }
            return Err(Error::AlreadyExists(format!("Table {}.{}", database, table)));
        }
        self.file_io.mkdirs(&path)?;
        log::info!("Created table {}.{} at {:?}", database, table, path);
        Ok(path)
    }

    fn drop_table(&self, database: &str, table: &str, ignore_if_not_exists: bool) -> Result<()> {
        if !self.file_io.delete_dir(&self.table_path(database, table))? && !ignore_if_not_exists {
            return Err(Error::not_found(format!("Table {}.{}", database, table)));
        }
        log::info!("Dropped table {}.{}", database, table);
        Ok(())
    }
}
