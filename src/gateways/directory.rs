//! Read-only lookup tables: service-centre operators, homestays, emergency
//! numbers.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

const BUILTIN_DIRECTORY: &str = include_str!("../../data/directory.toml");

/// One row of a lookup table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub table: String,
    pub fields: BTreeMap<String, String>,
}

impl DirectoryRecord {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }
}

pub trait Directory: Send + Sync {
    /// Rows of `table` whose key columns contain `query`, case-insensitively.
    /// An empty query matches every row.
    fn find_all(&self, table: &str, query: &str) -> Vec<DirectoryRecord>;

    fn find(&self, table: &str, query: &str) -> Option<DirectoryRecord> {
        self.find_all(table, query).into_iter().next()
    }

    fn has_table(&self, table: &str) -> bool;
}

#[derive(Debug, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    tables: HashMap<String, TableToml>,
}

#[derive(Debug, Deserialize)]
struct TableToml {
    keys: Vec<String>,
    #[serde(default)]
    rows: Vec<BTreeMap<String, String>>,
}

/// Tables held in memory, loaded once from TOML.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    tables: HashMap<String, TableToml>,
}

impl StaticDirectory {
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_DIRECTORY).context("built-in directory is malformed")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read directory file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("failed to parse directory file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let file: DirectoryFile = toml::from_str(content)?;
        for (name, table) in &file.tables {
            if table.keys.is_empty() {
                anyhow::bail!("table '{name}' declares no key columns");
            }
            tracing::debug!("directory table '{name}': {} rows", table.rows.len());
        }
        Ok(Self { tables: file.tables })
    }

    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Directory for StaticDirectory {
    fn find_all(&self, table: &str, query: &str) -> Vec<DirectoryRecord> {
        let Some(t) = self.tables.get(table) else {
            tracing::warn!("lookup in unknown directory table '{table}'");
            return Vec::new();
        };
        let needle = query.trim().to_lowercase();
        t.rows
            .iter()
            .filter(|row| {
                needle.is_empty()
                    || t.keys
                        .iter()
                        .filter_map(|k| row.get(k))
                        .any(|v| v.to_lowercase().contains(&needle))
            })
            .map(|row| DirectoryRecord {
                table: table.to_string(),
                fields: row.clone(),
            })
            .collect()
    }

    fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }
}
