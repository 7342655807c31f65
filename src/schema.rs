//! Analysis result envelope types
//!
//! The daemon does not interpret analysis errors beyond their envelope. It
//! stores them per module and hands them back to clients in a stable order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Dotted module qualifier, e.g. `pkg.sub.module`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleName(String);

impl ModuleName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this module is `prefix` itself or nested under it.
    pub fn starts_with_module(&self, prefix: &str) -> bool {
        self.0 == prefix
            || (self.0.starts_with(prefix) && self.0[prefix.len()..].starts_with('.'))
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One reported error. Lines are 1-based, columns 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisError {
    pub path: PathBuf,
    pub line: usize,
    pub column: usize,
    pub stop_line: usize,
    pub stop_column: usize,
    pub code: u32,
    pub name: String,
    pub description: String,
}

/// Errors grouped by module.
///
/// Only modules with at least one error have an entry, so two tables compare
/// equal exactly when they report the same errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorTable {
    by_module: BTreeMap<ModuleName, Vec<AnalysisError>>,
}

impl ErrorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group a flat list of `(module, error)` pairs, keeping per-module order.
    pub fn from_errors<I>(errors: I) -> Self
    where
        I: IntoIterator<Item = (ModuleName, AnalysisError)>,
    {
        let mut by_module: BTreeMap<ModuleName, Vec<AnalysisError>> = BTreeMap::new();
        for (module, error) in errors {
            by_module.entry(module).or_default().push(error);
        }
        Self { by_module }
    }

    /// A new table where every module in `rechecked` takes its errors from
    /// `fresh` (or none) and every other module keeps its current errors.
    pub fn replace_modules<I>(&self, rechecked: &BTreeSet<ModuleName>, fresh: I) -> Self
    where
        I: IntoIterator<Item = (ModuleName, AnalysisError)>,
    {
        let mut by_module: BTreeMap<ModuleName, Vec<AnalysisError>> = self
            .by_module
            .iter()
            .filter(|(module, _)| !rechecked.contains(*module))
            .map(|(module, errors)| (module.clone(), errors.clone()))
            .collect();

        for (module, error) in fresh {
            if rechecked.contains(&module) {
                by_module.entry(module).or_default().push(error);
            } else {
                tracing::debug!(%module, "dropping error for module outside the recheck set");
            }
        }

        Self { by_module }
    }

    /// Every error, ordered by module then report order
    pub fn all(&self) -> Vec<AnalysisError> {
        self.by_module.values().flatten().cloned().collect()
    }

    /// Errors for the given modules only
    pub fn for_modules<'a, I>(&self, modules: I) -> Vec<AnalysisError>
    where
        I: IntoIterator<Item = &'a ModuleName>,
    {
        let wanted: BTreeSet<&ModuleName> = modules.into_iter().collect();
        self.by_module
            .iter()
            .filter(|(module, _)| wanted.contains(module))
            .flat_map(|(_, errors)| errors.iter().cloned())
            .collect()
    }

    pub fn get(&self, module: &ModuleName) -> Option<&[AnalysisError]> {
        self.by_module.get(module).map(Vec::as_slice)
    }

    pub fn error_count(&self) -> usize {
        self.by_module.values().map(Vec::len).sum()
    }

    pub fn module_count(&self) -> usize {
        self.by_module.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_module.is_empty()
    }
}
