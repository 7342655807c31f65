//! Checker collaborator
//!
//! The daemon treats analysis as a black box behind the [`Checker`] trait: a
//! full-project check produces an [`Environment`] plus errors, and a recheck
//! folds a set of changed paths into an existing environment.
//!
//! [`SyntaxChecker`] is the default implementation. It parses Python sources
//! with tree-sitter, reports syntax errors and unresolved project-local
//! imports, and keeps a module dependency registry so a change to one module
//! also revisits the modules that import it.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ignore::gitignore::Gitignore;
use ignore::{Match, WalkBuilder};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;
use tree_sitter::{Node, Parser};

use crate::config::ServerConfiguration;
use crate::error::CheckerError;
use crate::paths::{fnv1a_hash, resolve_against};
use crate::schema::{AnalysisError, ModuleName};

/// Error code for a parse failure
pub const PARSE_ERROR_CODE: u32 = 404;

/// Error code for an import that names no project module
pub const UNDEFINED_IMPORT_CODE: u32 = 21;

// Cap per file; a badly broken file otherwise floods the table
const MAX_SYNTAX_ERRORS_PER_FILE: usize = 20;

/// Analysis environment carried between transitions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Bumped once per committed re-analysis
    pub generation: u64,
    pub modules: BTreeMap<ModuleName, PathBuf>,
    /// Module -> modules it imports
    pub dependencies: BTreeMap<ModuleName, BTreeSet<ModuleName>>,
    pub syntax_digests: BTreeMap<ModuleName, u64>,
}

impl Environment {
    /// Modules that import any of `changed`, directly or through a package
    /// prefix.
    pub fn dependents_of(&self, changed: &BTreeSet<ModuleName>) -> BTreeSet<ModuleName> {
        self.dependencies
            .iter()
            .filter(|(module, imports)| {
                !changed.contains(*module)
                    && imports.iter().any(|import| {
                        changed.iter().any(|c| {
                            import.starts_with_module(c.as_str())
                                || c.starts_with_module(import.as_str())
                        })
                    })
            })
            .map(|(module, _)| module.clone())
            .collect()
    }

    /// True if `name` is a module or a package of the project
    fn resolves(&self, name: &str) -> bool {
        self.modules.keys().any(|m| m.starts_with_module(name))
    }
}

/// Result of a full-project check
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub environment: Environment,
    pub errors: Vec<(ModuleName, AnalysisError)>,
}

/// Result of folding changed paths into an environment
#[derive(Debug, Clone)]
pub struct Recheck {
    pub environment: Environment,
    /// Every module whose errors were recomputed (or removed)
    pub rechecked: BTreeSet<ModuleName>,
    /// Fresh errors for modules in `rechecked`
    pub errors: Vec<(ModuleName, AnalysisError)>,
}

/// The analysis engine as seen by the daemon
pub trait Checker: Send + Sync {
    fn check_project(&self, config: &ServerConfiguration) -> Result<CheckOutcome, CheckerError>;

    fn recheck(
        &self,
        config: &ServerConfiguration,
        environment: &Environment,
        changed: &[PathBuf],
    ) -> Result<Recheck, CheckerError>;

    /// Module qualifier for a source path, if it belongs to the project
    fn module_of(&self, config: &ServerConfiguration, path: &Path) -> Option<ModuleName>;
}

/// Map a path under `root` to its dotted module name.
///
/// `pkg/__init__.py` is the module `pkg`. Paths outside `root` have no module.
pub fn module_name_for(root: &Path, path: &Path) -> Option<ModuleName> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();

    let last = parts.pop()?;
    let stem = Path::new(&last).file_stem()?.to_string_lossy().to_string();
    if stem != "__init__" {
        parts.push(stem);
    }
    if parts.is_empty() || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(ModuleName::new(parts.join(".")))
}

/// One import as written in a file
#[derive(Debug, Clone, PartialEq, Eq)]
struct ImportSite {
    /// Absolute dotted name, or `None` when a relative import escapes the
    /// top-level package
    target: Option<String>,
    written: String,
    line: usize,
    column: usize,
    stop_line: usize,
    stop_column: usize,
}

/// Per-file parse result
#[derive(Debug, Clone)]
struct FileAnalysis {
    digest: u64,
    imports: Vec<ImportSite>,
    syntax_errors: Vec<AnalysisError>,
}

/// tree-sitter backed checker for Python projects
#[derive(Debug, Default, Clone)]
pub struct SyntaxChecker;

impl SyntaxChecker {
    pub fn new() -> Self {
        Self
    }

    fn new_parser() -> Result<Parser, CheckerError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| CheckerError::Parser(e.to_string()))?;
        Ok(parser)
    }

    /// Source files under the project root, sorted for stable output
    fn project_sources(&self, config: &ServerConfiguration) -> Vec<PathBuf> {
        // Same rules as `is_indexed`: hidden entries and `.gitignore` files
        // under the root, whether or not the root is a git checkout
        let mut files: Vec<PathBuf> = WalkBuilder::new(&config.project_root)
            .hidden(true)
            .git_ignore(true)
            .require_git(false)
            .git_global(false)
            .git_exclude(false)
            .ignore(false)
            .parents(false)
            .build()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.into_path())
            .filter(|p| config.is_source_file(p))
            .collect();
        files.sort();
        files
    }

    /// The file `path`'s module binds to: an existing stub sibling shadows
    /// the source, otherwise the source itself. `None` if neither exists.
    fn preferred_source(&self, config: &ServerConfiguration, path: &Path) -> Option<PathBuf> {
        let mut candidates: Vec<PathBuf> = config
            .extensions
            .iter()
            .map(|ext| path.with_extension(ext))
            .filter(|candidate| candidate.is_file() && is_indexed(config, candidate))
            .collect();
        candidates.sort_by_key(|candidate| !is_stub(candidate));
        candidates.into_iter().next()
    }

    /// Read and parse one file. `Ok(None)` means the file is gone.
    fn analyze_file(
        &self,
        parser: &mut Parser,
        module: &ModuleName,
        path: &Path,
    ) -> Result<Option<FileAnalysis>, CheckerError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CheckerError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let source = String::from_utf8_lossy(&bytes);
        let digest = fnv1a_hash(&bytes);

        let tree = parser.parse(source.as_bytes(), None).ok_or_else(|| {
            CheckerError::Internal(format!("parser returned no tree for {}", path.display()))
        })?;
        let root = tree.root_node();

        let mut syntax_errors = Vec::new();
        collect_syntax_errors(&root, &source, path, &mut syntax_errors);

        let is_package = path
            .file_stem()
            .map(|stem| stem == "__init__")
            .unwrap_or(false);
        let mut imports = Vec::new();
        collect_imports(&root, &source, module, is_package, &mut imports);

        Ok(Some(FileAnalysis {
            digest,
            imports,
            syntax_errors,
        }))
    }

    /// Errors for one analyzed module against the given module index
    fn module_errors(
        environment: &Environment,
        module: &ModuleName,
        path: &Path,
        analysis: &FileAnalysis,
    ) -> Vec<(ModuleName, AnalysisError)> {
        let mut errors: Vec<(ModuleName, AnalysisError)> = analysis
            .syntax_errors
            .iter()
            .cloned()
            .map(|e| (module.clone(), e))
            .collect();

        for site in &analysis.imports {
            let unresolved = match &site.target {
                None => true,
                Some(target) => {
                    let first = target.split('.').next().unwrap_or(target);
                    environment.resolves(first) && !environment.resolves(target)
                }
            };
            if unresolved {
                errors.push((
                    module.clone(),
                    AnalysisError {
                        path: path.to_path_buf(),
                        line: site.line,
                        column: site.column,
                        stop_line: site.stop_line,
                        stop_column: site.stop_column,
                        code: UNDEFINED_IMPORT_CODE,
                        name: "Undefined import".to_string(),
                        description: format!(
                            "Undefined import [{}]: Could not find a module corresponding to import `{}`.",
                            UNDEFINED_IMPORT_CODE, site.written
                        ),
                    },
                ));
            }
        }
        errors
    }

    fn record(environment: &mut Environment, module: &ModuleName, path: &Path, analysis: &FileAnalysis) {
        environment.modules.insert(module.clone(), path.to_path_buf());
        environment
            .syntax_digests
            .insert(module.clone(), analysis.digest);
        environment.dependencies.insert(
            module.clone(),
            analysis
                .imports
                .iter()
                .filter_map(|site| site.target.as_deref().map(ModuleName::from))
                .collect(),
        );
    }

    fn forget(environment: &mut Environment, module: &ModuleName) {
        environment.modules.remove(module);
        environment.syntax_digests.remove(module);
        environment.dependencies.remove(module);
    }
}

impl Checker for SyntaxChecker {
    fn check_project(&self, config: &ServerConfiguration) -> Result<CheckOutcome, CheckerError> {
        let mut environment = Environment {
            generation: 1,
            ..Environment::default()
        };

        // Index first so imports resolve regardless of visiting order
        let mut index: BTreeMap<ModuleName, PathBuf> = BTreeMap::new();
        for path in self.project_sources(config) {
            // The walk already applied the ignore rules
            if let Some(module) = module_name_for(&config.project_root, &path) {
                // Stubs shadow sources
                let shadowed = index.get(&module).map(|existing| is_stub(existing)).unwrap_or(false);
                if is_stub(&path) || !shadowed {
                    index.insert(module, path);
                }
            }
        }

        // One parser per worker thread
        let entries: Vec<(&ModuleName, &PathBuf)> = index.iter().collect();
        let parsed = entries
            .par_iter()
            .map_init(Self::new_parser, |parser, (module, path)| -> Result<_, CheckerError> {
                let parser = parser
                    .as_mut()
                    .map_err(|e| CheckerError::Parser(e.to_string()))?;
                Ok(self
                    .analyze_file(parser, module, path)?
                    .map(|analysis| ((*module).clone(), (*path).clone(), analysis)))
            })
            .collect::<Result<Vec<_>, CheckerError>>()?;

        let mut analyses = Vec::with_capacity(parsed.len());
        for (module, path, analysis) in parsed.into_iter().flatten() {
            Self::record(&mut environment, &module, &path, &analysis);
            analyses.push((module, path, analysis));
        }

        let mut errors = Vec::new();
        for (module, path, analysis) in &analyses {
            errors.extend(Self::module_errors(&environment, module, path, analysis));
        }

        debug!(
            modules = environment.modules.len(),
            errors = errors.len(),
            "full project check complete"
        );
        Ok(CheckOutcome {
            environment,
            errors,
        })
    }

    fn recheck(
        &self,
        config: &ServerConfiguration,
        environment: &Environment,
        changed: &[PathBuf],
    ) -> Result<Recheck, CheckerError> {
        let mut parser = Self::new_parser()?;
        let mut next = environment.clone();
        next.generation += 1;

        // Apply the changed files to the module index
        let mut touched = BTreeSet::new();
        for path in changed {
            let path = resolve_against(&config.project_root, path);
            if !config.is_source_file(&path) {
                continue;
            }
            let Some(module) = self.module_of(config, &path) else {
                continue;
            };
            match self.preferred_source(config, &path) {
                Some(bound) => {
                    next.modules.insert(module.clone(), bound);
                }
                None => {
                    let stale = next
                        .modules
                        .get(&module)
                        .map(|bound| !bound.is_file())
                        .unwrap_or(false);
                    if stale {
                        Self::forget(&mut next, &module);
                    }
                }
            }
            touched.insert(module);
        }

        let mut rechecked = touched.clone();
        rechecked.extend(environment.dependents_of(&touched));

        let mut analyses = Vec::new();
        for module in &rechecked {
            let Some(path) = next.modules.get(module).cloned() else {
                continue;
            };
            match self.analyze_file(&mut parser, module, &path)? {
                Some(analysis) => {
                    Self::record(&mut next, module, &path, &analysis);
                    analyses.push((module.clone(), path, analysis));
                }
                None => Self::forget(&mut next, module),
            }
        }

        let mut errors = Vec::new();
        for (module, path, analysis) in &analyses {
            errors.extend(Self::module_errors(&next, module, path, analysis));
        }

        debug!(
            generation = next.generation,
            rechecked = rechecked.len(),
            errors = errors.len(),
            "recheck complete"
        );
        Ok(Recheck {
            environment: next,
            rechecked,
            errors,
        })
    }

    fn module_of(&self, config: &ServerConfiguration, path: &Path) -> Option<ModuleName> {
        if !config.is_source_file(path) {
            return None;
        }
        let path = resolve_against(&config.project_root, path);
        if !is_indexed(config, &path) {
            return None;
        }
        module_name_for(&config.project_root, &path)
    }
}

fn is_stub(path: &Path) -> bool {
    path.extension().map(|e| e == "pyi").unwrap_or(false)
}

/// True if a full-project walk would visit `path`.
///
/// Hidden components below the root exclude a path, and so does a
/// `.gitignore` between the root and the file; the deepest matching
/// `.gitignore` decides.
pub fn is_indexed(config: &ServerConfiguration, path: &Path) -> bool {
    let root = config.project_root.as_path();
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    let hidden = relative.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
    });
    if hidden {
        return false;
    }

    let mut dir = path.parent();
    while let Some(current) = dir {
        if !current.starts_with(root) {
            break;
        }
        let ignore_file = current.join(".gitignore");
        if ignore_file.is_file() {
            let (matcher, _) = Gitignore::new(&ignore_file);
            match matcher.matched_path_or_any_parents(path, false) {
                Match::Ignore(_) => return false,
                Match::Whitelist(_) => return true,
                Match::None => {}
            }
        }
        if current == root {
            break;
        }
        dir = current.parent();
    }
    true
}

// ============================================================================
// Tree walking
// ============================================================================

fn syntax_error(path: &Path, node: &Node, description: String) -> AnalysisError {
    let start = node.start_position();
    let end = node.end_position();
    AnalysisError {
        path: path.to_path_buf(),
        line: start.row + 1,
        column: start.column,
        stop_line: end.row + 1,
        stop_column: end.column,
        code: PARSE_ERROR_CODE,
        name: "Parsing failure".to_string(),
        description,
    }
}

fn collect_syntax_errors(node: &Node, source: &str, path: &Path, out: &mut Vec<AnalysisError>) {
    if out.len() >= MAX_SYNTAX_ERRORS_PER_FILE {
        return;
    }
    if node.is_error() {
        let text = node.utf8_text(source.as_bytes()).unwrap_or("");
        let snippet: String = text.lines().next().unwrap_or("").chars().take(40).collect();
        let description = if snippet.trim().is_empty() {
            "Parsing failure [404]: invalid syntax".to_string()
        } else {
            format!("Parsing failure [404]: invalid syntax near `{}`", snippet.trim())
        };
        out.push(syntax_error(path, node, description));
        return;
    }
    if node.is_missing() {
        out.push(syntax_error(
            path,
            node,
            format!("Parsing failure [404]: expected `{}`", node.kind()),
        ));
        return;
    }
    if !node.has_error() {
        return;
    }
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            collect_syntax_errors(&child, source, path, out);
        }
    }
}

fn collect_imports(
    node: &Node,
    source: &str,
    module: &ModuleName,
    is_package: bool,
    out: &mut Vec<ImportSite>,
) {
    match node.kind() {
        "import_statement" => {
            for i in 0..node.child_count() {
                let Some(child) = node.child(i) else { continue };
                let name_node = match child.kind() {
                    "dotted_name" => Some(child),
                    "aliased_import" => child.child_by_field_name("name"),
                    _ => None,
                };
                if let Some(name_node) = name_node {
                    let written = name_node.utf8_text(source.as_bytes()).unwrap_or("");
                    if !written.is_empty() {
                        out.push(import_site(&name_node, written, Some(written.to_string())));
                    }
                }
            }
        }
        "import_from_statement" => {
            if let Some(name_node) = node.child_by_field_name("module_name") {
                let written = name_node.utf8_text(source.as_bytes()).unwrap_or("");
                if written != "__future__" && !written.is_empty() {
                    let target = absolute_import(module, is_package, written);
                    out.push(import_site(&name_node, written, target));
                }
            }
        }
        _ => {
            for i in 0..node.child_count() {
                if let Some(child) = node.child(i) {
                    collect_imports(&child, source, module, is_package, out);
                }
            }
        }
    }
}

fn import_site(node: &Node, written: &str, target: Option<String>) -> ImportSite {
    let start = node.start_position();
    let end = node.end_position();
    ImportSite {
        target,
        written: written.to_string(),
        line: start.row + 1,
        column: start.column,
        stop_line: end.row + 1,
        stop_column: end.column,
    }
}

/// Resolve a possibly relative import written inside `module`.
fn absolute_import(module: &ModuleName, is_package: bool, written: &str) -> Option<String> {
    let dots = written.chars().take_while(|c| *c == '.').count();
    let rest = written[dots..].trim();
    if dots == 0 {
        return Some(rest.to_string());
    }

    let mut base: Vec<&str> = module.as_str().split('.').collect();
    if !is_package {
        base.pop();
    }
    for _ in 1..dots {
        base.pop()?;
    }
    if !rest.is_empty() {
        base.push(rest);
    }
    if base.is_empty() {
        None
    } else {
        Some(base.join("."))
    }
}
