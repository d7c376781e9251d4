//! File loading and the loaded-file cache
//!
//! Reads `.sdl` files, resolves their imports relative to the importing
//! file, registers declarations and runs type inference. Loaded files are
//! immutable and shared; the cache is keyed by a blake3 hash over a file's
//! contents and the keys of everything it imports, so an edit anywhere in
//! the import graph produces a fresh entry.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::{LoadError, Result, SdlError};
use crate::interpreter::scope::FileEnv;
use crate::interpreter::{check_file, parse_file};

/// Extension tried when an import path has none.
const SOURCE_EXTENSION: &str = "sdl";

/// A parsed, registered and type-checked file.
pub struct LoadedFile {
    path: PathBuf,
    key: blake3::Hash,
    env: Arc<FileEnv>,
    imports: Vec<Arc<LoadedFile>>,
}

impl LoadedFile {
    /// Path the file was read from (or the name given to `load_source`).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cache key.
    pub fn key(&self) -> blake3::Hash {
        self.key
    }

    /// Declaration registry.
    pub fn env(&self) -> &Arc<FileEnv> {
        &self.env
    }

    /// Directly imported files.
    pub fn imports(&self) -> &[Arc<LoadedFile>] {
        &self.imports
    }

    /// Systems declared in this file, sorted.
    pub fn system_names(&self) -> Vec<String> {
        self.env.system_names()
    }
}

impl fmt::Debug for LoadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedFile")
            .field("path", &self.path)
            .field("key", &self.key.to_hex().as_str())
            .field("imports", &self.imports.len())
            .finish()
    }
}

/// Loader with a content-addressed cache
#[derive(Debug, Default)]
pub struct Loader {
    cache: HashMap<blake3::Hash, Arc<LoadedFile>>,
    stack: Vec<PathBuf>,
}

impl Loader {
    /// Create an empty loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached files
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Load a file and everything it imports
    pub fn load(&mut self, path: &Path) -> Result<Arc<LoadedFile>> {
        let source = read(path)?;
        self.load_text(path.to_path_buf(), &source)
    }

    /// Load source text under `name`. Imports resolve relative to the
    /// directory part of `name`.
    pub fn load_source(&mut self, name: &str, source: &str) -> Result<Arc<LoadedFile>> {
        self.load_text(PathBuf::from(name), source)
    }

    fn load_text(&mut self, path: PathBuf, source: &str) -> Result<Arc<LoadedFile>> {
        let identity = identity(&path);
        if let Some(start) = self.stack.iter().position(|p| *p == identity) {
            let mut chain: Vec<String> = self.stack[start..]
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            chain.push(identity.display().to_string());
            return Err(LoadError::ImportCycle(chain.join(" -> ")).into());
        }

        self.stack.push(identity);
        let result = self.load_unguarded(path, source);
        self.stack.pop();
        result
    }

    fn load_unguarded(&mut self, path: PathBuf, source: &str) -> Result<Arc<LoadedFile>> {
        let name = path.display().to_string();
        let file = parse_file(&name, source)?;
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let mut hasher = blake3::Hasher::new();
        hasher.update(source.as_bytes());

        let mut imports = Vec::new();
        let mut by_path = HashMap::new();
        for import in &file.imports {
            if by_path.contains_key(&import.path) {
                continue;
            }
            let resolved = resolve_import(&base, &import.path).ok_or_else(|| LoadError::MissingImport {
                file: name.clone(),
                path: import.path.clone(),
            })?;
            let text = read(&resolved)?;
            let loaded = self.load_text(resolved, &text)?;
            hasher.update(import.path.as_bytes());
            hasher.update(loaded.key.as_bytes());
            by_path.insert(import.path.clone(), loaded.env.clone());
            imports.push(loaded);
        }
        let key = hasher.finalize();

        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(file = %name, "loader cache hit");
            return Ok(cached.clone());
        }

        let env = Arc::new(FileEnv::build(file, &by_path).map_err(SdlError::TypeCheck)?);
        let errors = check_file(&env);
        if !errors.is_empty() {
            return Err(SdlError::TypeCheck(errors));
        }

        let loaded = Arc::new(LoadedFile {
            path,
            key,
            env,
            imports,
        });
        tracing::debug!(file = %name, key = %key.to_hex(), "loaded file");
        self.cache.insert(key, loaded.clone());
        Ok(loaded)
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|source| {
            LoadError::Io {
                path: path.to_path_buf(),
                source,
            }
        })
        .map_err(SdlError::from)
}

/// Stable identity of a path for cycle detection.
fn identity(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Resolve an import relative to the importing file, trying the `.sdl`
/// extension when the path as written does not exist.
fn resolve_import(base: &Path, import: &str) -> Option<PathBuf> {
    let candidate = base.join(import);
    if candidate.is_file() {
        return Some(candidate);
    }
    if candidate.extension().is_none() {
        let with_extension = candidate.with_extension(SOURCE_EXTENSION);
        if with_extension.is_file() {
            return Some(with_extension);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn imports_resolve_relative_to_the_importing_file() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "lib/disk.sdl", "component Disk { method Read(): bool { return true } }");
        let main = write(
            temp.path(),
            "main.sdl",
            r#"import Disk from "lib/disk"; system S { instance d: Disk; }"#,
        );

        let mut loader = Loader::new();
        let loaded = loader.load(&main).unwrap();
        assert_eq!(loaded.imports().len(), 1);
        assert!(loaded.env().component("Disk").is_some());
        assert_eq!(loaded.system_names(), vec!["S".to_string()]);
    }

    #[test]
    fn unchanged_files_come_from_the_cache() {
        let temp = TempDir::new().unwrap();
        let main = write(temp.path(), "main.sdl", "component C { }");
        let mut loader = Loader::new();
        let first = loader.load(&main).unwrap();
        let second = loader.load(&main).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        write(temp.path(), "main.sdl", "component C { param N = 1; }");
        let third = loader.load(&main).unwrap();
        assert_ne!(first.key(), third.key());
        assert_eq!(loader.cached(), 2);
    }

    #[test]
    fn edits_to_an_import_change_the_importer_key() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "lib.sdl", "component A { }");
        let main = write(temp.path(), "main.sdl", r#"import A from "lib.sdl";"#);
        let mut loader = Loader::new();
        let before = loader.load(&main).unwrap().key();
        write(temp.path(), "lib.sdl", "component A { param X = 2; }");
        let after = loader.load(&main).unwrap().key();
        assert_ne!(before, after);
    }

    #[test]
    fn import_cycles_are_reported() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.sdl", r#"import B from "b.sdl"; component A { }"#);
        write(temp.path(), "b.sdl", r#"import A from "a.sdl"; component B { }"#);
        let err = Loader::new().load(&temp.path().join("a.sdl")).unwrap_err();
        assert!(matches!(err, SdlError::Load(LoadError::ImportCycle(_))), "{err}");
    }

    #[test]
    fn missing_imports_name_the_importer() {
        let temp = TempDir::new().unwrap();
        let main = write(temp.path(), "main.sdl", r#"import X from "nowhere";"#);
        let err = Loader::new().load(&main).unwrap_err();
        assert!(matches!(
            err,
            SdlError::Load(LoadError::MissingImport { ref path, .. }) if path == "nowhere"
        ));
    }

    #[test]
    fn type_errors_fail_the_load() {
        let mut loader = Loader::new();
        let err = loader
            .load_source("inline.sdl", "component C { method M(): bool { return 1 } }")
            .unwrap_err();
        assert!(matches!(err, SdlError::TypeCheck(ref errors) if errors.len() == 1));
        assert_eq!(loader.cached(), 0);
    }
}
