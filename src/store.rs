//! Ordered key/value persistence used for aliases.

use anyhow::{Context, Result, bail};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// External collaborator holding an ordered string map.
pub trait KeyValueStore {
    fn load(&self) -> Result<BTreeMap<String, String>>;

    /// Replaces the stored contents. `comment` describes the data for a
    /// human reader, where the format allows it.
    fn save(&self, entries: &BTreeMap<String, String>, comment: &str) -> Result<()>;
}

/// In-memory store; clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Rc<RefCell<BTreeMap<String, String>>>,
    saves: Rc<RefCell<usize>>,
}

impl MemoryStore {
    /// An empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// An in-memory store holding `entries`.
    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        store
            .entries
            .borrow_mut()
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        store
    }

    /// A copy of what was saved last.
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.entries.borrow().clone()
    }

    /// How many times `save` was called.
    pub fn save_count(&self) -> usize {
        *self.saves.borrow()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.entries.borrow().clone())
    }

    fn save(&self, entries: &BTreeMap<String, String>, _comment: &str) -> Result<()> {
        *self.entries.borrow_mut() = entries.clone();
        *self.saves.borrow_mut() += 1;
        Ok(())
    }
}

/// `key=value` lines in a text file.
///
/// Lines starting with `#` and blank lines are ignored on load; `save`
/// writes the comment as a `#` header. A missing file loads as empty.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store backed by the file at `path`; the file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File the entries live in.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_entries(text: &str, path: &Path) -> Result<BTreeMap<String, String>> {
    let mut entries = BTreeMap::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            bail!("{}:{}: expected key=value", path.display(), number + 1);
        };
        entries.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(entries)
}

impl KeyValueStore for FileStore {
    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("can't read {}", self.path.display()))?;
        parse_entries(&text, &self.path)
    }

    fn save(&self, entries: &BTreeMap<String, String>, comment: &str) -> Result<()> {
        let mut file = fs::File::create(&self.path)
            .with_context(|| format!("can't create {}", self.path.display()))?;
        if !comment.is_empty() {
            writeln!(file, "# {comment}")?;
        }
        for (key, value) in entries {
            writeln!(file, "{key}={value}")?;
        }
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("shell_dispatch_{}_{name}", std::process::id()))
    }

    #[test]
    fn test_file_store_round_trip() {
        let path = temp_path("aliases");
        let store = FileStore::new(&path);
        let mut entries = BTreeMap::new();
        entries.insert("ls".to_string(), "tables".to_string());
        entries.insert("size".to_string(), "select count(*) from".to_string());

        store.save(&entries, "Aliases").unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Aliases\n"));
        assert_eq!(store.load().unwrap(), entries);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let store = FileStore::new(temp_path("missing"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_line_is_an_error() {
        let err = parse_entries("ok=1\nbroken\n", Path::new("aliases.txt")).unwrap_err();
        assert_eq!(err.to_string(), "aliases.txt:2: expected key=value");
    }

    #[test]
    fn test_memory_store_shares_contents() {
        let store = MemoryStore::with_entries([("a", "echo a")]);
        let other = store.clone();
        other.save(&BTreeMap::new(), "").unwrap();
        assert!(store.load().unwrap().is_empty());
        assert_eq!(store.save_count(), 1);
    }
}
