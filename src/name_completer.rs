use crate::completion::{Alternatives, SortedMatches, set_matches};
use crate::error::RegistryError;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Case-insensitive completion over a set of names.
///
/// Two sorted indexes are kept over the same names: the exact-case set and a
/// lower-cased view mapping each canonical form back to the name as it was
/// added. Lookups try the exact case first and fall back to the canonical
/// index, recovering the original casing of the partial input from the first
/// canonical hit.
#[derive(Debug, Default, Clone)]
pub struct NameCompleter {
    names: BTreeSet<String>,
    canonical: BTreeMap<String, String>,
}

impl NameCompleter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a name. Adding the exact same name twice is rejected; a name that
    /// only differs in case from an existing one is completed, but the
    /// canonical lookup keeps pointing at the first one added.
    pub fn add_name(&mut self, name: impl Into<String>) -> Result<(), RegistryError> {
        let name = name.into();
        if self.names.contains(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        self.canonical
            .entry(name.to_lowercase())
            .or_insert_with(|| name.clone());
        self.names.insert(name);
        Ok(())
    }

    pub fn remove_name(&mut self, name: &str) -> bool {
        if !self.names.remove(name) {
            return false;
        }
        let canonical = name.to_lowercase();
        if self.canonical.get(&canonical).is_some_and(|n| n == name) {
            self.canonical.remove(&canonical);
            // another spelling of the same canonical name may still be around
            if let Some(other) = self.names.iter().find(|n| n.to_lowercase() == canonical) {
                self.canonical.insert(canonical, other.clone());
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.names.clear();
        self.canonical.clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Lazy candidates for `partial`, or `None` when nothing matches in
    /// either case.
    pub fn get_alternatives<'a>(
        &'a self,
        partial: &str,
    ) -> Option<SortedMatches<'a, impl Iterator<Item = &'a str> + use<'a>>> {
        let exact_hit = self
            .names
            .range::<str, _>((Bound::Included(partial), Bound::Unbounded))
            .next()
            .is_some_and(|first| first.starts_with(partial));
        if exact_hit {
            return Some(set_matches(partial, &self.names));
        }

        let lowered = partial.to_lowercase();
        let (first, original) = self
            .canonical
            .range::<str, _>((Bound::Included(lowered.as_str()), Bound::Unbounded))
            .next()?;
        if !first.starts_with(lowered.as_str()) {
            return None;
        }
        let recased: String = original.chars().take(partial.chars().count()).collect();
        Some(set_matches(&recased, &self.names))
    }

    /// All candidates for `partial`, classified by count.
    pub fn alternatives(&self, partial: &str) -> Alternatives {
        match self.get_alternatives(partial) {
            Some(matches) => matches.collect(),
            None => Alternatives::NoMatch,
        }
    }
}

impl<S: Into<String>> FromIterator<S> for NameCompleter {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut completer = NameCompleter::new();
        for name in iter {
            // duplicates collapse into one entry
            let _ = completer.add_name(name);
        }
        completer
    }
}
