//! Keyring state machine
//!
//! [`KeySet`] holds the entries and the default designation and implements
//! every mutation. It carries no lock of its own; callers serialize access.

use crate::mutation::Mutation;
use crate::types::*;
use tracing::warn;

/// Set of key entries, unique by name, with an optional default
#[derive(Debug, Default)]
pub struct KeySet {
    keys: Vec<SecretKey>,
    /// Always names an entry in `keys` when set
    default: Option<KeyName>,
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Name of the default entry, if one is designated
    pub fn default_name(&self) -> Option<KeyName> {
        self.default
    }

    pub fn contains(&self, name: &KeyName) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &KeyName) -> Option<usize> {
        self.keys.iter().position(|k| k.has_name(name))
    }

    /// Add an entry unless one with the same name is present
    pub fn install(&mut self, entry: SecretKey) -> MutationOutcome {
        if self.contains(&entry.name()) {
            return MutationOutcome::AlreadyPresent;
        }
        self.keys.push(entry);
        MutationOutcome::Applied
    }

    /// Zero and remove the named entry
    pub fn remove(&mut self, name: &KeyName) -> MutationOutcome {
        match self.detach(name) {
            Some(_) => MutationOutcome::Applied,
            None => MutationOutcome::NotFound,
        }
    }

    /// Zero the named entry in place, then take it out of the set.
    fn detach(&mut self, name: &KeyName) -> Option<SecretKey> {
        let idx = self.position(name)?;
        self.keys[idx].wipe();
        let entry = self.keys.swap_remove(idx);
        if self.default == Some(*name) {
            self.default = None;
        }
        Some(entry)
    }

    /// Designate the default entry.
    ///
    /// The previous default is cleared first, so a miss leaves no default.
    pub fn set_default(&mut self, name: &KeyName) -> MutationOutcome {
        self.default = None;
        if !self.contains(name) {
            return MutationOutcome::NotFound;
        }
        self.default = Some(*name);
        MutationOutcome::Applied
    }

    /// Zero and drop every entry. Returns how many were wiped.
    pub fn wipe(&mut self) -> usize {
        self.drain_wiped().len()
    }

    fn drain_wiped(&mut self) -> Vec<SecretKey> {
        for key in self.keys.iter_mut() {
            key.wipe();
        }
        self.default = None;
        std::mem::take(&mut self.keys)
    }

    /// Apply a decoded mutation
    pub fn apply(&mut self, mutation: Mutation) -> MutationOutcome {
        match mutation {
            Mutation::Install(entry) => self.install(entry),
            Mutation::Remove(name) => self.remove(&name),
            Mutation::SetDefault(name) => self.set_default(&name),
            Mutation::Wipe => {
                self.wipe();
                MutationOutcome::Applied
            }
        }
    }

    /// Copy the current contents
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            default: self.default,
            keys: self.keys.clone(),
        }
    }

    /// Discard everything and adopt a snapshot's entries and default.
    ///
    /// Duplicate names keep the first entry. A default that names no adopted
    /// entry is dropped.
    pub fn replace_all(&mut self, snapshot: Snapshot) {
        self.wipe();

        let Snapshot { default, keys } = snapshot;
        for key in keys {
            let name = key.name();
            if self.install(key) == MutationOutcome::AlreadyPresent {
                warn!("dropping duplicate key {} from snapshot", name);
            }
        }

        if let Some(name) = default {
            if self.set_default(&name).is_miss() {
                warn!("cannot set default key {}", name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: u8, material: &[u8]) -> SecretKey {
        let mut bytes = vec![name; NAME_LEN];
        bytes.extend_from_slice(material);
        SecretKey::new(bytes).unwrap()
    }

    fn name(n: u8) -> KeyName {
        KeyName([n; NAME_LEN])
    }

    #[test]
    fn test_duplicate_install_is_noop() {
        let mut set = KeySet::new();
        let k1 = entry(1, &[0xA1; 8]);
        let k1_dup = entry(1, &[0xB2; 8]);

        assert_eq!(set.install(k1.clone()), MutationOutcome::Applied);
        assert_eq!(set.install(k1_dup), MutationOutcome::AlreadyPresent);

        let snapshot = set.snapshot();
        assert_eq!(snapshot.keys, vec![k1]);
        assert_eq!(snapshot.default, None);
    }

    #[test]
    fn test_remove_zeroes_entry() {
        let mut set = KeySet::new();
        set.install(entry(1, &[7; 8]));
        set.install(entry(2, &[8; 8]));

        let removed = set.detach(&name(1)).unwrap();
        assert!(removed.is_wiped());
        assert_eq!(removed.len(), NAME_LEN + 8);
        assert_eq!(set.len(), 1);
        assert!(set.contains(&name(2)));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut set = KeySet::new();
        let k1 = entry(1, &[7; 8]);
        set.install(k1.clone());
        set.set_default(&name(1));

        assert_eq!(set.remove(&name(9)), MutationOutcome::NotFound);
        assert_eq!(set.snapshot(), Snapshot::new(Some(name(1)), vec![k1]));
    }

    #[test]
    fn test_removing_default_clears_it() {
        let mut set = KeySet::new();
        let k2 = entry(2, &[2; 8]);
        set.install(entry(1, &[1; 8]));
        set.install(k2.clone());
        assert_eq!(set.set_default(&name(1)), MutationOutcome::Applied);

        assert_eq!(set.remove(&name(1)), MutationOutcome::Applied);

        let snapshot = set.snapshot();
        assert_eq!(snapshot.keys, vec![k2]);
        assert_eq!(snapshot.default, None);
    }

    #[test]
    fn test_set_default_miss_clears_previous() {
        let mut set = KeySet::new();
        set.install(entry(1, &[1; 8]));
        set.set_default(&name(1));
        assert_eq!(set.default_name(), Some(name(1)));

        assert_eq!(set.set_default(&name(5)), MutationOutcome::NotFound);
        assert_eq!(set.default_name(), None);
    }

    #[test]
    fn test_wipe_zeroes_everything() {
        let mut set = KeySet::new();
        set.install(entry(1, &[1; 8]));
        set.install(entry(2, &[2; 12]));
        set.set_default(&name(2));

        let wiped = set.drain_wiped();
        assert_eq!(wiped.len(), 2);
        assert!(wiped.iter().all(SecretKey::is_wiped));
        assert!(set.is_empty());
        assert_eq!(set.default_name(), None);

        assert_eq!(set.apply(Mutation::Wipe), MutationOutcome::Applied);
    }

    #[test]
    fn test_replace_all_without_default() {
        let mut set = KeySet::new();
        set.install(entry(9, &[9; 8]));
        set.set_default(&name(9));

        let k1 = entry(1, &[1; 8]);
        let k2 = entry(2, &[2; 8]);
        set.replace_all(Snapshot::new(None, vec![k1.clone(), k2.clone()]));

        assert_eq!(set.default_name(), None);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&k1.name()));
        assert!(set.contains(&k2.name()));
        assert!(!set.contains(&name(9)));
    }

    #[test]
    fn test_replace_all_resolves_default() {
        let mut set = KeySet::new();
        let k1 = entry(1, &[1; 8]);

        set.replace_all(Snapshot::new(Some(name(1)), vec![k1.clone(), k1.clone()]));
        assert_eq!(set.len(), 1);
        assert_eq!(set.default_name(), Some(name(1)));

        set.replace_all(Snapshot::new(Some(name(3)), vec![k1]));
        assert_eq!(set.default_name(), None);
    }

    #[test]
    fn test_apply_dispatch() {
        let mut set = KeySet::new();
        let k1 = entry(1, &[1; 8]);

        assert_eq!(set.apply(Mutation::Install(k1.clone())), MutationOutcome::Applied);
        assert_eq!(set.apply(Mutation::SetDefault(name(1))), MutationOutcome::Applied);
        assert_eq!(set.apply(Mutation::Remove(name(1))), MutationOutcome::Applied);
        assert_eq!(set.apply(Mutation::Remove(name(1))), MutationOutcome::NotFound);
        assert!(set.is_empty());
    }
}
