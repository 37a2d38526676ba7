//! Secret slots passed opaquely to external tools

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, warn};

const REDACTED: &str = "***";

/// A credential value that never prints itself
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value, for handing to a child process environment only
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Named secret slots resolved for one run
#[derive(Debug, Clone, Default)]
pub struct SecretStore {
    values: HashMap<String, Secret>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every slot from the environment variable it is mapped to.
    ///
    /// Unset variables leave the slot empty; jobs that reference an empty
    /// slot fail when they try to use it.
    pub fn from_env(slots: &BTreeMap<String, String>) -> Self {
        Self::from_lookup(slots, |name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(slots: &BTreeMap<String, String>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut store = Self::new();
        for (slot, var) in slots {
            match lookup(var) {
                Some(value) if !value.is_empty() => {
                    debug!("Secret slot '{}' loaded from ${}", slot, var);
                    store.insert(slot.clone(), Secret::new(value));
                }
                _ => warn!("Secret slot '{}' is empty (${} not set)", slot, var),
            }
        }
        store
    }

    pub fn insert(&mut self, slot: String, secret: Secret) {
        self.values.insert(slot, secret);
    }

    pub fn get(&self, slot: &str) -> Option<&Secret> {
        self.values.get(slot)
    }

    /// Mask every known secret value inside `text`
    pub fn redact(&self, text: &str) -> String {
        self.values
            .values()
            .filter(|s| !s.0.is_empty())
            .fold(text.to_string(), |acc, s| acc.replace(&s.0, REDACTED))
    }
}
