//! In-memory registry of known live channels.

use std::collections::HashMap;
use std::fmt;

/// Identity of a tracked channel. Never changes once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub id: i64,
    pub name: String,
}

impl ChannelKey {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.name)
    }
}

/// Where a live channel sits in its lifecycle. Ended channels carry no tag:
/// they leave the registry entirely and their store row keeps the terminal
/// flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PendingJoin,
    Monitoring,
}

/// The set of channels the agent currently tracks. Membership here is the
/// sole gate that keeps discovery from enqueueing the same channel twice.
#[derive(Debug, Default)]
pub struct Registry {
    channels: HashMap<ChannelKey, Phase>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &ChannelKey) -> bool {
        self.channels.contains_key(key)
    }

    pub fn add(&mut self, key: ChannelKey, phase: Phase) {
        self.channels.insert(key, phase);
    }

    pub fn set_phase(&mut self, key: &ChannelKey, phase: Phase) {
        if let Some(p) = self.channels.get_mut(key) {
            *p = phase;
        }
    }

    pub fn phase(&self, key: &ChannelKey) -> Option<Phase> {
        self.channels.get(key).copied()
    }

    /// Idempotent: several paths may race to drop the same channel. Returns
    /// whether the key was present.
    pub fn remove(&mut self, key: &ChannelKey) -> bool {
        self.channels.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
