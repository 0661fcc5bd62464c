//! Remembers where re-hosted media ended up.
//!
//! Re-hosting a video is the slowest step of a delivery, and the hosted copy
//! stays valid, so a repeated request for the same identifier can be served
//! straight from its URL. Entries live in memory only and the oldest one is
//! evicted once the record is full.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

/// Entries kept before the oldest is evicted.
const DEFAULT_HOSTED_CAPACITY: usize = 512;

#[derive(Default)]
struct Entries {
    urls: HashMap<String, String>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

/// Bounded identifier -> hosted URL record.
pub struct HostedMedia {
    capacity: usize,
    entries: Mutex<Entries>,
}

impl HostedMedia {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(Entries::default()),
        }
    }

    pub fn get(&self, identifier: &str) -> Option<String> {
        self.entries.lock().urls.get(identifier).cloned()
    }

    /// Record `url` for `identifier`, replacing any earlier URL.
    pub fn record(&self, identifier: &str, url: &str) {
        let mut entries = self.entries.lock();
        if entries
            .urls
            .insert(identifier.to_string(), url.to_string())
            .is_some()
        {
            entries.order.retain(|id| id != identifier);
        }
        entries.order.push_back(identifier.to_string());

        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.urls.remove(&oldest);
            }
        }
    }

    /// Drop the entry for `identifier`, e.g. after its URL stopped working.
    pub fn forget(&self, identifier: &str) {
        let mut entries = self.entries.lock();
        if entries.urls.remove(identifier).is_some() {
            entries.order.retain(|id| id != identifier);
        }
    }
}

impl Default for HostedMedia {
    fn default() -> Self {
        Self::new(DEFAULT_HOSTED_CAPACITY)
    }
}
