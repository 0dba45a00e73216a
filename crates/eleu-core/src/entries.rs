//! Plaintext vault contents: password entries and the queries run over them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::ids::{now_millis, uid};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub updated_at: i64,
}

impl Entry {
    pub fn new(title: &str) -> Self {
        Self {
            id: uid("e"),
            title: title.to_string(),
            username: None,
            password: None,
            url: None,
            notes: None,
            updated_at: now_millis(),
        }
    }

    pub fn has_password(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
    }

    pub fn host(&self) -> Option<String> {
        self.url.as_deref().and_then(hostname)
    }

    fn matches_query(&self, needle: &str) -> bool {
        let hit = |field: Option<&str>| field.is_some_and(|f| f.to_lowercase().contains(needle));
        hit(Some(&self.title))
            || hit(self.username.as_deref())
            || hit(self.url.as_deref())
            || hit(self.notes.as_deref())
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("url", &self.url)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultContents {
    pub entries: Vec<Entry>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    /// Case-insensitive substring over title, username, url and notes.
    /// Matched as typed; a blank query matches everything.
    pub query: String,
    /// Exact URL host; `None` means every site.
    pub site: Option<String>,
    pub only_with_password: bool,
}

impl VaultContents {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            updated_at: now_millis(),
        }
    }

    /// Replace the entry with the same id in place, or put a new one first.
    pub fn upsert(&mut self, entry: Entry) {
        match self.entries.iter().position(|e| e.id == entry.id) {
            Some(idx) => self.entries[idx] = entry,
            None => self.entries.insert(0, entry),
        }
        self.updated_at = now_millis();
    }

    /// Prepend imported entries, keeping their order. Returns how many were added.
    pub fn import(&mut self, entries: Vec<Entry>) -> usize {
        let added = entries.len();
        if added == 0 {
            return 0;
        }
        self.entries.splice(0..0, entries);
        self.updated_at = now_millis();
        added
    }

    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn filter(&self, filter: &EntryFilter) -> Vec<&Entry> {
        let searching = !filter.query.trim().is_empty();
        let needle = filter.query.to_lowercase();
        self.entries
            .iter()
            .filter(|e| !searching || e.matches_query(&needle))
            .filter(|e| match &filter.site {
                Some(site) => e.host().as_deref() == Some(site.as_str()),
                None => true,
            })
            .filter(|e| !filter.only_with_password || e.has_password())
            .collect()
    }

    /// Distinct URL hosts across all entries, sorted.
    pub fn sites(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(Entry::host)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Lower-cased host of an absolute URL (`scheme://[user@]host[:port]/...`).
pub fn hostname(url: &str) -> Option<String> {
    let (scheme, rest) = url.trim().split_once("://")?;
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) {
        return None;
    }
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = if let Some(bracketed) = host_port.strip_prefix('[') {
        bracketed.split(']').next().unwrap_or_default()
    } else {
        host_port.split(':').next().unwrap_or_default()
    };
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}
