//! Persistent knowledge base of reusable insights.
//!
//! [`KnowledgeStore`] owns every [`KnowledgeUnit`] by id and keeps two derived
//! indexes (domain → ids, tag → ids). The indexes are rebuilt from the units on
//! load and never written to disk, so they cannot drift from the data.
//!
//! All state lives behind a single mutex. Every mutation updates memory and
//! rewrites the JSON snapshot while holding it (write-through), so concurrent
//! workers can never interleave a read-modify-write on the indexes.

pub mod similarity;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::error::{KnowledgeError, KnowledgeResult};
use similarity::{jaccard, token_set};

/// Knowledge quality scores are on a 0–5 rubric.
pub const MAX_QUALITY: f64 = 5.0;

/// Default number of prior units compared per new unit.
pub const DEFAULT_CONSISTENCY_WINDOW: usize = 10;

/// One atomic, reusable insight extracted from a task's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeUnit {
    pub id: String,
    pub content: String,
    pub domain: String,
    pub source_task_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub quality_score: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl KnowledgeUnit {
    /// Create a unit with a deterministic id derived from its source.
    pub fn new(
        source_task_id: &str,
        ordinal: usize,
        content: impl Into<String>,
        domain: impl Into<String>,
        tags: impl IntoIterator<Item = String>,
    ) -> Self {
        let content = content.into();
        Self {
            id: unit_id(source_task_id, ordinal, &content),
            content,
            domain: domain.into(),
            source_task_id: source_task_id.to_string(),
            created_at: Utc::now(),
            usage_count: 0,
            quality_score: 0.0,
            tags: tags
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// Set the quality score, clamped to `[0, 5]`.
    pub fn with_quality(mut self, score: f64) -> Self {
        self.quality_score = if score.is_finite() {
            score.clamp(0.0, MAX_QUALITY)
        } else {
            0.0
        };
        self
    }
}

/// `{task}_{ordinal}_{first 8 hex chars of md5(content)}`.
pub fn unit_id(source_task_id: &str, ordinal: usize, content: &str) -> String {
    let digest = Md5::digest(content.as_bytes());
    let hash = hex::encode(digest);
    format!("{source_task_id}_{ordinal}_{}", &hash[..8])
}

/// Lookup parameters for [`KnowledgeStore::find_relevant`].
#[derive(Debug, Clone, Default)]
pub struct KnowledgeQuery {
    /// Domain to search (required).
    pub domain: String,
    /// Keep units carrying any of these tags. Empty means no tag filter.
    pub tags: Vec<String>,
    /// Keep units whose content contains any of these keywords
    /// (case-insensitive). Empty means no keyword filter.
    pub keywords: Vec<String>,
    /// Maximum number of units returned.
    pub limit: Option<usize>,
}

impl KnowledgeQuery {
    pub fn domain(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Default::default()
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_keywords(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// What happens when a snapshot write fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistenceMode {
    /// Log a warning and continue in memory only.
    #[default]
    Degrade,
    /// Undo the mutation and return [`KnowledgeError::Persist`].
    Strict,
}

/// Summary counts for inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeStats {
    pub total_units: usize,
    pub total_usage: u64,
    pub domains: BTreeMap<String, usize>,
    pub tags: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    knowledge_units: Vec<KnowledgeUnit>,
    #[serde(default)]
    metadata: Option<SnapshotMetadata>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotMetadata {
    total_units: usize,
    last_updated: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    units: HashMap<String, KnowledgeUnit>,
    by_domain: HashMap<String, BTreeSet<String>>,
    by_tag: HashMap<String, BTreeSet<String>>,
    /// Set after a failed write in [`PersistenceMode::Degrade`].
    memory_only: bool,
}

impl Inner {
    fn from_units(units: Vec<KnowledgeUnit>) -> Self {
        let mut inner = Self::default();
        for unit in units {
            inner.insert(unit);
        }
        inner
    }

    /// Insert or overwrite, returning the replaced unit.
    fn insert(&mut self, unit: KnowledgeUnit) -> Option<KnowledgeUnit> {
        let previous = self.units.remove(&unit.id);
        if let Some(old) = &previous {
            self.unindex(old);
        }
        self.by_domain
            .entry(unit.domain.clone())
            .or_default()
            .insert(unit.id.clone());
        for tag in &unit.tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(unit.id.clone());
        }
        self.units.insert(unit.id.clone(), unit);
        previous
    }

    fn remove(&mut self, id: &str) {
        if let Some(old) = self.units.remove(id) {
            self.unindex(&old);
        }
    }

    fn unindex(&mut self, unit: &KnowledgeUnit) {
        if let Some(ids) = self.by_domain.get_mut(&unit.domain) {
            ids.remove(&unit.id);
            if ids.is_empty() {
                self.by_domain.remove(&unit.domain);
            }
        }
        for tag in &unit.tags {
            if let Some(ids) = self.by_tag.get_mut(tag) {
                ids.remove(&unit.id);
                if ids.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
    }

    fn relevant(&self, query: &KnowledgeQuery) -> Vec<&KnowledgeUnit> {
        let Some(domain_ids) = self.by_domain.get(&query.domain) else {
            return Vec::new();
        };

        let tag_ids: Option<BTreeSet<&String>> = (!query.tags.is_empty()).then(|| {
            query
                .tags
                .iter()
                .filter_map(|t| self.by_tag.get(t))
                .flatten()
                .collect()
        });

        let keywords: Vec<String> = query
            .keywords
            .iter()
            .map(|k| k.to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        let mut hits: Vec<&KnowledgeUnit> = domain_ids
            .iter()
            .filter(|id| tag_ids.as_ref().is_none_or(|tags| tags.contains(id)))
            .filter_map(|id| self.units.get(id))
            .filter(|unit| {
                if keywords.is_empty() {
                    return true;
                }
                let content = unit.content.to_lowercase();
                keywords.iter().any(|k| content.contains(k.as_str()))
            })
            .collect();

        hits.sort_by(|a, b| {
            b.quality_score
                .total_cmp(&a.quality_score)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }
        hits
    }

    fn snapshot(&self) -> Snapshot {
        let mut knowledge_units: Vec<KnowledgeUnit> = self.units.values().cloned().collect();
        knowledge_units.sort_by(|a, b| a.id.cmp(&b.id));
        Snapshot {
            metadata: Some(SnapshotMetadata {
                total_units: knowledge_units.len(),
                last_updated: Utc::now(),
            }),
            knowledge_units,
        }
    }
}

/// Durable, indexed collection of knowledge units.
#[derive(Debug)]
pub struct KnowledgeStore {
    path: Option<PathBuf>,
    mode: PersistenceMode,
    consistency_window: usize,
    inner: Mutex<Inner>,
}

impl KnowledgeStore {
    /// Open the store backed by `path`.
    ///
    /// A missing snapshot starts an empty store. An unreadable or corrupt one
    /// is moved aside to `<path>.corrupt` and the store starts empty. Opening
    /// never fails.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let units = read_units(&path, true);
        Self {
            path: Some(path),
            mode: PersistenceMode::default(),
            consistency_window: DEFAULT_CONSISTENCY_WINDOW,
            inner: Mutex::new(Inner::from_units(units)),
        }
    }

    /// Load the snapshot at `path` into a store that never writes back.
    ///
    /// A corrupt snapshot is left where it is and the store starts empty.
    pub fn open_read_only(path: impl AsRef<Path>) -> Self {
        let units = read_units(path.as_ref(), false);
        Self {
            path: None,
            mode: PersistenceMode::default(),
            consistency_window: DEFAULT_CONSISTENCY_WINDOW,
            inner: Mutex::new(Inner::from_units(units)),
        }
    }

    /// Create a store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            mode: PersistenceMode::default(),
            consistency_window: DEFAULT_CONSISTENCY_WINDOW,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Number of prior units each new unit is compared against.
    pub fn with_consistency_window(mut self, window: usize) -> Self {
        self.consistency_window = window.max(1);
        self
    }

    pub fn with_persistence_mode(mut self, mode: PersistenceMode) -> Self {
        self.mode = mode;
        self
    }

    /// Snapshot path, if persistent.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether mutations are still written to disk.
    pub fn is_persistent(&self) -> bool {
        self.path.is_some() && !self.read().memory_only
    }

    /// Insert or overwrite a unit, then persist.
    pub fn add(&self, unit: KnowledgeUnit) -> KnowledgeResult<()> {
        self.add_all(vec![unit])
    }

    /// Insert or overwrite several units with a single snapshot write.
    pub fn add_all(&self, units: Vec<KnowledgeUnit>) -> KnowledgeResult<()> {
        if units.is_empty() {
            return Ok(());
        }
        let mut inner = self.write()?;
        let mut undo: Vec<(String, Option<KnowledgeUnit>)> = Vec::with_capacity(units.len());
        for unit in units {
            let id = unit.id.clone();
            let previous = inner.insert(unit);
            undo.push((id, previous));
        }

        if let Err(e) = self.persist(&mut inner) {
            for (id, previous) in undo.into_iter().rev() {
                match previous {
                    Some(old) => {
                        inner.insert(old);
                    }
                    None => inner.remove(&id),
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Increment a unit's usage count.
    ///
    /// Returns `Ok(false)` (and logs) when the id is unknown; usage tracking
    /// never fails a caller because of a stale id.
    pub fn record_usage(&self, id: &str) -> KnowledgeResult<bool> {
        Ok(self.record_usages(&[id.to_string()])? == 1)
    }

    /// Increment usage for every known id in `ids`; returns how many matched.
    pub fn record_usages(&self, ids: &[String]) -> KnowledgeResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut inner = self.write()?;
        let mut touched = Vec::new();
        for id in ids {
            match inner.units.get_mut(id) {
                Some(unit) => {
                    unit.usage_count += 1;
                    touched.push(id.as_str());
                }
                None => tracing::debug!(id = %id, "usage recorded for unknown knowledge unit"),
            }
        }
        if touched.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.persist(&mut inner) {
            for id in &touched {
                if let Some(unit) = inner.units.get_mut(*id) {
                    unit.usage_count -= 1;
                }
            }
            return Err(e);
        }
        Ok(touched.len())
    }

    /// Units in `query.domain`, filtered by tags and keywords, best first.
    ///
    /// Ordered by quality score, then recency, then id. Never fails; an
    /// unknown domain yields an empty list.
    pub fn find_relevant(&self, query: &KnowledgeQuery) -> Vec<KnowledgeUnit> {
        self.read().relevant(query).into_iter().cloned().collect()
    }

    /// Agreement of `new_units` with prior knowledge in `domain`, in `[0, 1]`.
    ///
    /// Each new unit scores the maximum token-set Jaccard similarity against
    /// the top `consistency_window` relevant prior units; the result is the
    /// mean over new units. With nothing new, or nothing prior in the domain,
    /// the result is 1.0: an empty prior is treated as vacuously consistent.
    pub fn consistency(&self, new_units: &[KnowledgeUnit], domain: &str) -> f64 {
        if new_units.is_empty() {
            return 1.0;
        }
        let prior =
            self.find_relevant(&KnowledgeQuery::domain(domain).with_limit(self.consistency_window));
        if prior.is_empty() {
            return 1.0;
        }

        let prior_tokens: Vec<_> = prior.iter().map(|u| token_set(&u.content)).collect();
        let total: f64 = new_units
            .iter()
            .map(|unit| {
                let tokens = token_set(&unit.content);
                prior_tokens
                    .iter()
                    .map(|p| jaccard(&tokens, p))
                    .fold(0.0_f64, f64::max)
            })
            .sum();
        total / new_units.len() as f64
    }

    /// Get a unit by id.
    pub fn get(&self, id: &str) -> Option<KnowledgeUnit> {
        self.read().units.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().units.is_empty()
    }

    /// All domains with at least one unit, sorted.
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.read().by_domain.keys().cloned().collect();
        domains.sort();
        domains
    }

    /// Ids indexed under `domain`, sorted.
    pub fn ids_in_domain(&self, domain: &str) -> Vec<String> {
        self.read()
            .by_domain
            .get(domain)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Ids indexed under `tag`, sorted.
    pub fn ids_with_tag(&self, tag: &str) -> Vec<String> {
        self.read()
            .by_tag
            .get(tag)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> KnowledgeStats {
        let inner = self.read();
        KnowledgeStats {
            total_units: inner.units.len(),
            total_usage: inner.units.values().map(|u| u.usage_count).sum(),
            domains: inner
                .by_domain
                .iter()
                .map(|(d, ids)| (d.clone(), ids.len()))
                .collect(),
            tags: inner
                .by_tag
                .iter()
                .map(|(t, ids)| (t.clone(), ids.len()))
                .collect(),
        }
    }

    /// Write the snapshot now, regardless of the memory-only fallback.
    pub fn save(&self) -> KnowledgeResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut inner = self.write()?;
        write_snapshot(path, &inner.snapshot())?;
        inner.memory_only = false;
        Ok(())
    }

    fn persist(&self, inner: &mut Inner) -> KnowledgeResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if inner.memory_only {
            return Ok(());
        }
        match write_snapshot(path, &inner.snapshot()) {
            Ok(()) => Ok(()),
            Err(e) => match self.mode {
                PersistenceMode::Strict => Err(e),
                PersistenceMode::Degrade => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "knowledge snapshot write failed, continuing in memory only"
                    );
                    inner.memory_only = true;
                    Ok(())
                }
            },
        }
    }

    fn write(&self) -> KnowledgeResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| KnowledgeError::Poisoned)
    }

    // Queries tolerate a poisoned lock: every mutation leaves the maps
    // consistent before it can panic.
    fn read(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_units(path: &Path, move_aside: bool) -> Vec<KnowledgeUnit> {
    match load_snapshot(path) {
        Ok(Some(units)) => {
            tracing::info!(path = %path.display(), units = units.len(), "loaded knowledge base");
            units
        }
        Ok(None) => {
            tracing::info!(path = %path.display(), "no knowledge snapshot found, starting empty");
            Vec::new()
        }
        Err(message) => {
            let aside = corrupt_path(path);
            let moved_to = match move_aside.then(|| std::fs::rename(path, &aside)) {
                Some(Ok(())) => aside.display().to_string(),
                _ => "-".to_string(),
            };
            tracing::warn!(
                path = %path.display(),
                moved_to = %moved_to,
                error = %message,
                "knowledge snapshot unreadable, starting empty"
            );
            Vec::new()
        }
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".corrupt");
    PathBuf::from(name)
}

fn load_snapshot(path: &Path) -> Result<Option<Vec<KnowledgeUnit>>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path).map_err(|e| format!("read: {e}"))?;
    let snapshot: Snapshot = serde_json::from_str(&data).map_err(|e| format!("parse: {e}"))?;
    Ok(Some(snapshot.knowledge_units))
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> KnowledgeResult<()> {
    let json = serde_json::to_string_pretty(snapshot).map_err(|e| KnowledgeError::Serialization {
        message: e.to_string(),
    })?;
    let persist_err = |message: String| KnowledgeError::Persist {
        path: path.display().to_string(),
        message,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| persist_err(format!("create dir {}: {e}", parent.display())))?;
    }
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, json).map_err(|e| persist_err(format!("write: {e}")))?;
    std::fs::rename(&tmp, path).map_err(|e| persist_err(format!("rename: {e}")))?;
    Ok(())
}
