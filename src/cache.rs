//! Field cache keys and stores.
//!
//! Generated fields are expensive, so the orchestrator keeps them in an
//! external key-value store keyed by a hash of the shape that produced
//! them. The store is untrusted: [`load_field`] re-validates anything it
//! returns, and every read failure counts as a miss.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::CacheError;
use crate::field::{DistanceField, SerializedField, FIELD_FORMAT_VERSION};

/// Everything about the text geometry that changes the field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShapeDescriptor {
    pub text: String,
    pub font: String,
    pub size: f32,
    pub height: f32,
    pub spacing: f32,
    pub bevel_enabled: bool,
    pub bevel_size: f32,
    pub bevel_thickness: f32,
    /// Field resolution the entry was generated at.
    pub resolution: u32,
}

impl ShapeDescriptor {
    pub fn new(text: impl Into<String>, font: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            font: font.into(),
            size: 1.0,
            height: 0.2,
            spacing: 0.0,
            bevel_enabled: false,
            bevel_size: 0.0,
            bevel_thickness: 0.0,
            resolution: 64,
        }
    }

    /// Stable text form: trimmed text with inner whitespace collapsed,
    /// floats at three decimals.
    pub fn canonical(&self) -> String {
        let text = self.text.split_whitespace().collect::<Vec<_>>().join(" ");
        format!(
            "v{}|{}|{}|{:.3}|{:.3}|{:.3}|{}|{:.3}|{:.3}|{}",
            FIELD_FORMAT_VERSION,
            text,
            self.font,
            self.size,
            self.height,
            self.spacing,
            self.bevel_enabled,
            self.bevel_size,
            self.bevel_thickness,
            self.resolution
        )
    }

    pub fn key(&self) -> FieldKey {
        let digest = Sha1::digest(self.canonical().as_bytes());
        FieldKey(format!("sdf-v{}-{}", FIELD_FORMAT_VERSION, hex::encode(digest)))
    }
}

/// Cache key for one shape configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldKey(String);

impl FieldKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// External key-value store for generated fields.
pub trait FieldCache {
    fn get(&self, key: &FieldKey) -> Result<Option<SerializedField>, CacheError>;

    /// Store `field`, replacing any entry under `key`. The entry becomes the
    /// newest.
    fn put(&mut self, key: &FieldKey, field: &SerializedField) -> Result<(), CacheError>;

    /// Keep the `keep_newest` most recently stored entries. Returns how many
    /// were removed.
    fn prune(&mut self, keep_newest: usize) -> Result<usize, CacheError>;
}

/// Fetch, rebuild and validate a cached field. Any failure is a miss.
pub fn load_field(
    cache: &dyn FieldCache,
    key: &FieldKey,
    stride: u32,
    epsilon: f32,
) -> Option<DistanceField> {
    let stored = match cache.get(key) {
        Ok(Some(stored)) => stored,
        Ok(None) => return None,
        Err(err) => {
            warn!("Field cache read for {} failed: {}", key, err);
            return None;
        }
    };
    let checked = DistanceField::from_serialized(stored).and_then(|field| {
        field.validate(stride, epsilon)?;
        Ok(field)
    });
    match checked {
        Ok(field) => Some(field),
        Err(err) => {
            warn!("Discarding cached field {}: {}", key, err);
            None
        }
    }
}

/// In-process cache, oldest entry first.
#[derive(Default)]
pub struct MemoryFieldCache {
    entries: VecDeque<(FieldKey, SerializedField)>,
}

impl MemoryFieldCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FieldCache for MemoryFieldCache {
    fn get(&self, key: &FieldKey) -> Result<Option<SerializedField>, CacheError> {
        Ok(self.entries.iter().find(|(k, _)| k == key).map(|(_, f)| f.clone()))
    }

    fn put(&mut self, key: &FieldKey, field: &SerializedField) -> Result<(), CacheError> {
        self.entries.retain(|(k, _)| k != key);
        self.entries.push_back((key.clone(), field.clone()));
        Ok(())
    }

    fn prune(&mut self, keep_newest: usize) -> Result<usize, CacheError> {
        let excess = self.entries.len().saturating_sub(keep_newest);
        self.entries.drain(..excess);
        Ok(excess)
    }
}

/// One JSON file per entry, named `<sequence>-<key>.json`.
///
/// The zero-padded sequence number orders entries by recency without
/// reading them.
pub struct DirFieldCache {
    dir: PathBuf,
    next_seq: u64,
}

impl DirFieldCache {
    /// Open (creating if needed) a cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let mut cache = Self { dir, next_seq: 0 };
        cache.next_seq = cache
            .entries()?
            .iter()
            .map(|(seq, _, _)| seq + 1)
            .max()
            .unwrap_or(0);
        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `(sequence, key, path)` of every entry file.
    fn entries(&self) -> Result<Vec<(u64, String, PathBuf)>, CacheError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let Some((seq, key)) = stem.split_once('-') else {
                continue;
            };
            if let Ok(seq) = seq.parse::<u64>() {
                out.push((seq, key.to_string(), path.clone()));
            }
        }
        Ok(out)
    }

    fn path_for(&self, key: &FieldKey) -> Result<Option<PathBuf>, CacheError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|(_, k, _)| k == key.as_str())
            .max_by_key(|(seq, _, _)| *seq)
            .map(|(_, _, path)| path))
    }
}

impl FieldCache for DirFieldCache {
    fn get(&self, key: &FieldKey) -> Result<Option<SerializedField>, CacheError> {
        let Some(path) = self.path_for(key)? else {
            return Ok(None);
        };
        let bytes = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn put(&mut self, key: &FieldKey, field: &SerializedField) -> Result<(), CacheError> {
        for (_, k, path) in self.entries()? {
            if k == key.as_str() {
                fs::remove_file(path)?;
            }
        }
        let name = format!("{:016}-{}.json", self.next_seq, key);
        let tmp = self.dir.join(format!("{}.tmp", name));
        fs::write(&tmp, serde_json::to_vec(field)?)?;
        fs::rename(&tmp, self.dir.join(&name))?;
        self.next_seq += 1;
        debug!("Cached field as {}", name);
        Ok(())
    }

    fn prune(&mut self, keep_newest: usize) -> Result<usize, CacheError> {
        let mut entries = self.entries()?;
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        let mut removed = 0;
        for (_, _, path) in entries.into_iter().skip(keep_newest) {
            fs::remove_file(path)?;
            removed += 1;
        }
        Ok(removed)
    }
}
