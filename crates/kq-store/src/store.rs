//! The key/value store.
//!
//! Every write is parsed against its key template before it becomes
//! visible, so the store only ever holds well-formed entries. Each write
//! bumps the generation of the region its key belongs to; views compare
//! generations to decide what to rebuild.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use log::{debug, warn};

use kq_ir::{Error, Pcm, Result};

use crate::key::{classify, validate_key, DirtyTag, KeyKind, Suffix};
use crate::schema;
use crate::value::{Entry, Value};
use crate::wav::{self, WavFormat};

/// Progress of a running transaction, passed to its notifier after every
/// staged operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress<'a> {
    /// Key of the operation just staged.
    pub key: &'a str,
    /// Number of keys staged so far.
    pub staged: usize,
}

#[derive(Debug, Default)]
pub struct Store {
    entries: BTreeMap<String, Entry>,
    generations: BTreeMap<DirtyTag, u64>,
    revision: u64,
}

fn decode_entry(key: &str, bytes: &[u8]) -> Result<Entry> {
    validate_key(key)?;
    let kind = classify(key);
    let suffix = Suffix::of(key).ok_or_else(|| Error::argument(format!("no suffix: {}", key)))?;
    let value = schema::decode(&kind, suffix, bytes).map_err(|e| Error::format_at(key, e))?;
    Ok(Entry::new(bytes, value))
}

fn pcm_entry(key: &str, pcm: Pcm) -> Result<Entry> {
    validate_key(key)?;
    match classify(key) {
        KeyKind::SampleData { .. } => Ok(Entry::decoded(Value::Pcm(Arc::new(pcm)))),
        _ => Err(Error::argument(format!("{} is not a sample data key", key))),
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and store `bytes` under `key`. On error the store is unchanged.
    pub fn put(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        let entry = decode_entry(key, bytes)?;
        self.commit_one(key.to_string(), Some(entry));
        Ok(())
    }

    /// Store already decoded sample data.
    pub fn put_pcm(&mut self, key: &str, pcm: Pcm) -> Result<()> {
        let entry = pcm_entry(key, pcm)?;
        self.commit_one(key.to_string(), Some(entry));
        Ok(())
    }

    /// Remove `key`. Returns whether it existed.
    pub fn delete(&mut self, key: &str) -> Result<bool> {
        validate_key(key)?;
        if !self.entries.contains_key(key) {
            return Ok(false);
        }
        self.commit_one(key.to_string(), None);
        Ok(true)
    }

    /// The bytes stored under `key`. Sample data supplied as PCM comes
    /// back as a 32-bit float WAV file.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entry = self.entries.get(key)?;
        match (&entry.raw, entry.pcm()) {
            (Some(raw), _) => Some(raw.to_vec()),
            (None, Some(pcm)) => {
                let channels: Vec<&[f32]> = (0..pcm.num_channels()).map(|ch| pcm.channel(ch)).collect();
                let rate = pcm.rate.unwrap_or(kq_ir::DEFAULT_SAMPLE_RATE);
                Some(wav::encode(&channels, rate, WavFormat::Float32))
            }
            (None, None) => None,
        }
    }

    pub fn entry(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose key starts with `prefix`, in key order.
    pub fn iter<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a Entry)> + 'a {
        self.entries
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, e)| (k.as_str(), e))
    }

    /// Revision at which `tag`'s region last changed, or 0.
    pub fn generation(&self, tag: DirtyTag) -> u64 {
        self.generations.get(&tag).copied().unwrap_or(0)
    }

    /// Latest generation among the tags in `[from, to]`.
    pub fn latest_generation(&self, from: DirtyTag, to: DirtyTag) -> u64 {
        self.generations.range(from..=to).map(|(_, &g)| g).max().unwrap_or(0)
    }

    /// Incremented by every change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Run `f` against a staging overlay and commit everything it staged
    /// at once if it succeeds.
    ///
    /// `notifier` is called after each staged operation; an error from it
    /// aborts the transaction with a resource error. Any error leaves the
    /// store unchanged.
    pub fn transaction<T, N, F>(&mut self, mut notifier: N, f: F) -> Result<T>
    where
        N: FnMut(&Progress<'_>) -> std::result::Result<(), String>,
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut tx = Transaction {
            store: &*self,
            staged: BTreeMap::new(),
            notifier: &mut notifier,
            failed: None,
        };
        let result = f(&mut tx);
        let Transaction { staged, failed, .. } = tx;

        let value = match (result, failed) {
            (Err(e), _) | (Ok(_), Some(e)) => {
                warn!("transaction rolled back: {}", e);
                return Err(e);
            }
            (Ok(value), None) => value,
        };

        debug!("committing {} staged keys", staged.len());
        for (key, entry) in staged {
            self.commit_one(key, entry);
        }
        Ok(value)
    }

    fn commit_one(&mut self, key: String, entry: Option<Entry>) {
        self.revision += 1;
        if let Some(tag) = classify(&key).tag() {
            self.generations.insert(tag, self.revision);
        }
        match entry {
            Some(entry) => {
                self.entries.insert(key, entry);
            }
            None => {
                self.entries.remove(&key);
            }
        }
    }
}

/// Staged changes of a running `Store::transaction`.
pub struct Transaction<'a> {
    store: &'a Store,
    /// `None` stages a delete.
    staged: BTreeMap<String, Option<Entry>>,
    notifier: &'a mut dyn FnMut(&Progress<'_>) -> std::result::Result<(), String>,
    failed: Option<Error>,
}

impl Transaction<'_> {
    pub fn put(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        self.stage(key, |key| decode_entry(key, bytes).map(Some))
    }

    pub fn put_pcm(&mut self, key: &str, pcm: Pcm) -> Result<()> {
        self.stage(key, |key| pcm_entry(key, pcm).map(Some))
    }

    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.stage(key, |key| validate_key(key).map(|_| None))
    }

    /// The entry under `key` as the transaction sees it.
    pub fn entry(&self, key: &str) -> Option<&Entry> {
        match self.staged.get(key) {
            Some(staged) => staged.as_ref(),
            None => self.store.entry(key),
        }
    }

    /// Number of keys staged so far.
    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    fn stage(&mut self, key: &str, make: impl FnOnce(&str) -> Result<Option<Entry>>) -> Result<()> {
        if let Some(e) = &self.failed {
            return Err(e.clone());
        }
        let entry = match make(key) {
            Ok(entry) => entry,
            Err(e) => {
                self.failed = Some(e.clone());
                return Err(e);
            }
        };
        self.staged.insert(key.to_string(), entry);
        let progress = Progress {
            key,
            staged: self.staged.len(),
        };
        if let Err(message) = (self.notifier)(&progress) {
            let e = Error::resource(message);
            self.failed = Some(e.clone());
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kq_ir::{ErrorKind, FormatError, UnitKind};

    #[test]
    fn put_get_returns_bytes_as_written() {
        let mut store = Store::new();
        store.put("au_00/p_manifest.json", br#"{ "type": "instrument" }"#).unwrap();
        assert_eq!(store.get("au_00/p_manifest.json").unwrap(), br#"{ "type": "instrument" }"#);
        assert_eq!(
            store.value("au_00/p_manifest.json"),
            Some(&Value::UnitManifest(UnitKind::Instrument))
        );
    }

    #[test]
    fn rejected_put_leaves_store_unchanged() {
        let mut store = Store::new();
        store.put("p_random_seed.json", b"7").unwrap();
        let revision = store.revision();
        let err = store.put("p_random_seed.json", b"seven").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(matches!(err, Error::Format { key: Some(ref k), .. } if k == "p_random_seed.json"));
        assert_eq!(store.get("p_random_seed.json").unwrap(), b"7");
        assert_eq!(store.revision(), revision);
    }

    #[test]
    fn bad_keys_are_argument_errors() {
        let mut store = Store::new();
        assert_eq!(store.put("Au_00/p_manifest.json", b"{}").unwrap_err().kind(), ErrorKind::Argument);
        assert_eq!(store.put("au_00//p.json", b"{}").unwrap_err().kind(), ErrorKind::Argument);
        assert_eq!(store.put("au_00/p_manifest", b"{}").unwrap_err().kind(), ErrorKind::Argument);
        assert_eq!(
            store.put_pcm("au_00/p_manifest.json", Pcm::mono(None, vec![0.0])).unwrap_err().kind(),
            ErrorKind::Argument
        );
    }

    #[test]
    fn writes_bump_region_generations() {
        let mut store = Store::new();
        assert_eq!(store.generation(DirtyTag::Pattern(1)), 0);
        store.put("pat_001/p_manifest.json", b"{}").unwrap();
        let g = store.generation(DirtyTag::Pattern(1));
        assert!(g > 0);
        store.put("pat_002/p_manifest.json", b"{}").unwrap();
        assert_eq!(store.generation(DirtyTag::Pattern(1)), g);
        store.delete("pat_001/p_manifest.json").unwrap();
        assert!(store.generation(DirtyTag::Pattern(1)) > g);
        assert!(!store.delete("pat_001/p_manifest.json").unwrap());
    }

    #[test]
    fn processor_generations_roll_up_by_range() {
        let mut store = Store::new();
        store.put("au_01/proc_03/c/p_f_volume.json", b"1.0").unwrap();
        let g = store.latest_generation(DirtyTag::Processor(1, 0), DirtyTag::Processor(1, usize::MAX));
        assert_eq!(g, store.revision());
        assert_eq!(
            store.latest_generation(DirtyTag::Processor(2, 0), DirtyTag::Processor(2, usize::MAX)),
            0
        );
    }

    #[test]
    fn iter_lists_prefix_in_order() {
        let mut store = Store::new();
        store.put("pat_000/p_manifest.json", b"{}").unwrap();
        store.put("pat_000/col_01/p_triggers.json", b"[]").unwrap();
        store.put("pat_000/col_00/p_triggers.json", b"[]").unwrap();
        store.put("pat_001/p_manifest.json", b"{}").unwrap();
        let keys: Vec<&str> = store.iter("pat_000/").map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            ["pat_000/col_00/p_triggers.json", "pat_000/col_01/p_triggers.json", "pat_000/p_manifest.json"]
        );
    }

    #[test]
    fn pcm_entries_read_back_as_wav() {
        let mut store = Store::new();
        let key = "au_00/proc_00/c/smp_000/p_sample.wv";
        store.put_pcm(key, Pcm::mono(Some(22050), vec![0.5, -0.25])).unwrap();
        let bytes = store.get(key).unwrap();
        let pcm = wav::decode(&bytes).unwrap();
        assert_eq!(pcm.rate, Some(22050));
        assert_eq!(pcm.channel(0), &[0.5, -0.25]);
    }

    #[test]
    fn transaction_commits_all_at_once() {
        let mut store = Store::new();
        let mut seen = Vec::new();
        store
            .transaction(
                |p| {
                    seen.push((p.key.to_string(), p.staged));
                    Ok(())
                },
                |tx| {
                    tx.put("song_00/p_manifest.json", b"{}")?;
                    tx.put("song_00/p_order_list.json", b"[[0,0]]")?;
                    assert!(tx.entry("song_00/p_manifest.json").is_some());
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].1, 2);
    }

    #[test]
    fn transaction_rolls_back_on_parse_failure() {
        let mut store = Store::new();
        store.put("p_random_seed.json", b"1").unwrap();
        let err = store
            .transaction(
                |_| Ok(()),
                |tx| {
                    tx.delete("p_random_seed.json")?;
                    tx.put("pat_000/p_pattern.json", br#"{"length":[1,-1]}"#)?;
                    Ok(())
                },
            )
            .unwrap_err();
        assert_eq!(err.format_error(), Some(&FormatError::Timestamp));
        assert!(store.contains("p_random_seed.json"));
        assert!(!store.contains("pat_000/p_pattern.json"));
    }

    #[test]
    fn notifier_failure_is_resource_error() {
        let mut store = Store::new();
        let err = store
            .transaction(
                |p| if p.staged > 1 { Err("disk gone".to_string()) } else { Ok(()) },
                |tx| {
                    tx.put("pat_000/p_manifest.json", b"{}")?;
                    tx.put("pat_001/p_manifest.json", b"{}")?;
                    Ok(())
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert!(store.is_empty());
    }

    #[test]
    fn swallowed_errors_still_roll_back() {
        let mut store = Store::new();
        let result = store.transaction(
            |_| Ok(()),
            |tx| {
                tx.put("pat_000/p_manifest.json", b"{}")?;
                let _ = tx.put("pat_000/p_pattern.json", b"nope");
                Ok(())
            },
        );
        assert!(result.is_err());
        assert!(store.is_empty());
    }
}
