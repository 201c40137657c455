//! Append-only revision archive
//!
//! Layout of the archive directory:
//!
//! ```text
//! commits                              one `|seq|timestamp|user|via|comment|` line per revision
//! rev-000001-20240301T123005.000Z.gz   gzip-compressed configuration text
//! ```
//!
//! Every file is written to a temporary file in the same directory and
//! renamed into place, so a crash never leaves a half-written revision or
//! log behind.

use crate::retention::RetentionPolicy;
use crate::revision::{LogEntry, Revision};
use crate::{ArchiveError, Result};
use cfg_core::{Diff, Reference, Tree};
use chrono::{Duration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const LOG_FILE: &str = "commits";

/// Bounded revision store, newest first
pub struct Archive {
    dir: PathBuf,
    policy: RetentionPolicy,
    /// Entries in ascending sequence order (oldest first)
    entries: Vec<LogEntry>,
    next_seq: u64,
    reference: Option<Arc<Reference>>,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write `data` to `target` through a temporary file in the same directory
fn write_atomic(dir: &Path, target: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err(dir))?;
    tmp.write_all(data).map_err(io_err(target))?;
    tmp.as_file().sync_all().map_err(io_err(target))?;
    tmp.persist(target).map_err(|e| ArchiveError::Io {
        path: target.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

impl Archive {
    /// Open or create an archive in `dir`
    pub fn open(dir: &Path, policy: RetentionPolicy) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(io_err(dir))?;

        let entries = read_log(dir)?;
        let next_seq = entries.last().map(|e| e.seq + 1).unwrap_or(1);
        let mut archive = Self {
            dir: dir.to_path_buf(),
            policy,
            entries,
            next_seq,
            reference: None,
        };
        archive.reindex();
        debug!(dir = %dir.display(), revisions = archive.entries.len(), "opened archive");
        Ok(archive)
    }

    /// Re-read the commit log to pick up revisions saved by other processes
    pub fn reload(&mut self) -> Result<()> {
        self.entries = read_log(&self.dir)?;
        if let Some(last) = self.entries.last() {
            self.next_seq = self.next_seq.max(last.seq + 1);
        }
        self.reindex();
        Ok(())
    }

    /// Sequence number of the newest revision
    pub fn head_seq(&self) -> Option<u64> {
        self.entries.last().map(|e| e.seq)
    }

    /// Use `reference` to order commands in revision diffs
    pub fn with_reference(mut self, reference: Option<Arc<Reference>>) -> Self {
        self.reference = reference;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn reindex(&mut self) {
        let len = self.entries.len();
        for (pos, entry) in self.entries.iter_mut().enumerate() {
            entry.index = len - 1 - pos;
        }
    }

    fn entry(&self, index: usize) -> Result<&LogEntry> {
        let len = self.entries.len();
        if index >= len {
            return Err(ArchiveError::NoSuchRevision(index));
        }
        Ok(&self.entries[len - 1 - index])
    }

    /// Archive `tree` as the newest revision
    pub fn save(&mut self, tree: &Tree, via: &str, user: &str, comment: Option<&str>) -> Result<LogEntry> {
        self.save_text(&tree.to_string(), via, user, comment)
    }

    /// Archive configuration text as the newest revision
    ///
    /// Existing revisions move one index up; the oldest ones are evicted
    /// once the retention bound is exceeded.
    pub fn save_text(&mut self, text: &str, via: &str, user: &str, comment: Option<&str>) -> Result<LogEntry> {
        // 1. Strictly monotonic timestamps
        let mut timestamp = Utc::now();
        if let Some(last) = self.entries.last() {
            if timestamp <= last.timestamp {
                timestamp = last.timestamp + Duration::milliseconds(1);
            }
        }

        let entry = LogEntry {
            index: 0,
            seq: self.next_seq,
            timestamp,
            user: user.to_string(),
            via: via.to_string(),
            comment: comment.map(|c| c.replace(['\n', '\r'], " ")),
        };

        // 2. Revision file
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        let target = self.dir.join(entry.file_name());
        encoder.write_all(text.as_bytes()).map_err(io_err(&target))?;
        let compressed = encoder.finish().map_err(io_err(&target))?;
        write_atomic(&self.dir, &target, &compressed)?;

        // 3. Log, already trimmed to the retention bound
        let mut entries = self.entries.clone();
        entries.push(entry.clone());
        let evicted: Vec<LogEntry> = entries.drain(..self.policy.overflow(entries.len())).collect();
        self.write_log(&entries)?;

        // 4. Evicted revision files
        for old in &evicted {
            let path = self.dir.join(old.file_name());
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove evicted revision");
            }
        }

        self.entries = entries;
        self.next_seq += 1;
        self.reindex();
        info!(seq = entry.seq, via, user, evicted = evicted.len(), "archived revision");
        Ok(entry)
    }

    /// Withdraw the newest revision if it is `entry`
    ///
    /// Used when the commit that produced `entry` could not be completed.
    /// Revisions evicted by that save stay evicted.
    pub fn revert(&mut self, entry: &LogEntry) -> Result<()> {
        if self.entries.last().map(|e| e.seq) != Some(entry.seq) {
            return Err(ArchiveError::NoSuchRevision(0));
        }
        let mut entries = self.entries.clone();
        entries.pop();
        self.write_log(&entries)?;

        let path = self.dir.join(entry.file_name());
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "failed to remove reverted revision");
        }
        self.entries = entries;
        self.reindex();
        info!(seq = entry.seq, "reverted revision");
        Ok(())
    }

    fn write_log(&self, entries: &[LogEntry]) -> Result<()> {
        let mut text = String::new();
        for e in entries {
            text.push_str(&e.to_log_line());
            text.push('\n');
        }
        write_atomic(&self.dir, &self.dir.join(LOG_FILE), text.as_bytes())
    }

    /// Revision by index (0 = newest)
    pub fn get(&self, index: usize) -> Result<Revision> {
        let entry = self.entry(index)?.clone();
        let path = self.dir.join(entry.file_name());
        let file = std::fs::File::open(&path).map_err(io_err(&path))?;
        let mut text = String::new();
        GzDecoder::new(file)
            .read_to_string(&mut text)
            .map_err(io_err(&path))?;
        Ok(Revision { entry, text })
    }

    /// Raw configuration text of a revision
    pub fn show_commit_file(&self, index: usize) -> Result<String> {
        Ok(self.get(index)?.text)
    }

    fn tree_at(&self, index: usize) -> Result<Tree> {
        let mut tree = self.get(index)?.tree()?;
        tree.set_reference(self.reference.clone());
        Ok(tree)
    }

    /// Diff from the older revision `rev_a` to the newer `rev_b`
    ///
    /// `rev_b` defaults to `rev_a - 1`. With `commands` the result is the
    /// command list turning `rev_a` into `rev_b`, otherwise a line diff.
    pub fn show_commit_diff(&self, rev_a: usize, rev_b: Option<usize>, commands: bool) -> Result<String> {
        let rev_b = match rev_b {
            Some(b) => b,
            None => rev_a.checked_sub(1).ok_or(ArchiveError::NoSuchRevision(rev_a))?,
        };
        let diff = Diff::new(&self.tree_at(rev_a)?, &self.tree_at(rev_b)?);
        Ok(diff.render(commands))
    }

    /// Whether anything at `path` differs between two revisions
    pub fn is_node_revised<P: AsRef<str>>(&self, path: &[P], rev_a: usize, rev_b: usize) -> Result<bool> {
        let diff = Diff::new(&self.tree_at(rev_a)?, &self.tree_at(rev_b)?);
        Ok(diff.is_node_changed(path))
    }

    /// Entries newest first
    pub fn log(&self) -> Vec<LogEntry> {
        self.entries.iter().rev().cloned().collect()
    }

    /// Brief one-line-per-revision listing
    pub fn format_log(&self) -> String {
        let mut out = String::new();
        for e in self.entries.iter().rev() {
            out.push_str(&format!(
                "{:<4} {}  by {} via {}\n",
                e.index,
                e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                e.user,
                e.via
            ));
            if let Some(c) = &e.comment {
                out.push_str(&format!("     {}\n", c));
            }
        }
        out
    }
}

fn read_log(dir: &Path) -> Result<Vec<LogEntry>> {
    let log_path = dir.join(LOG_FILE);
    let mut entries = Vec::new();
    if log_path.exists() {
        let text = std::fs::read_to_string(&log_path).map_err(io_err(&log_path))?;
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(LogEntry::from_log_line(line, idx + 1)?);
        }
    }
    entries.sort_by_key(|e| e.seq);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree(host: &str) -> Tree {
        let mut t = Tree::new();
        t.set(&["system", "host-name"], Some(host), true).unwrap();
        t
    }

    #[test]
    fn test_save_then_get_is_byte_exact() {
        let dir = TempDir::new().unwrap();
        let mut archive = Archive::open(dir.path(), RetentionPolicy::default()).unwrap();
        let text = "system {\n    host-name r1\n}\n// vyos-config-version: \"system@1\"\n";
        archive.save_text(text, "cli", "admin", Some("first")).unwrap();

        let rev = archive.get(0).unwrap();
        assert_eq!(rev.text, text);
        assert_eq!(rev.entry.comment.as_deref(), Some("first"));
        assert_eq!(archive.show_commit_file(0).unwrap(), text);
    }

    #[test]
    fn test_indices_and_out_of_range() {
        let dir = TempDir::new().unwrap();
        let mut archive = Archive::open(dir.path(), RetentionPolicy::default()).unwrap();
        archive.save(&tree("r1"), "cli", "admin", None).unwrap();
        archive.save(&tree("r2"), "cli", "admin", None).unwrap();

        assert_eq!(archive.get(0).unwrap().tree().unwrap(), tree("r2"));
        assert_eq!(archive.get(1).unwrap().tree().unwrap(), tree("r1"));
        assert!(matches!(archive.get(2), Err(ArchiveError::NoSuchRevision(2))));
    }

    #[test]
    fn test_fifo_eviction() {
        let dir = TempDir::new().unwrap();
        let mut archive = Archive::open(dir.path(), RetentionPolicy::new(3)).unwrap();
        for i in 0..5 {
            archive.save(&tree(&format!("r{}", i)), "cli", "admin", None).unwrap();
            assert!(archive.len() <= 3);
        }
        let seqs: Vec<u64> = archive.log().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![5, 4, 3]);
        assert_eq!(archive.get(2).unwrap().tree().unwrap(), tree("r2"));

        let files = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("rev-"))
            .count();
        assert_eq!(files, 3);
    }

    #[test]
    fn test_reopen_keeps_history() {
        let dir = TempDir::new().unwrap();
        {
            let mut archive = Archive::open(dir.path(), RetentionPolicy::default()).unwrap();
            archive.save(&tree("r1"), "init", "root", None).unwrap();
            archive.save(&tree("r2"), "cli", "admin", Some("a|b")).unwrap();
        }
        let mut archive = Archive::open(dir.path(), RetentionPolicy::default()).unwrap();
        let log = archive.log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].index, 0);
        assert_eq!(log[0].comment.as_deref(), Some("a|b"));
        assert_eq!(log[1].via, "init");

        let e = archive.save(&tree("r3"), "cli", "admin", None).unwrap();
        assert_eq!(e.seq, 3);
    }

    #[test]
    fn test_reload_sees_other_writers() {
        let dir = TempDir::new().unwrap();
        let mut first = Archive::open(dir.path(), RetentionPolicy::default()).unwrap();
        let mut second = Archive::open(dir.path(), RetentionPolicy::default()).unwrap();
        first.save(&tree("r1"), "init", "root", None).unwrap();
        assert_eq!(second.head_seq(), None);

        second.reload().unwrap();
        assert_eq!(second.head_seq(), Some(1));
        let e = second.save(&tree("r2"), "cli", "admin", None).unwrap();
        assert_eq!(e.seq, 2);

        first.reload().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.get(0).unwrap().tree().unwrap(), tree("r2"));
    }

    #[test]
    fn test_revert_withdraws_newest() {
        let dir = TempDir::new().unwrap();
        let mut archive = Archive::open(dir.path(), RetentionPolicy::default()).unwrap();
        let first = archive.save(&tree("r1"), "init", "root", None).unwrap();
        let second = archive.save(&tree("r2"), "cli", "admin", None).unwrap();

        assert!(archive.revert(&first).is_err());
        archive.revert(&second).unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.get(0).unwrap().tree().unwrap(), tree("r1"));
        assert!(!dir.path().join(second.file_name()).exists());

        let reopened = Archive::open(dir.path(), RetentionPolicy::default()).unwrap();
        assert_eq!(reopened.head_seq(), Some(1));
        let third = archive.save(&tree("r3"), "cli", "admin", None).unwrap();
        assert_eq!(third.seq, 3);
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let dir = TempDir::new().unwrap();
        let mut archive = Archive::open(dir.path(), RetentionPolicy::default()).unwrap();
        for i in 0..10 {
            archive.save(&tree(&format!("r{}", i)), "cli", "admin", None).unwrap();
        }
        let log = archive.log();
        assert!(log.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
    }

    #[test]
    fn test_commit_diff_replays() {
        let dir = TempDir::new().unwrap();
        let mut archive = Archive::open(dir.path(), RetentionPolicy::default()).unwrap();
        let mut older = tree("r1");
        older.set(&["service", "ssh", "port"], Some("22"), true).unwrap();
        let mut newer = tree("r1");
        newer.set(&["service", "ssh", "port"], Some("2222"), true).unwrap();
        newer.set(&["service", "https"], None, true).unwrap();
        archive.save(&older, "cli", "admin", None).unwrap();
        archive.save(&newer, "cli", "admin", None).unwrap();

        let cmds = archive.show_commit_diff(1, None, true).unwrap();
        let mut replay = archive.get(1).unwrap().tree().unwrap();
        let diff = Diff::new(&replay, &archive.get(0).unwrap().tree().unwrap());
        assert_eq!(cmds, cfg_core::render_commands(&diff.commands()));
        replay.apply_command_list(&diff.commands()).unwrap();
        assert_eq!(replay.to_string_ordered(), newer.to_string_ordered());

        let text = archive.show_commit_diff(1, Some(0), false).unwrap();
        assert!(text.contains("-        port 22\n"));
        assert!(text.contains("+        port 2222\n"));

        assert!(matches!(
            archive.show_commit_diff(0, None, true),
            Err(ArchiveError::NoSuchRevision(0))
        ));
        assert!(archive.is_node_revised(&["service", "ssh"], 1, 0).unwrap());
        assert!(!archive.is_node_revised(&["system"], 1, 0).unwrap());
    }

    #[test]
    fn test_format_log() {
        let dir = TempDir::new().unwrap();
        let mut archive = Archive::open(dir.path(), RetentionPolicy::default()).unwrap();
        archive.save(&tree("r1"), "cli", "admin", Some("hello")).unwrap();
        let text = archive.format_log();
        assert!(text.starts_with("0    "));
        assert!(text.contains("by admin via cli\n     hello\n"));
    }
}
