//! Retention policy

/// How many revisions the archive keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Number of revisions to keep (default: 100, never less than 1)
    pub max_revisions: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { max_revisions: 100 }
    }
}

impl RetentionPolicy {
    pub fn new(max_revisions: usize) -> Self {
        Self { max_revisions }
    }

    /// Effective bound; the newest revision is always kept
    pub fn limit(&self) -> usize {
        self.max_revisions.max(1)
    }

    /// Number of oldest revisions to drop from an archive holding `count`
    pub fn overflow(&self, count: usize) -> usize {
        count.saturating_sub(self.limit())
    }
}
