//! Revision metadata and commit log lines

use crate::{ArchiveError, Result};
use cfg_core::Tree;
use chrono::{DateTime, SecondsFormat, Utc};

/// Metadata of one archived revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Position from the newest revision (0 = most recent)
    pub index: usize,
    /// Monotonic sequence number, never reused
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    /// Front end that caused the commit
    pub via: String,
    pub comment: Option<String>,
}

impl LogEntry {
    /// Revision file name: `rev-<seq>-<ISO8601>.gz`
    pub fn file_name(&self) -> String {
        format!(
            "rev-{:06}-{}.gz",
            self.seq,
            self.timestamp.format("%Y%m%dT%H%M%S%.3fZ")
        )
    }

    /// `|seq|timestamp|user|via|comment|`
    pub(crate) fn to_log_line(&self) -> String {
        format!(
            "|{}|{}|{}|{}|{}|",
            self.seq,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            escape(&self.user),
            escape(&self.via),
            escape(self.comment.as_deref().unwrap_or(""))
        )
    }

    pub(crate) fn from_log_line(line: &str, lineno: usize) -> Result<Self> {
        let malformed = |message: &str| ArchiveError::MalformedLog {
            line: lineno,
            message: message.to_string(),
        };
        let inner = line
            .strip_prefix('|')
            .and_then(|l| l.strip_suffix('|'))
            .ok_or_else(|| malformed("missing field delimiters"))?;
        let fields: Vec<&str> = inner.split('|').collect();
        let [seq, ts, user, via, comment] = fields.as_slice() else {
            return Err(malformed("expected five fields"));
        };
        let seq = seq.parse().map_err(|_| malformed("bad sequence number"))?;
        let timestamp = DateTime::parse_from_rfc3339(ts)
            .map_err(|_| malformed("bad timestamp"))?
            .with_timezone(&Utc);
        Ok(Self {
            index: 0,
            seq,
            timestamp,
            user: unescape(user),
            via: unescape(via),
            comment: (!comment.is_empty()).then(|| unescape(comment)),
        })
    }
}

/// Fields are single-line; `|` is stored as `%%` and `%` as `%25`
fn escape(field: &str) -> String {
    field
        .replace(['\n', '\r'], " ")
        .replace('%', "%25")
        .replace('|', "%%")
}

/// Inverse of [`escape`]; a `%` starting neither sequence is literal
fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("%%") {
            out.push('|');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("%25") {
            out.push('%');
            rest = after;
        } else {
            out.push('%');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// An archived configuration with its metadata
#[derive(Debug, Clone)]
pub struct Revision {
    pub entry: LogEntry,
    /// Stored configuration text, byte-for-byte as saved
    pub text: String,
}

impl Revision {
    /// Parse the stored text
    pub fn tree(&self) -> Result<Tree> {
        Ok(self.text.parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(comment: Option<&str>) -> LogEntry {
        LogEntry {
            index: 0,
            seq: 7,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap(),
            user: "admin".into(),
            via: "cli".into(),
            comment: comment.map(String::from),
        }
    }

    #[test]
    fn test_log_line() {
        let e = entry(Some("fix | pipe"));
        let line = e.to_log_line();
        assert_eq!(line, "|7|2024-03-01T12:30:05.000Z|admin|cli|fix %% pipe|");
        assert_eq!(LogEntry::from_log_line(&line, 1).unwrap(), e);
    }

    #[test]
    fn test_percent_signs_survive() {
        let mut e = entry(Some("50%% done | 100% sure"));
        e.user = "ops%%team".into();
        let line = e.to_log_line();
        assert_eq!(
            line,
            "|7|2024-03-01T12:30:05.000Z|ops%25%25team|cli|50%25%25 done %% 100%25 sure|"
        );
        assert_eq!(LogEntry::from_log_line(&line, 1).unwrap(), e);
    }

    #[test]
    fn test_stray_percent_is_literal() {
        let back = LogEntry::from_log_line("|7|2024-03-01T12:30:05.000Z|admin|cli|100% a%%b|", 1).unwrap();
        assert_eq!(back.comment.as_deref(), Some("100% a|b"));
    }

    #[test]
    fn test_empty_comment() {
        let e = entry(None);
        assert_eq!(LogEntry::from_log_line(&e.to_log_line(), 1).unwrap().comment, None);
    }

    #[test]
    fn test_multiline_comment_is_flattened() {
        let e = entry(Some("first\nsecond"));
        let back = LogEntry::from_log_line(&e.to_log_line(), 1).unwrap();
        assert_eq!(back.comment.as_deref(), Some("first second"));
    }

    #[test]
    fn test_file_name() {
        assert_eq!(entry(None).file_name(), "rev-000007-20240301T123005.000Z.gz");
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            LogEntry::from_log_line("|1|2|3|", 4),
            Err(ArchiveError::MalformedLog { line: 4, .. })
        ));
        assert!(LogEntry::from_log_line("|x|2024-03-01T12:30:05Z|a|b||", 1).is_err());
    }
}
