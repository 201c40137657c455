//! Component version trailer
//!
//! Saved configuration files end with a trailer recording the schema
//! version of every component plus the release that wrote the file. Two
//! spellings exist: the current `//` form and a legacy `/* ... */` form.

use crate::error::{Result, TreeError};
use std::collections::BTreeMap;

const WARNING_MODERN: &str = "// Warning: Do not remove the following line.";
const WARNING_LEGACY: &str = "/* Warning: Do not remove the following line. */";
const VERSION_MODERN: &str = "// vyos-config-version:";
const VERSION_LEGACY: &str = "/* === vyatta-config-version:";
const RELEASE_MODERN: &str = "// Release version:";
const RELEASE_LEGACY: &str = "/* Release version:";

/// Which trailer spelling a file used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Vintage {
    #[default]
    Vyos,
    Vyatta,
}

/// Parsed trailer: component versions and release string
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionInfo {
    pub vintage: Vintage,
    pub components: BTreeMap<String, u32>,
    pub release: Option<String>,
}

impl VersionInfo {
    pub fn new(components: BTreeMap<String, u32>, release: Option<String>) -> Self {
        Self {
            vintage: Vintage::Vyos,
            components,
            release,
        }
    }

    /// Extract the trailer from configuration text
    ///
    /// Returns `Ok(None)` when the text carries no version line. When both
    /// spellings are present the modern one wins.
    pub fn from_config_text(text: &str) -> Result<Option<Self>> {
        let mut legacy = None;
        let mut modern = None;
        let mut release = None;

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            let lineno = idx + 1;
            if let Some(rest) = line.strip_prefix(VERSION_MODERN) {
                modern = Some(parse_components(rest.trim(), lineno)?);
            } else if let Some(rest) = line.strip_prefix(VERSION_LEGACY) {
                let body = rest.trim().strip_suffix("=== */").ok_or_else(|| {
                    TreeError::parse(lineno, 1, "unterminated legacy version line")
                })?;
                legacy = Some(parse_components(body.trim(), lineno)?);
            } else if let Some(rest) = line.strip_prefix(RELEASE_MODERN) {
                release = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix(RELEASE_LEGACY) {
                release = Some(rest.trim_end_matches("*/").trim().to_string());
            }
        }

        let (vintage, components) = match (modern, legacy) {
            (Some(c), _) => (Vintage::Vyos, c),
            (None, Some(c)) => (Vintage::Vyatta, c),
            (None, None) => return Ok(None),
        };
        Ok(Some(Self {
            vintage,
            components,
            release: release.filter(|r| !r.is_empty()),
        }))
    }

    /// `a@1:b@2`, components sorted by name
    pub fn format_components(&self) -> String {
        self.components
            .iter()
            .map(|(name, version)| format!("{}@{}", name, version))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Trailer text in this info's own vintage
    pub fn footer(&self) -> String {
        self.footer_as(self.vintage)
    }

    /// Trailer text in the given spelling, ending in a newline
    pub fn footer_as(&self, vintage: Vintage) -> String {
        let components = self.format_components();
        let release = self.release.as_deref().unwrap_or("unknown");
        match vintage {
            Vintage::Vyos => format!(
                "{}\n{} \"{}\"\n{} {}\n",
                WARNING_MODERN, VERSION_MODERN, components, RELEASE_MODERN, release
            ),
            Vintage::Vyatta => format!(
                "{}\n{} \"{}\" === */\n{} {} */\n",
                WARNING_LEGACY, VERSION_LEGACY, components, RELEASE_LEGACY, release
            ),
        }
    }

    /// Component versions lower than `target`, or absent from `self`
    pub fn outdated(&self, target: &BTreeMap<String, u32>) -> Vec<String> {
        target
            .iter()
            .filter(|(name, version)| self.components.get(*name).map_or(true, |v| v < version))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn parse_components(quoted: &str, line: usize) -> Result<BTreeMap<String, u32>> {
    let inner = quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| TreeError::parse(line, 1, "version string must be quoted"))?;

    let mut components = BTreeMap::new();
    for item in inner.split(':') {
        let (name, version) = item
            .split_once('@')
            .ok_or_else(|| TreeError::parse(line, 1, format!("malformed component '{}'", item)))?;
        let valid_name = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == ',');
        if !valid_name {
            return Err(TreeError::parse(line, 1, format!("invalid component name '{}'", name)));
        }
        let version: u32 = version
            .parse()
            .map_err(|_| TreeError::parse(line, 1, format!("invalid version for '{}'", name)))?;
        if components.insert(name.to_string(), version).is_some() {
            return Err(TreeError::parse(line, 1, format!("duplicate component '{}'", name)));
        }
    }
    Ok(components)
}

fn is_trailer_line(line: &str) -> bool {
    let line = line.trim();
    line == WARNING_MODERN
        || line == WARNING_LEGACY
        || line.starts_with(VERSION_MODERN)
        || line.starts_with(VERSION_LEGACY)
        || line.starts_with(RELEASE_MODERN)
        || line.starts_with(RELEASE_LEGACY)
}

/// Remove trailer lines, leaving the configuration body
pub fn strip_footer(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines().filter(|l| !is_trailer_line(l)) {
        out.push_str(line);
        out.push('\n');
    }
    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODERN: &str = "system {\n    host-name r1\n}\n\
// Warning: Do not remove the following line.\n\
// vyos-config-version: \"interfaces@22:system@26\"\n\
// Release version: 1.4.0\n";

    const LEGACY: &str = "system {\n    host-name r1\n}\n\
/* Warning: Do not remove the following line. */\n\
/* === vyatta-config-version: \"interfaces@3:system@6\" === */\n\
/* Release version: 999.201801010000 */\n";

    #[test]
    fn test_modern_trailer() {
        let info = VersionInfo::from_config_text(MODERN).unwrap().unwrap();
        assert_eq!(info.vintage, Vintage::Vyos);
        assert_eq!(info.components.get("interfaces"), Some(&22));
        assert_eq!(info.components.get("system"), Some(&26));
        assert_eq!(info.release.as_deref(), Some("1.4.0"));
        assert_eq!(info.format_components(), "interfaces@22:system@26");
    }

    #[test]
    fn test_legacy_trailer() {
        let info = VersionInfo::from_config_text(LEGACY).unwrap().unwrap();
        assert_eq!(info.vintage, Vintage::Vyatta);
        assert_eq!(info.components.get("system"), Some(&6));
        assert_eq!(info.release.as_deref(), Some("999.201801010000"));
    }

    #[test]
    fn test_footer_round_trip() {
        let info = VersionInfo::from_config_text(MODERN).unwrap().unwrap();
        let text = format!("{}{}", strip_footer(MODERN), info.footer());
        assert_eq!(text, MODERN);

        let legacy = VersionInfo::from_config_text(LEGACY).unwrap().unwrap();
        let text = format!("{}{}", strip_footer(LEGACY), legacy.footer());
        assert_eq!(text, LEGACY);
    }

    #[test]
    fn test_missing_trailer() {
        assert_eq!(VersionInfo::from_config_text("system {\n}\n").unwrap(), None);
    }

    #[test]
    fn test_duplicate_component_rejected() {
        let text = "// vyos-config-version: \"system@1:system@2\"\n";
        assert!(matches!(
            VersionInfo::from_config_text(text),
            Err(TreeError::Parse { line: 1, .. })
        ));
        let text = "/* === vyatta-config-version: \"a@1:a@1\" === */\n";
        assert!(VersionInfo::from_config_text(text).is_err());
    }

    #[test]
    fn test_outdated() {
        let info = VersionInfo::from_config_text(MODERN).unwrap().unwrap();
        let target = BTreeMap::from([
            ("interfaces".to_string(), 22),
            ("system".to_string(), 27),
            ("nat".to_string(), 1),
        ]);
        assert_eq!(info.outdated(&target), vec!["nat", "system"]);
    }
}
