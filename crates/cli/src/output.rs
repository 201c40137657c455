//! Terminal colouring for diffs and command lists

use owo_colors::OwoColorize;
use std::io::IsTerminal;

/// Colour only when stdout is a terminal
pub fn use_color() -> bool {
    std::io::stdout().is_terminal()
}

/// Colour unified diff text: hunk headers cyan, removals red, additions green
pub fn colorize_diff(text: &str, color: bool) -> String {
    if !color {
        return text.to_string();
    }
    let mut output = String::with_capacity(text.len());
    for line in text.lines() {
        if line.starts_with("@@") {
            output.push_str(&format!("{}", line.cyan()));
        } else if line.starts_with('-') {
            output.push_str(&format!("{}", line.red()));
        } else if line.starts_with('+') {
            output.push_str(&format!("{}", line.green()));
        } else {
            output.push_str(&format!("{}", line.dimmed()));
        }
        output.push('\n');
    }
    output
}

/// Colour command lines: `delete` red, `set` green
pub fn colorize_commands(text: &str, color: bool) -> String {
    if !color {
        return text.to_string();
    }
    let mut output = String::with_capacity(text.len());
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("delete") {
            output.push_str(&format!("{}{}", "delete".red(), rest));
        } else if let Some(rest) = line.strip_prefix("set") {
            output.push_str(&format!("{}{}", "set".green(), rest));
        } else {
            output.push_str(line);
        }
        output.push('\n');
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "@@ -1,3 +1,3 @@\n system {\n-    host-name r1\n+    host-name r2\n }\n";

    #[test]
    fn test_plain_passthrough() {
        assert_eq!(colorize_diff(DIFF, false), DIFF);
        assert_eq!(colorize_commands("set a 1\n", false), "set a 1\n");
    }

    #[test]
    fn test_colored_diff_keeps_content() {
        let out = colorize_diff(DIFF, true);
        assert!(out.contains("-    host-name r1"));
        assert!(out.contains("+    host-name r2"));
        assert!(out.contains("\u{1b}["));
        assert_eq!(out.lines().count(), DIFF.lines().count());
    }

    #[test]
    fn test_colored_commands() {
        let out = colorize_commands("delete a b\nset a c 1\n", true);
        assert!(out.contains(" a b"));
        assert!(out.contains(" a c 1"));
        assert!(out.contains("\u{1b}["));
    }
}
