//! Line commands read from stdin.
//!
//! Stand-in for editor integration: an editor plugin (or a person) writes
//! `cursor <pos>` when the cursor moves and `reload` after an edit.

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Cursor(usize),
    Reload,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let command = parts.next().ok_or_else(|| "empty command".to_string())?;
        let arg = parts.next();

        let parsed = match (command, arg) {
            ("cursor", Some(pos)) => Command::Cursor(
                pos.parse()
                    .map_err(|_| format!("invalid cursor position '{}'", pos))?,
            ),
            ("cursor", None) => return Err("usage: cursor <pos>".to_string()),
            ("reload", None) => Command::Reload,
            ("quit" | "exit", None) => Command::Quit,
            _ => return Err(format!("unknown command '{}'", line.trim())),
        };

        if parts.next().is_some() {
            return Err(format!("unexpected arguments in '{}'", line.trim()));
        }
        Ok(parsed)
    }
}
