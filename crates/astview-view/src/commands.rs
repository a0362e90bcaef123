//! Line commands read from stdin: pointer and outline interaction.

use crate::model::NodePath;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Move the pointer onto a node.
    Hover(NodePath),
    /// Move the pointer off the tree.
    Unhover,
    Toggle(NodePath),
    Show,
    Quit,
}

/// Parse `root` or a dotted path such as `0.2.1`.
pub fn parse_path(text: &str) -> Result<NodePath, String> {
    if text == "root" {
        return Ok(Vec::new());
    }
    text.split('.')
        .map(|part| {
            part.parse::<usize>()
                .map_err(|_| format!("invalid node path '{}'", text))
        })
        .collect()
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let command = parts.next().ok_or_else(|| "empty command".to_string())?;
        let arg = parts.next();

        let parsed = match (command, arg) {
            ("hover", Some(path)) => Command::Hover(parse_path(path)?),
            ("toggle", Some(path)) => Command::Toggle(parse_path(path)?),
            ("hover" | "toggle", None) => return Err(format!("usage: {} <path>", command)),
            ("unhover", None) => Command::Unhover,
            ("show", None) => Command::Show,
            ("quit" | "exit", None) => Command::Quit,
            _ => return Err(format!("unknown command '{}'", line.trim())),
        };

        if parts.next().is_some() {
            return Err(format!("unexpected arguments in '{}'", line.trim()));
        }
        Ok(parsed)
    }
}
