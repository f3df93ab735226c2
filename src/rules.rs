use std::collections::BTreeSet;
use std::fs;
use std::io;

use camino::Utf8Path;
use regex::Regex;

use crate::error::{Error, Result};

/// Default rule file, relative to the root.
pub const DEFAULT_CONF: &str = "etc/pkgadd.conf";

const MAX_LINE_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Install,
    Upgrade,
}

/// One `EVENT PATTERN YES|NO` line, pattern compiled at load time.
/// Rules are matched in file order with the last match winning.
#[derive(Debug, Clone)]
pub struct Rule {
    pub event: Event,
    pub pattern: Regex,
    pub action: bool,
}

/// Parse a rule file. A missing file is an empty rule list.
pub fn load(path: &Utf8Path) -> Result<Vec<Rule>> {
    let parse_err = |line: usize, reason: String| Error::ConfigParse {
        file: path.to_string(),
        line,
        reason,
    };

    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(parse_err(0, e.to_string())),
    };

    let mut rules = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let lineno = idx + 1;
        if line.len() > MAX_LINE_LEN {
            return Err(parse_err(lineno, format!("line exceeds {MAX_LINE_LEN} bytes")));
        }
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let (Some(event), Some(pattern), Some(action), None) =
            (tokens.next(), tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(parse_err(lineno, "expected 'EVENT PATTERN YES|NO'".into()));
        };

        let event = match event {
            "INSTALL" => Event::Install,
            "UPGRADE" => Event::Upgrade,
            other => return Err(parse_err(lineno, format!("unknown event '{other}'"))),
        };
        let action = match action {
            "YES" => true,
            "NO" => false,
            other => return Err(parse_err(lineno, format!("unknown action '{other}'"))),
        };
        let pattern = Regex::new(pattern)
            .map_err(|e| parse_err(lineno, format!("bad pattern: {e}")))?;

        rules.push(Rule {
            event,
            pattern,
            action,
        });
    }

    tracing::debug!(path = %path, rules = rules.len(), "rule file loaded");
    Ok(rules)
}

/// The action of the last rule for `event` matching `file`, if any.
fn last_action(rules: &[Rule], event: Event, file: &str) -> Option<bool> {
    rules
        .iter()
        .rev()
        .find(|r| r.event == event && r.pattern.is_match(file))
        .map(|r| r.action)
}

/// Split `files` by the INSTALL rules into (install set, skip set).
/// Unmatched files install.
pub fn install_partition(
    rules: &[Rule],
    files: &BTreeSet<String>,
) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut install = BTreeSet::new();
    let mut skip = BTreeSet::new();
    for file in files {
        match last_action(rules, Event::Install, file) {
            Some(false) => skip.insert(file.clone()),
            _ => install.insert(file.clone()),
        };
    }
    (install, skip)
}

/// The subset of `files` whose last UPGRADE match says NO: the files an
/// upgrade must leave alone on disk.
pub fn keep_list(rules: &[Rule], files: &BTreeSet<String>) -> BTreeSet<String> {
    files
        .iter()
        .filter(|file| last_action(rules, Event::Upgrade, file) == Some(false))
        .cloned()
        .collect()
}
