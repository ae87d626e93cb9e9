//! Branch-name conventions that carry a ticket id

use crate::repo::is_detached;
use regex::Regex;
use std::sync::LazyLock;

/// Tried in order; the first match wins
static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // PROJ-123, PROJ-123-description
        r"^([A-Z]+-[0-9]+)(?:[-_/].*)?$",
        // feature/PROJ-123[-description], keyword is case-insensitive
        r"^(?i:feature|feat|bugfix|fix|hotfix|release|chore)/([A-Z]+-[0-9]+)(?:[-_].*)?$",
        // any other layout carrying a standalone id, e.g. users/ana/PROJ-9
        r"(?:^|[/_-])([A-Z]+-[0-9]+)(?:$|[/_-])",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Extract a candidate ticket id from a branch name.
///
/// Project keys are uppercase only. The detached-HEAD sentinel never matches.
pub fn extract_ticket_id(branch: &str) -> Option<String> {
    if is_detached(branch) {
        return None;
    }

    PATTERNS
        .iter()
        .find_map(|re| re.captures(branch))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// The project key of a ticket id: everything before the first `-`
pub fn project_key(ticket_id: &str) -> &str {
    ticket_id.split_once('-').map(|(key, _)| key).unwrap_or(ticket_id)
}
