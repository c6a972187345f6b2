//! Live issues and the per-file issue store.
//!
//! A [`LiveIssue`] is a finding reported by the analysis server, anchored to
//! the line it was reported on. While the user edits the file the IDE reports
//! line moves and deletions, which shift or untether the issue without a new
//! analysis. Untethered issues stay in the store until the file's issue set
//! is replaced, but are no longer returned by queries.

use crate::paths::{normalize_path, path_key};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Line value reported by the IDE when the anchored line has been deleted.
pub const DELETED_LINE: i64 = -1;

/// Position of an issue as reported by the analysis server (1-based lines).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRange {
    pub start_line: u32,
    pub start_line_offset: u32,
    pub end_line: u32,
    pub end_line_offset: u32,
}

/// An issue exactly as the analysis server reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedIssue {
    pub rule_key: String,
    pub message: String,
    pub file: PathBuf,
    pub range: IssueRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveIssue {
    pub rule_key: String,
    pub message: String,
    pub file: PathBuf,
    /// Range as originally reported; effective lines add `line_offset`.
    pub range: IssueRange,
    /// Text of the original start line at the time the issue was ingested.
    pub anchor: Option<String>,
    line_offset: i64,
    tethered: bool,
}

impl LiveIssue {
    /// Builds a live issue from a reported one. `source` is the current
    /// content of the issue's file, if it could be read.
    pub fn new(issue: ReportedIssue, source: Option<&str>) -> Self {
        let anchor = source.and_then(|text| {
            let index = issue.range.start_line.checked_sub(1)? as usize;
            text.lines().nth(index).map(|line| line.trim_end().to_string())
        });

        Self {
            rule_key: issue.rule_key,
            message: issue.message,
            file: normalize_path(&issue.file),
            range: issue.range,
            anchor,
            line_offset: 0,
            tethered: true,
        }
    }

    pub fn start_line(&self) -> i64 {
        i64::from(self.range.start_line) + self.line_offset
    }

    pub fn end_line(&self) -> i64 {
        i64::from(self.range.end_line) + self.line_offset
    }

    pub fn line_offset(&self) -> i64 {
        self.line_offset
    }

    pub fn is_tethered(&self) -> bool {
        self.tethered
    }

    pub fn contains_line(&self, line: i64) -> bool {
        self.start_line() <= line && line <= self.end_line()
    }

    fn sort_key(&self) -> (i64, u32, &str, u32) {
        (
            self.start_line(),
            self.range.start_line_offset,
            self.rule_key.as_str(),
            self.range.end_line_offset,
        )
    }
}

/// Live issues per normalized file path.
#[derive(Debug, Default)]
pub struct IssueStore {
    issues: HashMap<String, Vec<LiveIssue>>,
}

impl IssueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tethered issues of `path`, optionally only those covering `line`,
    /// ordered by (start line, start offset, rule key, end offset).
    pub fn get_issues(&self, path: &Path, line: Option<u32>) -> Vec<LiveIssue> {
        let Some(issues) = self.issues.get(&path_key(path)) else {
            return Vec::new();
        };

        let mut selected: Vec<LiveIssue> = issues
            .iter()
            .filter(|issue| issue.tethered)
            .filter(|issue| line.is_none_or(|line| issue.contains_line(i64::from(line))))
            .cloned()
            .collect();
        selected.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        selected
    }

    pub fn replace_issues_for_file(&mut self, path: &Path, issues: Vec<LiveIssue>) {
        debug!(
            "Replacing issues for {} ({} issues)",
            path.display(),
            issues.len()
        );
        self.issues.insert(path_key(path), issues);
    }

    /// Applies an editor line move to every tethered issue originally
    /// reported at `original_line`. A negative `new_line` (see
    /// [`DELETED_LINE`]) untethers them. Returns the number of issues touched.
    pub fn update_issue_position(&mut self, path: &Path, original_line: u32, new_line: i64) -> usize {
        let Some(issues) = self.issues.get_mut(&path_key(path)) else {
            return 0;
        };

        let mut updated = 0;
        for issue in issues
            .iter_mut()
            .filter(|issue| issue.tethered && issue.range.start_line == original_line)
        {
            if new_line < 0 {
                issue.tethered = false;
            } else {
                issue.line_offset = new_line - i64::from(original_line);
            }
            updated += 1;
        }
        updated
    }

    /// Issues of `path` that lost their position, kept for inspection.
    pub fn untethered_issues(&self, path: &Path) -> Vec<LiveIssue> {
        self.issues
            .get(&path_key(path))
            .map(|issues| issues.iter().filter(|i| !i.tethered).cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const FILE: &str = "/work/project/a.pas";

    fn reported(rule_key: &str, start_line: u32, start_offset: u32, end_line: u32, end_offset: u32) -> ReportedIssue {
        ReportedIssue {
            rule_key: rule_key.to_string(),
            message: format!("{rule_key} violated"),
            file: PathBuf::from(FILE),
            range: IssueRange {
                start_line,
                start_line_offset: start_offset,
                end_line,
                end_line_offset: end_offset,
            },
        }
    }

    fn store_with(issues: Vec<ReportedIssue>) -> IssueStore {
        let mut store = IssueStore::new();
        let live = issues.into_iter().map(|i| LiveIssue::new(i, None)).collect();
        store.replace_issues_for_file(Path::new(FILE), live);
        store
    }

    fn keys(issues: &[LiveIssue]) -> Vec<(i64, String)> {
        issues
            .iter()
            .map(|i| (i.start_line(), i.rule_key.clone()))
            .collect()
    }

    #[test]
    fn test_get_issues_sorted_by_position_then_rule() {
        let store = store_with(vec![
            reported("pas:B", 7, 2, 7, 9),
            reported("pas:C", 3, 4, 3, 8),
            reported("pas:A", 7, 2, 7, 5),
            reported("pas:A", 7, 0, 7, 1),
            reported("pas:A", 7, 2, 7, 3),
        ]);

        let issues = store.get_issues(Path::new(FILE), None);
        let order: Vec<(i64, u32, &str, u32)> = issues.iter().map(|i| i.sort_key()).collect();
        assert_eq!(
            order,
            vec![
                (3, 4, "pas:C", 8),
                (7, 0, "pas:A", 1),
                (7, 2, "pas:A", 3),
                (7, 2, "pas:A", 5),
                (7, 2, "pas:B", 9),
            ]
        );
    }

    #[test]
    fn test_get_issues_filters_by_line() {
        let store = store_with(vec![
            reported("pas:Multi", 2, 0, 6, 1),
            reported("pas:Single", 4, 0, 4, 10),
            reported("pas:Other", 9, 0, 9, 3),
        ]);

        let at_four = store.get_issues(Path::new(FILE), Some(4));
        assert_eq!(
            keys(&at_four),
            vec![(2, "pas:Multi".to_string()), (4, "pas:Single".to_string())]
        );
        assert!(store.get_issues(Path::new(FILE), Some(8)).is_empty());
    }

    #[test]
    fn test_get_issues_uses_normalized_path() {
        let store = store_with(vec![reported("pas:A", 1, 0, 1, 1)]);
        let issues = store.get_issues(Path::new("/work/project/src/../a.pas"), None);
        assert_eq!(issues.len(), 1);
        assert!(store.get_issues(Path::new("/work/project/b.pas"), None).is_empty());
    }

    #[test]
    fn test_update_issue_position_shifts_matching_issues() {
        let mut store = store_with(vec![
            reported("pas:A", 10, 0, 12, 1),
            reported("pas:B", 10, 3, 10, 4),
            reported("pas:C", 20, 0, 20, 1),
        ]);

        assert_eq!(store.update_issue_position(Path::new(FILE), 10, 15), 2);

        let issues = store.get_issues(Path::new(FILE), None);
        assert_eq!(
            keys(&issues),
            vec![
                (15, "pas:A".to_string()),
                (15, "pas:B".to_string()),
                (20, "pas:C".to_string()),
            ]
        );
        assert_eq!(issues[0].end_line(), 17);
        assert_eq!(issues[0].line_offset(), 5);
        assert_eq!(issues[0].range.start_line, 10);
    }

    #[test]
    fn test_update_issue_position_replaces_previous_offset() {
        let mut store = store_with(vec![reported("pas:A", 10, 0, 10, 1)]);

        store.update_issue_position(Path::new(FILE), 10, 15);
        store.update_issue_position(Path::new(FILE), 10, 8);

        let issues = store.get_issues(Path::new(FILE), None);
        assert_eq!(issues[0].start_line(), 8);
        assert_eq!(issues[0].line_offset(), -2);
    }

    #[test]
    fn test_deleted_line_untethers_without_removing() {
        let mut store = store_with(vec![
            reported("pas:A", 5, 0, 5, 1),
            reported("pas:B", 6, 0, 6, 1),
        ]);

        assert_eq!(
            store.update_issue_position(Path::new(FILE), 5, DELETED_LINE),
            1
        );

        let live = store.get_issues(Path::new(FILE), None);
        assert_eq!(keys(&live), vec![(6, "pas:B".to_string())]);
        assert!(store.get_issues(Path::new(FILE), Some(5)).is_empty());

        let untethered = store.untethered_issues(Path::new(FILE));
        assert_eq!(untethered.len(), 1);
        assert_eq!(untethered[0].rule_key, "pas:A");
        assert!(!untethered[0].is_tethered());

        // Untethered issues ignore later moves.
        assert_eq!(store.update_issue_position(Path::new(FILE), 5, 7), 0);
    }

    #[test]
    fn test_replace_discards_previous_issues() {
        let mut store = store_with(vec![reported("pas:A", 5, 0, 5, 1)]);
        store.update_issue_position(Path::new(FILE), 5, DELETED_LINE);

        store.replace_issues_for_file(Path::new(FILE), Vec::new());

        assert!(store.get_issues(Path::new(FILE), None).is_empty());
        assert!(store.untethered_issues(Path::new(FILE)).is_empty());
    }

    #[test]
    fn test_update_on_unknown_file_is_noop() {
        let mut store = IssueStore::new();
        assert_eq!(store.update_issue_position(Path::new(FILE), 1, 2), 0);
    }

    #[test]
    fn test_anchor_captures_original_start_line() {
        let source = "unit A;\n\ninterface  \nuses B;\n";
        let issue = LiveIssue::new(reported("pas:A", 3, 0, 3, 9), Some(source));
        assert_eq!(issue.anchor.as_deref(), Some("interface"));

        let past_end = LiveIssue::new(reported("pas:A", 40, 0, 40, 1), Some(source));
        assert_eq!(past_end.anchor, None);

        let line_zero = LiveIssue::new(reported("pas:A", 0, 0, 0, 1), Some(source));
        assert_eq!(line_zero.anchor, None);
    }
}
