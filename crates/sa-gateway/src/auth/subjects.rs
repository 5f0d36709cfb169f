//! Subject allow-list.

use std::collections::HashSet;

/// Exact-match allow-list of token subjects.
///
/// An empty list permits every subject. Configured order is kept for display.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SubjectAllowList {
    ordered: Vec<String>,
    members: HashSet<String>,
}

impl SubjectAllowList {
    /// Parse a comma-separated list, trimming entries and dropping blanks.
    pub fn parse(raw: &str) -> Self {
        raw.split(',').map(str::trim).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(String::as_str)
    }

    /// Case-sensitive membership; always true for an empty list.
    pub fn permits(&self, subject: &str) -> bool {
        self.is_empty() || self.members.contains(subject)
    }
}

impl<S: AsRef<str>> FromIterator<S> for SubjectAllowList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = SubjectAllowList::default();
        for subject in iter {
            let subject = subject.as_ref();
            if subject.is_empty() {
                continue;
            }
            if list.members.insert(subject.to_string()) {
                list.ordered.push(subject.to_string());
            }
        }
        list
    }
}

// Subjects identify callers; only the count is printed.
impl std::fmt::Debug for SubjectAllowList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectAllowList")
            .field("len", &self.ordered.len())
            .finish()
    }
}
