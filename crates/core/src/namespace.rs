//! Global-environment leak detection from before/after name snapshots.

use std::collections::HashSet;

use serde::Serialize;

const BEFORE_HEADER: &str = "#before";
const AFTER_HEADER: &str = "#after";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceSnapshot {
	pub before: Vec<String>,
	pub after: Vec<String>,
}

impl NamespaceSnapshot {
	/// Parses the sidecar written by the eval program.
	pub fn parse(text: &str) -> Option<Self> {
		let mut lines = text.lines();
		if lines.next()? != BEFORE_HEADER {
			return None;
		}
		let mut snapshot = Self::default();
		let mut seen_after = false;
		for line in lines {
			if !seen_after && line == AFTER_HEADER {
				seen_after = true;
				continue;
			}
			if line.is_empty() {
				continue;
			}
			if seen_after {
				snapshot.after.push(line.to_string());
			} else {
				snapshot.before.push(line.to_string());
			}
		}
		seen_after.then_some(snapshot)
	}
}

/// Names the request was permitted to add or remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
	pub added: Vec<String>,
	pub removed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NamespaceDiff {
	pub added: Vec<String>,
	pub removed: Vec<String>,
}

impl NamespaceDiff {
	pub fn is_clean(&self) -> bool {
		self.added.is_empty() && self.removed.is_empty()
	}

	pub fn summary(&self) -> String {
		let mut parts = Vec::new();
		if !self.added.is_empty() {
			parts.push(format!("added {}", self.added.join(", ")));
		}
		if !self.removed.is_empty() {
			parts.push(format!("removed {}", self.removed.join(", ")));
		}
		parts.join("; ")
	}
}

/// Ordered set difference: `added` keeps `after` order, `removed` keeps
/// `before` order. Allowed names are dropped from the result.
pub fn diff(snapshot: &NamespaceSnapshot, allow: &AllowList) -> NamespaceDiff {
	NamespaceDiff {
		added: ordered_difference(&snapshot.after, &snapshot.before, &allow.added),
		removed: ordered_difference(&snapshot.before, &snapshot.after, &allow.removed),
	}
}

fn ordered_difference(left: &[String], right: &[String], allowed: &[String]) -> Vec<String> {
	let right: HashSet<&str> = right.iter().map(String::as_str).collect();
	let allowed: HashSet<&str> = allowed.iter().map(String::as_str).collect();
	let mut seen = HashSet::new();
	left.iter()
		.filter(|name| !right.contains(name.as_str()) && !allowed.contains(name.as_str()))
		.filter(|name| seen.insert(name.as_str()))
		.cloned()
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn names(items: &[&str]) -> Vec<String> {
		items.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn parses_sidecar_sections() {
		let snapshot = NamespaceSnapshot::parse("#before\na\nb\n#after\nb\nc\n").unwrap();
		assert_eq!(snapshot.before, names(&["a", "b"]));
		assert_eq!(snapshot.after, names(&["b", "c"]));
		assert_eq!(NamespaceSnapshot::parse("#before\na\n"), None);
		assert_eq!(NamespaceSnapshot::parse("garbage"), None);
	}

	#[test]
	fn diff_is_ordered_and_respects_allow_list() {
		let snapshot = NamespaceSnapshot {
			before: names(&["keep", "gone2", "gone1", "df"]),
			after: names(&["zeta", "keep", "alpha", "df", "model"]),
		};
		let allow = AllowList {
			added: names(&["model"]),
			removed: names(&["gone1"]),
		};
		let result = diff(&snapshot, &allow);
		assert_eq!(result.added, names(&["zeta", "alpha"]));
		assert_eq!(result.removed, names(&["gone2"]));
		assert!(!result.is_clean());
		assert_eq!(result.summary(), "added zeta, alpha; removed gone2");
	}

	#[test]
	fn identical_snapshots_are_clean() {
		let snapshot = NamespaceSnapshot {
			before: names(&["a", "b"]),
			after: names(&["b", "a"]),
		};
		assert!(diff(&snapshot, &AllowList::default()).is_clean());
	}
}
