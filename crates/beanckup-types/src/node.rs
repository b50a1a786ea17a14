use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single filesystem entry at one scan instant.
///
/// Exactly one of `path` / `dir` is non-empty. `hash` is empty for
/// directories and for files whose content could not be read (which forces
/// classification as new). An empty `reference` marks content not yet
/// physically placed; it must be resolved before the node reaches a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileNode {
    /// Workspace-relative, forward-slash path. Empty for directories.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// Directory path, mutually exclusive with `path`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dir: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mod_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    /// Hex SHA-256 of the file content.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,
    /// Where the bytes physically live: `<package-name>/<path-inside-package>`.
    /// The package part may carry a `.001` volume suffix when the archive
    /// was split.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reference: String,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl FileNode {
    pub fn file(
        path: impl Into<String>,
        size: u64,
        mod_time: Option<DateTime<Utc>>,
        create_time: Option<DateTime<Utc>>,
    ) -> Self {
        FileNode {
            path: path.into(),
            size,
            mod_time,
            create_time,
            ..FileNode::default()
        }
    }

    pub fn directory(
        dir: impl Into<String>,
        mod_time: Option<DateTime<Utc>>,
        create_time: Option<DateTime<Utc>>,
    ) -> Self {
        FileNode {
            dir: dir.into(),
            mod_time,
            create_time,
            ..FileNode::default()
        }
    }

    pub fn is_dir(&self) -> bool {
        !self.dir.is_empty()
    }

    /// The workspace-relative path, whichever of `path`/`dir` is set.
    pub fn node_path(&self) -> &str {
        if self.is_dir() {
            &self.dir
        } else {
            &self.path
        }
    }

    /// A file whose content has not been stored in any package yet.
    pub fn is_new(&self) -> bool {
        !self.is_dir() && self.reference.is_empty()
    }

    /// A file whose content already lives in a prior package.
    pub fn is_reference(&self) -> bool {
        !self.is_dir() && !self.reference.is_empty()
    }
}

/// Split a reference string into `(package-identifier, path-inside-package)`.
pub fn split_reference(reference: &str) -> Option<(&str, &str)> {
    let (pkg, inner) = reference.split_once('/')?;
    if pkg.is_empty() || inner.is_empty() {
        return None;
    }
    Some((pkg, inner))
}

/// Strip a trailing numeric volume suffix (`.001`, `.002`, ...), if present.
pub fn strip_volume_suffix(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((base, ext)) if !ext.is_empty() && ext.bytes().all(|b| b.is_ascii_digit()) => base,
        _ => name,
    }
}

/// Reduce a package identifier from a reference (or a file on disk) to the
/// bare package base name: volume suffix stripped, then the `.7z` extension.
pub fn package_base_name(identifier: &str) -> &str {
    let no_volume = strip_volume_suffix(identifier);
    no_volume.strip_suffix(".7z").unwrap_or(no_volume)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_and_dir_are_exclusive() {
        let f = FileNode::file("a/b.txt", 3, None, None);
        assert!(!f.is_dir());
        assert_eq!(f.node_path(), "a/b.txt");

        let d = FileNode::directory("a", None, None);
        assert!(d.is_dir());
        assert_eq!(d.node_path(), "a");
        assert!(!d.is_new());
        assert!(!d.is_reference());
    }

    #[test]
    fn new_vs_reference_classification() {
        let mut f = FileNode::file("a.txt", 1, None, None);
        assert!(f.is_new());
        f.reference = "ws-S01E01-250101_000000.7z/a.txt".into();
        assert!(f.is_reference());
        assert!(!f.is_new());
    }

    #[test]
    fn split_reference_first_slash_only() {
        let (pkg, inner) = split_reference("ws-S01E01-250101_000000.7z/data/img.jpg").unwrap();
        assert_eq!(pkg, "ws-S01E01-250101_000000.7z");
        assert_eq!(inner, "data/img.jpg");

        assert!(split_reference("no-slash").is_none());
        assert!(split_reference("pkg/").is_none());
    }

    #[test]
    fn package_base_name_strips_volume_and_extension() {
        assert_eq!(
            package_base_name("ws-S01E01-250101_000000.7z.001"),
            "ws-S01E01-250101_000000"
        );
        assert_eq!(
            package_base_name("ws-S01E01-250101_000000.7z"),
            "ws-S01E01-250101_000000"
        );
        assert_eq!(
            package_base_name("ws-S01E01-250101_000000"),
            "ws-S01E01-250101_000000"
        );
    }

    #[test]
    fn zero_equivalent_fields_are_omitted() {
        let d = FileNode::directory("sub", None, None);
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, r#"{"dir":"sub"}"#);

        let back: FileNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
