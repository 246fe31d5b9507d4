//! Path helpers and the virtual mount table.
//!
//! Virtual paths like `/Game/Content/Foo` are resolved against a
//! process-wide table of `(virtual prefix, on-disk root)` mounts. The
//! runtime only consumes the table; the host decides what gets mounted.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use parking_lot::RwLock;

/// A single entry in the mount table.
#[derive(Debug, Clone)]
pub struct MountPoint {
    /// The virtual prefix, e.g. `/Game/Content`.
    pub prefix: String,
    /// The on-disk directory the prefix maps to.
    pub root: PathBuf,
}

static MOUNTS: Lazy<RwLock<Vec<MountPoint>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// Join path fragments with `/`, collapsing duplicate separators.
pub fn combine<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for part in parts {
        let part = normalize(part.as_ref());
        if part.is_empty() {
            continue;
        }
        if out.is_empty() {
            out.push_str(&part);
        } else {
            while out.ends_with('/') {
                out.pop();
            }
            out.push('/');
            out.push_str(part.trim_start_matches('/'));
        }
    }
    out
}

/// Replace backslashes with forward slashes.
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

/// The filename component of `path` without its extension.
pub fn file_stem(path: &str) -> &str {
    let normalized_start = path.rfind(['/', '\\']).map(|i| i + 1).unwrap_or(0);
    let name = &path[normalized_start..];
    match name.rfind('.') {
        Some(0) | None => name,
        Some(dot) => &name[..dot],
    }
}

/// The extension of `path` (without the dot), if any.
pub fn extension(path: &str) -> Option<&str> {
    let name_start = path.rfind(['/', '\\']).map(|i| i + 1).unwrap_or(0);
    let name = &path[name_start..];
    name.rfind('.').filter(|&i| i > 0).map(|i| &name[i + 1..])
}

/// Mount `root` at the given virtual `prefix`.
pub fn mount(prefix: &str, root: impl Into<PathBuf>) {
    let prefix = normalize(prefix).trim_end_matches('/').to_string();
    let root = root.into();
    let mut mounts = MOUNTS.write();
    mounts.retain(|m| m.prefix != prefix);
    mounts.push(MountPoint { prefix, root });
}

/// Remove the mount for `prefix`, if present.
pub fn unmount(prefix: &str) {
    let prefix = normalize(prefix).trim_end_matches('/').to_string();
    MOUNTS.write().retain(|m| m.prefix != prefix);
}

/// Remove every mount. Intended for host teardown and tests.
pub fn unmount_all() {
    MOUNTS.write().clear();
}

/// Snapshot of the current mount table.
pub fn mounted_paths() -> Vec<MountPoint> {
    MOUNTS.read().clone()
}

/// Resolve a virtual path to an on-disk path using the mount table.
///
/// Returns [`None`] when no mounted prefix matches. Paths that are already
/// on-disk paths (not starting with a mounted prefix) are returned as-is.
pub fn resolve_virtual(path: &str) -> Option<PathBuf> {
    let path = normalize(path);
    let mounts = MOUNTS.read();
    let mut best: Option<(&MountPoint, &str)> = None;
    for m in mounts.iter() {
        if let Some(rest) = path.strip_prefix(&m.prefix) {
            if rest.is_empty() || rest.starts_with('/') {
                match best {
                    Some((b, _)) if b.prefix.len() >= m.prefix.len() => {}
                    _ => best = Some((m, rest.trim_start_matches('/'))),
                }
            }
        }
    }
    best.map(|(m, rest)| m.root.join(rest))
}

/// Convert an on-disk path back to its virtual form, if it is under a mount.
pub fn to_virtual(path: &Path) -> Option<String> {
    let mounts = MOUNTS.read();
    let mut best: Option<String> = None;
    for m in mounts.iter() {
        if let Ok(rest) = path.strip_prefix(&m.root) {
            let rest = normalize(&rest.to_string_lossy());
            let virt = if rest.is_empty() {
                m.prefix.clone()
            } else {
                format!("{}/{}", m.prefix, rest)
            };
            match &best {
                Some(b) if b.len() >= virt.len() => {}
                _ => best = Some(virt),
            }
        }
    }
    best
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn combine_collapses_separators() {
        assert_eq!(combine(["/Game/Content/", "/Foo", "Bar.lasset"]), "/Game/Content/Foo/Bar.lasset");
        assert_eq!(combine(["a", "b"]), "a/b");
        assert_eq!(combine(["", "a", ""]), "a");
    }

    #[test]
    fn normalize_backslashes() {
        assert_eq!(normalize("a\\b\\c"), "a/b/c");
    }

    #[test]
    fn stem_and_extension() {
        assert_eq!(file_stem("/Game/Content/Foo.lasset"), "Foo");
        assert_eq!(file_stem("Foo"), "Foo");
        assert_eq!(extension("/Game/Content/Foo.lasset"), Some("lasset"));
        assert_eq!(extension("/Game/Content/Foo"), None);
    }

    #[test]
    fn mount_resolution_round_trips() {
        mount("/Test/Content", "/tmp/test_content");
        let disk = resolve_virtual("/Test/Content/Foo.lasset").unwrap();
        assert_eq!(disk, PathBuf::from("/tmp/test_content/Foo.lasset"));
        assert_eq!(
            to_virtual(&disk).as_deref(),
            Some("/Test/Content/Foo.lasset")
        );
        unmount("/Test/Content");
        assert!(resolve_virtual("/Test/Content/Foo.lasset").is_none());
    }
}
