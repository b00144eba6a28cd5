//! Virtual-path resolution.
//!
//! User-facing paths are rooted at `/` and pick a storage class with their
//! first segment (`home`, `shared/<drive>`). This module translates them to
//! on-disk paths under the data root and back, rejecting traversal attempts
//! before any I/O happens. It performs no filesystem access and no
//! permission checks; those belong to the layers above.

use std::path::{Path, PathBuf};

use skiff_model::{StorageClass, User};

use crate::error::{Error, Result};

/// Outcome of resolving one virtual path.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub class: StorageClass,
    /// On-disk location. For `StorageClass::Root` this is the data root
    /// itself and callers must not touch it directly.
    pub real: PathBuf,
    /// Canonical virtual form, e.g. `/home/docs/a.txt`.
    pub canonical: String,
    /// Drive name when `class == Shared`.
    pub drive: Option<String>,
    /// Username owning the subtree when `class == Home`.
    pub home_user: Option<String>,
}

impl Resolved {
    pub fn is_root(&self) -> bool {
        self.class == StorageClass::Root
    }

    /// Whether this resolves the top of its class (`/home`, `/shared/x`).
    pub fn is_class_root(&self) -> bool {
        match self.class {
            StorageClass::Root => true,
            StorageClass::Home => self.canonical == "/home",
            StorageClass::Shared => {
                self.canonical.matches('/').count() == 2
            }
        }
    }
}

/// Reverse mapping of an on-disk path back into the virtual tree, used by
/// the filesystem watcher to address events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReversePath {
    Home { username: String, rest: String },
    Shared { drive: String, rest: String },
}

impl ReversePath {
    /// Canonical virtual path from the owner's point of view.
    pub fn canonical(&self) -> String {
        match self {
            ReversePath::Home { rest, .. } => {
                if rest.is_empty() {
                    "/home".to_string()
                } else {
                    format!("/home/{rest}")
                }
            }
            ReversePath::Shared { drive, rest } => {
                if rest.is_empty() {
                    format!("/shared/{drive}")
                } else {
                    format!("/shared/{drive}/{rest}")
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    data_root: PathBuf,
}

impl PathResolver {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn users_root(&self) -> PathBuf {
        self.data_root.join("users")
    }

    pub fn shared_root(&self) -> PathBuf {
        self.data_root.join("shared")
    }

    pub fn trash_root(&self) -> PathBuf {
        self.data_root.join("trash")
    }

    pub fn uploads_root(&self) -> PathBuf {
        self.data_root.join("uploads")
    }

    pub fn home_dir(&self, username: &str) -> PathBuf {
        self.users_root().join(username)
    }

    pub fn drive_dir(&self, drive: &str) -> PathBuf {
        self.shared_root().join(drive)
    }

    pub fn user_trash_dir(&self, username: &str) -> PathBuf {
        self.trash_root().join(username)
    }

    /// Resolves a virtual path for an optionally authenticated principal.
    pub fn resolve(&self, vpath: &str, principal: Option<&User>) -> Result<Resolved> {
        self.resolve_inner(vpath, principal.map(|u| u.username.as_str()))
    }

    /// Resolves a virtual path through a named user's view. Share links use
    /// this so a link conveys its creator's view of the tree.
    pub fn resolve_for_user(&self, vpath: &str, username: &str) -> Result<Resolved> {
        self.resolve_inner(vpath, Some(username))
    }

    fn resolve_inner(&self, vpath: &str, username: Option<&str>) -> Result<Resolved> {
        screen_raw(vpath)?;
        let segments = canonical_segments(vpath)?;

        let Some((first, rest)) = segments.split_first() else {
            return Ok(Resolved {
                class: StorageClass::Root,
                real: self.data_root.clone(),
                canonical: "/".to_string(),
                drive: None,
                home_user: None,
            });
        };

        match first.as_str() {
            "home" => {
                let username = username.ok_or_else(|| {
                    Error::Unauthenticated("home paths need an authenticated user".to_string())
                })?;
                let base = self.home_dir(username);
                let real = join_segments(&base, rest);
                contain(&real, &base, vpath)?;
                let canonical = render_canonical("/home", rest);
                Ok(Resolved {
                    class: StorageClass::Home,
                    real,
                    canonical,
                    drive: None,
                    home_user: Some(username.to_string()),
                })
            }
            "shared" => {
                let Some((drive, rest)) = rest.split_first() else {
                    // `/shared` alone indexes the drives visible to the
                    // caller; the ACL engine decides which those are.
                    return Ok(Resolved {
                        class: StorageClass::Root,
                        real: self.shared_root(),
                        canonical: "/shared".to_string(),
                        drive: None,
                        home_user: None,
                    });
                };
                if drive.is_empty() {
                    return Err(Error::InvalidPath("empty drive name".to_string()));
                }
                let base = self.drive_dir(drive);
                let real = join_segments(&base, rest);
                contain(&real, &base, vpath)?;
                let canonical = render_canonical(&format!("/shared/{drive}"), rest);
                Ok(Resolved {
                    class: StorageClass::Shared,
                    real,
                    canonical,
                    drive: Some(drive.clone()),
                    home_user: None,
                })
            }
            other => Err(Error::InvalidPath(format!(
                "unknown storage class segment: {other}"
            ))),
        }
    }

    /// Maps an on-disk path back into the virtual tree. Paths outside the
    /// `users/` and `shared/` subtrees (staging, trash, the roots
    /// themselves) return `None`.
    pub fn reverse(&self, real: &Path) -> Option<ReversePath> {
        if let Ok(tail) = real.strip_prefix(self.users_root()) {
            let mut parts = tail.components().map(|c| c.as_os_str().to_string_lossy());
            let username = parts.next()?.to_string();
            let rest = parts.collect::<Vec<_>>().join("/");
            return Some(ReversePath::Home { username, rest });
        }
        if let Ok(tail) = real.strip_prefix(self.shared_root()) {
            let mut parts = tail.components().map(|c| c.as_os_str().to_string_lossy());
            let drive = parts.next()?.to_string();
            let rest = parts.collect::<Vec<_>>().join("/");
            return Some(ReversePath::Shared { drive, rest });
        }
        None
    }
}

/// Byte-level screening applied before any parsing.
fn screen_raw(vpath: &str) -> Result<()> {
    if vpath.contains('\0') {
        return Err(Error::InvalidPath("NUL byte in path".to_string()));
    }
    if let Some(bad) = vpath.chars().find(|c| (*c as u32) < 32 && *c != '\t') {
        return Err(Error::InvalidPath(format!(
            "control character {:#04x} in path",
            bad as u32
        )));
    }
    let lower = vpath.to_ascii_lowercase();
    if lower.contains("%2e%2e") || lower.contains("%2e.") || lower.contains(".%2e") {
        return Err(Error::InvalidPath(
            "percent-encoded traversal sequence".to_string(),
        ));
    }
    Ok(())
}

/// Splits into canonical segments: redundant separators and `.` collapse,
/// any residual `..` rejects.
fn canonical_segments(vpath: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for segment in vpath.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(Error::PathEscape(vpath.to_string()));
            }
            s => out.push(s.to_string()),
        }
    }
    Ok(out)
}

fn join_segments(base: &Path, segments: &[String]) -> PathBuf {
    let mut path = base.to_path_buf();
    for segment in segments {
        path.push(segment);
    }
    path
}

/// Final containment check on the joined path. Escape here would mean the
/// canonicalisation above let something through, so it is fatal.
fn contain(real: &Path, base: &Path, original: &str) -> Result<()> {
    if real.starts_with(base) {
        Ok(())
    } else {
        Err(Error::PathEscape(original.to_string()))
    }
}

fn render_canonical(prefix: &str, rest: &[String]) -> String {
    if rest.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}/{}", rest.join("/"))
    }
}

/// Validates a single name for create/rename targets.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidFilename("empty name".to_string()));
    }
    if name.len() > 255 {
        return Err(Error::InvalidFilename("name longer than 255 bytes".to_string()));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidFilename(format!("reserved name: {name}")));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(Error::InvalidFilename(
            "name contains a separator or NUL".to_string(),
        ));
    }
    if name.chars().any(|c| (c as u32) < 32) {
        return Err(Error::InvalidFilename(
            "name contains control characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use skiff_model::UserId;

    fn resolver() -> PathResolver {
        PathResolver::new("/data")
    }

    fn alice() -> User {
        User {
            id: UserId::new(),
            username: "alice".into(),
            email: None,
            is_admin: false,
            is_active: true,
            storage_quota: 0,
            storage_used: 0,
            trash_used: 0,
            totp_enabled: false,
            failed_login_count: 0,
            locked_until: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn home_path_resolves_under_user_subtree() {
        let alice = alice();
        let resolved = resolver()
            .resolve("/home/docs/a.txt", Some(&alice))
            .expect("resolve");
        assert_eq!(resolved.real, PathBuf::from("/data/users/alice/docs/a.txt"));
        assert_eq!(resolved.canonical, "/home/docs/a.txt");
        assert_eq!(resolved.class, StorageClass::Home);
    }

    #[test]
    fn dot_dot_rejects_before_any_io() {
        let alice = alice();
        let err = resolver()
            .resolve("/home/docs/../../../etc/passwd", Some(&alice))
            .unwrap_err();
        assert_eq!(err.kind(), "path-escape");
    }

    #[test]
    fn percent_encoded_traversal_rejects() {
        let alice = alice();
        for input in ["/home/%2e%2e/etc", "/home/%2E%2e/x", "/home/a/.%2e/b"] {
            let err = resolver().resolve(input, Some(&alice)).unwrap_err();
            assert_eq!(err.kind(), "invalid-path", "input: {input}");
        }
    }

    #[test]
    fn nul_and_control_chars_reject() {
        let alice = alice();
        assert!(resolver().resolve("/home/a\0b", Some(&alice)).is_err());
        assert!(resolver().resolve("/home/a\x07b", Some(&alice)).is_err());
        // Tab is the one allowed control character.
        assert!(resolver().resolve("/home/a\tb", Some(&alice)).is_ok());
    }

    #[test]
    fn redundant_separators_and_dot_collapse() {
        let alice = alice();
        let resolved = resolver()
            .resolve("//home//./docs///a.txt", Some(&alice))
            .expect("resolve");
        assert_eq!(resolved.canonical, "/home/docs/a.txt");
    }

    #[test]
    fn empty_and_slash_resolve_to_root() {
        for input in ["", "/"] {
            let resolved = resolver().resolve(input, None).expect("resolve");
            assert!(resolved.is_root());
            assert_eq!(resolved.canonical, "/");
        }
    }

    #[test]
    fn home_without_principal_is_unauthenticated() {
        let err = resolver().resolve("/home/docs", None).unwrap_err();
        assert_eq!(err.kind(), "unauthenticated");
    }

    #[test]
    fn shared_alone_is_an_index() {
        let resolved = resolver().resolve("/shared", None).expect("resolve");
        assert!(resolved.is_root());
        assert_eq!(resolved.canonical, "/shared");
    }

    #[test]
    fn shared_drive_path_resolves() {
        let resolved = resolver()
            .resolve("/shared/team/spec.md", None)
            .expect("resolve");
        assert_eq!(resolved.real, PathBuf::from("/data/shared/team/spec.md"));
        assert_eq!(resolved.drive.as_deref(), Some("team"));
    }

    #[test]
    fn unknown_class_rejects() {
        let err = resolver().resolve("/attic/x", None).unwrap_err();
        assert_eq!(err.kind(), "invalid-path");
    }

    #[test]
    fn reverse_maps_home_and_shared() {
        let r = resolver();
        assert_eq!(
            r.reverse(Path::new("/data/users/alice/docs/a.txt")),
            Some(ReversePath::Home {
                username: "alice".into(),
                rest: "docs/a.txt".into()
            })
        );
        assert_eq!(
            r.reverse(Path::new("/data/shared/team/spec.md")),
            Some(ReversePath::Shared {
                drive: "team".into(),
                rest: "spec.md".into()
            })
        );
        assert_eq!(r.reverse(Path::new("/data/uploads/xyz")), None);
        assert_eq!(r.reverse(Path::new("/data/trash/alice/1")), None);
    }

    #[test]
    fn reverse_canonical_forms() {
        let rp = ReversePath::Shared {
            drive: "team".into(),
            rest: "a/b".into(),
        };
        assert_eq!(rp.canonical(), "/shared/team/a/b");
        let rp = ReversePath::Home {
            username: "alice".into(),
            rest: String::new(),
        };
        assert_eq!(rp.canonical(), "/home");
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("report.pdf").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a\0b").is_err());
        assert!(validate_name(&"x".repeat(256)).is_err());
    }
}
