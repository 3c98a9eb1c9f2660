//! Home-directory ownership and skeleton reconciliation
//!
//! Brings a home-directory subtree to a fixed target state: owned by the
//! expected account, with the directory skeleton and the empty extension
//! manifest the editor and its extension host expect. Re-running it on a tree
//! that is already in the target state changes nothing and reports a no-op.
//!
//! Reconciliation never fails its caller. Every error is logged and recorded
//! in the [`ReconcileReport`]; the next run retries whatever is still wrong.

use crate::errors::{DeskhookError, PermissionError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, instrument, warn};

/// Serialized form of an empty extension manifest
pub const EMPTY_MANIFEST: &str = "[]";

/// Owning account of a reconciled tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account name, when known
    pub name: Option<String>,
    pub uid: u32,
    pub gid: u32,
}

impl Account {
    pub fn from_ids(uid: u32, gid: u32) -> Self {
        Self {
            name: None,
            uid,
            gid,
        }
    }

    /// Resolve an account name to numeric ids via the system `id` command
    pub fn lookup(name: &str) -> Result<Self> {
        let uid = id_query(name, "-u")?;
        let gid = id_query(name, "-g")?;
        debug!("Resolved account {} to {}:{}", name, uid, gid);
        Ok(Self {
            name: Some(name.to_string()),
            uid,
            gid,
        })
    }

    /// The account the current process runs as
    pub fn current() -> Result<Self> {
        let uid = id_query_self("-u")?;
        let gid = id_query_self("-g")?;
        Ok(Self::from_ids(uid, gid))
    }

    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({}:{})", name, self.uid, self.gid),
            None => format!("{}:{}", self.uid, self.gid),
        }
    }
}

fn id_query(name: &str, flag: &str) -> Result<u32> {
    let output = Command::new("id")
        .arg(flag)
        .arg(name)
        .output()
        .map_err(|e| unknown_account(name, format!("failed to run id: {}", e)))?;
    if !output.status.success() {
        return Err(unknown_account(
            name,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    parse_id(name, &output.stdout)
}

fn id_query_self(flag: &str) -> Result<u32> {
    let output = Command::new("id")
        .arg(flag)
        .output()
        .map_err(|e| unknown_account("<self>", format!("failed to run id: {}", e)))?;
    parse_id("<self>", &output.stdout)
}

fn parse_id(name: &str, stdout: &[u8]) -> Result<u32> {
    let raw = String::from_utf8_lossy(stdout).trim().to_string();
    raw.parse::<u32>()
        .map_err(|e| unknown_account(name, format!("cannot parse '{}': {}", raw, e)))
}

fn unknown_account(name: &str, message: String) -> DeskhookError {
    PermissionError::UnknownAccount {
        name: name.to_string(),
        message,
    }
    .into()
}

/// Desired state of a subtree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileTarget {
    /// Root of the subtree, usually a home directory
    pub root: PathBuf,
    pub owner: Account,
    /// Directories that must exist, relative to `root`
    pub directories: Vec<PathBuf>,
    /// Manifest file created with an empty list if absent, relative to `root`
    pub manifest: Option<PathBuf>,
}

impl ReconcileTarget {
    /// Skeleton used by a browser-hosted editor and its extension host
    pub fn editor_home(root: impl Into<PathBuf>, owner: Account) -> Self {
        Self {
            root: root.into(),
            owner,
            directories: vec![
                PathBuf::from(".config/code-server"),
                PathBuf::from(".local/share/code-server"),
                PathBuf::from(".local/share/code-server/User"),
                PathBuf::from(".local/share/code-server/extensions"),
                PathBuf::from(".cache"),
            ],
            manifest: Some(PathBuf::from(
                ".local/share/code-server/extensions/extensions.json",
            )),
        }
    }
}

/// What a reconciliation pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub root: PathBuf,
    /// Whether ownership of the subtree had to be reassigned
    pub ownership_reassigned: bool,
    /// Entries that were created in this pass
    pub created: Vec<PathBuf>,
    /// Swallowed errors, already logged
    pub errors: Vec<String>,
}

impl ReconcileReport {
    /// True when the tree was already in the target state
    pub fn is_noop(&self) -> bool {
        !self.ownership_reassigned && self.created.is_empty()
    }
}

/// Idempotent ownership and skeleton fixer
#[derive(Debug, Clone)]
pub struct PermissionReconciler {
    target: ReconcileTarget,
}

impl PermissionReconciler {
    pub fn new(target: ReconcileTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &ReconcileTarget {
        &self.target
    }

    /// Run one reconciliation pass. Never fails; see the returned report.
    #[instrument(level = "info", skip(self), fields(root = %self.target.root.display(), owner = %self.target.owner.label()))]
    pub fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport {
            root: self.target.root.clone(),
            ..Default::default()
        };

        self.ensure_skeleton(&mut report);
        self.ensure_ownership(&mut report);

        if report.is_noop() {
            debug!("{} already reconciled; nothing to do", self.target.root.display());
        } else {
            info!(
                "Reconciled {}: ownership reassigned={}, created {} entr(ies)",
                self.target.root.display(),
                report.ownership_reassigned,
                report.created.len()
            );
        }
        report
    }

    fn ensure_skeleton(&self, report: &mut ReconcileReport) {
        for relative in &self.target.directories {
            let dir = self.target.root.join(relative);
            if dir.is_dir() {
                continue;
            }
            // Create one level at a time so every new ancestor is recorded.
            let mut missing = Vec::new();
            let mut cursor = dir.as_path();
            while !cursor.exists() {
                missing.push(cursor.to_path_buf());
                match cursor.parent() {
                    Some(parent) => cursor = parent,
                    None => break,
                }
            }
            for path in missing.into_iter().rev() {
                match std::fs::create_dir(&path) {
                    Ok(()) => {
                        self.hand_over(&path, report);
                        report.created.push(path);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                    Err(source) => {
                        record(report, io_error("create directory", &path, source));
                        break;
                    }
                }
            }
        }

        if let Some(relative) = &self.target.manifest {
            let manifest = self.target.root.join(relative);
            if !manifest.exists() {
                if let Some(parent) = manifest.parent() {
                    if let Err(source) = std::fs::create_dir_all(parent) {
                        record(report, io_error("create directory", parent, source));
                        return;
                    }
                }
                match std::fs::write(&manifest, EMPTY_MANIFEST) {
                    Ok(()) => {
                        self.hand_over(&manifest, report);
                        report.created.push(manifest);
                    }
                    Err(source) => record(report, io_error("write manifest", &manifest, source)),
                }
            }
        }
    }

    /// Entries whose owner decides whether the tree needs reassigning: the
    /// root, every skeleton directory and the manifest
    fn checkpoints(&self) -> Vec<PathBuf> {
        let root = &self.target.root;
        std::iter::once(root.clone())
            .chain(self.target.directories.iter().map(|d| root.join(d)))
            .chain(self.target.manifest.iter().map(|m| root.join(m)))
            .collect()
    }

    fn ensure_ownership(&self, report: &mut ReconcileReport) {
        let root = &self.target.root;
        let expected = (self.target.owner.uid, self.target.owner.gid);

        let mut mismatch = None;
        for path in self.checkpoints() {
            match owner_of(&path) {
                Ok(ids) if ids == expected => {}
                Ok(ids) => {
                    mismatch = Some((path, ids));
                    break;
                }
                Err(source) if &path == root => {
                    record(report, io_error("inspect", root, source));
                    return;
                }
                // Skeleton entries that could not be created are already recorded.
                Err(e) => debug!("Cannot inspect {}: {}", path.display(), e),
            }
        }

        let Some((path, current)) = mismatch else {
            debug!("{} already owned by {}:{}", root.display(), expected.0, expected.1);
            return;
        };

        info!(
            "{} owned by {}:{}, expected {}; reassigning {} recursively",
            path.display(),
            current.0,
            current.1,
            self.target.owner.label(),
            root.display()
        );
        let changed = chown_tree(root, expected, report);
        debug!("Reassigned {} entr(ies) under {}", changed, root.display());
        report.ownership_reassigned = changed > 0;
    }

    /// Give a freshly created entry to the owner, best effort
    fn hand_over(&self, path: &Path, report: &mut ReconcileReport) {
        let expected = (self.target.owner.uid, self.target.owner.gid);
        match owner_of(path) {
            Ok(ids) if ids == expected => {}
            _ => {
                if let Err(source) = lchown(path, expected) {
                    record(report, io_error("chown", path, source));
                }
            }
        }
    }
}

fn record(report: &mut ReconcileReport, error: PermissionError) {
    warn!("{}", error);
    report.errors.push(error.to_string());
}

fn io_error(action: &'static str, path: &Path, source: std::io::Error) -> PermissionError {
    PermissionError::Io {
        action,
        path: path.display().to_string(),
        source,
    }
}

#[cfg(unix)]
fn owner_of(path: &Path) -> std::io::Result<(u32, u32)> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::symlink_metadata(path)?;
    Ok((meta.uid(), meta.gid()))
}

#[cfg(not(unix))]
fn owner_of(_path: &Path) -> std::io::Result<(u32, u32)> {
    Ok((0, 0))
}

#[cfg(unix)]
fn lchown(path: &Path, (uid, gid): (u32, u32)) -> std::io::Result<()> {
    std::os::unix::fs::lchown(path, Some(uid), Some(gid))
}

#[cfg(not(unix))]
fn lchown(_path: &Path, _ids: (u32, u32)) -> std::io::Result<()> {
    Ok(())
}

/// Reassign ownership of every entry under `root` (inclusive) not already
/// owned by `ids`, returning how many changed. Symlinks are re-owned
/// themselves and never followed.
fn chown_tree(root: &Path, ids: (u32, u32), report: &mut ReconcileReport) -> usize {
    let mut changed = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let meta = match std::fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(source) => {
                record(report, io_error("inspect", &path, source));
                continue;
            }
        };
        if owner_of(&path).map_or(true, |current| current != ids) {
            match lchown(&path, ids) {
                Ok(()) => changed += 1,
                Err(source) => record(report, io_error("chown", &path, source)),
            }
        }
        if !meta.is_dir() {
            continue;
        }
        match std::fs::read_dir(&path) {
            Ok(entries) => stack.extend(entries.flatten().map(|e| e.path())),
            Err(source) => record(report, io_error("read directory", &path, source)),
        }
    }
    changed
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    fn own_account(dir: &Path) -> Account {
        let meta = std::fs::metadata(dir).unwrap();
        Account::from_ids(meta.uid(), meta.gid())
    }

    #[test]
    fn test_creates_skeleton_and_manifest() {
        let home = TempDir::new().unwrap();
        let target = ReconcileTarget::editor_home(home.path(), own_account(home.path()));
        let report = PermissionReconciler::new(target).reconcile();

        assert!(!report.ownership_reassigned);
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert!(home.path().join(".local/share/code-server/User").is_dir());
        assert!(home.path().join(".config/code-server").is_dir());

        let manifest = home
            .path()
            .join(".local/share/code-server/extensions/extensions.json");
        assert_eq!(std::fs::read_to_string(&manifest).unwrap(), EMPTY_MANIFEST);
        assert!(report.created.contains(&manifest));
        assert!(report.created.contains(&home.path().join(".local")));
    }

    #[test]
    fn test_second_pass_is_noop() {
        let home = TempDir::new().unwrap();
        let target = ReconcileTarget::editor_home(home.path(), own_account(home.path()));
        let reconciler = PermissionReconciler::new(target);

        let first = reconciler.reconcile();
        assert!(!first.is_noop());

        let manifest = home
            .path()
            .join(".local/share/code-server/extensions/extensions.json");
        let mtime_before = std::fs::metadata(&manifest).unwrap().modified().unwrap();

        let second = reconciler.reconcile();
        assert!(second.is_noop(), "{:?}", second);
        assert!(second.errors.is_empty());
        assert_eq!(
            std::fs::metadata(&manifest).unwrap().modified().unwrap(),
            mtime_before
        );
    }

    #[test]
    fn test_existing_manifest_is_preserved() {
        let home = TempDir::new().unwrap();
        let manifest_dir = home.path().join(".local/share/code-server/extensions");
        std::fs::create_dir_all(&manifest_dir).unwrap();
        std::fs::write(manifest_dir.join("extensions.json"), "[{\"id\":\"x\"}]").unwrap();

        let target = ReconcileTarget::editor_home(home.path(), own_account(home.path()));
        PermissionReconciler::new(target).reconcile();

        assert_eq!(
            std::fs::read_to_string(manifest_dir.join("extensions.json")).unwrap(),
            "[{\"id\":\"x\"}]"
        );
    }

    #[test]
    fn test_errors_are_swallowed() {
        let home = TempDir::new().unwrap();
        // A file where a directory is expected makes creation fail.
        std::fs::write(home.path().join(".cache"), "blocker").unwrap();
        let target = ReconcileTarget {
            root: home.path().to_path_buf(),
            owner: own_account(home.path()),
            directories: vec![PathBuf::from(".cache/sub")],
            manifest: None,
        };

        let report = PermissionReconciler::new(target).reconcile();
        assert!(!report.errors.is_empty());
    }

    fn running_as_root() -> bool {
        Account::current().map(|a| a.uid == 0).unwrap_or(false)
    }

    fn uid_of(path: &Path) -> u32 {
        std::fs::symlink_metadata(path).unwrap().uid()
    }

    #[test]
    fn test_mismatched_tree_is_reassigned_then_noop() {
        if !running_as_root() {
            eprintln!("Skipping test: changing ownership needs root");
            return;
        }
        let home = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let shared = outside.path().join("shared.txt");
        std::fs::write(&shared, "not ours").unwrap();
        std::fs::create_dir_all(home.path().join("projects/app")).unwrap();
        std::fs::write(home.path().join("projects/app/main.rs"), "fn main() {}").unwrap();
        std::os::unix::fs::symlink(&shared, home.path().join("link")).unwrap();

        let owner = Account::from_ids(4242, 4242);
        let reconciler =
            PermissionReconciler::new(ReconcileTarget::editor_home(home.path(), owner));

        let first = reconciler.reconcile();
        assert!(first.ownership_reassigned, "{:?}", first);
        assert!(first.errors.is_empty(), "{:?}", first.errors);
        for entry in [
            "",
            "projects/app/main.rs",
            "link",
            ".local/share/code-server/extensions/extensions.json",
        ] {
            assert_eq!(uid_of(&home.path().join(entry)), 4242, "{}", entry);
        }
        // The link itself is re-owned, not its target.
        assert_eq!(uid_of(&shared), 0);

        let second = reconciler.reconcile();
        assert!(second.is_noop(), "{:?}", second);
        assert!(second.errors.is_empty());
    }

    #[test]
    fn test_misowned_skeleton_under_correct_root_is_fixed() {
        if !running_as_root() {
            eprintln!("Skipping test: changing ownership needs root");
            return;
        }
        let home = TempDir::new().unwrap();
        let extensions = home.path().join(".local/share/code-server/extensions");
        std::fs::create_dir_all(&extensions).unwrap();
        std::os::unix::fs::lchown(home.path(), Some(1000), Some(1000)).unwrap();
        assert_eq!(uid_of(&extensions), 0);

        let reconciler = PermissionReconciler::new(ReconcileTarget::editor_home(
            home.path(),
            Account::from_ids(1000, 1000),
        ));

        let first = reconciler.reconcile();
        assert!(first.ownership_reassigned, "{:?}", first);
        assert_eq!(uid_of(&extensions), 1000);
        assert_eq!(uid_of(&extensions.join("extensions.json")), 1000);

        assert!(reconciler.reconcile().is_noop());
    }

    #[test]
    fn test_lookup_current_account() {
        let account = Account::current().unwrap();
        let meta = std::fs::metadata(TempDir::new().unwrap().path()).unwrap();
        assert_eq!(account.uid, meta.uid());
    }

    #[test]
    fn test_lookup_unknown_account_fails() {
        assert!(Account::lookup("deskhook-no-such-user-xyz").is_err());
    }
}
