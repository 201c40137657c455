//! Configuration session
//!
//! A [`Session`] owns the running tree, a candidate derived from it, the
//! revision archive and the commit lock. Front ends mutate the candidate and
//! call [`Session::commit`]:
//!
//! 1. Acquire the commit lock
//! 2. Reload the archive; if another session committed since this one last
//!    looked, replay the candidate's changes onto the new running tree
//! 3. Diff running against candidate
//! 4. Archive the new configuration as revision 0
//! 5. Write the running file atomically, withdrawing the revision on failure
//! 6. Promote the candidate to running
//! 7. Notify renderers in priority order
//! 8. Release the lock

use crate::lock::{Lock, LockError};
use crate::settings::Settings;
use cfg_core::{
    parse, strip_footer, union, Command, Diff, Reference, ReferenceError, RenderOptions, Tree,
    TreeError, VersionInfo,
};
use journal::{Archive, ArchiveError, LogEntry, RetentionPolicy};
use migrate::{ConfigMigrate, MigrationError, MigrationRegistry};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

const COMMIT_LOCK: &str = "commit";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("failed to load reference: {0}")]
    Reference(#[from] ReferenceError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("conflicting change at '{path}' committed by another session; discard and retry")]
    Conflict { path: String },

    #[error("renderer '{owner}' failed: {source}")]
    Renderer {
        owner: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type Result<T> = std::result::Result<T, SessionError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SessionError + '_ {
    move |source| SessionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Consumer of committed changes, such as a daemon configuration generator
pub trait Renderer {
    /// Reference owner this renderer is responsible for
    fn owner(&self) -> &str;

    /// Called after a commit with the new running tree and the applied diff
    fn apply(&self, running: &Tree, diff: &Diff) -> anyhow::Result<()>;
}

/// Parameters of a commit
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub user: String,
    /// Front end performing the commit
    pub via: String,
    pub comment: Option<String>,
    /// Compute the change set without writing anything
    pub dry_run: bool,
}

impl CommitRequest {
    pub fn new(via: impl Into<String>) -> Self {
        Self {
            user: std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
            via: via.into(),
            comment: None,
            dry_run: false,
        }
    }

    pub fn comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Outcome of a commit
#[derive(Debug, Clone, Default)]
pub struct CommitReport {
    /// Commands turning the old running tree into the new one
    pub commands: Vec<Command>,
    /// Archive entry of the new revision; `None` for no-op or dry-run commits
    pub revision: Option<LogEntry>,
    /// Renderer owners notified, in call order
    pub notified: Vec<String>,
}

impl CommitReport {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

pub struct Session {
    settings: Settings,
    reference: Option<Arc<Reference>>,
    registry: MigrationRegistry,
    version: VersionInfo,
    running: Tree,
    candidate: Tree,
    archive: Archive,
    /// Newest archived revision when `running` was read
    base_seq: Option<u64>,
    lock: Lock,
    renderers: Vec<Box<dyn Renderer>>,
}

impl Session {
    /// Open the running configuration, archive and lock named by `settings`
    ///
    /// The first open of an empty archive stores the running configuration
    /// as revision 0.
    pub fn open(settings: &Settings) -> Result<Self> {
        let reference = match &settings.paths.reference {
            Some(path) => Some(Arc::new(Reference::load(path)?)),
            None => None,
        };
        let registry = match &settings.paths.migration_dir {
            Some(dir) => MigrationRegistry::discover(dir)?,
            None => MigrationRegistry::new(),
        };

        let mut archive = Archive::open(
            &settings.paths.archive_dir,
            RetentionPolicy::new(settings.archive.max_revisions),
        )?
        .with_reference(reference.clone());

        // Seeding and reading the running file happen under the commit lock
        let mut lock = Lock::in_dir(&settings.paths.lock_dir, COMMIT_LOCK)?;
        lock.acquire(settings.commit.lock_timeout())?;
        let opened = open_running(settings, reference.clone(), &mut archive);
        if let Err(e) = lock.release() {
            warn!(error = %e, "failed to release commit lock");
        }
        let (running, file_version) = opened?;

        // Component versions come from the reference, else the running file
        let components = match &reference {
            Some(r) if !r.component_version().is_empty() => r.component_version().clone(),
            _ => file_version.map(|v| v.components).unwrap_or_default(),
        };
        let version = VersionInfo::new(components, settings.system.release.clone());

        let candidate = running.deep_copy();
        let base_seq = archive.head_seq();
        Ok(Self {
            settings: settings.clone(),
            reference,
            registry,
            version,
            running,
            candidate,
            archive,
            base_seq,
            lock,
            renderers: Vec::new(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn reference(&self) -> Option<&Arc<Reference>> {
        self.reference.as_ref()
    }

    pub fn running(&self) -> &Tree {
        &self.running
    }

    pub fn candidate(&self) -> &Tree {
        &self.candidate
    }

    pub fn candidate_mut(&mut self) -> &mut Tree {
        &mut self.candidate
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn register_renderer(&mut self, renderer: Box<dyn Renderer>) {
        self.renderers.push(renderer);
    }

    /// Throw away uncommitted changes
    pub fn discard(&mut self) {
        self.candidate = self.running.deep_copy();
    }

    /// Pending changes as a line diff or as commands
    pub fn compare(&self, commands: bool) -> String {
        Diff::new(&self.running, &self.candidate).render(commands)
    }

    /// Render `tree` with the session's version trailer
    fn render_with_version(&self, tree: &Tree) -> String {
        let version = (!self.version.components.is_empty()).then(|| self.version.clone());
        tree.render(&RenderOptions {
            ordered_values: false,
            version,
        })
    }

    fn write_running(&self, tree: &Tree) -> Result<()> {
        let target = &self.settings.paths.running_config;
        write_atomic(target, &self.render_with_version(tree))
    }

    /// Run `f` while holding the commit lock
    fn locked<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.lock.acquire(self.settings.commit.lock_timeout())?;
        let result = f(self);
        if let Err(e) = self.lock.release() {
            warn!(error = %e, "failed to release commit lock");
        }
        result
    }

    /// Commit the candidate
    ///
    /// Changes committed by other sessions in the meantime are kept: the
    /// candidate's own changes are replayed on top of them, and the commit
    /// fails with [`SessionError::Conflict`] when both touched the same node.
    pub fn commit(&mut self, request: &CommitRequest) -> Result<CommitReport> {
        self.locked(|session| session.commit_locked(request))
    }

    /// Running tree committed by another session since `running` was read
    fn newer_running(&mut self) -> Result<Option<Tree>> {
        self.archive.reload()?;
        if self.archive.head_seq() == self.base_seq {
            return Ok(None);
        }
        debug!(
            base = ?self.base_seq,
            head = ?self.archive.head_seq(),
            "running configuration changed by another session"
        );
        let (tree, _) = read_running(&self.settings.paths.running_config, self.reference.clone())?;
        Ok(Some(tree))
    }

    fn commit_locked(&mut self, request: &CommitRequest) -> Result<CommitReport> {
        if let Some(fresh) = self.newer_running()? {
            self.candidate = rebase(&self.running, &self.candidate, &fresh)?;
            self.running = fresh;
            self.base_seq = self.archive.head_seq();
        }

        let diff = Diff::new(&self.running, &self.candidate);
        let mut report = CommitReport {
            commands: diff.commands(),
            ..Default::default()
        };
        if diff.is_empty() {
            info!("no configuration changes to commit");
            return Ok(report);
        }
        if request.dry_run {
            debug!(commands = report.commands.len(), "dry run, nothing written");
            return Ok(report);
        }

        let entry = self.archive.save(
            &self.candidate,
            &request.via,
            &request.user,
            request.comment.as_deref(),
        )?;
        if let Err(e) = self.write_running(&self.candidate) {
            if let Err(revert) = self.archive.revert(&entry) {
                warn!(seq = entry.seq, error = %revert, "failed to withdraw revision");
            }
            return Err(e);
        }
        self.base_seq = Some(entry.seq);
        self.running = self.candidate.deep_copy();
        info!(
            seq = entry.seq,
            commands = report.commands.len(),
            via = %request.via,
            "configuration committed"
        );
        report.revision = Some(entry);

        for owner in self.renderer_order() {
            let Some(renderer) = self.renderers.iter().find(|r| r.owner() == owner) else {
                continue;
            };
            renderer
                .apply(&self.running, &diff)
                .map_err(|source| SessionError::Renderer {
                    owner: owner.clone(),
                    source,
                })?;
            report.notified.push(owner);
        }
        Ok(report)
    }

    /// Renderer owners sorted by reference priority, unknown owners last
    fn renderer_order(&self) -> Vec<String> {
        let owners: Vec<&str> = self.renderers.iter().map(|r| r.owner()).collect();
        let mut ordered: Vec<String> = Vec::new();
        if let Some(reference) = &self.reference {
            for entry in reference.priority_sort(&owners) {
                if !ordered.contains(&entry.owner) {
                    ordered.push(entry.owner);
                }
            }
        }
        for owner in owners {
            if !ordered.iter().any(|o| o == owner) {
                ordered.push(owner.to_string());
            }
        }
        ordered
    }

    /// Replace the candidate with a configuration file, migrating it first
    ///
    /// The file itself is never modified; migration runs on a private copy.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(io_err(path))?;
        let text = self.migrate_text(path, text)?;
        let mut tree = parse(&strip_footer(&text))?;
        tree.set_reference(self.reference.clone());
        self.candidate = tree;
        info!(file = %path.display(), "loaded configuration into candidate");
        Ok(())
    }

    fn migrate_text(&self, path: &Path, text: String) -> Result<String> {
        if self.version.components.is_empty() {
            return Ok(text);
        }
        let scratch = tempfile::TempDir::new().map_err(io_err(path))?;
        let copy = scratch.path().join("config.boot");
        std::fs::write(&copy, &text).map_err(io_err(&copy))?;

        let mut migrator = ConfigMigrate::new(&copy, self.version.clone(), &self.registry);
        if let Some(reference) = &self.reference {
            migrator = migrator.reference(Arc::clone(reference));
        }
        let outcome = migrator.run()?;
        debug!(?outcome, "migrated loaded configuration");
        std::fs::read_to_string(&copy).map_err(io_err(&copy))
    }

    /// Merge a configuration file into the candidate
    pub fn merge(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(io_err(path))?;
        let other = parse(&strip_footer(&text))?;
        self.candidate = union(&self.candidate, &other);
        info!(file = %path.display(), "merged configuration into candidate");
        Ok(())
    }

    /// Load revision `index` into the candidate and commit it
    ///
    /// `index` counts from the newest revision at the time of the call,
    /// including revisions committed by other sessions.
    pub fn rollback(&mut self, index: usize, request: &CommitRequest) -> Result<CommitReport> {
        self.locked(|session| {
            if let Some(fresh) = session.newer_running()? {
                session.running = fresh;
                session.base_seq = session.archive.head_seq();
            }
            let text = session.archive.show_commit_file(index)?;
            let mut tree = parse(&text)?;
            tree.set_reference(session.reference.clone());
            session.candidate = tree;
            info!(revision = index, "rolling back");
            session.commit_locked(request)
        })
    }

    /// Write the running configuration, with trailer, to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.render_with_version(&self.running))
    }
}

/// Parse the running file, if any, keeping its version trailer
fn read_running(path: &Path, reference: Option<Arc<Reference>>) -> Result<(Tree, Option<VersionInfo>)> {
    let (mut tree, version) = if path.exists() {
        let text = std::fs::read_to_string(path).map_err(io_err(path))?;
        (parse(&strip_footer(&text))?, VersionInfo::from_config_text(&text)?)
    } else {
        debug!(path = %path.display(), "no running configuration, starting empty");
        (Tree::new(), None)
    };
    tree.set_reference(reference);
    Ok((tree, version))
}

/// Read the running file and store it as revision 0 of an empty archive
fn open_running(
    settings: &Settings,
    reference: Option<Arc<Reference>>,
    archive: &mut Archive,
) -> Result<(Tree, Option<VersionInfo>)> {
    archive.reload()?;
    let opened = read_running(&settings.paths.running_config, reference)?;
    if archive.is_empty() {
        let request = CommitRequest::new("init");
        archive.save(&opened.0, &request.via, &request.user, None)?;
    }
    Ok(opened)
}

/// Replay the changes from `base` to `candidate` on top of `fresh`
///
/// A change conflicts when `fresh` changed the same node, or removed one of
/// its parents, relative to `base`.
fn rebase(base: &Tree, candidate: &Tree, fresh: &Tree) -> Result<Tree> {
    let ours = Diff::new(base, candidate).commands();
    let theirs = Diff::new(base, fresh);
    let conflict = |path: &[String]| SessionError::Conflict { path: path.join(" ") };

    for cmd in &ours {
        let path = &cmd.path[..];
        if theirs.is_node_changed(path) {
            return Err(conflict(path));
        }
        for depth in 1..path.len() {
            let parent = &path[..depth];
            if base.exists(parent) && !fresh.exists(parent) {
                return Err(conflict(parent));
            }
        }
    }

    let mut rebased = fresh.deep_copy();
    for cmd in &ours {
        rebased.apply_command(cmd).map_err(|e| {
            debug!(command = %cmd, error = %e, "replaying candidate change failed");
            conflict(&cmd.path[..])
        })?;
    }
    info!(commands = ours.len(), "rebased candidate onto newer running configuration");
    Ok(rebased)
}

/// Write `data` to `target` through a temporary file in the same directory
fn write_atomic(target: &Path, data: &str) -> Result<()> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io_err(dir))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err(dir))?;
    tmp.write_all(data.as_bytes()).map_err(io_err(target))?;
    tmp.as_file().sync_all().map_err(io_err(target))?;
    tmp.persist(target).map_err(|e| SessionError::Io {
        path: target.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}
