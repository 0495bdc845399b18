//! The synchronizer: runs sync passes over the link table.
//!
//! A pass groups link entries by repository. Every group runs on its own
//! worker thread; inside a group notebooks run on up to `max_parallel`
//! threads when the backend declares concurrent access, otherwise one at a
//! time. Backends block the thread that polls them, so a slow repository
//! only holds up its own group. For one notebook the order is always rename,
//! then comparison, then action.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ScopedJoinHandle};

use chrono::Utc;
use futures_lite::future::block_on;

use super::action::{SyncAction, classify};
use super::conflict::{ConflictInfo, ConflictResolution};
use super::scratch::ScratchFile;
use super::{
    CancelHandle, NotebookResult, SyncOptions, SyncOutcome, SyncProgress, SyncStage, SyncSummary,
};
use crate::address::RepositoryAddress;
use crate::config::Config;
use crate::error::{NotesyncError, Result};
use crate::links::{LinkEntry, LinkTable};
use crate::naming::{
    DEFAULT_EXTENSION, display_name_for, filename_for, names_collide, normalize, validate_name,
};
use crate::repo::{Repository, RepositoryRegistry};
use crate::revision::VersionedRevision;
use crate::store::{LocalContent, NotebookId, NotebookStore};

/// Progress callback.
pub type ProgressFn<'a> = &'a (dyn Fn(SyncProgress) + Send + Sync);

/// Remote listing keyed by filename.
type Listing = HashMap<String, VersionedRevision>;

fn listing_of(books: Vec<VersionedRevision>) -> Listing {
    books
        .into_iter()
        .map(|b| (b.filename().to_string(), b))
        .collect()
}

/// Copy of a group-level error for every notebook of the group.
fn group_error(e: &NotesyncError) -> NotesyncError {
    match e {
        NotesyncError::RepositoryUnavailable(s) => NotesyncError::RepositoryUnavailable(s.clone()),
        NotesyncError::MalformedAddress(s) => NotesyncError::MalformedAddress(s.clone()),
        NotesyncError::NotFound(s) => NotesyncError::NotFound(s.clone()),
        NotesyncError::Transport(s) => NotesyncError::Transport(s.clone()),
        NotesyncError::Cancelled => NotesyncError::Cancelled,
        other => NotesyncError::Transport(other.to_string()),
    }
}

/// Whether the notebook was renamed locally since its remote copy was
/// stored. `booky`, `booky.org` and `booky.org.txt` all name the same book.
fn renamed_since_link(entry: &LinkEntry, name: &str) -> bool {
    display_name_for(&entry.linked_filename) != display_name_for(name.trim())
}

/// Results of a finished worker thread.
fn join_worker(handle: ScopedJoinHandle<'_, Vec<NotebookResult>>) -> Vec<NotebookResult> {
    handle.join().unwrap_or_else(|_| {
        log::error!("[Sync] A sync worker panicked; its results are lost");
        Vec::new()
    })
}

struct PassContext<'a> {
    total: usize,
    done: AtomicUsize,
    progress: Option<ProgressFn<'a>>,
}

impl<'a> PassContext<'a> {
    fn new(total: usize, progress: Option<ProgressFn<'a>>) -> Self {
        Self {
            total,
            done: AtomicUsize::new(0),
            progress,
        }
    }

    fn report(&self, stage: SyncStage, message: Option<String>) {
        if let Some(progress) = self.progress {
            let current = self.done.load(Ordering::SeqCst);
            progress(SyncProgress::new(stage, current, self.total, message));
        }
    }

    fn advance(&self, name: &str) {
        let current = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(progress) = self.progress {
            progress(SyncProgress::new(
                SyncStage::Reconciling,
                current,
                self.total,
                Some(name.to_string()),
            ));
        }
    }
}

/// Keeps local notebooks and their linked repositories in sync.
pub struct Synchronizer<S: NotebookStore> {
    store: S,
    links: LinkTable,
    registry: RepositoryRegistry,
    options: SyncOptions,
    default_extension: String,
    scratch_dir: PathBuf,
    cancel: CancelHandle,
}

impl<S: NotebookStore> Synchronizer<S> {
    /// Create a synchronizer with default options.
    ///
    /// `scratch_dir` is a real directory used to hand content to backends.
    pub fn new(
        store: S,
        links: LinkTable,
        registry: RepositoryRegistry,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            links,
            registry,
            options: SyncOptions::default(),
            default_extension: DEFAULT_EXTENSION.to_string(),
            scratch_dir: scratch_dir.into(),
            cancel: CancelHandle::new(),
        }
    }

    /// Create a synchronizer wired up from a config.
    pub fn from_config(store: S, links: LinkTable, config: &Config) -> Self {
        Self::new(
            store,
            links,
            RepositoryRegistry::from_config(config),
            config.scratch_dir(),
        )
        .with_options(config.sync.clone())
        .with_default_extension(&config.default_extension)
    }

    /// Replace the options.
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Extension for notebook names that carry none.
    pub fn with_default_extension(mut self, extension: &str) -> Self {
        self.default_extension = extension.to_string();
        self
    }

    /// The local notebook store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The link table.
    pub fn links(&self) -> &LinkTable {
        &self.links
    }

    /// The repository registry.
    pub fn registry(&self) -> &RepositoryRegistry {
        &self.registry
    }

    /// Current options.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Handle that cancels the running pass.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Remote filename for a notebook name.
    pub fn remote_filename(&self, name: &str) -> String {
        filename_for(name, &self.default_extension)
    }

    fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    fn repository(&self, address: &RepositoryAddress) -> Result<Arc<dyn Repository>> {
        let repo = self
            .registry
            .resolve_address(address)
            .ok_or_else(|| NotesyncError::MalformedAddress(address.to_string()))?;
        repo.ensure_available()?;
        Ok(repo)
    }

    fn notebook_name(&self, entry: &LinkEntry) -> String {
        match self.store.get(&entry.notebook_id) {
            Ok(Some(identity)) => identity.name,
            _ => display_name_for(&entry.linked_filename),
        }
    }

    // ------------------------------------------------------------------
    // Link management
    // ------------------------------------------------------------------

    /// Link a notebook to the repository at `address`.
    ///
    /// Replaces any existing link of the notebook. Fails with
    /// `MalformedAddress` when no backend accepts the address and with
    /// `NameCollision` when another notebook in that repository uses the
    /// same filename.
    pub fn link(&self, notebook_id: &NotebookId, address: &str) -> Result<LinkEntry> {
        let identity = self
            .store
            .get(notebook_id)?
            .ok_or_else(|| NotesyncError::NotebookNotFound(notebook_id.to_string()))?;
        let address = RepositoryAddress::parse(address)?;
        if self.registry.resolve_address(&address).is_none() {
            return Err(NotesyncError::MalformedAddress(address.to_string()));
        }
        let filename = self.remote_filename(&identity.name);
        self.links.link(notebook_id, &address, &filename)
    }

    /// Remove a notebook's link. Returns whether one existed.
    pub fn unlink(&self, notebook_id: &NotebookId) -> Result<bool> {
        Ok(self.links.unlink(notebook_id)?.is_some())
    }

    /// Rename a notebook locally; its remote copy follows on the next sync.
    pub fn rename_notebook(&self, notebook_id: &NotebookId, new_name: &str) -> Result<()> {
        validate_name(new_name)?;
        if let Some(entry) = self.links.get(notebook_id) {
            let filename = self.remote_filename(new_name.trim());
            if self
                .links
                .filename_taken(&entry.repository, &filename, Some(notebook_id))
            {
                return Err(NotesyncError::NameCollision(
                    entry.repository.join(&filename).to_string(),
                ));
            }
        }
        self.store.rename_local(notebook_id, new_name)
    }

    fn auto_link(&self) {
        let configured = self.registry.configured();
        let [address] = configured.as_slice() else {
            log::debug!(
                "[Sync] Auto-link needs exactly one repository, {} configured",
                configured.len()
            );
            return;
        };

        let notebooks = match self.store.list_local_notebooks() {
            Ok(notebooks) => notebooks,
            Err(e) => {
                log::warn!("[Sync] Auto-link could not list notebooks: {}", e);
                return;
            }
        };

        for notebook in notebooks {
            if self.links.get(&notebook.id).is_some() || ConflictInfo::is_conflict_copy(&notebook.name)
            {
                continue;
            }
            let filename = self.remote_filename(&notebook.name);
            if let Err(e) = self.links.link(&notebook.id, address, &filename) {
                log::warn!("[Sync] Auto-link of '{}' skipped: {}", notebook.name, e);
            }
        }
    }

    // ------------------------------------------------------------------
    // Sync passes
    // ------------------------------------------------------------------

    /// Sync every linked notebook.
    ///
    /// Blocks until every repository group has finished.
    pub fn sync_all(&self) -> SyncSummary {
        self.sync_all_with_progress(None)
    }

    /// Sync every linked notebook, reporting progress per notebook.
    ///
    /// `progress` is called from the worker threads.
    pub fn sync_all_with_progress(&self, progress: Option<ProgressFn<'_>>) -> SyncSummary {
        let started_at = Utc::now();
        self.cancel.reset();

        if self.options.auto_link {
            if let Some(progress) = progress {
                progress(SyncProgress::new(SyncStage::Linking, 0, 0, None));
            }
            self.auto_link();
        }

        let mut groups: BTreeMap<RepositoryAddress, Vec<LinkEntry>> = BTreeMap::new();
        for entry in self.links.entries() {
            groups.entry(entry.repository.clone()).or_default().push(entry);
        }
        if self.options.import_remote {
            for address in self.registry.configured() {
                groups.entry(address).or_default();
            }
        }

        let total = groups.values().map(Vec::len).sum();
        let ctx = PassContext::new(total, progress);
        ctx.report(SyncStage::ListingRemote, None);
        log::info!(
            "[Sync] Starting pass: {} notebooks in {} repositories",
            total,
            groups.len()
        );

        let ctx = &ctx;
        let mut results: Vec<NotebookResult> = thread::scope(|scope| {
            let workers: Vec<_> = groups
                .into_iter()
                .map(|(address, entries)| {
                    scope.spawn(move || self.sync_group(address, entries, ctx))
                })
                .collect();
            workers.into_iter().flat_map(join_worker).collect()
        });
        results.sort_by(|a, b| a.name.cmp(&b.name));

        let summary = SyncSummary {
            results,
            started_at,
            finished_at: Utc::now(),
        };
        ctx.report(SyncStage::Complete, None);
        log::info!(
            "[Sync] Pass finished: {} unchanged, {} pushed, {} pulled, {} created, {} deleted, {} conflicts, {} failed",
            summary.unchanged(),
            summary.pushed(),
            summary.pulled(),
            summary.created(),
            summary.deleted(),
            summary.conflicted(),
            summary.failed()
        );
        summary
    }

    fn sync_group(
        &self,
        address: RepositoryAddress,
        entries: Vec<LinkEntry>,
        ctx: &PassContext<'_>,
    ) -> Vec<NotebookResult> {
        let repo = match self.repository(&address) {
            Ok(repo) => repo,
            Err(e) => return self.fail_group(&address, entries, e, ctx),
        };

        let listing = if entries.is_empty() {
            Listing::new()
        } else {
            match block_on(repo.list_books()) {
                Ok(books) => listing_of(books),
                Err(e) => return self.fail_group(&address, entries, e, ctx),
            }
        };

        let limit = if repo.capabilities().concurrent_access {
            self.options.max_parallel.max(1)
        } else {
            1
        };
        let filenames: HashMap<NotebookId, String> = entries
            .iter()
            .map(|e| (e.notebook_id.clone(), normalize(&e.linked_filename)))
            .collect();

        let repo_ref: &dyn Repository = repo.as_ref();
        let mut results = self.run_units(repo_ref, &listing, entries, limit, ctx);

        if self.options.import_remote && !self.cancel.is_cancelled() {
            ctx.report(SyncStage::Importing, Some(address.to_string()));
            // Books unlinked by a local deletion in this pass stay remote-only
            let skip: HashSet<String> = results
                .iter()
                .filter(|r| matches!(r.outcome, SyncOutcome::Unlinked))
                .filter_map(|r| r.notebook_id.as_ref())
                .filter_map(|id| filenames.get(id).cloned())
                .collect();
            results.extend(block_on(self.import_remote_books(repo_ref, &skip)));
        }
        results
    }

    /// Reconcile `entries` on at most `limit` threads.
    fn run_units(
        &self,
        repo: &dyn Repository,
        listing: &Listing,
        entries: Vec<LinkEntry>,
        limit: usize,
        ctx: &PassContext<'_>,
    ) -> Vec<NotebookResult> {
        let workers = limit.min(entries.len());
        if workers <= 1 {
            return entries
                .into_iter()
                .map(|entry| block_on(self.sync_unit(repo, listing, entry, ctx)))
                .collect();
        }

        let next = AtomicUsize::new(0);
        let (entries, next) = (&entries, &next);
        thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(move || {
                        let mut done = Vec::new();
                        while let Some(entry) = entries.get(next.fetch_add(1, Ordering::SeqCst)) {
                            done.push(block_on(self.sync_unit(
                                repo,
                                listing,
                                entry.clone(),
                                ctx,
                            )));
                        }
                        done
                    })
                })
                .collect();
            handles.into_iter().flat_map(join_worker).collect()
        })
    }

    fn fail_group(
        &self,
        address: &RepositoryAddress,
        entries: Vec<LinkEntry>,
        error: NotesyncError,
        ctx: &PassContext<'_>,
    ) -> Vec<NotebookResult> {
        log::warn!("[Sync] Skipping {}: {}", address, error);
        entries
            .into_iter()
            .map(|entry| {
                let name = self.notebook_name(&entry);
                ctx.advance(&name);
                NotebookResult {
                    notebook_id: Some(entry.notebook_id),
                    name,
                    repository: Some(address.clone()),
                    outcome: SyncOutcome::Failed(group_error(&error)),
                }
            })
            .collect()
    }

    async fn sync_unit(
        &self,
        repo: &dyn Repository,
        listing: &Listing,
        entry: LinkEntry,
        ctx: &PassContext<'_>,
    ) -> NotebookResult {
        let name = self.notebook_name(&entry);
        let outcome = if self.cancel.is_cancelled() {
            SyncOutcome::Failed(NotesyncError::Cancelled)
        } else {
            match self.reconcile(repo, listing, entry.clone()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::warn!("[Sync] '{}' failed: {}", name, e);
                    SyncOutcome::Failed(e)
                }
            }
        };
        log::debug!("[Sync] '{}': {}", name, outcome.label());
        ctx.advance(&name);
        NotebookResult {
            notebook_id: Some(entry.notebook_id),
            name,
            repository: Some(entry.repository),
            outcome,
        }
    }

    /// Sync one linked notebook.
    pub async fn sync_one(&self, notebook_id: &NotebookId) -> SyncOutcome {
        match self.sync_one_inner(notebook_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("[Sync] {} failed: {}", notebook_id, e);
                SyncOutcome::Failed(e)
            }
        }
    }

    async fn sync_one_inner(&self, notebook_id: &NotebookId) -> Result<SyncOutcome> {
        let entry = self
            .links
            .get(notebook_id)
            .ok_or_else(|| NotesyncError::NotLinked(notebook_id.to_string()))?;
        let repo = self.repository(&entry.repository)?;
        let listing = listing_of(repo.list_books().await?);
        self.reconcile(repo.as_ref(), &listing, entry).await
    }

    async fn reconcile(
        &self,
        repo: &dyn Repository,
        listing: &Listing,
        mut entry: LinkEntry,
    ) -> Result<SyncOutcome> {
        let identity = self.store.get(&entry.notebook_id)?;
        let local = match identity {
            Some(_) => self.store.read_local(&entry.notebook_id)?,
            None => None,
        };
        let mut remote = listing.get(&entry.linked_filename).cloned();

        if let (Some(identity), Some(_)) = (&identity, &local)
            && renamed_since_link(&entry, &identity.name)
        {
            let wanted = self.remote_filename(&identity.name);
            remote = self.follow_rename(repo, &mut entry, &wanted).await?;
        }

        let action = classify(local.as_ref(), remote.as_ref(), &entry, &self.options);
        let name = identity
            .map(|i| i.name)
            .unwrap_or_else(|| display_name_for(&entry.linked_filename));
        log::debug!("[Sync] '{}' -> {:?}", name, action);

        match action {
            SyncAction::Unchanged => Ok(SyncOutcome::Unchanged),
            SyncAction::PushCreate | SyncAction::PushUpdate => {
                let Some(local) = local else {
                    return Err(NotesyncError::NotebookNotFound(name));
                };
                let revision = self.push(repo, &local, &entry.linked_filename).await?;
                self.record(entry, revision, local.modified_at)?;
                Ok(if action == SyncAction::PushCreate {
                    SyncOutcome::CreatedRemote
                } else {
                    SyncOutcome::Pushed
                })
            }
            SyncAction::Pull => {
                let Some(remote) = remote else {
                    return Ok(SyncOutcome::MissingRemote);
                };
                match self.pull(repo, &entry.notebook_id, &remote).await {
                    Ok((revision, marker)) => {
                        self.record(entry, revision, marker)?;
                        Ok(SyncOutcome::Pulled)
                    }
                    Err(NotesyncError::NotFound(_)) => Ok(SyncOutcome::MissingRemote),
                    Err(e) => Err(e),
                }
            }
            SyncAction::Conflict => {
                self.conflict(repo, &entry, &name, local.as_ref(), remote)
                    .await
            }
            SyncAction::RemoteDeleted => {
                log::warn!(
                    "[Sync] {} is gone remotely; keeping '{}'",
                    repo.address_for_filename(&entry.linked_filename),
                    name
                );
                Ok(SyncOutcome::MissingRemote)
            }
            SyncAction::LocalDeleted { delete_remote } => {
                if delete_remote && let Some(remote) = &remote {
                    repo.delete(remote.location()).await?;
                    log::info!("[Sync] Deleted {}", remote.location());
                }
                self.links.unlink(&entry.notebook_id)?;
                Ok(if delete_remote {
                    SyncOutcome::DeletedRemote
                } else {
                    SyncOutcome::Unlinked
                })
            }
        }
    }

    /// Move the remote copy to `wanted` and rewrite the entry.
    ///
    /// Returns the remote revision under the new name, if there is one.
    async fn follow_rename(
        &self,
        repo: &dyn Repository,
        entry: &mut LinkEntry,
        wanted: &str,
    ) -> Result<Option<VersionedRevision>> {
        let target = entry.repository.join(wanted);
        if self
            .links
            .filename_taken(&entry.repository, wanted, Some(&entry.notebook_id))
        {
            return Err(NotesyncError::NameCollision(target.to_string()));
        }

        let books = repo.list_books().await?;
        if books
            .iter()
            .any(|b| b.filename() != entry.linked_filename && names_collide(b.filename(), wanted))
        {
            return Err(NotesyncError::NameCollision(target.to_string()));
        }

        let old = books
            .into_iter()
            .find(|b| b.filename() == entry.linked_filename);
        let renamed = match &old {
            Some(old) => Some(repo.rename(old.location(), wanted).await?),
            None => None,
        };

        entry.last_synced = match (entry.last_synced.take(), &old, &renamed) {
            (Some(synced), Some(old), Some(renamed)) if synced.revision() == old.revision() => {
                Some(renamed.clone())
            }
            (Some(synced), _, _) => Some(VersionedRevision::new(
                target.clone(),
                synced.revision(),
                synced.modified_at(),
            )),
            (None, _, _) => None,
        };
        log::info!(
            "[Sync] Renamed {} -> {}",
            entry.repository.join(&entry.linked_filename),
            target
        );
        entry.linked_filename = wanted.to_string();
        entry.synced_at = Some(Utc::now());
        self.links.update(entry.clone())?;
        Ok(renamed)
    }

    async fn push(
        &self,
        repo: &dyn Repository,
        local: &LocalContent,
        filename: &str,
    ) -> Result<VersionedRevision> {
        let scratch = ScratchFile::with_content(self.scratch_dir(), &local.bytes)?;
        repo.store(scratch.path(), filename).await
    }

    /// Fetch `remote` and write it into the notebook. Returns the fetched
    /// revision and the new local modification marker.
    async fn pull(
        &self,
        repo: &dyn Repository,
        notebook_id: &NotebookId,
        remote: &VersionedRevision,
    ) -> Result<(VersionedRevision, i64)> {
        let scratch = ScratchFile::new(self.scratch_dir())?;
        let revision = repo.fetch(remote.location(), scratch.path()).await?;
        let bytes = scratch.read()?;
        let marker = self.store.write_local(notebook_id, &bytes)?;
        Ok((revision, marker))
    }

    fn record(&self, mut entry: LinkEntry, revision: VersionedRevision, marker: i64) -> Result<()> {
        entry.mark_synced(revision, marker);
        self.links.update(entry)
    }

    async fn conflict(
        &self,
        repo: &dyn Repository,
        entry: &LinkEntry,
        name: &str,
        local: Option<&LocalContent>,
        remote: Option<VersionedRevision>,
    ) -> Result<SyncOutcome> {
        let Some(remote) = remote else {
            return Ok(SyncOutcome::MissingRemote);
        };
        let mut info = ConflictInfo {
            notebook_id: entry.notebook_id.clone(),
            name: name.to_string(),
            location: remote.location().to_string(),
            local_modified_at: local.map(|l| l.modified_at),
            remote_revision: remote.revision().to_string(),
            remote_modified_at: Some(remote.modified_at()),
            conflict_copy: None,
        };

        if self.options.conflict_copies {
            let scratch = ScratchFile::new(self.scratch_dir())?;
            match repo.fetch(remote.location(), scratch.path()).await {
                Ok(_) => {}
                Err(NotesyncError::NotFound(_)) => return Ok(SyncOutcome::MissingRemote),
                Err(e) => return Err(e),
            }
            let copy_name = ConflictInfo::conflict_name(name);
            self.save_conflict_copy(&copy_name, &scratch.read()?)?;
            info.conflict_copy = Some(copy_name);
        }

        log::warn!("[Sync] Conflict on {}", info.location);
        Ok(SyncOutcome::Conflict(info))
    }

    fn save_conflict_copy(&self, copy_name: &str, bytes: &[u8]) -> Result<()> {
        match self.store.find_by_name(copy_name)? {
            Some(existing) => {
                self.store.write_local(&existing.id, bytes)?;
            }
            None => {
                self.store.create_local(copy_name, bytes)?;
            }
        }
        Ok(())
    }

    async fn import_remote_books(
        &self,
        repo: &dyn Repository,
        skip: &HashSet<String>,
    ) -> Vec<NotebookResult> {
        let books = match repo.list_books().await {
            Ok(books) => books,
            Err(e) => {
                log::warn!("[Sync] Import from {} skipped: {}", repo.address(), e);
                return Vec::new();
            }
        };
        let linked = self.links.entries_for(repo.address());

        let mut results = Vec::new();
        for book in books {
            if skip.contains(&normalize(book.filename()))
                || linked
                    .iter()
                    .any(|e| names_collide(&e.linked_filename, book.filename()))
            {
                continue;
            }
            if self.cancel.is_cancelled() {
                break;
            }

            let name = display_name_for(book.filename());
            match self.store.find_by_name(&name) {
                Ok(Some(_)) => {
                    log::debug!(
                        "[Sync] Not importing {}: local notebook '{}' exists",
                        book.location(),
                        name
                    );
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    results.push(NotebookResult {
                        notebook_id: None,
                        name,
                        repository: Some(repo.address().clone()),
                        outcome: SyncOutcome::Failed(e),
                    });
                    continue;
                }
            }

            let (notebook_id, outcome) = match self.import_book(repo, &book, &name).await {
                Ok(id) => (Some(id), SyncOutcome::CreatedLocal),
                Err(e) => {
                    log::warn!("[Sync] Import of {} failed: {}", book.location(), e);
                    (None, SyncOutcome::Failed(e))
                }
            };
            results.push(NotebookResult {
                notebook_id,
                name,
                repository: Some(repo.address().clone()),
                outcome,
            });
        }
        results
    }

    async fn import_book(
        &self,
        repo: &dyn Repository,
        book: &VersionedRevision,
        name: &str,
    ) -> Result<NotebookId> {
        let scratch = ScratchFile::new(self.scratch_dir())?;
        let revision = repo.fetch(book.location(), scratch.path()).await?;
        let identity = self.store.create_local(name, &scratch.read()?)?;
        let marker = self
            .store
            .read_local(&identity.id)?
            .map(|l| l.modified_at)
            .unwrap_or_default();

        let entry = self
            .links
            .link(&identity.id, repo.address(), book.filename())?;
        self.record(entry, revision, marker)?;
        log::info!("[Sync] Imported {} as '{}'", book.location(), name);
        Ok(identity.id)
    }

    // ------------------------------------------------------------------
    // Explicit resolution
    // ------------------------------------------------------------------

    /// Resolve a conflict reported for a notebook.
    pub async fn resolve_conflict(
        &self,
        notebook_id: &NotebookId,
        resolution: ConflictResolution,
    ) -> Result<SyncOutcome> {
        let entry = self
            .links
            .get(notebook_id)
            .ok_or_else(|| NotesyncError::NotLinked(notebook_id.to_string()))?;

        match resolution {
            ConflictResolution::Skip => Ok(SyncOutcome::Unchanged),
            ConflictResolution::KeepLocal => {
                let local = self
                    .store
                    .read_local(notebook_id)?
                    .ok_or_else(|| NotesyncError::NotebookNotFound(notebook_id.to_string()))?;
                let repo = self.repository(&entry.repository)?;
                let revision = self
                    .push(repo.as_ref(), &local, &entry.linked_filename)
                    .await?;
                self.record(entry, revision, local.modified_at)?;
                Ok(SyncOutcome::Pushed)
            }
            ConflictResolution::KeepRemote => {
                let repo = self.repository(&entry.repository)?;
                let remote = repo
                    .list_books()
                    .await?
                    .into_iter()
                    .find(|b| b.filename() == entry.linked_filename)
                    .ok_or_else(|| {
                        NotesyncError::NotFound(
                            entry.repository.join(&entry.linked_filename).to_string(),
                        )
                    })?;
                let (revision, marker) = self.pull(repo.as_ref(), notebook_id, &remote).await?;
                self.record(entry, revision, marker)?;
                Ok(SyncOutcome::Pulled)
            }
        }
    }

    /// Store a renamed notebook under its new filename even though that
    /// filename already exists remotely.
    ///
    /// The old remote copy is removed afterwards.
    pub async fn confirm_overwrite(&self, notebook_id: &NotebookId) -> Result<SyncOutcome> {
        let entry = self
            .links
            .get(notebook_id)
            .ok_or_else(|| NotesyncError::NotLinked(notebook_id.to_string()))?;
        let identity = self
            .store
            .get(notebook_id)?
            .ok_or_else(|| NotesyncError::NotebookNotFound(notebook_id.to_string()))?;
        if !renamed_since_link(&entry, &identity.name) {
            return Ok(SyncOutcome::Unchanged);
        }

        let wanted = self.remote_filename(&identity.name);
        if self
            .links
            .filename_taken(&entry.repository, &wanted, Some(notebook_id))
        {
            return Err(NotesyncError::NameCollision(
                entry.repository.join(&wanted).to_string(),
            ));
        }

        let local = self
            .store
            .read_local(notebook_id)?
            .ok_or_else(|| NotesyncError::NotebookNotFound(notebook_id.to_string()))?;
        let repo = self.repository(&entry.repository)?;
        let revision = self.push(repo.as_ref(), &local, &wanted).await?;

        let old = repo.address_for_filename(&entry.linked_filename);
        let old_name = entry.linked_filename.clone();
        self.record(entry, revision, local.modified_at)?;

        if !names_collide(&old_name, &wanted)
            && let Err(e) = repo.delete(&old).await
        {
            log::warn!("[Sync] Could not remove {} after overwrite: {}", old, e);
        }
        log::info!("[Sync] Overwrote {} with '{}'", repo.address_for_filename(&wanted), identity.name);
        Ok(SyncOutcome::Pushed)
    }

    // ------------------------------------------------------------------
    // Blocking wrappers
    // ------------------------------------------------------------------

    /// Blocking [`Synchronizer::sync_one`].
    pub fn sync_one_blocking(&self, notebook_id: &NotebookId) -> SyncOutcome {
        block_on(self.sync_one(notebook_id))
    }

    /// Blocking [`Synchronizer::resolve_conflict`].
    pub fn resolve_conflict_blocking(
        &self,
        notebook_id: &NotebookId,
        resolution: ConflictResolution,
    ) -> Result<SyncOutcome> {
        block_on(self.resolve_conflict(notebook_id, resolution))
    }

    /// Blocking [`Synchronizer::confirm_overwrite`].
    pub fn confirm_overwrite_blocking(&self, notebook_id: &NotebookId) -> Result<SyncOutcome> {
        block_on(self.confirm_overwrite(notebook_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFileSystem;
    use crate::repo::MemoryRepository;
    use crate::store::FsNotebookStore;

    struct Fixture {
        sync: Synchronizer<FsNotebookStore<InMemoryFileSystem>>,
        repo: Arc<MemoryRepository>,
        _scratch: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let fs = InMemoryFileSystem::new();
        let store =
            FsNotebookStore::open(fs, "/org", "/org/.notesync/notebooks.json", "org").unwrap();
        let registry = RepositoryRegistry::default();
        let repo = Arc::new(MemoryRepository::new("mock:/repo").unwrap());
        registry.insert(repo.clone());
        let scratch = tempfile::tempdir().unwrap();
        let sync = Synchronizer::new(store, LinkTable::in_memory(), registry, scratch.path());
        Fixture {
            sync,
            repo,
            _scratch: scratch,
        }
    }

    #[test]
    fn test_push_create_then_unchanged() {
        let f = fixture();
        let nb = f.sync.store().create_local("booky", b"* A").unwrap();
        f.sync.link(&nb.id, "mock:/repo").unwrap();

        assert!(matches!(
            f.sync.sync_one_blocking(&nb.id),
            SyncOutcome::CreatedRemote
        ));
        assert_eq!(f.repo.book_content("booky.org").as_deref(), Some("* A"));
        assert!(matches!(f.sync.sync_one_blocking(&nb.id), SyncOutcome::Unchanged));
    }

    #[test]
    fn test_link_rejects_unresolvable_address() {
        let f = fixture();
        let nb = f.sync.store().create_local("booky", b"").unwrap();
        assert!(matches!(
            f.sync.link(&nb.id, "mock://authority"),
            Err(NotesyncError::MalformedAddress(_))
        ));
        assert!(matches!(
            f.sync.link(&NotebookId::from("missing"), "mock:/repo"),
            Err(NotesyncError::NotebookNotFound(_))
        ));
    }

    #[test]
    fn test_rename_notebook_rejects_paths() {
        let f = fixture();
        let nb = f.sync.store().create_local("booky", b"* A").unwrap();
        f.sync.link(&nb.id, "mock:/repo").unwrap();

        assert!(matches!(
            f.sync.rename_notebook(&nb.id, "../escape"),
            Err(NotesyncError::InvalidName(_))
        ));
        assert_eq!(f.sync.store().get(&nb.id).unwrap().unwrap().name, "booky");
    }

    #[test]
    fn test_sync_one_unlinked() {
        let f = fixture();
        let nb = f.sync.store().create_local("booky", b"").unwrap();
        assert!(matches!(
            f.sync.sync_one_blocking(&nb.id),
            SyncOutcome::Failed(NotesyncError::NotLinked(_))
        ));
    }

    #[test]
    fn test_cancelled_pass_starts_nothing() {
        let f = fixture();
        let nb = f.sync.store().create_local("booky", b"* A").unwrap();
        f.sync.link(&nb.id, "mock:/repo").unwrap();

        let handle = f.sync.cancel_handle();
        let cancel_on_listing = move |p: SyncProgress| {
            if p.stage == SyncStage::ListingRemote {
                handle.cancel();
            }
        };
        let summary = f.sync.sync_all_with_progress(Some(&cancel_on_listing));
        assert!(matches!(
            summary.outcome_for(&nb.id),
            Some(SyncOutcome::Failed(NotesyncError::Cancelled))
        ));
        assert!(f.repo.filenames().is_empty());
        assert!(f.sync.links().get(&nb.id).unwrap().last_synced.is_none());
    }

    #[test]
    fn test_progress_is_reported_per_notebook() {
        let f = fixture();
        for name in ["a", "b", "c"] {
            let nb = f.sync.store().create_local(name, b"x").unwrap();
            f.sync.link(&nb.id, "mock:/repo").unwrap();
        }

        let seen = std::sync::Mutex::new(Vec::new());
        let record = |p: SyncProgress| seen.lock().unwrap().push((p.stage, p.current, p.total));
        let summary = f.sync.sync_all_with_progress(Some(&record));
        assert_eq!(summary.created(), 3);

        let seen = seen.into_inner().unwrap();
        // Workers may report out of order, but every count shows up once
        let mut reconciling: Vec<usize> = seen
            .iter()
            .filter(|(stage, _, _)| *stage == SyncStage::Reconciling)
            .map(|(_, current, _)| *current)
            .collect();
        reconciling.sort_unstable();
        assert_eq!(reconciling, vec![1, 2, 3]);
        assert_eq!(seen.last().map(|s| s.0), Some(SyncStage::Complete));
    }
}
