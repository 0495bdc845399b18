//! End-to-end sync passes against in-memory and directory repositories.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use notesync_core::address::{Location, RepositoryAddress};
use notesync_core::error::{NotesyncError, Result};
use notesync_core::fs::InMemoryFileSystem;
use notesync_core::links::LinkTable;
use notesync_core::repo::{
    BoxFuture, MemoryRepository, Repository, RepositoryCapabilities, RepositoryRegistry,
    RepositorySettings,
};
use notesync_core::revision::VersionedRevision;
use notesync_core::store::{FsNotebookStore, NotebookId, NotebookStore};
use notesync_core::sync::{ConflictResolution, SyncOptions, SyncOutcome, Synchronizer};

type DeviceSync = Synchronizer<FsNotebookStore<InMemoryFileSystem>>;

/// One device: its own notebooks, link table and scratch directory.
struct Device {
    sync: DeviceSync,
    _scratch: tempfile::TempDir,
}

impl Device {
    fn new(repos: &[&Arc<MemoryRepository>], configured: &[&str], options: SyncOptions) -> Self {
        let fs = InMemoryFileSystem::new();
        let store =
            FsNotebookStore::open(fs, "/org", "/org/.notesync/notebooks.json", "org").unwrap();

        let mut registry = RepositoryRegistry::default();
        for address in configured {
            registry.add_settings(RepositorySettings::new(*address));
        }
        for repo in repos {
            let repo: Arc<MemoryRepository> = Arc::clone(repo);
            registry.insert(repo);
        }

        let scratch = tempfile::tempdir().unwrap();
        let sync = Synchronizer::new(store, LinkTable::in_memory(), registry, scratch.path())
            .with_options(options);
        Self {
            sync,
            _scratch: scratch,
        }
    }

    fn notebook(&self, name: &str, content: &str, address: &str) -> NotebookId {
        let nb = self.sync.store().create_local(name, content.as_bytes()).unwrap();
        self.sync.link(&nb.id, address).unwrap();
        nb.id
    }

    fn content(&self, id: &NotebookId) -> String {
        let local = self.sync.store().read_local(id).unwrap().unwrap();
        String::from_utf8(local.bytes).unwrap()
    }

    fn edit(&self, id: &NotebookId, content: &str) {
        self.sync.store().write_local(id, content.as_bytes()).unwrap();
    }
}

/// Counts uploads in flight across every repository sharing it.
#[derive(Default)]
struct Gauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn hold(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(150));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Memory repository whose uploads block the calling thread for a while,
/// like a network backend does.
struct SlowRepository {
    inner: MemoryRepository,
    concurrent: bool,
    gauge: Arc<Gauge>,
}

impl SlowRepository {
    fn new(address: &str, concurrent: bool, gauge: &Arc<Gauge>) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryRepository::new(address).unwrap(),
            concurrent,
            gauge: Arc::clone(gauge),
        })
    }
}

impl Repository for SlowRepository {
    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn capabilities(&self) -> RepositoryCapabilities {
        RepositoryCapabilities {
            concurrent_access: self.concurrent,
            ..self.inner.capabilities()
        }
    }

    fn address(&self) -> &RepositoryAddress {
        self.inner.address()
    }

    fn list_books(&self) -> BoxFuture<'_, Result<Vec<VersionedRevision>>> {
        self.inner.list_books()
    }

    fn fetch<'a>(
        &'a self,
        location: &'a Location,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<VersionedRevision>> {
        self.inner.fetch(location, destination)
    }

    fn store<'a>(
        &'a self,
        local_file: &'a Path,
        filename: &'a str,
    ) -> BoxFuture<'a, Result<VersionedRevision>> {
        Box::pin(async move {
            self.gauge.hold();
            self.inner.store(local_file, filename).await
        })
    }

    fn rename<'a>(
        &'a self,
        location: &'a Location,
        new_name: &'a str,
    ) -> BoxFuture<'a, Result<VersionedRevision>> {
        self.inner.rename(location, new_name)
    }

    fn delete<'a>(&'a self, location: &'a Location) -> BoxFuture<'a, Result<()>> {
        self.inner.delete(location)
    }
}

fn mock(address: &str) -> Arc<MemoryRepository> {
    Arc::new(MemoryRepository::new(address).unwrap())
}

fn no_import() -> SyncOptions {
    SyncOptions {
        import_remote: false,
        ..SyncOptions::default()
    }
}

#[test]
fn test_second_pass_changes_nothing() {
    let repo = mock("mock:/repo");
    let device = Device::new(&[&repo], &[], SyncOptions::default());
    device.notebook("booky", "* A", "mock:/repo");
    device.notebook("todo", "* B", "mock:/repo");

    let first = device.sync.sync_all();
    assert_eq!(first.created(), 2);
    assert!(first.is_clean());
    let snapshot: Vec<_> = repo
        .filenames()
        .iter()
        .map(|f| repo.book_content(f))
        .collect();

    let second = device.sync.sync_all();
    assert_eq!(second.unchanged(), 2);
    assert_eq!(second.results.len(), 2);
    let after: Vec<_> = repo
        .filenames()
        .iter()
        .map(|f| repo.book_content(f))
        .collect();
    assert_eq!(snapshot, after);
}

#[test]
fn test_push_then_import_is_byte_identical() {
    let repo = mock("mock:/repo");
    let content = "* Héllo wörld\r\n** TODO ☃\n\n";

    let laptop = Device::new(&[&repo], &[], SyncOptions::default());
    laptop.notebook("booky", content, "mock:/repo");
    laptop.sync.sync_all();
    assert_eq!(repo.book_content("booky.org").as_deref(), Some(content));

    let phone = Device::new(&[&repo], &["mock:/repo"], SyncOptions::default());
    let summary = phone.sync.sync_all();
    assert_eq!(summary.created(), 1);

    let imported = phone.sync.store().find_by_name("booky").unwrap().unwrap();
    assert_eq!(phone.content(&imported.id), content);
    let entry = phone.sync.links().get(&imported.id).unwrap();
    assert_eq!(entry.linked_filename, "booky.org");
    assert!(entry.last_synced.is_some());

    // Imported notebooks are in sync right away
    let again = phone.sync.sync_all();
    assert_eq!(again.unchanged(), 1);
    assert_eq!(again.created(), 0);
}

#[test]
fn test_one_sided_changes_flow_both_ways() {
    let repo = mock("mock:/repo");
    let device = Device::new(&[&repo], &[], no_import());
    let id = device.notebook("booky", "* A", "mock:/repo");
    device.sync.sync_all();

    device.edit(&id, "* A\n** local");
    assert!(matches!(device.sync.sync_one_blocking(&id), SyncOutcome::Pushed));
    assert_eq!(repo.book_content("booky.org").as_deref(), Some("* A\n** local"));

    repo.put_book("booky.org", "* A\n** remote");
    assert!(matches!(device.sync.sync_one_blocking(&id), SyncOutcome::Pulled));
    assert_eq!(device.content(&id), "* A\n** remote");

    assert!(matches!(device.sync.sync_one_blocking(&id), SyncOutcome::Unchanged));
}

#[test]
fn test_local_rename_moves_remote_copy() {
    let repo = mock("mock:/repo");
    let device = Device::new(&[&repo], &[], no_import());
    let id = device.notebook("booky", "* A", "mock:/repo");
    device.sync.sync_all();

    device.sync.rename_notebook(&id, "journal").unwrap();
    let outcome = device.sync.sync_one_blocking(&id);
    assert!(!outcome.is_failure(), "{:?}", outcome);

    assert_eq!(repo.filenames(), vec!["journal.org".to_string()]);
    assert_eq!(repo.book_content("journal.org").as_deref(), Some("* A"));
    assert_eq!(
        device.sync.links().get(&id).unwrap().linked_filename,
        "journal.org"
    );
    assert!(matches!(device.sync.sync_one_blocking(&id), SyncOutcome::Unchanged));
}

#[test]
fn test_rename_onto_linked_name_is_refused() {
    let repo = mock("mock:/repo");
    let device = Device::new(&[&repo], &[], no_import());
    let a = device.notebook("alpha", "* A", "mock:/repo");
    device.notebook("beta", "* B", "mock:/repo");
    device.sync.sync_all();

    let err = device.sync.rename_notebook(&a, "BETA").unwrap_err();
    assert!(matches!(err, NotesyncError::NameCollision(_)));
    assert_eq!(device.sync.store().get(&a).unwrap().unwrap().name, "alpha");
}

#[test]
fn test_rename_onto_existing_remote_waits_for_confirmation() {
    let repo = mock("mock:/repo");
    let device = Device::new(&[&repo], &[], no_import());
    let id = device.notebook("alpha", "* mine", "mock:/repo");
    device.sync.sync_all();
    repo.put_book("gamma.org", "* someone else's");

    device.sync.rename_notebook(&id, "gamma").unwrap();
    assert!(matches!(
        device.sync.sync_one_blocking(&id),
        SyncOutcome::Failed(NotesyncError::NameCollision(_))
    ));
    // Nothing remote was touched
    assert_eq!(repo.book_content("alpha.org").as_deref(), Some("* mine"));
    assert_eq!(repo.book_content("gamma.org").as_deref(), Some("* someone else's"));

    let outcome = device.sync.confirm_overwrite_blocking(&id).unwrap();
    assert!(matches!(outcome, SyncOutcome::Pushed));
    assert_eq!(repo.filenames(), vec!["gamma.org".to_string()]);
    assert_eq!(repo.book_content("gamma.org").as_deref(), Some("* mine"));
    assert!(matches!(device.sync.sync_one_blocking(&id), SyncOutcome::Unchanged));

    // Nothing pending any more
    assert!(matches!(
        device.sync.confirm_overwrite_blocking(&id).unwrap(),
        SyncOutcome::Unchanged
    ));
}

#[test]
fn test_conflict_keeps_local_and_saves_remote_copy() {
    let repo = mock("mock:/repo");
    let device = Device::new(&[&repo], &[], SyncOptions::default());
    let id = device.notebook("booky", "* base", "mock:/repo");
    device.sync.sync_all();

    device.edit(&id, "* local");
    repo.put_book("booky.org", "* remote");

    let summary = device.sync.sync_all();
    assert_eq!(summary.conflicted(), 1);
    let conflict = summary.conflicts()[0].clone();
    assert_eq!(conflict.notebook_id, id);
    assert_eq!(conflict.location, "mock:/repo/booky.org");
    assert_eq!(conflict.conflict_copy.as_deref(), Some("booky.conflict"));

    assert_eq!(device.content(&id), "* local");
    assert_eq!(repo.book_content("booky.org").as_deref(), Some("* remote"));
    let copy = device
        .sync
        .store()
        .find_by_name("booky.conflict")
        .unwrap()
        .unwrap();
    assert_eq!(device.content(&copy.id), "* remote");
    assert!(device.sync.links().get(&copy.id).is_none());

    // Unresolved conflicts come back, reusing the same copy
    repo.put_book("booky.org", "* remote 2");
    assert!(device.sync.sync_one_blocking(&id).is_conflict());
    assert_eq!(device.content(&copy.id), "* remote 2");

    let outcome = device
        .sync
        .resolve_conflict_blocking(&id, ConflictResolution::KeepLocal)
        .unwrap();
    assert!(matches!(outcome, SyncOutcome::Pushed));
    assert_eq!(repo.book_content("booky.org").as_deref(), Some("* local"));
    assert!(matches!(device.sync.sync_one_blocking(&id), SyncOutcome::Unchanged));
}

#[test]
fn test_conflict_resolved_with_remote() {
    let repo = mock("mock:/repo");
    let device = Device::new(&[&repo], &[], no_import());
    let id = device.notebook("booky", "* base", "mock:/repo");
    device.sync.sync_all();

    device.edit(&id, "* local");
    repo.put_book("booky.org", "* remote");
    assert!(device.sync.sync_one_blocking(&id).is_conflict());

    assert!(matches!(
        device
            .sync
            .resolve_conflict_blocking(&id, ConflictResolution::Skip)
            .unwrap(),
        SyncOutcome::Unchanged
    ));
    assert!(device.sync.sync_one_blocking(&id).is_conflict());

    let outcome = device
        .sync
        .resolve_conflict_blocking(&id, ConflictResolution::KeepRemote)
        .unwrap();
    assert!(matches!(outcome, SyncOutcome::Pulled));
    assert_eq!(device.content(&id), "* remote");
    assert!(matches!(device.sync.sync_one_blocking(&id), SyncOutcome::Unchanged));
}

#[test]
fn test_first_link_against_existing_remote_copy() {
    let repo = mock("mock:/repo");
    repo.put_book("filled.org", "* theirs");
    repo.put_book("blank.org", "* theirs too");
    let device = Device::new(&[&repo], &[], no_import());

    let filled = device.notebook("filled", "* mine", "mock:/repo");
    let blank = device.notebook("blank", "", "mock:/repo");
    let summary = device.sync.sync_all();

    assert!(summary.outcome_for(&filled).unwrap().is_conflict());
    assert_eq!(device.content(&filled), "* mine");
    assert!(matches!(summary.outcome_for(&blank), Some(SyncOutcome::Pulled)));
    assert_eq!(device.content(&blank), "* theirs too");
}

#[test]
fn test_unreachable_repository_does_not_block_others() {
    let healthy = mock("mock:/healthy");
    let offline = mock("mock:/offline");
    offline.set_reachable(false);
    let device = Device::new(&[&healthy, &offline], &[], SyncOptions::default());

    let good = device.notebook("good", "* ok", "mock:/healthy");
    let stuck = device.notebook("stuck", "* waiting", "mock:/offline");

    let summary = device.sync.sync_all();
    assert!(matches!(summary.outcome_for(&good), Some(SyncOutcome::CreatedRemote)));
    assert!(matches!(
        summary.outcome_for(&stuck),
        Some(SyncOutcome::Failed(NotesyncError::RepositoryUnavailable(_)))
    ));
    assert_eq!(healthy.book_content("good.org").as_deref(), Some("* ok"));
    assert!(device.sync.links().get(&stuck).unwrap().last_synced.is_none());

    offline.set_reachable(true);
    let summary = device.sync.sync_all();
    assert!(matches!(summary.outcome_for(&good), Some(SyncOutcome::Unchanged)));
    assert!(matches!(summary.outcome_for(&stuck), Some(SyncOutcome::CreatedRemote)));
}

#[test]
fn test_link_validates_address() {
    let device = Device::new(&[], &[], SyncOptions::default());
    let nb = device.sync.store().create_local("booky", b"* A").unwrap();

    for address in ["nonsense", "ftp:/somewhere", "mock://host/path", "1mock:/x"] {
        assert!(
            matches!(
                device.sync.link(&nb.id, address),
                Err(NotesyncError::MalformedAddress(_))
            ),
            "{address} should be rejected"
        );
    }
    assert!(device.sync.links().get(&nb.id).is_none());

    // Trailing slash and scheme case do not make a different repository
    let entry = device.sync.link(&nb.id, "MOCK:/repo/").unwrap();
    assert_eq!(entry.repository.to_string(), "mock:/repo");
}

#[test]
fn test_local_deletion_unlinks_by_default() {
    let repo = mock("mock:/repo");
    let device = Device::new(&[&repo], &["mock:/repo"], SyncOptions::default());
    let id = device.notebook("booky", "* A", "mock:/repo");
    device.sync.sync_all();

    device.sync.store().delete_local(&id).unwrap();
    let summary = device.sync.sync_all();
    assert!(matches!(summary.outcome_for(&id), Some(SyncOutcome::Unlinked)));
    assert!(device.sync.links().get(&id).is_none());
    assert_eq!(repo.book_content("booky.org").as_deref(), Some("* A"));

    // Not re-imported within the same pass
    assert_eq!(summary.created(), 0);
    assert!(device.sync.store().find_by_name("booky").unwrap().is_none());
}

#[test]
fn test_local_deletion_pushed_when_enabled() {
    let repo = mock("mock:/repo");
    let options = SyncOptions {
        push_deletions: true,
        ..SyncOptions::default()
    };
    let device = Device::new(&[&repo], &[], options);
    let id = device.notebook("booky", "* A", "mock:/repo");
    device.sync.sync_all();

    device.sync.store().delete_local(&id).unwrap();
    let summary = device.sync.sync_all();
    assert!(matches!(summary.outcome_for(&id), Some(SyncOutcome::DeletedRemote)));
    assert!(repo.filenames().is_empty());
    assert!(device.sync.links().get(&id).is_none());
}

#[test]
fn test_remote_deletion_keeps_local_notebook() {
    let repo = mock("mock:/repo");
    let device = Device::new(&[&repo], &[], no_import());
    let id = device.notebook("booky", "* A", "mock:/repo");
    device.sync.sync_all();

    assert!(repo.remove_book("booky.org"));
    assert!(matches!(
        device.sync.sync_one_blocking(&id),
        SyncOutcome::MissingRemote
    ));
    assert_eq!(device.content(&id), "* A");
    assert!(device.sync.links().get(&id).is_some());
}

#[test]
fn test_auto_link_with_single_repository() {
    let repo = mock("mock:/repo");
    let options = SyncOptions {
        auto_link: true,
        ..SyncOptions::default()
    };
    let device = Device::new(&[&repo], &["mock:/repo"], options);
    let nb = device.sync.store().create_local("booky", b"* A").unwrap();
    device
        .sync
        .store()
        .create_local("old.conflict", b"* B")
        .unwrap();

    let summary = device.sync.sync_all();
    assert!(matches!(summary.outcome_for(&nb.id), Some(SyncOutcome::CreatedRemote)));
    assert_eq!(repo.filenames(), vec!["booky.org".to_string()]);
}

#[test]
fn test_directory_repository_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    let address = format!("file:{}", root.path().display());
    let device = Device::new(&[], &[], no_import());

    let id = device.notebook("booky", "* A", &address);
    let summary = device.sync.sync_all();
    assert!(summary.is_clean(), "{:?}", summary.results);
    assert_eq!(
        std::fs::read_to_string(root.path().join("booky.org")).unwrap(),
        "* A"
    );

    std::fs::write(root.path().join("booky.org"), "* A\n** from another device").unwrap();
    assert!(matches!(device.sync.sync_one_blocking(&id), SyncOutcome::Pulled));
    assert_eq!(device.content(&id), "* A\n** from another device");
}

#[test]
fn test_name_with_extension_stays_in_sync() {
    let repo = mock("mock:/repo");
    let device = Device::new(&[&repo], &[], SyncOptions::default());
    let id = device.notebook("booky.org", "* A", "mock:/repo");

    assert!(matches!(device.sync.sync_one_blocking(&id), SyncOutcome::CreatedRemote));
    assert!(matches!(device.sync.sync_one_blocking(&id), SyncOutcome::Unchanged));
    let summary = device.sync.sync_all();
    assert!(matches!(summary.outcome_for(&id), Some(SyncOutcome::Unchanged)));
    assert_eq!(repo.filenames(), vec!["booky.org".to_string()]);

    // Overwrite confirmation has nothing to do either
    assert!(matches!(
        device.sync.confirm_overwrite_blocking(&id).unwrap(),
        SyncOutcome::Unchanged
    ));
}

#[test]
fn test_rename_cannot_leave_repository() {
    let parent = tempfile::tempdir().unwrap();
    let root = parent.path().join("repo");
    std::fs::create_dir(&root).unwrap();
    let address = format!("file:{}", root.display());
    let device = Device::new(&[], &[], no_import());
    let id = device.notebook("booky", "* A", &address);
    device.sync.sync_all();

    for bad in ["../escape", "nested/escape", ".escape"] {
        assert!(matches!(
            device.sync.rename_notebook(&id, bad),
            Err(NotesyncError::InvalidName(_))
        ));
    }
    assert_eq!(device.sync.store().get(&id).unwrap().unwrap().name, "booky");
    assert_eq!(
        device.sync.links().get(&id).unwrap().linked_filename,
        "booky.org"
    );

    assert!(matches!(device.sync.sync_one_blocking(&id), SyncOutcome::Unchanged));
    assert!(root.join("booky.org").exists());
    assert!(!parent.path().join("escape.org").exists());
}

#[test]
fn test_rename_onto_remote_name_differing_in_case_waits() {
    let repo = mock("mock:/repo");
    let device = Device::new(&[&repo], &[], no_import());
    let id = device.notebook("alpha", "* mine", "mock:/repo");
    device.sync.sync_all();
    repo.put_book("Gamma.org", "* theirs");

    device.sync.rename_notebook(&id, "gamma").unwrap();
    assert!(matches!(
        device.sync.sync_one_blocking(&id),
        SyncOutcome::Failed(NotesyncError::NameCollision(_))
    ));
    assert_eq!(repo.book_content("alpha.org").as_deref(), Some("* mine"));
    assert_eq!(repo.book_content("Gamma.org").as_deref(), Some("* theirs"));
}

#[test]
fn test_case_only_rename_is_followed() {
    let repo = mock("mock:/repo");
    let device = Device::new(&[&repo], &[], no_import());
    let id = device.notebook("booky", "* A", "mock:/repo");
    device.sync.sync_all();

    device.sync.rename_notebook(&id, "Booky").unwrap();
    let outcome = device.sync.sync_one_blocking(&id);
    assert!(!outcome.is_failure(), "{:?}", outcome);
    assert_eq!(repo.filenames(), vec!["Booky.org".to_string()]);
}

#[test]
fn test_repositories_sync_in_parallel() {
    let gauge = Arc::new(Gauge::default());
    let device = Device::new(&[], &[], no_import());
    for address in ["mock:/slow-a", "mock:/slow-b"] {
        let repo: Arc<dyn Repository> = SlowRepository::new(address, false, &gauge);
        device.sync.registry().insert(repo);
    }
    device.notebook("alpha", "* A", "mock:/slow-a");
    device.notebook("beta", "* B", "mock:/slow-b");

    let summary = device.sync.sync_all();
    assert_eq!(summary.created(), 2);
    assert_eq!(gauge.peak(), 2);
}

#[test]
fn test_notebooks_in_one_repository_sync_in_parallel() {
    let gauge = Arc::new(Gauge::default());
    let device = Device::new(&[], &[], no_import());
    let repo: Arc<dyn Repository> = SlowRepository::new("mock:/slow", true, &gauge);
    device.sync.registry().insert(repo);
    for name in ["a", "b", "c", "d"] {
        device.notebook(name, "* x", "mock:/slow");
    }

    let summary = device.sync.sync_all();
    assert_eq!(summary.created(), 4);
    assert!(gauge.peak() >= 2, "peak {}", gauge.peak());
}

#[test]
fn test_serialized_backend_runs_one_at_a_time() {
    let gauge = Arc::new(Gauge::default());
    let device = Device::new(&[], &[], no_import());
    let repo: Arc<dyn Repository> = SlowRepository::new("mock:/serial", false, &gauge);
    device.sync.registry().insert(repo);
    for name in ["a", "b", "c"] {
        device.notebook(name, "* x", "mock:/serial");
    }

    let summary = device.sync.sync_all();
    assert_eq!(summary.created(), 3);
    assert_eq!(gauge.peak(), 1);
}
