use std::cell::RefCell;

use ra_core::{BackendRegistry, CommitCallbacks, RaConfig, RaError, RaResult, Session};
use ra_delta::{
    transmit_text, DeltaError, DeltaResult, DirBaton, EditState, Editor, EditorCall,
    RecordingEditor,
};
use ra_memory::{ChangeAction, MemoryBackend, PROP_COMMITTED_REV, PROP_TXN};
use ra_types::{Checksum, RepoPath, Revision};

fn p(s: &str) -> RepoPath {
    RepoPath::parse(s).unwrap()
}

fn setup() -> (MemoryBackend, BackendRegistry) {
    let backend = MemoryBackend::new().with_window_size(64);
    backend.create_repository("host", "proj").unwrap();
    let registry = BackendRegistry::builder()
        .register(backend.clone())
        .alias("repo", "memory")
        .build()
        .unwrap();
    (backend, registry)
}

fn open(registry: &BackendRegistry) -> Session {
    Session::open(registry, "repo://host/proj").unwrap()
}

/// Drive one commit rooted at `/`; `drive` adds whatever it likes.
fn commit<F>(session: &mut Session, drive: F) -> RaResult<Revision>
where
    F: FnOnce(&mut dyn Editor, &DirBaton) -> DeltaResult<()>,
{
    let (mut editor, handle) = session.commit_editor("test commit", CommitCallbacks::new())?;
    let root = editor.open_root(None)?;
    if let Err(e) = drive(editor.as_mut(), &root) {
        editor.abort_edit()?;
        return Err(e.into());
    }
    editor.close_directory(root)?;
    editor.close_edit()?;
    handle
        .new_revision()
        .ok_or_else(|| RaError::ProtocolViolation("no revision".into()))
}

fn add_file(editor: &mut dyn Editor, dir: &DirBaton, name: &str, text: &[u8]) -> DeltaResult<()> {
    let file = editor.add_file(dir, name)?;
    transmit_text(editor, &file, None, text, 64)?;
    editor.close_file(file, Some(&Checksum::of(text)))
}

fn modify_file(
    editor: &mut dyn Editor,
    dir: &DirBaton,
    name: &str,
    base: Revision,
    old: &[u8],
    new: &[u8],
) -> DeltaResult<()> {
    let file = editor.open_file(dir, name, base)?;
    transmit_text(editor, &file, Some(old), new, 64)?;
    editor.close_file(file, Some(&Checksum::of(new)))
}

fn empty_commits(session: &mut Session, count: usize) {
    for _ in 0..count {
        commit(session, |_, _| Ok(())).unwrap();
    }
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

#[test]
fn add_file_scenario_commits_revision_43() {
    let (_backend, registry) = setup();
    let mut session = open(&registry);
    commit(&mut session, |editor, root| {
        let trunk = editor.add_directory(root, "trunk")?;
        editor.close_directory(trunk)
    })
    .unwrap();
    empty_commits(&mut session, 41);
    assert_eq!(session.latest_revision().unwrap(), Revision::new(42));

    let closed = RefCell::new(Vec::new());
    let callbacks = CommitCallbacks::new().on_path_closed(|path, rev| {
        closed.borrow_mut().push((path.to_string(), rev));
        Ok(())
    });
    let (mut editor, handle) = session.commit_editor("add NEW", callbacks).unwrap();
    let root = editor.open_root(Some(Revision::new(42))).unwrap();
    let trunk = editor.open_directory(&root, "trunk", Revision::new(42)).unwrap();
    add_file(editor.as_mut(), &trunk, "NEW", b"hi").unwrap();
    editor.close_directory(trunk).unwrap();
    editor.close_directory(root).unwrap();
    assert_eq!(handle.new_revision(), None);
    editor.close_edit().unwrap();
    drop(editor);

    assert_eq!(handle.new_revision(), Some(Revision::new(43)));
    assert_eq!(
        closed.into_inner(),
        vec![("/trunk/NEW".to_string(), Revision::new(43))]
    );
}

#[test]
fn aborted_commit_leaves_no_revision_and_no_callbacks() {
    let (_backend, registry) = setup();
    let mut session = open(&registry);
    let fired = RefCell::new(0);
    let callbacks = CommitCallbacks::new().on_path_closed(|_, _| {
        *fired.borrow_mut() += 1;
        Ok(())
    });
    let (mut editor, handle) = session.commit_editor("doomed", callbacks).unwrap();
    let root = editor.open_root(None).unwrap();
    let dir = editor.add_directory(&root, "a").unwrap();
    // Closing the parent first is a protocol error; the edit is now dead.
    assert!(matches!(
        editor.close_directory(root),
        Err(DeltaError::ProtocolViolation(_))
    ));
    assert!(editor.close_directory(dir).is_err());
    editor.abort_edit().unwrap();
    drop(editor);

    assert_eq!(handle.new_revision(), None);
    assert_eq!(*fired.borrow(), 0);
    assert_eq!(session.latest_revision().unwrap(), Revision::ZERO);
}

#[test]
fn bookkeeping_properties_are_offered() {
    let (backend, registry) = setup();
    let mut session = open(&registry);
    let props = RefCell::new(Vec::new());
    let callbacks = CommitCallbacks::new().on_property_set(|path, name, value| {
        props
            .borrow_mut()
            .push((path.to_string(), name.to_string(), value.to_vec()));
        Ok(())
    });
    let (mut editor, _handle) = session.commit_editor("props", callbacks).unwrap();
    let root = editor.open_root(None).unwrap();
    add_file(editor.as_mut(), &root, "f", b"data").unwrap();
    editor.close_directory(root).unwrap();
    editor.close_edit().unwrap();
    drop(editor);

    let props = props.into_inner();
    assert_eq!(props.len(), 3);
    assert!(props.contains(&("/f".into(), PROP_COMMITTED_REV.into(), b"1".to_vec())));
    let repo = backend.host("host").repository(&p("proj")).unwrap();
    let txn = repo.info(Revision::new(1)).unwrap().txn_id.to_string();
    assert!(props.contains(&("/f".into(), PROP_TXN.into(), txn.into_bytes())));
}

#[test]
fn callback_error_is_reported_but_commit_stands() {
    let (_backend, registry) = setup();
    let mut session = open(&registry);
    let callbacks = CommitCallbacks::new()
        .on_path_closed(|_, _| Err(RaError::StorageFailure("local disk full".into())));
    let (mut editor, handle) = session.commit_editor("x", callbacks).unwrap();
    let root = editor.open_root(None).unwrap();
    add_file(editor.as_mut(), &root, "f", b"x").unwrap();
    editor.close_directory(root).unwrap();
    assert!(matches!(editor.close_edit(), Err(DeltaError::Storage(_))));
    drop(editor);
    assert_eq!(handle.new_revision(), Some(Revision::new(1)));
    assert_eq!(session.latest_revision().unwrap(), Revision::new(1));
}

#[test]
fn out_of_date_commit_conflicts() {
    let (_backend, registry) = setup();
    let mut first = open(&registry);
    let mut second = open(&registry);
    commit(&mut first, |e, root| add_file(e, root, "f", b"base text")).unwrap();

    commit(&mut first, |e, root| {
        modify_file(e, root, "f", Revision::new(1), b"base text", b"first edit")
    })
    .unwrap();
    let err = commit(&mut second, |e, root| {
        modify_file(e, root, "f", Revision::new(1), b"base text", b"second edit")
    })
    .unwrap_err();
    assert!(err.is_retryable_commit(), "{err}");
    assert_eq!(second.latest_revision().unwrap(), Revision::new(2));
}

#[test]
fn stale_delete_conflicts_instead_of_dropping_newer_change() {
    let (_backend, registry) = setup();
    let mut first = open(&registry);
    let mut second = open(&registry);
    commit(&mut first, |e, root| {
        let d = e.add_directory(root, "d")?;
        add_file(e, &d, "f", b"original")?;
        e.close_directory(d)
    })
    .unwrap();
    commit(&mut first, |e, root| {
        let d = e.open_directory(root, "d", Revision::new(1))?;
        modify_file(e, &d, "f", Revision::new(1), b"original", b"edited")?;
        e.close_directory(d)
    })
    .unwrap();

    let (mut editor, handle) = second
        .commit_editor("drop d", CommitCallbacks::new())
        .unwrap();
    let root = editor.open_root(Some(Revision::new(1))).unwrap();
    editor.delete_entry(&root, "d").unwrap();
    editor.close_directory(root).unwrap();
    let err = RaError::from(editor.close_edit().unwrap_err());
    assert!(err.is_retryable_commit(), "{err}");
    editor.abort_edit().unwrap();
    drop(editor);
    assert_eq!(handle.new_revision(), None);
    assert_eq!(second.latest_revision().unwrap(), Revision::new(2));

    // Declaring the current base lets the delete through.
    let (mut editor, handle) = second
        .commit_editor("drop d", CommitCallbacks::new())
        .unwrap();
    let root = editor.open_root(Some(Revision::new(2))).unwrap();
    editor.delete_entry(&root, "d").unwrap();
    editor.close_directory(root).unwrap();
    editor.close_edit().unwrap();
    drop(editor);
    assert_eq!(handle.new_revision(), Some(Revision::new(3)));
}

#[test]
fn wrong_base_checksum_is_rejected() {
    let (_backend, registry) = setup();
    let mut session = open(&registry);
    commit(&mut session, |e, root| add_file(e, root, "f", b"real")).unwrap();
    let err = commit(&mut session, |e, root| {
        modify_file(e, root, "f", Revision::new(1), b"imagined", b"new")
    })
    .unwrap_err();
    assert!(matches!(
        err,
        RaError::Delta(DeltaError::ChecksumMismatch { .. })
    ));
    assert_eq!(session.latest_revision().unwrap(), Revision::new(1));
}

#[test]
fn concurrent_sessions_commit_in_order() {
    let (backend, registry) = setup();
    std::thread::scope(|scope| {
        for i in 0..8 {
            let registry = &registry;
            scope.spawn(move || {
                let mut session = open(registry);
                commit(&mut session, |e, root| {
                    add_file(e, root, &format!("f{i}"), format!("file {i}").as_bytes())
                })
                .unwrap();
            });
        }
    });

    let repo = backend.host("host").repository(&p("proj")).unwrap();
    assert_eq!(repo.latest_revision(), Revision::new(8));
    let log = repo.log();
    for (n, info) in log.iter().enumerate().skip(1) {
        assert_eq!(info.revision, Revision::new(n as u64));
        assert_eq!(info.changed_paths.len(), 1);
        assert_eq!(info.changed_paths[0].action, ChangeAction::Added);
        // Each revision contains exactly the files of all earlier ones.
        assert_eq!(repo.list(info.revision).unwrap().len(), n);
    }
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

#[test]
fn unreachable_host_fails_open_and_live_calls() {
    let (backend, registry) = setup();
    let mut session = open(&registry);
    backend.host("host").set_reachable(false);
    assert!(matches!(
        Session::open(&registry, "repo://host/proj"),
        Err(RaError::ConnectionFailed { .. })
    ));
    assert!(matches!(
        session.latest_revision(),
        Err(RaError::TransportError(_))
    ));
    backend.host("host").set_reachable(true);
    assert_eq!(session.latest_revision().unwrap(), Revision::ZERO);
}

#[test]
fn unknown_repository_and_host() {
    let (_backend, registry) = setup();
    assert!(matches!(
        Session::open(&registry, "memory://host/other"),
        Err(RaError::RepositoryNotFound(_))
    ));
    assert!(matches!(
        Session::open(&registry, "memory://elsewhere/proj"),
        Err(RaError::ConnectionFailed { .. })
    ));
}

#[test]
fn read_only_repository_fails_finalization() {
    let (backend, registry) = setup();
    let mut session = open(&registry);
    backend
        .host("host")
        .repository(&p("proj"))
        .unwrap()
        .set_read_only(true);
    let (mut editor, handle) = session.commit_editor("x", CommitCallbacks::new()).unwrap();
    let root = editor.open_root(None).unwrap();
    add_file(editor.as_mut(), &root, "f", b"x").unwrap();
    editor.close_directory(root).unwrap();
    assert!(matches!(editor.close_edit(), Err(DeltaError::Storage(_))));
    editor.abort_edit().unwrap();
    drop(editor);
    assert_eq!(handle.new_revision(), None);
    assert_eq!(session.latest_revision().unwrap(), Revision::ZERO);
}

// ---------------------------------------------------------------------------
// Checkout and update
// ---------------------------------------------------------------------------

/// r1: a/b, a/c, d/e. r2: a/b changed.
fn two_revisions(session: &mut Session) {
    commit(session, |e, root| {
        let a = e.add_directory(root, "a")?;
        add_file(e, &a, "b", b"one")?;
        add_file(e, &a, "c", b"sibling")?;
        e.close_directory(a)?;
        let d = e.add_directory(root, "d")?;
        add_file(e, &d, "e", b"elsewhere")?;
        e.close_directory(d)
    })
    .unwrap();
    commit(session, |e, root| {
        let a = e.open_directory(root, "a", Revision::new(1))?;
        modify_file(e, &a, "b", Revision::new(1), b"one", b"two")?;
        e.close_directory(a)
    })
    .unwrap();
}

#[test]
fn checkout_adds_whole_tree() {
    let (_backend, registry) = setup();
    let mut session = open(&registry);
    two_revisions(&mut session);

    let mut editor = RecordingEditor::new();
    let rev = session
        .do_checkout(&RepoPath::root(), Some(Revision::new(1)), &mut editor)
        .unwrap();
    assert_eq!(rev, Revision::new(1));
    assert_eq!(editor.state(), EditState::Closed);
    assert_eq!(editor.text(&p("a/b")).unwrap()[..], b"one"[..]);
    assert_eq!(editor.text(&p("d/e")).unwrap()[..], b"elsewhere"[..]);
    assert!(matches!(editor.calls()[0], EditorCall::OpenRoot { base_revision: None }));

    let mut latest = RecordingEditor::new();
    assert_eq!(
        session.do_checkout(&p("a"), None, &mut latest).unwrap(),
        Revision::new(2)
    );
    assert_eq!(latest.text(&p("b")).unwrap()[..], b"two"[..]);
}

#[test]
fn failing_checkout_target_is_aborted() {
    let (_backend, registry) = setup();
    let mut session = open(&registry);
    two_revisions(&mut session);
    let mut editor = RecordingEditor::new().fail_at(p("a/c"));
    let err = session
        .do_checkout(&RepoPath::root(), None, &mut editor)
        .unwrap_err();
    assert!(matches!(err, RaError::Delta(DeltaError::Cancelled(_))));
    assert_eq!(editor.state(), EditState::Aborted);
}

#[test]
fn update_touches_only_changed_ancestry() {
    let (_backend, registry) = setup();
    let mut session = open(&registry);
    two_revisions(&mut session);

    let mut editor = RecordingEditor::new().with_base_text(p("a/b"), "one");
    let mut reporter = session.do_update(None, &mut editor).unwrap();
    reporter.set_baseline(Revision::new(1), &RepoPath::root()).unwrap();
    assert_eq!(reporter.finish_report().unwrap(), Revision::new(2));

    assert_eq!(editor.text(&p("a/b")).unwrap()[..], b"two"[..]);
    let changed = p("a/b");
    for path in editor.touched_paths() {
        assert!(
            path.subsumes(&changed) || changed.subsumes(&path),
            "unexpected call for {path}"
        );
    }
    assert_eq!(editor.calls().last(), Some(&EditorCall::CloseEdit));
}

#[test]
fn update_to_reported_revision_is_silent() {
    let (_backend, registry) = setup();
    let mut session = open(&registry);
    two_revisions(&mut session);

    let mut editor = RecordingEditor::new();
    let mut reporter = session.do_update(Some(Revision::new(2)), &mut editor).unwrap();
    reporter.set_baseline(Revision::new(2), &RepoPath::root()).unwrap();
    reporter.finish_report().unwrap();
    assert!(editor.mutations().is_empty());
    assert_eq!(
        editor.calls(),
        &[
            EditorCall::OpenRoot {
                base_revision: Some(Revision::new(2))
            },
            EditorCall::CloseDirectory {
                path: RepoPath::root()
            },
            EditorCall::CloseEdit,
        ]
    );
}

#[test]
fn deeper_report_entries_take_precedence() {
    let (_backend, registry) = setup();
    let mut session = open(&registry);
    commit(&mut session, |e, root| {
        let x = e.add_directory(root, "x")?;
        add_file(e, &x, "y", b"y1")?;
        add_file(e, &x, "z", b"z1")?;
        e.close_directory(x)
    })
    .unwrap();
    empty_commits(&mut session, 5);
    commit(&mut session, |e, root| {
        let x = e.open_directory(root, "x", Revision::new(6))?;
        modify_file(e, &x, "y", Revision::new(6), b"y1", b"y7")?;
        e.close_directory(x)
    })
    .unwrap();
    commit(&mut session, |e, root| {
        let x = e.open_directory(root, "x", Revision::new(7))?;
        modify_file(e, &x, "z", Revision::new(7), b"z1", b"z8")?;
        e.close_directory(x)
    })
    .unwrap();

    let mut editor = RecordingEditor::new().with_base_text(p("x/z"), "z1");
    let mut reporter = session.do_update(None, &mut editor).unwrap();
    reporter.set_baseline(Revision::new(5), &RepoPath::root()).unwrap();
    reporter.set_directory(&p("/x"), Revision::new(5)).unwrap();
    reporter.set_file(&p("/x/y"), Revision::new(7)).unwrap();
    assert_eq!(reporter.finish_report().unwrap(), Revision::new(8));

    assert_eq!(editor.touched_paths(), vec![p("x"), p("x/z"), RepoPath::root()]);
    assert!(editor.calls().contains(&EditorCall::OpenFile {
        path: p("x/z"),
        base_revision: Revision::new(5),
    }));
    assert_eq!(editor.text(&p("x/z")).unwrap()[..], b"z8"[..]);
}

#[test]
fn kind_change_is_delete_then_add() {
    let (_backend, registry) = setup();
    let mut session = open(&registry);
    commit(&mut session, |e, root| add_file(e, root, "k", b"file")).unwrap();
    commit(&mut session, |e, root| {
        e.delete_entry(root, "k")?;
        let k = e.add_directory(root, "k")?;
        add_file(e, &k, "inner", b"nested")?;
        e.close_directory(k)
    })
    .unwrap();

    let mut editor = RecordingEditor::new();
    let mut reporter = session.do_update(None, &mut editor).unwrap();
    reporter.set_baseline(Revision::new(1), &RepoPath::root()).unwrap();
    reporter.finish_report().unwrap();

    let mutations: Vec<EditorCall> = editor.mutations().into_iter().cloned().collect();
    assert_eq!(mutations[0], EditorCall::DeleteEntry { path: p("k") });
    assert_eq!(mutations[1], EditorCall::AddDirectory { path: p("k") });
    assert_eq!(editor.text(&p("k/inner")).unwrap()[..], b"nested"[..]);
}

#[test]
fn report_errors_abort_the_update_editor() {
    let (_backend, registry) = setup();
    let mut session = open(&registry);

    let mut editor = RecordingEditor::new();
    let reporter = session.do_update(None, &mut editor).unwrap();
    assert!(matches!(
        reporter.finish_report(),
        Err(RaError::ProtocolViolation(_))
    ));
    assert_eq!(editor.state(), EditState::Aborted);

    let mut editor = RecordingEditor::new();
    let mut reporter = session.do_update(None, &mut editor).unwrap();
    assert!(matches!(
        reporter.set_baseline(Revision::new(9), &RepoPath::root()),
        Err(RaError::NoSuchRevision(_))
    ));
    assert!(reporter.set_directory(&p("x"), Revision::ZERO).is_err());
    assert!(reporter.finish_report().is_err());
    assert_eq!(editor.state(), EditState::Aborted);
}

#[test]
fn abort_report_releases_editor() {
    let (_backend, registry) = setup();
    let mut session = open(&registry);
    let mut editor = RecordingEditor::new();
    let mut reporter = session.do_update(None, &mut editor).unwrap();
    reporter.set_baseline(Revision::ZERO, &RepoPath::root()).unwrap();
    reporter.abort_report().unwrap();
    assert_eq!(editor.state(), EditState::Aborted);
    assert!(editor.mutations().is_empty());
}

#[test]
fn config_sets_window_size() {
    let config = RaConfig::from_toml_str("window_size = 7").unwrap();
    let backend = MemoryBackend::new().with_config(&config);
    assert_eq!(backend.window_size(), 7);
}
