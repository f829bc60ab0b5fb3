use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use meridian::{
    ArrayData, Backend, DataSet, Error, LoadedDataSet, Priority, Result, SchemaVersion, Throttle,
    backend::DataSetImage, commit_linked,
};
use ndarray::arr2;

#[derive(Clone, Default)]
struct Switches {
    fail_precommit: Arc<AtomicBool>,
    fail_commit: Arc<AtomicBool>,
}

/// Memory-like backend whose phases can be told to fail.
struct Flaky {
    name: &'static str,
    switches: Switches,
}

impl Backend for Flaky {
    fn uri(&self) -> String {
        format!("test:{}", self.name)
    }

    fn precommit(&mut self, _image: &DataSetImage<'_>) -> Result<()> {
        if self.switches.fail_precommit.load(Ordering::SeqCst) {
            return Err(Error::InvalidArgument("disk full".into()));
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.switches.fail_commit.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("device gone")));
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<Option<LoadedDataSet>> {
        Ok(None)
    }
}

fn flaky(name: &'static str) -> (DataSet, Switches) {
    let switches = Switches::default();
    let ds = DataSet::with_backend(
        Flaky {
            name,
            switches: switches.clone(),
        },
        None,
    )
    .unwrap();
    (ds, switches)
}

#[test]
fn put_then_get_region_after_commit() {
    let ds = DataSet::new();
    let grid = ds.add_variable::<i32>("grid", &["y", "x"]).unwrap();
    let piece = ArrayData::from(arr2(&[[1, 2], [3, 4]]));
    grid.put_data(Some(&[1, 2]), piece.clone()).unwrap();
    ds.commit().unwrap();

    assert_eq!(grid.shape(SchemaVersion::Committed).unwrap().as_slice(), &[3, 4]);
    assert_eq!(grid.get_data(Some(&[1, 2]), Some(&[2, 2])).unwrap(), piece);
    assert_eq!(
        grid.get_data(Some(&[0, 0]), Some(&[1, 1])).unwrap(),
        ArrayData::from(arr2(&[[0]]))
    );
}

#[test]
fn pending_writes_are_invisible() {
    let ds = DataSet::new();
    let v = ds.add_variable::<f64>("v", &["t"]).unwrap();
    v.put_data(None, vec![1.0, 2.0]).unwrap();
    ds.commit().unwrap();
    v.put_data(Some(&[1]), vec![9.0, 9.5]).unwrap();

    assert_eq!(v.get::<f64>(None, None).unwrap().into_iter().collect::<Vec<_>>(), vec![1.0, 2.0]);
    assert_eq!(v.shape(SchemaVersion::Recent).unwrap().as_slice(), &[3]);
    assert_eq!(v.shape(SchemaVersion::Committed).unwrap().as_slice(), &[2]);
    let changes = v.changes().unwrap().unwrap();
    assert_eq!(changes.pieces.len(), 1);
    assert_eq!(changes.changes.changeset, 2);
}

#[test]
fn failed_precommit_touches_no_variable() {
    let (ds, switches) = flaky("atomic");
    let a = ds.add_variable::<i32>("a", &["x"]).unwrap();
    let b = ds.add_variable::<i32>("b", &["x"]).unwrap();
    a.put_data(None, vec![1, 2]).unwrap();
    b.put_data(None, vec![3]).unwrap();
    ds.commit().unwrap();

    a.append(vec![5, 6], 0).unwrap();
    b.put_data(Some(&[0]), vec![7, 8, 9]).unwrap();
    switches.fail_precommit.store(true, Ordering::SeqCst);
    let err = ds.commit().unwrap_err();
    assert!(matches!(err, Error::PrecommitFailed { .. }), "{err}");
    assert!(err.is_precommit_abort());

    assert_eq!(a.get::<i32>(None, None).unwrap().into_iter().collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(b.get::<i32>(None, None).unwrap().into_iter().collect::<Vec<_>>(), vec![3]);
    assert!(a.has_changes().unwrap() && b.has_changes().unwrap());
    assert_eq!(ds.version().unwrap(), 1);

    switches.fail_precommit.store(false, Ordering::SeqCst);
    ds.commit().unwrap();
    assert_eq!(a.get::<i32>(None, None).unwrap().into_iter().collect::<Vec<_>>(), vec![1, 2, 5, 6]);
    assert_eq!(b.get::<i32>(None, None).unwrap().into_iter().collect::<Vec<_>>(), vec![7, 8, 9]);
}

#[test]
fn failed_final_commit_keeps_changes_for_retry() {
    let (ds, switches) = flaky("final");
    let a = ds.add_variable::<f64>("a", &["x"]).unwrap();
    a.put_data(None, vec![1.0]).unwrap();
    switches.fail_commit.store(true, Ordering::SeqCst);
    assert!(matches!(ds.commit(), Err(Error::Io(_))));
    assert_eq!(a.shape(SchemaVersion::Committed).unwrap().as_slice(), &[0]);
    assert!(a.has_changes().unwrap());

    switches.fail_commit.store(false, Ordering::SeqCst);
    ds.commit().unwrap();
    assert_eq!(a.get::<f64>(None, None).unwrap().into_iter().collect::<Vec<_>>(), vec![1.0]);
}

#[test]
fn committing_handler_can_cancel() {
    let ds = DataSet::new();
    let v = ds.add_variable::<i32>("v", &["x"]).unwrap();
    v.put_data(None, vec![1]).unwrap();
    let veto = ds
        .on_committing(|event| {
            if event.shape.as_slice() == &[1] {
                Err("one element is not enough".into())
            } else {
                Ok(())
            }
        })
        .unwrap();
    let err = ds.commit().unwrap_err();
    assert!(matches!(err, Error::CommitCancelled { .. }));
    assert_eq!(v.shape(SchemaVersion::Committed).unwrap().as_slice(), &[0]);

    v.append(vec![2], 0).unwrap();
    ds.commit().unwrap();
    assert!(ds.unsubscribe(veto).unwrap());
    assert!(!ds.unsubscribe(veto).unwrap());
}

#[test]
fn one_commit_publishes_every_variable() {
    let ds = DataSet::new();
    let a = ds.add_variable::<i32>("a", &["x"]).unwrap();
    let b = ds.add_variable::<String>("b", &[]).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = ds
        .on_committed(move |event| sink.lock().unwrap().push(event.name.clone()))
        .unwrap();

    a.put_data(None, vec![1, 2, 3]).unwrap();
    b.put_data(None, ArrayData::scalar("hello".to_string())).unwrap();
    ds.commit().unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(ds.version().unwrap(), 1);
    assert_eq!(
        b.get_data(None, None).unwrap(),
        ArrayData::scalar("hello".to_string())
    );
    assert!(!ds.has_changes().unwrap());
}

#[test]
fn rollback_discards_and_removes_new_variables() {
    let ds = DataSet::new();
    let kept = ds.add_variable::<f64>("kept", &["x"]).unwrap();
    kept.put_data(None, vec![1.0]).unwrap();
    ds.commit().unwrap();

    kept.put_data(None, vec![5.0, 6.0]).unwrap();
    kept.rename("renamed").unwrap();
    let fresh = ds.add_variable::<f64>("fresh", &["x"]).unwrap();
    ds.set_metadata("title", "draft").unwrap();

    let removed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&removed);
    let _sub = ds
        .on_rolled_back(move |event| {
            if event.removed {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
    ds.rollback().unwrap();

    assert_eq!(removed.load(Ordering::SeqCst), 1);
    assert_eq!(kept.name().unwrap(), "kept");
    assert_eq!(kept.get::<f64>(None, None).unwrap().into_iter().collect::<Vec<_>>(), vec![1.0]);
    assert!(matches!(fresh.name(), Err(Error::NotFound(_))));
    assert_eq!(ds.metadata("title", SchemaVersion::Recent).unwrap(), None);
    assert_eq!(ds.variables().unwrap().len(), 1);
}

#[test]
fn coordinate_system_needs_one_dimensional_axes() {
    let ds = DataSet::new();
    let lat = ds.add_variable::<f64>("lat", &["lat"]).unwrap();
    let field = ds.add_variable::<f64>("field", &["lat", "lon"]).unwrap();
    ds.add_coordinate_system("bad", &[&field]).unwrap();
    assert!(matches!(ds.commit(), Err(Error::ConstraintsFailed { .. })));

    ds.rollback().unwrap();
    let lat2 = ds.add_variable::<f64>("lat", &["lat"]).unwrap();
    ds.add_coordinate_system("geo", &[&lat2]).unwrap();
    ds.commit().unwrap();
    let systems = ds.coordinate_systems(SchemaVersion::Committed).unwrap();
    assert_eq!(systems.len(), 1);
    assert_eq!(systems[0].axes, vec![lat2.id()]);
    assert!(matches!(lat.name(), Err(Error::NotFound(_))));
}

#[test]
fn linked_commit_aborts_every_member_on_precommit_failure() {
    let (left, _) = flaky("left");
    let (right, right_switches) = flaky("right");
    let l = left.add_variable::<i32>("l", &["x"]).unwrap();
    let r = right.add_variable::<i32>("r", &["x"]).unwrap();
    l.put_data(None, vec![1]).unwrap();
    r.put_data(None, vec![2]).unwrap();

    right_switches.fail_precommit.store(true, Ordering::SeqCst);
    assert!(matches!(
        commit_linked(&[&left, &right]),
        Err(Error::PrecommitFailed { .. })
    ));
    assert_eq!(l.shape(SchemaVersion::Committed).unwrap().as_slice(), &[0]);
    assert!(l.has_changes().unwrap());

    right_switches.fail_precommit.store(false, Ordering::SeqCst);
    commit_linked(&[&left, &right, &left]).unwrap();
    assert_eq!(l.get::<i32>(None, None).unwrap().into_iter().collect::<Vec<_>>(), vec![1]);
    assert_eq!(r.get::<i32>(None, None).unwrap().into_iter().collect::<Vec<_>>(), vec![2]);
    assert_eq!(left.version().unwrap(), 1);
}

#[test]
fn linked_commit_reports_the_member_that_failed() {
    let (first, _) = flaky("first");
    let (second, switches) = flaky("second");
    let a = first.add_variable::<i32>("a", &["x"]).unwrap();
    let b = second.add_variable::<i32>("b", &["x"]).unwrap();
    a.put_data(None, vec![1]).unwrap();
    b.put_data(None, vec![2]).unwrap();
    switches.fail_commit.store(true, Ordering::SeqCst);

    match commit_linked(&[&first, &second]) {
        Err(Error::DistributedCommit {
            index,
            uri,
            committed,
            ..
        }) => {
            assert_eq!(index, 1);
            assert_eq!(uri, "test:second");
            assert_eq!(committed, 1);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(a.get::<i32>(None, None).unwrap().into_iter().collect::<Vec<_>>(), vec![1]);
    assert!(b.has_changes().unwrap());
}

#[derive(Default)]
struct Gate {
    acquired: AtomicUsize,
    held: AtomicUsize,
    peak: AtomicUsize,
}

impl Throttle for Gate {
    fn acquire(&self, _priority: Priority) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let held = self.held.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(held, Ordering::SeqCst);
    }

    fn release(&self) {
        self.held.fetch_sub(1, Ordering::SeqCst);
    }
}

#[test]
fn commit_holds_a_throttle_slot() {
    let gate = Arc::new(Gate::default());
    let ds = DataSet::new();
    ds.set_throttle(Some(gate.clone() as Arc<dyn Throttle>)).unwrap();
    let v = ds.add_variable::<u8>("v", &["x"]).unwrap();
    v.put_data(None, vec![1u8]).unwrap();
    ds.commit().unwrap();
    assert_eq!(gate.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(gate.held.load(Ordering::SeqCst), 0);
}

#[test]
fn linked_commit_takes_one_slot_per_shared_throttle() {
    let gate = Arc::new(Gate::default());
    let left = DataSet::new();
    let right = DataSet::new();
    for ds in [&left, &right] {
        ds.set_throttle(Some(gate.clone() as Arc<dyn Throttle>)).unwrap();
        ds.add_variable::<i32>("v", &["x"]).unwrap().put_data(None, vec![1]).unwrap();
    }
    commit_linked(&[&left, &right]).unwrap();
    assert_eq!(gate.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(gate.peak.load(Ordering::SeqCst), 1);
    assert_eq!(gate.held.load(Ordering::SeqCst), 0);
    assert!(!left.has_changes().unwrap() && !right.has_changes().unwrap());
}

#[test]
fn datasets_lock_per_call_across_threads() {
    let ds = DataSet::new();
    let v = ds.add_variable::<i64>("n", &["i"]).unwrap();
    std::thread::scope(|scope| {
        for t in 0..4i64 {
            let v = v.clone();
            scope.spawn(move || v.append(vec![t], 0).unwrap());
        }
    });
    ds.commit().unwrap();
    let mut values = v.get::<i64>(None, None).unwrap().into_iter().collect::<Vec<_>>();
    values.sort_unstable();
    assert_eq!(values, vec![0, 1, 2, 3]);
}

#[test]
fn disposed_dataset_invalidates_handles() {
    let ds = DataSet::new();
    let v = ds.add_variable::<f32>("v", &["x"]).unwrap();
    v.put_data(None, vec![1.0f32]).unwrap();
    let other = ds.clone();
    ds.dispose();
    assert!(other.is_disposed());
    assert!(matches!(v.get_data(None, None), Err(Error::Disposed)));
    assert!(matches!(v.dataset(), Err(Error::Disposed)));
    assert!(matches!(other.variables(), Err(Error::Disposed)));
}

#[test]
fn dropping_the_dataset_invalidates_handles() {
    let v = {
        let ds = DataSet::new();
        ds.add_variable::<u16>("v", &[]).unwrap()
    };
    assert!(matches!(v.name(), Err(Error::Disposed)));
}
