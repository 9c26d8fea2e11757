use std::fs;
use std::thread::spawn;
use tempfile::TempDir;
use vecd::{CreateOutcome, VectorStore};
use walkdir::WalkDir;

fn scratch() -> (TempDir, VectorStore) {
    let dir = TempDir::new().expect("unable to create temporary working directory");
    let store = VectorStore::open(dir.path()).expect("unable to open store");
    (dir, store)
}

#[test]
fn create_set_get_destroy_lifecycle() {
    let (_dir, store) = scratch();

    assert_eq!(store.create("v", 3).unwrap(), CreateOutcome::Created);
    assert_eq!(store.get("v", 0).unwrap(), 0);
    store.set("v", 1, 42).unwrap();
    assert_eq!(store.get("v", 1).unwrap(), 42);
    store.destroy("v").unwrap();
    assert!(store.get("v", 0).is_err());
}

#[test]
fn create_is_idempotent_for_same_size_only() {
    let (dir, store) = scratch();

    assert_eq!(store.create("v", 3).unwrap(), CreateOutcome::Created);
    let on_disk = fs::read_to_string(dir.path().join("v.txt")).unwrap();

    assert_eq!(store.create("v", 3).unwrap(), CreateOutcome::AlreadyExists);
    assert!(store.create("v", 4).is_err());

    // Neither the repeat nor the conflict may touch the file.
    assert_eq!(fs::read_to_string(dir.path().join("v.txt")).unwrap(), on_disk);
}

#[test]
fn create_rejects_invalid_arguments() {
    let (dir, store) = scratch();

    assert!(store.create("**bad**", 3).is_err());
    assert!(store.create("x", 0).is_err());
    assert!(store.create("x", -1).is_err());
    assert!(store.create("", 3).is_err());
    assert!(store.create(&"x".repeat(40), 3).is_err());

    let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert!(files.is_empty());
}

#[test]
fn new_vector_is_zero_initialized() {
    let (_dir, store) = scratch();

    store.create("zeroes", 5).unwrap();
    for pos in 0..5 {
        assert_eq!(store.get("zeroes", pos).unwrap(), 0);
    }
}

#[test]
fn out_of_range_positions_leave_the_file_unchanged() {
    let (dir, store) = scratch();

    store.create("v", 3).unwrap();
    store.set("v", 0, 7).unwrap();
    let on_disk = fs::read_to_string(dir.path().join("v.txt")).unwrap();

    assert!(store.set("v", -1, 1).is_err());
    assert!(store.set("v", 3, 1).is_err());
    assert!(store.set("v", 4, 1).is_err());
    assert!(store.get("v", -1).is_err());
    assert!(store.get("v", 3).is_err());

    assert_eq!(fs::read_to_string(dir.path().join("v.txt")).unwrap(), on_disk);
}

#[test]
fn operations_on_missing_vectors_fail() {
    let (_dir, store) = scratch();

    assert!(store.get("nonexistent", 0).is_err());
    assert!(store.set("nonexistent", 0, 0).is_err());
    assert!(store.destroy("nonexistent").is_err());
}

#[test]
fn destroyed_name_stays_gone_until_recreated() {
    let (dir, store) = scratch();

    store.create("v", 2).unwrap();
    store.destroy("v").unwrap();
    assert!(store.get("v", 0).is_err());
    assert!(store.set("v", 0, 1).is_err());
    assert!(store.destroy("v").is_err());
    assert!(!dir.path().join("v.txt").exists());

    assert_eq!(store.create("v", 2).unwrap(), CreateOutcome::Created);
    assert_eq!(store.get("v", 0).unwrap(), 0);
}

#[test]
fn concurrent_writers_land_every_element() {
    const SIZE: i32 = 256;
    let (dir, store) = scratch();

    store.create("m", SIZE).unwrap();

    let writers: Vec<_> = (0..2)
        .map(|_| {
            let store = store.clone();
            spawn(move || {
                for pos in 0..SIZE {
                    store.set("m", pos, pos).expect("set failed");
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().expect("writer panicked");
    }

    for pos in 0..SIZE {
        assert_eq!(store.get("m", pos).unwrap(), pos);
    }

    // The file must be complete: a size header plus one line per element.
    let contents = fs::read_to_string(dir.path().join("m.txt")).unwrap();
    assert_eq!(contents.lines().count() as i32, SIZE + 1);
    assert_eq!(contents.lines().next().unwrap(), SIZE.to_string());
}

#[test]
fn set_racing_destroy_never_corrupts_the_file() {
    let (dir, store) = scratch();

    store.create("d", 5).unwrap();

    let setter = {
        let store = store.clone();
        spawn(move || store.set("d", 2, 7))
    };
    let destroyer = {
        let store = store.clone();
        spawn(move || store.destroy("d"))
    };

    // The set may win or lose the race; the destroy must succeed.
    let _ = setter.join().expect("setter panicked");
    destroyer.join().expect("destroyer panicked").unwrap();

    assert!(store.get("d", 2).is_err());
    assert!(!dir.path().join("d.txt").exists());
    assert!(!dir.path().join("d.tmp").exists());
}

#[test]
fn reopened_store_sees_persisted_vectors() {
    let dir = TempDir::new().expect("unable to create temporary working directory");

    {
        let store = VectorStore::open(dir.path()).unwrap();
        store.create("kept", 4).unwrap();
        store.set("kept", 3, 99).unwrap();
    }

    let store = VectorStore::open(dir.path()).unwrap();
    assert_eq!(store.get("kept", 3).unwrap(), 99);
    assert_eq!(store.create("kept", 4).unwrap(), CreateOutcome::AlreadyExists);
}

#[test]
fn startup_scan_ignores_foreign_files() {
    let dir = TempDir::new().expect("unable to create temporary working directory");
    fs::write(dir.path().join("junk.dat"), "3\n0\n0\n0\n").unwrap();
    fs::write(dir.path().join("not a name.txt"), "1\n0\n").unwrap();

    let store = VectorStore::open(dir.path()).unwrap();
    assert!(store.get("junk", 0).is_err());

    // The ignored files themselves stay untouched.
    assert!(dir.path().join("junk.dat").exists());
    assert!(dir.path().join("not a name.txt").exists());
}

#[test]
fn store_directory_holds_one_file_per_vector() {
    let (dir, store) = scratch();

    for name in &["a", "b", "c"] {
        store.create(name, 2).unwrap();
        store.set(name, 1, 5).unwrap();
    }
    store.destroy("b").unwrap();

    let mut found: Vec<_> = WalkDir::new(dir.path())
        .min_depth(1)
        .into_iter()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    found.sort();

    // No temp files or other leftovers, just the live vectors.
    assert_eq!(found, vec!["a.txt", "c.txt"]);
}
