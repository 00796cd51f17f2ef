//! Integration tests for the persistent activation store

use libcellctl::activation_store::{
    ActivationRecordState, ActivationStore, IdentifierType, STORE_FILE_NAME,
};
use std::fs;
use tempfile::TempDir;

const ICCID: &str = "89014104279439603259";
const MEID: &str = "A10000009296F2";

fn open_store(dir: &TempDir) -> ActivationStore {
    let mut store = ActivationStore::new();
    assert!(store.open(dir.path()), "store should open");
    store
}

#[test]
fn test_set_get_remove() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);

    assert_eq!(store.get(IdentifierType::Iccid, ICCID), ActivationRecordState::Unknown);
    assert!(store.set(IdentifierType::Iccid, ICCID, ActivationRecordState::Pending));
    assert_eq!(store.get(IdentifierType::Iccid, ICCID), ActivationRecordState::Pending);

    // Groups are independent.
    assert_eq!(store.get(IdentifierType::Meid, ICCID), ActivationRecordState::Unknown);

    assert!(store.remove(IdentifierType::Iccid, ICCID));
    assert_eq!(store.get(IdentifierType::Iccid, ICCID), ActivationRecordState::Unknown);
}

#[test]
fn test_unknown_is_rejected_and_prior_value_kept() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);

    assert!(store.set(IdentifierType::Iccid, ICCID, ActivationRecordState::Activated));
    assert!(!store.set(IdentifierType::Iccid, ICCID, ActivationRecordState::Unknown));
    assert_eq!(store.get(IdentifierType::Iccid, ICCID), ActivationRecordState::Activated);
}

#[test]
fn test_removing_absent_record_succeeds() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    assert!(store.remove(IdentifierType::Meid, MEID));
}

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let mut store = open_store(&dir);
        assert!(store.set(IdentifierType::Iccid, ICCID, ActivationRecordState::Pending));
        assert!(store.set(IdentifierType::Meid, MEID, ActivationRecordState::FailureRetry));
    }

    let store = open_store(&dir);
    assert_eq!(store.get(IdentifierType::Iccid, ICCID), ActivationRecordState::Pending);
    assert_eq!(store.get(IdentifierType::Meid, MEID), ActivationRecordState::FailureRetry);
}

#[test]
fn test_mutations_are_on_disk_before_returning() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    assert!(store.set(IdentifierType::Iccid, ICCID, ActivationRecordState::Activated));

    // A second handle sees the write while the first is still open.
    let other = open_store(&dir);
    assert_eq!(other.get(IdentifierType::Iccid, ICCID), ActivationRecordState::Activated);
}

#[test]
fn test_new_file_layout() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    assert!(store.set(IdentifierType::Iccid, ICCID, ActivationRecordState::Pending));
    assert_eq!(store.path(), Some(dir.path().join(STORE_FILE_NAME).as_path()));

    let text = fs::read_to_string(dir.path().join(STORE_FILE_NAME)).unwrap();
    assert!(text.starts_with("# Identifiers pending cellular activation.\n"));
    assert!(text.contains("[iccid_list]"));
    assert!(text.contains(&format!("{} = 1", ICCID)));
}

#[test]
fn test_header_comment_preserved_across_rewrites() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(STORE_FILE_NAME);
    fs::write(&path, "# Custom header\n\n[iccid_list]\n1234 = 2\n").unwrap();

    let mut store = open_store(&dir);
    assert_eq!(store.get(IdentifierType::Iccid, "1234"), ActivationRecordState::Activated);
    assert!(store.set(IdentifierType::Iccid, ICCID, ActivationRecordState::Pending));

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("# Custom header\n"));
}

#[test]
fn test_out_of_range_code_reads_as_unknown() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join(STORE_FILE_NAME),
        format!("[iccid_list]\n{} = 9\n", ICCID),
    )
    .unwrap();

    let store = open_store(&dir);
    assert_eq!(store.get(IdentifierType::Iccid, ICCID), ActivationRecordState::Unknown);
}

#[test]
fn test_corrupted_file_is_moved_aside() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(STORE_FILE_NAME);
    fs::write(&path, "this is [not toml").unwrap();

    let mut store = ActivationStore::new();
    assert!(!store.open(dir.path()));
    assert!(!store.is_open());
    assert!(!path.exists());
    assert!(dir
        .path()
        .join(format!("{}.corrupted", STORE_FILE_NAME))
        .exists());

    // The next open starts fresh.
    let store = open_store(&dir);
    assert_eq!(store.get(IdentifierType::Iccid, ICCID), ActivationRecordState::Unknown);
}

#[test]
fn test_open_creates_missing_directory() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("profile").join("user");

    let mut store = ActivationStore::new();
    assert!(store.open(&nested));
    assert!(nested.join(STORE_FILE_NAME).exists());
}

#[test]
fn test_reopen_elsewhere_closes_previous_store() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();

    let mut store = open_store(&first);
    assert!(store.set(IdentifierType::Iccid, ICCID, ActivationRecordState::Pending));
    assert!(store.open(second.path()));
    assert_eq!(store.get(IdentifierType::Iccid, ICCID), ActivationRecordState::Unknown);

    let reopened = open_store(&first);
    assert_eq!(reopened.get(IdentifierType::Iccid, ICCID), ActivationRecordState::Pending);
}

/// Puts a non-empty directory where the store file lives so the next
/// rewrite cannot replace it.
fn block_store_file(dir: &TempDir) {
    let path = dir.path().join(STORE_FILE_NAME);
    fs::remove_file(&path).unwrap();
    fs::create_dir(&path).unwrap();
    fs::write(path.join("occupied"), "").unwrap();
}

#[test]
fn test_failed_remove_keeps_record() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    assert!(store.set(IdentifierType::Iccid, ICCID, ActivationRecordState::Pending));

    block_store_file(&dir);

    assert!(!store.remove(IdentifierType::Iccid, ICCID));
    assert_eq!(store.get(IdentifierType::Iccid, ICCID), ActivationRecordState::Pending);
}

#[test]
fn test_failed_set_keeps_prior_value() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    assert!(store.set(IdentifierType::Iccid, ICCID, ActivationRecordState::Pending));

    block_store_file(&dir);

    assert!(!store.set(IdentifierType::Iccid, ICCID, ActivationRecordState::Activated));
    assert_eq!(store.get(IdentifierType::Iccid, ICCID), ActivationRecordState::Pending);
    assert!(!store.set(IdentifierType::Meid, MEID, ActivationRecordState::Pending));
    assert_eq!(store.get(IdentifierType::Meid, MEID), ActivationRecordState::Unknown);
}
