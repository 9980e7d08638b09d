use handheld_cache::error::ErrorKind;
use handheld_cache::{CacheRegistry, DatabaseCache, PrefillJob};
use handheld_device::mock::MockDevice;
use handheld_device::{DeviceHandle, DeviceInfo, ExclusiveDevice};
use handheld_record::Record;
use handheld_syncutils::CancelToken;
use rstest::rstest;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn connect(mock: &MockDevice) -> DeviceHandle {
    let session = mock.open_session(None).unwrap();
    Arc::new(ExclusiveDevice::new(DeviceInfo::new(0x1000_0001, "Test"), Box::new(session)))
}

fn device() -> MockDevice {
    MockDevice::new()
        .with_database("Address Book", [(1, b"alice".to_vec()), (2, b"bob".to_vec())])
        .with_database("Memos", [(7, b"milk".to_vec())])
        .with_database("Tasks", [(3, b"laundry".to_vec())])
        .with_database("Service Book", [(5, b"apn".to_vec())])
        .with_read_only_database("Service Book")
        .renumbering_on_write()
        .with_read_delay(Duration::from_millis(2))
}

#[rstest]
#[case(2)]
#[case(8)]
fn test_concurrent_load_reads_device_once(#[case] threads: usize) {
    let mock = device();
    let registry = Arc::new(CacheRegistry::new(connect(&mock)).unwrap());
    let barrier = Arc::new(Barrier::new(threads));
    let loaders: Vec<_> = (0..threads)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.load("Address Book").unwrap()
            })
        })
        .collect();
    let caches: Vec<Arc<DatabaseCache>> = loaders.into_iter().map(|loader| loader.join().unwrap()).collect();
    assert_eq!(mock.state_table_reads("Address Book"), 1);
    assert_eq!(mock.record_reads(), 2);
    assert!(caches.iter().all(|cache| Arc::ptr_eq(cache, &caches[0])));
    assert_eq!(caches[0].len(), 2);
}

#[test]
fn test_get_does_not_load() {
    let mock = device();
    let registry = CacheRegistry::new(connect(&mock)).unwrap();
    assert!(registry.get("Memos").is_none());
    let cache = registry.load("Memos").unwrap();
    assert!(Arc::ptr_eq(&registry.get("Memos").unwrap(), &cache));
    assert_eq!(registry.loaded(), vec!["Memos".to_string()]);
}

#[test]
fn test_unknown_database() {
    let mock = device();
    let registry = CacheRegistry::new(connect(&mock)).unwrap();
    let Err(err) = registry.load("Nope") else {
        panic!("expected unknown database to fail");
    };
    assert_eq!(*err, ErrorKind::UnknownDatabase("Nope".to_string()));
    assert_eq!(mock.record_reads(), 0);
}

#[test]
fn test_add_then_overwrite_with_returned_entry() {
    let mock = device();
    let registry = CacheRegistry::new(connect(&mock)).unwrap();
    let cache = registry.load("Address Book").unwrap();
    let added = cache.add(Record::new("ignored", 0, 0, b"carol".to_vec())).unwrap();
    assert!(![1, 2].contains(&added.unique_id()));
    assert_eq!(cache.entries()[0], added);

    // The device renumbered on add; the fresh entry must still be usable.
    let updated = cache.overwrite(&added, Record::new("", 0, 0, b"carol v2".to_vec())).unwrap();
    assert_eq!(updated.unique_id(), added.unique_id());
    assert_eq!(cache.get(added.unique_id()).unwrap().record().payload(), b"carol v2");
    let on_device = mock.records("Address Book");
    assert!(on_device.contains(&(added.unique_id(), b"carol v2".to_vec())));
    assert_eq!(on_device.len(), 3);
}

#[test]
fn test_entry_order() {
    let mock = device();
    let registry = CacheRegistry::new(connect(&mock)).unwrap();
    let cache = registry.load("Address Book").unwrap();
    let ids = |cache: &DatabaseCache| cache.entries().iter().map(|entry| entry.unique_id()).collect::<Vec<_>>();
    assert_eq!(ids(&cache), vec![1, 2]);
    let first = cache.add(Record::new("", 0, 0, b"carol".to_vec())).unwrap();
    let second = cache.add(Record::new("", 0, 0, b"dave".to_vec())).unwrap();
    assert_eq!(ids(&cache), vec![second.unique_id(), first.unique_id(), 1, 2]);
}

#[test]
fn test_entries_follow_renumbering() {
    let mock = device();
    let registry = CacheRegistry::new(connect(&mock)).unwrap();
    let cache = registry.load("Address Book").unwrap();
    let bob = cache.get(2).unwrap();
    cache.add(Record::new("", 0, 0, b"carol".to_vec())).unwrap();
    // The old entry carries a stale index; the cache re-resolves it.
    cache.overwrite(&bob, Record::new("", 0, 0, b"robert".to_vec())).unwrap();
    assert_ne!(cache.get(2).unwrap().state_index(), bob.state_index());
    assert!(mock.records("Address Book").contains(&(2, b"robert".to_vec())));
}

#[test]
fn test_tasks_overwrite_is_delete_and_add() {
    let mock = device();
    let registry = CacheRegistry::new(connect(&mock)).unwrap();
    let cache = registry.load("Tasks").unwrap();
    assert!(!cache.kind().supports_in_place_overwrite());
    let task = cache.get(3).unwrap();
    let updated = cache.overwrite(&task, Record::new("", 0, 0, b"dishes".to_vec())).unwrap();
    assert_eq!(updated.unique_id(), 3);
    assert_eq!(mock.records("Tasks"), vec![(3, b"dishes".to_vec())]);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_tasks_failed_readd_leaves_cache_matching_device() {
    let mock = device().failing_adds_to("Tasks");
    let registry = CacheRegistry::new(connect(&mock)).unwrap();
    let cache = registry.load("Tasks").unwrap();
    let task = cache.get(3).unwrap();
    let Err(err) = cache.overwrite(&task, Record::new("", 0, 0, b"dishes".to_vec())) else {
        panic!("re-add should fail");
    };
    assert!(matches!(&*err, ErrorKind::Device(_)));
    // The delete went through, so the record is gone on both sides.
    assert!(mock.records("Tasks").is_empty());
    assert!(cache.is_empty());
    let Err(err) = cache.overwrite(&task, Record::new("", 0, 0, b"dishes".to_vec())) else {
        panic!("record no longer exists");
    };
    assert_eq!(*err, ErrorKind::StaleEntry(3));
}

#[test]
fn test_add_is_cached_when_refresh_fails() {
    let mock = device();
    let registry = CacheRegistry::new(connect(&mock)).unwrap();
    let cache = registry.load("Memos").unwrap();
    mock.refuse_state_tables("Memos", true);
    assert!(cache.add(Record::new("", 0, 0, b"eggs".to_vec())).is_err());
    assert_eq!(mock.records("Memos").len(), 2);
    assert_eq!(cache.len(), 2);
    let added = cache.entries()[0].clone();
    assert_eq!(added.record().payload(), b"eggs");

    // Once the device answers again the entry is resolved before use.
    mock.refuse_state_tables("Memos", false);
    let updated = cache.overwrite(&added, Record::new("", 0, 0, b"bacon".to_vec())).unwrap();
    assert_eq!(updated.unique_id(), added.unique_id());
    assert!(mock.records("Memos").contains(&(added.unique_id(), b"bacon".to_vec())));
    assert_eq!(cache.get(added.unique_id()).unwrap(), updated);
}

#[test]
fn test_delete() {
    let mock = device();
    let registry = CacheRegistry::new(connect(&mock)).unwrap();
    let cache = registry.load("Address Book").unwrap();
    let alice = cache.get(1).unwrap();
    cache.delete(&alice).unwrap();
    assert!(cache.get(1).is_none());
    assert_eq!(mock.records("Address Book"), vec![(2, b"bob".to_vec())]);
    let Err(err) = cache.delete(&alice) else {
        panic!("deleting twice should fail");
    };
    assert_eq!(*err, ErrorKind::StaleEntry(1));
}

#[test]
fn test_read_only_is_distinguishable() {
    let mock = device();
    let registry = CacheRegistry::new(connect(&mock)).unwrap();
    let cache = registry.load("Service Book").unwrap();
    let entry = cache.get(5).unwrap();
    for result in [
        cache.add(Record::new("", 0, 0, vec![])).map(|_| ()),
        cache.overwrite(&entry, Record::new("", 0, 0, vec![])).map(|_| ()),
        cache.delete(&entry),
    ] {
        let err = result.unwrap_err();
        assert_eq!(*err, ErrorKind::ReadOnly("Service Book".to_string()));
    }
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_prefill_loads_and_skips_unknown() {
    let mock = device();
    let registry = Arc::new(CacheRegistry::new(connect(&mock)).unwrap());
    let names = vec!["Memos".to_string(), "Calendar".to_string(), "Tasks".to_string()];
    let job = PrefillJob::spawn(Arc::clone(&registry), names, CancelToken::new()).unwrap();
    assert_eq!(job.join().unwrap(), vec!["Memos".to_string(), "Tasks".to_string()]);
    assert!(registry.get("Tasks").is_some());
}

#[test]
fn test_prefill_abort_joins() {
    let mock = device().with_read_delay(Duration::from_millis(20));
    let registry = Arc::new(CacheRegistry::new(connect(&mock)).unwrap());
    let names = vec!["Address Book".to_string(), "Memos".to_string(), "Tasks".to_string()];
    let job = PrefillJob::spawn(Arc::clone(&registry), names, CancelToken::new()).unwrap();
    let loaded = job.abort().unwrap();
    assert!(loaded.len() < 3);
    // The worker is gone: the device is free.
    assert!(registry.device().try_acquire().is_some());
    assert_eq!(registry.loaded().len(), loaded.len());
}
