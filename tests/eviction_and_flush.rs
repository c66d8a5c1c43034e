//! Write-back cache behavior of the outpoints repository: capacity bounds,
//! eviction flushes, explicit checkpoints, and the dirty/clean delete
//! asymmetry on removal.

use indexd::address::script_for_address;
use indexd::types::OutPointData;
use indexd::OutpointsRepository;
use tempfile::TempDir;

fn open_db() -> (TempDir, sled::Db) {
    let dir = TempDir::new().expect("temp dir");
    let db = sled::open(dir.path().join("db")).expect("open sled");
    (dir, db)
}

fn outpoint_data(n: u64, address: &str, money: u64) -> OutPointData {
    OutPointData {
        outpoint: format!("{:064x}:0", n),
        script_pubkey: script_for_address(address),
        money,
    }
}

#[test]
fn test_cache_capacity_never_exceeded() {
    let (_dir, db) = open_db();
    let repo = OutpointsRepository::new(&db, 5).unwrap();

    for n in 0..50u64 {
        repo.add_out_point_data(outpoint_data(n, "IDX1alice0000", n + 1))
            .unwrap();
        assert!(repo.cache_len() <= 5);
    }
    assert_eq!(repo.cache_len(), 5);
    assert_eq!(repo.stats().evictions, 45);
}

#[test]
fn test_no_data_loss_on_eviction() {
    let (_dir, db) = open_db();
    let repo = OutpointsRepository::new(&db, 5).unwrap();

    // More distinct outpoints than the cache can hold.
    for n in 0..20u64 {
        repo.add_out_point_data(outpoint_data(n, "IDX1alice0000", n + 1))
            .unwrap();
    }

    // Every one must still be retrievable: some from cache, the rest from
    // the durable store.
    for n in 0..20u64 {
        let expected = outpoint_data(n, "IDX1alice0000", n + 1);
        let got = repo
            .try_get_out_point_data(&expected.outpoint)
            .unwrap()
            .expect("outpoint lost");
        assert_eq!(got, expected);
    }
}

#[test]
fn test_lru_scenario_with_capacity_two() {
    let (_dir, db) = open_db();
    let repo = OutpointsRepository::new(&db, 2).unwrap();

    let a = outpoint_data(0xa, "IDX1alice0000", 10);
    let b = outpoint_data(0xb, "IDX1bob000000", 20);
    let c = outpoint_data(0xc, "IDX1carol0000", 30);

    repo.add_out_point_data(a.clone()).unwrap();
    repo.add_out_point_data(b.clone()).unwrap();
    repo.add_out_point_data(c.clone()).unwrap();

    // A was least-recently-used: evicted and flushed durably.
    assert_eq!(repo.cache_len(), 2);
    assert!(repo.is_persisted(&a.outpoint).unwrap());
    assert!(!repo.is_persisted(&b.outpoint).unwrap());
    assert!(!repo.is_persisted(&c.outpoint).unwrap());

    // Durable fallback returns the original value.
    let got = repo.try_get_out_point_data(&a.outpoint).unwrap().unwrap();
    assert_eq!(got, a);
}

#[test]
fn test_save_all_items_checkpoints_without_evicting() {
    let (_dir, db) = open_db();
    let repo = OutpointsRepository::new(&db, 10).unwrap();

    for n in 0..3u64 {
        repo.add_out_point_data(outpoint_data(n, "IDX1alice0000", n + 1))
            .unwrap();
    }
    assert_eq!(repo.save_all_items().unwrap(), 3);

    // Entries stay resident and are now durable.
    assert_eq!(repo.cache_len(), 3);
    for n in 0..3u64 {
        assert!(repo
            .is_persisted(&outpoint_data(n, "IDX1alice0000", 0).outpoint)
            .unwrap());
    }

    // Nothing dirty remains.
    assert_eq!(repo.save_all_items().unwrap(), 0);
}

#[test]
fn test_dirty_removal_skips_durable_delete() {
    let (_dir, db) = open_db();
    let repo = OutpointsRepository::new(&db, 10).unwrap();

    // Dirty entry: never persisted, so removal only drops it from memory.
    let x = outpoint_data(1, "IDX1alice0000", 42);
    repo.add_out_point_data(x.clone()).unwrap();
    assert!(!repo.is_persisted(&x.outpoint).unwrap());

    let removed = repo.remove_out_point_data(&x.outpoint).unwrap();
    assert_eq!(removed, Some(x.clone()));
    assert!(!repo.is_persisted(&x.outpoint).unwrap());
    assert!(repo.try_get_out_point_data(&x.outpoint).unwrap().is_none());
}

#[test]
fn test_clean_removal_deletes_durable_record() {
    let (_dir, db) = open_db();
    let repo = OutpointsRepository::new(&db, 10).unwrap();

    let y = outpoint_data(2, "IDX1bob000000", 7);
    repo.add_out_point_data(y.clone()).unwrap();
    repo.save_all_items().unwrap();
    assert!(repo.is_persisted(&y.outpoint).unwrap());

    // Clean entry is known to exist on disk: removal must delete it there.
    let removed = repo.remove_out_point_data(&y.outpoint).unwrap();
    assert_eq!(removed, Some(y.clone()));
    assert!(!repo.is_persisted(&y.outpoint).unwrap());
    assert!(repo.try_get_out_point_data(&y.outpoint).unwrap().is_none());
}

#[test]
fn test_removal_of_evicted_record_deletes_durable_copy() {
    let (_dir, db) = open_db();
    let repo = OutpointsRepository::new(&db, 2).unwrap();

    let a = outpoint_data(0xa, "IDX1alice0000", 10);
    repo.add_out_point_data(a.clone()).unwrap();
    repo.add_out_point_data(outpoint_data(0xb, "IDX1bob000000", 20))
        .unwrap();
    repo.add_out_point_data(outpoint_data(0xc, "IDX1carol0000", 30))
        .unwrap();

    // A lives only on disk now; removing it must reach the durable store.
    assert!(repo.is_persisted(&a.outpoint).unwrap());
    let removed = repo.remove_out_point_data(&a.outpoint).unwrap();
    assert_eq!(removed, Some(a.clone()));
    assert!(!repo.is_persisted(&a.outpoint).unwrap());
}

#[test]
fn test_removal_of_absent_key_is_a_noop() {
    let (_dir, db) = open_db();
    let repo = OutpointsRepository::new(&db, 10).unwrap();

    assert_eq!(repo.remove_out_point_data("deadbeef:0").unwrap(), None);
}

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("db");
    let x = outpoint_data(9, "IDX1alice0000", 123);

    {
        let db = sled::open(&path).unwrap();
        let repo = OutpointsRepository::new(&db, 10).unwrap();
        repo.add_out_point_data(x.clone()).unwrap();
        repo.save_all_items().unwrap();
        db.flush().unwrap();
    }

    let db = sled::open(&path).unwrap();
    let repo = OutpointsRepository::new(&db, 10).unwrap();
    let got = repo.try_get_out_point_data(&x.outpoint).unwrap().unwrap();
    assert_eq!(got, x);
}

#[test]
fn test_load_percentage() {
    let (_dir, db) = open_db();
    let repo = OutpointsRepository::new(&db, 200).unwrap();

    for n in 0..50u64 {
        repo.add_out_point_data(outpoint_data(n, "IDX1alice0000", 1))
            .unwrap();
    }
    assert!((repo.get_load_percentage() - 25.0).abs() < f64::EPSILON);
}
