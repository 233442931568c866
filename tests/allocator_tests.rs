use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use rb_free_list_allocator::{Allocator, HEADER_SIZE};

fn h() -> i32 {
    HEADER_SIZE as i32
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn s1_exhaustion() {
    init_logging();
    let mut a = Allocator::create(1024);
    let p1 = a.allocate(100, 1).expect("first allocation should fit");
    assert!(a.allocate(900, 1).is_none(), "remaining free space is too small for 900 bytes plus a header");
    a.free(p1, 100);
    assert_eq!(a.total_tracked_size(), 1024);
    assert!(a.trees_are_valid());
}

#[test]
fn s2_split_and_rejoin() {
    let mut a = Allocator::create(1024);
    let p1 = a.allocate(200, 1).unwrap();
    let p2 = a.allocate(200, 1).unwrap();
    a.free(p1, 200);
    assert_eq!(a.total_tracked_size(), 1024);
    assert!(a.trees_are_valid());
    a.free(p2, 200);
    assert_eq!(a.total_tracked_size(), 1024);
    assert!(a.trees_are_valid());
}

#[test]
fn s3_aligned_allocation() {
    let mut a = Allocator::create(1024);
    let p = a.allocate(64, 64).expect("aligned allocation should succeed");
    assert_eq!(p as usize % 64, 0);
    assert!(a.trees_are_valid());
}

#[test]
fn s4_residue_rejection() {
    let capacity = h() as u32 + 100 + (h() as u32 - 1);
    let mut a = Allocator::create(capacity);
    assert!(
        a.allocate(100, 1).is_none(),
        "a residue of header_size - 1 bytes must be rejected, leaving no alternative chunk"
    );
}

#[test]
fn s5_perfect_fit() {
    let capacity = h() as u32 + 100;
    let mut a = Allocator::create(capacity);
    let p = a.allocate(100, 1).expect("perfect-fit allocation should succeed");
    assert!(!p.is_null());
    assert!(a.allocate(1, 1).is_none(), "free tree should be empty after a perfect fit");
}

#[test]
fn s6_invalid_free() {
    let capacity = h() as u32 + 100;
    let mut a = Allocator::create(capacity);
    let before = a.total_tracked_size();
    let bogus = 0xdead_beefusize as *mut u8;
    a.free(bogus, 100);
    assert_eq!(a.total_tracked_size(), before);
    assert!(a.trees_are_valid());
}

#[test]
fn partition_invariant_holds_across_operations() {
    let mut a = Allocator::create(4096);
    let mut live = vec![];
    for size in [50, 64, 128, 32, 200] {
        if let Some(p) = a.allocate(size, 1) {
            live.push((p, size));
        }
        assert_eq!(a.total_tracked_size(), 4096);
        assert!(a.trees_are_valid());
    }
    for (p, size) in live {
        a.free(p, size);
        assert_eq!(a.total_tracked_size(), 4096);
        assert!(a.trees_are_valid());
    }
}

#[test]
fn residue_viability_never_in_dead_zone() {
    // No chunk should ever end up with 1..=HEADER_SIZE bytes: split only
    // happens when the leftover can host a future header.
    let mut a = Allocator::create(2048);
    let mut rng = thread_rng();
    let mut live = vec![];
    for _ in 0..30 {
        let size = rng.gen_range(1, 96);
        if let Some(p) = a.allocate(size, 1) {
            live.push((p, size));
        }
    }
    live.shuffle(&mut rng);
    for (p, size) in live {
        a.free(p, size);
    }
    assert_eq!(a.total_tracked_size(), 2048);
}

#[test]
fn round_trip_allocate_then_free_restores_pool() {
    let mut a = Allocator::create(1024);
    let p = a.allocate(64, 1).unwrap();
    assert_eq!(a.total_tracked_size(), 1024);
    a.free(p, 64);
    assert_eq!(a.total_tracked_size(), 1024);
    assert!(a.trees_are_valid());
}

#[test]
fn double_free_is_a_noop_the_second_time() {
    let mut a = Allocator::create(1024);
    let p = a.allocate(64, 1).unwrap();
    assert!(a.try_free(p, 64).is_ok());
    assert!(a.try_free(p, 64).is_err());
}

#[test]
fn three_equal_size_allocations_are_all_freeable() {
    // Three allocations of the same size can land as three equal-chunk_size
    // nodes in the allocated tree. A duplicate-key node can end up in the
    // *left* subtree of another node with the same chunk_size once
    // fix_insert rotates, so a lookup that only ever descends right past a
    // size match would miss one of them and silently fail to free it.
    let mut a = Allocator::create(4096);
    let pa = a.allocate(64, 1).expect("A should allocate");
    let pb = a.allocate(64, 1).expect("B should allocate");
    let pc = a.allocate(64, 1).expect("C should allocate");
    assert!(a.trees_are_valid());

    assert!(a.try_free(pa, 64).is_ok(), "A must be freeable");
    assert!(a.try_free(pb, 64).is_ok(), "B must be freeable");
    assert!(a.try_free(pc, 64).is_ok(), "C must be freeable");

    assert_eq!(a.total_tracked_size(), 4096);
    assert!(a.trees_are_valid());
}
