//! End-to-end scenarios exercising the allocator the way a caller actually
//! strings operations together: alloc/free/iterate, freeze/mutate/snapshot,
//! batch remove, head-remove-then-reinsert, and an elastic cursor surviving
//! compaction underneath it.

use std::collections::HashSet;

use tuple_chunks::{
    CompactingChunks, Direction, ElasticIter, HookedCompactingChunks, RetentionPolicy,
    SnapshotIter, TxnIter, TxnPreHook,
};

const TUPLE_SIZE: usize = 16;
const ALLOCS_PER_CHUNK: usize = 32;

fn gen(i: u64) -> [u8; TUPLE_SIZE] {
    let mut buf = [0u8; TUPLE_SIZE];
    buf[..8].copy_from_slice(&i.to_le_bytes());
    buf
}

unsafe fn write_val(addr: *mut u8, v: u64) {
    unsafe { std::ptr::copy_nonoverlapping(gen(v).as_ptr(), addr, TUPLE_SIZE) };
}

unsafe fn read_val(addr: *const u8) -> u64 {
    let mut buf = [0u8; 8];
    unsafe { std::ptr::copy_nonoverlapping(addr, buf.as_mut_ptr(), 8) };
    u64::from_le_bytes(buf)
}

fn txn_values(chunks: &CompactingChunks) -> Vec<u64> {
    TxnIter::all(chunks)
        .map(|addr| unsafe { read_val(addr) })
        .collect()
}

#[test]
fn scenario_a_basic_alloc_free_iterate() {
    const N: u64 = 512;
    let mut chunks = CompactingChunks::new(TUPLE_SIZE);
    let mut addrs = Vec::new();
    for i in 0..N {
        let addr = chunks.allocate();
        unsafe { write_val(addr, i) };
        addrs.push(addr);
    }

    assert_eq!(txn_values(&chunks), (0..N).collect::<Vec<_>>());

    for addr in &addrs {
        chunks.free(addr.cast_const()).unwrap();
    }
    assert_eq!(chunks.size(), 0);
    assert!(txn_values(&chunks).is_empty());
}

#[test]
fn scenario_b_head_compaction_visibility() {
    let mut chunks = CompactingChunks::new(TUPLE_SIZE);
    let mut addrs = Vec::new();
    for i in 0..ALLOCS_PER_CHUNK as u64 {
        let addr = chunks.allocate();
        unsafe { write_val(addr, i) };
        addrs.push(addr);
    }

    chunks.free(addrs[5].cast_const()).unwrap();
    assert_eq!(chunks.size(), 31);

    let mut expected: Vec<u64> = (0..5).collect();
    expected.push(31);
    expected.extend(6..31);
    assert_eq!(txn_values(&chunks), expected);
}

#[test]
fn scenario_c_freeze_mutate_snapshot() {
    const N: u64 = 200;
    let mut hc = HookedCompactingChunks::new(TUPLE_SIZE, RetentionPolicy::Never);
    let mut addrs = Vec::new();
    for i in 0..N {
        let addr = hc.allocate();
        unsafe { write_val(addr, i) };
        addrs.push(addr);
    }

    hc.freeze().unwrap();

    // Update a run of tuples in place.
    for i in 10..40u64 {
        let dst = addrs[i as usize].cast_const();
        hc.update(dst);
        unsafe { write_val(dst.cast_mut(), i + 1000) };
    }

    // Delete two disjoint runs.
    let mut deleted: HashSet<u64> = HashSet::new();
    for i in (50..80u64).chain(170..190u64) {
        let dst = addrs[i as usize].cast_const();
        let before = unsafe { read_val(dst) };
        hc.remove(dst).unwrap();
        deleted.insert(before);
    }

    // Insert fresh tuples during the snapshot.
    for i in 0..50u64 {
        let addr = hc.allocate();
        unsafe { write_val(addr, N + i) };
    }

    // The const snapshot must still read exactly the pre-freeze values, in
    // order, regardless of every mutation performed above.
    let snapshot_values: Vec<u64> = SnapshotIter::read_only(hc.chunks(), hc.hook())
        .map(|addr| unsafe { read_val(addr) })
        .collect();
    assert_eq!(snapshot_values, (0..N).collect::<Vec<_>>());

    // The live (txn) view must contain exactly the surviving original
    // values (updated ones carry their new payload) plus the newly
    // inserted ones, with nothing duplicated or missing.
    let live: HashSet<u64> = txn_values(hc.chunks()).into_iter().collect();
    for i in 0..N {
        if deleted.contains(&i) {
            continue;
        }
        let expected = if (10..40).contains(&i) { i + 1000 } else { i };
        assert!(live.contains(&expected), "expected {expected} to be live");
    }
    for i in 0..50u64 {
        assert!(live.contains(&(N + i)));
    }
    assert_eq!(live.len(), live_len_after(N, &deleted, 50));

    hc.thaw().unwrap();
    assert_eq!(hc.chunks().size(), live.len());
}

fn live_len_after(n: u64, deleted: &HashSet<u64>, inserted: usize) -> usize {
    (n as usize - deleted.len()) + inserted
}

#[test]
fn scenario_d_batch_remove_across_chunks() {
    let total = 3 * ALLOCS_PER_CHUNK;
    let mut chunks = CompactingChunks::new(TUPLE_SIZE);
    let mut addrs = Vec::new();
    for i in 0..total as u64 {
        let addr = chunks.allocate();
        unsafe { write_val(addr, i) };
        addrs.push(addr);
    }
    chunks.freeze().unwrap();

    let mut targets = Vec::new();
    for chunk in 0..3 {
        let base = chunk * ALLOCS_PER_CHUNK;
        targets.extend(&addrs[base..base + 10]);
        targets.extend(&addrs[base + ALLOCS_PER_CHUNK - 10..base + ALLOCS_PER_CHUNK]);
    }
    assert_eq!(targets.len(), 60);

    chunks.remove_reserve(60).unwrap();
    for addr in &targets {
        chunks.remove_add(addr.cast_const()).unwrap();
    }
    let removed = chunks
        .remove_force(|pairs| {
            for &(dst, src) in pairs {
                unsafe { std::ptr::copy_nonoverlapping(src, dst.cast_mut(), TUPLE_SIZE) };
            }
        })
        .unwrap();
    assert_eq!(removed, 60);
    assert_eq!(chunks.size(), total - 60);

    // hook-free: no frozen pre-image map here, but the original snapshot
    // (pre-batch) addresses still resolve to the original bytes via the
    // frozen boundary, since `remove_force` only ever relocates survivors
    // within the frozen range.
    let hook = TxnPreHook::new(TUPLE_SIZE, RetentionPolicy::Never);
    let snapshot_values: Vec<u64> = SnapshotIter::read_only(&chunks, &hook)
        .map(|addr| unsafe { read_val(addr) })
        .collect();
    assert_eq!(snapshot_values, (0..total as u64).collect::<Vec<_>>());
}

#[test]
fn scenario_e_remove_from_head_then_reinsert() {
    const N: u64 = 200;
    let skip = ALLOCS_PER_CHUNK + 10;
    let mut chunks = CompactingChunks::new(TUPLE_SIZE);
    let mut addrs = Vec::new();
    for i in 0..N {
        let addr = chunks.allocate();
        unsafe { write_val(addr, i) };
        addrs.push(addr);
    }

    for addr in &addrs[..skip] {
        chunks.remove(Direction::FromHead, Some(addr.cast_const())).unwrap();
    }
    chunks.remove(Direction::FromHead, None).unwrap();

    assert_eq!(chunks.size() as u64, N - skip as u64);
    let values = txn_values(&chunks);
    assert_eq!(values[0], skip as u64);

    for i in 0..100u64 {
        let addr = chunks.allocate();
        unsafe { write_val(addr, N + i) };
    }
    let values = txn_values(&chunks);
    let tail = &values[values.len() - 100..];
    assert_eq!(tail, (N..N + 100).collect::<Vec<_>>().as_slice());
}

#[test]
fn scenario_f_elastic_iterator_survives_compaction() {
    const N: u64 = 200;
    let mut chunks = CompactingChunks::new(TUPLE_SIZE);
    let mut addrs = Vec::new();
    for i in 0..N {
        let addr = chunks.allocate();
        unsafe { write_val(addr, i) };
        addrs.push(addr);
    }

    let mut iter = ElasticIter::new(TUPLE_SIZE);
    let mut yielded = Vec::new();
    for _ in 0..(N as usize / 2) {
        if let Some(addr) = iter.advance(&chunks) {
            yielded.push(unsafe { read_val(addr) });
        }
    }

    let half = N as usize / 2;
    for addr in &addrs[half..half + ALLOCS_PER_CHUNK] {
        chunks.free(addr.cast_const()).unwrap();
    }

    while let Some(addr) = iter.advance(&chunks) {
        yielded.push(unsafe { read_val(addr) });
    }

    assert!(iter.is_drained());
    assert!(yielded.len() <= N as usize);
    assert!(!yielded.is_empty());
}
