use std::collections::HashMap;
use std::sync::Barrier;

use datafusion::common::ScalarValue;
use ferry_common::config::CodeTableSettings;
use ferry_common::RequestId;
use ferry_runtime::{CacheKey, CacheState, CodeTableCache};
use proptest::prelude::*;

fn status_codes() -> CacheKey {
    CacheKey::new("StatusCodes", "label", "id", "erp", "1")
}

#[test]
fn test_concurrent_probes_start_one_load() {
    const REQUESTS: u64 = 16;
    let cache = CodeTableCache::new(CodeTableSettings::default());
    let key = status_codes();
    let barrier = Barrier::new(REQUESTS as usize);

    let states: Vec<CacheState> = std::thread::scope(|scope| {
        let handles: Vec<_> = (1..=REQUESTS)
            .map(|requester| {
                let (cache, key, barrier) = (&cache, &key, &barrier);
                scope.spawn(move || {
                    barrier.wait();
                    cache.probe(key, RequestId(requester)).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let primaries = states.iter().filter(|s| **s == CacheState::NotExist).count();
    let joined = states.iter().filter(|s| **s == CacheState::Loading).count();
    assert_eq!(primaries, 1);
    assert_eq!(joined, REQUESTS as usize - 1);
    assert_eq!(cache.stats().loading, 1);

    // Whoever won can begin; the waiting set holds every requester exactly once.
    let (primary, load) = (1..=REQUESTS)
        .map(RequestId)
        .find_map(|r| cache.begin_load(&key, r).ok().map(|load| (r, load)))
        .unwrap();
    let waiters = cache.complete_load(&load);
    assert_eq!(waiters.primary(), Some(primary));
    assert_eq!(waiters.len(), REQUESTS as usize);
    for requester in 1..=REQUESTS {
        assert!(waiters.contains(RequestId(requester)));
    }
}

#[test]
fn test_repeat_probe_does_not_duplicate_waiter() {
    let cache = CodeTableCache::new(CodeTableSettings::default());
    let key = status_codes();
    assert_eq!(cache.probe(&key, RequestId(1)).unwrap(), CacheState::NotExist);
    let load = cache.begin_load(&key, RequestId(1)).unwrap();

    for _ in 0..3 {
        assert_eq!(cache.probe(&key, RequestId(1)).unwrap(), CacheState::Loading);
        assert_eq!(cache.probe(&key, RequestId(2)).unwrap(), CacheState::Loading);
    }
    let waiters = cache.complete_load(&load);
    assert_eq!(waiters.iter().collect::<Vec<_>>(), vec![RequestId(1), RequestId(2)]);
}

#[test]
fn test_distinct_columns_are_distinct_tables() {
    let cache = CodeTableCache::new(CodeTableSettings::default());
    let by_label = CacheKey::new("StatusCodes", "label", "id", "erp", "1");
    let by_sort = CacheKey::new("StatusCodes", "sort", "id", "erp", "1");
    let other_version = CacheKey::new("StatusCodes", "label", "id", "erp", "2");

    for key in [&by_label, &by_sort, &other_version] {
        assert_eq!(cache.probe(key, RequestId(1)).unwrap(), CacheState::NotExist);
    }
    assert_eq!(cache.stats().loading, 3);
}

proptest! {
    #[test]
    fn loaded_table_answers_last_write(
        batches in prop::collection::vec(
            prop::collection::vec((0i64..20, "[a-z]{1,6}"), 0..10),
            1..5,
        ),
        probes in prop::collection::vec(0i64..25, 1..20),
    ) {
        let cache = CodeTableCache::new(CodeTableSettings::default());
        let key = status_codes();
        prop_assert_eq!(cache.probe(&key, RequestId(1)).unwrap(), CacheState::NotExist);
        let load = cache.begin_load(&key, RequestId(1)).unwrap();

        let mut expected = HashMap::new();
        for batch in &batches {
            let pairs: Vec<_> = batch
                .iter()
                .map(|(k, v)| (ScalarValue::Int64(Some(*k)), ScalarValue::from(v.as_str())))
                .collect();
            cache.append_rows(&load, pairs).unwrap();
            for (k, v) in batch {
                expected.insert(*k, v.clone());
            }
        }
        cache.complete_load(&load);

        for k in probes {
            let found = cache.get(&key, &ScalarValue::Int64(Some(k))).unwrap();
            prop_assert_eq!(found, expected.get(&k).map(|v| ScalarValue::from(v.as_str())));
        }
    }
}
