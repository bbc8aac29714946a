//! Unit tests for offset and cursor pagination

use backlog_backup::client::pagination::{paginate_cursor, paginate_offset};
use backlog_backup::client::{FetcherError, FetcherResult};
use std::sync::{Arc, Mutex};

/// Records the arguments of every page request
#[derive(Clone, Default)]
struct FetchTracker {
    calls: Arc<Mutex<Vec<(Option<u64>, usize)>>>,
}

impl FetchTracker {
    fn record(&self, cursor: Option<u64>, count: usize) {
        self.calls.lock().unwrap().push((cursor, count));
    }

    fn calls(&self) -> Vec<(Option<u64>, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

#[tokio::test]
async fn test_offset_pages_concatenate_in_order() {
    let source: Vec<u32> = (0..250).collect();
    let tracker = FetchTracker::default();

    let items = paginate_offset(100, |offset, count| {
        tracker.record(Some(offset as u64), count);
        let page: Vec<u32> = source.iter().skip(offset).take(count).copied().collect();
        async move { Ok::<_, FetcherError>(page) }
    })
    .await
    .unwrap();

    assert_eq!(items, source);
    assert_eq!(
        tracker.calls(),
        vec![(Some(0), 100), (Some(100), 100), (Some(200), 100)]
    );
}

#[tokio::test]
async fn test_offset_empty_listing() {
    let items: Vec<u32> = paginate_offset(100, |_, _| async { Ok(Vec::new()) })
        .await
        .unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_offset_zero_page_size_is_treated_as_one() {
    let source = vec!["a", "b"];
    let items = paginate_offset(0, |offset, count| {
        assert_eq!(count, 1);
        let page: Vec<&str> = source.iter().skip(offset).take(count).copied().collect();
        async move { Ok::<_, FetcherError>(page) }
    })
    .await
    .unwrap();
    assert_eq!(items, source);
}

#[tokio::test]
async fn test_offset_error_on_later_page() {
    let result: FetcherResult<Vec<u32>> = paginate_offset(2, |offset, _| async move {
        if offset == 0 {
            Ok(vec![1, 2])
        } else {
            Err(FetcherError::RateLimitExceeded { attempts: 6 })
        }
    })
    .await;
    assert_eq!(result, Err(FetcherError::RateLimitExceeded { attempts: 6 }));
}

#[tokio::test]
async fn test_cursor_follows_last_item() {
    let source: Vec<u64> = (1..=7).collect();
    let tracker = FetchTracker::default();

    let items = paginate_cursor(
        3,
        |item: &u64| Some(*item),
        |after: Option<u64>, count| {
            tracker.record(after, count);
            let page: Vec<u64> = source
                .iter()
                .filter(|id| after.map_or(true, |a| **id > a))
                .take(count)
                .copied()
                .collect();
            async move { Ok::<_, FetcherError>(page) }
        },
    )
    .await
    .unwrap();

    assert_eq!(items, source);
    assert_eq!(tracker.calls(), vec![(None, 3), (Some(3), 3), (Some(6), 3)]);
}

#[tokio::test]
async fn test_cursor_requires_cursor_on_full_page() {
    let result = paginate_cursor(
        2,
        |_: &u64| None::<u64>,
        |_, _| async { Ok::<_, FetcherError>(vec![1, 2]) },
    )
    .await;
    assert!(matches!(result, Err(FetcherError::Parse(_))));
}
