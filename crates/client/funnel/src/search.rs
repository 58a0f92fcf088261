use std::future::Future;

/// Finds the last position in `[lowest, latest]` whose timestamp is at or before `target`, or `None` if every
/// position is after it.
///
/// Auxiliary networks are read by time: this is how a main chain timestamp is mapped to a position on another
/// network. Block timestamps must be non-decreasing.
pub async fn find_block_at_or_before<E, Fut: Future<Output = Result<u64, E>>>(
    lowest: u64,
    latest: u64,
    mut get_block_timestamp: impl FnMut(u64) -> Fut,
    target: u64,
) -> Result<Option<u64>, E> {
    // We try to keep the number of calls low, auxiliary nodes are often public endpoints with rate limits.
    // Most lookups target recent positions, hence the exponential search down from the tip.
    if latest <= lowest {
        return Ok((get_block_timestamp(lowest).await? <= target).then_some(lowest));
    }
    if get_block_timestamp(latest).await? <= target {
        return Ok(Some(latest));
    }

    // Find lower bound by exponential search. Invariant: ts(high) > target.
    let mut high = latest;
    let mut step = 1u64;
    let low = loop {
        let candidate = high.saturating_sub(step).max(lowest);
        if get_block_timestamp(candidate).await? <= target {
            break candidate;
        }
        if candidate == lowest {
            return Ok(None);
        }
        high = candidate;
        step = step.saturating_mul(2); // Double step size
    };

    // Binary search for exact answer. Invariant: ts(left) <= target < ts(right).
    let (mut left, mut right) = (low, high);
    while right - left > 1 {
        let mid = left + (right - left) / 2;
        if get_block_timestamp(mid).await? <= target {
            left = mid;
        } else {
            right = mid;
        }
    }

    Ok(Some(left))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::{cell::Cell, collections::HashMap};

    struct TestCase {
        block_timestamps: HashMap<u64, u64>,
        lowest: u64,
        latest: u64,
    }

    impl TestCase {
        fn with_regular_blocks(lowest: u64, latest: u64, block_time_secs: u64, latest_timestamp: u64) -> Self {
            let block_timestamps =
                (lowest..=latest).map(|n| (n, latest_timestamp - (latest - n) * block_time_secs)).collect();
            TestCase { block_timestamps, lowest, latest }
        }

        fn with_custom_timestamps(timestamps: Vec<(u64, u64)>) -> Self {
            let lowest = timestamps.iter().map(|(n, _)| *n).min().unwrap();
            let latest = timestamps.iter().map(|(n, _)| *n).max().unwrap();
            TestCase { block_timestamps: timestamps.into_iter().collect(), lowest, latest }
        }

        async fn run(&self, target: u64) -> (Option<u64>, usize) {
            let calls = Cell::new(0);
            let res = find_block_at_or_before(
                self.lowest,
                self.latest,
                |n| {
                    calls.set(calls.get() + 1);
                    let ts = self.block_timestamps[&n];
                    async move { Ok::<_, ()>(ts) }
                },
                target,
            )
            .await
            .expect("Test should succeed");
            (res, calls.get())
        }

        /// Reference answer by linear scan.
        fn expected(&self, target: u64) -> Option<u64> {
            (self.lowest..=self.latest).rev().find(|n| self.block_timestamps[n] <= target)
        }
    }

    #[rstest]
    #[case(1_000)] // before everything
    #[case(1_600)] // exactly on a block
    #[case(1_605)] // between two blocks
    #[case(10_000)] // after the tip
    #[tokio::test]
    async fn matches_linear_scan(#[case] target: u64) {
        let case = TestCase::with_regular_blocks(100, 400, 12, 1_000 + 300 * 12);
        let (res, _) = case.run(target).await;
        assert_eq!(res, case.expected(target));
    }

    #[tokio::test]
    async fn same_timestamps_pick_the_last_block() {
        let case = TestCase::with_custom_timestamps(vec![(0, 10), (1, 20), (2, 20), (3, 20), (4, 30), (5, 40)]);
        assert_eq!(case.run(20).await.0, Some(3));
        assert_eq!(case.run(25).await.0, Some(3));
        assert_eq!(case.run(9).await.0, None);
    }

    #[tokio::test]
    async fn recent_targets_are_cheap() {
        let case = TestCase::with_regular_blocks(0, 1_000_000, 2, 3_000_000);
        let target = 3_000_000 - 2 * 50;
        let (res, calls) = case.run(target).await;
        assert_eq!(res, Some(1_000_000 - 50));
        assert!(calls < 20, "{calls} calls");
    }

    #[tokio::test]
    async fn single_position() {
        let case = TestCase::with_custom_timestamps(vec![(7, 100)]);
        assert_eq!(case.run(100).await.0, Some(7));
        assert_eq!(case.run(99).await.0, None);
    }
}
