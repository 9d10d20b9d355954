//! Merging per-worker histograms into a run result.

use pacebench_core::{HistogramConfig, LatencyHistogram, RunHistogram};
use quickcheck::quickcheck;
use std::time::{Duration, SystemTime};

fn histogram(values: &[u32]) -> LatencyHistogram {
    let mut h = HistogramConfig::default().build().unwrap();
    for v in values {
        h.record(*v as u64);
    }
    h
}

fn merged(order: [&LatencyHistogram; 3]) -> RunHistogram {
    let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
    RunHistogram::merge_all(
        HistogramConfig::default(),
        start,
        start + Duration::from_secs(1),
        order,
    )
    .unwrap()
}

quickcheck! {
    fn merge_order_does_not_matter(a: Vec<u32>, b: Vec<u32>, c: Vec<u32>) -> bool {
        let (a, b, c) = (histogram(&a), histogram(&b), histogram(&c));
        let reference = merged([&a, &b, &c]);
        let reference_table = reference.percentile_distribution(5);

        let orders = [
            [&a, &c, &b],
            [&b, &a, &c],
            [&b, &c, &a],
            [&c, &a, &b],
            [&c, &b, &a],
        ];
        let same = orders.into_iter().all(|order| {
            let m = merged(order);
            m.histogram().len() == reference.histogram().len()
                && m.histogram().max() == reference.histogram().max()
                && m.percentile_distribution(5) == reference_table
        });
        same
    }

    fn merged_count_is_sum_of_parts(a: Vec<u32>, b: Vec<u32>) -> bool {
        let (ha, hb) = (histogram(&a), histogram(&b));
        let empty = histogram(&[]);
        let m = merged([&ha, &hb, &empty]);
        m.histogram().len() == (a.len() + b.len()) as u64
    }
}

#[test]
fn merged_percentiles_cover_both_workers() {
    // one fast and one slow worker.
    let fast = histogram(&[1_000; 99]);
    let slow = histogram(&[1_000_000; 1]);
    let empty = histogram(&[]);
    let m = merged([&fast, &slow, &empty]);

    let h = m.histogram();
    assert_eq!(h.len(), 100);
    assert_eq!(h.value_at_quantile(0.5), 1_000);
    assert!(h.value_at_quantile(1.0).abs_diff(1_000_000) <= 1_000);
}
