use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use divelog_query::{
    compute, filter_records, DiveMetadata, DiveRecord, FilterSpec, RecordKey, StatKind,
    StatParams, Timeline,
};
use proptest::prelude::*;

fn record(index: usize, (depth, minutes, year, month, day): (f64, u32, i32, u32, u32)) -> Arc<DiveRecord> {
    let duration = f64::from(minutes * 60);
    let start = NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();
    Arc::new(
        DiveRecord::new(
            RecordKey(format!("dive-{}", index)),
            start,
            Timeline {
                depths: vec![0.0, depth, 0.0],
                temperatures: vec![20, 18, 20],
                n2_load: vec![0, 0, 0],
                cns_load: vec![0, 1, 1],
                timestamps: vec![0.0, duration / 2.0, duration],
            },
            DiveMetadata::default(),
        )
        .unwrap(),
    )
}

fn universe() -> impl Strategy<Value = Vec<Arc<DiveRecord>>> {
    proptest::collection::vec(
        (1.0f64..60.0, 1u32..120, 2010i32..2026, 1u32..=12, 1u32..=28),
        0..40,
    )
    .prop_map(|fields| {
        fields
            .into_iter()
            .enumerate()
            .map(|(index, fields)| record(index, fields))
            .collect()
    })
}

fn keys(records: &[Arc<DiveRecord>]) -> BTreeSet<RecordKey> {
    records.iter().map(|r| r.key().clone()).collect()
}

proptest! {
    #[test]
    fn filtering_only_narrows(
        records in universe(),
        depth in 0.0f64..60.0,
        minutes in 0.0f64..120.0,
    ) {
        let chain = [FilterSpec::DeeperThan(depth), FilterSpec::LongerThan(minutes * 60.0)];
        let filtered = filter_records(&records, &chain);
        prop_assert!(filtered.len() <= records.len());
        prop_assert!(keys(&filtered).is_subset(&keys(&records)));
    }

    #[test]
    fn conjunctive_filters_commute(
        records in universe(),
        depth in 0.0f64..60.0,
        minutes in 0.0f64..120.0,
    ) {
        let deeper = FilterSpec::DeeperThan(depth);
        let longer = FilterSpec::LongerThan(minutes * 60.0);
        let forward = filter_records(&records, &[deeper.clone(), longer.clone()]);
        let backward = filter_records(&records, &[longer, deeper]);
        prop_assert_eq!(keys(&forward), keys(&backward));
    }

    #[test]
    fn year_breakdown_sums_to_total(records in universe()) {
        let result = compute(StatKind::DivesByYear, &records, &StatParams::default()).unwrap();
        let summed: f64 = result
            .breakdown
            .unwrap_or_default()
            .iter()
            .map(|entry| entry.value)
            .sum();
        prop_assert_eq!(summed as usize, records.len());
    }
}
