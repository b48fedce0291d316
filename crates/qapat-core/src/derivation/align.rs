//! Temporal alignment of channels sampled at different rates.
//!
//! Policy: walk the merged timeline one timestamp at a time. After applying
//! every sample at that timestamp, if each channel has at least one sample at
//! or before it, emit one point made of the nearest-preceding value per
//! channel. Timestamps before every channel has reported are skipped.

use crate::domain::{ChannelSeries, Timestamp};

/// One aligned sample across all input channels, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedPoint {
    pub timestamp: Timestamp,
    pub values: Vec<f64>,
}

/// Align the numeric samples of `series`. Categorical samples are ignored.
pub fn align_numeric(series: &[ChannelSeries<'_>]) -> Vec<AlignedPoint> {
    let mut timeline: Vec<(Timestamp, u64, usize, f64)> = series
        .iter()
        .enumerate()
        .flat_map(|(idx, s)| {
            s.observations
                .iter()
                .filter_map(move |o| o.value.as_numeric().map(|v| (o.timestamp, o.seq, idx, v)))
        })
        .collect();
    timeline.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut latest: Vec<Option<f64>> = vec![None; series.len()];
    let mut points = Vec::new();
    let mut i = 0;
    while i < timeline.len() {
        let ts = timeline[i].0;
        while i < timeline.len() && timeline[i].0 == ts {
            let (_, _, idx, value) = timeline[i];
            latest[idx] = Some(value);
            i += 1;
        }
        if let Some(values) = latest.iter().copied().collect::<Option<Vec<f64>>>() {
            points.push(AlignedPoint {
                timestamp: ts,
                values,
            });
        }
    }
    points
}
