// src/index/numeric.rs
//
// Row-wise kernels over nullable float columns. `None` is a missing value.

/// Fractional rank of every present value: average rank for ties, divided by
/// the number of present values. Missing values stay missing and are not counted.
pub fn percentile_rank(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut present: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|x| (i, x)))
        .collect();
    present.sort_by(|a, b| a.1.total_cmp(&b.1));

    let n = present.len() as f64;
    let mut out = vec![None; values.len()];
    let mut start = 0;
    while start < present.len() {
        let mut end = start;
        while end + 1 < present.len() && present[end + 1].1 == present[start].1 {
            end += 1;
        }
        // 1-based ranks start+1 ..= end+1, averaged
        let avg = (start + end + 2) as f64 / 2.0;
        for &(row, _) in &present[start..=end] {
            out[row] = Some(avg / n);
        }
        start = end + 1;
    }
    out
}

/// `1 - r` for every present rank.
pub fn invert(ranks: &[Option<f64>]) -> Vec<Option<f64>> {
    ranks.iter().map(|r| r.map(|r| 1.0 - r)).collect()
}

/// Sum across `columns` row by row, skipping missing values. A row with
/// nothing present sums to zero.
pub fn row_sum(columns: &[Vec<Option<f64>>], rows: usize) -> Vec<Option<f64>> {
    (0..rows)
        .map(|row| {
            Some(
                columns
                    .iter()
                    .filter_map(|col| col.get(row).copied().flatten())
                    .sum::<f64>(),
            )
        })
        .collect()
}

/// `total / denominator * 100`. Missing when either side is missing or the
/// denominator is zero.
pub fn percentage(totals: &[Option<f64>], denominators: &[Option<f64>]) -> Vec<Option<f64>> {
    totals
        .iter()
        .zip(denominators)
        .map(|(t, d)| match (t, d) {
            (Some(t), Some(d)) if *d != 0.0 => Some(t / d * 100.0),
            _ => None,
        })
        .collect()
}
