/// Exponential Moving Average over a full series.
///
/// Output has the same length as the input: `ema[0] = series[0]`, then
/// `ema[i] = (series[i] - ema[i-1]) * k + ema[i-1]` with
/// `k = 2 / (length + 1)`. Defined for `length >= 1`; callers wanting a
/// crossover comparison need at least two input values.
pub fn ema_series(series: &[f64], length: usize) -> Vec<f64> {
    debug_assert!(length >= 1);
    let mut out = Vec::with_capacity(series.len());
    let k = 2.0 / (length as f64 + 1.0);

    let mut prev = match series.first() {
        Some(&first) => first,
        None => return out,
    };
    out.push(prev);

    for &value in &series[1..] {
        prev = (value - prev) * k + prev;
        out.push(prev);
    }

    out
}
