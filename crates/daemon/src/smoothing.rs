/// One exponential moving average step: `factor * raw + (1 - factor) * previous`.
pub fn update_ema(previous: f64, raw: f64, factor: f64) -> f64 {
    factor * raw + (1.0 - factor) * previous
}
