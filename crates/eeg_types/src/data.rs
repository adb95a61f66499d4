//! Sample windows pulled from an acquisition source

/// The most recent samples of every board row, oldest first.
///
/// Rows are indexed by the board's row index, so EEG channel indices reported by
/// the device can be used directly. Non-EEG rows (counters, markers) are kept so
/// the indices stay aligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleWindow {
    rows: Vec<Vec<f64>>,
}

impl SampleWindow {
    pub fn new(rows: Vec<Vec<f64>>) -> Self {
        Self { rows }
    }

    /// Number of samples in the window. A ragged window reports its shortest row.
    pub fn sample_count(&self) -> usize {
        self.rows.iter().map(Vec::len).min().unwrap_or(0)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Samples of a single board row, if the row exists.
    pub fn channel(&self, index: usize) -> Option<&[f64]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }
}
