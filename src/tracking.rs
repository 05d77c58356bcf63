//! Cleanup of DeepLabCut pose tables: head/tail swaps and jumps.
//!
//! Tables are read from and written to the DeepLabCut CSV layout: three
//! header rows (`scorer`, `bodyparts`, `coords`) followed by one row per
//! frame, each starting with the frame index. Cells that are not numbers
//! are read as NaN, and NaN is written as an empty cell.
use std::{
    fs::File,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Scale of the median absolute deviation to a Gaussian standard deviation.
pub const MAD_SCALE: f64 = 1.4826;

const HEADER_LABELS: [&str; 3] = ["scorer", "bodyparts", "coords"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoseColumn {
    pub scorer: String,
    pub bodypart: String,
    pub coord: String,
}

impl PoseColumn {
    pub fn new(scorer: &str, bodypart: &str, coord: &str) -> Self {
        Self {
            scorer: scorer.to_owned(),
            bodypart: bodypart.to_owned(),
            coord: coord.to_owned(),
        }
    }

    /// Header label at row `level`: scorer, body part, then coordinate.
    fn level(&self, level: usize) -> &str {
        match level {
            0 => &self.scorer,
            1 => &self.bodypart,
            _ => &self.coord,
        }
    }
}

/// Per-frame body part coordinates, stored column by column.
#[derive(Debug, Clone)]
pub struct PoseTable {
    columns: Vec<PoseColumn>,
    index: Vec<String>,
    data: Vec<Vec<f64>>,
}

fn parse_cell(cell: &str) -> f64 {
    cell.trim().parse().unwrap_or(f64::NAN)
}

impl PoseTable {
    /// Build a table from columns of equal length, indexed `0..n`.
    pub fn new(columns: Vec<PoseColumn>, data: Vec<Vec<f64>>) -> crate::Result<Self> {
        if columns.len() != data.len() {
            return Err(crate::Error::general(format!(
                "{} columns but {} data columns",
                columns.len(),
                data.len()
            )));
        }
        let frames = data.first().map_or(0, Vec::len);
        if data.iter().any(|d| d.len() != frames) {
            return Err(crate::Error::general("data columns differ in length"));
        }
        Ok(Self {
            columns,
            index: (0..frames).map(|i| i.to_string()).collect(),
            data,
        })
    }

    /// Read a DeepLabCut CSV table. A file without frames yields
    /// [crate::Error::EmptyInput].
    pub fn read_csv(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;
        let mut records = reader.records();

        let mut header_rows = Vec::with_capacity(3);
        for label in HEADER_LABELS {
            match records.next() {
                Some(record) => header_rows.push(record?),
                None if header_rows.is_empty() => {
                    return Err(crate::Error::EmptyInput(path.to_path_buf()));
                }
                None => {
                    return Err(crate::Error::general(format!(
                        "{} is missing the {label} header row",
                        path.display()
                    )));
                }
            }
        }
        let n_columns = header_rows[0].len().saturating_sub(1);
        if header_rows.iter().any(|r| r.len() != n_columns + 1) {
            return Err(crate::Error::general(format!(
                "header rows of {} differ in length",
                path.display()
            )));
        }
        let columns: Vec<PoseColumn> = (1..=n_columns)
            .map(|i| PoseColumn::new(&header_rows[0][i], &header_rows[1][i], &header_rows[2][i]))
            .collect();

        let mut index = Vec::new();
        let mut data = vec![Vec::new(); n_columns];
        for (row, record) in records.enumerate() {
            let record = record?;
            if record.len() != n_columns + 1 {
                return Err(crate::Error::general(format!(
                    "row {row} of {} has {} cells, expected {}",
                    path.display(),
                    record.len(),
                    n_columns + 1
                )));
            }
            index.push(record[0].to_owned());
            for (column, cell) in data.iter_mut().zip(record.iter().skip(1)) {
                column.push(parse_cell(cell));
            }
        }
        if index.is_empty() {
            return Err(crate::Error::EmptyInput(path.to_path_buf()));
        }
        log::debug!(
            "read {} frames of {} columns from {}",
            index.len(),
            n_columns,
            path.display()
        );
        Ok(Self {
            columns,
            index,
            data,
        })
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path.as_ref())?;
        for (level, label) in HEADER_LABELS.iter().enumerate() {
            let mut row = vec![label.to_string()];
            row.extend(self.columns.iter().map(|c| c.level(level).to_owned()));
            writer.write_record(&row)?;
        }
        for (frame, label) in self.index.iter().enumerate() {
            let mut row = vec![label.clone()];
            row.extend(self.data.iter().map(|column| {
                let v = column[frame];
                if v.is_nan() { String::new() } else { v.to_string() }
            }));
            writer.write_record(&row)?;
        }
        writer.flush()?;
        log::info!("Corrected CSV data saved to {}", path.as_ref().display());
        Ok(())
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn columns(&self) -> &[PoseColumn] {
        &self.columns
    }

    pub fn index(&self) -> &[String] {
        &self.index
    }

    /// Scorer of the first column.
    pub fn scorer(&self) -> Option<&str> {
        self.columns.first().map(|c| c.scorer.as_str())
    }

    /// Body part names in column order, without repeats.
    pub fn bodyparts(&self) -> Vec<&str> {
        let mut parts: Vec<&str> = Vec::new();
        for c in &self.columns {
            if !parts.contains(&c.bodypart.as_str()) {
                parts.push(&c.bodypart);
            }
        }
        parts
    }

    fn position(&self, bodypart: &str, coord: &str) -> crate::Result<usize> {
        self.columns
            .iter()
            .position(|c| c.bodypart == bodypart && c.coord == coord)
            .ok_or_else(|| crate::Error::general(format!("no column {bodypart}/{coord}")))
    }

    pub fn column(&self, bodypart: &str, coord: &str) -> crate::Result<&[f64]> {
        Ok(&self.data[self.position(bodypart, coord)?])
    }

    pub fn column_mut(&mut self, bodypart: &str, coord: &str) -> crate::Result<&mut Vec<f64>> {
        let i = self.position(bodypart, coord)?;
        Ok(&mut self.data[i])
    }

    pub fn get(&self, frame: usize, bodypart: &str, coord: &str) -> Option<f64> {
        let i = self.position(bodypart, coord).ok()?;
        self.data[i].get(frame).copied()
    }

    /// Exchange the values of columns `a` and `b` at `frame`.
    fn swap_values(&mut self, frame: usize, a: usize, b: usize) {
        let tmp = self.data[a][frame];
        self.data[a][frame] = self.data[b][frame];
        self.data[b][frame] = tmp;
    }
}

/// Mean of the non-NaN values, NaN if there are none.
fn nan_mean(values: &[f64]) -> f64 {
    let (sum, n) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { f64::NAN } else { sum / n as f64 }
}

/// Sample standard deviation of the non-NaN values, NaN below two values.
fn nan_std(values: &[f64]) -> f64 {
    let valid: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.len() < 2 {
        return f64::NAN;
    }
    let mean = valid.iter().sum::<f64>() / valid.len() as f64;
    let ss: f64 = valid.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / (valid.len() - 1) as f64).sqrt()
}

/// Median, NaN if any value is NaN.
fn median(values: &[f64]) -> f64 {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn distance(x0: f64, y0: f64, x1: f64, y1: f64) -> f64 {
    ((x0 - x1).powi(2) + (y0 - y1).powi(2)).sqrt()
}

/// Detect head/tail swaps against the average positions of neighbouring
/// frames and exchange head and tail x,y in those frames.
///
/// The neighbourhood of frame `f` is `f - window ..= f + window` without
/// `f` itself. All detection runs on the uncorrected data. Returns the
/// corrected frames.
pub fn correct_swaps_by_neighbour_average(
    table: &mut PoseTable,
    head: &str,
    tail: &str,
    window: usize,
    threshold: f64,
) -> crate::Result<Vec<usize>> {
    let hx = table.position(head, "x")?;
    let hy = table.position(head, "y")?;
    let tx = table.position(tail, "x")?;
    let ty = table.position(tail, "y")?;
    let n = table.len();

    let mut swaps = Vec::new();
    {
        let head_x = table.data[hx].as_slice();
        let head_y = table.data[hy].as_slice();
        let tail_x = table.data[tx].as_slice();
        let tail_y = table.data[ty].as_slice();
        let neighbour_mean = |values: &[f64], start: usize, frame: usize, end: usize| {
            let sum: f64 = values[start..frame].iter().sum::<f64>()
                + values[frame + 1..end].iter().sum::<f64>();
            sum / (end - start - 1) as f64
        };

        for frame in 0..n {
            let start = frame.saturating_sub(window);
            let end = n.min(frame + window + 1);
            if end - start < 2 {
                continue;
            }
            let avg_head_x = neighbour_mean(head_x, start, frame, end);
            let avg_head_y = neighbour_mean(head_y, start, frame, end);
            let avg_tail_x = neighbour_mean(tail_x, start, frame, end);
            let avg_tail_y = neighbour_mean(tail_y, start, frame, end);

            let (x_h, y_h, x_t, y_t) = (head_x[frame], head_y[frame], tail_x[frame], tail_y[frame]);
            let head_to_avg_head = distance(x_h, y_h, avg_head_x, avg_head_y);
            let tail_to_avg_tail = distance(x_t, y_t, avg_tail_x, avg_tail_y);
            let head_to_avg_tail = distance(x_h, y_h, avg_tail_x, avg_tail_y);
            let tail_to_avg_head = distance(x_t, y_t, avg_head_x, avg_head_y);

            if head_to_avg_tail < threshold
                && tail_to_avg_head < threshold
                && head_to_avg_tail < head_to_avg_head
                && tail_to_avg_head < tail_to_avg_tail
            {
                swaps.push(frame);
            }
        }
    }

    for &frame in &swaps {
        table.swap_values(frame, hx, tx);
        table.swap_values(frame, hy, ty);
    }
    log::info!("Number of swaps detected and corrected: {}", swaps.len());
    Ok(swaps)
}

/// Correct head coordinates against a trailing window of earlier frames.
///
/// The threshold is half the mean of the average absolute head/tail
/// distances in x and y. For each coordinate and frame, the window
/// `f - window ..= f` (including corrections already made) is the
/// reference if its sample standard deviation is below the threshold;
/// otherwise the current value is. Values further than the threshold from
/// the reference have head and tail exchanged for that coordinate.
/// Returns the threshold.
pub fn correct_head_with_dynamic_window(
    table: &mut PoseTable,
    head: &str,
    tail: &str,
    window: usize,
) -> crate::Result<f64> {
    let coords = [
        (table.position(head, "x")?, table.position(tail, "x")?),
        (table.position(head, "y")?, table.position(tail, "y")?),
    ];
    let mean_abs_diff = |(h, t): (usize, usize)| {
        let diffs: Vec<f64> = table.data[h]
            .iter()
            .zip(&table.data[t])
            .map(|(a, b)| (a - b).abs())
            .collect();
        nan_mean(&diffs)
    };
    let threshold = 0.5 * (mean_abs_diff(coords[0]) + mean_abs_diff(coords[1])) / 2.0;
    log::info!("Dynamic threshold: {threshold}");

    let mut swapped = 0;
    for (h, t) in coords {
        for frame in 0..table.len() {
            let start = frame.saturating_sub(window);
            let current = table.data[h][frame];
            let recent = &table.data[h][start..=frame];
            let reference = if nan_std(recent) < threshold {
                nan_mean(recent)
            } else {
                current
            };
            if (current - reference).abs() > threshold {
                table.swap_values(frame, h, t);
                swapped += 1;
            }
        }
    }
    log::debug!("exchanged {swapped} head/tail coordinates");
    Ok(threshold)
}

/// Replace outliers with the median of a centered window.
///
/// A value is an outlier when it is more than `n_sigmas` scaled median
/// absolute deviations from the window median. The window reaches
/// `(window - 1) / 2` values to each side and is clipped at the ends.
pub fn hampel_filter(data: &[f64], window: usize, n_sigmas: f64) -> Vec<f64> {
    let n = data.len();
    let half = window.saturating_sub(1) / 2;
    let mut filtered = data.to_vec();
    for i in 0..n {
        let start = i.saturating_sub(half);
        let end = n.min(i + half + 1);
        let values = &data[start..end];
        let med = median(values);
        let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
        let mad = MAD_SCALE * median(&deviations);
        if (data[i] - med).abs() > n_sigmas * mad {
            filtered[i] = med;
        }
    }
    filtered
}

/// Run [hampel_filter] over every `bodypart`/`coord` column.
pub fn correct_jumps(
    table: &mut PoseTable,
    bodyparts: &[&str],
    coords: &[&str],
    window: usize,
    n_sigmas: f64,
) -> crate::Result<()> {
    for bodypart in bodyparts {
        for coord in coords {
            let column = table.column_mut(bodypart, coord)?;
            let filtered = hampel_filter(column, window, n_sigmas);
            let changed = column
                .iter()
                .zip(&filtered)
                .filter(|(a, b)| a.to_bits() != b.to_bits())
                .count();
            *column = filtered;
            log::debug!("{bodypart}/{coord}: replaced {changed} outliers");
        }
    }
    Ok(())
}

/// `tracks.csv` becomes `tracks_corrected_w<window>.csv` next to it.
pub fn corrected_output_path(csv: &Path, window: usize) -> PathBuf {
    let stem = csv
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    csv.with_file_name(format!("{stem}_corrected_w{window}.csv"))
}

/// Which correction [correct_file] applies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadTailCorrection {
    /// [correct_swaps_by_neighbour_average] with a distance threshold.
    NeighbourAverage { threshold: f64 },
    /// [correct_head_with_dynamic_window], then [correct_jumps] on head and
    /// tail x,y with the same window.
    DynamicWindow { n_sigmas: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadTailConfig {
    pub head: String,
    pub tail: String,
    pub window: usize,
    pub correction: HeadTailCorrection,
}

impl Default for HeadTailConfig {
    fn default() -> Self {
        Self {
            head: "head".into(),
            tail: "tail".into(),
            window: 20,
            correction: HeadTailCorrection::NeighbourAverage { threshold: 10.0 },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CorrectionReport {
    Swaps(Vec<usize>),
    Threshold(f64),
}

/// Correct the table in `input` and write it to `output`.
///
/// An input without frames produces an empty `output` file and
/// [crate::Error::EmptyInput].
pub fn correct_file(
    input: &Path,
    output: &Path,
    config: &HeadTailConfig,
) -> crate::Result<CorrectionReport> {
    let mut table = match PoseTable::read_csv(input) {
        Err(crate::Error::EmptyInput(path)) => {
            log::warn!("The input file {} is empty.", path.display());
            File::create(output)?;
            log::info!("Empty CSV file created at {}", output.display());
            return Err(crate::Error::EmptyInput(path));
        }
        other => other?,
    };

    let report = match config.correction {
        HeadTailCorrection::NeighbourAverage { threshold } => {
            CorrectionReport::Swaps(correct_swaps_by_neighbour_average(
                &mut table,
                &config.head,
                &config.tail,
                config.window,
                threshold,
            )?)
        }
        HeadTailCorrection::DynamicWindow { n_sigmas } => {
            let threshold = correct_head_with_dynamic_window(
                &mut table,
                &config.head,
                &config.tail,
                config.window,
            )?;
            correct_jumps(
                &mut table,
                &[config.head.as_str(), config.tail.as_str()],
                &["x", "y"],
                config.window,
                n_sigmas,
            )?;
            CorrectionReport::Threshold(threshold)
        }
    };
    table.write_csv(output)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(head_x: Vec<f64>, tail_x: Vec<f64>) -> PoseTable {
        let n = head_x.len();
        PoseTable::new(
            vec![
                PoseColumn::new("m", "head", "x"),
                PoseColumn::new("m", "head", "y"),
                PoseColumn::new("m", "tail", "x"),
                PoseColumn::new("m", "tail", "y"),
            ],
            vec![head_x, vec![0.0; n], tail_x, vec![0.0; n]],
        )
        .unwrap()
    }

    #[test]
    fn statistics_skip_or_propagate_nan() {
        assert_eq!(nan_mean(&[1.0, f64::NAN, 3.0]), 2.0);
        assert!(nan_std(&[1.0]).is_nan());
        assert_eq!(nan_std(&[1.0, 3.0]), 2f64.sqrt());
        assert_eq!(median(&[3.0, 1.0, 2.0, 10.0]), 2.5);
        assert!(median(&[1.0, f64::NAN]).is_nan());
    }

    #[test]
    fn neighbour_average_swaps_single_frame() {
        let mut head = vec![0.0; 11];
        let mut tail = vec![100.0; 11];
        head[5] = 100.0;
        tail[5] = 0.0;
        let mut t = table(head, tail);
        let swaps = correct_swaps_by_neighbour_average(&mut t, "head", "tail", 3, 10.0).unwrap();
        assert_eq!(swaps, vec![5]);
        assert_eq!(t.column("head", "x").unwrap(), &[0.0; 11]);
        assert_eq!(t.column("tail", "x").unwrap(), &[100.0; 11]);
    }

    #[test]
    fn neighbour_average_needs_known_bodyparts() {
        let mut t = table(vec![0.0; 3], vec![1.0; 3]);
        assert!(correct_swaps_by_neighbour_average(&mut t, "nose", "tail", 3, 10.0).is_err());
    }

    #[test]
    fn dynamic_window_swaps_outlier() {
        let mut head = vec![0.0; 30];
        let mut tail = vec![100.0; 30];
        head[25] = 100.0;
        tail[25] = 0.0;
        let mut t = table(head, tail);
        let threshold = correct_head_with_dynamic_window(&mut t, "head", "tail", 20).unwrap();
        assert_eq!(threshold, 25.0);
        assert_eq!(t.get(25, "head", "x"), Some(0.0));
        assert_eq!(t.get(25, "tail", "x"), Some(100.0));
        assert_eq!(t.get(24, "head", "x"), Some(0.0));
    }

    #[test]
    fn hampel_replaces_spikes() {
        let data = [1.0, 1.0, 1.0, 10.0, 1.0, 1.0, 1.0];
        assert_eq!(hampel_filter(&data, 5, 3.0), vec![1.0; 7]);

        let with_nan = [1.0, f64::NAN, 1.0];
        let out = hampel_filter(&with_nan, 3, 3.0);
        assert!(out[1].is_nan());
    }

    #[test]
    fn output_path() {
        assert_eq!(
            corrected_output_path(Path::new("/d/track_filtered.csv"), 20),
            Path::new("/d/track_filtered_corrected_w20.csv")
        );
    }
}
