use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, AsArray, Float32Array, Float64Array, LargeListArray, ListArray};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::model::{Sample, SampleArchive, Spectrum};

const DEFAULT_SAMPLE: &str = "imported";
const DEFAULT_SPECTRUM: &str = "spectrum";

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load a sample archive from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.json`    – full archive: samples, spectra, models, parameters, fit results
/// * `.parquet` – trace table with `x` and `y` list columns
/// * `.csv`     – trace table with semicolon-separated `x` and `y` columns
///
/// Trace tables may carry `sample` and `spectrum` columns; consecutive rows
/// of the same spectrum become its traces and must share one energy axis.
pub fn load_file(path: &Path) -> Result<SampleArchive> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let mut archive = match ext.as_str() {
        "json" => load_json(path)?,
        "parquet" | "pq" => load_parquet(path)?,
        "csv" => load_csv(path)?,
        other => bail!("Unsupported file extension: .{other}"),
    };
    archive
        .prepare()
        .with_context(|| format!("validating {}", path.display()))?;
    Ok(archive)
}

/// Write the archive as pretty-printed JSON.
pub fn save_archive(path: &Path, archive: &SampleArchive) -> Result<()> {
    let text = serde_json::to_string_pretty(archive).context("serializing archive")?;
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// JSON archive
// ---------------------------------------------------------------------------

/// Expected JSON schema (see `SampleArchive`):
///
/// ```json
/// { "samples": [
///     { "name": "XPS_205",
///       "model": [ { "kind": "linear", "prefix": "bg_" }, ... ],
///       "spectra": [
///         { "name": "Si2p", "energy": [...], "traces": [[...], ...],
///           "groups": [["si32_", "si12_"]] }
///       ] } ] }
/// ```
fn load_json(path: &Path) -> Result<SampleArchive> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    serde_json::from_str(&text).context("parsing sample archive JSON")
}

// ---------------------------------------------------------------------------
// Trace tables
// ---------------------------------------------------------------------------

/// One row of a trace table.
struct TraceRow {
    sample: String,
    spectrum: String,
    x: Vec<f64>,
    y: Vec<f64>,
}

/// Group rows into samples and spectra, keeping first-seen order.
fn archive_from_rows(rows: Vec<TraceRow>) -> Result<SampleArchive> {
    let mut samples: Vec<Sample> = Vec::new();

    for (row_no, row) in rows.into_iter().enumerate() {
        if row.x.len() != row.y.len() {
            bail!(
                "Row {row_no}: x has {} values but y has {}",
                row.x.len(),
                row.y.len()
            );
        }
        if !row.x.iter().chain(&row.y).all(|v| v.is_finite()) {
            bail!("Row {row_no}: x and y must be finite numbers");
        }

        let sample = match samples.iter().position(|s| s.name == row.sample) {
            Some(i) => &mut samples[i],
            None => {
                samples.push(Sample {
                    name: row.sample.clone(),
                    model: None,
                    spectra: Vec::new(),
                });
                let last = samples.len() - 1;
                &mut samples[last]
            }
        };

        match sample.spectra.iter_mut().find(|s| s.name == row.spectrum) {
            Some(spectrum) => {
                let same_axis = spectrum.energy.len() == row.x.len()
                    && spectrum
                        .energy
                        .iter()
                        .zip(&row.x)
                        .all(|(a, b)| (a - b).abs() <= 1e-9 * a.abs().max(1.0));
                if !same_axis {
                    bail!(
                        "Row {row_no}: energy axis differs from earlier traces of {}/{}",
                        row.sample,
                        row.spectrum
                    );
                }
                spectrum.traces.push(row.y);
            }
            None => {
                sample
                    .spectra
                    .push(Spectrum::new(&row.spectrum, row.x, vec![row.y]));
            }
        }
    }

    Ok(SampleArchive { samples })
}

/// CSV layout:  header row with column names.
/// `x` and `y` columns contain semicolon-separated floats:
///   `"103.0;102.9;102.8"`, `"1520;1610;1850"`
/// Optional `sample` and `spectrum` columns name the trace's owner.
fn load_csv(path: &Path) -> Result<SampleArchive> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let x_idx = headers
        .iter()
        .position(|h| h == "x")
        .context("CSV missing 'x' column")?;
    let y_idx = headers
        .iter()
        .position(|h| h == "y")
        .context("CSV missing 'y' column")?;
    let sample_idx = headers.iter().position(|h| h == "sample");
    let spectrum_idx = headers.iter().position(|h| h == "spectrum");

    let mut rows = Vec::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;

        let x = parse_semicolon_floats(record.get(x_idx).unwrap_or(""), row_no, "x")?;
        let y = parse_semicolon_floats(record.get(y_idx).unwrap_or(""), row_no, "y")?;
        let label = |idx: Option<usize>, default: &str| {
            idx.and_then(|i| record.get(i))
                .filter(|s| !s.is_empty())
                .unwrap_or(default)
                .to_string()
        };

        rows.push(TraceRow {
            sample: label(sample_idx, DEFAULT_SAMPLE),
            spectrum: label(spectrum_idx, DEFAULT_SPECTRUM),
            x,
            y,
        });
    }

    archive_from_rows(rows)
}

fn parse_semicolon_floats(s: &str, row: usize, col: &str) -> Result<Vec<f64>> {
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            tok.trim()
                .parse::<f64>()
                .with_context(|| format!("Row {row}, {col}[{j}]: '{tok}' is not a number"))
        })
        .collect()
}

/// Load a Parquet trace table.
///
/// Expected schema:
/// - `x`: List<Float64> or LargeList<Float64> – binding energy arrays
/// - `y`: List<Float64> or LargeList<Float64> – intensity arrays
/// - `sample`, `spectrum` (optional): string labels
///
/// Null list entries are an error; the file-wide row number is reported.
fn load_parquet(path: &Path) -> Result<SampleArchive> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut rows = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let first_row = rows.len();
        rows_from_batch(&batch, first_row, &mut rows)?;
    }

    archive_from_rows(rows)
}

/// Append the rows of one record batch. `first_row` is the file-wide number
/// of the batch's first row, used in error messages.
fn rows_from_batch(batch: &RecordBatch, first_row: usize, rows: &mut Vec<TraceRow>) -> Result<()> {
    let schema = batch.schema();

    let x_idx = schema
        .index_of("x")
        .map_err(|_| anyhow::anyhow!("Parquet file missing 'x' column"))?;
    let y_idx = schema
        .index_of("y")
        .map_err(|_| anyhow::anyhow!("Parquet file missing 'y' column"))?;
    let sample_col = schema.index_of("sample").ok().map(|i| batch.column(i));
    let spectrum_col = schema.index_of("spectrum").ok().map(|i| batch.column(i));

    let x_col = batch.column(x_idx);
    let y_col = batch.column(y_idx);

    for row in 0..batch.num_rows() {
        let row_no = first_row + row;
        let x = extract_f64_list(x_col, row)
            .with_context(|| format!("Row {row_no}: failed to read 'x'"))?;
        let y = extract_f64_list(y_col, row)
            .with_context(|| format!("Row {row_no}: failed to read 'y'"))?;

        rows.push(TraceRow {
            sample: extract_label(sample_col, row, DEFAULT_SAMPLE),
            spectrum: extract_label(spectrum_col, row, DEFAULT_SPECTRUM),
            x,
            y,
        });
    }
    Ok(())
}

// -- Parquet / Arrow helpers --

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<ListArray>()
                .context("expected ListArray")?;
            list_arr.value(row)
        }
        DataType::LargeList(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<LargeListArray>()
                .context("expected LargeListArray")?;
            list_arr.value(row)
        }
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    // The inner array can be Float64 or Float32; null entries are rejected.
    let null_at = |j: usize| anyhow::anyhow!("null entry at position {j}");
    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        f64_arr
            .iter()
            .enumerate()
            .map(|(j, v)| v.ok_or_else(|| null_at(j)))
            .collect()
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        f32_arr
            .iter()
            .enumerate()
            .map(|(j, v)| v.map(f64::from).ok_or_else(|| null_at(j)))
            .collect()
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

/// Read a string label, falling back to `default` for nulls and
/// non-string columns.
fn extract_label(col: Option<&Arc<dyn Array>>, row: usize, default: &str) -> String {
    let Some(col) = col else {
        return default.to_string();
    };
    if col.is_null(row) {
        return default.to_string();
    }
    match col.data_type() {
        DataType::Utf8 => col.as_string::<i32>().value(row).to_string(),
        DataType::LargeUtf8 => col.as_string::<i64>().value(row).to_string(),
        other => {
            log::warn!("label column has type {other:?}, using '{default}'");
            default.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Builder, ListBuilder, StringArray};
    use arrow::datatypes::{Field, Schema};
    use parquet::arrow::ArrowWriter;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("xps_view_loader_{}_{name}", std::process::id()))
    }

    #[test]
    fn test_csv_rows_grouped_into_traces() {
        let path = temp_path("traces.csv");
        std::fs::write(
            &path,
            "sample,spectrum,x,y\n\
             205,Si2p,100;101;102;103,1;2;5;2\n\
             205,Si2p,100;101;102;103,1;3;6;2\n\
             205,O1s,530;531;532,4;9;4\n",
        )
        .unwrap();

        let archive = load_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(archive.samples.len(), 1);
        let sample = &archive.samples[0];
        assert_eq!(sample.spectrum_names(), vec!["Si2p", "O1s"]);
        assert_eq!(sample.spectra[0].len(), 2);
        // Imported spectra receive an automatic model.
        assert!(!sample.spectra[0].model.is_empty());
        assert!(sample.spectra[0].params.get("p1_center").is_some());
    }

    #[test]
    fn test_csv_axis_mismatch_rejected() {
        let rows = vec![
            TraceRow {
                sample: "s".into(),
                spectrum: "a".into(),
                x: vec![1.0, 2.0],
                y: vec![1.0, 2.0],
            },
            TraceRow {
                sample: "s".into(),
                spectrum: "a".into(),
                x: vec![1.0, 2.5],
                y: vec![1.0, 2.0],
            },
        ];
        assert!(archive_from_rows(rows).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let rows = vec![TraceRow {
            sample: "s".into(),
            spectrum: "C1s".into(),
            x: (0..20).map(|i| 280.0 + i as f64 * 0.5).collect(),
            y: (0..20).map(|i| 10.0 + (-(i as f64 - 9.0).powi(2) / 4.0).exp() * 100.0).collect(),
        }];
        let mut archive = archive_from_rows(rows).unwrap();
        archive.prepare().unwrap();

        let path = temp_path("archive.json");
        save_archive(&path, &archive).unwrap();
        let back = load_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let (a, b) = (&archive.samples[0].spectra[0], &back.samples[0].spectra[0]);
        assert_eq!(a.name, b.name);
        assert_eq!(a.model, b.model);
        let names = |sp: &Spectrum| -> Vec<String> {
            sp.params.iter().map(|p| p.name.clone()).collect()
        };
        assert_eq!(names(a), names(b));
        for (pa, pb) in a.params.iter().zip(b.params.iter()) {
            assert!((pa.value - pb.value).abs() <= 1e-12 * pa.value.abs().max(1.0));
            assert_eq!(pa.min.is_finite(), pb.min.is_finite());
            assert_eq!(pa.expr, pb.expr);
        }
        assert_eq!(a.traces.len(), b.traces.len());
    }

    fn float_lists(values: &[Vec<Option<f64>>]) -> ListArray {
        let mut builder = ListBuilder::new(Float64Builder::new());
        for list in values {
            for v in list {
                builder.values().append_option(*v);
            }
            builder.append(true);
        }
        builder.finish()
    }

    fn trace_batch(
        x: &[Vec<Option<f64>>],
        y: &[Vec<Option<f64>>],
        samples: Vec<&str>,
        spectra: Vec<&str>,
    ) -> RecordBatch {
        let item = Arc::new(Field::new("item", DataType::Float64, true));
        let schema = Arc::new(Schema::new(vec![
            Field::new("x", DataType::List(item.clone()), false),
            Field::new("y", DataType::List(item), false),
            Field::new("sample", DataType::Utf8, true),
            Field::new("spectrum", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(float_lists(x)),
                Arc::new(float_lists(y)),
                Arc::new(StringArray::from(samples)),
                Arc::new(StringArray::from(spectra)),
            ],
        )
        .unwrap()
    }

    fn some(v: &[f64]) -> Vec<Option<f64>> {
        v.iter().copied().map(Some).collect()
    }

    #[test]
    fn test_parquet_trace_table_loaded() {
        let axis = some(&[535.0, 533.0, 531.0, 529.0, 527.0]);
        let batch = trace_batch(
            &[axis.clone(), axis.clone(), some(&[286.0, 285.0, 284.0])],
            &[
                some(&[10.0, 40.0, 90.0, 30.0, 12.0]),
                some(&[11.0, 42.0, 85.0, 33.0, 10.0]),
                some(&[5.0, 20.0, 6.0]),
            ],
            vec!["XPS_207", "XPS_207", "XPS_208"],
            vec!["O1s", "O1s", "C1s"],
        );

        let path = temp_path("traces.parquet");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let archive = load_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(archive.samples.len(), 2);
        let o1s = &archive.samples[0].spectra[0];
        assert_eq!(archive.samples[0].name, "XPS_207");
        assert_eq!(o1s.name, "O1s");
        assert_eq!(o1s.len(), 2);
        assert_eq!(o1s.energy, vec![535.0, 533.0, 531.0, 529.0, 527.0]);
        assert_eq!(o1s.traces[1][2], 85.0);
        assert_eq!(archive.samples[1].spectrum_names(), vec!["C1s"]);
        assert!(!o1s.model.is_empty());
    }

    #[test]
    fn test_parquet_null_entry_reports_file_row() {
        let first = trace_batch(
            &[some(&[1.0, 2.0])],
            &[some(&[3.0, 4.0])],
            vec!["s"],
            vec!["a"],
        );
        let second = trace_batch(
            &[some(&[1.0, 2.0]), some(&[1.0, 2.0])],
            &[some(&[3.0, 4.0]), vec![Some(3.0), None]],
            vec!["s", "s"],
            vec!["a", "a"],
        );

        let mut rows = Vec::new();
        rows_from_batch(&first, 0, &mut rows).unwrap();
        let err = rows_from_batch(&second, rows.len(), &mut rows).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("Row 2"), "{message}");
        assert!(message.contains("null entry at position 1"), "{message}");
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let rows = vec![TraceRow {
            sample: "s".into(),
            spectrum: "a".into(),
            x: vec![1.0, 2.0],
            y: vec![1.0, f64::NAN],
        }];
        assert!(archive_from_rows(rows).is_err());
    }

    #[test]
    fn test_unknown_extension() {
        assert!(load_file(Path::new("spectra.h5")).is_err());
    }
}
