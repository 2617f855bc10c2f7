use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{
    Array, ArrayRef, AsArray, Float32Array, Float64Array, Float64Builder, Int64Array,
    LargeListArray, ListArray, ListBuilder,
};
use arrow::datatypes::{DataType, Float32Type, Float64Type, Int32Type, Int64Type};
use arrow::record_batch::RecordBatch;
use log::{debug, info};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde_json::Value as JsonValue;

use super::model::{MetadataValue, RawSample, ReplayDataset};

const WAVELENGTH: &str = "wavelength";
const ABSORBANCE: &str = "absorbance";
const POL: &str = "pol";
/// Lab Pol column name used by the scanner exports ("Total Sugar").
const TS: &str = "TS";
const AMPLITUDE_PREFIX: &str = "amplitude-";

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a replay dataset from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – `wavelength` and `absorbance` list columns, optional `pol`
/// * `.json`    – `[{ "wavelength": [...], "absorbance": [...], "pol": 14.2, ...meta }, ...]`
/// * `.csv`     – wide scanner export, one column per wavelength
pub fn load_dataset(path: &Path) -> Result<ReplayDataset> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let raw = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
    .with_context(|| format!("loading replay dataset {}", path.display()))?;

    if raw.is_empty() {
        bail!("{} contains no usable samples", path.display());
    }

    let dataset = ReplayDataset::from_samples(raw)
        .with_context(|| format!("validating replay dataset {}", path.display()))?;
    info!(
        "Loaded {} replay samples ({} wavelengths) from {}",
        dataset.len(),
        dataset.wavelengths.len(),
        path.display()
    );
    Ok(dataset)
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented):
///
/// ```json
/// [
///   {
///     "wavelength": [740.0, 741.0, ...],
///     "absorbance": [0.41,  0.42,  ...],
///     "pol": 14.2,
///     "batch": "A"
///   },
///   ...
/// ]
/// ```
fn load_json(path: &Path) -> Result<Vec<RawSample>> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root.as_array().context("Expected top-level JSON array")?;

    let mut samples = Vec::with_capacity(records.len());

    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        let wavelengths = json_array_to_f64(obj.get(WAVELENGTH), i, WAVELENGTH)?;
        let absorbance = json_array_to_f64(obj.get(ABSORBANCE), i, ABSORBANCE)?;

        if wavelengths.len() != absorbance.len() {
            bail!(
                "Row {i}: {WAVELENGTH} has {} values but {ABSORBANCE} has {}",
                wavelengths.len(),
                absorbance.len()
            );
        }

        let pol = match obj.get(POL) {
            None | Some(JsonValue::Null) => None,
            Some(v) => Some(
                v.as_f64()
                    .with_context(|| format!("Row {i}: '{POL}' is not a number"))?,
            ),
        };

        let mut metadata = BTreeMap::new();
        for (key, val) in obj {
            if key == WAVELENGTH || key == ABSORBANCE || key == POL {
                continue;
            }
            metadata.insert(key.clone(), json_to_metadata(val));
        }

        samples.push(RawSample {
            wavelengths,
            absorbance,
            pol,
            metadata,
        });
    }

    Ok(samples)
}

fn json_array_to_f64(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("Row {row}: missing or invalid '{col}' array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| {
            v.as_f64()
                .with_context(|| format!("Row {row}, {col}[{j}]: not a number"))
        })
        .collect()
}

fn json_to_metadata(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::String(s) => MetadataValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetadataValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                MetadataValue::Float(f)
            } else {
                MetadataValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => MetadataValue::Bool(*b),
        JsonValue::Null => MetadataValue::Null,
        other => MetadataValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// Wide scanner layout: one row per sample.
///
/// Columns named by a number (`740`, `740.5`) or `amplitude-<nm>` hold the
/// absorbance at that wavelength. Lab Pol is read from `TS` (preferred) or
/// `pol`; rows where it is empty or not numeric are dropped. All other
/// columns are treated as metadata.
fn load_csv(path: &Path) -> Result<Vec<RawSample>> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let spectral: Vec<(usize, f64)> = headers
        .iter()
        .enumerate()
        .filter_map(|(i, h)| header_wavelength(h).map(|nm| (i, nm)))
        .collect();
    if spectral.is_empty() {
        bail!("CSV has no wavelength columns (numeric or '{AMPLITUDE_PREFIX}<nm>' headers)");
    }
    let wavelengths: Vec<f64> = spectral.iter().map(|&(_, nm)| nm).collect();

    let pol_idx = headers
        .iter()
        .position(|h| h == TS)
        .or_else(|| headers.iter().position(|h| h == POL))
        .with_context(|| format!("CSV missing '{TS}' or '{POL}' column"))?;

    let mut samples = Vec::new();
    let mut dropped = 0usize;

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;

        let pol = record
            .get(pol_idx)
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite());
        let Some(pol) = pol else {
            dropped += 1;
            continue;
        };

        let absorbance = spectral
            .iter()
            .map(|&(col_idx, nm)| {
                let cell = record.get(col_idx).unwrap_or("").trim();
                cell.parse::<f64>().with_context(|| {
                    format!("Row {row_no}, {nm} nm: '{cell}' is not a number")
                })
            })
            .collect::<Result<Vec<f64>>>()?;

        let mut metadata = BTreeMap::new();
        for (col_idx, value) in record.iter().enumerate() {
            if col_idx == pol_idx || spectral.iter().any(|&(i, _)| i == col_idx) {
                continue;
            }
            metadata.insert(headers[col_idx].clone(), guess_metadata_type(value));
        }

        samples.push(RawSample {
            wavelengths: wavelengths.clone(),
            absorbance,
            pol: Some(pol),
            metadata,
        });
    }

    if dropped > 0 {
        debug!("Dropped {dropped} CSV rows without a numeric Pol");
    }
    Ok(samples)
}

/// `740`, `740.5` or `amplitude-740.5` → 740.x nm.
fn header_wavelength(header: &str) -> Option<f64> {
    let digits = header.strip_prefix(AMPLITUDE_PREFIX).unwrap_or(header);
    digits.parse::<f64>().ok().filter(|nm| nm.is_finite())
}

fn guess_metadata_type(s: &str) -> MetadataValue {
    if s.is_empty() {
        return MetadataValue::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return MetadataValue::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return MetadataValue::Float(f);
    }
    if s == "true" || s == "false" {
        return MetadataValue::Bool(s == "true");
    }
    MetadataValue::String(s.to_string())
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file of labelled spectra.
///
/// Expected schema:
/// - `wavelength`: List<Float64|Float32> or LargeList – nm grid per row
/// - `absorbance`: List<Float64|Float32> or LargeList – readings per row
/// - `pol`: optional numeric column, lab Pol (null = unlabelled)
/// - Any other columns are treated as metadata (strings, ints, floats, bools)
fn load_parquet(path: &Path) -> Result<Vec<RawSample>> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut samples = Vec::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        let n_rows = batch.num_rows();

        let wl_idx = schema
            .index_of(WAVELENGTH)
            .map_err(|_| anyhow::anyhow!("Parquet file missing '{WAVELENGTH}' column"))?;
        let abs_idx = schema
            .index_of(ABSORBANCE)
            .map_err(|_| anyhow::anyhow!("Parquet file missing '{ABSORBANCE}' column"))?;
        let pol_idx = schema.index_of(POL).ok();

        let wl_col = batch.column(wl_idx);
        let abs_col = batch.column(abs_idx);

        let meta_cols: Vec<(usize, String)> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != wl_idx && *i != abs_idx && Some(*i) != pol_idx)
            .map(|(i, f)| (i, f.name().clone()))
            .collect();

        for row in 0..n_rows {
            let wavelengths = extract_f64_list(wl_col, row)
                .with_context(|| format!("Row {row}: failed to read '{WAVELENGTH}'"))?;
            let absorbance = extract_f64_list(abs_col, row)
                .with_context(|| format!("Row {row}: failed to read '{ABSORBANCE}'"))?;

            if wavelengths.len() != absorbance.len() {
                bail!(
                    "Row {row}: {WAVELENGTH} has {} values but {ABSORBANCE} has {}",
                    wavelengths.len(),
                    absorbance.len()
                );
            }

            let pol = match pol_idx {
                Some(i) => match extract_metadata_value(batch.column(i), row) {
                    MetadataValue::Null => None,
                    value => Some(
                        value
                            .as_f64()
                            .with_context(|| format!("Row {row}: '{POL}' is not numeric"))?,
                    ),
                },
                None => None,
            };

            let mut metadata = BTreeMap::new();
            for (col_idx, col_name) in &meta_cols {
                let value = extract_metadata_value(batch.column(*col_idx), row);
                metadata.insert(col_name.clone(), value);
            }

            samples.push(RawSample {
                wavelengths,
                absorbance,
                pol,
                metadata,
            });
        }
    }

    Ok(samples)
}

// -- Parquet / Arrow helpers --

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &ArrayRef, row: usize) -> Result<Vec<f64>> {
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

    // The inner array can be Float64 or Float32
    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.unwrap_or(f32::NAN) as f64).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

/// Extract a single metadata value from an Arrow column at a given row.
fn extract_metadata_value(col: &ArrayRef, row: usize) -> MetadataValue {
    if col.is_null(row) {
        return MetadataValue::Null;
    }
    match col.data_type() {
        DataType::Utf8 => MetadataValue::String(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => {
            MetadataValue::String(col.as_string::<i64>().value(row).to_string())
        }
        DataType::Int32 => MetadataValue::Integer(col.as_primitive::<Int32Type>().value(row) as i64),
        DataType::Int64 => MetadataValue::Integer(col.as_primitive::<Int64Type>().value(row)),
        DataType::Float32 => {
            MetadataValue::Float(col.as_primitive::<Float32Type>().value(row) as f64)
        }
        DataType::Float64 => MetadataValue::Float(col.as_primitive::<Float64Type>().value(row)),
        DataType::Boolean => MetadataValue::Bool(col.as_boolean().value(row)),
        other => MetadataValue::String(format!("{other:?}")),
    }
}

// ---------------------------------------------------------------------------
// Parquet writer
// ---------------------------------------------------------------------------

/// Write `dataset` in the layout [`load_dataset`] reads back, with a
/// `sample_id` column numbering the rows.
pub fn write_parquet(path: &Path, dataset: &ReplayDataset) -> Result<()> {
    let grid = dataset.wavelengths.as_slice();

    let mut wl_builder = ListBuilder::new(Float64Builder::new());
    let mut abs_builder = ListBuilder::new(Float64Builder::new());
    for sample in &dataset.samples {
        wl_builder.values().append_slice(grid);
        wl_builder.append(true);
        abs_builder.values().append_slice(&sample.absorbance);
        abs_builder.append(true);
    }

    let pol_array = Float64Array::from(dataset.samples.iter().map(|s| s.pol).collect::<Vec<_>>());
    let id_array = Int64Array::from_iter_values(0..dataset.len() as i64);

    let batch = RecordBatch::try_from_iter(vec![
        (WAVELENGTH, Arc::new(wl_builder.finish()) as ArrayRef),
        (ABSORBANCE, Arc::new(abs_builder.finish()) as ArrayRef),
        (POL, Arc::new(pol_array) as ArrayRef),
        ("sample_id", Arc::new(id_array) as ArrayRef),
    ])
    .context("building record batch")?;

    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::data::model::LabeledSpectrum;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn json_records_with_optional_pol() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "replay.json",
            r#"[
                {"wavelength": [740, 741, 742], "absorbance": [0.1, 0.2, 0.3], "pol": 14.2, "batch": "A"},
                {"wavelength": [740, 741, 742], "absorbance": [0.2, 0.3, 0.5], "pol": null, "batch": "B"}
            ]"#,
        );

        let ds = load_dataset(&path).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.wavelengths.as_slice(), &[740.0, 741.0, 742.0]);
        assert_eq!(ds.samples[0].pol, Some(14.2));
        assert_eq!(ds.samples[1].pol, None);
        assert_eq!(
            ds.samples[1].metadata.get("batch"),
            Some(&MetadataValue::String("B".into()))
        );
    }

    #[test]
    fn json_length_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "bad.json",
            r#"[{"wavelength": [740, 741], "absorbance": [0.1]}]"#,
        );
        let err = load_dataset(&path).unwrap_err();
        assert!(format!("{err:#}").contains("absorbance has 1"));
    }

    #[test]
    fn wide_csv_drops_rows_without_pol() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "scans.csv",
            "sample,amplitude-740,amplitude-741,amplitude-742,TS\n\
             s1,0.10,0.20,0.30,14.1\n\
             s2,0.11,0.21,0.31,\n\
             s3,0.12,0.22,0.32,n/a\n\
             s4,0.13,0.23,0.33,12.9\n",
        );

        let ds = load_dataset(&path).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.wavelengths.as_slice(), &[740.0, 741.0, 742.0]);
        assert_eq!(ds.samples[1].absorbance, vec![0.13, 0.23, 0.33]);
        assert_eq!(ds.samples[1].pol, Some(12.9));
        assert_eq!(
            ds.samples[0].metadata.get("sample"),
            Some(&MetadataValue::String("s1".into()))
        );
    }

    #[test]
    fn csv_numeric_headers_and_pol_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "scans.csv", "740,740.5,741,pol\n0.1,0.2,0.3,13.0\n");
        let ds = load_dataset(&path).unwrap();
        assert_eq!(ds.wavelengths.as_slice(), &[740.0, 740.5, 741.0]);
        assert_eq!(ds.samples[0].pol, Some(13.0));
    }

    #[test]
    fn csv_without_any_labelled_row_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "scans.csv", "740,741,TS\n0.1,0.2,\n");
        assert!(load_dataset(&path).is_err());
    }

    #[test]
    fn parquet_round_trip() {
        let grid = vec![740.0, 741.0, 742.0, 743.0];
        let dataset = ReplayDataset {
            wavelengths: crate::data::model::WavelengthGrid::new(grid).unwrap(),
            samples: vec![
                LabeledSpectrum {
                    absorbance: vec![0.4, 0.5, 0.45, 0.41],
                    pol: Some(13.7),
                    metadata: BTreeMap::new(),
                },
                LabeledSpectrum {
                    absorbance: vec![0.3, 0.6, 0.44, 0.40],
                    pol: None,
                    metadata: BTreeMap::new(),
                },
            ],
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.parquet");
        write_parquet(&path, &dataset).unwrap();

        let back = load_dataset(&path).unwrap();
        assert_eq!(back.wavelengths, dataset.wavelengths);
        assert_eq!(back.len(), 2);
        assert_eq!(back.samples[0].absorbance, dataset.samples[0].absorbance);
        assert_eq!(back.samples[0].pol, Some(13.7));
        assert_eq!(back.samples[1].pol, None);
        assert_eq!(
            back.samples[1].metadata.get("sample_id"),
            Some(&MetadataValue::Integer(1))
        );
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "replay.pkl", "");
        let err = load_dataset(&path).unwrap_err();
        assert!(err.to_string().contains(".pkl"));
    }
}
