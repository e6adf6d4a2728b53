//! Writes a synthetic XPS archive (`sample_archive.json`) and a parquet trace
//! table (`sample_traces.parquet`) to the directory given as the first
//! argument, or the working directory.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Builder, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use serde_json::{json, Value};

const LN2: f64 = std::f64::consts::LN_2;

/// Area-normalised pseudo-Voigt; `sigma` is the half width at half maximum.
fn pseudo_voigt(x: f64, amplitude: f64, center: f64, sigma: f64, fraction: f64) -> f64 {
    let sigma_g = sigma / (2.0 * LN2).sqrt();
    let gauss = (-(x - center).powi(2) / (2.0 * sigma_g.powi(2))).exp()
        / (sigma_g * (2.0 * std::f64::consts::PI).sqrt());
    let lorentz = sigma / std::f64::consts::PI / ((x - center).powi(2) + sigma.powi(2));
    amplitude * ((1.0 - fraction) * gauss + fraction * lorentz)
}

/// (amplitude, center, sigma, fraction)
type Peak = (f64, f64, f64, f64);

fn axis(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let n = ((stop - start) / step).round() as usize + 1;
    (0..n).map(|i| start + i as f64 * step).collect()
}

/// Counting-statistics noise around a constant background plus peaks.
fn generate_trace(energy: &[f64], background: f64, peaks: &[Peak], rng: &mut SimpleRng) -> Vec<f64> {
    energy
        .iter()
        .map(|&e| {
            let signal: f64 = background
                + peaks
                    .iter()
                    .map(|&(a, c, s, f)| pseudo_voigt(e, a, c, s, f))
                    .sum::<f64>();
            (signal + rng.gauss(0.0, signal.max(1.0).sqrt())).max(0.0)
        })
        .collect()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

// ---------------------------------------------------------------------------
// JSON archive
// ---------------------------------------------------------------------------

fn param(name: &str, value: f64) -> Value {
    json!({ "name": name, "value": value })
}

fn bounded(name: &str, value: f64, min: f64, max: f64) -> Value {
    json!({ "name": name, "value": value, "min": min, "max": max })
}

fn constrained(name: &str, expr: &str) -> Value {
    json!({ "name": name, "value": 0.0, "expr": expr, "vary": false })
}

/// Si 2p: a spin-orbit doublet (2p3/2, 2p1/2) with fixed splitting and
/// branching ratio; the sputter series slowly removes the oxide.
fn si2p(rng: &mut SimpleRng) -> Value {
    let energy = axis(96.0, 106.0, 0.05);
    let traces: Vec<Vec<f64>> = (0..6)
        .map(|i| {
            let oxide = 900.0 * (1.0 - i as f64 / 6.0);
            let peaks = [
                (1200.0, 99.35, 0.35, 0.3),
                (600.0, 99.96, 0.35, 0.3),
                (oxide, 103.4, 0.8, 0.2),
            ];
            generate_trace(&energy, 150.0, &peaks, rng)
        })
        .collect();

    json!({
        "name": "Si2p",
        "energy": energy,
        "traces": traces,
        "model": [
            { "kind": "constant", "prefix": "bg_" },
            { "kind": "pseudo_voigt", "prefix": "si32_" },
            { "kind": "pseudo_voigt", "prefix": "si12_" },
            { "kind": "pseudo_voigt", "prefix": "ox_" },
        ],
        "groups": [["si32_", "si12_"], ["ox_"]],
        "params": [
            param("bg_c", 140.0),
            bounded("si32_amplitude", 1000.0, 0.0, 1.0e5),
            bounded("si32_center", 99.3, 98.5, 100.5),
            bounded("si32_sigma", 0.4, 0.05, 2.0),
            bounded("si32_fraction", 0.3, 0.0, 1.0),
            constrained("si12_amplitude", "0.5 * si32_amplitude"),
            constrained("si12_center", "si32_center + 0.61"),
            constrained("si12_sigma", "si32_sigma"),
            constrained("si12_fraction", "si32_fraction"),
            bounded("ox_amplitude", 800.0, 0.0, 1.0e5),
            bounded("ox_center", 103.2, 102.0, 105.0),
            bounded("ox_sigma", 0.8, 0.1, 3.0),
        ],
    })
}

/// C 1s with adventitious carbon and a C-O shoulder.
fn c1s(rng: &mut SimpleRng) -> Value {
    let energy = axis(280.0, 292.0, 0.1);
    let traces: Vec<Vec<f64>> = (0..4)
        .map(|i| {
            let scale = 1.0 - 0.2 * i as f64;
            let peaks = [
                (2500.0 * scale, 284.8, 0.6, 0.2),
                (700.0 * scale, 286.4, 0.7, 0.2),
            ];
            generate_trace(&energy, 300.0, &peaks, rng)
        })
        .collect();

    json!({
        "name": "C1s",
        "energy": energy,
        "traces": traces,
        "model": [
            { "kind": "linear", "prefix": "bg_" },
            { "kind": "pseudo_voigt", "prefix": "cc_" },
            { "kind": "pseudo_voigt", "prefix": "co_" },
        ],
        "params": [
            param("bg_intercept", 300.0),
            bounded("cc_amplitude", 2000.0, 0.0, 1.0e5),
            param("cc_center", 284.8),
            bounded("cc_sigma", 0.6, 0.05, 2.0),
            bounded("co_amplitude", 500.0, 0.0, 1.0e5),
            constrained("co_center", "cc_center + 1.6"),
            bounded("co_sigma", 0.7, 0.05, 2.0),
        ],
    })
}

/// O 1s without a stored model: the viewer guesses one.
fn o1s(rng: &mut SimpleRng, samples: usize) -> (Vec<f64>, Vec<Vec<f64>>) {
    let energy = axis(526.0, 538.0, 0.1);
    let traces = (0..samples)
        .map(|i| {
            let peaks = [(3000.0 + 200.0 * i as f64, 531.2 + 0.05 * i as f64, 0.8, 0.3)];
            generate_trace(&energy, 400.0, &peaks, rng)
        })
        .collect();
    (energy, traces)
}

// ---------------------------------------------------------------------------
// Parquet trace table
// ---------------------------------------------------------------------------

fn list_column(rows: &[Vec<f64>]) -> arrow::array::ListArray {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        let values = builder.values();
        for &v in row {
            values.append_value(v);
        }
        builder.append(true);
    }
    builder.finish()
}

fn write_trace_table(path: &std::path::Path, spectrum: &str, energy: &[f64], traces: &[Vec<f64>]) -> Result<()> {
    let x_rows = vec![energy.to_vec(); traces.len()];
    let samples = vec!["XPS_207"; traces.len()];
    let spectra = vec![spectrum; traces.len()];

    let item = Arc::new(Field::new("item", DataType::Float64, true));
    let schema = Arc::new(Schema::new(vec![
        Field::new("x", DataType::List(item.clone()), false),
        Field::new("y", DataType::List(item), false),
        Field::new("sample", DataType::Utf8, false),
        Field::new("spectrum", DataType::Utf8, false),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(list_column(&x_rows)),
            Arc::new(list_column(traces)),
            Arc::new(StringArray::from(samples)),
            Arc::new(StringArray::from(spectra)),
        ],
    )
    .context("building record batch")?;

    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let out_dir = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut rng = SimpleRng::new(42);

    let (o1s_energy, o1s_traces) = o1s(&mut rng, 3);
    let archive = json!({
        "samples": [
            {
                "name": "XPS_205",
                "spectra": [
                    si2p(&mut rng),
                    { "name": "O1s", "energy": o1s_energy, "traces": o1s_traces },
                ],
            },
            {
                "name": "XPS_206",
                "spectra": [c1s(&mut rng)],
            },
        ],
    });

    let archive_path = out_dir.join("sample_archive.json");
    let text = serde_json::to_string_pretty(&archive)?;
    std::fs::write(&archive_path, text)
        .with_context(|| format!("writing {}", archive_path.display()))?;
    log::info!("wrote {}", archive_path.display());

    let (energy, traces) = o1s(&mut rng, 8);
    let table_path = out_dir.join("sample_traces.parquet");
    write_trace_table(&table_path, "O1s", &energy, &traces)?;

    println!(
        "Wrote {} and {} ({} traces)",
        archive_path.display(),
        table_path.display(),
        traces.len()
    );
    Ok(())
}
