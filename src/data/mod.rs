/// Data layer: samples, spectra and file I/O.
///
/// Architecture:
/// ```text
///  .json / .parquet / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → SampleArchive, prepare models
///   └──────────┘
///        │
///        ▼
///   ┌───────────────┐
///   │ SampleArchive  │  Vec<Sample> → Vec<Spectrum>
///   └───────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ FitView   │  owns one Spectrum while it is open
///   └──────────┘
/// ```

pub mod loader;
pub mod model;
