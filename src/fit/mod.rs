/// Fitting layer: lmfit-style parameters, peak models and a least-squares
/// solver.
///
/// ```text
///   CompositeModel ──make_params──▶ Parameters ◀── ParamMessage (panel)
///         │                             │
///         └──────────── eval ◀──────────┤
///                                       ▼
///                              solver::fit ──▶ FitResult
/// ```
pub mod expr;
pub mod model;
pub mod params;
pub mod result;
pub mod solver;

pub use model::{Component, ComponentKind, CompositeModel};
pub use params::{Parameter, Parameters};
pub use result::FitResult;
pub use solver::FitOptions;
