mod fingerprint;
mod layer;
mod outcome;

pub use fingerprint::{Fingerprint, PathState, WorkState};
pub use layer::Layer;
pub use outcome::{DiffReport, LayerInfo, RunOutcome};
