//! Sensitivity labels: the policy profile, its engines and the labels they serve

pub mod engine;
pub mod label;
pub mod profile;

pub use engine::{PolicyEngine, PolicyEngineSettings};
pub use label::{Label, LabelProtection, PolicyData};
pub use profile::{PolicyProfile, PolicyProfileSettings};
