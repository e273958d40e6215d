//! Labeling and protection of whole files

pub mod container;
pub mod engine;
pub mod handler;
pub mod profile;

pub use container::{AssignmentMethod, ContainerError};
pub use engine::{FileEngine, FileEngineSettings, FileInput};
pub use handler::{ContentLabel, FileHandler, LabelingOptions};
pub use profile::{FileProfile, FileProfileSettings};
