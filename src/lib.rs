//! Ancestry placement of study individuals in a reference PCA space.
//!
//! The reference panel is standardized ([`normalize`]), turned into a
//! kinship matrix ([`covariance`]) and a PC space ([`reference`]). Each study
//! individual then gets its own augmented matrix, eigendecomposition
//! ([`dimension`]) and projection Procrustes alignment ([`procrustes`]),
//! followed by a nearest-neighbour outlier score ([`outlier`]). [`pipeline`]
//! strings these together; the remaining modules handle input and output.

pub mod cli;
pub mod config;
pub mod covariance;
pub mod dimension;
pub mod error;
pub mod linalg;
pub mod logging;
pub mod normalize;
pub mod outlier;
pub mod output;
pub mod pipeline;
pub mod procrustes;
pub mod reference;
pub mod sampling;
pub mod sites;
pub mod table;

pub use error::TraceError;
pub use linalg::{LapackBackend, LinalgBackend};
pub use pipeline::{Placement, PlacementOutcome, ReferencePanel, StudyAnalyzer};
