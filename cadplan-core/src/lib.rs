//! Pure model for cadplan.
//!
//! This crate holds everything that does not touch the filesystem, the network
//! or a geometry kernel: the design [`Plan`], the canonical feature grammar
//! that every stage validates against, the dimension inference rules, and the
//! procedural program language the compiler emits and the executor runs.

pub mod defaults;
pub mod geometry;
pub mod grammar;
pub mod plan;
pub mod program;

pub use geometry::{Face, FaceOutline, Footprint};
pub use grammar::{Rule, Violation};
pub use plan::{
    ExportFormat, Extrude, ExtrudeDirection, Feature, FeatureKind, FeatureShape, Plan, PlanError,
    Sketch,
};
