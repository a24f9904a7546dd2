//! cadplan: natural-language requests to parametric solids.
//!
//! A request is translated into a design [`Plan`](cadplan_core::Plan),
//! compiled into a program, executed against a solid kernel and exported as a
//! mesh. Designs live in a [`PlanStore`](store::PlanStore) and are refined
//! in place with further change requests.

pub mod api;
pub mod compiler;
pub mod config;
pub mod db;
pub mod editor;
pub mod error;
pub mod executor;
pub mod kernel;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod store;
pub mod translator;
