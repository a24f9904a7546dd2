//! Shared fixtures: a scripted language model, a kernel that fails on demand
//! and pipelines rooted in temporary data directories.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cadplan::config::{CompileStrategy, Config};
use cadplan::kernel::{Aabb, KernelError, KernelResult, SolidKernel, VoxelKernel};
use cadplan::llm::{InferenceRequest, LanguageModel, ModelError};
use cadplan::pipeline::Pipeline;
use cadplan::store::PlanStore;
use cadplan_core::ExportFormat;
use tempfile::TempDir;

/// Plate height that makes [`FailingKernel`] refuse to extrude.
pub const FAILING_HEIGHT: f64 = 13.0;

/// Answers each inference with the next queued response.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String, ModelError>>>,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(|s| Ok(s.into())).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(error: ModelError) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::from([Err(error)])),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, response: impl Into<String>) {
        self.responses.lock().unwrap().push_back(Ok(response.into()));
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, n: usize) -> InferenceRequest {
        self.requests.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn infer(&self, request: &InferenceRequest) -> Result<String, ModelError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Service {
                status: 400,
                body: "script exhausted".to_string(),
            }))
    }
}

/// Voxel kernel that rejects extrusions of exactly [`FAILING_HEIGHT`].
pub struct FailingKernel(VoxelKernel);

impl Default for FailingKernel {
    fn default() -> Self {
        Self(VoxelKernel::new(32))
    }
}

impl SolidKernel for FailingKernel {
    type Solid = <VoxelKernel as SolidKernel>::Solid;

    fn extrude(&self, outline: &[[f64; 2]], height: f64) -> KernelResult<Self::Solid> {
        if (height - FAILING_HEIGHT).abs() < 1e-9 {
            return Err(KernelError::Geometry("refusing marker height".to_string()));
        }
        self.0.extrude(outline, height)
    }

    fn cut(&self, solid: &Self::Solid, outline: &[[f64; 2]], z_range: [f64; 2]) -> KernelResult<Self::Solid> {
        self.0.cut(solid, outline, z_range)
    }

    fn boss(&self, solid: &Self::Solid, outline: &[[f64; 2]], z_range: [f64; 2]) -> KernelResult<Self::Solid> {
        self.0.boss(solid, outline, z_range)
    }

    fn sphere(&self, radius: f64, center: [f64; 3]) -> KernelResult<Self::Solid> {
        self.0.sphere(radius, center)
    }

    fn block(&self, size: [f64; 3], center: [f64; 3]) -> KernelResult<Self::Solid> {
        self.0.block(size, center)
    }

    fn union(&self, a: &Self::Solid, b: &Self::Solid) -> KernelResult<Self::Solid> {
        self.0.union(a, b)
    }

    fn intersect(&self, a: &Self::Solid, b: &Self::Solid) -> KernelResult<Self::Solid> {
        self.0.intersect(a, b)
    }

    fn translate(&self, solid: &Self::Solid, offset: [f64; 3]) -> KernelResult<Self::Solid> {
        self.0.translate(solid, offset)
    }

    fn bounds(&self, solid: &Self::Solid) -> Aabb {
        self.0.bounds(solid)
    }

    fn volume(&self, solid: &Self::Solid) -> f64 {
        self.0.volume(solid)
    }

    fn export(&self, solid: &Self::Solid, format: ExportFormat, name: &str) -> KernelResult<Vec<u8>> {
        self.0.export(solid, format, name)
    }
}

/// Direct compilation, one attempt per model call, no backoff.
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::for_data_dir(dir.path());
    config.compile_strategy = CompileStrategy::Direct;
    config.retry.upstream_attempts = 1;
    config.retry.backoff = Duration::from_millis(1);
    config.kernel.resolution = 32;
    config
}

pub fn pipeline(dir: &TempDir, model: Arc<ScriptedModel>) -> Pipeline<FailingKernel> {
    let config = test_config(dir);
    let store = PlanStore::open(dir.path()).expect("Failed to open store");
    Pipeline::new(config, store, model, FailingKernel::default())
}

/// Bare plan JSON for a square plate with one centered hole.
pub fn plate_with_hole(size: f64, radius: f64) -> String {
    format!(
        r#"{{"sketch":{{"type":"square","size":{size}}},"extrude":{{"height":5}},"features":[{{"type":"hole","shape":"circle","dimensions":{{"radius":{radius},"pos_x":0,"pos_y":0}}}}],"export_format":"stl"}}"#,
        size = size,
        radius = radius
    )
}

pub fn plate(size: f64, height: f64) -> String {
    format!(
        r#"{{"sketch":{{"type":"square","size":{}}},"extrude":{{"height":{}}},"features":[],"export_format":"stl"}}"#,
        size, height
    )
}
