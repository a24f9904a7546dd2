//! Text-to-plan translation.

use cadplan_core::defaults::{complete, InferredDimension};
use cadplan_core::grammar::validate_plan;
use cadplan_core::Plan;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{CadError, CadResult};
use crate::llm::{negotiate, prompts, LanguageModel};

/// A fully specified, grammar-valid plan and how it was obtained.
#[derive(Debug, Clone, Serialize)]
pub struct Translation {
    pub plan: Plan,
    /// Dimensions the model left out and inference filled in.
    pub inferred: Vec<InferredDimension>,
    pub attempts: u32,
}

pub struct Translator<'a, M: LanguageModel + ?Sized> {
    model: &'a M,
    config: &'a Config,
}

impl<'a, M: LanguageModel + ?Sized> Translator<'a, M> {
    pub fn new(model: &'a M, config: &'a Config) -> Self {
        Self { model, config }
    }

    /// Translates a design request. Nothing is persisted here.
    pub async fn translate(&self, request: &str) -> CadResult<Translation> {
        let request = request.trim();
        if request.is_empty() {
            return Err(CadError::SchemaViolation(
                "design request is empty".to_string(),
            ));
        }

        let system = prompts::translate_system(self.config.export_format);
        let accepted = negotiate(self.model, self.config, &system, request, accept_plan).await?;
        let (plan, inferred) = accepted.value;

        for dim in &inferred {
            debug!(feature = ?dim.feature, key = %dim.key, value = dim.value, "Inferred dimension");
        }
        info!(
            sketch = plan.sketch.kind_name(),
            features = plan.features.len(),
            attempts = accepted.attempts,
            "Translated request into plan"
        );
        Ok(Translation {
            plan,
            inferred,
            attempts: accepted.attempts,
        })
    }
}

/// Strict parse, explicit defaults, then grammar validation.
fn accept_plan(text: &str) -> CadResult<(Plan, Vec<InferredDimension>)> {
    let mut plan = Plan::from_json(text).map_err(|e| CadError::SchemaViolation(e.to_string()))?;
    let inferred = complete(&mut plan);
    validate_plan(&plan).map_err(CadError::GrammarViolation)?;
    Ok((plan, inferred))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadplan_core::Rule;

    #[test]
    fn test_accept_fills_missing_depth() {
        let (plan, inferred) = accept_plan(
            r#"{"sketch":{"type":"square","size":40},"extrude":{"height":5},
                "features":[{"type":"cut","shape":"circle","dimensions":{"radius":4}}],
                "export_format":"stl"}"#,
        )
        .unwrap();
        assert_eq!(plan.features[0].dim("depth"), Some(3.0));
        assert_eq!(inferred.len(), 3);
    }

    #[test]
    fn test_accept_reports_default_thickness() {
        let (plan, inferred) = accept_plan(
            r#"{"sketch":{"type":"circle","radius":30},"extrude":{},"features":[],
                "export_format":"obj"}"#,
        )
        .unwrap();
        assert_eq!(plan.thickness(), 5.0);
        assert_eq!(inferred.len(), 1);
        assert_eq!(inferred[0].feature, None);
        assert_eq!(inferred[0].key, "height");
    }

    #[test]
    fn test_accept_rejects_fenced_json() {
        let err = accept_plan("```json\n{}\n```").unwrap_err();
        assert!(matches!(err, CadError::SchemaViolation(_)));
    }

    #[test]
    fn test_accept_reports_grammar_rule() {
        let err = accept_plan(
            r#"{"sketch":{"type":"square","size":50},"extrude":{"height":5},
                "features":[{"type":"hole","shape":"circle","dimensions":{"radius":25}}],
                "export_format":"stl"}"#,
        )
        .unwrap_err();
        assert_eq!(err.rule(), Some(Rule::HalfSize));
    }
}
