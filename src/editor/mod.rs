//! Natural-language edits to an existing plan.
//!
//! An edit runs in four steps:
//! 1. the request is analysed and its target(s) resolved against the plan
//! 2. the model proposes an updated plan for those targets
//! 3. only the target subtrees are merged from the proposal
//! 4. grammar violations are repaired minimally and reported

mod merge;
mod repair;
mod request;
mod target;

use cadplan_core::defaults::{complete, InferredDimension};
use cadplan_core::grammar::validate_plan;
use cadplan_core::Plan;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{CadError, CadResult};
use crate::llm::{negotiate, prompts, LanguageModel};

pub use merge::{merge, Merge};
pub use repair::{repair, Adjustment};
pub use request::{Action, Clause, EditRequest, Ordinal, Placement};
pub use target::{resolve, score, Target};

#[derive(Debug, Clone, Serialize)]
pub struct EditOutcome {
    pub plan: Plan,
    pub targets: Vec<Target>,
    pub adjustments: Vec<Adjustment>,
    pub inferred: Vec<InferredDimension>,
    pub attempts: u32,
}

pub struct Editor<'a, M: LanguageModel + ?Sized> {
    model: &'a M,
    config: &'a Config,
}

impl<'a, M: LanguageModel + ?Sized> Editor<'a, M> {
    pub fn new(model: &'a M, config: &'a Config) -> Self {
        Self { model, config }
    }

    pub async fn edit(&self, plan: &Plan, text: &str) -> CadResult<EditOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CadError::UnresolvedTarget(
                "modification request is empty".to_string(),
            ));
        }

        let request = EditRequest::parse(text);
        let targets = resolve(plan, &request)?;
        let labels: Vec<String> = targets.iter().map(Target::to_string).collect();
        info!(targets = ?labels, "Resolved edit targets");

        let system = prompts::edit_system();
        let input = prompts::edit_input(plan, text, &labels);
        let accepted = negotiate(self.model, self.config, &system, &input, |response| {
            let proposal =
                Plan::from_json(response).map_err(|e| CadError::SchemaViolation(e.to_string()))?;
            let Merge { mut plan, moved } = merge(plan, &proposal, &targets)?;
            let inferred = complete(&mut plan);
            let adjustments = repair(&mut plan, &moved);
            validate_plan(&plan).map_err(CadError::GrammarViolation)?;
            Ok((plan, inferred, adjustments))
        })
        .await?;

        let (plan, inferred, adjustments) = accepted.value;
        for adjustment in &adjustments {
            warn!(
                location = %adjustment.location,
                key = %adjustment.key,
                rule = %adjustment.rule,
                from = adjustment.from,
                to = adjustment.to,
                "Adjusted edited value to satisfy the feature grammar"
            );
        }

        Ok(EditOutcome {
            plan,
            targets,
            adjustments,
            inferred,
            attempts: accepted.attempts,
        })
    }
}
