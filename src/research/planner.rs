//! Planning stage: decompose a query into research sub-task goals.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use crate::llm::{OutputFormat, StageModel};
use crate::research::parsing::{extract_json, normalize_key, parse_list_items};
use crate::research::prompts;
use crate::types::{ResearchPlan, Result};

#[derive(Debug, Deserialize)]
struct PlanResponse {
    #[serde(default)]
    query_analysis: Value,
    #[serde(default)]
    context: Value,
    #[serde(default, alias = "subtasks", alias = "goals")]
    tasks: Vec<Value>,
    #[serde(default)]
    approach: Value,
}

/// Models answer with strings, lists of strings or task objects.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        Value::Object(map) => ["description", "task", "goal", "title", "name"]
            .iter()
            .find_map(|key| map.get(*key).map(value_text))
            .unwrap_or_default(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub struct Planner {
    model: StageModel,
    max_subtasks: usize,
}

impl Planner {
    pub fn new(model: StageModel, max_subtasks: usize) -> Self {
        Self {
            model,
            max_subtasks: max_subtasks.max(1),
        }
    }

    /// Produce a plan with at least one goal.
    ///
    /// Never fails: exhausted retries or an unparseable answer (after one
    /// re-prompt) yield [`ResearchPlan::fallback`], a single goal equal to
    /// the query.
    pub async fn plan(&self, query: &str, prior_context: Option<&str>) -> ResearchPlan {
        let prompt = prompts::planning_prompt(query, self.max_subtasks, prior_context);

        match self.attempt(&prompt).await {
            Ok(Some(plan)) => return plan,
            Ok(None) => {
                tracing::warn!("Plan contained no sub-tasks, re-prompting");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Planning failed, falling back to the raw query");
                return ResearchPlan::fallback(query);
            }
        }

        match self.attempt(&prompts::with_format_reminder(&prompt)).await {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                tracing::warn!("Plan still empty after re-prompt, falling back to the raw query");
                ResearchPlan::fallback(query)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Planning re-prompt failed, falling back to the raw query");
                ResearchPlan::fallback(query)
            }
        }
    }

    async fn attempt(&self, prompt: &str) -> Result<Option<ResearchPlan>> {
        let response = self
            .model
            .generate(prompts::PLANNER_SYSTEM, prompt, OutputFormat::Json)
            .await?;
        let plan = self.parse(&response);
        Ok((!plan.goals.is_empty()).then_some(plan))
    }

    /// Parse a JSON plan, or a plain list of goals when no JSON is present.
    pub fn parse(&self, response: &str) -> ResearchPlan {
        let mut plan = ResearchPlan::default();
        let raw_goals = match extract_json(response) {
            Some(json) => match serde_json::from_str::<PlanResponse>(json) {
                Ok(parsed) => {
                    plan.query_analysis = value_text(&parsed.query_analysis);
                    plan.context = value_text(&parsed.context);
                    plan.approach = value_text(&parsed.approach);
                    parsed.tasks.iter().map(value_text).collect()
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Plan JSON did not match");
                    Vec::new()
                }
            },
            // truncated JSON is not a list
            None if response.contains('{') => Vec::new(),
            None => parse_list_items(response),
        };
        plan.goals = self.normalize_goals(raw_goals);
        plan
    }

    /// Trim, drop empties and duplicates, cap at the configured maximum.
    fn normalize_goals(&self, goals: Vec<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        goals
            .into_iter()
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .filter(|g| seen.insert(normalize_key(g)))
            .take(self.max_subtasks)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerationConstraints, LLMClient, RetryPolicy};
    use crate::types::ResearchError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    struct Scripted(Mutex<VecDeque<Result<String>>>);

    #[async_trait]
    impl LLMClient for Scripted {
        async fn generate(&self, _: &str, _: &str, _: &GenerationConstraints) -> Result<String> {
            self.0
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ResearchError::Internal("script exhausted".into())))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn planner(responses: Vec<Result<String>>, max: usize) -> Planner {
        let client = Arc::new(Scripted(Mutex::new(responses.into())));
        let model = StageModel::new(client, GenerationConstraints::default())
            .with_retry(RetryPolicy::no_retry(), Duration::from_secs(1));
        Planner::new(model, max)
    }

    #[tokio::test]
    async fn test_plan_from_json() {
        let planner = planner(
            vec![Ok(r#"{"query_analysis": "housing", "context": "post-2020",
                "tasks": ["Office vacancy trends", {"description": "Suburban prices"}, "office vacancy  trends"],
                "approach": "compare"}"#
                .to_string())],
            5,
        );
        let plan = planner.plan("Impact of remote work", None).await;
        assert_eq!(plan.goals, vec!["Office vacancy trends", "Suburban prices"]);
        assert_eq!(plan.context, "post-2020");
        assert!(!plan.degraded);
    }

    #[tokio::test]
    async fn test_plan_from_numbered_list_is_capped() {
        let planner = planner(vec![Ok("1. a\n2. b\n3. c\n4. d".to_string())], 2);
        let plan = planner.plan("q", None).await;
        assert_eq!(plan.goals, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_empty_plan_reprompts_once() {
        let planner = planner(
            vec![
                Ok(r#"{"tasks": []}"#.to_string()),
                Ok(r#"{"tasks": ["retry angle"]}"#.to_string()),
            ],
            5,
        );
        let plan = planner.plan("q", None).await;
        assert_eq!(plan.goals, vec!["retry angle"]);
    }

    #[tokio::test]
    async fn test_unparseable_plan_falls_back_to_query() {
        let planner = planner(
            vec![Ok("{ not json".to_string()), Ok("{}".to_string())],
            5,
        );
        let plan = planner.plan("Impact of remote work", None).await;
        assert_eq!(plan.goals, vec!["Impact of remote work"]);
        assert!(plan.degraded);
    }

    #[tokio::test]
    async fn test_generation_failure_falls_back_to_query() {
        let planner = planner(vec![Err(ResearchError::Timeout("slow".into()))], 5);
        let plan = planner.plan("Impact of remote work", None).await;
        assert_eq!(plan, ResearchPlan::fallback("Impact of remote work"));
    }
}
