//! Prompt templates seam.

use super::messages::language_name;
use super::stage::StageName;
use super::stages::StageInput;

/// A rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// System message.
    pub system: String,
    /// User message.
    pub user: String,
}

/// Renders the prompt of each stage.
pub trait PromptTemplates: Send + Sync + std::fmt::Debug {
    /// Builds the prompt for `stage` from the run input and prior outputs.
    fn render(&self, stage: StageName, input: &StageInput<'_>) -> Prompt;
}

/// Built-in English templates asking for JSON in the requested language.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPromptTemplates;

impl DefaultPromptTemplates {
    fn role(stage: StageName) -> &'static str {
        match stage {
            StageName::IdeaAnalysis => "a product analyst who distils raw ideas",
            StageName::RequirementsPlanning => "a product manager who writes requirements",
            StageName::TechnicalDesign => "a software architect",
            StageName::BusinessStrategy => "a startup business strategist",
            StageName::Validation => "a critical reviewer of product proposals",
        }
    }

    fn task(stage: StageName) -> &'static str {
        match stage {
            StageName::IdeaAnalysis => {
                "Analyse the idea: restate it, name the problem, the target users and the core features."
            }
            StageName::RequirementsPlanning => {
                "Turn the analysis into functional and non-functional requirements and ordered milestones."
            }
            StageName::TechnicalDesign => {
                "Propose an architecture, a technology stack and the main components."
            }
            StageName::BusinessStrategy => {
                "Describe the market, a revenue model and go-to-market steps."
            }
            StageName::Validation => {
                "Review the whole proposal: give a verdict, strengths, risks and recommendations."
            }
        }
    }

    fn shape(stage: StageName) -> &'static str {
        match stage {
            StageName::IdeaAnalysis => {
                r#"{"summary": string, "problem": string, "target_users": [string], "core_features": [string]}"#
            }
            StageName::RequirementsPlanning => {
                r#"{"functional_requirements": [string], "non_functional_requirements": [string], "milestones": [string]}"#
            }
            StageName::TechnicalDesign => {
                r#"{"architecture": string, "tech_stack": [string], "components": [string]}"#
            }
            StageName::BusinessStrategy => {
                r#"{"market_analysis": string, "revenue_model": string, "go_to_market": [string]}"#
            }
            StageName::Validation => {
                r#"{"verdict": string, "strengths": [string], "risks": [string], "recommendations": [string]}"#
            }
        }
    }
}

impl PromptTemplates for DefaultPromptTemplates {
    fn render(&self, stage: StageName, input: &StageInput<'_>) -> Prompt {
        let system = format!(
            "You are {}. Reply with a single JSON object shaped like {} and nothing else. \
             Write every string value in {}.",
            Self::role(stage),
            Self::shape(stage),
            language_name(input.language),
        );

        let mut user = format!("{}\n\nIdea:\n{}", Self::task(stage), input.idea.trim());
        for dep in stage.dependencies() {
            let Some(result) = input.prior.get(dep) else {
                continue;
            };
            let rendered = result
                .to_value()
                .ok()
                .and_then(|value| serde_json::to_string_pretty(&value).ok())
                .unwrap_or_default();
            user.push_str(&format!("\n\nOutput of {dep}:\n{rendered}"));
        }

        Prompt { system, user }
    }
}
