//! Typed stage outputs and the assembled deliverable.
//!
//! Model replies are prose-shaped, so every field deserialises leniently:
//! strings accept any JSON value, lists accept a single string or a list of
//! objects, and unknown keys are kept in `extra`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::stage::StageName;
use crate::errors::IdeaflowError;

mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    pub fn list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Array(items) => items.into_iter().filter_map(item_text).collect(),
            Value::Null => Vec::new(),
            other => item_text(other).into_iter().collect(),
        })
    }

    fn item_text(item: Value) -> Option<String> {
        match item {
            Value::Null => None,
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Object(map) => {
                let title = ["name", "title", "feature", "item"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_str));
                let detail = ["description", "details", "detail"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_str));
                match (title, detail) {
                    (Some(t), Some(d)) => Some(format!("{t}: {d}")),
                    (Some(t), None) => Some(t.to_string()),
                    (None, Some(d)) => Some(d.to_string()),
                    (None, None) => Some(Value::Object(map).to_string()),
                }
            }
            other => Some(other.to_string()),
        }
    }
}

/// Stage 1 output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdeaAnalysis {
    /// One-paragraph restatement of the idea.
    #[serde(deserialize_with = "lenient::text")]
    pub summary: String,
    /// The problem being solved.
    #[serde(deserialize_with = "lenient::text", alias = "problem_statement")]
    pub problem: String,
    /// Who the product is for.
    #[serde(deserialize_with = "lenient::list", alias = "targetUsers")]
    pub target_users: Vec<String>,
    /// Headline features.
    #[serde(deserialize_with = "lenient::list", alias = "coreFeatures", alias = "features")]
    pub core_features: Vec<String>,
    /// Anything else the model returned.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Stage 2 output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequirementsPlan {
    /// What the product must do.
    #[serde(deserialize_with = "lenient::list", alias = "functionalRequirements")]
    pub functional_requirements: Vec<String>,
    /// Quality attributes.
    #[serde(deserialize_with = "lenient::list", alias = "nonFunctionalRequirements")]
    pub non_functional_requirements: Vec<String>,
    /// Delivery milestones in order.
    #[serde(deserialize_with = "lenient::list")]
    pub milestones: Vec<String>,
    /// Anything else the model returned.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Stage 3 output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechnicalDesign {
    /// Architecture overview.
    #[serde(deserialize_with = "lenient::text")]
    pub architecture: String,
    /// Languages, frameworks and services.
    #[serde(deserialize_with = "lenient::list", alias = "techStack")]
    pub tech_stack: Vec<String>,
    /// Major components.
    #[serde(deserialize_with = "lenient::list")]
    pub components: Vec<String>,
    /// Anything else the model returned.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Stage 4 output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessStrategy {
    /// Market and competition.
    #[serde(deserialize_with = "lenient::text", alias = "marketAnalysis")]
    pub market_analysis: String,
    /// How the product makes money.
    #[serde(deserialize_with = "lenient::text", alias = "revenueModel")]
    pub revenue_model: String,
    /// Launch steps.
    #[serde(deserialize_with = "lenient::list", alias = "goToMarket")]
    pub go_to_market: Vec<String>,
    /// Anything else the model returned.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Stage 5 output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationReport {
    /// Overall judgement in one or two sentences.
    #[serde(deserialize_with = "lenient::text")]
    pub verdict: String,
    /// What is convincing.
    #[serde(deserialize_with = "lenient::list")]
    pub strengths: Vec<String>,
    /// What could sink the idea.
    #[serde(deserialize_with = "lenient::list", alias = "weaknesses")]
    pub risks: Vec<String>,
    /// Suggested next steps.
    #[serde(deserialize_with = "lenient::list")]
    pub recommendations: Vec<String>,
    /// Score from the quality scorer, 0 to 100.
    #[serde(skip_deserializing)]
    pub quality_score: f64,
    /// Whether the score reached the configured minimum.
    #[serde(skip_deserializing)]
    pub accepted: bool,
    /// Anything else the model returned.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ValidationReport {
    /// Applies the scorer's verdict. Score keys echoed by the model are
    /// dropped from `extra` so they cannot shadow the real score.
    #[must_use]
    pub fn scored(mut self, score: f64, min_quality_score: f64) -> Self {
        let score = score.clamp(0.0, 100.0);
        self.quality_score = (score * 10.0).round() / 10.0;
        self.accepted = score >= min_quality_score;
        self.extra.remove("quality_score");
        self.extra.remove("accepted");
        self
    }
}

/// Decodes a recovered value into a stage output type.
///
/// A top-level array is narrowed to its first object.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    let value = match value {
        Value::Array(items) => items
            .into_iter()
            .find(Value::is_object)
            .unwrap_or_else(|| Value::Object(Map::new())),
        other => other,
    };
    serde_json::from_value(value)
}

/// Output of any stage, tagged by stage name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "output", rename_all = "snake_case")]
pub enum StageResult {
    /// Stage 1 output.
    IdeaAnalysis(IdeaAnalysis),
    /// Stage 2 output.
    RequirementsPlanning(RequirementsPlan),
    /// Stage 3 output.
    TechnicalDesign(TechnicalDesign),
    /// Stage 4 output.
    BusinessStrategy(BusinessStrategy),
    /// Stage 5 output.
    Validation(ValidationReport),
}

impl StageResult {
    /// Decodes `value` as the output of `stage`.
    pub fn from_value(stage: StageName, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match stage {
            StageName::IdeaAnalysis => Self::IdeaAnalysis(decode(value)?),
            StageName::RequirementsPlanning => Self::RequirementsPlanning(decode(value)?),
            StageName::TechnicalDesign => Self::TechnicalDesign(decode(value)?),
            StageName::BusinessStrategy => Self::BusinessStrategy(decode(value)?),
            StageName::Validation => Self::Validation(decode(value)?),
        })
    }

    /// The stage that produced this output.
    #[must_use]
    pub fn stage(&self) -> StageName {
        match self {
            Self::IdeaAnalysis(_) => StageName::IdeaAnalysis,
            Self::RequirementsPlanning(_) => StageName::RequirementsPlanning,
            Self::TechnicalDesign(_) => StageName::TechnicalDesign,
            Self::BusinessStrategy(_) => StageName::BusinessStrategy,
            Self::Validation(_) => StageName::Validation,
        }
    }

    /// The output without its stage tag.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::IdeaAnalysis(v) => serde_json::to_value(v),
            Self::RequirementsPlanning(v) => serde_json::to_value(v),
            Self::TechnicalDesign(v) => serde_json::to_value(v),
            Self::BusinessStrategy(v) => serde_json::to_value(v),
            Self::Validation(v) => serde_json::to_value(v),
        }
    }
}

/// Borrowed view of the four outputs stage 5 consumes.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamOutputs<'a> {
    /// Stage 1 output.
    pub analysis: &'a IdeaAnalysis,
    /// Stage 2 output.
    pub plan: &'a RequirementsPlan,
    /// Stage 3 output.
    pub design: &'a TechnicalDesign,
    /// Stage 4 output.
    pub strategy: &'a BusinessStrategy,
}

impl<'a> UpstreamOutputs<'a> {
    /// Narrows the untyped results map, failing if any stage 1 to 4 output
    /// is missing.
    pub fn narrow(results: &'a BTreeMap<StageName, StageResult>) -> Result<Self, IdeaflowError> {
        let missing = |stage: StageName| {
            IdeaflowError::stage(
                StageName::Validation.as_str(),
                format!("missing output of {stage}"),
            )
        };

        let analysis = match results.get(&StageName::IdeaAnalysis) {
            Some(StageResult::IdeaAnalysis(v)) => v,
            _ => return Err(missing(StageName::IdeaAnalysis)),
        };
        let plan = match results.get(&StageName::RequirementsPlanning) {
            Some(StageResult::RequirementsPlanning(v)) => v,
            _ => return Err(missing(StageName::RequirementsPlanning)),
        };
        let design = match results.get(&StageName::TechnicalDesign) {
            Some(StageResult::TechnicalDesign(v)) => v,
            _ => return Err(missing(StageName::TechnicalDesign)),
        };
        let strategy = match results.get(&StageName::BusinessStrategy) {
            Some(StageResult::BusinessStrategy(v)) => v,
            _ => return Err(missing(StageName::BusinessStrategy)),
        };

        Ok(Self {
            analysis,
            plan,
            design,
            strategy,
        })
    }

    /// Plain text of every field, one item per line, for quality scoring.
    #[must_use]
    pub fn scoring_text(&self) -> String {
        let mut lines: Vec<&str> = vec![
            self.analysis.summary.as_str(),
            self.analysis.problem.as_str(),
            self.design.architecture.as_str(),
            self.strategy.market_analysis.as_str(),
            self.strategy.revenue_model.as_str(),
        ];
        let lists = [
            &self.analysis.target_users,
            &self.analysis.core_features,
            &self.plan.functional_requirements,
            &self.plan.non_functional_requirements,
            &self.plan.milestones,
            &self.design.tech_stack,
            &self.design.components,
            &self.strategy.go_to_market,
        ];
        lines.extend(lists.into_iter().flatten().map(String::as_str));
        lines.retain(|line| !line.trim().is_empty());
        lines.join("\n")
    }
}

/// Metadata attached to a finished deliverable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverableMetadata {
    /// Wall-clock time of the whole run.
    pub processing_time_ms: u64,
    /// Score given by the quality scorer.
    pub quality_score: f64,
    /// When the deliverable was assembled.
    pub generated_at: DateTime<Utc>,
}

/// The assembled result of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deliverable {
    /// The idea as submitted.
    pub idea: String,
    /// Requested output language.
    pub language: String,
    /// Stage 1 output.
    pub analysis: IdeaAnalysis,
    /// Stage 2 output.
    pub plan: RequirementsPlan,
    /// Stage 3 output.
    pub design: TechnicalDesign,
    /// Stage 4 output.
    pub strategy: BusinessStrategy,
    /// Stage 5 output.
    pub validation: ValidationReport,
    /// Timing and scoring.
    pub metadata: DeliverableMetadata,
}

impl Deliverable {
    /// Assembles the deliverable from a results map holding all five outputs.
    pub fn assemble(
        idea: &str,
        language: &str,
        results: &BTreeMap<StageName, StageResult>,
        processing_time_ms: u64,
    ) -> Result<Self, IdeaflowError> {
        let upstream = UpstreamOutputs::narrow(results)?;
        let validation = match results.get(&StageName::Validation) {
            Some(StageResult::Validation(v)) => v.clone(),
            _ => {
                return Err(IdeaflowError::stage(
                    StageName::Validation.as_str(),
                    "missing validation output",
                ))
            }
        };

        Ok(Self {
            idea: idea.to_string(),
            language: language.to_string(),
            analysis: upstream.analysis.clone(),
            plan: upstream.plan.clone(),
            design: upstream.design.clone(),
            strategy: upstream.strategy.clone(),
            metadata: DeliverableMetadata {
                processing_time_ms,
                quality_score: validation.quality_score,
                generated_at: Utc::now(),
            },
            validation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_lenient_fields() {
        let analysis: IdeaAnalysis = decode(json!({
            "summary": "A planner",
            "problem_statement": 42,
            "targetUsers": "students",
            "features": [
                {"name": "Sync", "description": "works offline"},
                {"title": "Share"},
                "  ",
                null,
                "Export"
            ],
            "confidence": 0.8
        }))
        .unwrap();

        assert_eq!(analysis.summary, "A planner");
        assert_eq!(analysis.problem, "42");
        assert_eq!(analysis.target_users, vec!["students"]);
        assert_eq!(analysis.core_features, vec!["Sync: works offline", "Share", "Export"]);
        assert_eq!(analysis.extra.get("confidence"), Some(&json!(0.8)));
    }

    #[test]
    fn test_decode_narrows_array() {
        let design: TechnicalDesign =
            decode(json!([1, {"architecture": "monolith"}, {"architecture": "ignored"}])).unwrap();
        assert_eq!(design.architecture, "monolith");

        let empty: TechnicalDesign = decode(json!([1, 2])).unwrap();
        assert_eq!(empty, TechnicalDesign::default());
    }

    #[test]
    fn test_marker_object_decodes_to_defaults() {
        let plan: RequirementsPlan =
            decode(json!({"error": "no data", "context": "requirements_planning", "fallback": true}))
                .unwrap();
        assert!(plan.milestones.is_empty());
        assert_eq!(plan.extra.get("fallback"), Some(&json!(true)));
    }

    #[test]
    fn test_validation_score_is_not_taken_from_model() {
        let report: ValidationReport =
            decode(json!({"verdict": "ok", "quality_score": 99, "accepted": true})).unwrap();
        assert_eq!(report.quality_score, 0.0);
        assert!(!report.accepted);
    }

    #[test]
    fn test_scored_report_overrides_model_keys() {
        let report: ValidationReport =
            decode(json!({"verdict": "ok", "quality_score": 99, "accepted": true})).unwrap();
        let report = report.scored(37.26, 40.0);

        assert_eq!(report.quality_score, 37.3);
        assert!(!report.accepted);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["quality_score"], json!(37.3));
        assert_eq!(value["accepted"], json!(false));

        assert!(ValidationReport::default().scored(140.0, 40.0).accepted);
        assert_eq!(ValidationReport::default().scored(140.0, 40.0).quality_score, 100.0);
    }

    #[test]
    fn test_stage_result_tagging() {
        let result = StageResult::from_value(StageName::TechnicalDesign, fixtures::technical_design())
            .unwrap();
        assert_eq!(result.stage(), StageName::TechnicalDesign);

        let tagged = serde_json::to_value(&result).unwrap();
        assert_eq!(tagged["stage"], "technical_design");
        assert_eq!(tagged["output"], result.to_value().unwrap());
    }

    #[test]
    fn test_narrow_reports_missing_stage() {
        let mut results = BTreeMap::new();
        results.insert(
            StageName::IdeaAnalysis,
            StageResult::from_value(StageName::IdeaAnalysis, fixtures::idea_analysis()).unwrap(),
        );
        let err = UpstreamOutputs::narrow(&results).unwrap_err();
        assert!(err.to_string().contains("requirements_planning"));
    }

    #[test]
    fn test_assemble_deliverable() {
        let results = fixtures::all_results();
        let deliverable = Deliverable::assemble("an idea", "en", &results, 1234).unwrap();

        assert_eq!(deliverable.metadata.processing_time_ms, 1234);
        assert_eq!(deliverable.metadata.quality_score, deliverable.validation.quality_score);
        assert!(!deliverable.analysis.summary.is_empty());
        assert!(!deliverable.strategy.revenue_model.is_empty());

        let text = UpstreamOutputs::narrow(&results).unwrap().scoring_text();
        assert!(text.lines().count() > 10);
    }
}
