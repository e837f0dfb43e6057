//! Canned stage outputs and run scripts.

use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::mocks::{ScriptedCompletionClient, ScriptedReply};
use crate::pipeline::{decode, StageName, StageResult, ValidationReport};

/// A 120-character idea.
pub const IDEA: &str = "A shared grocery list app for busy households that syncs offline, \
                        suggests recipes from leftovers, and splits the costs.";

/// Stage 1 output.
#[must_use]
pub fn idea_analysis() -> Value {
    json!({
        "summary": "Offline-first shared grocery list with recipe suggestions and cost splitting.",
        "problem": "Households duplicate purchases and waste food because lists live in separate apps.",
        "target_users": ["Families", "Flatmates", "Couples who cook at home"],
        "core_features": [
            {"name": "Shared list", "description": "real-time sync with offline edits"},
            {"name": "Leftover recipes", "description": "suggest meals from items bought"},
            "Cost splitting"
        ]
    })
}

/// Stage 2 output.
#[must_use]
pub fn requirements_planning() -> Value {
    json!({
        "functional_requirements": [
            "Users can create and share lists",
            "Edits made offline merge on reconnect",
            "Receipts can be split between members"
        ],
        "non_functional_requirements": ["Sync within two seconds", "Works on low-end phones"],
        "milestones": ["Prototype", "Private beta", "Public launch"]
    })
}

/// Stage 3 output.
#[must_use]
pub fn technical_design() -> Value {
    json!({
        "architecture": "Mobile clients with a local CRDT store syncing through a small API service.",
        "tech_stack": ["Kotlin", "Swift", "Rust API", "PostgreSQL"],
        "components": ["Sync service", "Recipe recommender", "Billing ledger"]
    })
}

/// Stage 4 output.
#[must_use]
pub fn business_strategy() -> Value {
    json!({
        "market_analysis": "Crowded list market but no product combines lists, recipes and cost sharing.",
        "revenue_model": "Freemium with a household subscription.",
        "go_to_market": ["Partner with student housing", "Referral credits", "App store features"]
    })
}

/// Stage 5 output as the model would send it.
#[must_use]
pub fn validation() -> Value {
    json!({
        "verdict": "Viable niche product with a clear wedge.",
        "strengths": ["Clear pain point", "Simple first version"],
        "risks": ["Sync conflicts", "Low willingness to pay"],
        "recommendations": ["Validate pricing early"]
    })
}

/// Fixture for `stage`.
#[must_use]
pub fn output(stage: StageName) -> Value {
    match stage {
        StageName::IdeaAnalysis => idea_analysis(),
        StageName::RequirementsPlanning => requirements_planning(),
        StageName::TechnicalDesign => technical_design(),
        StageName::BusinessStrategy => business_strategy(),
        StageName::Validation => validation(),
    }
}

/// Fixture for `stage` serialised as a model reply.
#[must_use]
pub fn reply(stage: StageName) -> String {
    output(stage).to_string()
}

/// Scripts every stage to succeed with its fixture on every call.
pub fn script_success(client: &ScriptedCompletionClient) {
    for stage in StageName::ALL {
        client.always(stage.as_str(), ScriptedReply::text(reply(stage)));
    }
}

/// Decoded outputs of stages 1 to 4.
#[must_use]
pub fn upstream_results() -> BTreeMap<StageName, StageResult> {
    StageName::ALL[..4]
        .iter()
        .map(|&stage| (stage, decoded(stage)))
        .collect()
}

/// Decoded outputs of all five stages; validation carries a score of 80.
#[must_use]
pub fn all_results() -> BTreeMap<StageName, StageResult> {
    let mut results = upstream_results();
    let report: ValidationReport = match decode(validation()) {
        Ok(report) => report,
        Err(e) => panic!("validation fixture does not decode: {e}"),
    };
    results.insert(
        StageName::Validation,
        StageResult::Validation(report.scored(80.0, 40.0)),
    );
    results
}

fn decoded(stage: StageName) -> StageResult {
    match StageResult::from_value(stage, output(stage)) {
        Ok(result) => result,
        Err(e) => panic!("fixture for {stage} does not decode: {e}"),
    }
}
