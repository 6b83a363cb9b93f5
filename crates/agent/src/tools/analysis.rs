use async_trait::async_trait;
use serde_json::{json, Value};

use super::{required_str, Tool, ToolError, ToolOutput};

pub const NEUTRAL_INSIGHT: &str = "No notable patterns detected in these results.";

struct InsightRule {
    question_terms: &'static [&'static str],
    result_terms: &'static [&'static str],
    insight: &'static str,
}

/// Each rule fires when the question mentions any of its question terms
/// (or the rule has none) and the result text mentions any of its result
/// terms (or the rule has none).
const RULES: &[InsightRule] = &[
    InsightRule {
        question_terms: &[],
        result_terms: &["\"row_count\":0"],
        insight: "The query returned no rows; check filters and the spelling of names.",
    },
    InsightRule {
        question_terms: &[],
        result_terms: &["\"truncated\":true"],
        insight: "Results hit the row cap; aggregate or filter to see complete coverage.",
    },
    InsightRule {
        question_terms: &["emission", "co2", "carbon"],
        result_terms: &[],
        insight: "Emissions are reported in million tonnes (Mt); compare pathways at the same \
                  year to judge ambition.",
    },
    InsightRule {
        question_terms: &[],
        result_terms: &["net zero", "net_zero"],
        insight: "Net-zero pathways show the steepest emissions decline and the fastest \
                  renewable build-out.",
    },
    InsightRule {
        question_terms: &["capacity", "gw", "installed"],
        result_terms: &[],
        insight: "Capacity figures are installed GW, not generation; storage and solar run at \
                  lower utilization than nuclear.",
    },
    InsightRule {
        question_terms: &["trend", "over time", "growth", "increase", "decline", "by year"],
        result_terms: &["2030", "2040", "2050"],
        insight: "Compare the 2030, 2040 and 2050 values to read the trajectory rather than a \
                  single year.",
    },
    InsightRule {
        question_terms: &["compare", " vs", "versus", "difference", "between"],
        result_terms: &[],
        insight: "Differences between scenarios are easiest to read as ratios to the Reference \
                  scenario.",
    },
    InsightRule {
        question_terms: &["solar", "wind", "renewable"],
        result_terms: &["solar", "wind", "renewable"],
        insight: "Renewable capacity grows fastest under policy and net-zero pathways.",
    },
    InsightRule {
        question_terms: &["gas", "fossil"],
        result_terms: &["gas", "fossil"],
        insight: "Fossil capacity only keeps growing in baseline and delayed pathways.",
    },
    InsightRule {
        question_terms: &["region", "europe", "asia", "america"],
        result_terms: &[],
        insight: "Regional totals scale with demand; normalize before ranking regions.",
    },
];

/// Maps query results and the original question to short canned insights.
/// Pure: no I/O and no failure mode besides the neutral default.
pub fn analyze(result_text: &str, question: &str) -> String {
    let question = question.to_lowercase();
    let result = result_text.to_lowercase();

    let insights = RULES
        .iter()
        .filter(|rule| mentions_any(&question, rule.question_terms))
        .filter(|rule| mentions_any(&result, rule.result_terms))
        .map(|rule| rule.insight)
        .collect::<Vec<_>>();

    if insights.is_empty() {
        return NEUTRAL_INSIGHT.to_string();
    }
    insights.iter().map(|insight| format!("- {insight}")).collect::<Vec<_>>().join("\n")
}

fn mentions_any(haystack: &str, terms: &[&str]) -> bool {
    terms.is_empty() || terms.iter().any(|term| haystack.contains(term))
}

pub struct AnalysisTool;

#[async_trait]
impl Tool for AnalysisTool {
    fn name(&self) -> &'static str {
        "analyze_results"
    }

    fn description(&self) -> &'static str {
        "Produce short business insights for query results in the context of the user's question."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "result_text": {
                    "type": "string",
                    "description":
                        "Result JSON returned by execute_sql. Defaults to the latest result."
                },
                "question": {
                    "type": "string",
                    "description": "The user's question. Defaults to the current question."
                }
            },
            "required": ["result_text", "question"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let result_text = required_str(&input, "result_text")?;
        let question = required_str(&input, "question")?;
        Ok(ToolOutput::Text(analyze(result_text, question)))
    }
}
