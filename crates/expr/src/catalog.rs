// Catalog of report fields a custom formula may reference

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputField {
    pub key: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub category: &'static str,
}

const fn field(
    key: &'static str,
    label: &'static str,
    description: &'static str,
    category: &'static str,
) -> InputField {
    InputField { key, label, description, category }
}

pub const AVAILABLE_INPUTS: &[InputField] = &[
    field("revenueBenefit", "Revenue Benefit ($)", "Annual revenue increase from AI use case", "benefits"),
    field("costBenefit", "Cost Benefit ($)", "Annual cost savings from AI use case", "benefits"),
    field("cashFlowBenefit", "Cash Flow Benefit ($)", "Annual cash flow improvement", "benefits"),
    field("riskBenefit", "Risk Benefit ($)", "Annual risk reduction value", "benefits"),
    field("totalAnnualImpact", "Total Annual Impact ($)", "Sum of all benefit categories", "calculated"),
    field("valueScore", "Value Score (0-100)", "Normalized value score", "calculated"),
    field("ttvScore", "TTV Score (0-100)", "Time-to-value score", "calculated"),
    field("annualTokenCost", "Annual Token Cost ($)", "Annual AI API costs", "calculated"),
    field("probabilityOfSuccess", "Probability of Success (%)", "Estimated success probability", "risk"),
    field("timeToValueMonths", "Time to Value (months)", "Months until value realization", "timing"),
    field("effortScore", "Effort Score (0-100)", "Implementation effort estimate, higher means more effort", "effort"),
    field("maxTotalImpact", "Max Total Impact ($)", "Highest impact among all use cases", "context"),
    field("weightValue", "Value Weight (%)", "Weight for value in priority scoring", "weights"),
    field("weightTtv", "TTV Weight (%)", "Weight for time-to-value in scoring", "weights"),
    field("weightEffort", "Effort Weight (%)", "Weight for effort in priority scoring", "weights"),
    field("avgInputTokens", "Avg Input Tokens", "Average input tokens per AI call", "ai"),
    field("avgOutputTokens", "Avg Output Tokens", "Average output tokens per AI call", "ai"),
    field("inputTokenCost", "Input Token Cost ($/1M)", "Cost per million input tokens", "ai"),
    field("outputTokenCost", "Output Token Cost ($/1M)", "Cost per million output tokens", "ai"),
    field("runsPerYear", "Runs Per Year", "Estimated annual AI invocations", "ai"),
    field("implementationCost", "Implementation Cost ($)", "One-time implementation cost", "costs"),
];

pub fn inputs_by_category() -> BTreeMap<&'static str, Vec<InputField>> {
    let mut grouped: BTreeMap<&'static str, Vec<InputField>> = BTreeMap::new();
    for input in AVAILABLE_INPUTS {
        grouped.entry(input.category).or_default().push(*input);
    }
    grouped
}
