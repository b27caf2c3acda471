// Human-readable renderings. `--json` bypasses all of this.

use calcgraph_engine::{Assumption, EngineState, FormulaSummary};
use calcgraph_expr::Evaluation;
use calcgraph_protocol::BatchUpdateResult;
use calcgraph_service::{AssumptionGroup, CalculatedReport, CustomFormulaVersions, UncertaintyReport};
use calcgraph_store::CustomFormula;
use serde::Serialize;

use crate::util::{format_amount, pad_left, pad_right};

pub(crate) fn pretty<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("error: cannot serialize output: {}", e),
    }
}

fn percent(ratio: f64) -> String {
    if ratio.is_finite() {
        format!("{:.1}%", ratio * 100.0)
    } else {
        "n/a".to_string()
    }
}

pub(crate) fn report(report: &CalculatedReport) {
    let dash = &report.executive_dashboard;
    println!("{}  (report {})", report.company_name, report.report_id);
    println!();
    println!(
        "{}  {}  {}  {}  {}  {}",
        pad_left("#", 2),
        pad_right("Use case", 32),
        pad_right("Tier", 8),
        pad_right("Phase", 5),
        pad_left("Priority", 8),
        pad_left("Annual value", 14),
    );
    for ranked in &dash.top_use_cases {
        let phase = report
            .use_cases
            .iter()
            .find(|uc| uc.id == ranked.id)
            .map(|uc| format!("{:?}", uc.scoring.recommended_phase))
            .unwrap_or_default();
        println!(
            "{}  {}  {}  {}  {}  {}",
            pad_left(&ranked.rank.to_string(), 2),
            pad_right(&ranked.name, 32),
            pad_right(&format!("{:?}", ranked.priority_tier), 8),
            pad_right(&phase, 5),
            pad_left(&format!("{:.1}", ranked.priority_score), 8),
            pad_left(&format_amount(ranked.annual_value), 14),
        );
    }
    println!();

    let rows = [
        ("Revenue benefit", format_amount(dash.total_revenue_benefit.value())),
        ("Cost benefit", format_amount(dash.total_cost_benefit.value())),
        ("Cash flow benefit", format_amount(dash.total_cash_flow_benefit.value())),
        ("Risk benefit", format_amount(dash.total_risk_benefit.value())),
        ("Total annual value", format_amount(dash.total_annual_value.value())),
        ("Annual token cost", format_amount(dash.total_annual_token_cost.value())),
        ("Implementation cost", format_amount(dash.implementation_cost)),
        ("ROI", checked(dash.roi.is_ok(), percent(dash.roi.value()))),
        (
            "Payback (months)",
            checked(dash.payback_period.is_ok(), format!("{:.1}", dash.payback_period.value())),
        ),
        (
            "Value per 1M tokens",
            checked(
                dash.value_per_million_tokens.is_ok(),
                format_amount(dash.value_per_million_tokens.value()),
            ),
        ),
    ];
    for (label, value) in rows {
        println!("{}  {}", pad_right(label, 20), pad_left(&value, 14));
    }
    println!();
    println!("fingerprint: {}", report.fingerprint);
}

fn checked(ok: bool, rendered: String) -> String {
    if ok {
        rendered
    } else {
        "n/a".to_string()
    }
}

pub(crate) fn uncertainty(report: &UncertaintyReport) {
    println!(
        "{}  ({} samples, seed {})",
        report.company_name, report.sample_size, report.seed
    );
    println!();
    println!(
        "{}  {}  {}  {}  {}  {}",
        pad_right("Opportunity", 28),
        pad_left("Point", 12),
        pad_left("P10", 12),
        pad_left("Median", 12),
        pad_left("P90", 12),
        pad_right("Widest input", 24),
    );
    for opp in &report.opportunities {
        let d = &opp.distribution;
        let widest = opp.sensitivity.first().map(|s| s.label.as_str()).unwrap_or("");
        println!(
            "{}  {}  {}  {}  {}  {}",
            pad_right(&opp.name, 28),
            pad_left(&format_amount(opp.point_estimate), 12),
            pad_left(&format_amount(d.p10), 12),
            pad_left(&format_amount(d.median), 12),
            pad_left(&format_amount(d.p90), 12),
            pad_right(widest, 24),
        );
        if d.failed_samples > 0 {
            println!("  {} samples failed to evaluate", d.failed_samples);
        }
        if !d.convergence_achieved {
            println!("  mean has not converged at {} samples", d.sample_size);
        }
    }
}

pub(crate) fn assumptions(list: &[Assumption]) {
    for a in list {
        let marker = if a.is_user_override { "*" } else { " " };
        println!(
            "{}{}  {}  [{} .. {}]  {}",
            marker,
            pad_right(&a.id, 34),
            pad_left(&format!("{}", a.current_value), 10),
            a.min,
            a.max,
            a.label,
        );
    }
}

pub(crate) fn assumption_groups(groups: &[AssumptionGroup]) {
    for (i, group) in groups.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("{}", group.label);
        assumptions(&group.assumptions);
    }
}

pub(crate) fn batch(result: &BatchUpdateResult) {
    println!("applied {} of {} updates", result.applied, result.results.len());
    for item in &result.results {
        match &item.error {
            Some(error) => println!("  {}  {}", pad_right(&item.id, 34), error),
            None => println!("  {}  ok", item.id),
        }
    }
}

pub(crate) fn formulas(list: &[FormulaSummary]) {
    for f in list {
        println!("{}  {}  {}", pad_right(&f.id, 34), pad_right(&f.version, 6), f.name);
    }
}

pub(crate) fn formula(f: &FormulaSummary) {
    println!("{} v{}  {}", f.id, f.version, f.name);
    println!("  {}", f.derivation);
    println!("  inputs: {}", f.required_variables.join(", "));
    println!("  unit:   {}", f.output_unit);
}

pub(crate) fn evaluation(e: &Evaluation) {
    for step in &e.steps {
        println!("  {}  = {}", pad_right(&step.label, 40), step.formatted);
    }
    if e.error.is_none() {
        println!("{}", e.value);
    }
}

pub(crate) fn custom_formula(f: &CustomFormula) {
    let state = if f.is_active { "active" } else { "inactive" };
    println!("{}  v{}  {}  {}", f.id, f.version, state, f.label);
    println!("  {}", f.expression);
}

pub(crate) fn custom_versions(v: &CustomFormulaVersions) {
    if v.versions.is_empty() {
        println!("no versions");
    }
    for f in &v.versions {
        custom_formula(f);
    }
}

pub(crate) fn state_summary(state: &EngineState) {
    let overrides = state.assumptions.iter().filter(|a| a.is_user_override).count();
    println!(
        "restored {} assumptions ({} overridden), {} audit entries",
        state.assumptions.len(),
        overrides,
        state.audit_log.len()
    );
    println!("fingerprint: {}", state.fingerprint);
}
