use std::collections::BTreeMap;

use calcgraph_config::Settings;
use calcgraph_engine::assumptions::ids as assumption_ids;
use calcgraph_engine::CheckpointInput;
use calcgraph_expr::FormulaConstant;
use calcgraph_protocol::{AssumptionUpdate, ErrorCode, PreviewRequest, UncertaintyOptions};
use calcgraph_service::CalcApi;
use calcgraph_store::{FormulaKey, NewCustomFormula};
use serde_json::json;

fn api() -> CalcApi {
    CalcApi::in_memory(Settings::default()).unwrap()
}

fn fixture() -> serde_json::Value {
    serde_json::from_str(include_str!("fixtures/research.json")).unwrap()
}

#[test]
fn calculate_returns_success_envelope() {
    let resp = api().calculate(fixture());
    assert!(resp.success);
    let json = serde_json::to_value(&resp).unwrap();
    assert_eq!(json["data"]["companyName"], "Northwind Logistics");
    assert_eq!(json["data"]["executiveDashboard"]["topUseCases"][0]["id"], "uc-invoice");
    assert!(json.get("error").is_none());
}

#[test]
fn invalid_research_lists_every_path() {
    let mut research = fixture();
    research["useCases"][1]["dataReadiness"] = json!(0);
    research["useCases"][2].as_object_mut().unwrap().remove("runsPerMonth");

    let err = api().calculate(research).into_result().unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationError);
    assert_eq!(err.details.len(), 2);
    assert!(err.details[0].starts_with("useCases[1].dataReadiness:"));
    assert_eq!(err.details[1], "useCases[2].runsPerMonth: is required");
}

#[test]
fn assumption_edits_go_to_browsing_engine_only() {
    let api = api();
    let updated = api
        .update_assumption(&AssumptionUpdate::new(assumption_ids::ADOPTION_RATE, 0.6))
        .into_result()
        .unwrap();
    assert!(updated.is_user_override);
    assert_eq!(updated.current_value, 0.6);

    let err = api
        .update_assumption(&AssumptionUpdate::new(assumption_ids::ADOPTION_RATE, 0.1))
        .into_result()
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationError);

    let err = api.reset_assumption("nope").into_result().unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);

    let reset = api.reset_assumption(assumption_ids::ADOPTION_RATE).into_result().unwrap();
    assert_eq!(reset.current_value, 0.85);
    assert!(!reset.is_user_override);

    let groups = api.assumptions_by_category().into_result().unwrap();
    let total: usize = groups.iter().map(|g| g.assumptions.len()).sum();
    assert_eq!(total, api.list_assumptions().into_result().unwrap().len());
}

#[test]
fn batch_update_is_all_or_nothing() {
    let api = api();
    let resp = api.batch_update(&[
        AssumptionUpdate::new(assumption_ids::VALUE_WEIGHT, 50.0),
        AssumptionUpdate::new(assumption_ids::TTV_WEIGHT, 150.0),
    ]);
    assert!(!resp.success);
    let data = resp.data.as_ref().unwrap();
    assert_eq!(data.applied, 0);
    assert!(data.results[0].success);
    assert!(!data.results[1].success);
    assert_eq!(resp.error.as_ref().unwrap().details.len(), 1);

    let weight = api
        .list_assumptions()
        .into_result()
        .unwrap()
        .into_iter()
        .find(|a| a.id == assumption_ids::VALUE_WEIGHT)
        .unwrap();
    assert_eq!(weight.current_value, 40.0);

    let ok = api
        .batch_update(&[
            AssumptionUpdate::new(assumption_ids::VALUE_WEIGHT, 50.0),
            AssumptionUpdate::new(assumption_ids::TTV_WEIGHT, 20.0),
        ])
        .into_result()
        .unwrap();
    assert_eq!(ok.applied, 2);
}

#[test]
fn formulas_and_health() {
    let api = api();
    let formulas = api.list_formulas().into_result().unwrap();
    assert_eq!(formulas.len(), 13);
    assert_eq!(api.get_formula("priority_score").into_result().unwrap().output_unit.name(), "score");
    assert_eq!(api.get_formula("missing").into_result().unwrap_err().code, ErrorCode::NotFound);

    let health = api.health().into_result().unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.formula_count, 13);
    assert_eq!(health.assumption_count, 16);
}

#[test]
fn state_round_trips_through_import() {
    let source = api();
    source
        .update_assumption(&AssumptionUpdate::new(assumption_ids::CLAUDE_INPUT_PRICE, 4.0))
        .into_result()
        .unwrap();
    let state = source.export_state().into_result().unwrap();

    let checkpoint: CheckpointInput = serde_json::from_value(serde_json::to_value(&state).unwrap()).unwrap();
    let target = api();
    let restored = target.import_state(checkpoint).into_result().unwrap();
    assert_eq!(restored.fingerprint, state.fingerprint);
    assert_eq!(target.export_state().into_result().unwrap().fingerprint, state.fingerprint);

    let mut tampered: CheckpointInput = serde_json::from_value(serde_json::to_value(&state).unwrap()).unwrap();
    tampered.fingerprint = Some("sha256:00".into());
    let err = target.import_state(tampered).into_result().unwrap_err();
    assert_eq!(err.code, ErrorCode::Internal);
    // failed import leaves the browsing engine as it was
    assert_eq!(target.export_state().into_result().unwrap().fingerprint, state.fingerprint);
}

#[test]
fn uncertainty_options_are_honoured() {
    let report = api()
        .uncertainty(fixture(), &UncertaintyOptions { sample_size: Some(2_000), seed: Some(11) })
        .into_result()
        .unwrap();
    assert_eq!(report.sample_size, 2_000);
    assert_eq!(report.opportunities[0].distribution.seed, 11);
    assert_eq!(report.opportunities[0].sensitivity[0].variable_id, "dataMaturityFactor");
}

#[test]
fn custom_formula_lifecycle() {
    let api = api();
    let key = FormulaKey::new("totalAnnualImpact").for_use_case("uc-invoice");
    let draft = |expression: &str| NewCustomFormula {
        key: key.clone(),
        label: "Adjusted impact".into(),
        expression: expression.into(),
        input_fields: vec!["costBenefit".into(), "revenueBenefit".into()],
        constants: vec![FormulaConstant::new("haircut", 0.8)],
        notes: None,
        created_by: Some("analyst@example.com".into()),
    };

    let err = api.create_custom_formula(draft("costBenefit + eval(1)")).into_result().unwrap_err();
    assert_eq!(err.code, ErrorCode::ValidationError);
    assert!(!err.details.is_empty());

    let v1 = api.create_custom_formula(draft("costBenefit + revenueBenefit")).into_result().unwrap();
    let v2 = api.create_custom_formula(draft("(costBenefit + revenueBenefit) * haircut")).into_result().unwrap();
    assert!(v1.is_active && !v2.is_active);

    api.activate_custom_formula(&v2.id.to_string()).into_result().unwrap();
    let listed = api.list_custom_formulas(&key).into_result().unwrap();
    assert_eq!(listed.versions.len(), 2);
    assert_eq!(listed.active.as_ref().map(|f| f.version), Some(2));

    let context: BTreeMap<String, f64> =
        [("costBenefit".to_string(), 200.0), ("revenueBenefit".to_string(), 100.0)].into_iter().collect();
    let result = api.evaluate_custom_formula(&key, &context).into_result().unwrap();
    assert_eq!(result.version, 2);
    assert_eq!(result.evaluation.value, 240.0);

    let missing = api
        .evaluate_custom_formula(&FormulaKey::new("valueScore"), &context)
        .into_result()
        .unwrap_err();
    assert_eq!(missing.code, ErrorCode::NotFound);

    let err = api.activate_custom_formula("00000000-0000-0000-0000-000000000000").into_result().unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);
}

#[test]
fn preview_validates_before_evaluating() {
    let api = api();
    let mut request = PreviewRequest {
        expression: "costSavings + revenueImpact * 0.8".into(),
        context: [("costSavings".to_string(), 100.0), ("revenueImpact".to_string(), 200.0)].into_iter().collect(),
        constants: Vec::new(),
    };
    let ok = api.preview_formula(&request).into_result().unwrap();
    assert_eq!(ok.value, 260.0);

    request.expression = "costSavings + bonus".into();
    let bad = api.preview_formula(&request).into_result().unwrap();
    assert_eq!(bad.value, 0.0);
    assert!(bad.error.unwrap().contains("bonus"));

    let inputs = api.list_available_inputs().into_result().unwrap();
    assert!(inputs.contains_key("benefits"));
}

#[test]
fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.store.database_path = Some(dir.path().join("nested").join("formulas.db"));

    let key = FormulaKey::new("valueScore");
    let created = CalcApi::from_settings(settings.clone())
        .unwrap()
        .create_custom_formula(NewCustomFormula {
            key: key.clone(),
            label: "Score".into(),
            expression: "a * 2".into(),
            input_fields: vec!["a".into()],
            constants: Vec::new(),
            notes: Some("first draft".into()),
            created_by: None,
        })
        .into_result()
        .unwrap();

    let reopened = CalcApi::from_settings(settings).unwrap();
    let listed = reopened.list_custom_formulas(&key).into_result().unwrap();
    assert_eq!(listed.active.map(|f| f.id), Some(created.id));
}
