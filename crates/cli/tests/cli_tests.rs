// Integration tests for the calcgraph binary.
//
// --json commands must print exactly one JSON value on stdout, and exit codes
// follow src/exit_codes.rs.
//
// Run with: cargo test -p calcgraph-cli --test cli_tests

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

const FIXTURE: &str = "tests/fixtures/research.json";

fn calcgraph() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_calcgraph"));
    cmd.current_dir(env!("CARGO_MANIFEST_DIR"));
    cmd.env_remove("CALCGRAPH_CONFIG");
    cmd.env_remove("CALCGRAPH_DB");
    cmd.env_remove("CALCGRAPH_LOG");
    cmd
}

fn run(args: &[&str]) -> Output {
    calcgraph().args(args).output().expect("run calcgraph")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// stdout must be a single JSON value.
fn json_of(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim())
        .unwrap_or_else(|e| panic!("stdout is not one JSON value: {}\n{}\nstderr: {}", e, stdout, stderr(output)))
}

fn write_file(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path.to_string_lossy().into_owned()
}

// ===========================================================================
// calculate / recalculate
// ===========================================================================

#[test]
fn calculate_json_envelope() {
    let output = run(&["calculate", FIXTURE, "--json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let val = json_of(&output);
    assert_eq!(val["success"], true);
    assert!(val.get("error").is_none());
    let dash = &val["data"]["executiveDashboard"];
    assert_eq!(dash["totalAnnualValue"]["value"], 1_900_000.0);
    let ids: Vec<&str> = dash["topUseCases"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["uc-invoice", "uc-status", "uc-routing"]);
}

#[test]
fn calculate_human_summary() {
    let output = run(&["calculate", FIXTURE]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Northwind Logistics"));
    assert!(stdout.contains("Critical"));
    assert!(stdout.contains("1,900,000"));
    assert!(stdout.contains("fingerprint: sha256:"));
}

#[test]
fn calculate_reads_stdin() {
    let mut child = calcgraph()
        .args(["calculate", "-", "--json"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(std::fs::read(Path::new(env!("CARGO_MANIFEST_DIR")).join(FIXTURE)).unwrap().as_slice())
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(json_of(&output)["data"]["companyName"], "Northwind Logistics");
}

#[test]
fn invalid_research_exits_with_validation_code() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "bad.json", r#"{"companyName": "", "useCases": []}"#);

    let output = run(&["calculate", &path, "--json"]);
    assert_eq!(output.status.code(), Some(3));
    let val = json_of(&output);
    assert_eq!(val["success"], false);
    assert_eq!(val["error"]["code"], "validation_error");
    assert!(!val["error"]["details"].as_array().unwrap().is_empty());

    let output = run(&["calculate", &path]);
    assert_eq!(output.status.code(), Some(3));
    assert!(output.stdout.is_empty());
    assert!(stderr(&output).contains("error: validation_error"));
}

#[test]
fn unreadable_and_malformed_input() {
    let output = run(&["calculate", "tests/fixtures/does-not-exist.json"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("cannot read"));

    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "broken.json", "{ not json");
    let output = run(&["calculate", &path]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn recalculate_applies_overrides() {
    let base = json_of(&run(&["calculate", FIXTURE, "--json"]));
    let output = run(&["recalculate", FIXTURE, "--set", "implementation_cost_ratio=0.4", "--json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let changed = json_of(&output);

    let cost = |v: &serde_json::Value| v["data"]["executiveDashboard"]["implementationCost"].as_f64().unwrap();
    assert!((cost(&changed) - 2.0 * cost(&base)).abs() < 1e-6);
}

#[test]
fn recalculate_rejects_out_of_range_override() {
    let output = run(&["recalculate", FIXTURE, "--set", "adoption_rate=2", "--json"]);
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(json_of(&output)["error"]["code"], "validation_error");

    // clap rejects a malformed assignment before anything runs
    let output = run(&["recalculate", FIXTURE, "--set", "adoption_rate"]);
    assert_eq!(output.status.code(), Some(2));
}

// ===========================================================================
// uncertainty
// ===========================================================================

#[test]
fn uncertainty_clamps_samples_and_keeps_seed() {
    let output = run(&["uncertainty", FIXTURE, "--samples", "10", "--seed", "5", "--json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let data = &json_of(&output)["data"];
    assert_eq!(data["sampleSize"], 1_000);
    assert_eq!(data["seed"], 5);
    let opportunities = data["opportunities"].as_array().unwrap();
    assert_eq!(opportunities.len(), 3);
    assert_eq!(opportunities[1]["distribution"]["seed"], 6);
    assert!(opportunities.iter().all(|o| o["distribution"]["convergenceAchieved"].is_boolean()));
}

#[test]
fn uncertainty_is_reproducible() {
    let args = ["uncertainty", FIXTURE, "--samples", "1000", "--seed", "9", "--json"];
    let a = json_of(&run(&args));
    let b = json_of(&run(&args));
    assert_eq!(a["data"]["opportunities"], b["data"]["opportunities"]);
}

// ===========================================================================
// assumptions / formulas / health
// ===========================================================================

#[test]
fn assumptions_list_and_groups() {
    let all = json_of(&run(&["assumptions", "list", "--json"]));
    assert_eq!(all["data"].as_array().unwrap().len(), 16);

    let groups = json_of(&run(&["assumptions", "list", "--by-category", "--json"]));
    let total: usize = groups["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["assumptions"].as_array().unwrap().len())
        .sum();
    assert_eq!(total, 16);
}

#[test]
fn assumptions_set_is_all_or_nothing() {
    let output = run(&["assumptions", "set", "adoption_rate=0.6", "value_weight=500", "--json"]);
    assert_eq!(output.status.code(), Some(3));
    let val = json_of(&output);
    assert_eq!(val["success"], false);
    assert_eq!(val["data"]["applied"], 0);
    assert_eq!(val["data"]["results"][0]["success"], true);
    assert_eq!(val["data"]["results"][1]["success"], false);

    let output = run(&["assumptions", "set", "adoption_rate=0.6"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("applied 1 of 1"));
}

#[test]
fn formulas_show_and_missing() {
    let list = json_of(&run(&["formulas", "list", "--json"]));
    assert_eq!(list["data"].as_array().unwrap().len(), 13);

    let output = run(&["formulas", "show", "priority_score"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("priority_score"));

    let output = run(&["formulas", "show", "no_such_formula", "--json"]);
    assert_eq!(output.status.code(), Some(4));
    assert_eq!(json_of(&output)["error"]["code"], "not_found");
}

#[test]
fn health_reports_registry_sizes() {
    let val = json_of(&run(&["health", "--json"]));
    assert_eq!(val["data"]["status"], "ok");
    assert_eq!(val["data"]["formulaCount"], 13);
    assert_eq!(val["data"]["assumptionCount"], 16);
}

// ===========================================================================
// expressions and custom formulas
// ===========================================================================

#[test]
fn expr_preview() {
    let output = run(&[
        "expr", "preview", "costSavings + revenueImpact * 0.8",
        "--var", "costSavings=100", "--var", "revenueImpact=200", "--json",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(json_of(&output)["data"]["value"], 260.0);

    let output = run(&["expr", "preview", "costSavings + bonus", "--var", "costSavings=100", "--json"]);
    assert_eq!(output.status.code(), Some(3));
    let val = json_of(&output);
    assert!(val["data"]["error"].as_str().unwrap().contains("bonus"));

    let output = run(&["expr", "preview", "__import__('os')"]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn custom_formula_lifecycle_persists_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("formulas.db");
    let db = db.to_str().unwrap();
    let create = |expression: &str| {
        run(&[
            "custom", "create", "--db", db,
            "--field", "totalAnnualImpact", "--use-case", "uc-invoice",
            "--label", "Adjusted impact", "--expr", expression,
            "--input", "costBenefit", "--input", "revenueBenefit",
            "--const", "haircut=0.8", "--json",
        ])
    };

    let rejected = create("costBenefit + eval(1)");
    assert_eq!(rejected.status.code(), Some(3));

    let v1 = json_of(&create("costBenefit + revenueBenefit"));
    let v2 = json_of(&create("(costBenefit + revenueBenefit) * haircut"));
    assert_eq!(v1["data"]["isActive"], true);
    assert_eq!(v2["data"]["version"], 2);
    assert_eq!(v2["data"]["isActive"], false);

    let v2_id = v2["data"]["id"].as_str().unwrap();
    let output = run(&["custom", "activate", v2_id, "--db", db, "--json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let listed = json_of(&run(&[
        "custom", "list", "--db", db, "--field", "totalAnnualImpact", "--use-case", "uc-invoice", "--json",
    ]));
    assert_eq!(listed["data"]["versions"].as_array().unwrap().len(), 2);
    assert_eq!(listed["data"]["active"]["version"], 2);

    let evaluated = json_of(&run(&[
        "custom", "eval", "--db", db, "--field", "totalAnnualImpact", "--use-case", "uc-invoice",
        "--var", "costBenefit=200", "--var", "revenueBenefit=100", "--json",
    ]));
    assert_eq!(evaluated["data"]["version"], 2);
    assert_eq!(evaluated["data"]["evaluation"]["value"], 240.0);

    let missing = run(&["custom", "eval", "--db", db, "--field", "valueScore"]);
    assert_eq!(missing.status.code(), Some(4));

    let unknown = run(&["custom", "activate", "00000000-0000-0000-0000-000000000000", "--db", db]);
    assert_eq!(unknown.status.code(), Some(5));
}

#[test]
fn custom_create_help_and_blank_scope() {
    let help = run(&["custom", "--help"]);
    let text = String::from_utf8_lossy(&help.stdout);
    assert!(text.contains("only the first version of a field starts active"), "{}", text);

    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("formulas.db");
    let db = db.to_str().unwrap();
    let create = |report: &str| {
        json_of(&run(&[
            "custom", "create", "--db", db, "--field", "roi", "--report", report,
            "--label", "ROI", "--expr", "costBenefit * 2", "--input", "costBenefit", "--json",
        ]))
    };
    let first = create("");
    let second = create("");
    assert_eq!(first["data"]["isActive"], true);
    assert_eq!(second["data"]["version"], 2);
    assert_eq!(second["data"]["isActive"], false);
    assert!(second["data"].get("reportId").is_none());
}

// ===========================================================================
// state / config
// ===========================================================================

#[test]
fn state_export_then_import() {
    let dir = tempfile::tempdir().unwrap();
    let exported = run(&["state", "export", "--set", "claude_input_price=4"]);
    assert!(exported.status.success(), "stderr: {}", stderr(&exported));
    let state = json_of(&exported);
    let path = write_file(dir.path(), "checkpoint.json", &String::from_utf8_lossy(&exported.stdout));

    let output = run(&["state", "import", &path, "--json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(json_of(&output)["data"]["fingerprint"], state["fingerprint"]);

    // the --json envelope is accepted too
    let enveloped = run(&["state", "export", "--json"]);
    let path = write_file(dir.path(), "envelope.json", &String::from_utf8_lossy(&enveloped.stdout));
    assert!(run(&["state", "import", &path]).status.success());

    let mut tampered = state.clone();
    tampered["fingerprint"] = "sha256:00".into();
    let path = write_file(dir.path(), "tampered.json", &tampered.to_string());
    let output = run(&["state", "import", &path, "--json"]);
    assert_eq!(output.status.code(), Some(6));
    assert_eq!(json_of(&output)["error"]["code"], "internal");
}

#[test]
fn config_file_is_honoured() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_file(dir.path(), "settings.toml", "[report]\ntop_n = 1\n");
    let val = json_of(&run(&["calculate", FIXTURE, "--config", &config, "--json"]));
    assert_eq!(val["data"]["executiveDashboard"]["topUseCases"].as_array().unwrap().len(), 1);

    let broken = write_file(dir.path(), "broken.toml", "[monte_carlo]\nmin_samples = 0\n");
    let output = run(&["health", "--config", &broken]);
    assert_eq!(output.status.code(), Some(10));
    assert!(stderr(&output).contains("min_samples"));
}
