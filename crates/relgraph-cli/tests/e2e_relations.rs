//! E2E CLI workflow tests: init, partner registration, staged relation
//! lifecycle, promotion, canonical graph propagation and the changelog.
//!
//! Each test runs the `relgraph` binary as a subprocess in an isolated temp
//! directory.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

const TENANT: &str = "BPNL00000000TNT1";

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

/// Build a Command targeting the relgraph binary, rooted in `dir`.
fn rg_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("relgraph"));
    cmd.current_dir(dir);
    cmd.env("RELGRAPH_LOG", "error");
    cmd.env_remove("FORMAT");
    cmd
}

/// Initialize a project with a default tenant and three partners.
fn init_project() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    rg_cmd(dir.path())
        .args(["init", "--tenant", TENANT])
        .assert()
        .success();
    for partner in ["BP-1", "BP-2", "BP-3"] {
        rg_cmd(dir.path())
            .args(["partner", "add", partner])
            .assert()
            .success();
    }
    dir
}

/// Run a command with `--json` and parse stdout.
fn json(dir: &Path, args: &[&str]) -> Value {
    let output = rg_cmd(dir)
        .args(args)
        .arg("--json")
        .output()
        .expect("command should not crash");
    assert!(
        output.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid JSON on stdout")
}

// ---------------------------------------------------------------------------
// Project setup
// ---------------------------------------------------------------------------

#[test]
fn commands_before_init_report_not_initialized() {
    let dir = TempDir::new().expect("tempdir");
    rg_cmd(dir.path())
        .args(["entity", "list", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E1001"));
}

#[test]
fn init_twice_requires_force() {
    let dir = init_project();
    rg_cmd(dir.path()).arg("init").assert().failure();
    rg_cmd(dir.path())
        .args(["init", "--force"])
        .assert()
        .success();
}

#[test]
fn root_flag_targets_another_directory() {
    let dir = init_project();
    let elsewhere = TempDir::new().expect("tempdir");
    let root = dir.path().to_string_lossy().to_string();
    let partners = json(elsewhere.path(), &["--root", &root, "partner", "list"]);
    assert_eq!(partners.as_array().map(Vec::len), Some(3));
}

// ---------------------------------------------------------------------------
// Staged relations
// ---------------------------------------------------------------------------

#[test]
fn input_lifecycle_via_cli() {
    let dir = init_project();

    let created = json(
        dir.path(),
        &["input", "create", "--id", "REL-1", "--type", "IsManagedBy", "--source", "BP-1", "--target", "BP-2"],
    );
    assert_eq!(created["externalId"], "REL-1");
    assert_eq!(created["states"][0]["type"], "ACTIVE");

    let updated = json(
        dir.path(),
        &[
            "input", "update", "REL-1", "--type", "IsManagedBy", "--source", "BP-1", "--target", "BP-3",
            "--valid-from", "2024-01-01T00:00:00Z", "--valid-to", "2025-01-01T00:00:00Z", "--state", "inactive",
        ],
    );
    assert_eq!(updated["businessPartnerTargetExternalId"], "BP-3");
    assert_eq!(updated["states"][0]["type"], "INACTIVE");

    let page = json(dir.path(), &["input", "list", "--target", "BP-3"]);
    assert_eq!(page["totalElements"], 1);
    assert_eq!(page["content"][0]["externalId"], "REL-1");

    let sharing = json(dir.path(), &["input", "sharing", "REL-1"]);
    assert_eq!(sharing["sharing"]["stateType"], "Initial");

    let promoted = json(
        dir.path(),
        &["output", "upsert", "REL-1", "--type", "IsManagedBy", "--source-bpnl", "BPNL000000000001", "--target-bpnl", "BPNL000000000003"],
    );
    assert_eq!(promoted["sourceBpnL"], "BPNL000000000001");

    let sharing = json(dir.path(), &["input", "sharing", "REL-1"]);
    assert_eq!(sharing["sharing"]["stateType"], "Success");

    let changes = json(dir.path(), &["changelog", "--subject", "REL-1"]);
    assert_eq!(changes["totalElements"], 3);

    rg_cmd(dir.path())
        .args(["input", "delete", "REL-1"])
        .assert()
        .success();
    rg_cmd(dir.path())
        .args(["input", "show", "REL-1", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2001"));
}

#[test]
fn duplicate_create_and_self_relation_fail_with_codes() {
    let dir = init_project();
    json(
        dir.path(),
        &["input", "create", "--id", "REL-1", "--type", "IsOwnedBy", "--source", "BP-1", "--target", "BP-2"],
    );

    rg_cmd(dir.path())
        .args(["input", "create", "--id", "REL-1", "--type", "IsOwnedBy", "--source", "BP-1", "--target", "BP-2", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2002"));

    rg_cmd(dir.path())
        .args(["input", "create", "--type", "IsOwnedBy", "--source", "BP-1", "--target", "BP-1", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2005"));

    rg_cmd(dir.path())
        .args(["input", "create", "--type", "IsOwnedBy", "--source", "BP-1", "--target", "BP-404", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2004"));
}

#[test]
fn import_batch_is_all_or_nothing() {
    let dir = init_project();
    let batch = dir.path().join("batch.json");
    std::fs::write(
        &batch,
        r#"[
            {"externalId": "B-1", "relationType": "IsManagedBy",
             "businessPartnerSourceExternalId": "BP-1", "businessPartnerTargetExternalId": "BP-2"},
            {"externalId": "B-2", "relationType": "IsManagedBy",
             "businessPartnerSourceExternalId": "BP-2", "businessPartnerTargetExternalId": "BP-404"}
        ]"#,
    )
    .expect("write batch");

    rg_cmd(dir.path())
        .args(["input", "import", "batch.json", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2004"));

    let page = json(dir.path(), &["input", "list"]);
    assert_eq!(page["totalElements"], 0);
}

#[test]
fn missing_tenant_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    rg_cmd(dir.path()).arg("init").assert().success();
    rg_cmd(dir.path())
        .args(["partner", "list", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing_tenant"));
}

// ---------------------------------------------------------------------------
// Canonical graph
// ---------------------------------------------------------------------------

#[test]
fn alternative_headquarters_close_into_a_clique() {
    let dir = init_project();
    for (bpnl, created) in [
        ("BPNL000000000001", "2000-01-01T00:00:00Z"),
        ("BPNL000000000002", "2001-01-01T00:00:00Z"),
        ("BPNL000000000003", "2002-01-01T00:00:00Z"),
    ] {
        rg_cmd(dir.path())
            .args(["entity", "add", bpnl, "--created-at", created])
            .assert()
            .success();
    }

    let first = json(
        dir.path(),
        &["graph", "upsert", "--type", "IsAlternativeHeadquarterFor", "--source", "BPNL000000000002", "--target", "BPNL000000000003"],
    );
    assert_eq!(first["kind"], "Created");
    assert_eq!(first["relation"]["businessPartnerSourceBpnl"], "BPNL000000000003");

    json(
        dir.path(),
        &["graph", "upsert", "--type", "IsAlternativeHeadquarterFor", "--source", "BPNL000000000001", "--target", "BPNL000000000002"],
    );

    let edges = json(dir.path(), &["graph", "list", "--type", "IsAlternativeHeadquarterFor"]);
    assert_eq!(edges.as_array().map(Vec::len), Some(3));

    let again = json(
        dir.path(),
        &["graph", "upsert", "--type", "IsAlternativeHeadquarterFor", "--source", "BPNL000000000003", "--target", "BPNL000000000001"],
    );
    assert_eq!(again["kind"], "NoChange");
}

#[test]
fn temporal_alternative_headquarter_is_rejected() {
    let dir = init_project();
    for bpnl in ["BPNL000000000001", "BPNL000000000002"] {
        rg_cmd(dir.path()).args(["entity", "add", bpnl]).assert().success();
    }
    rg_cmd(dir.path())
        .args([
            "graph", "upsert", "--type", "IsAlternativeHeadquarterFor",
            "--source", "BPNL000000000001", "--target", "BPNL000000000002",
            "--valid-from", "2024-01-01T00:00:00Z", "--valid-to", "2025-01-01T00:00:00Z", "--json",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2006"));
}

#[test]
fn overlaps_lists_colliding_management_edges() {
    let dir = init_project();
    for bpnl in ["BPNL000000000001", "BPNL000000000002", "BPNL000000000003"] {
        rg_cmd(dir.path()).args(["entity", "add", bpnl]).assert().success();
    }
    json(
        dir.path(),
        &[
            "graph", "upsert", "--type", "IsManagedBy", "--source", "BPNL000000000001", "--target", "BPNL000000000002",
            "--valid-from", "2024-01-01T00:00:00Z", "--valid-to", "2024-12-31T00:00:00Z",
        ],
    );

    let hits = json(
        dir.path(),
        &[
            "graph", "overlaps", "--type", "IsManagedBy", "--source", "BPNL000000000001", "--target", "BPNL000000000003",
            "--valid-from", "2024-06-01T00:00:00Z", "--valid-to", "2025-06-01T00:00:00Z",
        ],
    );
    assert_eq!(hits.as_array().map(Vec::len), Some(1));
    assert_eq!(hits[0]["businessPartnerTargetBpnl"], "BPNL000000000002");

    let legal_entity_changes = json(dir.path(), &["changelog", "--kind", "legal-entity"]);
    assert_eq!(legal_entity_changes["totalElements"], 2);
}

#[test]
fn text_output_has_headers() {
    let dir = init_project();
    rg_cmd(dir.path())
        .args(["partner", "list"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("EXTERNAL_ID  TYPE  BPNL\n"));
}
