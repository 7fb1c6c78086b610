use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use httpmock::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn cargo_bin(dir: &assert_fs::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("smokepit").expect("binary exists");
    cmd.current_dir(dir.path());
    for key in [
        "SMOKEPIT_SUITE",
        "SMOKEPIT_PROFILE",
        "SMOKEPIT_BASE_URL",
        "SMOKEPIT_INSECURE",
        "SMOKEPIT_STRICTNESS",
        "SMOKEPIT_TIMEOUT",
        "SMOKEPIT_TELEGRAM_ID",
        "SMOKEPIT_ADMIN_EMAIL",
        "SMOKEPIT_ADMIN_PASSWORD",
        "RUST_LOG",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

const SUITE: &str = r#"[
  { "name": "Health Check", "method": "GET", "path": "/health", "expected": 200 },
  { "name": "Get Admin Stats", "method": "GET", "path": "/api/admin/stats", "auth": "admin", "expected": 200 }
]"#;

#[test]
fn displays_help() {
    let temp = assert_fs::TempDir::new().unwrap();
    cargo_bin(&temp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Endpoint smoke-test runner"));
}

#[test]
fn displays_version() {
    let temp = assert_fs::TempDir::new().unwrap();
    cargo_bin(&temp)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn missing_suite_is_fatal() {
    let temp = assert_fs::TempDir::new().unwrap();
    cargo_bin(&temp)
        .args(["--suite", "missing.json"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("missing.json"));
}

#[test]
fn lists_builtin_suite_without_traffic() {
    let temp = assert_fs::TempDir::new().unwrap();
    cargo_bin(&temp)
        .args(["--list", "--base-url", "http://127.0.0.1:1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/api/product/18"))
        .stdout(predicate::str::contains("22 endpoints"));
}

#[test]
fn passing_run_exits_zero_and_writes_report() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("suite.json").write_str(SUITE).unwrap();
    let server = MockServer::start();
    let health = server.mock(|when, then| {
        when.method(GET).path("/health");
        then.status(200).body("ok");
    });

    cargo_bin(&temp)
        .args(["--suite", "suite.json", "--report", "out/report.json"])
        .args(["--base-url", &server.base_url()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Health Check"))
        .stdout(predicate::str::contains("success rate: 50.0%"));

    health.assert();
    temp.child("out/report.json")
        .assert(predicate::str::contains("\"skipped\": 1"));
}

#[test]
fn failing_run_exits_one() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("suite.json").write_str(SUITE).unwrap();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/health");
        then.status(503).body("maintenance");
    });

    cargo_bin(&temp)
        .args(["--suite", "suite.json", "--base-url", &server.base_url()])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("expected status 200, got 503"));
}

#[test]
fn profile_from_config_file_is_applied() {
    let temp = assert_fs::TempDir::new().unwrap();
    let server = MockServer::start();
    let product = server.mock(|when, then| {
        when.method(GET).path("/api/product/42");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"success":false}"#);
    });

    temp.child("suites/products.json")
        .write_str(
            r#"{"endpoints":[{"name":"Get Specific Product","method":"GET","path":"/api/product/:id","expected":200}]}"#,
        )
        .unwrap();
    temp.child("smokepit.json")
        .write_str(&format!(
            r#"{{
  "suite": "suites/products.json",
  "profiles": {{
    "mock": {{ "baseUrl": "{}", "strictness": "warn", "placeholders": {{ "id": "42" }} }}
  }}
}}"#,
            server.base_url()
        ))
        .unwrap();

    cargo_bin(&temp)
        .args(["--profile", "mock"])
        .assert()
        .success()
        .stdout(predicate::str::contains("warning:"));

    product.assert();
}
