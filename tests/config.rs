//! Configuration loading and validation.
//!
//! Every invalid configuration must fail before the orchestrator makes
//! a single remote call.

use std::path::PathBuf;
use tempfile::TempDir;

use discovery_harness::config::load_config;

fn write_config(body: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("dsc.toml");
    std::fs::write(&path, body).unwrap();
    (tmp, path)
}

const VALID: &str = r#"
[service]
base_url = "https://compliance.example.com/api/v1/"

[case]
name = "Quarterly Discovery"

[[rules]]
id = "rule-a"
confidence = "75..100"

[[rules]]
id = "rule-b"

[query]
supplemental_ids = ["legacy-1"]

[locations]
names = ["Site1", "Site2"]
"#;

#[test]
fn valid_config_loads_with_defaults() {
    let (_tmp, path) = write_config(VALID);
    let cfg = load_config(&path).unwrap();

    // Trailing slash is trimmed so path joins stay predictable.
    assert_eq!(cfg.service.base_url, "https://compliance.example.com/api/v1");
    assert_eq!(cfg.case.search_name(), "Quarterly Discovery Search");

    assert_eq!(cfg.rules.len(), 2);
    assert_eq!(cfg.rules[0].confidence, "75..100");
    // Omitted ranges fall back to the permissive defaults.
    assert_eq!(cfg.rules[1].confidence, "1..100");
    assert_eq!(cfg.rules[1].length, "1..");

    assert_eq!(cfg.resolver.concurrency, 4);
    assert_eq!(cfg.polling.init_max_wait_secs, 300);
    assert_eq!(cfg.polling.init_poll_interval_secs, 10);
    assert_eq!(cfg.polling.progress_max_wait_secs, 3600);
    assert_eq!(cfg.polling.progress_poll_interval_secs, 30);
    assert_eq!(cfg.output.dir, PathBuf::from("./reports"));
}

#[test]
fn explicit_search_name_wins() {
    let body = VALID.replace(
        "name = \"Quarterly Discovery\"",
        "name = \"Quarterly Discovery\"\nsearch_name = \"Custom Search\"",
    );
    let (_tmp, path) = write_config(&body);
    let cfg = load_config(&path).unwrap();
    assert_eq!(cfg.case.search_name(), "Custom Search");
}

#[test]
fn missing_rules_rejected() {
    let body = r#"
[service]
base_url = "https://compliance.example.com"

[case]
name = "Case"

[locations]
names = ["Site1"]
"#;
    let (_tmp, path) = write_config(body);
    let err = load_config(&path).unwrap_err();
    assert!(err.to_string().contains("rules"));
}

#[test]
fn empty_rule_id_rejected() {
    let body = VALID.replace("id = \"rule-a\"", "id = \"  \"");
    let (_tmp, path) = write_config(&body);
    assert!(load_config(&path).is_err());
}

#[test]
fn empty_locations_rejected() {
    let body = VALID.replace("names = [\"Site1\", \"Site2\"]", "names = []");
    let (_tmp, path) = write_config(&body);
    let err = load_config(&path).unwrap_err();
    assert!(err.to_string().contains("locations"));
}

#[test]
fn zero_poll_interval_rejected() {
    let body = format!("{}\n[polling]\ninit_poll_interval_secs = 0\n", VALID);
    let (_tmp, path) = write_config(&body);
    let err = load_config(&path).unwrap_err();
    assert!(err.to_string().contains("intervals"));
}

#[test]
fn interval_exceeding_budget_rejected() {
    let body = format!(
        "{}\n[polling]\nprogress_max_wait_secs = 60\nprogress_poll_interval_secs = 90\n",
        VALID
    );
    let (_tmp, path) = write_config(&body);
    assert!(load_config(&path).is_err());
}

#[test]
fn out_of_range_concurrency_rejected() {
    let body = format!("{}\n[resolver]\nconcurrency = 64\n", VALID);
    let (_tmp, path) = write_config(&body);
    let err = load_config(&path).unwrap_err();
    assert!(err.to_string().contains("concurrency"));
}

#[test]
fn missing_file_is_a_readable_error() {
    let tmp = TempDir::new().unwrap();
    let err = load_config(&tmp.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("read config file"));
}
