use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Command;

fn doctrail_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_doctrail"))
}

fn write_fixture(dir: &Path) -> Result<PathBuf> {
    let fixture = json!({
        "items": [
            { "id": 10, "subtype": 0, "modified": "2021-06-01 11:00:00" },
            { "id": 11, "parent_id": 10, "modified": "2021-06-01 12:00:00" },
            { "id": 12, "parent_id": 10, "catalog": 2, "modified": "2021-06-01 12:00:00" },
            { "id": 20, "subtype": 0, "modified": "2021-06-01 11:00:00" },
            { "id": 21, "parent_id": 20, "modified": "2021-06-01 13:00:00" }
        ],
        "events": [
            { "event_id": 1, "audited": "2021-06-01 12:30:00", "data_id": 99 }
        ]
    });
    let path = dir.join("repo.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&fixture)?)?;
    Ok(path)
}

fn run(args: &[&str]) -> Result<Value> {
    let output = Command::new(doctrail_bin())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .context("spawn doctrail")?;
    anyhow::ensure!(
        output.status.success(),
        "doctrail {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).context("parse doctrail output")
}

#[test]
fn traverse_emits_batch_and_checkpoint() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fixture = write_fixture(dir.path())?;
    let fixture = fixture.to_str().context("utf-8 path")?;

    let batch = run(&["traverse", "--fixture", fixture])?;
    assert_eq!(batch["status"], "batch");
    let ids: Vec<i64> = batch["items"]
        .as_array()
        .context("items")?
        .iter()
        .filter(|item| item["kind"] == "upsert")
        .filter_map(|item| item["id"].as_i64())
        .collect();
    assert_eq!(ids, vec![10, 20, 11, 21]);

    let checkpoint = batch["checkpoint"].as_str().context("checkpoint")?;
    assert_eq!(checkpoint, "2021-06-01 13:00:00,21,2021-06-01 12:30:00,1");

    let next = run(&["traverse", "--fixture", fixture, "--checkpoint", checkpoint])?;
    assert_eq!(next["status"], "up_to_date");
    Ok(())
}

#[test]
fn exhaust_applies_config_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fixture = write_fixture(dir.path())?;
    let config = dir.path().join("traversal.toml");
    std::fs::write(
        &config,
        "included_locations = \"20\"\ngenealogist = \"single\"\nreplay_historical_deletes = true\n",
    )?;

    let summary = run(&[
        "exhaust",
        "--fixture",
        fixture.to_str().context("utf-8 path")?,
        "--config",
        config.to_str().context("utf-8 path")?,
        "--batch-size",
        "1",
    ])?;
    assert_eq!(summary["up_to_date"], true);
    assert_eq!(summary["upserts"], 2);
    assert_eq!(summary["deletes"], 1);
    assert!(summary["genealogist"]["queries"].as_u64().is_some());
    Ok(())
}

#[test]
fn schema_describes_config() -> Result<()> {
    let schema = run(&["schema"])?;
    let properties = schema["properties"].as_object().context("properties")?;
    assert!(properties.contains_key("included_locations"));
    assert!(properties.contains_key("hidden_items"));
    Ok(())
}
