use assert_cmd::cargo;
use assert_cmd::assert::OutputAssertExt;
use predicates::prelude::*;
use std::process::Command;
use tempfile::TempDir;

fn db_path(home: &TempDir) -> std::path::PathBuf {
    home.path().join("ledger.db")
}

#[test]
fn positions_empty_db_no_color_when_piped() {
    let home = TempDir::new().expect("failed to create temp dir");

    let mut cmd = Command::new(cargo::cargo_bin!("equity-ledger"));
    cmd.arg("--db-path").arg(db_path(&home));
    cmd.arg("--no-color");
    cmd.arg("trade").arg("positions").arg("--owner").arg("u1");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("No open positions"))
        .stdout(predicate::str::contains("\u{001b}[").not());
}

#[test]
fn buy_then_sell_round_trips_through_the_binary() {
    let home = TempDir::new().expect("failed to create temp dir");
    let db = db_path(&home);

    let mut buy = Command::new(cargo::cargo_bin!("equity-ledger"));
    buy.arg("--db-path").arg(&db).arg("--no-color");
    buy.args([
        "trade", "buy", "--owner", "u1", "-s", "AAPL", "-q", "100", "-p", "150", "-d", "2024-01-15",
    ]);
    buy.assert().success();

    let mut sell = Command::new(cargo::cargo_bin!("equity-ledger"));
    sell.arg("--db-path").arg(&db).arg("--no-color").arg("--json");
    sell.args([
        "trade", "sell", "--owner", "u1", "-s", "AAPL", "-q", "40", "-p", "170", "-d", "2024-02-01",
    ]);
    let output = sell.assert().success().get_output().stdout.clone();
    let parsed: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(parsed[0]["quantity_sold"], serde_json::json!("40"));
}

#[test]
fn sell_beyond_available_shares_exits_nonzero() {
    let home = TempDir::new().expect("failed to create temp dir");
    let db = db_path(&home);

    let mut buy = Command::new(cargo::cargo_bin!("equity-ledger"));
    buy.arg("--db-path").arg(&db).arg("--no-color");
    buy.args([
        "trade", "buy", "--owner", "u1", "-s", "AAPL", "-q", "10", "-p", "150", "-d", "2024-01-15",
    ]);
    buy.assert().success();

    let mut sell = Command::new(cargo::cargo_bin!("equity-ledger"));
    sell.arg("--db-path").arg(&db).arg("--no-color");
    sell.args([
        "trade", "sell", "--owner", "u1", "-s", "AAPL", "-q", "20", "-p", "170", "-d", "2024-02-01",
    ]);
    sell.assert()
        .failure()
        .stderr(predicate::str::contains("insufficient shares"));
}
