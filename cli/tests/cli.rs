use assert_cmd::Command;
use assert_fs::prelude::*;
use predicates::prelude::*;

#[test]
fn scan_reports_a_matching_rule_and_exits_zero() {
    let dir = assert_fs::TempDir::new().unwrap();
    let rules = dir.child("rules.toml");
    rules
        .write_str(
            r#"
            [[rule]]
            identifier = "hello_world"

            [[rule.strings]]
            type = "ascii"
            id = "a"
            value = "hello"

            [rule.condition]
            op = "of"
            quantifier = "any"
            "#,
        )
        .unwrap();

    let target = dir.child("sample.txt");
    target.write_str("say hello world").unwrap();

    Command::cargo_bin("wscan")
        .unwrap()
        .arg("scan")
        .arg(rules.path())
        .arg(target.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("hello_world"));
}

#[test]
fn scan_exits_with_one_when_nothing_matches() {
    let dir = assert_fs::TempDir::new().unwrap();
    let rules = dir.child("rules.toml");
    rules
        .write_str(
            r#"
            [[rule]]
            identifier = "never"

            [[rule.strings]]
            type = "ascii"
            id = "a"
            value = "not-present-anywhere"

            [rule.condition]
            op = "of"
            quantifier = "any"
            "#,
        )
        .unwrap();

    let target = dir.child("sample.txt");
    target.write_str("nothing to see here").unwrap();

    Command::cargo_bin("wscan")
        .unwrap()
        .arg("scan")
        .arg(rules.path())
        .arg(target.path())
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty());
}

#[test]
fn scan_rejects_an_invalid_rule_description() {
    let dir = assert_fs::TempDir::new().unwrap();
    let rules = dir.child("rules.toml");
    rules
        .write_str(
            r#"
            [[rule]]
            identifier = "bad"

            [rule.condition]
            op = "of"
            quantifier = "most"
            "#,
        )
        .unwrap();

    let target = dir.child("sample.txt");
    target.write_str("irrelevant").unwrap();

    Command::cargo_bin("wscan")
        .unwrap()
        .arg("scan")
        .arg(rules.path())
        .arg(target.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("error"));
}
