//! Plan command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn plan_lists_creates_by_step() {
  let env = TestEnv::three_tier();

  env
    .run("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("Step 1:"))
    .stdout(predicate::str::contains("Step 3:"))
    .stdout(predicate::str::contains("+ create network/net"))
    .stdout(predicate::str::contains("7 to create"));
}

#[test]
fn plan_changes_nothing() {
  let env = TestEnv::three_tier();

  env.run("plan").assert().success();

  assert!(!env.state_file("dev").exists());
  assert_eq!(env.runtime_objects("container"), 0);
}

#[test]
fn plan_after_up_is_empty() {
  let env = TestEnv::three_tier();
  env.run("up").assert().success();

  env
    .run("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("No changes"));
}

#[test]
fn plan_shows_replacement_reason() {
  let env = TestEnv::three_tier();
  env.run("up").assert().success();
  env.set_config("frontend_port", "3002");

  env
    .run("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("replace container/frontend"))
    .stdout(predicate::str::contains("(forces replacement)"))
    .stdout(predicate::str::contains("1 to replace"));
}

#[test]
fn plan_marks_values_known_after_apply() {
  let env = TestEnv::three_tier();

  env
    .run("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("image: (known after apply)"));
}

#[test]
fn plan_out_writes_json() {
  let env = TestEnv::three_tier();
  let out = env.path().join("plan.json");

  env
    .run("plan")
    .arg("--out")
    .arg(&out)
    .assert()
    .success()
    .stdout(predicate::str::contains("Plan written to"));

  let plan: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
  assert_eq!(plan["stack"], "dev");
  assert_eq!(plan["entries"]["container/backend"]["action"], "create");
  assert_eq!(plan["entries"]["container/backend"]["step"], 3);
  assert_eq!(plan["entries"]["network/net"]["step"], 1);
}

#[test]
fn plan_json_output_has_id_and_summary() {
  let env = TestEnv::three_tier();

  let output = env.run("plan").arg("--output").arg("json").output().unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["id"].as_str().unwrap().len(), 20);
  assert_eq!(json["summary"]["create"], 7);
  assert_eq!(json["plan"]["entries"]["image/mongo"]["action"], "create");
}

#[test]
fn missing_program_exits_two() {
  let env = TestEnv::three_tier();

  env
    .keel_cmd()
    .arg("plan")
    .arg("--file")
    .arg(env.path().join("missing.lua"))
    .assert()
    .code(2)
    .stderr(predicate::str::contains("program not found"));
}
