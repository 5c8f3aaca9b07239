//! State command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn state_before_first_up() {
  let env = TestEnv::three_tier();

  env
    .keel_cmd()
    .arg("state")
    .assert()
    .success()
    .stdout(predicate::str::contains("No state for stack 'dev'"));
}

#[test]
fn state_lists_recorded_resources() {
  let env = TestEnv::three_tier();
  env.run("up").assert().success();

  env
    .keel_cmd()
    .arg("state")
    .assert()
    .success()
    .stdout(predicate::str::contains("Serial: 1"))
    .stdout(predicate::str::contains("Resources: 7"))
    .stdout(predicate::str::contains("container/mongo"));
}

#[test]
fn serial_grows_only_with_changes() {
  let env = TestEnv::three_tier();
  env.run("up").assert().success();
  env.run("up").assert().success();
  env.set_config("node_environment", "production");
  env.run("up").assert().success();

  let output = env.keel_cmd().arg("state").arg("--output").arg("json").output().unwrap();
  assert!(output.status.success());

  let record: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(record["serial"], 2);
  assert_eq!(record["resources"]["container/backend"]["status"], "healthy");
  assert!(
    record["resources"]["container/backend"]["inputs"]["envs"]
      .as_array()
      .unwrap()
      .contains(&serde_json::json!("NODE_ENV=production"))
  );
}

#[test]
fn state_from_env_stack() {
  let env = TestEnv::three_tier();
  env.run("up").assert().success();

  env
    .keel_cmd()
    .env("KEEL_STACK", "prod")
    .arg("state")
    .assert()
    .success()
    .stdout(predicate::str::contains("No state for stack 'prod'"));
}
