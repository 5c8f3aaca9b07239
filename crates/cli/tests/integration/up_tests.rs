//! Up command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn up_creates_the_whole_stack() {
  let env = TestEnv::three_tier();

  env
    .run("up")
    .assert()
    .success()
    .stdout(predicate::str::contains("create container/backend"))
    .stdout(predicate::str::contains("Succeeded: 7"))
    .stdout(predicate::str::contains("Stack 'dev' updated"));

  assert!(env.state_file("dev").is_file());
  assert_eq!(env.runtime_objects("network"), 1);
  assert_eq!(env.runtime_objects("image"), 3);
  assert_eq!(env.runtime_objects("container"), 3);
}

#[test]
fn up_is_idempotent() {
  let env = TestEnv::three_tier();

  env.run("up").assert().success();

  env
    .run("up")
    .assert()
    .success()
    .stdout(predicate::str::contains("No changes"));
  assert_eq!(env.runtime_objects("container"), 3);
}

#[test]
fn port_change_replaces_only_the_frontend() {
  let env = TestEnv::three_tier();
  env.run("up").assert().success();

  env.set_config("frontend_port", "3002");

  env
    .run("up")
    .assert()
    .success()
    .stdout(predicate::str::contains("replace container/frontend"))
    .stdout(predicate::str::contains("container/backend").not())
    .stdout(predicate::str::contains("Succeeded: 1"));
  assert_eq!(env.runtime_objects("container"), 3);
}

#[test]
fn env_change_updates_in_place() {
  let env = TestEnv::three_tier();
  env.run("up").assert().success();

  env.set_config("node_environment", "production");

  env
    .run("up")
    .assert()
    .success()
    .stdout(predicate::str::contains("update container/backend"))
    .stdout(predicate::str::contains("NODE_ENV=production"));
}

#[test]
fn failed_image_skips_its_container_and_exits_one() {
  let env = TestEnv::from_fixture("failing_image.lua");

  env
    .run("up")
    .assert()
    .code(1)
    .stdout(predicate::str::contains("image/broken"))
    .stdout(predicate::str::contains("skipped container/app (dependency image/broken failed)"))
    .stdout(predicate::str::contains("Succeeded: 1"));

  assert_eq!(env.runtime_objects("network"), 1);
  assert_eq!(env.runtime_objects("container"), 0);
}

#[test]
fn missing_config_exits_two() {
  let env = TestEnv::from_fixture("three_tier.lua");

  env
    .run("up")
    .assert()
    .code(2)
    .stderr(predicate::str::contains("frontend_port"));

  assert!(!env.state_file("dev").exists());
}

#[test]
fn dependency_cycle_exits_two() {
  let env = TestEnv::from_fixture("cycle.lua");

  env
    .run("up")
    .assert()
    .code(2)
    .stderr(predicate::str::contains("dependency cycle"));
}

#[test]
fn lua_errors_exit_two() {
  let env = TestEnv::from_fixture("cycle.lua");
  env.write_file("index.lua", "keel.network(");

  env
    .run("up")
    .assert()
    .code(2)
    .stderr(predicate::str::contains("Failed to evaluate program"));
}

#[test]
fn json_output_reports_counts() {
  let env = TestEnv::three_tier();

  let output = env.run("up").arg("--output").arg("json").output().unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["stack"], "dev");
  assert_eq!(json["success"], true);
  assert_eq!(json["serial"], 1);
  assert_eq!(json["counts"]["succeeded"], 7);
  assert_eq!(json["summary"]["create"], 7);
  assert_eq!(json["outcomes"]["container/frontend"]["status"], "succeeded");
}

#[test]
fn stacks_are_isolated() {
  let env = TestEnv::three_tier();
  env.write_file(
    "Keel.prod.yaml",
    "config:\n  frontend_port: 8080\n  backend_port: 8000\n  mongo_host: mongodb://mongo:27017\n",
  );

  env.run("up").assert().success();
  env
    .run("up")
    .arg("--stack")
    .arg("prod")
    .assert()
    .success()
    .stdout(predicate::str::contains("Succeeded: 7"));

  assert!(env.state_file("dev").is_file());
  assert!(env.state_file("prod").is_file());
  assert_eq!(env.runtime_objects("network"), 2);
}

#[test]
fn create_before_delete_flag_is_accepted() {
  let env = TestEnv::three_tier();

  env
    .run("up")
    .arg("--parallelism")
    .arg("1")
    .arg("--replace-strategy")
    .arg("create-before-delete")
    .assert()
    .success();

  env
    .run("up")
    .arg("--replace-strategy")
    .arg("sideways")
    .assert()
    .code(2)
    .stderr(predicate::str::contains("unknown replace strategy"));
}
