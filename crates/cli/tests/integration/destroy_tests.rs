//! Destroy command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn destroy_removes_everything() {
  let env = TestEnv::three_tier();
  env.run("up").assert().success();

  env
    .keel_cmd()
    .arg("destroy")
    .assert()
    .success()
    .stdout(predicate::str::contains("delete container/frontend"))
    .stdout(predicate::str::contains("Stack 'dev' destroyed"));

  assert_eq!(env.runtime_objects("network"), 0);
  assert_eq!(env.runtime_objects("image"), 0);
  assert_eq!(env.runtime_objects("container"), 0);
}

#[test]
fn destroy_of_empty_stack_is_a_no_op() {
  let env = TestEnv::three_tier();

  env
    .keel_cmd()
    .arg("destroy")
    .assert()
    .success()
    .stdout(predicate::str::contains("has no resources"));
}

#[test]
fn destroy_only_touches_its_stack() {
  let env = TestEnv::three_tier();
  env.write_file(
    "Keel.prod.yaml",
    "config:\n  frontend_port: 8080\n  backend_port: 8000\n  mongo_host: mongodb://mongo:27017\n",
  );
  env.run("up").assert().success();
  env.run("up").arg("--stack").arg("prod").assert().success();

  env.keel_cmd().arg("--stack").arg("prod").arg("destroy").assert().success();

  assert_eq!(env.runtime_objects("network"), 1);
  assert_eq!(env.runtime_objects("container"), 3);
}

#[test]
fn up_after_destroy_recreates() {
  let env = TestEnv::three_tier();
  env.run("up").assert().success();
  env.keel_cmd().arg("destroy").assert().success();

  env
    .run("up")
    .assert()
    .success()
    .stdout(predicate::str::contains("Succeeded: 7"));
}
