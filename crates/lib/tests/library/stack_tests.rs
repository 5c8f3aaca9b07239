//! Whole-stack lifecycle tests.

use keel_lib::diff::Action;
use keel_lib::execute::NodeStatus;
use keel_lib::resource::{ResourceId, StackId};
use keel_lib::state::ResourceStatus;

use super::common::Workspace;

fn id(s: &str) -> ResourceId {
  s.parse().unwrap()
}

#[tokio::test]
async fn outputs_flow_from_producers_to_consumers() {
  let ws = Workspace::new();
  let ctx = ws.context("dev");

  let result = ctx.apply(ws.specs("dev", 8080, None)).await.unwrap();
  assert!(result.is_success());

  let state = &result.execution.state;
  let image = state.get(&id("image/web")).unwrap().outputs.clone().unwrap();
  let container = state.get(&id("container/web")).unwrap();
  assert_eq!(container.inputs["image"], image["repo_digest"]);
  assert_eq!(container.outputs.as_ref().unwrap()["image_id"], image["id"]);
  assert_eq!(
    container.dependencies,
    [id("image/web"), id("network/net")].into_iter().collect()
  );
  assert!(state.resources.values().all(|r| r.status == ResourceStatus::Healthy));
}

#[tokio::test]
async fn lifecycle_create_update_replace_destroy() {
  let ws = Workspace::new();
  let ctx = ws.context("dev");

  let created = ctx.apply(ws.specs("dev", 8080, None)).await.unwrap();
  assert_eq!(created.plan.summary().create, 3);
  let first_id = created.execution.state.get(&id("container/web")).unwrap().outputs.clone().unwrap()["id"].clone();

  let unchanged = ctx.apply(ws.specs("dev", 8080, None)).await.unwrap();
  assert!(!unchanged.plan.has_changes());
  assert_eq!(unchanged.execution.state.serial, 1);

  let updated = ctx.apply(ws.specs("dev", 8080, Some("production"))).await.unwrap();
  assert_eq!(updated.plan.action(&id("container/web")), Some(Action::Update));
  let same_id = updated.execution.state.get(&id("container/web")).unwrap().outputs.clone().unwrap()["id"].clone();
  assert_eq!(same_id, first_id);

  let replaced = ctx.apply(ws.specs("dev", 9090, Some("production"))).await.unwrap();
  assert!(replaced.is_success());
  assert_eq!(replaced.plan.action(&id("container/web")), Some(Action::Replace));
  assert_eq!(replaced.plan.action(&id("image/web")), Some(Action::NoOp));
  let web = replaced.execution.state.get(&id("container/web")).unwrap();
  assert_ne!(web.outputs.as_ref().unwrap()["id"], first_id);
  assert!(web.replaced.is_none());
  assert_eq!(replaced.execution.state.serial, 3);

  let destroyed = ctx.destroy().await.unwrap();
  assert!(destroyed.is_success());
  assert!(destroyed.execution.state.is_empty());
  assert_eq!(ws.store().history(&StackId::new("dev").unwrap()).unwrap(), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn stacks_share_providers_but_not_state() {
  let ws = Workspace::new();

  ws.context("dev").apply(ws.specs("dev", 8080, None)).await.unwrap();
  let prod = ws.context("prod").apply(ws.specs("prod", 80, None)).await.unwrap();

  assert_eq!(prod.plan.summary().create, 3);
  assert!(prod.is_success());
  assert_eq!(
    ws.store().stacks().unwrap(),
    vec![StackId::new("dev").unwrap(), StackId::new("prod").unwrap()]
  );

  let destroyed = ws.context("prod").destroy().await.unwrap();
  assert!(destroyed.is_success());
  let dev = ws.store().load(&StackId::new("dev").unwrap()).unwrap().unwrap();
  assert_eq!(dev.len(), 3);

  let again = ws.context("dev").apply(ws.specs("dev", 8080, None)).await.unwrap();
  assert!(!again.plan.has_changes());
  assert!(
    again
      .execution
      .outcomes
      .values()
      .all(|o| o.status == NodeStatus::Unchanged)
  );
}
