//! Runs interrupted between a provider call and the checkpoint that records
//! it. Each test stages the state file and runtime the way a crash would
//! leave them, then checks that the next run settles them without
//! duplicating or losing instances.

use serde_json::{Value, json};

use keel_lib::diff::Action;
use keel_lib::execute::{ExecuteConfig, StackContext};
use keel_lib::provider::{ResourceProvider, ResourceRequest};
use keel_lib::resource::{ReplaceStrategy, ResourceId};
use keel_lib::state::{Instance, ResourceStatus, StateRecord};
use keel_lib::value::Properties;

use super::common::Workspace;

fn id(s: &str) -> ResourceId {
  s.parse().unwrap()
}

fn web() -> ResourceId {
  id("container/web")
}

fn create_before_delete(ctx: StackContext) -> StackContext {
  ctx.with_config(ExecuteConfig {
    replace_strategy: ReplaceStrategy::CreateBeforeDelete,
    ..Default::default()
  })
}

fn request(ctx: &StackContext, resource: &ResourceId, inputs: Properties, prior: Option<Properties>) -> ResourceRequest {
  ResourceRequest {
    stack: ctx.stack.clone(),
    id: resource.clone(),
    inputs,
    prior_outputs: prior,
  }
}

async fn provider_create(ctx: &StackContext, resource: &ResourceId, inputs: Properties) -> Properties {
  let provider = ctx.providers.get(&resource.kind).unwrap();
  provider.create(&request(ctx, resource, inputs, None)).await.unwrap()
}

async fn provider_delete(ctx: &StackContext, resource: &ResourceId, instance: &Instance) {
  let provider = ctx.providers.get(&resource.kind).unwrap();
  provider
    .delete(&request(ctx, resource, instance.inputs.clone(), Some(instance.outputs.clone())))
    .await
    .unwrap();
}

fn object_id(outputs: &Properties) -> String {
  outputs["id"].as_str().unwrap().to_string()
}

/// Apply on port 8080 and return the recorded state and the container
/// inputs a 9090 run resolves to.
async fn applied(ws: &Workspace, ctx: &StackContext) -> (StateRecord, Instance, Properties) {
  let result = ctx.apply(ws.specs("dev", 8080, None)).await.unwrap();
  assert!(result.is_success());

  let record = ws.store().load(&ctx.stack).unwrap().unwrap();
  let old = record.get(&web()).unwrap().instance().unwrap();
  let mut inputs = old.inputs.clone();
  inputs["ports"] = json!([{ "internal": 80, "external": 9090 }]);
  (record, old, inputs)
}

#[tokio::test]
async fn replacement_created_before_the_crash_is_adopted() {
  let ws = Workspace::new();
  let ctx = create_before_delete(ws.context("dev"));
  let (mut record, old, inputs) = applied(&ws, &ctx).await;

  let new_outputs = provider_create(&ctx, &web(), inputs.clone()).await;
  let state = record.resources.get_mut(&web()).unwrap();
  state.inputs = inputs;
  state.outputs = None;
  state.replaced = Some(old);
  state.status = ResourceStatus::Pending;
  ws.store().save(&ctx.stack, &record).unwrap();
  assert_eq!(ws.runtime_ids("container").len(), 2);

  let result = ctx.apply(ws.specs("dev", 9090, None)).await.unwrap();

  assert!(result.is_success());
  assert_eq!(result.plan.action(&web()), Some(Action::NoOp));
  assert_eq!(ws.runtime_ids("container"), vec![object_id(&new_outputs)]);
  let saved = result.execution.state.get(&web()).unwrap();
  assert_eq!(saved.outputs.as_ref().map(object_id), Some(object_id(&new_outputs)));
  assert_eq!(saved.status, ResourceStatus::Healthy);
  assert!(saved.replaced.is_none());
}

#[tokio::test]
async fn replacement_that_never_landed_falls_back_to_the_old_instance() {
  let ws = Workspace::new();
  let ctx = create_before_delete(ws.context("dev"));
  let (mut record, old, inputs) = applied(&ws, &ctx).await;

  let state = record.resources.get_mut(&web()).unwrap();
  state.inputs = inputs;
  state.outputs = None;
  state.replaced = Some(old.clone());
  state.status = ResourceStatus::Pending;
  ws.store().save(&ctx.stack, &record).unwrap();

  let result = ctx.apply(ws.specs("dev", 9090, None)).await.unwrap();

  assert!(result.is_success());
  assert_eq!(result.plan.action(&web()), Some(Action::Replace));
  let live = ws.runtime_ids("container");
  assert_eq!(live.len(), 1);
  assert_ne!(live[0], object_id(&old.outputs));
  let saved = result.execution.state.get(&web()).unwrap();
  assert_eq!(saved.outputs.as_ref().map(object_id), Some(live[0].clone()));
}

#[tokio::test]
async fn replaced_instance_already_deleted_spares_the_live_one() {
  let ws = Workspace::new();
  let ctx = create_before_delete(ws.context("dev"));
  let (mut record, old, inputs) = applied(&ws, &ctx).await;

  let new_outputs = provider_create(&ctx, &web(), inputs.clone()).await;
  provider_delete(&ctx, &web(), &old).await;
  let state = record.resources.get_mut(&web()).unwrap();
  state.inputs = inputs;
  state.outputs = Some(new_outputs.clone());
  state.replaced = Some(old);
  state.status = ResourceStatus::Pending;
  ws.store().save(&ctx.stack, &record).unwrap();

  let result = ctx.apply(ws.specs("dev", 9090, None)).await.unwrap();

  assert!(result.is_success());
  assert!(!result.plan.has_changes());
  assert_eq!(ws.runtime_ids("container"), vec![object_id(&new_outputs)]);
  let saved = result.execution.state.get(&web()).unwrap();
  assert_eq!(saved.outputs.as_ref().map(object_id), Some(object_id(&new_outputs)));
  assert_eq!(saved.status, ResourceStatus::Healthy);
  assert!(saved.replaced.is_none());
}

#[tokio::test]
async fn replaced_instance_still_running_is_deleted_by_id() {
  let ws = Workspace::new();
  let ctx = create_before_delete(ws.context("dev"));
  let (mut record, old, inputs) = applied(&ws, &ctx).await;

  let new_outputs = provider_create(&ctx, &web(), inputs.clone()).await;
  let state = record.resources.get_mut(&web()).unwrap();
  state.inputs = inputs;
  state.outputs = Some(new_outputs.clone());
  state.replaced = Some(old);
  ws.store().save(&ctx.stack, &record).unwrap();

  let result = ctx.apply(ws.specs("dev", 9090, None)).await.unwrap();

  assert!(result.is_success());
  assert_eq!(ws.runtime_ids("container"), vec![object_id(&new_outputs)]);
  assert!(result.execution.state.get(&web()).unwrap().replaced.is_none());
}

#[tokio::test]
async fn delete_that_landed_before_the_crash_is_forgotten() {
  let ws = Workspace::new();
  let ctx = ws.context("dev");
  let (mut record, old, _) = applied(&ws, &ctx).await;

  provider_delete(&ctx, &web(), &old).await;
  record.resources.get_mut(&web()).unwrap().status = ResourceStatus::Pending;
  ws.store().save(&ctx.stack, &record).unwrap();

  let result = ctx.destroy().await.unwrap();

  assert!(result.is_success());
  assert!(result.execution.state.is_empty());
  assert!(ws.runtime_ids("container").is_empty());
  assert!(ws.runtime_ids("image").is_empty());
  assert!(ws.runtime_ids("network").is_empty());
}

#[tokio::test]
async fn pending_delete_that_never_landed_is_retried() {
  let ws = Workspace::new();
  let ctx = ws.context("dev");
  let (mut record, old, _) = applied(&ws, &ctx).await;

  record.resources.get_mut(&web()).unwrap().status = ResourceStatus::Pending;
  ws.store().save(&ctx.stack, &record).unwrap();

  let result = ctx.destroy().await.unwrap();

  assert!(result.is_success());
  assert_eq!(result.plan.action(&web()), Some(Action::Delete));
  assert!(!ws.runtime_ids("container").contains(&object_id(&old.outputs)));
  assert!(result.execution.state.is_empty());
}

#[tokio::test]
async fn recreated_after_a_landed_delete_on_the_next_up() {
  let ws = Workspace::new();
  let ctx = ws.context("dev");
  let (mut record, old, _) = applied(&ws, &ctx).await;

  provider_delete(&ctx, &web(), &old).await;
  record.resources.get_mut(&web()).unwrap().status = ResourceStatus::Pending;
  ws.store().save(&ctx.stack, &record).unwrap();

  let result = ctx.apply(ws.specs("dev", 8080, None)).await.unwrap();

  assert!(result.is_success());
  assert_eq!(result.plan.action(&web()), Some(Action::Create));
  let live = ws.runtime_ids("container");
  assert_eq!(live.len(), 1);
  assert_ne!(Value::String(live[0].clone()), old.outputs["id"]);
}
