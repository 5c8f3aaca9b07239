//! Test doubles for keel-lib.
//!
//! [`MockProvider`] keeps its instances in memory and records every call on a
//! shared [`CallLog`] with a logical clock, so tests can assert ordering and
//! concurrency across providers. Failures and delays are injected per
//! resource name.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::execute::Checkpoint;
use crate::provider::{DiffRules, ProviderError, ProviderRegistry, ResourceProvider, ResourceRequest};
use crate::resource::ResourceId;
use crate::state::{StateError, StateRecord};
use crate::value::Properties;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
  Create,
  Read,
  Update,
  Delete,
}

/// One provider call: logical start and finish times.
#[derive(Debug, Clone)]
pub struct Call {
  pub resource: ResourceId,
  pub op: MockOp,
  pub started: u64,
  pub finished: u64,
}

#[derive(Debug, Default)]
pub struct CallLog {
  clock: AtomicU64,
  calls: Mutex<Vec<Call>>,
}

impl CallLog {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  fn tick(&self) -> u64 {
    self.clock.fetch_add(1, Ordering::SeqCst) + 1
  }

  pub fn calls(&self) -> Vec<Call> {
    self.calls.lock().unwrap().clone()
  }

  /// Mutating calls in completion order.
  pub fn mutations(&self) -> Vec<(ResourceId, MockOp)> {
    let mut calls: Vec<Call> = self.calls().into_iter().filter(|c| c.op != MockOp::Read).collect();
    calls.sort_by_key(|c| c.finished);
    calls.into_iter().map(|c| (c.resource, c.op)).collect()
  }

  pub fn find(&self, resource: &ResourceId, op: MockOp) -> Option<Call> {
    self
      .calls()
      .into_iter()
      .rev()
      .find(|c| &c.resource == resource && c.op == op)
  }

  pub fn count(&self, op: MockOp) -> usize {
    self.calls().iter().filter(|c| c.op == op).count()
  }
}

/// In-memory provider for one kind.
pub struct MockProvider {
  kind: String,
  rules: DiffRules,
  log: Arc<CallLog>,
  delay: Duration,
  failures: Mutex<HashSet<(MockOp, String)>>,
  cancel_on: Mutex<Option<(String, CancellationToken)>>,
  instances: Mutex<BTreeMap<String, Properties>>,
  generation: AtomicU64,
  in_flight: AtomicUsize,
  peak: AtomicUsize,
}

impl MockProvider {
  pub fn new(kind: &str) -> Self {
    Self {
      kind: kind.to_string(),
      rules: DiffRules::new(),
      log: CallLog::new(),
      delay: Duration::ZERO,
      failures: Mutex::new(HashSet::new()),
      cancel_on: Mutex::new(None),
      instances: Mutex::new(BTreeMap::new()),
      generation: AtomicU64::new(0),
      in_flight: AtomicUsize::new(0),
      peak: AtomicUsize::new(0),
    }
  }

  pub fn with_rules(mut self, rules: DiffRules) -> Self {
    self.rules = rules;
    self
  }

  pub fn with_log(mut self, log: Arc<CallLog>) -> Self {
    self.log = log;
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  /// Make `op` on resource `name` fail until cleared.
  pub fn fail(&self, op: MockOp, name: &str) {
    self.failures.lock().unwrap().insert((op, name.to_string()));
  }

  pub fn clear_failures(&self) {
    self.failures.lock().unwrap().clear();
  }

  /// Cancel `token` as soon as a create for `name` starts.
  pub fn cancel_on_create(&self, name: &str, token: CancellationToken) {
    *self.cancel_on.lock().unwrap() = Some((name.to_string(), token));
  }

  /// Live instances by resource name.
  pub fn instances(&self) -> BTreeMap<String, Properties> {
    self.instances.lock().unwrap().clone()
  }

  pub fn exists(&self, name: &str) -> bool {
    self.instances.lock().unwrap().contains_key(name)
  }

  /// Highest number of concurrent calls observed.
  pub fn peak(&self) -> usize {
    self.peak.load(Ordering::SeqCst)
  }

  pub fn log(&self) -> &Arc<CallLog> {
    &self.log
  }

  async fn call<T>(
    &self,
    op: MockOp,
    request: &ResourceRequest,
    body: impl FnOnce(&mut BTreeMap<String, Properties>) -> Result<T, ProviderError>,
  ) -> Result<T, ProviderError> {
    let started = self.log.tick();
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);

    if op == MockOp::Create
      && let Some((name, token)) = self.cancel_on.lock().unwrap().as_ref()
      && *name == request.id.name
    {
      token.cancel();
    }

    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }

    let failing = self
      .failures
      .lock()
      .unwrap()
      .contains(&(op, request.id.name.clone()));
    let result = if failing {
      Err(ProviderError::Failed(format!("injected {op:?} failure for {}", request.urn())))
    } else {
      body(&mut self.instances.lock().unwrap())
    };

    self.in_flight.fetch_sub(1, Ordering::SeqCst);
    let finished = self.log.tick();
    self.log.calls.lock().unwrap().push(Call {
      resource: request.id.clone(),
      op,
      started,
      finished,
    });
    result
  }
}

#[async_trait]
impl ResourceProvider for MockProvider {
  fn kind(&self) -> &str {
    &self.kind
  }

  fn diff_rules(&self) -> &DiffRules {
    &self.rules
  }

  async fn create(&self, request: &ResourceRequest) -> Result<Properties, ProviderError> {
    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
    self
      .call(MockOp::Create, request, |instances| {
        let mut outputs = request.inputs.clone();
        outputs.insert(
          "id".to_string(),
          Value::String(format!("{}-{}-{generation}", request.id.kind, request.id.name)),
        );
        instances.insert(request.id.name.clone(), outputs.clone());
        Ok(outputs)
      })
      .await
  }

  async fn read(&self, request: &ResourceRequest) -> Result<Option<Properties>, ProviderError> {
    self
      .call(MockOp::Read, request, |instances| Ok(instances.get(&request.id.name).cloned()))
      .await
  }

  async fn update(&self, request: &ResourceRequest) -> Result<Properties, ProviderError> {
    self
      .call(MockOp::Update, request, |instances| {
        let Some(existing) = instances.get_mut(&request.id.name) else {
          return Err(ProviderError::NotFound(request.urn()));
        };
        let id = existing.get("id").cloned().unwrap_or(Value::Null);
        let mut outputs = request.inputs.clone();
        outputs.insert("id".to_string(), id);
        *existing = outputs.clone();
        Ok(outputs)
      })
      .await
  }

  async fn delete(&self, request: &ResourceRequest) -> Result<(), ProviderError> {
    self
      .call(MockOp::Delete, request, |instances| {
        // A create-before-delete replace leaves the new instance under the
        // same name; only drop it when the ids match.
        let recorded_id = request.prior_outputs.as_ref().and_then(|o| o.get("id"));
        let live_id = instances.get(&request.id.name).and_then(|o| o.get("id"));
        if recorded_id.is_none() || recorded_id == live_id {
          instances.remove(&request.id.name);
        }
        Ok(())
      })
      .await
  }
}

/// `network`, `image` and `container` mocks sharing one call log.
pub struct MockStack {
  pub log: Arc<CallLog>,
  pub network: Arc<MockProvider>,
  pub image: Arc<MockProvider>,
  pub container: Arc<MockProvider>,
}

impl MockStack {
  pub fn new() -> Self {
    Self::with_delay(Duration::ZERO)
  }

  pub fn with_delay(delay: Duration) -> Self {
    let log = CallLog::new();
    let mock = |kind: &str| MockProvider::new(kind).with_log(log.clone()).with_delay(delay);
    Self {
      network: Arc::new(mock("network").with_rules(DiffRules::new().replace_on("name"))),
      image: Arc::new(mock("image").with_rules(DiffRules::new().replace_on("name").with_create_before_delete(true))),
      container: Arc::new(
        mock("container").with_rules(
          DiffRules::new()
            .replace_on("image")
            .replace_on("ports")
            .unordered("envs")
            .with_create_before_delete(true),
        ),
      ),
      log,
    }
  }

  pub fn registry(&self) -> ProviderRegistry {
    ProviderRegistry::new()
      .with(self.network.clone())
      .with(self.image.clone())
      .with(self.container.clone())
  }
}

/// Checkpoint sink that keeps every saved record.
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
  pub saved: Vec<StateRecord>,
  /// Fail every checkpoint after this many successful ones.
  pub fail_after: Option<usize>,
}

impl Checkpoint for MemoryCheckpoint {
  fn checkpoint(&mut self, record: &StateRecord) -> Result<(), StateError> {
    if self.fail_after.is_some_and(|limit| self.saved.len() >= limit) {
      return Err(StateError::Write(std::io::Error::other("disk full")));
    }
    self.saved.push(record.clone());
    Ok(())
  }
}
