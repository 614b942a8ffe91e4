//! Scripted USB-stick client

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use ha_plugwise::api::{NodeCallback, SubscriptionId};
use ha_plugwise::{PlugwiseError, StickApi, StickNode};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Topic {
    NodeUpdates,
    JoinRequests,
}

/// Initialization step a [`MockStick`] can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StickStep {
    Connect,
    InitializeStick,
    InitializeCirclePlus,
    Scan,
}

/// A stick with a fixed set of nodes.
///
/// Every call is recorded by name. Callbacks are invoked with no lock held
/// since they call back into [`StickApi::node`].
pub struct MockStick {
    nodes: Mutex<Vec<StickNode>>,
    failures: Mutex<HashMap<StickStep, PlugwiseError>>,
    calls: Mutex<Vec<String>>,
    subscriptions: Mutex<HashMap<u64, (Topic, NodeCallback)>>,
    next_subscription: AtomicU64,
}

impl MockStick {
    pub fn new(nodes: Vec<StickNode>) -> Self {
        Self {
            nodes: Mutex::new(nodes),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn fail(&self, step: StickStep, err: PlugwiseError) {
        self.failures.lock().unwrap().insert(step, err);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    /// Change a reading and report it like the stick's own polling would
    pub fn push_value(&self, mac: &str, key: &str, value: Value) {
        {
            let mut nodes = self.nodes.lock().unwrap();
            if let Some(node) = nodes.iter_mut().find(|n| n.mac == mac) {
                node.values.insert(key.to_string(), value);
            }
        }
        self.notify(Topic::NodeUpdates, mac);
    }

    pub fn set_available(&self, mac: &str, available: bool) {
        {
            let mut nodes = self.nodes.lock().unwrap();
            if let Some(node) = nodes.iter_mut().find(|n| n.mac == mac) {
                node.available = available;
            }
        }
        self.notify(Topic::NodeUpdates, mac);
    }

    /// A new node asks to join and is accepted
    pub fn request_join(&self, node: StickNode) {
        let mac = node.mac.clone();
        self.nodes.lock().unwrap().push(node);
        self.notify(Topic::JoinRequests, &mac);
    }

    fn notify(&self, topic: Topic, mac: &str) {
        let callbacks: Vec<NodeCallback> = self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .filter(|(t, _)| *t == topic)
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(mac);
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn step(&self, step: StickStep, name: &str) -> Result<(), PlugwiseError> {
        self.record(name);
        match self.failures.lock().unwrap().get(&step) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn subscribe(&self, topic: Topic, callback: NodeCallback) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.lock().unwrap().insert(id, (topic, callback));
        SubscriptionId(id)
    }
}

impl StickApi for MockStick {
    fn connect(&self) -> Result<(), PlugwiseError> {
        self.step(StickStep::Connect, "connect")
    }

    fn initialize_stick(&self) -> Result<(), PlugwiseError> {
        self.step(StickStep::InitializeStick, "initialize_stick")
    }

    fn initialize_circle_plus(&self) -> Result<(), PlugwiseError> {
        self.step(StickStep::InitializeCirclePlus, "initialize_circle_plus")
    }

    fn disconnect(&self) -> Result<(), PlugwiseError> {
        self.record("disconnect");
        Ok(())
    }

    fn scan(&self) -> Result<Vec<StickNode>, PlugwiseError> {
        self.step(StickStep::Scan, "scan")?;
        Ok(self.nodes.lock().unwrap().clone())
    }

    fn joined_nodes(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    fn node(&self, mac: &str) -> Option<StickNode> {
        self.nodes.lock().unwrap().iter().find(|n| n.mac == mac).cloned()
    }

    fn auto_update(&self) {
        self.record("auto_update");
    }

    fn allow_join_requests(&self, enable: bool, accept: bool) {
        self.record(format!("allow_join_requests {enable} {accept}"));
    }

    fn node_join(&self, mac: &str) -> Result<(), PlugwiseError> {
        self.record(format!("node_join {mac}"));
        Ok(())
    }

    fn node_unjoin(&self, mac: &str) -> Result<(), PlugwiseError> {
        self.record(format!("node_unjoin {mac}"));
        self.nodes.lock().unwrap().retain(|n| n.mac != mac);
        Ok(())
    }

    fn subscribe_node_updates(&self, callback: NodeCallback) -> SubscriptionId {
        self.subscribe(Topic::NodeUpdates, callback)
    }

    fn subscribe_join_requests(&self, callback: NodeCallback) -> SubscriptionId {
        self.subscribe(Topic::JoinRequests, callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.lock().unwrap().remove(&id.0);
    }
}
