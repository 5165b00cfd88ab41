use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::experiment::Experiment;
use crate::in_app_message::InAppMessage;
use crate::user::HackleUser;

/// ManualOverrideStorage holds variations pinned by hand on this device, for instance from a
/// debugging tool. A pinned variation beats every other rule.
pub trait ManualOverrideStorage: Send + Sync {
    /// Retrieve the id of the variation `user` is pinned to in `experiment`.
    fn get(&self, experiment: &Experiment, user: &HackleUser) -> Option<i64>;
}

/// InAppMessageHiddenStorage remembers messages the user asked not to see again.
pub trait InAppMessageHiddenStorage: Send + Sync {
    /// Returns true while a hide recorded for `in_app_message` expires after `now` (epoch millis).
    fn exist(&self, in_app_message: &InAppMessage, now: i64) -> bool;

    fn put(&self, in_app_message: &InAppMessage, expire_at: i64);
}

/// One past display of an in-app message.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct InAppMessageImpression {
    pub identifiers: HashMap<String, String>,
    /// epoch millis
    pub timestamp: i64,
}

/// InAppMessageImpressionStorage keeps the display history of each in-app message, oldest first.
pub trait InAppMessageImpressionStorage: Send + Sync {
    fn get(&self, in_app_message: &InAppMessage) -> Vec<InAppMessageImpression>;

    fn set(&self, in_app_message: &InAppMessage, impressions: Vec<InAppMessageImpression>);

    /// Runs a read-modify-write of the history of `in_app_message` atomically with respect to
    /// every other call on this storage.
    fn update(
        &self,
        in_app_message: &InAppMessage,
        f: &mut dyn FnMut(&mut Vec<InAppMessageImpression>),
    );
}

/// Clock is the only source of the current time used by evaluation.
pub trait Clock: Send + Sync {
    /// Current epoch millis.
    fn now_millis(&self) -> i64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

// A poisoned lock only means another thread panicked mid-update; the map itself is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// In-memory [ManualOverrideStorage], keyed by experiment id.
#[derive(Debug, Default)]
pub struct InMemoryManualOverrideStorage {
    overrides: Mutex<HashMap<i64, i64>>,
}

impl InMemoryManualOverrideStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, experiment: &Experiment, variation_id: i64) {
        lock(&self.overrides).insert(experiment.id, variation_id);
    }

    pub fn remove(&self, experiment: &Experiment) {
        lock(&self.overrides).remove(&experiment.id);
    }

    pub fn clear(&self) {
        lock(&self.overrides).clear();
    }
}

impl ManualOverrideStorage for InMemoryManualOverrideStorage {
    fn get(&self, experiment: &Experiment, _user: &HackleUser) -> Option<i64> {
        lock(&self.overrides).get(&experiment.id).copied()
    }
}

/// In-memory [InAppMessageHiddenStorage], keyed by in-app message id.
#[derive(Debug, Default)]
pub struct InMemoryInAppMessageHiddenStorage {
    expirations: Mutex<HashMap<i64, i64>>,
}

impl InMemoryInAppMessageHiddenStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InAppMessageHiddenStorage for InMemoryInAppMessageHiddenStorage {
    fn exist(&self, in_app_message: &InAppMessage, now: i64) -> bool {
        let mut expirations = lock(&self.expirations);
        match expirations.get(&in_app_message.id) {
            Some(&expire_at) if expire_at > now => true,
            Some(_) => {
                expirations.remove(&in_app_message.id);
                false
            }
            None => false,
        }
    }

    fn put(&self, in_app_message: &InAppMessage, expire_at: i64) {
        lock(&self.expirations).insert(in_app_message.id, expire_at);
    }
}

/// In-memory [InAppMessageImpressionStorage], keyed by in-app message id.
#[derive(Debug, Default)]
pub struct InMemoryInAppMessageImpressionStorage {
    impressions: Mutex<HashMap<i64, Vec<InAppMessageImpression>>>,
}

impl InMemoryInAppMessageImpressionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InAppMessageImpressionStorage for InMemoryInAppMessageImpressionStorage {
    fn get(&self, in_app_message: &InAppMessage) -> Vec<InAppMessageImpression> {
        lock(&self.impressions)
            .get(&in_app_message.id)
            .cloned()
            .unwrap_or_default()
    }

    fn set(&self, in_app_message: &InAppMessage, impressions: Vec<InAppMessageImpression>) {
        lock(&self.impressions).insert(in_app_message.id, impressions);
    }

    fn update(
        &self,
        in_app_message: &InAppMessage,
        f: &mut dyn FnMut(&mut Vec<InAppMessageImpression>),
    ) {
        let mut impressions = lock(&self.impressions);
        f(impressions.entry(in_app_message.id).or_default());
    }
}
