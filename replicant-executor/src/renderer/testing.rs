//! Launcher double for manager and driver tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{RendererError, RendererLauncher, RendererProcess};

#[derive(Default)]
struct Record {
    terminated: Vec<u64>,
    health_checks: HashMap<u64, u32>,
    slots: HashMap<u64, usize>,
}

/// Launches fake processes that point at `endpoint`
pub struct FakeLauncher {
    endpoint: String,
    unhealthy: HashSet<u64>,
    record: Arc<Mutex<Record>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::with_endpoint("http://127.0.0.1:9")
    }

    /// Processes report this debugging endpoint, e.g. a `FakeBrowser`'s
    pub fn with_endpoint(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            unhealthy: HashSet::new(),
            record: Arc::new(Mutex::new(Record::default())),
        }
    }

    /// Generation that never passes a health check
    pub fn unhealthy(mut self, generation: u64) -> Self {
        self.unhealthy.insert(generation);
        self
    }

    pub fn terminated(&self) -> Vec<u64> {
        self.record.lock().terminated.clone()
    }

    /// Port slot a generation was launched in
    pub fn slot(&self, generation: u64) -> usize {
        self.record.lock().slots[&generation]
    }

    pub fn health_checks(&self, generation: u64) -> u32 {
        self.record
            .lock()
            .health_checks
            .get(&generation)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl RendererLauncher for FakeLauncher {
    async fn launch(
        &self,
        generation: u64,
        slot: usize,
    ) -> Result<Box<dyn RendererProcess>, RendererError> {
        self.record.lock().slots.insert(generation, slot);
        Ok(Box::new(FakeProcess {
            generation,
            endpoint: self.endpoint.clone(),
            healthy: !self.unhealthy.contains(&generation),
            record: self.record.clone(),
        }))
    }
}

struct FakeProcess {
    generation: u64,
    endpoint: String,
    healthy: bool,
    record: Arc<Mutex<Record>>,
}

#[async_trait]
impl RendererProcess for FakeProcess {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn health_check(&self) -> Result<(), RendererError> {
        *self
            .record
            .lock()
            .health_checks
            .entry(self.generation)
            .or_default() += 1;

        if self.healthy {
            Ok(())
        } else {
            Err(RendererError::HealthCheck("connection refused".to_string()))
        }
    }

    async fn terminate(&self) {
        self.record.lock().terminated.push(self.generation);
    }
}
