use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use council_core::{CouncilError, CouncilResult};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Available,
    Unavailable,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    Random,
    HealthAware,
}

impl Strategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "round_robin" => Some(Strategy::RoundRobin),
            "weighted_round_robin" => Some(Strategy::WeightedRoundRobin),
            "least_connections" => Some(Strategy::LeastConnections),
            "random" => Some(Strategy::Random),
            "health_aware" => Some(Strategy::HealthAware),
            _ => None,
        }
    }
}

/// One registered worker instance with its rolling health numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInstance {
    pub instance_id: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub status: InstanceStatus,
    pub current_connections: u32,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub response_time_secs: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl WorkerInstance {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            (self.total_requests - self.failed_requests) as f64 / self.total_requests as f64
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == InstanceStatus::Available
    }

    /// Composite load score, lower is better.
    fn score(&self) -> f64 {
        self.response_time_secs
            + self.current_connections as f64 * 0.1
            + (1.0 - self.success_rate()) * 10.0
            + self.cpu_usage * 0.01
            + self.memory_usage * 0.01
    }
}

/// Health-aware selection among N registered worker instances.
pub struct LoadBalancer {
    strategy: Strategy,
    instances: Mutex<HashMap<String, WorkerInstance>>,
    round_robin_cursor: AtomicUsize,
    client: reqwest::Client,
}

impl LoadBalancer {
    pub fn new(strategy: Strategy) -> Arc<Self> {
        Arc::new(Self {
            strategy,
            instances: Mutex::new(HashMap::new()),
            round_robin_cursor: AtomicUsize::new(0),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        })
    }

    pub fn add_instance(&self, instance_id: &str, host: &str, port: u16, weight: u32) {
        let instance = WorkerInstance {
            instance_id: instance_id.to_string(),
            host: host.to_string(),
            port,
            weight: weight.max(1),
            status: InstanceStatus::Unknown,
            current_connections: 0,
            total_requests: 0,
            failed_requests: 0,
            response_time_secs: 0.0,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            last_health_check: None,
        };
        tracing::info!(instance_id, host, port, weight, "worker instance added");
        self.instances
            .lock()
            .expect("instance lock poisoned")
            .insert(instance_id.to_string(), instance);
    }

    pub fn remove_instance(&self, instance_id: &str) -> bool {
        let removed = self
            .instances
            .lock()
            .expect("instance lock poisoned")
            .remove(instance_id)
            .is_some();
        if removed {
            tracing::info!(instance_id, "worker instance removed");
        }
        removed
    }

    pub fn instances(&self) -> Vec<WorkerInstance> {
        self.instances
            .lock()
            .expect("instance lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Pick an available instance per the configured strategy.
    pub fn select(&self) -> CouncilResult<WorkerInstance> {
        let instances = self.instances.lock().expect("instance lock poisoned");
        let mut available: Vec<&WorkerInstance> =
            instances.values().filter(|i| i.is_available()).collect();
        if available.is_empty() {
            return Err(CouncilError::Unavailable(
                "no healthy worker instance".to_string(),
            ));
        }
        // Deterministic base order so the round-robin cursor is stable.
        available.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));

        let chosen = match self.strategy {
            Strategy::RoundRobin => {
                let cursor = self.round_robin_cursor.fetch_add(1, Ordering::SeqCst);
                available[cursor % available.len()]
            }
            Strategy::LeastConnections => available
                .iter()
                .min_by_key(|i| i.current_connections)
                .copied()
                .expect("non-empty"),
            Strategy::WeightedRoundRobin => {
                let total: u32 = available.iter().map(|i| i.weight).sum();
                let mut pick = rand::thread_rng().gen_range(0..total.max(1));
                let mut chosen = available[0];
                for instance in &available {
                    if pick < instance.weight {
                        chosen = *instance;
                        break;
                    }
                    pick -= instance.weight;
                }
                chosen
            }
            Strategy::Random => available
                .choose(&mut rand::thread_rng())
                .copied()
                .expect("non-empty"),
            Strategy::HealthAware => available
                .iter()
                .min_by(|a, b| {
                    a.score()
                        .partial_cmp(&b.score())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .copied()
                .expect("non-empty"),
        };
        Ok(chosen.clone())
    }

    /// Forward a JSON request to a selected instance, tracking
    /// connections, response time, and failures.
    pub async fn forward(
        &self,
        path: &str,
        method: reqwest::Method,
        body: Option<serde_json::Value>,
    ) -> CouncilResult<serde_json::Value> {
        let instance = self.select()?;
        let instance_id = instance.instance_id.clone();

        {
            let mut instances = self.instances.lock().expect("instance lock poisoned");
            if let Some(entry) = instances.get_mut(&instance_id) {
                entry.current_connections += 1;
                entry.total_requests += 1;
            }
        }

        let url = format!("{}{path}", instance.url());
        let started = Instant::now();
        let mut builder = self.client.request(method, &url);
        if let Some(body) = &body {
            builder = builder.json(body);
        }
        let outcome = builder.send().await;
        let elapsed = started.elapsed().as_secs_f64();

        let mut instances = self.instances.lock().expect("instance lock poisoned");
        let entry = instances.get_mut(&instance_id);

        match outcome {
            Ok(response) if response.status().is_success() => {
                if let Some(entry) = entry {
                    entry.current_connections = entry.current_connections.saturating_sub(1);
                    entry.response_time_secs = elapsed;
                }
                drop(instances);
                response
                    .json()
                    .await
                    .map_err(|e| CouncilError::Unavailable(format!("bad worker payload: {e}")))
            }
            Ok(response) => {
                if let Some(entry) = entry {
                    entry.current_connections = entry.current_connections.saturating_sub(1);
                    entry.failed_requests += 1;
                    entry.response_time_secs = elapsed;
                }
                Err(CouncilError::Unavailable(format!(
                    "worker {instance_id} returned HTTP {}",
                    response.status()
                )))
            }
            Err(err) => {
                if let Some(entry) = entry {
                    entry.current_connections = entry.current_connections.saturating_sub(1);
                    entry.failed_requests += 1;
                }
                Err(CouncilError::Unavailable(format!(
                    "worker {instance_id} unreachable: {err}"
                )))
            }
        }
    }

    /// 30 s `/health` probes with a 10 s timeout; failures mark the
    /// instance UNAVAILABLE and exclude it from selection.
    pub fn spawn_health_checks(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let balancer = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                balancer.run_health_checks().await;
            }
        })
    }

    pub async fn run_health_checks(&self) {
        let targets: Vec<(String, String)> = self
            .instances
            .lock()
            .expect("instance lock poisoned")
            .values()
            .map(|i| (i.instance_id.clone(), format!("{}/health", i.url())))
            .collect();

        for (instance_id, url) in targets {
            let healthy = match self
                .client
                .get(&url)
                .timeout(HEALTH_CHECK_TIMEOUT)
                .send()
                .await
            {
                Ok(response) => response.status().is_success(),
                Err(_) => false,
            };

            let mut instances = self.instances.lock().expect("instance lock poisoned");
            if let Some(instance) = instances.get_mut(&instance_id) {
                let status = if healthy {
                    InstanceStatus::Available
                } else {
                    InstanceStatus::Unavailable
                };
                if instance.status != status {
                    tracing::info!(instance_id = %instance_id, ?status, "worker status changed");
                }
                instance.status = status;
                instance.last_health_check = Some(Utc::now());
            }
        }
    }

    /// Direct status override, used by tests and manual ops.
    pub fn set_status(&self, instance_id: &str, status: InstanceStatus) {
        if let Some(instance) = self
            .instances
            .lock()
            .expect("instance lock poisoned")
            .get_mut(instance_id)
        {
            instance.status = status;
        }
    }

    pub fn update_load(&self, instance_id: &str, response_time: f64, cpu: f64, memory: f64) {
        if let Some(instance) = self
            .instances
            .lock()
            .expect("instance lock poisoned")
            .get_mut(instance_id)
        {
            instance.response_time_secs = response_time;
            instance.cpu_usage = cpu;
            instance.memory_usage = memory;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balancer_with(strategy: Strategy, n: usize) -> Arc<LoadBalancer> {
        let balancer = LoadBalancer::new(strategy);
        for i in 0..n {
            let id = format!("worker-{i}");
            balancer.add_instance(&id, "127.0.0.1", 9000 + i as u16, (i + 1) as u32);
            balancer.set_status(&id, InstanceStatus::Available);
        }
        balancer
    }

    #[test]
    fn round_robin_cycles_all_instances() {
        let balancer = balancer_with(Strategy::RoundRobin, 3);
        let picks: Vec<String> = (0..6)
            .map(|_| balancer.select().unwrap().instance_id)
            .collect();
        assert_eq!(picks[0..3], picks[3..6]);
        let mut unique = picks[0..3].to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn least_connections_prefers_idle_instance() {
        let balancer = balancer_with(Strategy::LeastConnections, 3);
        {
            let mut instances = balancer.instances.lock().unwrap();
            instances.get_mut("worker-0").unwrap().current_connections = 5;
            instances.get_mut("worker-1").unwrap().current_connections = 2;
            instances.get_mut("worker-2").unwrap().current_connections = 9;
        }
        assert_eq!(balancer.select().unwrap().instance_id, "worker-1");
    }

    #[test]
    fn health_aware_picks_lowest_score() {
        let balancer = balancer_with(Strategy::HealthAware, 2);
        balancer.update_load("worker-0", 2.5, 90.0, 80.0);
        balancer.update_load("worker-1", 0.1, 10.0, 20.0);
        assert_eq!(balancer.select().unwrap().instance_id, "worker-1");

        // A poor success rate outweighs a fast response.
        {
            let mut instances = balancer.instances.lock().unwrap();
            let w1 = instances.get_mut("worker-1").unwrap();
            w1.total_requests = 100;
            w1.failed_requests = 60;
        }
        assert_eq!(balancer.select().unwrap().instance_id, "worker-0");
    }

    #[test]
    fn unhealthy_instances_are_excluded() {
        let balancer = balancer_with(Strategy::RoundRobin, 2);
        balancer.set_status("worker-0", InstanceStatus::Unavailable);
        for _ in 0..4 {
            assert_eq!(balancer.select().unwrap().instance_id, "worker-1");
        }
        balancer.set_status("worker-1", InstanceStatus::Unavailable);
        assert!(matches!(
            balancer.select(),
            Err(CouncilError::Unavailable(_))
        ));
    }

    #[test]
    fn weighted_selection_respects_weights_roughly() {
        let balancer = balancer_with(Strategy::WeightedRoundRobin, 2);
        // worker-0 weight 1, worker-1 weight 2.
        let mut counts = HashMap::new();
        for _ in 0..600 {
            let id = balancer.select().unwrap().instance_id;
            *counts.entry(id).or_insert(0) += 1;
        }
        let zero = counts.get("worker-0").copied().unwrap_or(0);
        let one = counts.get("worker-1").copied().unwrap_or(0);
        assert!(one > zero, "heavier instance should win more often");
    }

    #[test]
    fn success_rate_defaults_to_one() {
        let balancer = balancer_with(Strategy::Random, 1);
        let instance = balancer.select().unwrap();
        assert_eq!(instance.success_rate(), 1.0);
    }
}
