use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, Networks, System};

/// Host-level sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    pub net_bytes_sent: u64,
    pub net_bytes_received: u64,
    pub active_connections: usize,
    pub timestamp: DateTime<Utc>,
}

/// Scheduler-derived sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub avg_response_time_secs: f64,
    /// Tasks completed per second since the previous sample.
    pub throughput: f64,
    /// failed / (completed + failed) x 100.
    pub error_rate: f64,
    pub queue_length: usize,
    pub concurrent_tasks: usize,
    pub timestamp: DateTime<Utc>,
}

/// Wraps the sysinfo handles that must persist between refreshes for
/// CPU deltas to mean anything.
pub struct HostSampler {
    system: System,
    disks: Disks,
    networks: Networks,
}

impl HostSampler {
    pub fn new() -> Self {
        Self {
            system: System::new_all(),
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
        }
    }

    pub fn sample(&mut self) -> SystemMetrics {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.disks.refresh();
        self.networks.refresh();

        let cpu_usage = self.system.global_cpu_usage() as f64;

        let total_memory = self.system.total_memory();
        let memory_usage = if total_memory > 0 {
            self.system.used_memory() as f64 / total_memory as f64 * 100.0
        } else {
            0.0
        };

        let (disk_total, disk_available) = self
            .disks
            .iter()
            .fold((0u64, 0u64), |(total, available), disk| {
                (total + disk.total_space(), available + disk.available_space())
            });
        let disk_usage = if disk_total > 0 {
            (disk_total - disk_available) as f64 / disk_total as f64 * 100.0
        } else {
            0.0
        };

        let (sent, received) = self
            .networks
            .iter()
            .fold((0u64, 0u64), |(sent, received), (_, data)| {
                (sent + data.total_transmitted(), received + data.total_received())
            });

        SystemMetrics {
            cpu_usage,
            memory_usage,
            disk_usage,
            net_bytes_sent: sent,
            net_bytes_received: received,
            active_connections: open_socket_count(),
            timestamp: Utc::now(),
        }
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Open descriptors of this process, the cheap stand-in for a
/// connection count.
#[cfg(target_os = "linux")]
fn open_socket_count() -> usize {
    std::fs::read_dir("/proc/self/fd")
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn open_socket_count() -> usize {
    0
}
