//! Periodic resource sampling of local shell processes.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use sysinfo::{Networks, Pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;

use crate::registry::RegistryInner;
use crate::SessionId;

const MB: f64 = 1024.0 * 1024.0;

/// Start sampling a session's process until the session goes away.
pub(crate) fn spawn(registry: &Arc<RegistryInner>, session_id: SessionId) -> JoinHandle<()> {
    let weak = Arc::downgrade(registry);
    registry.runtime.spawn(async move {
        ProcessSampler::new().run(weak, session_id).await;
    })
}

struct ProcessSampler {
    system: System,
    networks: Networks,
    last_network: Option<(u64, u64, Instant)>,
    last_disk: Option<Instant>,
}

impl ProcessSampler {
    fn new() -> Self {
        Self {
            system: System::new(),
            networks: Networks::new_with_refreshed_list(),
            last_network: None,
            last_disk: None,
        }
    }

    async fn run(mut self, registry: Weak<RegistryInner>, session_id: SessionId) {
        loop {
            let rate = match registry.upgrade() {
                Some(registry) => registry.metrics.update_rate(&session_id),
                None => break,
            };
            tokio::time::sleep(rate).await;

            let Some(registry) = registry.upgrade() else {
                break;
            };
            let Some(entry) = registry.get(&session_id) else {
                break;
            };
            if entry.status().is_terminal() {
                break;
            }
            let Some(pid) = entry.process_id() else {
                continue;
            };

            let samples = self.sample(pid);
            let Ok(recorded) = registry.record_stats(
                &session_id,
                samples.iter().map(|(field, value)| (*field, value.as_str())),
            ) else {
                break;
            };
            tracing::trace!(%session_id, recorded, "Recorded process sample");
        }
        tracing::debug!(%session_id, "Process sampler stopped");
    }

    fn sample(&mut self, pid: u32) -> Vec<(&'static str, String)> {
        let pid = Pid::from_u32(pid);
        let now = Instant::now();
        let mut samples = Vec::with_capacity(6);

        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        if let Some(process) = self.system.process(pid) {
            samples.push(("cpu", format!("{:.1}%", process.cpu_usage())));
            samples.push(("memory", format!("{:.1} MB", process.memory() as f64 / MB)));

            // disk_usage() counts bytes since the previous refresh.
            if let Some(last) = self.last_disk {
                let secs = seconds_since(last, now);
                let disk = process.disk_usage();
                samples.push((
                    "disk_read",
                    format!("{:.3} MB/s", disk.read_bytes as f64 / MB / secs),
                ));
                samples.push((
                    "disk_write",
                    format!("{:.3} MB/s", disk.written_bytes as f64 / MB / secs),
                ));
            }
            self.last_disk = Some(now);

            tracing::trace!(
                "pid {} uses {} resident",
                pid,
                human_bytes::human_bytes(process.memory() as f64)
            );
        }

        self.networks.refresh();
        let (received, transmitted) = self
            .networks
            .iter()
            .fold((0u64, 0u64), |(rx, tx), (_, data)| {
                (
                    rx.saturating_add(data.total_received()),
                    tx.saturating_add(data.total_transmitted()),
                )
            });
        if let Some((last_rx, last_tx, last)) = self.last_network {
            let secs = seconds_since(last, now);
            samples.push((
                "network_rx",
                format!("{:.3} MB/s", received.saturating_sub(last_rx) as f64 / MB / secs),
            ));
            samples.push((
                "network_tx",
                format!("{:.3} MB/s", transmitted.saturating_sub(last_tx) as f64 / MB / secs),
            ));
        }
        self.last_network = Some((received, transmitted, now));

        samples
    }
}

fn seconds_since(earlier: Instant, now: Instant) -> f64 {
    now.saturating_duration_since(earlier)
        .max(Duration::from_millis(1))
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::parse_stats;

    #[test]
    fn samples_own_process_in_recorder_format() {
        let mut sampler = ProcessSampler::new();
        let pid = std::process::id();

        let first = sampler.sample(pid);
        let fields: Vec<_> = first.iter().map(|(field, _)| *field).collect();
        assert!(fields.contains(&"cpu"), "{fields:?}");
        assert!(fields.contains(&"memory"), "{fields:?}");

        let second = sampler.sample(pid);
        let fields: Vec<_> = second.iter().map(|(field, _)| *field).collect();
        assert!(fields.contains(&"network_rx"), "{fields:?}");

        // Every value must parse back through the recorder.
        let parsed = parse_stats(second.iter().map(|(f, v)| (*f, v.as_str())));
        assert_eq!(parsed.iter().filter(|(name, _)| *name != "network" && *name != "disk_io").count(), second.len());
    }

    #[test]
    fn unknown_pid_yields_no_process_fields() {
        let mut sampler = ProcessSampler::new();
        let samples = sampler.sample(u32::MAX - 1);
        assert!(samples.iter().all(|(field, _)| !matches!(*field, "cpu" | "memory")));
    }
}
