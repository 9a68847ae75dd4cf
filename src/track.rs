//! Scoped process telemetry: elapsed time, peak resident memory and an
//! optional CSV trace of memory over time.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::{info, warn};
use sysinfo::{Pid, System};
use tokio::task::JoinHandle;

use crate::error::{KpipeError, Result};
use crate::render::{human_memory, human_time};

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_TRACE_FILE: &str = "trace.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerReport {
    pub elapsed: Duration,
    pub peak_memory: u64,
}

/// Samples the process until stopped or dropped.
pub struct ProcessTracker {
    started: Instant,
    pid: Pid,
    peak: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

struct Sampler {
    system: System,
    pid: Pid,
}

impl Sampler {
    fn resident_memory(&mut self) -> u64 {
        self.system.refresh_process(self.pid);
        self.system.process(self.pid).map_or(0, |p| p.memory())
    }
}

impl ProcessTracker {
    /// Start sampling every `interval`. With `trace`, each sample is also
    /// appended to that CSV file as `elapsed_s,memory_mb`.
    pub fn start(trace: Option<&Path>, interval: Duration) -> Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| KpipeError::Config(e.to_string()))?;
        let mut trace = match trace {
            Some(path) => {
                let mut writer = BufWriter::new(File::create(path)?);
                writeln!(writer, "elapsed_s,memory_mb")?;
                info!("Tracing memory to {}", path.display());
                Some(writer)
            }
            None => None,
        };

        let started = Instant::now();
        let peak = Arc::new(AtomicU64::new(0));
        let task_peak = peak.clone();
        let task = tokio::spawn(async move {
            let mut sampler = Sampler {
                system: System::new(),
                pid,
            };
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let memory = sampler.resident_memory();
                task_peak.fetch_max(memory, Ordering::Relaxed);

                if let Some(writer) = trace.as_mut() {
                    let line = format!(
                        "{:.3},{:.3}",
                        started.elapsed().as_secs_f64(),
                        memory as f64 / (1024.0 * 1024.0)
                    );
                    if let Err(e) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
                        warn!("Stopping memory trace: {}", e);
                        trace = None;
                    }
                }
            }
        });

        Ok(Self {
            started,
            pid,
            peak,
            task,
        })
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn peak_memory(&self) -> u64 {
        self.peak.load(Ordering::Relaxed)
    }

    /// Stop sampling and log the totals.
    pub fn stop(self) -> TrackerReport {
        self.task.abort();

        // One last sample, a short run may finish before the first tick
        let mut sampler = Sampler {
            system: System::new(),
            pid: self.pid,
        };
        self.peak
            .fetch_max(sampler.resident_memory(), Ordering::Relaxed);

        let report = TrackerReport {
            elapsed: self.elapsed(),
            peak_memory: self.peak_memory(),
        };
        info!(
            "Elapsed: {}",
            human_time(report.elapsed.as_secs_f64() * 1000.0).trim()
        );
        info!(
            "Peak mem: {}",
            human_memory(report.peak_memory as f64).trim()
        );
        report
    }
}

impl Drop for ProcessTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}
