//! Timing of repeated invocations and throughput reporting.

use std::time::Instant;

use log::info;

use crate::convolution_descriptor::ConvolutionDescriptor;
use crate::error_metrics::ErrorMetrics;

/// Timing of one measured method.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceResults {
    pub method: String,
    pub total_time_ns: u128,
    pub average_time_ns: u128,
    pub average_time_ms: f64,
    pub num_executions: u32,
    /// Low-precision operations performed by one execution.
    pub ops_per_execution: f64,
}

impl PerformanceResults {
    pub fn new(method: String, total_time_ns: u128, num_executions: u32, ops_per_execution: f64) -> Self {
        let average_time_ns = if num_executions == 0 {
            0
        } else {
            total_time_ns / num_executions as u128
        };
        let average_time_ms = average_time_ns as f64 / 1_000_000.0;

        Self {
            method,
            total_time_ns,
            average_time_ns,
            average_time_ms,
            num_executions,
            ops_per_execution,
        }
    }

    pub fn average_time_s(&self) -> f64 {
        self.average_time_ns as f64 / 1e9
    }

    pub fn gop_per_execution(&self) -> f64 {
        self.ops_per_execution * 1e-9
    }

    /// Giga-operations per second, or zero when nothing was timed.
    pub fn gops(&self) -> f64 {
        let seconds = self.average_time_s();
        if seconds > 0.0 {
            self.gop_per_execution() / seconds
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        println!("GOP  = {:.5}", self.gop_per_execution());
        println!("fp time = {:.5e}", self.average_time_s());
        println!("GOPS    = {:.5}", self.gops());
    }
}

/// Runs a closure a fixed number of times and reports the average duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceTimer {
    warmup: u32,
}

impl PerformanceTimer {
    pub fn new(warmup: u32) -> Self {
        Self { warmup }
    }

    /// Times `iterations` calls of `run`; the first error aborts the measurement.
    pub fn measure<F, E>(
        &self,
        name: &str,
        iterations: u32,
        ops_per_execution: f64,
        mut run: F,
    ) -> Result<PerformanceResults, E>
    where
        F: FnMut() -> Result<(), E>,
    {
        info!("Benchmarking {} ({} executions)...", name, iterations);

        for _ in 0..self.warmup {
            run()?;
        }

        let progress_step = (iterations / 10).max(1);
        let start = Instant::now();
        for i in 0..iterations {
            run()?;
            if (i + 1) % progress_step == 0 {
                info!("  Progress: {}/{}", i + 1, iterations);
            }
        }
        let duration = start.elapsed();

        Ok(PerformanceResults::new(
            name.to_string(),
            duration.as_nanos(),
            iterations,
            ops_per_execution,
        ))
    }
}

/// Formats the machine-readable `PERFDUMP` line of one pass.
pub fn perf_dump_line(
    pass: &str,
    threads: usize,
    descriptor: &ConvolutionDescriptor,
    results: &PerformanceResults,
    metrics: &ErrorMetrics,
) -> String {
    let info = descriptor.info();
    let layout = descriptor.layout();
    let mut fields = vec![
        "PERFDUMP".to_string(),
        pass.to_string(),
        threads.to_string(),
        info.batch.to_string(),
        info.input_channels.to_string(),
        info.output_channels.to_string(),
        info.input_width.to_string(),
        info.input_height.to_string(),
        info.kernel_width.to_string(),
        info.kernel_height.to_string(),
        info.stride_h.to_string(),
        layout.pad_w.to_string(),
        layout.pad_h.to_string(),
        format!("{:.5e}", results.average_time_s()),
        format!("{:.5}", results.gops()),
    ];
    fields.extend(metrics.as_array().iter().map(|norm| norm.to_string()));
    fields.join(",")
}
