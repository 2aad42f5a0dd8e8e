// VMBENCH -- HYPERVISOR BENCHMARK AUTOMATION
// STARTS A VM, SAMPLES HOST COUNTERS WHILE GUEST WORKLOADS RUN,
// PERSISTS THE SAMPLES, RENDERS THEM FOR COMPARISON ACROSS BACKENDS.
//
// LIBRARY CRATE: EVERYTHING BUT THE CLI. THE BINARY (main.rs + cli/)
// WIRES CONFIG, LOGGING AND SIGNALS AROUND IT.

pub mod adapter;
pub mod clock;
pub mod config;
pub mod counters;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod process;
pub mod render;
pub mod sample;
pub mod sampler;
pub mod secrets;
pub mod store;
pub mod workload;
