//! Builder-style configuration for a simulation run, adapted from the
//! teacher's `HybridConfig` builder idiom.

use std::collections::BTreeMap;

use crate::error::{KernelError, Result};
use crate::transport::intra::IntraVariant;
use crate::util::argparse::{ArgKind, ArgParser, ArgSpec, ArgValue};

/// Per-worker arena sizing and sync tuning, plus the process-wide bounds.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub workers: usize,
    pub terminal: u64,
    pub timestep: f64,
    pub throttle_horizon: u64,
    pub gvt_delay_rate: u64,
    pub dealloc_thresh: f64,
    pub event_arena_size: usize,
    pub transport: IntraVariant,
    pub shard_count: usize,
    /// Whether a worker's agents commit output through one shared,
    /// lock-guarded per-worker buffer (`--use-shared-events`) instead of
    /// each agent's own speculative buffer being flushed independently.
    pub use_shared_events: bool,
    /// Max wire events drained from the cross-node transport per poll
    /// (`--max-mpi-batch`).
    pub max_mpi_batch: usize,
    worker_agent_counts: Vec<usize>,
}

impl SimConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            terminal: 0,
            timestep: 1.0,
            throttle_horizon: 0,
            gvt_delay_rate: 16,
            dealloc_thresh: 0.5,
            event_arena_size: 4096,
            transport: IntraVariant::SingleMutex,
            shard_count: 1,
            use_shared_events: false,
            max_mpi_batch: 64,
            worker_agent_counts: vec![0; workers],
        }
    }

    pub fn with_time_bounds(mut self, terminal: u64, timestep: f64) -> Self {
        self.terminal = terminal;
        self.timestep = timestep;
        self
    }

    pub fn with_throttle_horizon(mut self, horizon: u64) -> Self {
        self.throttle_horizon = horizon;
        self
    }

    pub fn with_gvt_delay_rate(mut self, rate: u64) -> Self {
        self.gvt_delay_rate = rate;
        self
    }

    pub fn with_dealloc_thresh(mut self, thresh: f64) -> Self {
        self.dealloc_thresh = thresh;
        self
    }

    pub fn with_transport(mut self, transport: IntraVariant, shard_count: usize) -> Self {
        self.transport = transport;
        self.shard_count = shard_count.max(1);
        self
    }

    pub fn with_shared_events(mut self, enabled: bool) -> Self {
        self.use_shared_events = enabled;
        self
    }

    pub fn with_max_mpi_batch(mut self, max: usize) -> Self {
        self.max_mpi_batch = max.max(1);
        self
    }

    pub fn assign_agent_to_worker(mut self, worker: usize) -> Result<Self> {
        if worker >= self.workers {
            return Err(KernelError::Config(format!(
                "worker index {worker} out of range (0..{})",
                self.workers
            )));
        }
        self.worker_agent_counts[worker] += 1;
        Ok(self)
    }

    pub fn agents_on(&self, worker: usize) -> usize {
        self.worker_agent_counts[worker]
    }

    pub fn total_agents(&self) -> usize {
        self.worker_agent_counts.iter().sum()
    }

    pub fn validate(&self) -> Result<()> {
        if self.terminal == 0 {
            return Err(KernelError::Config("terminal time must be positive".into()));
        }
        if self.timestep <= 0.0 {
            return Err(KernelError::Config("timestep must be positive".into()));
        }
        if self.throttle_horizon == 0 {
            return Err(KernelError::Config("throttle horizon must be set".into()));
        }
        if self.gvt_delay_rate == 0 {
            return Err(KernelError::Config("gvt delay rate must be nonzero".into()));
        }
        if self.total_agents() == 0 {
            return Err(KernelError::Config("no agents registered on any worker".into()));
        }
        Ok(())
    }

    /// Builds the option table this configuration is parsed from, for use
    /// with [`crate::util::argparse::ArgParser`].
    pub fn arg_table() -> ArgParser {
        ArgParser::new(vec![
            ArgSpec { flag: "--threads-per-node", kind: ArgKind::Int, default: ArgValue::Int(1), help: "number of worker threads" },
            ArgSpec { flag: "--simEndTime", kind: ArgKind::Long, default: ArgValue::Long(0), help: "simulation terminal time" },
            ArgSpec { flag: "--timestep", kind: ArgKind::Double, default: ArgValue::Double(1.0), help: "physical seconds per tick" },
            ArgSpec { flag: "--throttle-horizon", kind: ArgKind::Long, default: ArgValue::Long(0), help: "max ticks a worker may run ahead of gvt" },
            ArgSpec { flag: "--gvt-delay-rate", kind: ArgKind::Int, default: ArgValue::Int(16), help: "worker steps between gvt round requests" },
            ArgSpec { flag: "--dealloc-thresh", kind: ArgKind::Double, default: ArgValue::Double(0.5), help: "target fraction of pending frees reclaimed per scan" },
            ArgSpec { flag: "--mt-queue", kind: ArgKind::Str, default: ArgValue::Str("single-blocking".into()), help: "intra-node transport variant" },
            ArgSpec { flag: "--multi-mt-queues", kind: ArgKind::Int, default: ArgValue::Int(1), help: "shard count for a sharded mt-queue variant" },
            ArgSpec { flag: "--use-shared-events", kind: ArgKind::Int, default: ArgValue::Int(0), help: "commit output through one shared per-worker buffer" },
            ArgSpec { flag: "--max-mpi-batch", kind: ArgKind::Int, default: ArgValue::Int(64), help: "max wire events drained per cross-node poll" },
        ])
    }

    /// Builds a config from a parsed argument map (see [`Self::arg_table`]),
    /// leaving per-worker agent assignment to the caller.
    pub fn from_args(args: &BTreeMap<String, ArgValue>) -> Result<Self> {
        let get_int = |k: &str| -> i64 {
            match &args[k] {
                ArgValue::Int(v) => *v as i64,
                ArgValue::Long(v) => *v,
                _ => unreachable!("arg table mismatch for {k}"),
            }
        };
        let get_double = |k: &str| -> f64 {
            match &args[k] {
                ArgValue::Double(v) => *v,
                _ => unreachable!("arg table mismatch for {k}"),
            }
        };
        let transport = match args.get("--mt-queue") {
            Some(ArgValue::Str(s)) => IntraVariant::from_str(s)
                .ok_or_else(|| KernelError::Config(format!("unknown mt-queue variant: {s}")))?,
            _ => IntraVariant::SingleMutex,
        };
        let workers = get_int("--threads-per-node").max(1) as usize;
        let shard_count = get_int("--multi-mt-queues").max(1) as usize;
        Ok(Self::new(workers)
            .with_time_bounds(get_int("--simEndTime").max(0) as u64, get_double("--timestep"))
            .with_throttle_horizon(get_int("--throttle-horizon").max(0) as u64)
            .with_gvt_delay_rate(get_int("--gvt-delay-rate").max(1) as u64)
            .with_dealloc_thresh(get_double("--dealloc-thresh"))
            .with_transport(transport, shard_count)
            .with_shared_events(get_int("--use-shared-events") != 0)
            .with_max_mpi_batch(get_int("--max-mpi-batch").max(1) as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_unset_bounds() {
        let cfg = SimConfig::new(2);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_fully_configured() {
        let cfg = SimConfig::new(2)
            .with_time_bounds(1000, 1.0)
            .with_throttle_horizon(50)
            .assign_agent_to_worker(0)
            .unwrap()
            .assign_agent_to_worker(1)
            .unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.total_agents(), 2);
    }

    #[test]
    fn rejects_out_of_range_worker() {
        assert!(SimConfig::new(1).assign_agent_to_worker(5).is_err());
    }

    #[test]
    fn from_args_round_trips_cli_table() {
        let parsed = SimConfig::arg_table()
            .parse([
                "--threads-per-node",
                "4",
                "--simEndTime",
                "10000",
                "--throttle-horizon",
                "20",
                "--mt-queue",
                "multi-blocking-sl",
                "--multi-mt-queues",
                "8",
                "--use-shared-events",
                "1",
                "--max-mpi-batch",
                "128",
            ])
            .unwrap();
        let cfg = SimConfig::from_args(&parsed).unwrap();
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.terminal, 10000);
        assert_eq!(cfg.throttle_horizon, 20);
        assert_eq!(cfg.transport, IntraVariant::ShardedSpin);
        assert_eq!(cfg.shard_count, 8);
        assert!(cfg.use_shared_events);
        assert_eq!(cfg.max_mpi_batch, 128);
    }
}
