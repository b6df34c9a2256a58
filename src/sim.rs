// Builds a cache, its memory and the processors in front of it into one
// asynchronix simulation and runs it to completion.

use std::sync::{Arc, Mutex};

use asynchronix::simulation::{Address, Mailbox, SimInit, Simulation};
use asynchronix::time::MonotonicTime;
use log::{debug, info};
use thiserror::Error;

use crate::simple_cache::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimError {
    #[error("deadlock at cycle {cycle}: no pending events but processors {waiting:?} are not done")]
    Deadlock { cycle: u64, waiting: Vec<usize> },
    #[error("simulation did not finish within {0} cycles")]
    Timeout(u64),
}

/// Everything needed to instantiate one simulated system.
#[derive(Clone, Debug)]
pub struct Setup {
    pub params: CacheParams,
    pub system: SystemSpec,
    /// cycles a processor waits between a completion and its next instruction
    pub think: u64,
    /// memory contents before the simulation starts
    pub preload: Vec<(Addr, Vec<u8>)>,
}

impl Default for Setup {
    fn default() -> Self {
        Setup {
            params: CacheParams::default(),
            system: SystemSpec::default(),
            think: 1,
            preload: Vec::new(),
        }
    }
}

pub struct Harness {
    sim: Simulation,
    proc_addr: Vec<Address<Processor>>,
    logs: Vec<Arc<Mutex<ProcLog>>>,
    stats: Arc<Mutex<CacheStats>>,
    config: CacheConfig,
}

impl Harness {
    /// Wire one processor per trace to the cpu-side slots of a fresh cache.
    pub fn new(setup: &Setup, traces: Vec<Insts>) -> Result<Self, ConfigError> {
        let config = CacheConfig::new(&setup.params, &setup.system)?;
        let n = traces.len();
        let stats = Arc::new(Mutex::new(CacheStats::default()));
        let logs = (0..n).map(|_| Arc::new(Mutex::new(ProcLog::default()))).collect::<Vec<_>>();

        // create models
        let mut cache = SimpleCache::new(config, n, stats.clone());
        let mut memory = Memory::new(setup.system);
        for (addr, bytes) in &setup.preload {
            memory.preload(*addr, bytes);
        }
        let mut procs = traces
            .into_iter()
            .enumerate()
            .map(|(i, insts)| Processor::new(i, insts, setup.think, logs[i].clone()))
            .collect::<Vec<_>>();

        // create mailboxes
        let cache_mbox = Mailbox::<SimpleCache>::new();
        let mem_mbox = Mailbox::<Memory>::new();
        let mut procs_mbox = (0..n).map(|_| Mailbox::<Processor>::new()).collect::<Vec<_>>();
        let proc_addr = procs_mbox.iter().map(|mb| mb.address()).collect::<Vec<_>>();

        // connect models
        cache.mem_side.connect(Memory::on_request, &mem_mbox);
        cache.r_mem_functional.connect(Memory::functional, &mem_mbox);
        memory.o_resp.connect(SimpleCache::on_mem_resp, &cache_mbox);
        for (i, proc) in procs.iter_mut().enumerate() {
            proc.r_cache.connect(SimpleCache::try_accept, &cache_mbox);
            proc.r_functional.connect(SimpleCache::functional, &cache_mbox);
            cache.cpu_side[i].o_resp.connect(Processor::on_cache_resp, &procs_mbox[i]);
            cache.cpu_side[i].o_retry.connect(Processor::on_retry, &procs_mbox[i]);
        }

        // initialize simulation
        let mut simi = SimInit::with_num_threads(1)
            .add_model(cache, cache_mbox)
            .add_model(memory, mem_mbox);
        for proc in procs {
            simi = simi.add_model(proc, procs_mbox.remove(0));
        }
        let sim = simi.init(MonotonicTime::EPOCH);
        debug!("built system with {} processors, {} cache lines", n, config.capacity());

        Ok(Harness { sim, proc_addr, logs, stats, config })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn num_procs(&self) -> usize {
        self.proc_addr.len()
    }

    /// current cycle
    pub fn cycle(&self) -> u64 {
        self.sim.time().as_secs() as u64
    }

    /// Let processor `i` start executing at the current cycle.
    pub fn start(&mut self, i: usize) {
        self.sim.send_event(Processor::on_start, (), &self.proc_addr[i]);
    }

    /// Advance to the next cycle with scheduled events; `false` if there are none.
    pub fn step(&mut self) -> bool {
        let before = self.sim.time();
        self.sim.step();
        self.sim.time() != before
    }

    pub fn done(&self) -> bool {
        self.logs.iter().all(|l| l.lock().map(|l| l.done).unwrap_or(false))
    }

    /// Start every processor and run until all of them are done.
    pub fn run(&mut self, max_cycles: u64) -> Result<u64, SimError> {
        for i in 0..self.num_procs() {
            self.start(i);
        }
        self.run_started(max_cycles)
    }

    /// Run already started processors until all of them are done.
    pub fn run_started(&mut self, max_cycles: u64) -> Result<u64, SimError> {
        while !self.done() {
            if self.cycle() > max_cycles {
                return Err(SimError::Timeout(max_cycles));
            }
            if !self.step() {
                let waiting = (0..self.num_procs()).filter(|&i| !self.log(i).done).collect();
                return Err(SimError::Deadlock { cycle: self.cycle(), waiting });
            }
        }
        info!("simulation done after {} cycles", self.cycle());
        Ok(self.cycle())
    }

    /// snapshot of what processor `i` observed so far
    pub fn log(&self, i: usize) -> ProcLog {
        self.logs[i].lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// snapshot of the cache statistics
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
