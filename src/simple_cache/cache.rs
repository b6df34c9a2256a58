use std::sync::{Arc, Mutex};
use std::time::Duration;

use asynchronix::model::{Model, Output, Requestor};
use asynchronix::time::{MonotonicTime, Scheduler};
use log::{debug, trace};

use super::common::*;
use super::line_store::LineStore;
use super::stats::CacheStats;

/// One CPU-side slot of the cache.
pub struct CpuSidePort {
    pub o_resp: Output<Response>,
    pub o_retry: Output<()>,
    need_retry: bool,
}

impl CpuSidePort {
    fn new() -> Self {
        Self {
            o_resp: Output::new(),
            o_retry: Output::new(),
            need_retry: false,
        }
    }
}

enum CacheState {
    Idle,
    Hit,                    // completion scheduled
    Miss,                   // fill outstanding on the memory side
    Filled,                 // fill arrived, completion scheduled
}

/// Blocking cache serving one request at a time.
///
/// Requests arrive through `try_accept` on any CPU-side slot. A hit completes
/// `latency` cycles after acceptance. A miss sends a block fill out of the
/// memory side and completes `latency` cycles after the fill returned. While a
/// request is in service every other request is refused, and each refused
/// slot is sent one retry notification when the cache frees up.
pub struct SimpleCache {
    config: CacheConfig,
    state: CacheState,
    store: LineStore,
    pending: Option<Request>,
    accepted_at: MonotonicTime,
    stats: Arc<Mutex<CacheStats>>,
    pub cpu_side: Vec<CpuSidePort>,
    pub mem_side: Output<MemRequest>,
    pub r_mem_functional: Requestor<Request, Response>,
}

impl SimpleCache {
    pub fn new(config: CacheConfig, num_cpu_ports: usize, stats: Arc<Mutex<CacheStats>>) -> Self {
        Self {
            config,
            state: CacheState::Idle,
            store: LineStore::new(config.capacity(), config.block_size()),
            pending: None,
            accepted_at: MonotonicTime::EPOCH,
            stats,
            cpu_side: (0..num_cpu_ports).map(|_| CpuSidePort::new()).collect(),
            mem_side: Output::new(),
            r_mem_functional: Requestor::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn busy(&self) -> bool {
        !matches!(self.state, CacheState::Idle)
    }

    // helper functions

    fn update_stats<F: FnOnce(&mut CacheStats)>(&self, f: F) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut stats);
    }

    fn schedule_completion(&self, scheduler: &Scheduler<Self>) {
        let delay = Duration::from_secs(self.config.latency());
        if let Err(e) = scheduler.schedule_event(delay, Self::_complete, ()) {
            panic!("cannot schedule completion in {} cycles: {:?}", self.config.latency(), e);
        }
    }

    fn cycles_since(t0: MonotonicTime, scheduler: &Scheduler<Self>) -> u64 {
        (scheduler.time().as_secs() - t0.as_secs()) as u64
    }

    /// Perform the access against a resident line and build the response.
    fn access_resident(store: &mut LineStore, req: Request, block_size: u32) -> Response {
        let block = req.addr.block_addr(block_size);
        let offset = req.addr.offset(block_size);
        let line = match store.peek_mut(&block) {
            Some(line) => line,
            None => panic!("line {} of in-flight request vanished from the cache", block),
        };
        match req.kind {
            AccessKind::Read => {
                let data = line.read(offset, req.size as usize);
                req.into_response(data)
            }
            AccessKind::Write => {
                line.write(offset, &req.data);
                req.into_response(Vec::new())
            }
        }
    }

    //  inputs (internal inputs are prefixed with _)

    /// Offer a request to the cache; `false` means busy, retry later.
    pub async fn try_accept(&mut self, req: Request, scheduler: &Scheduler<Self>) -> bool {
        trace!("got request {}", req);
        let port = req.port;
        if port >= self.cpu_side.len() {
            panic!("request {} arrived on unconnected cpu-side slot {}", req, port);
        }
        if self.busy() {
            debug!("request blocked: {}", req);
            self.cpu_side[port].need_retry = true;
            self.update_stats(|s| s.refusals += 1);
            return false;
        }
        req.check(self.config.block_size());

        self.accepted_at = scheduler.time();
        let block = req.addr.block_addr(self.config.block_size());
        if self.store.lookup(&block).is_some() {
            debug!("hit for {} in block {}", req.addr, block);
            self.update_stats(|s| s.hits += 1);
            self.state = CacheState::Hit;
            self.pending = Some(req);
            self.schedule_completion(scheduler);
        } else {
            debug!("miss for {}, fetching block {}", req.addr, block);
            self.update_stats(|s| s.misses += 1);
            self.state = CacheState::Miss;
            self.pending = Some(req);
            self.mem_side.send(MemRequest::Fill(block)).await;
        }
        true
    }

    /// A block fill returned from memory.
    pub async fn on_mem_resp(&mut self, resp: FillResponse, scheduler: &Scheduler<Self>) {
        if !matches!(self.state, CacheState::Miss) {
            panic!("memory response for {} without an outstanding miss", resp.addr);
        }
        debug!("got fill for block {}", resp.addr);
        let evicted = self.store.insert(resp.addr, resp.data);
        let occupancy = self.store.len();
        self.update_stats(|s| {
            s.occupancy = occupancy;
            s.peak_occupancy = s.peak_occupancy.max(occupancy);
        });
        if let Some(victim) = evicted {
            debug!("removing block {} (dirty: {})", victim.tag, victim.dirty);
            let dirty = victim.dirty;
            self.update_stats(|s| {
                s.evictions += 1;
                if dirty {
                    s.writebacks += 1;
                }
            });
            if dirty {
                trace!("writing block {} back", victim.tag);
                self.mem_side.send(MemRequest::Writeback(victim.tag, victim.data)).await;
            }
        }
        // the replayed request is a guaranteed hit on the fresh line
        self.state = CacheState::Filled;
        self.schedule_completion(scheduler);
    }

    async fn _complete(&mut self, _: (), scheduler: &Scheduler<Self>) {
        let was_miss = match self.state {
            CacheState::Hit => false,
            CacheState::Filled => true,
            _ => panic!("completion fired while the cache is neither hitting nor filled"),
        };
        let req = match self.pending.take() {
            Some(req) => req,
            None => panic!("completion fired without an in-flight request"),
        };
        if was_miss {
            let latency = Self::cycles_since(self.accepted_at, scheduler);
            self.update_stats(|s| s.miss_latency.sample(latency));
        }
        let resp = Self::access_resident(&mut self.store, req, self.config.block_size());
        self.state = CacheState::Idle;

        debug!("sending response for {} to port {}", resp.addr, resp.port);
        let port = resp.port;
        self.cpu_side[port].o_resp.send(resp).await;

        // wake up every slot that was turned away
        let mut retries = 0;
        for (i, slot) in self.cpu_side.iter_mut().enumerate() {
            if slot.need_retry {
                slot.need_retry = false;
                retries += 1;
                trace!("sending retry to port {}", i);
                slot.o_retry.send(()).await;
            }
        }
        self.update_stats(|s| s.retries_sent += retries);
    }

    /// Untimed access: served by a resident line or forwarded to memory.
    pub async fn functional(&mut self, req: Request) -> Response {
        req.check(self.config.block_size());
        let block = req.addr.block_addr(self.config.block_size());
        if self.store.peek(&block).is_some() {
            trace!("functional access {} served by the cache", req);
            return Self::access_resident(&mut self.store, req, self.config.block_size());
        }
        trace!("functional access {} forwarded to memory", req);
        self.r_mem_functional
            .send(req)
            .await
            .next()
            .expect("memory side not connected")
    }
}

impl Model for SimpleCache {}

#[cfg(test)]
mod tests {
    use super::*;
    use asynchronix::simulation::{Mailbox, SimInit};

    #[test]
    #[should_panic(expected = "without an outstanding miss")]
    fn fill_without_miss_is_fatal() {
        let config = CacheConfig::new(&CacheParams::default(), &SystemSpec::default()).unwrap();
        let cache = SimpleCache::new(config, 1, Arc::new(Mutex::new(CacheStats::default())));
        assert!(!cache.busy());
        assert_eq!(cache.config().capacity(), 256);

        let cache_mbox = Mailbox::new();
        let cache_addr = cache_mbox.address();
        let mut sim = SimInit::with_num_threads(1)
            .add_model(cache, cache_mbox)
            .init(MonotonicTime::EPOCH);
        let fill = FillResponse { addr: Addr(0x40), data: vec![0; 64] };
        sim.send_event(SimpleCache::on_mem_resp, fill, &cache_addr);
    }
}
