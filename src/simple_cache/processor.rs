use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use asynchronix::model::{Model, Requestor};
use asynchronix::time::Scheduler;
use log::{debug, info, warn};

use super::common::*;

#[derive(Debug, PartialEq, Eq)]
pub enum ProcState {
    Idle,
    Done,
    ExecutingOther,
    WaitingForCache,
    WaitingForRetry,
}

impl Default for ProcState {
    fn default() -> Self { ProcState::Idle }
}

/// A finished memory access as seen by the requester (times in cycles).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub id: u64,
    pub addr: Addr,
    pub kind: AccessKind,
    pub issued_at: u64,
    pub accepted_at: u64,
    pub completed_at: u64,
    pub data: Vec<u8>,
    pub functional: bool,
}

impl Completion {
    /// cycles from acceptance to completion
    pub fn latency(&self) -> u64 {
        self.completed_at - self.accepted_at
    }
}

#[derive(Clone, Debug, Default)]
pub struct ProcLog {
    pub completions: Vec<Completion>,
    pub refusals: u64,
    pub retries: u64,
    pub done: bool,
}

/// Trace driven CPU-side requester.
///
/// Executes its instructions in order with at most one timed access in
/// flight. A refused access stays pending until the cache sends a retry.
pub struct Processor {
    pub id: usize,
    pub state: ProcState,
    insts: VecDeque<Instr>,
    think: u64,
    next_id: u64,
    pending: Option<Request>,
    issued_at: u64,
    accepted_at: u64,
    log: Arc<Mutex<ProcLog>>,
    pub r_cache: Requestor<Request, bool>,
    pub r_functional: Requestor<Request, Response>,
}

impl Processor {
    /// `id` must be the CPU-side slot the processor is wired to; `think` is
    /// the number of cycles between a completion and the next instruction.
    pub fn new(id: usize, insts: Insts, think: u64, log: Arc<Mutex<ProcLog>>) -> Self {
        Processor {
            id,
            state: ProcState::Idle,
            insts: insts.into(),
            think,
            next_id: 0,
            pending: None,
            issued_at: 0,
            accepted_at: 0,
            log,
            r_cache: Requestor::new(),
            r_functional: Requestor::new(),
        }
    }

    // helper functions

    fn record<F: FnOnce(&mut ProcLog)>(&self, f: F) {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut log);
    }
    fn now(scheduler: &Scheduler<Self>) -> u64 {
        scheduler.time().as_secs() as u64
    }
    fn continue_in(&self, d: u64, scheduler: &Scheduler<Self>) {
        if let Err(e) = scheduler.schedule_event(Duration::from_secs(d), Self::_continue_next, ()) {
            panic!("processor {} cannot resume in {} cycles: {:?}", self.id, d, e);
        }
    }
    fn make_request(&mut self, instr: Instr) -> Request {
        let id = self.next_id;
        self.next_id += 1;
        match instr {
            Instr::Read(addr, size) | Instr::Probe(addr, size) => Request::read(self.id, id, addr, size),
            Instr::Write(addr, data) => Request::write(self.id, id, addr, data),
            Instr::Other(_) => unreachable!("non-memory instruction has no request"),
        }
    }

    // execute instructions until one has to wait
    async fn exec(&mut self, scheduler: &Scheduler<Self>) {
        loop {
            let instr = match self.insts.pop_front() {
                Some(instr) => instr,
                None => {
                    info!("processor {} done", self.id);
                    self.state = ProcState::Done;
                    self.record(|log| log.done = true);
                    return;
                }
            };
            match instr {
                Instr::Other(0) => continue,
                Instr::Other(d) => {
                    self.state = ProcState::ExecutingOther;
                    self.continue_in(d, scheduler);
                    return;
                }
                Instr::Probe(..) => {
                    let req = self.make_request(instr);
                    let t = Self::now(scheduler);
                    let resp = self.r_functional
                        .send(req)
                        .await
                        .next()
                        .expect("functional path not connected");
                    self.record(|log| log.completions.push(Completion {
                        id: resp.id,
                        addr: resp.addr,
                        kind: resp.kind,
                        issued_at: t,
                        accepted_at: t,
                        completed_at: t,
                        data: resp.data,
                        functional: true,
                    }));
                }
                Instr::Read(..) | Instr::Write(..) => {
                    let req = self.make_request(instr);
                    debug!("processor {} issuing {}", self.id, req);
                    self.pending = Some(req);
                    self.issued_at = Self::now(scheduler);
                    self.try_send(scheduler).await;
                    return;
                }
            }
        }
    }

    async fn try_send(&mut self, scheduler: &Scheduler<Self>) {
        let req = match &self.pending {
            Some(req) => req.clone(),
            None => panic!("processor {} has nothing to send", self.id),
        };
        let accepted = self.r_cache
            .send(req)
            .await
            .next()
            .expect("cache not connected");
        if accepted {
            self.accepted_at = Self::now(scheduler);
            self.state = ProcState::WaitingForCache;
        } else {
            debug!("processor {} refused, waiting for retry", self.id);
            self.state = ProcState::WaitingForRetry;
            self.record(|log| log.refusals += 1);
        }
    }

    //  inputs (internal inputs are prefixed with _)

    pub async fn on_start(&mut self, _: (), scheduler: &Scheduler<Self>) {
        if self.state == ProcState::Idle {
            self.exec(scheduler).await;
        }
    }
    async fn _continue_next(&mut self, _: (), scheduler: &Scheduler<Self>) {
        self.state = ProcState::Idle;
        self.exec(scheduler).await;
    }
    pub async fn on_retry(&mut self, _: (), scheduler: &Scheduler<Self>) {
        self.record(|log| log.retries += 1);
        if self.state == ProcState::WaitingForRetry {
            debug!("processor {} retrying", self.id);
            self.try_send(scheduler).await;
        } else {
            warn!("processor {} got a retry it did not ask for", self.id);
        }
    }
    pub async fn on_cache_resp(&mut self, resp: Response, scheduler: &Scheduler<Self>) {
        let req = match self.pending.take() {
            Some(req) if req.id == resp.id && self.state == ProcState::WaitingForCache => req,
            _ => panic!("processor {} got response {} it is not waiting for", self.id, resp.id),
        };
        let completion = Completion {
            id: req.id,
            addr: req.addr,
            kind: req.kind,
            issued_at: self.issued_at,
            accepted_at: self.accepted_at,
            completed_at: Self::now(scheduler),
            data: resp.data,
            functional: false,
        };
        debug!("processor {} completed {} after {} cycles", self.id, req, completion.latency());
        self.record(|log| log.completions.push(completion));
        if self.think == 0 {
            self.state = ProcState::Idle;
            self.exec(scheduler).await;
        } else {
            self.state = ProcState::ExecutingOther;
            self.continue_in(self.think, scheduler);
        }
    }
}

impl Model for Processor {}
