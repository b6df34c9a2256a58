use std::collections::HashMap;
use std::time::Duration;

use asynchronix::model::{Model, Output};
use asynchronix::time::Scheduler;
use log::{debug, trace};

use super::common::*;

/// Fixed-latency backing memory behind the cache's memory side.
///
/// Blocks that were never written read as zeros.
pub struct Memory {
    specs: SystemSpec,
    blocks: HashMap<Addr, Vec<u8>>,
    pub o_resp: Output<FillResponse>,
}

impl Memory {
    pub fn new(specs: SystemSpec) -> Self {
        Self {
            specs,
            blocks: HashMap::new(),
            o_resp: Output::new(),
        }
    }

    /// Preload bytes, e.g. a program image, starting at `addr`.
    pub fn preload(&mut self, addr: Addr, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            let a = Addr(addr.0 + i as u64);
            let offset = a.offset(self.specs.block_size);
            self.block_mut(a.block_addr(self.specs.block_size))[offset] = *b;
        }
    }

    // helper functions

    fn block(&self, block: &Addr) -> Vec<u8> {
        self.blocks
            .get(block)
            .cloned()
            .unwrap_or_else(|| vec![0; self.specs.block_size as usize])
    }
    fn block_mut(&mut self, block: Addr) -> &mut Vec<u8> {
        let size = self.specs.block_size as usize;
        self.blocks.entry(block).or_insert_with(|| vec![0; size])
    }

    //  inputs (internal inputs are prefixed with _)

    pub fn on_request(&mut self, req: MemRequest, scheduler: &Scheduler<Self>) {
        match req {
            MemRequest::Fill(block) => {
                assert_eq!(block, block.block_addr(self.specs.block_size), "fill for unaligned block {}", block);
                trace!("fill request for block {}", block);
                let resp = FillResponse { addr: block, data: self.block(&block) };
                if let Err(e) = scheduler.schedule_event(
                    Duration::from_secs(self.specs.mem_lat),
                    Self::_send_fill,
                    resp,
                ) {
                    panic!("cannot schedule fill of block {}: {:?}", block, e);
                }
            }
            MemRequest::Writeback(block, data) => {
                debug!("writeback of block {}", block);
                assert_eq!(data.len(), self.specs.block_size as usize, "partial writeback of block {}", block);
                self.blocks.insert(block, data);
            }
        }
    }

    async fn _send_fill(&mut self, resp: FillResponse) {
        trace!("sending fill for block {}", resp.addr);
        self.o_resp.send(resp).await;
    }

    /// Untimed access straight to the backing store.
    pub async fn functional(&mut self, req: Request) -> Response {
        let block = req.addr.block_addr(self.specs.block_size);
        let offset = req.addr.offset(self.specs.block_size);
        match req.kind {
            AccessKind::Read => {
                let data = self.block(&block)[offset..offset + req.size as usize].to_vec();
                req.into_response(data)
            }
            AccessKind::Write => {
                self.block_mut(block)[offset..offset + req.data.len()].copy_from_slice(&req.data);
                req.into_response(Vec::new())
            }
        }
    }
}

impl Model for Memory {}
