use std::fmt;

use thiserror::Error;

/// The system a cache belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SystemSpec {         // unit         reasonable defaults
    pub block_size: u32,        // bytes        64
    pub mem_lat: u64,           // cycles       100
}

impl Default for SystemSpec {
    fn default() -> Self {
        SystemSpec {
            block_size: 64,
            mem_lat: 100,
        }
    }
}

impl SystemSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(ConfigError::BlockSize(self.block_size));
        }
        if self.mem_lat == 0 {
            return Err(ConfigError::MemLatency);
        }
        Ok(())
    }
}

/// Parameters of a single cache as declared by the simulation script.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheParams {
    /// Cycles taken on a hit or to resolve a miss.
    pub latency: u64,
    /// The size of the cache in bytes.
    pub size: u64,
}

impl Default for CacheParams {
    fn default() -> Self {
        CacheParams {
            latency: 1,
            size: 16 * 1024,
        }
    }
}

/// Validated, immutable cache configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    latency: u64,
    size: u64,
    block_size: u32,
    capacity: usize,
}

impl CacheConfig {
    pub fn new(params: &CacheParams, system: &SystemSpec) -> Result<Self, ConfigError> {
        system.validate()?;
        if params.latency == 0 {
            return Err(ConfigError::Latency);
        }
        let block = u64::from(system.block_size);
        if params.size == 0 || params.size % block != 0 {
            return Err(ConfigError::Size { size: params.size, block_size: system.block_size });
        }
        let capacity = usize::try_from(params.size / block)
            .map_err(|_| ConfigError::Size { size: params.size, block_size: system.block_size })?;
        Ok(CacheConfig {
            latency: params.latency,
            size: params.size,
            block_size: system.block_size,
            capacity,
        })
    }

    pub fn latency(&self) -> u64 {
        self.latency
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Number of lines the cache can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("latency must be at least one cycle")]
    Latency,
    #[error("memory latency must be at least one cycle")]
    MemLatency,
    #[error("block size {0} is not a non-zero power of two")]
    BlockSize(u32),
    #[error("cache size {size} is not a non-zero multiple of the block size {block_size}")]
    Size { size: u64, block_size: u32 },
    #[error("invalid memory size {0:?}")]
    MemSize(String),
}

/// Parse a memory size such as `16kB`, `64KiB` or `4096`.
///
/// Like the simulator's configuration scripts, `kB`, `MB` and `GB` are binary
/// multiples.
pub fn parse_mem_size(s: &str) -> Result<u64, ConfigError> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let num: u64 = num.parse().map_err(|_| ConfigError::MemSize(s.to_string()))?;
    let mult: u64 = match unit.trim() {
        "" | "B" => 1,
        "kB" | "KB" | "KiB" => 1 << 10,
        "MB" | "MiB" => 1 << 20,
        "GB" | "GiB" => 1 << 30,
        _ => return Err(ConfigError::MemSize(s.to_string())),
    };
    num.checked_mul(mult).ok_or_else(|| ConfigError::MemSize(s.to_string()))
}

// addresses

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Addr(pub u64);

impl Addr {
    /// the address with its low bits masked to the block size
    pub fn block_addr(&self, block_size: u32) -> Addr {
        Addr(self.0 & !(u64::from(block_size) - 1))
    }
    /// byte offset of the address inside its block
    pub fn offset(&self, block_size: u32) -> usize {
        (self.0 & (u64::from(block_size) - 1)) as usize
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// instructions

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instr {
    /// timed read of `size` bytes
    Read(Addr, u32),
    /// timed write of the payload
    Write(Addr, Vec<u8>),
    /// non-memory work taking the given number of cycles
    Other(u64),
    /// functional (untimed) read of `size` bytes
    Probe(Addr, u32),
}

pub type Insts = Vec<Instr>;

// MESSAGE TYPES

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// A memory request travelling from a requester to the cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// CPU-side slot of the requester; responses are routed back to it.
    pub port: usize,
    /// per-requester sequence number
    pub id: u64,
    pub addr: Addr,
    pub kind: AccessKind,
    pub size: u32,
    /// payload of a write, empty for reads
    pub data: Vec<u8>,
}

impl Request {
    pub fn read(port: usize, id: u64, addr: Addr, size: u32) -> Self {
        Request { port, id, addr, kind: AccessKind::Read, size, data: Vec::new() }
    }
    pub fn write(port: usize, id: u64, addr: Addr, data: Vec<u8>) -> Self {
        let size = u32::try_from(data.len()).unwrap_or_else(|_| {
            panic!("write request {} of port {} for {} carries {} bytes", id, port, addr, data.len())
        });
        Request { port, id, addr, kind: AccessKind::Write, size, data }
    }

    /// Panics unless the access lies inside a single block.
    pub fn check(&self, block_size: u32) {
        if self.size == 0 || self.size > block_size {
            panic!(
                "request {} of port {} for {} has size {} outside 1..={}",
                self.id, self.port, self.addr, self.size, block_size
            );
        }
        if self.addr.offset(block_size) + self.size as usize > block_size as usize {
            panic!(
                "request {} of port {} for {} ({} bytes) spans multiple cache lines",
                self.id, self.port, self.addr, self.size
            );
        }
        if self.kind == AccessKind::Write && self.data.len() != self.size as usize {
            panic!(
                "write request {} of port {} carries {} bytes but declares {}",
                self.id, self.port, self.data.len(), self.size
            );
        }
    }

    /// Turns the request into its response; reads carry the returned bytes.
    pub fn into_response(self, data: Vec<u8>) -> Response {
        Response { port: self.port, id: self.id, addr: self.addr, kind: self.kind, data }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            AccessKind::Read => "ReadReq",
            AccessKind::Write => "WriteReq",
        };
        write!(f, "{} [{}:{}] port {} id {}", kind, self.addr,
            self.addr.0 + u64::from(self.size), self.port, self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub port: usize,
    pub id: u64,
    pub addr: Addr,
    pub kind: AccessKind,
    /// bytes read; empty for writes
    pub data: Vec<u8>,
}

/// Requests the cache sends out of its memory-side port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemRequest {
    /// fetch a whole block
    Fill(Addr),
    /// write a dirty victim back
    Writeback(Addr, Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FillResponse {
    pub addr: Addr,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = CacheConfig::new(&CacheParams::default(), &SystemSpec::default()).unwrap();
        assert_eq!(config.latency(), 1);
        assert_eq!(config.size(), 16 * 1024);
        assert_eq!(config.capacity(), 256);
    }

    #[test]
    fn rejects_invalid_config() {
        let system = SystemSpec::default();
        let zero_lat = CacheParams { latency: 0, ..Default::default() };
        assert_eq!(CacheConfig::new(&zero_lat, &system), Err(ConfigError::Latency));

        let odd_size = CacheParams { size: 100, ..Default::default() };
        assert_eq!(
            CacheConfig::new(&odd_size, &system),
            Err(ConfigError::Size { size: 100, block_size: 64 })
        );

        let empty = CacheParams { size: 0, ..Default::default() };
        assert!(CacheConfig::new(&empty, &system).is_err());

        let bad_block = SystemSpec { block_size: 48, ..Default::default() };
        assert_eq!(
            CacheConfig::new(&CacheParams::default(), &bad_block),
            Err(ConfigError::BlockSize(48))
        );

        let no_mem = SystemSpec { mem_lat: 0, ..Default::default() };
        assert_eq!(CacheConfig::new(&CacheParams::default(), &no_mem), Err(ConfigError::MemLatency));
    }

    #[test]
    fn mem_sizes() {
        assert_eq!(parse_mem_size("16kB"), Ok(16384));
        assert_eq!(parse_mem_size("64KiB"), Ok(65536));
        assert_eq!(parse_mem_size("2MB"), Ok(2 << 20));
        assert_eq!(parse_mem_size("128"), Ok(128));
        assert_eq!(parse_mem_size(" 512B "), Ok(512));
        assert!(parse_mem_size("kB").is_err());
        assert!(parse_mem_size("12 parsecs").is_err());
    }

    #[test]
    fn block_addresses() {
        assert_eq!(Addr(0x1234).block_addr(64), Addr(0x1200));
        assert_eq!(Addr(0x1234).offset(64), 0x34);
        assert_eq!(Addr(0x40).block_addr(64), Addr(0x40));
    }

    #[test]
    #[should_panic(expected = "spans multiple cache lines")]
    fn crossing_request_is_fatal() {
        Request::read(0, 0, Addr(0x3e), 4).check(64);
    }

    #[test]
    fn write_size_follows_payload() {
        let req = Request::write(1, 7, Addr(0x44), vec![1, 2, 3]);
        assert_eq!(req.size, 3);
        assert_eq!(req.kind, AccessKind::Write);
        req.check(64);
    }

    #[test]
    #[should_panic(expected = "outside 1..=64")]
    fn oversized_request_is_fatal() {
        Request::read(0, 0, Addr(0), 128).check(64);
    }
}
