// Reads instruction traces, one instruction per line:
//
//   0 <hex addr> [size]      read, size defaults to 4
//   1 <hex addr> [hex data]  write, data defaults to four zero bytes
//   2 <hex cycles>           non-memory work
//   3 <hex addr> [size]      functional read

use std::fs;
use std::path::Path;

use thiserror::Error;

use super::common::{Addr, Insts, Instr};

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("cannot read trace {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("line {line}: {msg}")]
    Parse { line: usize, msg: String },
}

// hex digits with at most one `0x` prefix, no sign
fn hex_digits(s: &str) -> Option<&str> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(digits)
}

fn parse_hex(s: &str) -> Option<u64> {
    u64::from_str_radix(hex_digits(s)?, 16).ok()
}

fn parse_bytes(s: &str) -> Option<Vec<u8>> {
    let digits = hex_digits(s)?.as_bytes();
    if digits.len() % 2 != 0 {
        return None;
    }
    digits
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect()
}

pub fn parse_trace(s: &str) -> Result<Insts, TraceError> {
    let mut insts = Vec::new();
    for (i, line) in s.lines().enumerate() {
        let line_no = i + 1;
        let err = |msg: &str| TraceError::Parse { line: line_no, msg: msg.to_string() };
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let op = parts.next().ok_or_else(|| err("missing instruction"))?;
        let val = parts
            .next()
            .and_then(parse_hex)
            .ok_or_else(|| err("missing or invalid hex operand"))?;
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(err("trailing fields"));
        }
        let size = |arg: Option<&str>| match arg {
            Some(a) => a.parse::<u32>().map_err(|_| err("invalid access size")),
            None => Ok(4),
        };
        insts.push(match op {
            "0" => Instr::Read(Addr(val), size(arg)?),
            "1" => {
                let data = match arg {
                    Some(a) => parse_bytes(a).ok_or_else(|| err("invalid write data"))?,
                    None => vec![0; 4],
                };
                Instr::Write(Addr(val), data)
            }
            "2" => Instr::Other(val),
            "3" => Instr::Probe(Addr(val), size(arg)?),
            _ => return Err(err("invalid instruction")),
        });
    }
    Ok(insts)
}

pub fn read_trace<P: AsRef<Path>>(path: P) -> Result<Insts, TraceError> {
    let path = path.as_ref();
    let s = fs::read_to_string(path).map_err(|source| TraceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_trace(&s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_instructions() {
        let insts = parse_trace(
            "# warmup\n\
             0 0x40\n\
             0 0x80 8\n\
             1 0x44 deadbeef\n\
             1 0x48\n\
             \n\
             2 0xa   # ten cycles\n\
             3 0x44 2\n",
        )
        .unwrap();
        assert_eq!(insts, vec![
            Instr::Read(Addr(0x40), 4),
            Instr::Read(Addr(0x80), 8),
            Instr::Write(Addr(0x44), vec![0xde, 0xad, 0xbe, 0xef]),
            Instr::Write(Addr(0x48), vec![0; 4]),
            Instr::Other(10),
            Instr::Probe(Addr(0x44), 2),
        ]);
    }

    #[test]
    fn reports_bad_lines() {
        match parse_trace("0 0x40\n7 0x40\n") {
            Err(TraceError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_trace("0 zz\n").is_err());
        assert!(parse_trace("1 0x40 abc\n").is_err());
        assert!(parse_trace("0 0x40 4 4\n").is_err());
        assert!(parse_trace("1 0x40 a\u{e9}b\n").is_err());
        assert!(parse_trace("1 0x40 0x\n").is_err());
    }

    #[test]
    fn hex_operands_are_strict() {
        assert!(parse_trace("0 0x0x40\n").is_err());
        assert!(parse_trace("0 +40\n").is_err());
        assert!(parse_trace("0 -40\n").is_err());
        assert!(parse_trace("1 0x40 +f\n").is_err());
        assert_eq!(parse_trace("0 40\n").unwrap(), vec![Instr::Read(Addr(0x40), 4)]);
    }

    #[test]
    fn missing_file() {
        assert!(matches!(read_trace("/nonexistent/trace.data"), Err(TraceError::Io { .. })));
    }
}
