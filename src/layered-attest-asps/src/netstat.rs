//! `/proc/net/raw6` parsing.

use std::net::Ipv6Addr;

use layered_attest_graph::{NetstatRaw6Data, NetstatRaw6Line};
use thiserror::Error;

/// Longest socket state string kept.
const MAX_STATE_LEN: usize = 16;

/// Error while parsing the raw6 table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// A line ended before a required column.
    #[error("line {line}: missing {field}")]
    MissingField {
        /// 1-based line number in the source.
        line: usize,
        /// Column that was expected.
        field: &'static str,
    },

    /// A column was not valid hex or decimal.
    #[error("line {line}: invalid {field} {value:?}")]
    InvalidField {
        /// 1-based line number in the source.
        line: usize,
        /// Column that failed to parse.
        field: &'static str,
        /// The rejected text.
        value: String,
    },
}

/// Parse the full contents of a raw6 table. The column header line must be
/// present and is skipped; blank lines are ignored; entries keep file order.
pub fn parse_raw6(text: &str) -> Result<NetstatRaw6Data, ParseError> {
    let mut rows = text.lines().enumerate();
    if rows.next().is_none() {
        return Err(ParseError::MissingField {
            line: 1,
            field: "header",
        });
    }
    let lines = rows
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| parse_line(index + 1, line))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(NetstatRaw6Data { lines })
}

fn parse_line(line: usize, text: &str) -> Result<NetstatRaw6Line, ParseError> {
    let mut columns = text.split_whitespace();
    let mut next = |field: &'static str| columns.next().ok_or(ParseError::MissingField { line, field });

    next("sl")?;
    let local_addr = parse_endpoint(line, "local_address", next("local_address")?)?;
    let rem_addr = parse_endpoint(line, "rem_address", next("rem_address")?)?;
    let state: String = next("st")?.chars().take(MAX_STATE_LEN).collect();
    next("tx_queue:rx_queue")?;
    next("tr:tm->when")?;
    next("retrnsmt")?;
    let uid = parse_decimal(line, "uid", next("uid")?)?;
    next("timeout")?;
    let inode = parse_decimal(line, "inode", next("inode")?)?;

    Ok(NetstatRaw6Line {
        local_addr,
        rem_addr,
        state,
        uid,
        inode,
    })
}

/// `ADDR:PORT` in kernel hex to `[addr]:port`.
fn parse_endpoint(line: usize, field: &'static str, value: &str) -> Result<String, ParseError> {
    let invalid = || ParseError::InvalidField {
        line,
        field,
        value: value.to_string(),
    };
    let (addr, port) = value.split_once(':').ok_or_else(invalid)?;
    let addr = parse_addr(addr).ok_or_else(invalid)?;
    let port = u16::from_str_radix(port, 16).map_err(|_| invalid())?;
    Ok(format!("[{addr}]:{port}"))
}

/// Four 32-bit words in host byte order. An unbound socket (all zero)
/// is reported as loopback.
fn parse_addr(hex: &str) -> Option<Ipv6Addr> {
    if hex.len() != 32 || !hex.is_ascii() {
        return None;
    }
    let mut octets = [0u8; 16];
    for (chunk, word) in octets.chunks_exact_mut(4).zip(0..4) {
        let start = word * 8;
        let value = u32::from_str_radix(&hex[start..start + 8], 16).ok()?;
        chunk.copy_from_slice(&value.to_ne_bytes());
    }
    let addr = Ipv6Addr::from(octets);
    if addr.is_unspecified() {
        Some(Ipv6Addr::LOCALHOST)
    } else {
        Some(addr)
    }
}

fn parse_decimal<T: std::str::FromStr>(
    line: usize,
    field: &'static str,
    value: &str,
) -> Result<T, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidField {
        line,
        field,
        value: value.to_string(),
    })
}
