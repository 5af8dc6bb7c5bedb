//! Connection graph endpoints and device ordering.
//!
//! The same edge syntax is used at two levels: between audio units
//! (`au_XX/out_YY -> au_ZZ/in_WW`, `-> out_YY` for the master) and between
//! processors inside one unit (`proc_XX/...`, with `in_YY` / `out_YY` as
//! the unit's own interface).

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::error::FormatError;
use crate::processor::PORTS_MAX;

/// Which graph an edge belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphLevel {
    /// Audio units and the master output.
    Top,
    /// Processors inside one audio unit.
    Unit,
}

impl GraphLevel {
    fn device_prefix(self) -> &'static str {
        match self {
            GraphLevel::Top => "au_",
            GraphLevel::Unit => "proc_",
        }
    }
}

/// One end of an edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    /// A device port: an output port on the source side, an input port on
    /// the destination side.
    Device { index: usize, port: usize },
    /// The enclosing interface: a unit input on the source side, a unit
    /// (or master) output on the destination side.
    Interface { port: usize },
}

impl Endpoint {
    pub fn device(self) -> Option<usize> {
        match self {
            Endpoint::Device { index, .. } => Some(index),
            Endpoint::Interface { .. } => None,
        }
    }

    pub fn port(self) -> usize {
        match self {
            Endpoint::Device { port, .. } | Endpoint::Interface { port } => port,
        }
    }
}

/// A directed connection from a source endpoint to a destination endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub from: Endpoint,
    pub to: Endpoint,
}

impl Edge {
    /// Parse `[src, dst]` endpoint strings.
    pub fn parse(src: &str, dst: &str, level: GraphLevel) -> Result<Self, FormatError> {
        let from = parse_endpoint(src, level, "out_", "in_")?;
        if level == GraphLevel::Top && matches!(from, Endpoint::Interface { .. }) {
            return Err(FormatError::Endpoint(src.into()));
        }
        let to = parse_endpoint(dst, level, "in_", "out_")?;
        Ok(Self { from, to })
    }

    /// `(source device, destination device)` when both ends are devices.
    pub fn device_pair(&self) -> Option<(usize, usize)> {
        Some((self.from.device()?, self.to.device()?))
    }

    /// Display names of both ends, for error messages.
    pub fn names(&self, level: GraphLevel) -> (String, String) {
        (source_name(self.from, level), dest_name(self.to, level))
    }
}

fn parse_hex(s: &str, width: usize) -> Option<usize> {
    if s.len() != width || !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return None;
    }
    usize::from_str_radix(s, 16).ok()
}

fn parse_port(s: &str, prefix: &str) -> Option<usize> {
    let port = parse_hex(s.strip_prefix(prefix)?, 2)?;
    (port < PORTS_MAX).then_some(port)
}

fn parse_endpoint(
    s: &str,
    level: GraphLevel,
    device_port: &str,
    iface_port: &str,
) -> Result<Endpoint, FormatError> {
    let bad = || FormatError::Endpoint(s.into());
    match s.split_once('/') {
        Some((device, port)) => {
            let index = device
                .strip_prefix(level.device_prefix())
                .and_then(|d| parse_hex(d, 2))
                .ok_or_else(bad)?;
            let port = parse_port(port, device_port).ok_or_else(bad)?;
            Ok(Endpoint::Device { index, port })
        }
        None => {
            let port = parse_port(s, iface_port).ok_or_else(bad)?;
            Ok(Endpoint::Interface { port })
        }
    }
}

/// Display name of a device, e.g. `au_03` or `proc_0a`.
pub fn device_name(index: usize, level: GraphLevel) -> String {
    format!("{}{:02x}", level.device_prefix(), index)
}

fn source_name(ep: Endpoint, level: GraphLevel) -> String {
    match ep {
        Endpoint::Device { index, port } => format!("{}/out_{:02x}", device_name(index, level), port),
        Endpoint::Interface { port } => format!("in_{:02x}", port),
    }
}

fn dest_name(ep: Endpoint, level: GraphLevel) -> String {
    match ep {
        Endpoint::Device { index, port } => format!("{}/in_{:02x}", device_name(index, level), port),
        Endpoint::Interface { port } => format!("out_{:02x}", port),
    }
}

/// Sort edges and drop duplicates.
pub fn merge_duplicates(edges: &mut Vec<Edge>) {
    edges.sort_unstable();
    edges.dedup();
}

/// Order devices for execution.
///
/// Devices are sorted by topological level (0 for devices without
/// incoming edges, otherwise one more than the highest source level), then
/// by index. Edges naming devices outside `devices` are ignored. A cycle
/// fails with the device path from the cycle entry back to itself.
pub fn execution_order(
    devices: &[usize],
    edges: &[(usize, usize)],
    level: GraphLevel,
) -> Result<Vec<usize>, FormatError> {
    let slot: BTreeMap<usize, usize> = devices.iter().enumerate().map(|(i, &d)| (d, i)).collect();
    let n = devices.len();
    let mut succ: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &(from, to) in edges {
        if let (Some(&a), Some(&b)) = (slot.get(&from), slot.get(&to)) {
            if !succ[a].contains(&b) {
                succ[a].push(b);
            }
        }
    }
    for s in &mut succ {
        s.sort_unstable();
    }

    if let Some(cycle) = find_cycle(&succ) {
        return Err(FormatError::GraphCycle {
            path: cycle.into_iter().map(|i| device_name(devices[i], level)).collect(),
        });
    }

    // Kahn's algorithm, propagating levels along edges.
    let mut in_degree = vec![0usize; n];
    for s in &succ {
        for &b in s {
            in_degree[b] += 1;
        }
    }
    let mut levels = vec![0usize; n];
    let mut queue: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    while let Some(i) = queue.pop() {
        for &b in &succ[i] {
            levels[b] = levels[b].max(levels[i] + 1);
            in_degree[b] -= 1;
            if in_degree[b] == 0 {
                queue.push(b);
            }
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| (levels[i], devices[i]));
    Ok(order.into_iter().map(|i| devices[i]).collect())
}

/// Iterative depth-first search for a back edge. Returns the cycle as slot
/// indices, first element repeated at the end.
fn find_cycle(succ: &[Vec<usize>]) -> Option<Vec<usize>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }
    let mut mark = vec![Mark::White; succ.len()];
    // (node, next successor position)
    let mut stack: Vec<(usize, usize)> = Vec::new();
    for root in 0..succ.len() {
        if mark[root] != Mark::White {
            continue;
        }
        mark[root] = Mark::Grey;
        stack.push((root, 0));
        while let Some(&mut (node, ref mut next)) = stack.last_mut() {
            if let Some(&b) = succ[node].get(*next) {
                *next += 1;
                match mark[b] {
                    Mark::White => {
                        mark[b] = Mark::Grey;
                        stack.push((b, 0));
                    }
                    Mark::Grey => {
                        let start = stack.iter().position(|&(n, _)| n == b).unwrap_or(0);
                        let mut path: Vec<usize> = stack[start..].iter().map(|&(n, _)| n).collect();
                        path.push(b);
                        return Some(path);
                    }
                    Mark::Black => {}
                }
            } else {
                mark[node] = Mark::Black;
                stack.pop();
            }
        }
    }
    None
}
