use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::str::FromStr;

use crate::comm::Communicator;
use crate::graph::{DistributedGraph, GraphBuilder};
use crate::{NodeId, PartitionId};

/// Failures while reading a graph file.
#[derive(Debug)]
pub enum GraphReadError {
    Io(io::Error),

    /// 1-based line number and what was wrong with it.
    Parse { line: usize, detail: &'static str },

    /// The declared structure could not be assembled into a shard.
    Graph(crate::Error),
}

impl fmt::Display for GraphReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphReadError::Io(err) => write!(f, "cannot read graph file: {err}"),
            GraphReadError::Parse { line, detail } => {
                write!(f, "graph file line {line}: {detail}")
            }
            GraphReadError::Graph(err) => {
                write!(f, "graph file declares an invalid shard: {err}")
            }
        }
    }
}

impl std::error::Error for GraphReadError {}

impl From<io::Error> for GraphReadError {
    fn from(err: io::Error) -> Self {
        GraphReadError::Io(err)
    }
}

impl From<crate::Error> for GraphReadError {
    fn from(err: crate::Error) -> Self {
        GraphReadError::Graph(err)
    }
}

/// Reads this process's shard of a graph in METIS adjacency format.
///
/// The header is `vertices edges [fmt]` with fmt 0 (plain), 1 (edge
/// weights), 10 (vertex weights) or 11 (both); `%` lines are comments and
/// adjacency lines are 1-indexed, one per vertex. Every process scans and
/// validates the whole stream but materializes only its own global-id
/// range, so a malformed file fails identically on every process.
pub fn read_graph_shard(
    path: &Path,
    comm: &impl Communicator,
) -> Result<DistributedGraph, GraphReadError> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();
    let mut line_no = 0;

    let header = loop {
        let line = match lines.next() {
            Some(line) => line?,
            None => {
                return Err(GraphReadError::Parse {
                    line: line_no,
                    detail: "missing header line",
                })
            }
        };
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        break line;
    };
    let mut fields = header.split_whitespace();
    let vertices: NodeId = parse_field(fields.next(), line_no)?;
    let _edges: u64 = parse_field(fields.next(), line_no)?;
    let format: u32 = match fields.next() {
        Some(token) => token.parse().map_err(|_| GraphReadError::Parse {
            line: line_no,
            detail: "malformed integer",
        })?,
        None => 0,
    };
    if fields.next().is_some() {
        return Err(GraphReadError::Parse {
            line: line_no,
            detail: "unsupported extra header field",
        });
    }
    let (vertex_weights, edge_weights) = match format {
        0 => (false, false),
        1 => (false, true),
        10 => (true, false),
        11 => (true, true),
        _ => {
            return Err(GraphReadError::Parse {
                line: line_no,
                detail: "unsupported format code",
            })
        }
    };

    let mut builder = GraphBuilder::new(vertices, comm);
    let range = builder.local_range();
    let mut vertex: NodeId = 0;
    for line in lines {
        let line = line?;
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.starts_with('%') {
            continue;
        }
        if vertex >= vertices {
            if trimmed.is_empty() {
                continue;
            }
            return Err(GraphReadError::Parse {
                line: line_no,
                detail: "more adjacency lines than vertices",
            });
        }
        let local = range.contains(&vertex);
        let mut tokens = trimmed.split_whitespace();
        if vertex_weights {
            let weight: u64 = parse_field(tokens.next(), line_no)?;
            if local {
                builder.set_vertex_weight(vertex, weight)?;
            }
        }
        while let Some(token) = tokens.next() {
            let neighbor: NodeId = token.parse().map_err(|_| GraphReadError::Parse {
                line: line_no,
                detail: "malformed integer",
            })?;
            if neighbor == 0 || neighbor > vertices {
                return Err(GraphReadError::Parse {
                    line: line_no,
                    detail: "neighbor index out of range",
                });
            }
            let weight = if edge_weights {
                parse_field(tokens.next(), line_no)?
            } else {
                1
            };
            if local {
                builder.add_edge(vertex, neighbor - 1, weight)?;
            }
        }
        vertex += 1;
    }
    if vertex < vertices {
        return Err(GraphReadError::Parse {
            line: line_no,
            detail: "fewer adjacency lines than vertices",
        });
    }
    Ok(builder.finish(comm)?)
}

fn parse_field<T: FromStr>(token: Option<&str>, line: usize) -> Result<T, GraphReadError> {
    token
        .ok_or(GraphReadError::Parse {
            line,
            detail: "missing field",
        })?
        .parse()
        .map_err(|_| GraphReadError::Parse {
            line,
            detail: "malformed integer",
        })
}

/// Writes one label per line in the iteration order of `pairs`, the format
/// downstream tools read a partition vector back from.
pub fn write_partition_file<I>(pairs: I, path: &Path) -> io::Result<()>
where
    I: IntoIterator<Item = (NodeId, PartitionId)>,
{
    let mut file = File::create(path)?;
    for (_id, label) in pairs {
        writeln!(file, "{label}")?;
    }
    Ok(())
}
