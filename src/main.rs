use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::Parser;
use log::info;
use shardpart::algorithms::{DistributedPartitioner, RoundStats};
use shardpart::comm::{Communicator, LocalTopology};
use shardpart::config::{ConvergenceScope, InitialPartition, PartitionConfig};
use shardpart::io::{read_graph_shard, write_partition_file};
use shardpart::metrics;
use shardpart::{NodeId, PartitionId};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path of the METIS graph file
    graph_filepath: PathBuf,

    /// Number of partitions
    num_of_partitions: usize,

    /// Filename where the partition mapping can be stored
    partition_file: PathBuf,

    /// Allowed imbalance in percent
    #[arg(short = 'b', long, default_value_t = 3.0)]
    imbalance: f64,

    /// Number of processes to run
    #[arg(short, long, default_value_t = 4)]
    processes: usize,

    /// Maximum number of label propagation rounds
    #[arg(short, long, default_value_t = 10)]
    label_iterations: usize,

    /// Total communication wave budget, split over the processes
    #[arg(short, long, default_value_t = 128)]
    comm_rounds: usize,

    /// Stop once fewer than this fraction of vertices move, scaled by 1/k
    #[arg(short, long, default_value_t = 0.01)]
    stop_factor: f64,

    /// Seed of the per-process tie-break streams
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Judge convergence over all processes or per process
    #[arg(long, value_enum, default_value = "global")]
    convergence: ScopeArg,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ScopeArg {
    Global,
    Local,
}

struct RankReport {
    labels: Vec<(NodeId, PartitionId)>,
    stats: RoundStats,
    edge_cut: u64,
    balance: f64,
    partition_time: Duration,
}

fn run_rank(
    config: PartitionConfig,
    path: &Path,
    comm: impl Communicator,
) -> Result<RankReport, String> {
    let mut graph = read_graph_shard(path, &comm).map_err(|err| err.to_string())?;
    if comm.rank() == 0 {
        info!("graph loaded: {}", graph.report_memory_usage());
    }
    let (boundary, internal) = metrics::edge_locality(&graph, &comm);
    if comm.rank() == 0 && boundary + internal > 0 {
        info!(
            "edge locality: {} of {} adjacency entries cross shards",
            boundary,
            boundary + internal,
        );
    }
    let mut partitioner =
        DistributedPartitioner::new(config, &comm).map_err(|err| err.to_string())?;
    let start = Instant::now();
    let stats = partitioner
        .perform_partitioning(&mut graph, &comm)
        .map_err(|err| err.to_string())?;
    let partition_time = start.elapsed();
    if comm.rank() == 0 {
        info!(
            "{} rounds, {} total moves, converged: {}",
            stats.rounds, stats.total_moved, stats.converged,
        );
    }
    let edge_cut = metrics::edge_cut(&graph, &comm);
    let balance = metrics::balance(config.k, &graph, &comm);
    Ok(RankReport {
        labels: graph.labeled_vertices().collect(),
        stats,
        edge_cut,
        balance,
        partition_time,
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    if args.processes == 0 {
        return Err("at least one process is required".into());
    }
    let config = PartitionConfig {
        k: args.num_of_partitions,
        epsilon: args.imbalance / 100.0,
        // The command line carries group-wide budgets; each process gets its
        // share, like an mpirun-style launcher would hand out.
        comm_rounds: (args.comm_rounds / args.processes).max(1),
        stop_factor: args.stop_factor / (args.num_of_partitions.max(1) as f64),
        label_iterations: args.label_iterations,
        seed: args.seed,
        initial_partition: InitialPartition::RangeSplit,
        convergence: match args.convergence {
            ScopeArg::Global => ConvergenceScope::Global,
            ScopeArg::Local => ConvergenceScope::Local,
        },
    };
    let start = Instant::now();
    let results = LocalTopology::run(args.processes, |comm| {
        run_rank(config, &args.graph_filepath, comm)
    });
    let elapsed_time = start.elapsed();
    let reports: Vec<RankReport> = results.into_iter().collect::<Result<_, String>>()?;
    let pairs: Vec<(NodeId, PartitionId)> = reports
        .iter()
        .flat_map(|report| report.labels.iter().copied())
        .collect();
    write_partition_file(pairs, &args.partition_file)?;
    let lead = &reports[0];
    println!("Edge cut {:?}", lead.edge_cut);
    println!("Balance {:?}", lead.balance);
    println!("Rounds {:?}", lead.stats.rounds);
    println!("Partitioning time {:?}", lead.partition_time);
    println!("Execution time {:?}", elapsed_time);
    Ok(())
}
