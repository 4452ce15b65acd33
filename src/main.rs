use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;
use tracing::info;

use taxi_sim::{
    analyzer::OrderAnalyzer,
    export,
    model::{
        network::RoadNetwork,
        order::{snap_orders, OrderRecord, RawOrderRecord},
    },
    simulation::simulator::{Simulator, SimulatorConfig, VehiclePlacement},
    strategy::reposition::load_demand,
};

#[derive(Debug, Parser)]
#[command(about = "Discrete-event ride-hailing simulator")]
struct Args {
    /// Network node table (id,x,y).
    #[arg(long)]
    nodes: PathBuf,
    /// Network edge table (source,target,length,time).
    #[arg(long)]
    edges: PathBuf,
    /// Order table snapped to the network (id,pickup_node,dropoff_node,ot).
    #[arg(long, conflicts_with = "raw_orders")]
    orders: Option<PathBuf>,
    /// Raw order table with coordinates (id,stime,slon,slat,elon,elat).
    #[arg(long)]
    raw_orders: Option<PathBuf>,

    /// Fleet size; taxis start at random nodes.
    #[arg(long, default_value_t = 10)]
    taxis: u32,
    /// Simulation start, in seconds from midnight.
    #[arg(long, default_value_t = 0)]
    start_time: i64,
    /// Tick size in seconds.
    #[arg(long, default_value_t = 60)]
    time_window: i64,
    /// Number of ticks to run.
    #[arg(long, default_value_t = 1440)]
    steps: u64,
    /// Order matching: random, nearest or batch.
    #[arg(long, default_value = "nearest")]
    match_strategy: String,
    /// Idle-vehicle repositioning: random, cluster, demand or balanced.
    #[arg(long, default_value = "random")]
    reposition_strategy: String,
    /// Seconds a waiting order survives before cancellation.
    #[arg(long, default_value_t = 300)]
    waiting_threshold: i64,
    /// Longest pickup leg accepted by nearest matching, in seconds.
    #[arg(long, default_value_t = 300)]
    max_pickup_time: i64,
    /// Travel-time budget for repositioning targets, in seconds.
    #[arg(long, default_value_t = 60)]
    max_reposition_time: i64,
    /// RNG seed; identical seeds replay identical runs.
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Historical pickup counts (node,count) for the demand policy.
    #[arg(long)]
    demand: Option<PathBuf>,

    /// Write orders_history.json under the output directory.
    #[arg(long)]
    export_orders: bool,
    /// Write fleet_history.json under the output directory.
    #[arg(long)]
    export_fleet: bool,
    #[arg(long, default_value = "results")]
    out_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let network = RoadNetwork::from_csv(&args.nodes, &args.edges)?;
    let records = match (&args.orders, &args.raw_orders) {
        (Some(path), _) => OrderRecord::read(path)?,
        (None, Some(path)) => snap_orders(RawOrderRecord::read(path)?, &network),
        (None, None) => bail!("either --orders or --raw-orders is required"),
    };

    let config = SimulatorConfig {
        taxi_count: args.taxis,
        start_time: args.start_time,
        time_window: args.time_window,
        match_strategy: args.match_strategy.parse()?,
        reposition_strategy: args.reposition_strategy.parse()?,
        waiting_threshold: args.waiting_threshold,
        max_pickup_time: args.max_pickup_time,
        max_reposition_time: args.max_reposition_time,
        export_orders: args.export_orders,
        export_fleet: args.export_fleet,
        seed: args.seed,
    };

    let mut simulator = Simulator::new(config, network, records, VehiclePlacement::Random)?;
    if let Some(path) = &args.demand {
        simulator = simulator.with_historical_demand(load_demand(path)?);
    }

    simulator.run(args.steps);

    let orders = simulator.export_orders();
    if simulator.config().export_orders {
        let path = args.out_dir.join("orders_history.json");
        export::write_json(&path, &orders)?;
        info!("order export written to {}", path.display());
    }
    if simulator.config().export_fleet {
        let generated_time = chrono::Local::now().to_rfc3339();
        let fleet = simulator.export_fleet(&generated_time);
        let path = args.out_dir.join("fleet_history.json");
        export::write_json(&path, &fleet)?;
        info!("fleet export written to {}", path.display());
    }

    println!("{}", OrderAnalyzer::new(&orders).report());
    Ok(())
}
