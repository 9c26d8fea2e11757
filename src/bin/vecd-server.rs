use log::info;
use std::path::PathBuf;
use stderrlog;
use structopt::StructOpt;
use vecd::protocol::QueueNames;
use vecd::server::VectorServer;
use vecd::thread_pool::SharedQueueThreadPool;
use vecd::{Result, VectorStore};

#[derive(StructOpt)]
#[structopt(name = "vecd-server")]
struct Args {
    #[structopt(long = "dir", parse(from_os_str))]
    dir: Option<PathBuf>,
    #[structopt(long = "threads")]
    threads: Option<u32>,
}

fn main() -> Result<()> {
    let args = Args::from_args();

    stderrlog::new()
        .module(module_path!())
        .module("vecd")
        .verbosity(3)
        .init()?;

    let dir = args.dir.unwrap_or_else(|| PathBuf::from("vectors"));
    let threads = args.threads.unwrap_or(20);

    info!("Version {}", env!("CARGO_PKG_VERSION"));
    info!("Store directory: {}", dir.display());
    info!("Worker threads: {}", threads);

    let store = VectorStore::open(&dir)?;
    let server: VectorServer<SharedQueueThreadPool> = VectorServer::new(store, threads)?;
    server.watch_stdin();
    server.run(&QueueNames::default())
}
