//! keyspace - publish, subscribe, and query from the command line.
//!
//! ```text
//! keyspace -e tcp/127.0.0.1:7447 put -k /demo/greeting hello
//! keyspace sub -k '/demo/**'
//! keyspace get -k '/demo/**' --consolidation none
//! keyspace queryable -k /demo/answer 42
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use keyspace::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "keyspace", version, about = "Talk to a Keyspace router")]
struct Args {
    /// Router endpoint(s), tried in order; overrides the config file
    #[arg(short = 'e', long = "connect", global = true)]
    connect: Vec<String>,

    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Peer id as hex (random if unset)
    #[arg(long, global = true)]
    zid: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish one value
    Put {
        #[arg(short, long, default_value = "/demo/example/put")]
        key: String,
        value: String,
        /// Publish a deletion instead of a value
        #[arg(long)]
        delete: bool,
    },
    /// Print every sample matching a pattern until Ctrl-C
    Sub {
        #[arg(short = 'k', long = "key", default_value = "/demo/**")]
        pattern: String,
        #[arg(long)]
        reliable: bool,
        /// Pull mode: ask the router for held data every N milliseconds
        #[arg(long, value_name = "MS")]
        pull_every: Option<u64>,
    },
    /// Query a pattern and print the replies
    Get {
        #[arg(short = 'k', long = "key", default_value = "/demo/**")]
        pattern: String,
        #[arg(short, long, default_value = "")]
        predicate: String,
        #[arg(long, value_enum, default_value_t = Consolidation::Full)]
        consolidation: Consolidation,
        #[arg(long, value_enum, default_value_t = Target::BestMatching)]
        target: Target,
        /// Timeout in milliseconds (config default if unset)
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Answer queries on a key with a fixed value until Ctrl-C
    Queryable {
        #[arg(short, long, default_value = "/demo/example/eval")]
        key: String,
        value: String,
        /// Announce as a storage instead of an evaluator
        #[arg(long)]
        storage: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Consolidation {
    None,
    Lazy,
    Full,
}

impl From<Consolidation> for ConsolidationMode {
    fn from(c: Consolidation) -> Self {
        match c {
            Consolidation::None => ConsolidationMode::None,
            Consolidation::Lazy => ConsolidationMode::Lazy,
            Consolidation::Full => ConsolidationMode::Full,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Target {
    BestMatching,
    All,
    AllComplete,
}

impl From<Target> for QueryTarget {
    fn from(t: Target) -> Self {
        match t {
            Target::BestMatching => QueryTarget::BestMatching,
            Target::All => QueryTarget::All,
            Target::AllComplete => QueryTarget::AllComplete,
        }
    }
}

fn load_config(args: &Args) -> Result<Config, KeyspaceError> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if !args.connect.is_empty() {
        config.connect = args.connect.clone();
    }
    if args.zid.is_some() {
        config.zid = args.zid.clone();
    }
    Ok(config)
}

async fn run(args: Args) -> Result<(), KeyspaceError> {
    let config = load_config(&args)?;
    let session = keyspace::connect(config).await?;
    let info = session.info();
    tracing::info!(peer = %info.peer_id, router = %info.router_id, "connected");

    match args.command {
        Command::Put { key, value, delete } => {
            if delete {
                session.delete(&key).await?;
            } else {
                session.put_with(&key, value, Encoding::TEXT_PLAIN).await?;
            }
        }
        Command::Sub {
            pattern,
            reliable,
            pull_every,
        } => {
            let mut info = if reliable {
                SubInfo::reliable()
            } else {
                SubInfo::default()
            };
            if pull_every.is_some() {
                info = info.pull();
            }
            let sub = session
                .subscribe_with(&pattern, info, |sample| println!("{sample}"))
                .await?;
            match pull_every {
                Some(ms) => {
                    let mut tick = tokio::time::interval(Duration::from_millis(ms));
                    loop {
                        tokio::select! {
                            _ = tick.tick() => sub.pull().await?,
                            _ = tokio::signal::ctrl_c() => break,
                        }
                    }
                }
                None => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
            sub.undeclare().await?;
        }
        Command::Get {
            pattern,
            predicate,
            consolidation,
            target,
            timeout,
        } => {
            let options = QueryOptions {
                predicate,
                target: target.into(),
                consolidation: consolidation.into(),
                timeout: timeout.map(Duration::from_millis),
                expected_replies: None,
            };
            let count = session
                .query_with(&pattern, options, |reply| println!("{}", reply.sample))
                .await?;
            tracing::info!(count, "query finished");
        }
        Command::Queryable {
            key,
            value,
            storage,
        } => {
            let kind = if storage {
                QueryableKind::Storage
            } else {
                QueryableKind::Eval
            };
            let answer_key = key.clone();
            let queryable = session
                .declare_queryable(&key, kind, move |query| {
                    tracing::info!(key = %query.key, predicate = %query.predicate, "query");
                    vec![Sample::new(answer_key.clone(), value.clone())]
                })
                .await?;
            let _ = tokio::signal::ctrl_c().await;
            queryable.undeclare().await?;
        }
    }

    session.close().await
}

#[tokio::main]
async fn main() {
    keyspace::init_logger();
    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "keyspace failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
