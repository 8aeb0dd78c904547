use anyhow::Context;
use bazaar_engine::{run_simulation, EngineConfig, SimulationConfig};
use bazaar_model::{Candidate, CategoryId, Counters, Product, ProductId, UserId};
use bazaar_scoring::{ScoringContext, ScoringKernel, Strategy};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Command::new("bazaar-engine")
        .version(env!("CARGO_PKG_VERSION"))
        .about("ProductBazar recommendation and engagement engine")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .help("TOML configuration file; defaults apply when omitted"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Replay a seeded synthetic workload and check the engine's guarantees")
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("products")
                        .long("products")
                        .default_value("120")
                        .value_parser(value_parser!(usize))
                        .help("Catalog size"),
                )
                .arg(
                    Arg::new("users")
                        .long("users")
                        .default_value("40")
                        .value_parser(value_parser!(usize))
                        .help("Distinct users"),
                )
                .arg(
                    Arg::new("operations")
                        .long("operations")
                        .default_value("2000")
                        .value_parser(value_parser!(u64))
                        .help("Operations to replay"),
                ),
        )
        .subcommand(Command::new("config").about("Print the effective configuration as TOML"))
        .subcommand(
            Command::new("score")
                .about("Score a synthetic product under one strategy")
                .arg(
                    Arg::new("strategy")
                        .long("strategy")
                        .default_value("trending")
                        .help("Strategy name"),
                )
                .arg(
                    Arg::new("age")
                        .long("age")
                        .default_value("1")
                        .value_parser(value_parser!(i64))
                        .help("Age in days"),
                )
                .arg(
                    Arg::new("views")
                        .long("views")
                        .default_value("20")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("upvotes")
                        .long("upvotes")
                        .default_value("5")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("bookmarks")
                        .long("bookmarks")
                        .default_value("0")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("comments")
                        .long("comments")
                        .default_value("0")
                        .value_parser(value_parser!(u64)),
                ),
        );

    let matches = cli.get_matches();
    init_tracing(matches.get_flag("json"));
    let config = match matches.get_one::<String>("config") {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => EngineConfig::default(),
    };

    match matches.subcommand() {
        Some(("simulate", args)) => simulate(args, config).await,
        Some(("config", _)) => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Some(("score", args)) => score(args, &config),
        _ => {
            println!("bazaar-engine: use --help to list commands");
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn simulate(args: &ArgMatches, config: EngineConfig) -> anyhow::Result<()> {
    let defaults = SimulationConfig::default();
    let sim = SimulationConfig {
        seed: args.get_one::<u64>("seed").copied().unwrap_or(defaults.seed),
        products: args
            .get_one::<usize>("products")
            .copied()
            .unwrap_or(defaults.products),
        users: args.get_one::<usize>("users").copied().unwrap_or(defaults.users),
        operations: args
            .get_one::<u64>("operations")
            .copied()
            .unwrap_or(defaults.operations),
    };

    let report = run_simulation(sim, config).await?;
    println!("{}", report.generate_text());
    if !report.passed() {
        anyhow::bail!("{} guarantee(s) broken", report.violations.len());
    }
    Ok(())
}

fn score(args: &ArgMatches, config: &EngineConfig) -> anyhow::Result<()> {
    let name = args
        .get_one::<String>("strategy")
        .map_or("trending", String::as_str);
    let strategy: Strategy = name.parse()?;
    let age = args.get_one::<i64>("age").copied().unwrap_or(1);
    let count = |key: &str| args.get_one::<u64>(key).copied().unwrap_or(0);

    let now = Utc::now();
    let product = Product::new(
        ProductId::from("synthetic"),
        "synthetic",
        UserId::from("maker"),
        CategoryId::from("tools"),
    )
    .created_at(now - ChronoDuration::days(age));
    let mut candidate = Candidate::bare(product, age as f64);
    candidate.counters = Counters {
        upvote_count: count("upvotes"),
        bookmark_count: count("bookmarks"),
        view_count: count("views"),
        unique_viewer_count: count("views"),
        comment_count: count("comments"),
    };
    if age <= i64::from(config.fetch.recent_window_days) {
        candidate.recent.recent_views = count("views");
        candidate.recent.recent_upvotes = count("upvotes");
        candidate.recent.recent_bookmarks = count("bookmarks");
        candidate.recent.recent_comments = count("comments");
    }
    candidate.recent.window_days = config.fetch.recent_window_days;

    let kernel = ScoringKernel::new(config.scoring.clone());
    let detail = kernel.score(&candidate, &ScoringContext::new(strategy, now), &[]);
    println!("{}", serde_json::to_string_pretty(&detail)?);
    Ok(())
}
