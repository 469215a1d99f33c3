use clap::{ArgGroup, Parser, Subcommand};
use patternbank::logging::init_logging;
use patternbank::ranking::DEFAULT_CLUSTER_THRESHOLD;
use patternbank::Reliability;

mod cli;

#[derive(Parser)]
#[command(name = "patternbank")]
#[command(version)]
#[command(about = "Pattern memory for AI agents")]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a .patternbank directory
    Init {
        /// Directory to initialize .patternbank in
        #[arg(short, long, default_value = ".")]
        path: String,
    },

    /// Learn a new pattern
    Add {
        /// Approach taken
        approach: String,

        /// Domain the pattern belongs to
        #[arg(short, long)]
        domain: String,

        /// Pattern type (experience, trajectory, distilled-pattern, best-practice, anti-pattern, ...)
        #[arg(short = 't', long = "type", default_value = "experience")]
        kind: String,

        /// Observed outcome
        #[arg(short, long)]
        outcome: Option<String>,

        /// Confidence (0-1)
        #[arg(short, long, default_value = "0.5")]
        confidence: f64,
    },

    /// Import pattern records from a directory of JSON/YAML files
    Import {
        /// Directory to scan
        dir: String,
    },

    /// Find patterns similar to a query
    Search {
        /// Query text
        query: String,

        /// Restrict to a domain
        #[arg(short, long)]
        domain: Option<String>,

        /// Maximum results
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Plain similarity ranking, no diversity re-ranking
        #[arg(long)]
        no_mmr: bool,

        /// MMR relevance weight (0 = max diversity, 1 = max relevance)
        #[arg(long)]
        lambda: Option<f64>,

        /// Minimum similarity to the query
        #[arg(short, long)]
        min_similarity: Option<f64>,

        /// Minimum backend confidence
        #[arg(long)]
        min_confidence: Option<f64>,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// List patterns in a domain, best quality first
    Domain {
        domain: String,

        #[arg(long)]
        min_quality: Option<f64>,

        /// high, medium, low or untested
        #[arg(long)]
        min_reliability: Option<Reliability>,

        #[arg(long)]
        min_usage: Option<u32>,

        #[arg(long)]
        json: bool,
    },

    /// Patterns that are used often but mostly fail
    AntiPatterns {
        domain: String,

        #[arg(long)]
        json: bool,
    },

    /// Proven, high-quality patterns
    BestPractices {
        domain: String,

        #[arg(long)]
        json: bool,
    },

    /// Group similar patterns in a domain
    Cluster {
        domain: String,

        /// Similarity needed to join a cluster
        #[arg(short, long, default_value_t = DEFAULT_CLUSTER_THRESHOLD)]
        threshold: f64,

        #[arg(long)]
        json: bool,
    },

    /// Record the outcome of applying a pattern
    #[command(group(ArgGroup::new("result").required(true).args(["success", "failure"])))]
    Outcome {
        /// Pattern ID
        id: String,

        #[arg(long)]
        success: bool,

        #[arg(long)]
        failure: bool,
    },

    /// List stored patterns, most recently used first
    List {
        /// Restrict to a domain
        #[arg(short, long)]
        domain: Option<String>,

        /// Maximum results
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Show a single pattern
    Show {
        /// Pattern ID
        id: String,
    },

    /// Forget a pattern
    Forget {
        /// Pattern ID
        id: String,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Show statistics
    Stats,

    /// View or set configuration
    Config {
        /// Config key
        key: Option<String>,

        /// Config value
        value: Option<String>,

        /// List available models
        #[arg(long)]
        list_models: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(if cli.verbose { "debug" } else { "warn" });

    let result = match cli.command {
        Commands::Init { path } => cli::patterns::run_init(&path),
        Commands::Add {
            approach,
            domain,
            kind,
            outcome,
            confidence,
        } => cli::patterns::run_add(&approach, &domain, &kind, outcome, confidence),
        Commands::Import { dir } => cli::patterns::run_import(&dir),
        Commands::Search {
            query,
            domain,
            limit,
            no_mmr,
            lambda,
            min_similarity,
            min_confidence,
            json,
        } => {
            let options = cli::patterns::search_options(
                domain,
                limit,
                no_mmr,
                lambda,
                min_similarity,
                min_confidence,
            );
            cli::patterns::run_search(&query, &options, json)
        }
        Commands::Domain {
            domain,
            min_quality,
            min_reliability,
            min_usage,
            json,
        } => cli::patterns::run_domain(&domain, min_quality, min_reliability, min_usage, json),
        Commands::AntiPatterns { domain, json } => cli::patterns::run_anti_patterns(&domain, json),
        Commands::BestPractices { domain, json } => {
            cli::patterns::run_best_practices(&domain, json)
        }
        Commands::Cluster {
            domain,
            threshold,
            json,
        } => cli::patterns::run_cluster(&domain, threshold, json),
        Commands::Outcome { id, success, .. } => cli::patterns::run_outcome(&id, success),
        Commands::List {
            domain,
            limit,
            json,
        } => cli::patterns::run_list(domain.as_deref(), limit, json),
        Commands::Show { id } => cli::patterns::run_show(&id),
        Commands::Forget { id, force } => cli::patterns::run_forget(&id, force),
        Commands::Stats => cli::patterns::run_stats(),
        Commands::Config {
            key,
            value,
            list_models,
        } => cli::config::run_config(key.as_deref(), value.as_deref(), list_models),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
