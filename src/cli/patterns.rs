use patternbank::bank::{NewPattern, PatternBank};
use patternbank::error::{Error, Result};
use patternbank::ranking::{cluster_patterns, summarize_cluster};
use patternbank::{DomainFilter, EnrichedPattern, PatternKind, PatternPayload, PatternRecord, Reliability, SearchOptions};
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;

const DAY_MS: i64 = 86_400_000;

/// Run the init command
pub fn run_init(path: &str) -> Result<()> {
    let path = Path::new(path);
    let bank_path = path.join(patternbank::config::BANK_DIR);

    if bank_path.exists() {
        return Err(Error::Config(format!(
            ".patternbank already exists at {}",
            bank_path.display()
        )));
    }

    let bank = PatternBank::init(path)?;
    println!("Initialized .patternbank at {}", bank.bank_path().display());

    Ok(())
}

/// Run the add command
pub fn run_add(
    approach: &str,
    domain: &str,
    kind: &str,
    outcome: Option<String>,
    confidence: f64,
) -> Result<()> {
    let bank = PatternBank::open()?;

    let id = bank.learn(NewPattern {
        domain: domain.to_string(),
        kind: PatternKind::from(kind),
        payload: PatternPayload {
            approach: Some(approach.to_string()),
            outcome,
            ..Default::default()
        },
        confidence,
    })?;

    println!("Learned [{}]", id);
    println!("  domain: {}  type: {}", domain, kind);

    Ok(())
}

/// Run the import command
pub fn run_import(dir: &str) -> Result<()> {
    let bank = PatternBank::open()?;
    let report = bank.import(Path::new(dir))?;

    println!(
        "Imported {} patterns from {} files",
        report.imported, report.files
    );
    for (path, reason) in &report.skipped {
        println!("  skipped {}: {}", path.display(), reason);
    }

    Ok(())
}

pub fn search_options(
    domain: Option<String>,
    limit: Option<usize>,
    no_mmr: bool,
    lambda: Option<f64>,
    min_similarity: Option<f64>,
    min_confidence: Option<f64>,
) -> SearchOptions {
    SearchOptions {
        k: limit,
        use_mmr: no_mmr.then_some(false),
        diversity_weight: lambda,
        min_similarity,
        max_patterns: None,
        domain,
        min_confidence,
    }
}

/// Run the search command
pub fn run_search(query: &str, options: &SearchOptions, json: bool) -> Result<()> {
    let bank = PatternBank::open()?;
    let results = bank.matcher().find_similar_patterns(query, options)?;

    if json {
        return print_json(&results);
    }

    if results.is_empty() {
        println!("No matching patterns.");
        return Ok(());
    }

    for p in &results {
        print_pattern(p, true);
    }

    Ok(())
}

/// Run the domain command
pub fn run_domain(
    domain: &str,
    min_quality: Option<f64>,
    min_reliability: Option<Reliability>,
    min_usage: Option<u32>,
    json: bool,
) -> Result<()> {
    let bank = PatternBank::open()?;
    let filter = DomainFilter {
        min_quality,
        min_reliability,
        min_usage,
        min_confidence: None,
    };
    let results = bank.matcher().find_by_domain(domain, &filter)?;

    print_listing(&results, &format!("No patterns in domain: {}", domain), json)
}

/// Run the anti-patterns command
pub fn run_anti_patterns(domain: &str, json: bool) -> Result<()> {
    let bank = PatternBank::open()?;
    let results = bank
        .matcher()
        .find_anti_patterns(domain, &DomainFilter::default())?;

    print_listing(&results, "No anti-patterns found.", json)
}

/// Run the best-practices command
pub fn run_best_practices(domain: &str, json: bool) -> Result<()> {
    let bank = PatternBank::open()?;
    let results = bank
        .matcher()
        .find_best_practices(domain, &DomainFilter::default())?;

    print_listing(&results, "No best practices yet.", json)
}

#[derive(Serialize)]
struct ClusterOutput<'a> {
    summary: patternbank::ranking::ClusterSummary,
    patterns: &'a [EnrichedPattern],
}

/// Run the cluster command
pub fn run_cluster(domain: &str, threshold: f64, json: bool) -> Result<()> {
    let bank = PatternBank::open()?;
    let patterns = bank
        .matcher()
        .find_by_domain(domain, &DomainFilter::default())?;
    let clusters = cluster_patterns(&patterns, threshold);

    let output: Vec<ClusterOutput> = clusters
        .iter()
        .filter_map(|c| {
            summarize_cluster(c).map(|summary| ClusterOutput {
                summary,
                patterns: c,
            })
        })
        .collect();

    if json {
        return print_json(&output);
    }

    if output.is_empty() {
        println!("No patterns in domain: {}", domain);
        return Ok(());
    }

    for (i, cluster) in output.iter().enumerate() {
        let s = &cluster.summary;
        println!(
            "Cluster {} ({} patterns, success {:.0}%, confidence {:.0}%)",
            i + 1,
            s.size,
            s.success_rate * 100.0,
            s.avg_confidence * 100.0
        );
        for p in cluster.patterns {
            println!("  [{}] {}", p.record.id, summary_line(&p.record));
        }
        println!();
    }

    Ok(())
}

/// Run the outcome command
pub fn run_outcome(id: &str, success: bool) -> Result<()> {
    let bank = PatternBank::open()?;
    let record = bank.record_outcome(id, success)?;

    println!(
        "Recorded {} for [{}] ({}/{} successful)",
        if success { "success" } else { "failure" },
        id,
        record.success_count,
        record.usage_count
    );

    Ok(())
}

/// Run the list command
pub fn run_list(domain: Option<&str>, limit: usize, json: bool) -> Result<()> {
    let bank = PatternBank::open()?;
    let now = patternbank::scoring::now_millis();
    let results: Vec<EnrichedPattern> = bank
        .list(domain, limit)?
        .into_iter()
        .map(|r| patternbank::scoring::enrich_pattern_at(r, now))
        .collect();

    print_listing(&results, "No patterns stored.", json)
}

/// Run the show command
pub fn run_show(id: &str) -> Result<()> {
    let bank = PatternBank::open()?;
    let record = bank
        .get(id)?
        .ok_or_else(|| Error::NotFound(id.to_string()))?;

    let mut enriched = patternbank::scoring::enrich_pattern(record);
    // The stored vector is noise on a terminal
    enriched.record.embedding = None;
    print_json(&enriched)
}

/// Run the forget command
pub fn run_forget(id: &str, force: bool) -> Result<()> {
    let bank = PatternBank::open()?;

    let record = bank
        .get(id)?
        .ok_or_else(|| Error::NotFound(id.to_string()))?;

    if !force {
        println!("Forget [{}]:", id);
        println!("  {}", summary_line(&record));

        print!("Confirm? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    bank.forget(id)?;
    println!("Forgotten [{}]", id);

    Ok(())
}

/// Run the stats command
pub fn run_stats() -> Result<()> {
    let bank = PatternBank::open()?;
    let stats = bank.stats()?;

    println!("Pattern Statistics");
    println!("==================\n");
    println!("Total patterns: {}", stats.total_patterns);
    println!("Avg confidence: {:.0}%", stats.avg_confidence * 100.0);
    if stats.total_usage > 0 {
        println!(
            "Success rate:   {:.0}% ({} of {} uses)",
            stats.total_successes as f64 / stats.total_usage as f64 * 100.0,
            stats.total_successes,
            stats.total_usage
        );
    }

    print_counts("By domain", &stats.by_domain);
    print_counts("By type", &stats.by_kind);

    Ok(())
}

// -----------------------------------------------------------------------------
// Output helpers
// -----------------------------------------------------------------------------

fn print_counts(title: &str, counts: &std::collections::HashMap<String, usize>) {
    if counts.is_empty() {
        return;
    }

    let mut sorted: Vec<_> = counts.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    println!("\n{}:", title);
    for (name, count) in sorted {
        println!("  {:24} {}", name, count);
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_listing(results: &[EnrichedPattern], empty: &str, json: bool) -> Result<()> {
    if json {
        return print_json(results);
    }

    if results.is_empty() {
        println!("{}", empty);
        return Ok(());
    }

    for p in results {
        print_pattern(p, false);
    }

    Ok(())
}

fn summary_line(record: &PatternRecord) -> String {
    let text = record
        .pattern
        .approach
        .clone()
        .unwrap_or_else(|| serde_json::to_string(&record.pattern).unwrap_or_default());
    text.chars().take(100).collect()
}

fn print_pattern(p: &EnrichedPattern, show_similarity: bool) {
    let r = &p.record;

    if show_similarity {
        println!("[{}] (similarity: {:.0}%)", r.id, r.similarity * 100.0);
    } else {
        println!("[{}]", r.id);
    }
    println!("  {}", summary_line(r));
    println!(
        "  {} / {} | quality {:.2} | {} | {}/{} successful | last used {}d ago",
        r.domain,
        r.kind,
        p.quality,
        p.reliability,
        r.success_count,
        r.usage_count,
        p.freshness.max(0) / DAY_MS
    );
    println!();
}
