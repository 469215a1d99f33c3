use patternbank::config::{
    find_bank_path, resolve_model, server_socket, BankConfig, CONFIG_KEYS, DEFAULT_MODEL,
    SUGGESTED_MODELS,
};
use patternbank::error::{Error, Result};

/// Run the config command
pub fn run_config(key: Option<&str>, value: Option<&str>, list_models: bool) -> Result<()> {
    if list_models {
        print_models();
        return Ok(());
    }

    let bank_path = find_bank_path().ok_or(Error::NoBank)?;
    let mut config = BankConfig::new(bank_path);

    match (key, value) {
        (None, None) => {
            println!("Current configuration:\n");

            let matcher = config.matcher_config();
            println!("  k: {}", matcher.k);
            println!("  use_mmr: {}", matcher.use_mmr);
            println!("  diversity_weight: {}", matcher.diversity_weight);
            println!("  min_similarity: {}", matcher.min_similarity);
            println!("  max_patterns: {}", matcher.max_patterns);

            let model = config.embedding_model();
            let (model_name, model_type) = resolve_model(&model);
            println!("  embedding_model: {}", model);
            if model_name != model {
                println!("    -> {}", model_name);
            }
            println!("    type: {}", model_type);
            if model_type != "lite" {
                println!("    socket: {}", server_socket().display());
            }

            for (k, v) in config.entries().filter(|(k, _)| !CONFIG_KEYS.contains(k)) {
                println!("  {}: {}", k, v);
            }
        }
        (Some(k), None) => match config.get(k) {
            Some(v) => println!("{}: {}", k, v),
            None => println!("{}: (not set)", k),
        },
        (Some(k), Some(v)) => {
            let k = if k == "model" { "embedding_model" } else { k };

            if !CONFIG_KEYS.contains(&k) {
                tracing::warn!(key = k, "unknown config key, storing anyway");
            }

            if k == "embedding_model" {
                let (model_name, model_type) = resolve_model(v);
                if model_type == "lite" {
                    println!("Setting model to lite (n-gram hashing)");
                } else {
                    println!("Setting model to: {}", model_name);
                    println!("  type: {}", model_type);
                    println!("\nNote: patterns embedded with another model should be re-imported.");
                }
            }

            config.set(k, v)?;
            println!("Set {} = {}", k, v);
        }
        (None, Some(_)) => {
            return Err(Error::Config(
                "Key required when setting a value".to_string(),
            ));
        }
    }

    Ok(())
}

fn print_models() {
    let current = find_bank_path()
        .map(|p| BankConfig::new(p).embedding_model())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    println!("Available embedding models:\n");
    println!("{:2} {:12} {:10} Description", "", "Alias", "Size");
    println!("{}", "-".repeat(60));

    for model in SUGGESTED_MODELS {
        let marker = if model.alias == current || model.name == current {
            " *"
        } else {
            "  "
        };

        println!(
            "{} {:12} {:10} {}",
            marker, model.alias, model.size, model.description
        );
    }

    println!("\n* = currently configured");
    println!("\nSet model with: patternbank config model <alias>");
}
