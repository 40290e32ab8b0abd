//! OpenFEMA CLI
//!
//! Command-line interface for retrieving OpenFEMA datasets as JSON.

use clap::{Parser, Subcommand};
use openfema_client::planner::format_duration;
use openfema_client::{
    ClientConfig, DatasetCatalog, FilterSpec, OpenFemaClient, Prompt, RetrievalError,
    RetrievalPlan, RetrievalRequest, StaticCatalog,
};
use std::io::{BufRead, Write};
use tracing_subscriber::EnvFilter;

/// Exit status when the user declines a retrieval.
const EXIT_DECLINED: i32 = 2;

#[derive(Parser)]
#[command(name = "openfema")]
#[command(version, about = "OpenFEMA data retrieval CLI", long_about = None)]
struct Cli {
    /// API base URL (overrides OPENFEMA_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Rows per call, at most 1000 (overrides OPENFEMA_PAGE_SIZE)
    #[arg(long, global = true)]
    page_size: Option<u32>,

    /// Refresh dataset versions and date fields from the live metadata endpoints
    #[arg(long, global = true)]
    refresh: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve records from a dataset
    Query {
        /// Dataset name, e.g. FimaNfipClaims
        dataset: String,

        /// Comma-separated fields to return
        #[arg(short, long, value_delimiter = ',')]
        select: Vec<String>,

        /// Predicate as FIELD:PREDICATE, e.g. "yearOfLoss:>= 2010". Repeatable.
        #[arg(short, long = "filter", value_name = "FIELD:PREDICATE")]
        filters: Vec<String>,

        /// Return at most this many records
        #[arg(short, long)]
        top: Option<u64>,

        /// Do not ask before fetching more than one page
        #[arg(short, long)]
        yes: bool,

        /// Write JSON to this file instead of stdout
        #[arg(short, long)]
        output: Option<std::path::PathBuf>,
    },

    /// List datasets
    Datasets {
        /// Query the live listing instead of the built-in catalog
        #[arg(short, long)]
        remote: bool,
    },

    /// Show the fields of a dataset
    Fields {
        /// Dataset name
        dataset: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = run(cli).await;

    if let Err(e) = result {
        if let Some(RetrievalError::Aborted { .. }) = e.downcast_ref::<RetrievalError>() {
            eprintln!("Retrieval cancelled.");
            std::process::exit(EXIT_DECLINED);
        }
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(page_size) = cli.page_size {
        config.page_size = page_size;
    }
    tracing::debug!(
        base_url = %config.base_url,
        page_size = config.page_size,
        max_retries = config.max_retries,
        "Client configured"
    );
    let client = OpenFemaClient::new(config)?;

    let mut catalog = if cli.refresh {
        client.refreshed_catalog().await?
    } else {
        StaticCatalog::builtin()
    };

    match cli.command {
        Commands::Query {
            dataset,
            select,
            filters,
            top,
            yes,
            output,
        } => {
            if cli.refresh {
                let entry = catalog.resolve_dataset_id(&dataset)?.clone();
                let fields = client.data_set_fields(&entry.name, entry.version).await?;
                catalog.add_date_fields(&entry.name, &fields)?;
            }
            let mut request = RetrievalRequest::new(dataset)
                .filters(parse_filters(&filters)?)
                .ask_before_call(!yes);
            if !select.is_empty() {
                request = request.select(select);
            }
            if let Some(top) = top {
                request = request.top_n(top);
            }
            query(&client, catalog, &request, output.as_deref()).await
        }
        Commands::Datasets { remote } => list_datasets(&client, &catalog, remote).await,
        Commands::Fields { dataset } => show_fields(&client, &catalog, &dataset).await,
    }
}

async fn query(
    client: &OpenFemaClient,
    catalog: StaticCatalog,
    request: &RetrievalRequest,
    output: Option<&std::path::Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut prompt = ConsolePrompt;
    let table = client
        .retriever(catalog)
        .retrieve(request, &mut prompt)
        .await?;

    eprintln!(
        "Retrieved {} records, {} columns",
        format_number(table.len() as u64),
        table.columns().len()
    );

    match output {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            let mut writer = std::io::BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &table)?;
            writer.flush()?;
            eprintln!("Wrote {}", path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            serde_json::to_writer_pretty(&mut handle, &table)?;
            writeln!(handle)?;
        }
    }

    Ok(())
}

async fn list_datasets(
    client: &OpenFemaClient,
    catalog: &StaticCatalog,
    remote: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !remote {
        for name in catalog.names() {
            if let Some(entry) = catalog.lookup(name) {
                println!("{:<50} v{}", entry.name, entry.version);
            }
        }
        return Ok(());
    }

    let mut data_sets = client.list_data_sets().await?;
    data_sets.sort_by(|a, b| a.name.cmp(&b.name).then(a.version.cmp(&b.version)));

    if data_sets.is_empty() {
        println!("No datasets found.");
        return Ok(());
    }

    println!("{:<50} {:<4} {:<12} TITLE", "NAME", "VER", "REFRESHED");
    println!("{}", "-".repeat(100));
    for ds in &data_sets {
        let refreshed = ds
            .last_refresh
            .map(|ts| ts.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<50} {:<4} {:<12} {}",
            ds.name,
            ds.version,
            refreshed,
            ds.title.as_deref().unwrap_or("")
        );
    }
    println!("\nTotal: {} dataset(s)", data_sets.len());

    Ok(())
}

async fn show_fields(
    client: &OpenFemaClient,
    catalog: &StaticCatalog,
    dataset: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let entry = catalog.resolve_dataset_id(dataset)?;
    let fields = client.data_set_fields(&entry.name, entry.version).await?;

    println!("Dataset: {} (v{})", entry.name, entry.version);
    println!("Identifier: {}", entry.identifier);
    println!();

    if fields.is_empty() {
        println!("No field metadata published.");
        return Ok(());
    }

    for field in &fields {
        let key = if field.primary_key == Some(true) {
            " [key]"
        } else {
            ""
        };
        println!("  {:<40} {:<10}{}", field.name, field.field_type, key);
        if let Some(ref title) = field.title {
            println!("      {}", title);
        }
    }

    Ok(())
}

/// Group `FIELD:PREDICATE` arguments into a filter, keeping argument order.
fn parse_filters(args: &[String]) -> Result<FilterSpec, Box<dyn std::error::Error>> {
    let mut spec = FilterSpec::new();
    for arg in args {
        let (field, predicate) = arg
            .split_once(':')
            .ok_or_else(|| format!("filter '{}' must look like FIELD:PREDICATE", arg))?;
        spec.push(field.trim(), [predicate.trim()]);
    }
    Ok(spec)
}

/// Confirms on stdin and reports on stderr so stdout stays clean JSON.
struct ConsolePrompt;

impl Prompt for ConsolePrompt {
    fn confirm(&mut self, plan: &RetrievalPlan) -> bool {
        eprintln!(
            "This query matches {} records and needs {} calls of up to {} rows.",
            format_number(plan.total_records),
            format_number(plan.page_count),
            plan.page_size
        );
        eprintln!(
            "Estimated time: {} (best effort, based on current network conditions).",
            format_duration(plan.estimated_duration)
        );
        eprint!("Continue? [y/N] ");
        let _ = std::io::stderr().flush();

        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }

    fn estimate(&mut self, remaining: &RetrievalPlan) {
        eprintln!(
            "Remaining {} calls should take about {}.",
            format_number(remaining.page_count),
            format_duration(remaining.estimated_duration)
        );
    }

    fn progress(&mut self, page: u64, page_count: u64) {
        eprint!("\rFetched page {}/{}", page + 1, page_count);
        if page + 1 == page_count {
            eprintln!();
        }
        let _ = std::io::stderr().flush();
    }
}

fn format_number(n: u64) -> String {
    let mut digits = n.to_string();
    let mut parts = Vec::new();

    while digits.len() > 3 {
        let chunk = digits.split_off(digits.len() - 3);
        parts.push(chunk);
    }
    parts.push(digits);
    parts.reverse();

    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(2_565_000), "2,565,000");
    }

    #[test]
    fn test_parse_filters_groups_by_field() {
        let args = vec![
            "countyCode:= 01001".to_string(),
            "yearOfLoss:>= 2010".to_string(),
            "yearOfLoss:<= 2020".to_string(),
        ];
        let spec = parse_filters(&args).unwrap();
        assert_eq!(spec.len(), 2);
        assert_eq!(
            spec.to_odata().unwrap().as_deref(),
            Some("countyCode eq '01001' and (yearOfLoss ge 2010 and yearOfLoss le 2020)")
        );
    }

    #[test]
    fn test_parse_filters_rejects_missing_separator() {
        assert!(parse_filters(&["yearOfLoss".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_query() {
        let cli = Cli::try_parse_from([
            "openfema",
            "query",
            "FimaNfipClaims",
            "--select",
            "countyCode,yearOfLoss",
            "--filter",
            "state:TX",
            "--top",
            "10",
            "--yes",
        ])
        .unwrap();

        match cli.command {
            Commands::Query {
                dataset,
                select,
                filters,
                top,
                yes,
                output,
            } => {
                assert_eq!(dataset, "FimaNfipClaims");
                assert_eq!(select, vec!["countyCode", "yearOfLoss"]);
                assert_eq!(filters, vec!["state:TX"]);
                assert_eq!(top, Some(10));
                assert!(yes);
                assert!(output.is_none());
            }
            _ => panic!("expected query command"),
        }
    }
}
