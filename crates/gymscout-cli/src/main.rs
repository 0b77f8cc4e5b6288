use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use gymscout_core::{average_rating, RawRecord};
use gymscout_storage::{AirtableClient, AirtableConfig, HttpClientConfig};
use gymscout_web::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "gymscout")]
#[command(about = "Gym Scout API server and Airtable inspection tools")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve,
    /// List the gym table's column names
    Fields,
    /// Show each gym's primary video url
    Videos,
    /// Show rating columns for gyms whose name contains any of the fragments
    Ratings { names: Vec<String> },
    /// Show the waitlist table's columns and an example row
    Waitlist,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,gymscout=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => gymscout_web::serve_from_env().await?,
        Commands::Fields => {
            let records = airtable(&config)?.try_fetch_records(&config.gyms_table).await?;
            let Some(first) = records.first() else {
                bail!("no records found in {}", config.gyms_table);
            };
            println!("All field names:");
            for name in sorted_field_names(first) {
                println!("  - {name}");
            }
            println!("Video-related fields:");
            for name in video_fields(first) {
                let value = first
                    .field(&name)
                    .plain_text()
                    .unwrap_or_else(|| "empty".to_string());
                println!("  {name}: {value}");
            }
        }
        Commands::Videos => {
            let records = airtable(&config)?.try_fetch_records(&config.gyms_table).await?;
            for record in &records {
                let name = record.gym_name().unwrap_or_else(|| "Unknown".to_string());
                let url = record
                    .field("Primary Video URL")
                    .plain_text()
                    .unwrap_or_else(|| "NO URL".to_string());
                println!("{name}: {url}");
            }
        }
        Commands::Ratings { names } => {
            let records = airtable(&config)?.try_fetch_records(&config.gyms_table).await?;
            println!("Found {} gyms.", records.len());
            for record in records.iter().filter(|r| matches_any(r, &names)) {
                println!("\nName: {}", record.gym_name().unwrap_or_default());
                for (name, value) in rating_fields(record) {
                    println!("  {name}: {value}");
                }
                println!("  computed rating: {}", average_rating(record));
            }
        }
        Commands::Waitlist => {
            let records = airtable(&config)?
                .try_fetch_records(&config.waitlist_table)
                .await?;
            let Some(first) = records.first() else {
                bail!("no records found in {}", config.waitlist_table);
            };
            println!("Found {} waitlist entries.", records.len());
            println!("Field names: {}", sorted_field_names(first).join(", "));
            println!("Example record: {}", serde_json_fields(first));
        }
    }

    Ok(())
}

fn airtable(config: &AppConfig) -> Result<AirtableClient> {
    let (Some(key), Some(base)) = (&config.airtable_api_key, &config.airtable_base_id) else {
        bail!("AIRTABLE_API_KEY and AIRTABLE_BASE_ID must be set");
    };
    let airtable_config =
        AirtableConfig::new(key.clone(), base.clone()).with_api_url(&config.airtable_api_url);
    AirtableClient::new(airtable_config, &HttpClientConfig::default())
}

fn sorted_field_names(record: &RawRecord) -> Vec<String> {
    // BTreeMap keys are already ordered.
    record.fields.keys().cloned().collect()
}

fn video_fields(record: &RawRecord) -> Vec<String> {
    record
        .fields
        .keys()
        .filter(|name| name.to_lowercase().contains("video"))
        .cloned()
        .collect()
}

fn rating_fields(record: &RawRecord) -> Vec<(String, String)> {
    record
        .fields
        .iter()
        .filter(|(name, _)| name.contains("Stars") || name.contains("Rating"))
        .map(|(name, value)| {
            let text = value
                .plain_text()
                .unwrap_or_else(|| "(not a scalar)".to_string());
            (name.clone(), text)
        })
        .collect()
}

fn matches_any(record: &RawRecord, fragments: &[String]) -> bool {
    if fragments.is_empty() {
        return true;
    }
    let name = record.gym_name().unwrap_or_default();
    fragments.iter().any(|fragment| name.contains(fragment.as_str()))
}

fn serde_json_fields(record: &RawRecord) -> String {
    serde_json::to_string_pretty(&record.fields).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> RawRecord {
        RawRecord::from_json_fields(
            "recA",
            json!({
                "Gym Name": "Kiatsongkrit Gym",
                "Primary Video URL": "https://youtu.be/abc",
                "Overall Rating": 4.5,
                "Trainer Stars": 5,
                "Location": "Chiang Mai"
            }),
        )
    }

    #[test]
    fn picks_video_and_rating_columns() {
        let record = record();
        assert_eq!(video_fields(&record), vec!["Primary Video URL".to_string()]);
        assert_eq!(
            rating_fields(&record),
            vec![
                ("Overall Rating".to_string(), "4.5".to_string()),
                ("Trainer Stars".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    fn name_filter_matches_fragments() {
        let record = record();
        assert!(matches_any(&record, &[]));
        assert!(matches_any(&record, &["Pinsinchai".into(), "Kiatsongkrit".into()]));
        assert!(!matches_any(&record, &["Kiatphontip".into()]));
    }
}
