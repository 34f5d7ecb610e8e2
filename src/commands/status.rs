use anyhow::Result;

use placecrawl_core::AppConfig;
use placecrawl_storage::Storage;

pub async fn run(config: AppConfig) -> Result<()> {
    let storage = Storage::new(&config.database.url).await?;

    match storage.check_connectivity().await {
        Ok(()) => println!("Database: connected"),
        Err(e) => {
            println!("Database: ERROR - {e}");
            return Ok(());
        }
    }

    storage.run_migrations().await?;

    let venues = storage.count_venues().await?;
    let pages = storage.count_pages().await?;
    let enriched = storage.count_enriched().await?;
    let depth = storage.queue_depth().await?;

    println!("\nVenues:            {venues}");
    println!("Scraped pages:     {pages}");
    println!("Enriched venues:   {enriched}");
    println!("\nQueue:");
    for state in ["pending", "running", "success", "fail"] {
        println!("  {:<10} {}", state, depth.get(state).copied().unwrap_or(0));
    }

    let failures = storage.recent_failures(10).await?;
    if !failures.is_empty() {
        println!("\nRecent failures:");
        for job in failures {
            println!(
                "  #{} {} ({}): {}",
                job.job_id,
                job.place_id,
                job.mode.as_str(),
                job.error.as_deref().unwrap_or("-")
            );
        }
    }

    Ok(())
}
