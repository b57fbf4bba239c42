//! Dead-letter inspector: lists jobs that exhausted their retries, with
//! the recorded error and payload, and can push them back onto the queue
//! with a fresh attempt budget.
//!
//! Usage:
//!   cargo run --bin deadletters                       # list dead letters
//!   cargo run --bin deadletters -- --requeue <key>    # requeue one job
//!   cargo run --bin deadletters -- --requeue-all      # requeue everything

use anyhow::{Context, Result};
use gavel::config::Config;
use gavel::queue::JobQueue;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let config = if Path::new("gavel.toml").exists() {
        Config::load(Path::new("gavel.toml"))?
    } else {
        Config::from_env()
    };

    let client = redis::Client::open(config.redis.url.as_str())?;
    let conn = client
        .get_multiplexed_async_connection()
        .await
        .context("failed to connect to Redis")?;
    let queue = JobQueue::new(conn, &config.redis.prefix, config.queue.clone());

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--requeue-all") {
        let count = queue.requeue_all_dead().await?;
        println!("requeued {} dead-lettered job(s)", count);
        return Ok(());
    }

    if let Some(pos) = args.iter().position(|a| a == "--requeue") {
        let key = args
            .get(pos + 1)
            .context("--requeue requires a job key")?;
        if queue.requeue_dead(key).await? {
            println!("requeued {}", key);
        } else {
            println!("{} is not dead-lettered", key);
        }
        return Ok(());
    }

    let jobs = queue.dead_letters().await?;
    if jobs.is_empty() {
        println!("no dead-lettered jobs");
        return Ok(());
    }

    println!("{} dead-lettered job(s):\n", jobs.len());
    for job in jobs {
        println!("key:       {}", job.idempotency_key);
        println!("attempts:  {}", job.attempts);
        println!("enqueued:  {}", job.enqueued_at.to_rfc3339());
        println!(
            "error:     {}",
            job.last_error.as_deref().unwrap_or("(none recorded)")
        );
        println!(
            "payload:   {}\n",
            serde_json::to_string_pretty(&job.payload)?
        );
    }

    Ok(())
}
