//! density_history - print persisted density samples for one camera.

use anyhow::Result;
use clap::Parser;

use crowd_kernel::{config::validate_camera_id, SqliteAuditLog, SqliteMetricStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Density database path.
    #[arg(long, env = "CROWD_DB_PATH", default_value = "crowd.db")]
    db_path: String,
    /// Camera whose samples to print.
    #[arg(long)]
    camera_id: String,
    /// Maximum samples to print (newest first).
    #[arg(long, default_value_t = 100)]
    limit: usize,
    /// Print samples from the last N minutes instead (oldest first).
    #[arg(long)]
    minutes: Option<u32>,
    /// Emit JSON instead of a table.
    #[arg(long)]
    json: bool,
    /// Also verify the audit hash chain.
    #[arg(long)]
    verify_audit: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    validate_camera_id(&args.camera_id)?;

    let store = SqliteMetricStore::open(&args.db_path)?;
    let records = match args.minutes {
        Some(minutes) => store.find_recent_by_camera(&args.camera_id, minutes)?,
        None => store.find_by_camera(&args.camera_id, args.limit)?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        println!(
            "{:>15}  {:>6}  {:>7}  {}",
            "timestamp_ms", "people", "density", "alert"
        );
        for record in &records {
            println!(
                "{:>15}  {:>6}  {:>7.3}  {}",
                record.timestamp_ms,
                record.person_count,
                record.density_value,
                if record.alert_triggered { "ALERT" } else { "-" }
            );
        }
        println!("{} samples for camera {}", records.len(), args.camera_id);
    }

    if args.verify_audit {
        let count = SqliteAuditLog::open(&args.db_path)?.verify_chain()?;
        eprintln!("audit chain OK ({} records)", count);
    }
    Ok(())
}
