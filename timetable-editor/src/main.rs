mod config;
mod display;
mod error;
mod form;
mod parser;
mod schedule;
mod session;
mod web;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use config::ServerConfig;
use display::{print_day_grid, print_workload};
use form::{read_workbook_from_path, write_template};
use parser::load_subjects_from_path;
use schedule::{find_conflicts, reconcile_workload};
use session::day_name;

const USAGE: &str = "\
Usage:
  timetable-editor web [port]
  timetable-editor template <out.csv> [class tier...]
  timetable-editor check <master.csv> <timetable.zip>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(config::log_filter())
        .with_target(true)
        .init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("web") => {
            let port = args.get(2).and_then(|p| p.parse::<u16>().ok());
            let config = ServerConfig::from_env(port);
            println!("Access the editor at http://localhost:{}", config.port);
            web::start_server(config).await?;
        }
        Some("template") => {
            let out = args.get(2).context(USAGE)?;
            let tiers = &args[3..];
            write_template(out, tiers).with_context(|| format!("writing {}", out))?;
            println!("Template written to {}", out);
        }
        Some("check") => {
            let (master, workbook) = match (args.get(2), args.get(3)) {
                (Some(master), Some(workbook)) => (master, workbook),
                _ => anyhow::bail!(USAGE),
            };
            check(master, workbook)?;
        }
        _ => println!("{}", USAGE),
    }

    Ok(())
}

/// Prints every day of an exported timetable with its double-bookings,
/// then the workload of each teacher in the master data
fn check(master: &str, workbook: &str) -> anyhow::Result<()> {
    let options = ServerConfig::from_env(None).upload;
    let data = load_subjects_from_path(master, options)
        .with_context(|| format!("loading {}", master))?;
    info!(
        subjects = data.subjects.len(),
        classes = data.classes.len(),
        "loaded master data"
    );

    let days = read_workbook_from_path(workbook)
        .with_context(|| format!("reading {}", workbook))?;
    if days.is_empty() {
        println!("No day sheets found in {}", workbook);
    }

    let mut total_conflicts = 0;
    for (day, grid) in &days {
        let conflicts = find_conflicts(grid);
        total_conflicts += conflicts.len();
        print_day_grid(day_name(*day), grid, &conflicts);
    }

    let report = reconcile_workload(&data.subjects, days.iter().map(|(_, grid)| grid));
    print_workload(&report);
    println!("{} double-booked cell(s) across the week", total_conflicts);
    Ok(())
}
