use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use studio_analytics::aggregate::{self, GroupBy, GroupFilters};
use studio_analytics::changes::ChangeDetector;
use studio_analytics::ingest;
use studio_analytics::insights::InsightEngine;
use studio_analytics::models::SessionRecord;
use studio_analytics::report::{self, ReportInput};
use studio_analytics::{AnalyticsConfig, CancellationToken};

#[derive(Parser)]
#[command(name = "studio-analytics")]
#[command(about = "Class attendance analytics for studio schedules", long_about = None)]
struct Cli {
    /// TOML file overriding analytics defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose tracing on stderr
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank grouped class metrics
    Metrics {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value = "class-slot")]
        group_by: GroupBy,
        #[arg(long)]
        min_checkins: Option<u64>,
        #[arg(long)]
        min_classes: Option<usize>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Detect trainer, class, time and level changes in recurring slots
    Changes {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        as_of: Option<NaiveDate>,
        /// Follow each class through its weekday timeline with the coarser time threshold
        #[arg(long)]
        timeline: bool,
        #[arg(long)]
        json: bool,
    },
    /// Flag recent sessions that break from their class history
    Anomalies {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Generate ranked scheduling recommendations
    Recommend {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        as_of: Option<NaiveDate>,
        /// Only report on sessions held at this location
        #[arg(long)]
        location: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_sessions(csv: &Path) -> anyhow::Result<Vec<SessionRecord>> {
    ingest::read_sessions(csv)
        .with_context(|| format!("failed to read sessions from {}", csv.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = match &cli.config {
        Some(path) => AnalyticsConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => AnalyticsConfig::default(),
    };
    let cancel = CancellationToken::new();
    let today = Utc::now().date_naive();

    match cli.command {
        Commands::Metrics {
            csv,
            group_by,
            min_checkins,
            min_classes,
            limit,
            json,
        } => {
            let sessions = load_sessions(&csv)?;
            let filters = GroupFilters {
                min_checkins: min_checkins.or(config.min_checkins),
                min_classes: min_classes.or(config.min_classes),
            };
            let ranked = aggregate::aggregate(&sessions, group_by, filters, &cancel)?;

            if json {
                return print_json(&ranked);
            }
            if ranked.is_empty() {
                println!("No groups matched these filters.");
                return Ok(());
            }

            println!("Top groups by composite score ({group_by}):");
            for entry in ranked.iter().take(limit) {
                println!(
                    "{:>3}. {} score {:.2} | avg {:.1} | fill {:.1}% | cancel {:.1}% | {} sessions",
                    entry.rank,
                    entry.key,
                    entry.composite_score,
                    entry.class_avg,
                    entry.fill_rate,
                    entry.cancellation_rate,
                    entry.session_count
                );
            }
        }
        Commands::Changes {
            csv,
            as_of,
            timeline,
            json,
        } => {
            let sessions = load_sessions(&csv)?;
            let detector = if timeline {
                ChangeDetector::timeline(&config)
            } else {
                ChangeDetector::slot_scan(&config)
            };
            let events = detector.detect(&sessions, as_of.unwrap_or(today), &cancel)?;

            if json {
                return print_json(&events);
            }
            if events.is_empty() {
                println!("No changes detected in active slots.");
                return Ok(());
            }

            for event in &events {
                println!(
                    "- {} {} change in {}: {} -> {} ({:+.1} attendees, confidence {})",
                    event.occurred_on,
                    event.change_type.label(),
                    event.slot,
                    event.before_value,
                    event.after_value,
                    event.attendance_impact,
                    event
                        .confidence_score
                        .map_or_else(|| "n/a".to_string(), |c| format!("{c:.0}"))
                );
            }
        }
        Commands::Anomalies { csv, json } => {
            let sessions = load_sessions(&csv)?;
            let anomalies = InsightEngine::new(&config).detect_anomalies(&sessions, &cancel)?;

            if json {
                return print_json(&anomalies);
            }
            if anomalies.is_empty() {
                println!("No anomalies in recent sessions.");
                return Ok(());
            }

            for anomaly in &anomalies {
                println!(
                    "- {:?} {} on {}: {} vs expected {:.1} (z {:.2}){}",
                    anomaly.severity,
                    anomaly.group,
                    anomaly.date,
                    anomaly.actual_value,
                    anomaly.expected_value,
                    anomaly.z_score,
                    if anomaly.related_factors.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", anomaly.related_factors.join(", "))
                    }
                );
            }
        }
        Commands::Recommend { csv, json } => {
            let sessions = load_sessions(&csv)?;
            let recommendations =
                InsightEngine::new(&config).generate_recommendations(&sessions, &cancel)?;

            if json {
                return print_json(&recommendations);
            }
            if recommendations.is_empty() {
                println!("No recommendations for these sessions.");
                return Ok(());
            }

            for rec in &recommendations {
                println!(
                    "- [{:?}] {} ({}): {}",
                    rec.priority, rec.title, rec.target, rec.action_required
                );
            }
        }
        Commands::Report {
            csv,
            as_of,
            location,
            out,
        } => {
            let mut sessions = load_sessions(&csv)?;
            if let Some(location) = &location {
                sessions.retain(|s| s.location.eq_ignore_ascii_case(location.trim()));
                if sessions.is_empty() {
                    anyhow::bail!("no sessions recorded at {location}");
                }
            }
            let as_of = as_of.unwrap_or(today);
            let engine = InsightEngine::new(&config);
            let filters = GroupFilters {
                min_checkins: config.min_checkins,
                min_classes: config.min_classes,
            };

            let metrics = aggregate::aggregate(&sessions, GroupBy::Class, filters, &cancel)?;
            let changes = ChangeDetector::slot_scan(&config).detect(&sessions, as_of, &cancel)?;
            let anomalies = engine.detect_anomalies(&sessions, &cancel)?;
            let recommendations = engine.generate_recommendations(&sessions, &cancel)?;

            let report = report::build_report(&ReportInput {
                scope: location.as_deref(),
                as_of,
                metrics: &metrics,
                changes: &changes,
                anomalies: &anomalies,
                recommendations: &recommendations,
            });
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
