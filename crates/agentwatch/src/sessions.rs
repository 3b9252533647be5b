use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use agentwatch_sessions::{
    AdapterEvent, EventStore, Outcome, SessionSummary, SummaryFilter, SummaryStats,
};

#[derive(Subcommand, Debug)]
pub enum SessionsAction {
    /// List sealed sessions
    List {
        /// Filter by agent (claude-code, codex)
        #[arg(long)]
        agent: Option<String>,

        /// Filter by outcome (success, failure, partial, unknown)
        #[arg(long)]
        outcome: Option<String>,

        /// Show sessions after this date (YYYY-MM-DD)
        #[arg(long)]
        after: Option<String>,

        /// Show sessions before this date (YYYY-MM-DD)
        #[arg(long)]
        before: Option<String>,

        /// Filter by project name
        #[arg(long)]
        project: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one session's summary
    Show {
        /// Session ID
        id: String,

        /// Also print the session's event log
        #[arg(long)]
        events: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Mark a session as analyzed
    Mark {
        /// Session ID
        id: String,

        /// Number of events reviewed (default: the whole log)
        #[arg(long)]
        events: Option<usize>,
    },

    /// Show aggregate statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn handle_sessions_command(action: SessionsAction, store: &EventStore) -> Result<()> {
    match action {
        SessionsAction::List {
            agent,
            outcome,
            after,
            before,
            project,
            json,
        } => {
            let filter = build_filter(agent, outcome, after, before, project)?;
            let summaries = store.list_summaries(&filter)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else if summaries.is_empty() {
                println!("{}", "No sessions found.".dimmed());
            } else {
                print_sessions_table(&summaries);
            }
        }
        SessionsAction::Show { id, events, json } => {
            let Some(summary) = store.load_summary(&id) else {
                anyhow::bail!("No summary for session {}", id);
            };
            let log = if events {
                store.read_events(&id)?
            } else {
                Vec::new()
            };

            if json {
                let value = serde_json::json!({ "summary": summary, "events": log });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                print_session_detail(&summary);
                if events {
                    print_events(&log);
                }
            }
        }
        SessionsAction::Mark { id, events } => {
            let reviewed = match events {
                Some(n) => n,
                None => store.read_events(&id)?.len(),
            };
            match store.mark_analyzed(&id, reviewed)? {
                Some(_) => println!(
                    "{} {} ({} events reviewed)",
                    "Marked".bright_green(),
                    id,
                    reviewed
                ),
                None => anyhow::bail!("No summary for session {}", id),
            }
        }
        SessionsAction::Stats { json } => {
            let stats = store.stats(&SummaryFilter::default())?;

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
    }

    Ok(())
}

fn build_filter(
    agent: Option<String>,
    outcome: Option<String>,
    after: Option<String>,
    before: Option<String>,
    project: Option<String>,
) -> Result<SummaryFilter> {
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};

    let parse_day = |flag: &str, value: &str, hms: (u32, u32, u32)| -> Result<DateTime<Utc>> {
        let (h, m, sec) = hms;
        let day = NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map_err(|e| anyhow::anyhow!("Invalid --{} date: {}", flag, e))?;
        let at = day
            .and_hms_opt(h, m, sec)
            .ok_or_else(|| anyhow::anyhow!("Invalid --{} date: {}", flag, value))?;
        Ok(Utc.from_utc_datetime(&at))
    };

    let after = after
        .map(|s| parse_day("after", &s, (0, 0, 0)))
        .transpose()?;
    let before = before
        .map(|s| parse_day("before", &s, (23, 59, 59)))
        .transpose()?;

    let outcome = outcome
        .map(|s| s.parse::<Outcome>().map_err(|e| anyhow::anyhow!(e)))
        .transpose()?;

    Ok(SummaryFilter {
        agent,
        outcome,
        after,
        before,
        project,
    })
}

/// Pads before coloring so escape codes don't break column alignment.
fn colored_outcome(outcome: Outcome, width: usize) -> String {
    let text = format!("{:<width$}", outcome.to_string(), width = width);
    match outcome {
        Outcome::Success => text.bright_green().to_string(),
        Outcome::Failure => text.bright_red().to_string(),
        Outcome::Partial => text.bright_yellow().to_string(),
        Outcome::Unknown => text.dimmed().to_string(),
    }
}

fn preview(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

fn print_sessions_table(summaries: &[SessionSummary]) {
    println!(
        "{:<17} {:<12} {:<9} {:<8} {:<5} {:<16} {}",
        "STARTED".dimmed(),
        "AGENT".dimmed(),
        "OUTCOME".dimmed(),
        "DURATION".dimmed(),
        "INTV".dimmed(),
        "PROJECT".dimmed(),
        "PROMPT".dimmed(),
    );

    for s in summaries {
        println!(
            "{:<17} {:<12} {} {:<8} {:<5} {:<16} {}",
            s.started_at.format("%Y-%m-%d %H:%M").to_string(),
            s.agent,
            colored_outcome(s.outcome, 9),
            format_duration(s.duration_secs()),
            s.interventions,
            preview(&s.project_name(), 16),
            preview(&s.prompt, 50)
        );
    }
}

fn print_session_detail(summary: &SessionSummary) {
    println!("{}", "=== Session Detail ===".bright_blue().bold());
    println!("{}  {}", "ID:".dimmed(), summary.id);
    println!("{}  {}", "Agent:".dimmed(), summary.agent);
    if let Some(ref cwd) = summary.project_cwd {
        println!("{}  {}", "Project:".dimmed(), cwd.display());
    }
    println!(
        "{}  {}",
        "Started:".dimmed(),
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "{}  {}",
        "Duration:".dimmed(),
        format_duration(summary.duration_secs())
    );
    println!("{}  {}", "Outcome:".dimmed(), colored_outcome(summary.outcome, 0));
    println!("{}  {}", "Interventions:".dimmed(), summary.interventions);
    println!(
        "{}  {}",
        "Analyzed:".dimmed(),
        match summary.reviewed_event_count {
            Some(n) if summary.analyzed => format!("yes ({} events)", n),
            _ if summary.analyzed => "yes".to_string(),
            _ => "no".to_string(),
        }
    );

    if !summary.prompt.is_empty() {
        println!();
        println!("{}", "Prompt:".dimmed());
        println!("  {}", summary.prompt);
    }

    if !summary.files_changed.is_empty() {
        println!();
        println!(
            "{}",
            format!("--- Files ({}) ---", summary.files_changed.len()).dimmed()
        );
        for file in &summary.files_changed {
            println!("  {}", file);
        }
    }
}

fn print_events(events: &[AdapterEvent]) {
    println!();
    println!("{}", format!("--- Events ({}) ---", events.len()).dimmed());
    for event in events {
        let ts = event.timestamp().format("%H:%M:%S");
        let detail = match event {
            AdapterEvent::SessionStart { prompt, .. } => {
                prompt.as_deref().map(|p| preview(p, 60)).unwrap_or_default()
            }
            AdapterEvent::SessionEnd { .. } => String::new(),
            AdapterEvent::FileEdit {
                path,
                lines_added,
                lines_removed,
                ..
            } => format!(
                "{} {} {}",
                path,
                format!("+{}", lines_added).bright_green(),
                format!("-{}", lines_removed).bright_red()
            ),
            AdapterEvent::CommandRun {
                command, exit_code, ..
            } => {
                let code = if *exit_code == 0 {
                    "OK".bright_green().to_string()
                } else {
                    format!("ERR({})", exit_code).bright_red().to_string()
                };
                format!("{} {}", code, preview(command, 60))
            }
            AdapterEvent::TestResult {
                framework,
                passed,
                failed,
                skipped,
                ..
            } => format!(
                "{}: {} passed, {} failed, {} skipped",
                framework, passed, failed, skipped
            ),
            AdapterEvent::UserIntervention { signal, detail, .. } => format!(
                "{} {}",
                signal.to_string().bright_yellow(),
                detail.as_deref().map(|d| preview(d, 60)).unwrap_or_default()
            ),
        };
        println!("  {} {:<18} {}", ts, event.kind().bright_blue(), detail);
    }
}

fn print_stats(stats: &SummaryStats) {
    println!("{}", "=== Session Statistics ===".bright_blue().bold());
    println!("{}  {}", "Total Sessions:".dimmed(), stats.total_sessions);
    println!(
        "{}  {} success, {} failure, {} partial, {} unknown",
        "Outcomes:".dimmed(),
        stats.success,
        stats.failure,
        stats.partial,
        stats.unknown
    );
    println!(
        "{}  {:.1}%",
        "Success Rate:".dimmed(),
        stats.success_rate * 100.0
    );
    println!(
        "{}  {}",
        "Interventions:".dimmed(),
        stats.total_interventions
    );
    println!(
        "{}  {}",
        "Avg Duration:".dimmed(),
        format_duration(stats.avg_duration_secs)
    );

    if !stats.by_project.is_empty() {
        println!();
        println!("{}", "By Project:".dimmed());
        for p in &stats.by_project {
            println!(
                "  {:<20} {} sessions, {} interventions",
                p.project, p.total, p.interventions
            );
        }
    }
}

pub fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.0}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor() as u64;
        let remaining_secs = (secs % 60.0) as u64;
        format!("{}m {}s", mins, remaining_secs)
    } else {
        let hours = (secs / 3600.0).floor() as u64;
        let mins = ((secs % 3600.0) / 60.0) as u64;
        format!("{}h {}m", hours, mins)
    }
}
