use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use projmetrics::metrics::reconcile;
use projmetrics::{
    BudgetAnalysis, CombinedMetrics, Constraint, Dashboard, Database, MonthReference,
    RawPerformanceMetrics, YearMonth,
};

#[derive(Parser)]
#[command(name = "projmetrics", version, about = "Project accounting metrics over a local SQLite store")]
struct Cli {
    /// Path to the database file
    #[arg(long)]
    db: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Evaluate as of this date (YYYY-MM-DD) instead of today
    #[arg(long, global = true)]
    as_of: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show store status
    Status,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manage the month reference table
    Months {
        #[command(subcommand)]
        action: MonthsAction,
    },
    /// Working, worked and remaining business days for a month
    WorkingDays { year: i32, month: u32 },
    /// Actuals, projected and possible metrics for a date range
    Metrics {
        /// Range start (YYYY-MM-DD)
        #[arg(long)]
        start: String,
        /// Range end (YYYY-MM-DD)
        #[arg(long)]
        end: String,
        /// Restrict to one project, grouping by employee
        #[arg(long, conflicts_with = "employee")]
        project: Option<String>,
        /// Restrict to one employee, grouping by project
        #[arg(long)]
        employee: Option<String>,
        /// Merge actuals and projected into one timeline
        #[arg(long)]
        combined: bool,
        #[arg(long)]
        json: bool,
    },
    /// Merge a metrics JSON file's actuals and projected into one timeline
    Combine {
        /// File holding {"actuals": .., "projected": ..} keyed by "Month YYYY"
        #[arg(long)]
        input: String,
    },
    /// Employee utilization for a month
    Utilization {
        /// Month (YYYY-MM); defaults to the current month
        #[arg(long)]
        month: Option<String>,
        /// Billable utilization report with year-to-date totals
        #[arg(long)]
        report: bool,
        #[arg(long)]
        json: bool,
    },
    /// Budget health of a project
    Budget {
        project_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Month-by-month burn plan of a project
    Burn {
        project_id: String,
        #[arg(long)]
        json: bool,
    },
    /// List projects
    Projects {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

#[derive(Subcommand)]
enum MonthsAction {
    /// List month reference rows
    List {
        #[arg(long)]
        year: Option<i32>,
    },
    /// Set the business days of a month
    Set {
        year: i32,
        month: u32,
        #[arg(long)]
        working_days: u32,
        #[arg(long, default_value_t = 0)]
        holidays: u32,
    },
    /// Create calculated rows for every missing month of a year
    Generate {
        year: i32,
        /// Copy holiday counts from the same month of the previous year
        #[arg(long)]
        copy_holidays: bool,
    },
}

fn parse_month_arg(s: &str) -> anyhow::Result<YearMonth> {
    let date = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("Invalid month '{s}', expected YYYY-MM"))?;
    Ok(YearMonth::of(date))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => Database::open_at(path).await?,
        None => Database::open().await?,
    };
    let mut dashboard = Dashboard::open_configured(db).await?;
    if let Some(as_of) = &cli.as_of {
        dashboard = dashboard.with_as_of(projmetrics::date_util::parse_iso_date(as_of)?);
    }

    match cli.command {
        Commands::Status => print_status(&dashboard).await?,
        Commands::Config { action } => handle_config(&dashboard, action).await?,
        Commands::Months { action } => handle_months(&dashboard, action).await?,
        Commands::WorkingDays { year, month } => {
            let days = dashboard.working_days(year, month).await?;
            println!("{}", YearMonth::new(year, month)?);
            println!("  Working:   {}", days.working_days);
            println!("  Worked:    {}", days.worked_days);
            println!("  Remaining: {}", days.remaining_days);
        }
        Commands::Metrics {
            start,
            end,
            project,
            employee,
            combined,
            json,
        } => {
            let start = projmetrics::date_util::parse_iso_date(&start)?;
            let end = projmetrics::date_util::parse_iso_date(&end)?;
            let constraint = match (project, employee) {
                (Some(id), _) => Some(Constraint::Project(id)),
                (None, Some(id)) => Some(Constraint::Employee(id)),
                (None, None) => None,
            };
            if combined {
                let view = dashboard.combined_metrics(start, end, constraint.as_ref()).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&view)?);
                } else {
                    print_combined(&view);
                }
            } else {
                let metrics = dashboard.performance_metrics(start, end, constraint.as_ref()).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&*metrics)?);
                } else {
                    print_metrics(&metrics);
                }
            }
        }
        Commands::Combine { input } => {
            let text = std::fs::read_to_string(&input)?;
            let raw: RawPerformanceMetrics = serde_json::from_str(&text)?;
            let metrics = raw.into_keyed();
            let months = match (
                metrics.actuals.keys().chain(metrics.projected.keys()).min(),
                metrics.actuals.keys().chain(metrics.projected.keys()).max(),
            ) {
                (Some(first), Some(last)) => {
                    dashboard.month_table(first.first_day(), last.last_day()).await?
                }
                _ => Default::default(),
            };
            let view = reconcile::combine_actual_projected(
                &metrics.actuals,
                &metrics.projected,
                &months,
                Some(dashboard.today()),
            );
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Commands::Utilization {
            month,
            report,
            json,
        } => {
            let month = month.as_deref().map(parse_month_arg).transpose()?;
            if report {
                let rows = dashboard.utilization_report(month).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                } else if rows.is_empty() {
                    println!("No billable employees.");
                } else {
                    for r in &rows {
                        println!(
                            "{:<24} {:>7.1}h / {:>7.1}h  {:>6.1}%  {:?}  (YTD {:.1}%)",
                            r.name,
                            r.billable_hours,
                            r.possible_hours,
                            r.utilization_pct,
                            r.status,
                            r.ytd.utilization_pct,
                        );
                    }
                }
            } else {
                let rows = dashboard.employee_utilization(month).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                } else if rows.is_empty() {
                    println!("No employees.");
                } else {
                    for r in &rows {
                        println!(
                            "{:<24} {:>7.1}h of {:>7.1}h  util {:>6.1}%  billable {:>6.1}%  revenue ${:.2}",
                            r.name,
                            r.total_hours,
                            r.expected_hours,
                            r.utilization_rate,
                            r.billable_utilization,
                            r.revenue_generated,
                        );
                    }
                }
            }
        }
        Commands::Budget { project_id, json } => {
            let analysis = dashboard.budget_status(&project_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
            } else {
                print_budget(&analysis);
            }
        }
        Commands::Burn { project_id, json } => {
            let plan = dashboard.burn_plan(&project_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else if plan.employees.is_empty() {
                println!("No allocations for {project_id}.");
            } else {
                for emp in &plan.employees {
                    println!("{}", emp.employee_id);
                    for m in &emp.months {
                        println!(
                            "  {:<16} fte {:>5.2}  actual {:>7.1}h  projected {:>7.1}h  total {:>7.1}h  ${:.2}{}",
                            m.month.to_string(),
                            m.allocated_fte,
                            m.actual_hours,
                            m.projected_hours,
                            m.total_hours,
                            m.total_cost,
                            if m.days_customized { "  *" } else { "" },
                        );
                    }
                }
                println!("Total: {:.1}h  ${:.2}", plan.total_hours, plan.total_cost);
            }
        }
        Commands::Projects { json } => {
            let projects = dashboard.list_projects().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&projects)?);
            } else if projects.is_empty() {
                println!("No projects.");
            } else {
                for p in &projects {
                    println!("{:<16} {}", p.id, p.name);
                }
            }
        }
    }

    Ok(())
}

async fn print_status(dashboard: &Dashboard) -> anyhow::Result<()> {
    let counts = dashboard.status().await?;
    println!("Store Status");
    println!("  Projects:     {}", counts.projects);
    println!("  Employees:    {}", counts.employees);
    println!("  Allocations:  {}", counts.allocations);
    println!("  Time entries: {}", counts.time_entries);
    println!("  Months:       {}", counts.months);
    Ok(())
}

async fn handle_config(dashboard: &Dashboard, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match dashboard.config_get(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            dashboard.config_set(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = dashboard.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}

async fn handle_months(dashboard: &Dashboard, action: MonthsAction) -> anyhow::Result<()> {
    match action {
        MonthsAction::List { year } => {
            let rows = dashboard.list_months(year).await?;
            if rows.is_empty() {
                println!("No month reference rows.");
            }
            for r in rows {
                println!(
                    "{:<16} {:>2} working  {:>2} holidays",
                    YearMonth::new(r.year, r.month)?.to_string(),
                    r.working_days,
                    r.holidays,
                );
            }
        }
        MonthsAction::Set {
            year,
            month,
            working_days,
            holidays,
        } => {
            dashboard
                .set_month_reference(MonthReference {
                    year,
                    month,
                    working_days,
                    holidays,
                })
                .await?;
            println!("Month updated.");
        }
        MonthsAction::Generate { year, copy_holidays } => {
            let created = dashboard.generate_year(year, copy_holidays).await?;
            println!("Created {created} month rows for {year}.");
        }
    }
    Ok(())
}

fn print_metrics(metrics: &projmetrics::PerformanceMetrics) {
    if metrics.is_empty() {
        println!("No metrics for this range.");
        return;
    }
    for (title, map) in [
        ("Actuals", &metrics.actuals),
        ("Projected", &metrics.projected),
        ("Possible", &metrics.possible),
    ] {
        println!("{title}");
        for (month, entities) in map {
            println!("  {month}");
            for (id, e) in entities {
                println!(
                    "    {:<20} {:>8.1}h  ${:>11.2}  {:>2}d",
                    id, e.hours, e.revenue, e.worked_days
                );
            }
        }
    }
}

fn print_combined(view: &CombinedMetrics) {
    if view.is_empty() {
        println!("No metrics for this range.");
        return;
    }
    for (month, entities) in view {
        println!("{month}");
        for (id, e) in entities {
            println!(
                "  {:<20} {:>8.1}h  ${:>11.2}  {:>2}d  {:?}",
                id, e.hours, e.revenue, e.worked_days, e.month_type
            );
        }
    }
}

fn print_budget(analysis: &BudgetAnalysis) {
    match analysis {
        BudgetAnalysis::InsufficientData { project_id, reason } => {
            println!("{project_id}: insufficient data ({reason})");
        }
        BudgetAnalysis::Analyzed(s) => {
            println!("Budget: {}", s.project_id);
            println!("  Timeline:   {} to {} ({:.1}% elapsed)", s.start_date, s.end_date, s.timeline_elapsed_pct);
            println!("  Contract:   ${:.2}", s.budget_total);
            println!("  Spent:      ${:.2} ({:.1}%)", s.budget_spent, s.budget_utilized_pct);
            println!("  Projected:  ${:.2} ({:.1}%)", s.budget_projected, s.projected_final_pct);
            println!("  Threshold:  ±{:.1}%", s.target_threshold);
            println!("  Health:     {:?}", s.health);
            println!("  Action:     {:?}", s.recommendation);
            if s.from_recorded_spend {
                println!("  (spend taken from the project's recorded budget used)");
            }
        }
    }
}
