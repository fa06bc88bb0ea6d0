//! Follow live attendance from the command line.
//!
//! Connects to the backend's push stream, keeps a reconciled view of the
//! requested class or student and logs every update until interrupted.

use clap::Parser;
use classlens_sync::{
    sync, ClassId, EndpointConfig, HttpAttendanceApi, StudentId, SyncConfig, ViewEvent, ViewFilter,
    ViewState,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Watch live attendance updates", long_about = None)]
struct Args {
    /// Backend base URL.
    #[arg(long, env = "CLASSLENS_API_BASE", default_value = "http://localhost:3000")]
    api_base: String,

    /// Only show these classes.
    #[arg(long = "class", value_name = "CLASS_ID")]
    classes: Vec<i64>,

    /// Only show these students.
    #[arg(long = "student", value_name = "STUDENT_ID")]
    students: Vec<i64>,

    /// Ask the backend to regenerate reports on startup.
    #[arg(long)]
    regenerate_reports: bool,
}

impl Args {
    fn filter(&self) -> ViewFilter {
        ViewFilter {
            class_ids: (!self.classes.is_empty())
                .then(|| self.classes.iter().copied().map(ClassId).collect()),
            student_ids: (!self.students.is_empty())
                .then(|| self.students.iter().copied().map(StudentId).collect()),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        error!(error = %err, "classlens-watch failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> classlens_sync::Result<()> {
    let config = SyncConfig::from_env()?;
    let api = HttpAttendanceApi::new(EndpointConfig {
        api_base: args.api_base.clone(),
        ..Default::default()
    })?;
    info!(events = %api.endpoints().events_url(), "starting attendance sync");

    let handle = sync::spawn(config, api.push_transport()?, api.clone())?;
    if args.regenerate_reports {
        sync::spawn_report_regeneration(api);
    }

    let (_, initial) = handle.subscribe_with(args.filter(), |event| match event {
        ViewEvent::Update(view) => log_view(&view),
        ViewEvent::Dropped { reason } => warn!(?reason, "view dropped"),
    })?;
    log_view(&initial);

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
    }
    info!("shutting down");
    handle.close().await;
    Ok(())
}

fn log_view(view: &ViewState) {
    let (records, optimistic, stale) = match &view.snapshot {
        Some(snapshot) => (
            snapshot.len(),
            snapshot.iter().filter(|r| r.optimistic).count(),
            snapshot.stale,
        ),
        None => (0, 0, false),
    };
    info!(
        version = view.version,
        connection = %view.connection,
        records,
        optimistic,
        stale,
        recent = view.recent_events.len(),
        "view updated"
    );
    if let Some(latest) = view.recent_events.first() {
        info!(
            student = %latest.student_id(),
            class = %latest.class_id(),
            status = %latest.status(),
            at = %latest.timestamp_in(),
            "latest scan"
        );
    }
}
