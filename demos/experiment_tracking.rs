//! Experiment Tracking Example
//!
//! Walks through the local store end to end: create experiments, attach
//! analysis results and a plot, query them, then reopen the data directory
//! to show everything survived.
//!
//! Run with: cargo run --example experiment_tracking [DATA_DIR]
//! Set `RUST_LOG=labtrack_db=debug` to see every flush.

use anyhow::Context;
use chrono::{Duration, Utc};
use labtrack_db::experiment::{AnalysisResultRecord, ExperimentRecord, ExperimentUpdate};
use labtrack_db::query::{AnalysisResultQuery, ExperimentQuery, SortBy};
use labtrack_db::Database;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let scratch = tempfile::tempdir().context("creating scratch directory")?;
    let data_dir = std::env::args()
        .nth(1)
        .map_or_else(|| scratch.path().to_path_buf(), Into::into);

    println!("=== labtrack-db Experiment Tracking ===\n");
    println!("Data directory: {}\n", data_dir.display());

    let db = Database::builder()
        .data_dir(&data_dir)
        .build()
        .context("opening database")?;

    // -------------------------------------------------------------------------
    // 1. Create a parent experiment and two children
    // -------------------------------------------------------------------------
    println!("1. Creating experiments...");

    let start = Utc::now();
    let parent = db.create_experiment(
        ExperimentRecord::builder("CompositeCalibration", "ibmq_lima")
            .tags(["calibration", "nightly"])
            .start_time(start)
            .extra(serde_json::json!({"qubits": [0, 1]})),
    )?;
    println!("   Parent: {} ({})", parent.uuid(), parent.experiment_type());

    let t1 = db.create_experiment(
        ExperimentRecord::builder("T1", "ibmq_lima")
            .parent_experiment_uuid(parent.uuid())
            .tags(["calibration"])
            .start_time(start + Duration::seconds(5)),
    )?;
    let rabi = db.create_experiment(
        ExperimentRecord::builder("FineRabi", "ibmq_lima")
            .parent_experiment_uuid(parent.uuid())
            .tags(["calibration", "drive"])
            .start_time(start + Duration::seconds(10)),
    )?;
    println!("   Children: {}, {}", t1.uuid(), rabi.uuid());

    // -------------------------------------------------------------------------
    // 2. Attach analysis results and a plot
    // -------------------------------------------------------------------------
    println!("\n2. Recording analysis results...");

    let t1_result = db.create_analysis_result(
        AnalysisResultRecord::builder("T1")
            .experiment_uuid(t1.uuid())
            .device_components(["Q0"])
            .fit(serde_json::json!({"value": 84.2e-6, "unit": "s"}))
            .quality("good")
            .chisq(0.93),
    )?;
    db.create_analysis_result(
        AnalysisResultRecord::builder("rabi_rate")
            .experiment_uuid(rabi.uuid())
            .fit(serde_json::json!({"value": 0.51}))
            .quality("bad"),
    )?;
    println!(
        "   {} on {} (quality {:?})",
        t1_result.result_type(),
        t1_result.device_name(),
        t1_result.quality()
    );

    db.upload_plot(t1.uuid(), "t1_decay.svg", b"<svg><!-- decay --></svg>".to_vec())?;
    println!("   Plots for {}: {:?}", t1.uuid(), db.plot_names(t1.uuid()));

    // -------------------------------------------------------------------------
    // 3. Query
    // -------------------------------------------------------------------------
    println!("\n3. Querying...");

    let children = db.experiments(&ExperimentQuery {
        parent_id: Some(parent.uuid().to_string()),
        sort_by: Some(SortBy::from("start_datetime:asc")),
        ..Default::default()
    })?;
    for child in &children {
        println!("   child {} {}", child.uuid(), child.experiment_type());
    }

    let drive = db.experiments(&ExperimentQuery::from_json(
        r#"{"tags": ["calibration", "drive"], "tags_operator": "AND"}"#,
    )?)?;
    println!("   tagged calibration AND drive: {}", drive.len());

    let good = db.analysis_results(&AnalysisResultQuery {
        quality: Some("good".to_string()),
        ..Default::default()
    })?;
    println!("   good analysis results: {}", good.len());

    if let Err(err) = db.experiments(&ExperimentQuery {
        device_components: Some(vec!["Q0".to_string()]),
        ..Default::default()
    }) {
        println!("   device_components filter rejected: {err}");
    }

    // -------------------------------------------------------------------------
    // 4. Update, then reopen
    // -------------------------------------------------------------------------
    println!("\n4. Updating and reopening...");

    db.update_experiment(
        parent.uuid(),
        ExperimentUpdate {
            notes: Some(Some("all children finished".to_string())),
            end_time: Some(Some(Utc::now())),
            ..Default::default()
        },
    )?;
    drop(db);

    let reopened = Database::builder()
        .data_dir(&data_dir)
        .build()
        .context("reopening database")?;
    let restored = reopened.experiment(parent.uuid())?;
    println!("   Notes after reopen: {:?}", restored.notes());
    println!(
        "   Plot bytes after reopen: {}",
        reopened.plot(t1.uuid(), "t1_decay.svg")?.len()
    );

    println!("\n=== Done ===");
    Ok(())
}
