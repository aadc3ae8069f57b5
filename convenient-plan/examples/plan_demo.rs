//! Walk through an incremental build with the shell executor.
//!
//! ```text
//! RUST_LOG=convenient_plan=debug cargo run -p convenient-plan --example plan_demo
//! ```

use convenient_plan::{CollectingReporter, DiskStore, Engine, EngineConfig, Plan};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PLAN: &str = r#"{
  "default_trigger": "any",
  "targets": [
    { "name": "\"numbers.txt\"", "command": "seq 1 10 > \"numbers.txt\"" },
    { "name": "total", "command": "paste -sd+ \"numbers.txt\" | bc" },
    { "name": "lines", "command": "wc -l < \"numbers.txt\"" },
    { "name": "mean", "command": "echo \"$PLAN_DEP_TOTAL / $PLAN_DEP_LINES\" | bc -l", "depends": ["total", "lines"] }
  ]
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "convenient_plan=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let workdir = tempfile::tempdir()?;
    let state = workdir.path().join(".plan");
    let config = EngineConfig {
        root: workdir.path().to_path_buf(),
        jobs: 2,
        ..EngineConfig::default()
    };

    let plan = Plan::from_json_str(PLAN)?;
    let reporter = Arc::new(CollectingReporter::new());
    let engine = Engine::builder(plan)
        .config(config.clone())
        .store(Arc::new(DiskStore::open(&state)?))
        .reporter(reporter.clone())
        .build()?;

    println!("Outdated before the first run:");
    for (name, reason) in engine.outdated()? {
        println!("  {name}: {reason}");
    }

    let summary = engine.make().await?;
    println!("\nFirst run built {:?} in {} stages", summary.built, summary.stages.len());
    println!("mean = {}", engine.value("mean")?.unwrap_or_default());

    let summary = engine.make().await?;
    println!("\nSecond run built {:?}", summary.built);

    // Edit one command; only it and what depends on it rebuild.
    let mut plan = Plan::from_json_str(PLAN)?;
    let edited: Vec<_> = plan
        .targets()
        .iter()
        .cloned()
        .map(|mut target| {
            if target.name == "\"numbers.txt\"" {
                target.command = "seq 1 20 > \"numbers.txt\"".to_string();
            }
            target
        })
        .collect();
    plan = Plan::new(edited, plan.default_trigger())?;

    let engine = Engine::builder(plan)
        .config(config)
        .store(Arc::new(DiskStore::open(&state)?))
        .build()?;
    let summary = engine.make().await?;
    println!("\nAfter editing numbers.txt built {:?}", summary.built);
    println!("mean = {}", engine.value("mean")?.unwrap_or_default());

    println!("\nBuild times:");
    for (name, record) in engine.build_times()? {
        println!("  {name}: {} ms ({} attempt(s))", record.duration_ms, record.attempts);
    }

    println!("\nEvents of the first engine as JSON lines:");
    print!("{}", reporter.to_json_lines()?);

    Ok(())
}
