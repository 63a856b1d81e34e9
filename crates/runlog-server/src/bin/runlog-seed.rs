#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

//! Writes a small synthetic logdir so `runlogd` has something to serve:
//! two runs of decaying scalars, an image blob sequence, and a run graph.

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;

use runlog_core::types::{Event, EventPayload, ImageValue, Step, SummaryPayload, SummaryValue};
use runlog_io::record::Record;

#[derive(Debug, Parser)]
#[command(name = "runlog-seed", about = "Writes a synthetic logdir for demos.")]
struct Args {
    /// Directory to create runs under.
    #[arg(long, env = "RUNLOG_LOGDIR")]
    logdir: PathBuf,

    /// Number of steps per scalar series.
    #[arg(long, default_value_t = 50)]
    steps: i64,
}

fn main() -> Result<()> {
    runlog_observe::logging::init_tracing();
    let args = Args::parse();

    let base = now_seconds();
    write_run(
        &args.logdir.join("mnist/train"),
        train_events(args.steps, base),
    )?;
    write_run(
        &args.logdir.join("mnist/eval"),
        eval_events(args.steps / 5, base),
    )?;

    tracing::info!(logdir = %args.logdir.display(), "seeded synthetic runs");
    Ok(())
}

fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

fn train_events(steps: i64, base_time: f64) -> Vec<Event> {
    let mut events = vec![Event {
        step: Step(0),
        wall_time: base_time,
        payload: EventPayload::GraphDef(b"synthetic graph".to_vec()),
    }];
    for step in 0..steps {
        let progress = (step + 1) as f32 / steps as f32;
        events.push(scalar(step, base_time + step as f64, "loss", 1.0 - progress));
        events.push(scalar(
            step,
            base_time + step as f64,
            "accuracy",
            0.5 + progress / 2.0,
        ));
        if step % 10 == 0 {
            events.push(Event {
                step: Step(step),
                wall_time: base_time + step as f64,
                payload: EventPayload::Summary(vec![SummaryValue {
                    tag: "samples".to_string(),
                    metadata: None,
                    payload: SummaryPayload::Image(ImageValue {
                        width: 28,
                        height: 28,
                        data: format!("png-bytes-at-step-{step}").into_bytes(),
                    }),
                }]),
            });
        }
    }
    events
}

fn eval_events(steps: i64, base_time: f64) -> Vec<Event> {
    (0..steps.max(1))
        .map(|step| {
            scalar(
                step * 5,
                base_time + (step * 5) as f64,
                "loss",
                0.8 / (step + 1) as f32,
            )
        })
        .collect()
}

fn scalar(step: i64, wall_time: f64, tag: &str, value: f32) -> Event {
    Event {
        step: Step(step),
        wall_time,
        payload: EventPayload::Summary(vec![SummaryValue {
            tag: tag.to_string(),
            metadata: None,
            payload: SummaryPayload::SimpleValue(value),
        }]),
    }
}

fn write_run(dir: &Path, events: Vec<Event>) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("creating run directory {}", dir.display()))?;
    let name = format!(
        "events.out.tfevents.{:010}.seed.{}",
        now_seconds() as u64,
        std::process::id()
    );
    let path = dir.join(name);
    let mut file = fs::File::create(&path)
        .with_context(|| format!("creating event file {}", path.display()))?;
    for event in &events {
        Record::from_data(runlog_wire::encode_event(event)).write(&mut file)?;
    }
    tracing::info!(file = %path.display(), events = events.len(), "wrote event file");
    Ok(())
}
