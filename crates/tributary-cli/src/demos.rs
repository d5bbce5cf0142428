//! Runnable demonstrations of the stream engine

use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt as _;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tributary_core::control::ChannelObserver;
use tributary_core::stream::{from_array, from_fn, merge, MergeOptions, Timed};
use tributary_core::{
    BoxStream, Controlled, ControllableStream, ErrorMode, PullStream, StreamController,
    StreamError, StreamExt,
};

use crate::config::{ComposeConfig, ControllableConfig, FanInConfig, TimeoutConfig};

/// Where demo results go: human-readable lines or one JSON object per line
#[derive(Debug, Clone, Copy)]
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn emit<T: Serialize + std::fmt::Debug>(&self, label: &str, value: &T) -> Result<()> {
        if self.json {
            let mut line = serde_json::Map::new();
            line.insert(
                label.to_string(),
                serde_json::to_value(value).context("Failed to serialize output")?,
            );
            println!("{}", serde_json::Value::Object(line));
        } else {
            println!("{label}: {value:?}");
        }
        Ok(())
    }
}

/// filter -> map -> take over a paced array, then a fallible stage in resilient mode
pub async fn compose(config: &ComposeConfig, out: Output) -> Result<()> {
    let numbers: Vec<u32> = (1..=config.count).collect();
    let delay = Duration::from_millis(config.delay_ms);

    let started = Instant::now();
    let squares = from_array(numbers.clone(), delay)
        .filter(|n| n % 2 == 0)
        .map(|n| n * n)
        .inspect(|n| debug!(value = *n, "compose: passed filter"))
        .take(config.take)
        .collect()
        .await
        .context("Compose pipeline failed")?;
    info!(
        items = squares.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "compose: pipeline finished"
    );
    out.emit("even_squares", &squares)?;

    let fail_every = config.fail_every;
    let envelopes = from_array(numbers, delay)
        .try_map(
            move |n| async move {
                if fail_every != 0 && n % fail_every == 0 {
                    anyhow::bail!("{} is divisible by {}", n, fail_every);
                }
                Ok(n * 10)
            },
            ErrorMode::Resilient,
        )
        .resilient()
        .take(config.take * 2)
        .collect()
        .await
        .context("Resilient pipeline failed")?;

    let failures = envelopes.iter().filter(|e| !e.is_success()).count();
    for envelope in &envelopes {
        out.emit("envelope", envelope)?;
    }
    info!(
        total = envelopes.len(),
        failures, "compose: resilient stage finished"
    );
    Ok(())
}

fn source_name(index: usize) -> char {
    char::from(b'A' + (index % 26) as u8)
}

/// Several sources at different paces merged into one, guarded by a per-pull timeout
pub async fn fan_in(config: &FanInConfig, out: Output) -> Result<()> {
    let sources: Vec<BoxStream<String>> = config
        .source_delays_ms
        .iter()
        .enumerate()
        .map(|(index, &delay_ms)| {
            let items: Vec<String> = (0..config.items_per_source)
                .map(|n| format!("{}{}", source_name(index), n))
                .collect();
            from_array(items, Duration::from_millis(delay_ms)).boxed()
        })
        .collect();

    let merged = merge(sources, MergeOptions::new(config.policy))
        .context("Failed to start fan-in (no sources configured?)")?;
    let mut guarded = merged.with_timeout(Duration::from_millis(config.timeout_ms));

    let mut delivered = 0usize;
    while let Some(event) = guarded.pull().await.context("Fan-in failed")? {
        match event {
            Timed::Item(tagged) => {
                delivered += 1;
                out.emit("item", &tagged)?;
            }
            Timed::TimedOut(timeout) => {
                out.emit("timeout", &timeout.message())?;
            }
        }
    }
    info!(delivered, policy = %config.policy, "fan-in: finished");
    Ok(())
}

/// A producer that slows down on every item until it misses its deadline
pub async fn timeout(config: &TimeoutConfig, out: Output) -> Result<()> {
    let count = config.count;
    let step = Duration::from_millis(config.delay_ms);
    let mut next = 0u32;

    let slowing = from_fn(move || {
        let n = next;
        next += 1;
        async move {
            if n >= count {
                return Ok(None);
            }
            tokio::time::sleep(step * (n + 1)).await;
            Ok::<_, StreamError>(Some(n))
        }
    })
    .with_upper_bound(count as usize);

    let events = slowing
        .with_timeout(Duration::from_millis(config.timeout_ms))
        .collect()
        .await
        .context("Timeout demo failed")?;

    for event in &events {
        match event {
            Timed::Item(n) => out.emit("item", n)?,
            Timed::TimedOut(timeout) => out.emit("timeout", timeout)?,
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Pause,
    Resume,
    Stop,
}

fn schedule(config: &ControllableConfig) -> Vec<(u64, Action)> {
    if !config.scripted {
        return Vec::new();
    }
    let mut plan: Vec<(u64, Action)> = [
        (config.pause_after_ms, Action::Pause),
        (config.resume_after_ms, Action::Resume),
        (config.stop_after_ms, Action::Stop),
    ]
    .into_iter()
    .filter_map(|(at, action)| at.map(|at| (at, action)))
    .collect();
    plan.sort_by_key(|(at, _)| *at);
    plan
}

async fn drive(controller: StreamController<String>, plan: Vec<(u64, Action)>) {
    let start = Instant::now();
    for (at, action) in plan {
        tokio::time::sleep_until(start + Duration::from_millis(at)).await;
        let applied = match action {
            Action::Pause => controller.pause(),
            Action::Resume => controller.resume(),
            Action::Stop => controller.stop(),
        };
        let snapshot = controller.state();
        info!(
            action = ?action,
            applied,
            state = %snapshot.state,
            progress = %snapshot.progress_label(),
            "controllable: scripted control"
        );
    }
}

/// A controllable stream consumed here while a scripted task pauses, resumes or stops it
pub async fn controllable(config: &ControllableConfig, out: Output) -> Result<()> {
    let (observer, mut changes) = ChannelObserver::new();
    let mut stream =
        ControllableStream::new(config.items.clone(), config.options(), Some(Box::new(observer)))
            .context("Invalid controllable stream configuration")?;
    let controller = stream.controller();

    let logger = tokio::spawn(async move {
        while let Some(change) = changes.next().await {
            if let Err(e) = out.emit("state_change", &change) {
                warn!(error = %e, "controllable: failed to print state change");
            }
        }
    });
    let script = tokio::spawn(drive(controller.clone(), schedule(config)));

    let mut restarted = false;
    while let Some(item) = stream.pull().await.context("Controllable stream failed")? {
        match &item {
            Controlled::Item { .. } => out.emit("item", &item)?,
            _ => out.emit("signal", &item)?,
        }
        if item.is_terminal() && config.restart && !restarted {
            restarted = true;
            controller.restart();
        }
    }

    script.abort();
    out.emit("final_state", &controller.state())?;

    drop(stream);
    drop(controller);
    // The script's controller clone is released once the aborted task is dropped
    if let Err(e) = script.await {
        if !e.is_cancelled() {
            return Err(e).context("Control script panicked");
        }
    }
    logger.await.context("State logger panicked")?;
    Ok(())
}
