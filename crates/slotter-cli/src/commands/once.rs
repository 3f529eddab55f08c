use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use slotter_browser::{CdpConfig, FlowConfig};
use slotter_control::{Controller, ControllerConfig, Notifier};

use super::{ConsoleMessenger, open_store, stdin_lines};

pub fn execute(
    db: Option<PathBuf>,
    endpoint: String,
    entry_url: String,
    timeout_secs: u64,
    cities: Vec<String>,
    category: String,
) -> Result<()> {
    // Create tokio runtime for async operations
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let store = open_store(db)?;
        let notifier = Arc::new(Notifier::new(
            Arc::new(ConsoleMessenger),
            Duration::from_millis(300),
        ));
        let cfg = ControllerConfig {
            // No scheduled ticks; the single attempt is triggered below.
            interval: Duration::from_secs(24 * 3600),
            jitter_max: Duration::ZERO,
            attempt_timeout: Duration::from_secs(timeout_secs),
            cities,
            flow: FlowConfig {
                entry_url,
                category,
                ..FlowConfig::default()
            },
            ..ControllerConfig::default()
        };
        let cdp = CdpConfig {
            endpoint,
            ..CdpConfig::default()
        };
        info!(endpoint = %cdp.endpoint, "running a single supervised attempt");
        let controller = Arc::new(Controller::new(
            store,
            notifier,
            Box::new(move || cdp.clone().into_factory()),
            cfg,
        ));

        controller.start().await;
        println!("Running one attempt. Type r to resume a paused step.");

        let mut attempt = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.run_once().await })
        };
        let mut lines = stdin_lines();
        let summary = loop {
            tokio::select! {
                result = &mut attempt => {
                    break result.unwrap_or_else(|_| "attempt task failed".into());
                }
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    break "interrupted".into();
                }
                line = lines.recv() => {
                    if let Some(line) = line {
                        if matches!(line.trim(), "r" | "resume") && controller.resume().await {
                            println!("▶️  Resumed");
                        }
                    }
                }
            }
        };
        println!("{summary}");
        controller.stop().await;
        Ok(())
    })
}
