use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use slotter_browser::{CdpConfig, FlowConfig};
use slotter_control::{Controller, ControllerConfig, Notifier};

use super::{ConsoleMessenger, open_store, stdin_lines};

#[allow(clippy::too_many_arguments)]
pub fn execute(
    db: Option<PathBuf>,
    endpoint: String,
    entry_url: String,
    interval_mins: u64,
    jitter_secs: u64,
    timeout_secs: u64,
    cities: Vec<String>,
    operator_chats: Vec<i64>,
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
        let flow = FlowConfig {
            entry_url,
            category,
            ..FlowConfig::default()
        };
        let cfg = ControllerConfig {
            interval: Duration::from_secs(interval_mins * 60),
            jitter_max: Duration::from_secs(jitter_secs),
            attempt_timeout: Duration::from_secs(timeout_secs),
            cities,
            operator_chats,
            flow,
            ..ControllerConfig::default()
        };
        let cdp = CdpConfig {
            endpoint,
            ..CdpConfig::default()
        };
        info!(endpoint = %cdp.endpoint, interval_mins, "starting the booking schedule");
        let controller = Arc::new(Controller::new(
            store,
            notifier,
            Box::new(move || cdp.clone().into_factory()),
            cfg,
        ));

        println!("🗓️  {}", controller.start().await);
        println!("Attempts run every {interval_mins} min. Commands:");
        println!("  r) resume a paused step   o) run an attempt now");
        println!("  s) status                 q) stop and quit");

        let mut lines = stdin_lines();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    break;
                }
                line = lines.recv() => {
                    let Some(line) = line else { break };
                    match line.trim() {
                        "r" | "resume" => {
                            if controller.resume().await {
                                println!("▶️  Resumed");
                            } else {
                                println!("Nothing is paused");
                            }
                        }
                        "o" | "once" => println!("{}", controller.run_once().await),
                        "s" | "status" => println!("{}", controller.status().await),
                        "q" | "quit" | "stop" => break,
                        "" => {}
                        other => println!("Unknown command: {other}"),
                    }
                }
            }
        }

        println!("🛑 {}", controller.stop().await);
        Ok(())
    })
}
