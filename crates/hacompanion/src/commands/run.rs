//! Foreground mode: launch, stay active, keep the periodic connect timer
//! running until Ctrl-C.

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use hacompanion_core::TimerState;

use crate::cli::RunArgs;
use crate::commands::trigger;
use crate::error::CliError;
use crate::output::Printer;
use crate::runtime::Runtime;

pub async fn handle(rt: &Runtime, args: &RunArgs, printer: Printer) -> Result<(), CliError> {
    let companion = &rt.companion;

    // A revoked registration is fatal; anything else is retried by the timer.
    if let Err(e) = companion.did_finish_launching().await {
        if e.requires_reauth() {
            return Err(e.into());
        }
        warn!(error = %e, "initial connect failed");
    }
    companion.did_become_active();

    let mut timer = companion.subscribe_timer();
    let mut lines = args.stdin.then(|| BufReader::new(tokio::io::stdin()).lines());
    let shutdown = companion.shutdown_token();
    info!(timer = ?companion.timer_state(), "running; press Ctrl-C to stop");

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "could not listen for Ctrl-C");
                }
                break;
            }
            () = shutdown.cancelled() => break,
            changed = timer.changed() => {
                if changed.is_err() {
                    break;
                }
                if let TimerState::Scheduled { interval, .. } = *timer.borrow_and_update() {
                    tracing::debug!(?interval, "periodic update scheduled");
                }
            }
            line = next_line(&mut lines) => match line {
                Some(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let result = match trigger::parse_url("url", line) {
                        Ok(url) => trigger::open_url(rt, url, printer).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = result {
                        eprintln!("{:?}", miette::Report::new(e));
                    }
                }
                // stdin closed: keep running on the timer alone
                None => lines = None,
            },
        }
    }

    companion.did_enter_background();
    companion.shutdown();
    info!("stopped");
    Ok(())
}

/// Next stdin line, or pending forever when stdin is not being read.
async fn next_line(
    lines: &mut Option<tokio::io::Lines<BufReader<tokio::io::Stdin>>>,
) -> Option<String> {
    match lines {
        Some(lines) => match lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                None
            }
        },
        None => std::future::pending().await,
    }
}
