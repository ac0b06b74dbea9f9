// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker process entry: bridge construction and mod dispatch.

use crate::bridge::Bridge;
use crate::mods::{ModCtx, ModRegistry};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Worker exit code: clean mod return (including a cooperative scheduler stop).
pub const EXIT_OK: i32 = 0;
/// Worker exit code: mod failed or the mod name is unknown.
pub const EXIT_ERROR: i32 = 1;
/// Worker exit code: unwound by a kill command.
pub const EXIT_KILLED: i32 = 2;

/// Run one mod for one config over the given pipe halves.
///
/// The mod body races against the bridge's kill token: a `killing` or
/// `force-killing` command cancels the token and the body is dropped at its
/// next await point. Mod code must not rely on being interrupted inside a
/// blocking section; long-running work observes `scheduler_stopping` and the
/// runtime's cancellation instead.
pub async fn run_worker<R, W>(
    mod_name: &str,
    config: &str,
    reader: R,
    writer: W,
    registry: &ModRegistry,
) -> i32
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let bridge = Bridge::connect(reader, writer).await;
    let code = run_mod_on_bridge(&bridge, mod_name, config, registry).await;
    bridge.close().await;
    code
}

/// Dispatch and drive one mod on an already-connected bridge. The caller
/// owns the bridge and is responsible for closing it.
pub async fn run_mod_on_bridge(
    bridge: &Arc<Bridge>,
    mod_name: &str,
    config: &str,
    registry: &ModRegistry,
) -> i32 {
    let Some(entry) = registry.get(mod_name) else {
        tracing::error!(mod_name, config, "no such mod to run");
        return EXIT_ERROR;
    };

    let ctx = ModCtx { config: config.to_string(), bridge: Arc::clone(bridge) };
    let kill = bridge.kill().clone();

    tokio::select! {
        _ = kill.cancelled() => {
            tracing::info!(mod_name, config, "kill requested, unwinding");
            EXIT_KILLED
        }
        result = entry(ctx) => match result {
            Ok(()) => EXIT_OK,
            Err(e) => {
                tracing::error!(mod_name, config, error = %e, "mod failed");
                EXIT_ERROR
            }
        },
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
