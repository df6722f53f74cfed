use std::io;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::cancel::{self, CancelFlag};

/// Raises a [`CancelFlag`] on SIGINT, SIGTERM, SIGQUIT or SIGHUP
///
/// Handlers run on a dedicated thread with a current-thread tokio runtime.
/// Dropping the watcher unregisters nothing but stops that thread.
pub struct SignalWatcher {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SignalWatcher {
    pub fn install(flag: CancelFlag) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("building signal runtime")?;

        let (ready_tx, ready_rx) = mpsc::channel::<io::Result<()>>();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = thread::Builder::new()
            .name("netfree-signals".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let mut streams = match register() {
                        Ok(streams) => {
                            let _ = ready_tx.send(Ok(()));
                            streams
                        }
                        Err(err) => {
                            let _ = ready_tx.send(Err(err));
                            return;
                        }
                    };
                    let [sigint, sigterm, sigquit, sighup] = &mut streams;

                    loop {
                        let name = tokio::select! {
                            _ = sigint.recv() => "SIGINT",
                            _ = sigterm.recv() => "SIGTERM",
                            _ = sigquit.recv() => "SIGQUIT",
                            _ = sighup.recv() => "SIGHUP",
                            _ = &mut stop_rx => return,
                        };

                        if flag.load(std::sync::atomic::Ordering::Relaxed) {
                            warn!("Received {}, shutdown already in progress", name);
                        } else {
                            info!("Received {}, shutting down", name);
                            cancel::cancel(&flag);
                        }
                    }
                });
            })
            .context("spawning signal thread")?;

        ready_rx
            .recv()
            .map_err(|_| anyhow!("signal thread exited before registering handlers"))?
            .context("registering signal handlers")?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }
}

fn register() -> io::Result<[Signal; 4]> {
    Ok([
        signal(SignalKind::interrupt())?,
        signal(SignalKind::terminate())?,
        signal(SignalKind::quit())?,
        signal(SignalKind::hangup())?,
    ])
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
