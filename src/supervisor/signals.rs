use super::TermSignal;
use crate::error::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Forward OS termination signals into `sender` until `cancel` fires or the
/// receiver is dropped.
///
/// Handlers are registered before this returns, so the caller can spawn the
/// worker afterwards without a window where a signal would be missed.
#[cfg(unix)]
pub fn forward_os_signals(
    sender: mpsc::Sender<TermSignal>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigquit = signal(SignalKind::quit())?;
    let mut sighup = signal(SignalKind::hangup())?;

    let handle = tokio::spawn(async move {
        loop {
            let sig = tokio::select! {
                Some(()) = sigterm.recv() => TermSignal::Term,
                Some(()) = sigint.recv() => TermSignal::Int,
                Some(()) = sigquit.recv() => TermSignal::Quit,
                Some(()) = sighup.recv() => TermSignal::Hup,
                _ = cancel.cancelled() => break,
            };

            info!("Received {} signal", sig);
            if sender.send(sig).await.is_err() {
                break;
            }
        }
        debug!("Signal forwarding stopped");
    });

    Ok(handle)
}

#[cfg(not(unix))]
pub fn forward_os_signals(
    sender: mpsc::Sender<TermSignal>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_err() {
                        break;
                    }
                    info!("Received Ctrl+C");
                    if sender.send(TermSignal::Int).await.is_err() {
                        break;
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
        debug!("Signal forwarding stopped");
    });

    Ok(handle)
}
