// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wiring of a polling session for a host process.

use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
    task::JoinHandle,
};

use crate::{
    config::Config,
    error::Result,
    gateway::Gateway,
    master::{Master, MasterHandle},
    poll::Poller,
    transport::Transport,
};

/// The pump and poll tasks of a running session.
#[derive(Debug)]
pub struct Session {
    master: MasterHandle,
    shutdown_tx: watch::Sender<bool>,
    gateway_task: JoinHandle<()>,
    poller_task: JoinHandle<Poller>,
}

impl Session {
    /// Validates `config` and starts polling over `stream`.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<T>(config: &Config, stream: T) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        config.validate()?;
        let master = MasterHandle::new(Master::new(config.master_config()));
        let transport = Transport::open(stream, config.framing);
        let gateway = Gateway::new(master.clone(), transport);
        let poller = Poller::new(master.clone(), config.targets.iter().copied())
            .with_retry_policy(config.retry_policy);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let gateway_task = tokio::spawn({
            let alarm = config.pump_alarm;
            let shutdown_rx = shutdown_rx.clone();
            async move {
                let gateway = gateway.run_until(alarm, shutdown_rx).await;
                if !gateway.is_connected() {
                    log::warn!("Transport has been closed by the peer");
                }
            }
        });
        let poller_task = tokio::spawn(poller.run_until(config.poll_alarm, shutdown_rx));
        log::info!(
            "Polling {} target(s) with {:?} framing",
            config.targets.len(),
            config.framing
        );

        Ok(Self {
            master,
            shutdown_tx,
            gateway_task,
            poller_task,
        })
    }

    #[must_use]
    pub fn master(&self) -> &MasterHandle {
        &self.master
    }

    /// Stops both tasks and returns the poller for inspection.
    ///
    /// # Errors
    ///
    /// Fails if one of the tasks panicked.
    pub async fn shutdown(self) -> Result<Poller> {
        let Self {
            shutdown_tx,
            gateway_task,
            poller_task,
            ..
        } = self;
        // Fails only if both tasks have already finished
        let _ = shutdown_tx.send(true);
        gateway_task.await?;
        let poller = poller_task.await?;
        log::info!("Polling stopped");
        Ok(poller)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::duplex;

    use crate::{error::Error, poll::PollState};

    use super::*;

    #[tokio::test]
    async fn reject_invalid_config() {
        let (client, _device) = duplex(64);
        let config = Config::default().with_targets(Vec::new());

        let res = Session::spawn(&config, client);

        assert!(matches!(res, Err(Error::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn submit_first_request_after_initial_delay() {
        let (client, _device) = duplex(64);
        let session = Session::spawn(&Config::default(), client).unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!session.master().is_busy());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(session.master().is_busy());

        let poller = session.shutdown().await.unwrap();
        assert_eq!(poller.state(0), Some(PollState::WaitingResponse));
    }
}
