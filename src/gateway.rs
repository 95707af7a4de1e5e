// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway pump
//!
//! Moves requests and responses between the master engine and the
//! transport and advances the response timeouts. Must be invoked
//! periodically, independent of the poller.

use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
};

use crate::{master::MasterHandle, scheduler::Alarm, transport::Transport};

#[derive(Debug)]
pub struct Gateway<T> {
    master: MasterHandle,
    transport: Transport<T>,
}

impl<T> Gateway<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(master: MasterHandle, transport: Transport<T>) -> Self {
        Self { master, transport }
    }

    #[must_use]
    pub fn master(&self) -> &MasterHandle {
        &self.master
    }

    #[must_use]
    pub fn transport(&self) -> &Transport<T> {
        &self.transport
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Runs one pump cycle.
    ///
    /// Receives pending frames, advances the timeout of the outstanding
    /// request, then queues a request and writes what the stream accepts.
    /// Never waits for the stream: bytes a stalled stream doesn't accept
    /// are written by later cycles while the response timeout keeps
    /// running. Callbacks of resolved requests are invoked last, after the
    /// master has been unlocked.
    pub fn pump(&mut self) {
        let mut resolved = Vec::new();

        while let Some(res) = self.transport.try_recv() {
            let resolution = match res {
                Ok(rsp_adu) => self.master.lock().on_response(rsp_adu),
                Err(err) if self.transport.is_connected() => {
                    self.master.lock().on_transport_error(&err)
                }
                Err(err) => {
                    log::warn!("Transport closed: {err}");
                    self.master.lock().on_disconnected()
                }
            };
            resolved.extend(resolution);
        }

        let resolution = self.master.lock().tick();
        resolved.extend(resolution);

        let req_adu = self.master.lock().poll_transmit();
        if let Some(req_adu) = req_adu {
            if let Err(err) = self.transport.start_send(req_adu) {
                let resolution = self.master.lock().on_transport_error(&err);
                resolved.extend(resolution);
            }
        }
        match self.transport.try_flush() {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                let resolution = self.master.lock().on_transport_error(&err);
                resolved.extend(resolution);
            }
            None => log::trace!("Waiting for the stream to accept the request"),
        }

        for resolution in resolved {
            resolution.fire();
        }
    }

    /// Pumps on every alarm tick until `shutdown` turns `true` or its
    /// sender is dropped.
    pub async fn run_until(mut self, alarm: Alarm, mut shutdown: watch::Receiver<bool>) -> Self {
        let mut interval = alarm.interval();
        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => self.pump(),
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }
        log::debug!("Gateway pump stopped");
        self
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use tokio::io::{duplex, AsyncReadExt as _, AsyncWriteExt as _, DuplexStream};

    use crate::{
        frame::{Request, Response},
        master::{Completion, Failure, Master, MasterConfig},
        slave::Slave,
        transport::FramingMode,
    };

    use super::*;

    fn gateway(timeout_ticks: u32) -> (Gateway<DuplexStream>, DuplexStream) {
        let (client, device) = duplex(256);
        let master = MasterHandle::new(Master::new(MasterConfig {
            response_timeout_ticks: timeout_ticks,
            retries: 0,
        }));
        let gateway = Gateway::new(master, Transport::open(client, FramingMode::Rtu));
        (gateway, device)
    }

    fn capture() -> (Arc<std::sync::Mutex<Vec<Completion>>>, impl FnOnce(Completion) + Send) {
        let completions = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&completions);
        (completions, move |completion| {
            sink.lock().unwrap().push(completion);
        })
    }

    #[tokio::test]
    async fn pump_without_pending_work() {
        let (mut gateway, _device) = gateway(3);

        gateway.pump();
        gateway.pump();

        assert!(!gateway.master().is_busy());
        assert!(gateway.is_connected());
    }

    #[tokio::test]
    async fn send_request_and_resolve_response() {
        // Given
        let (mut gateway, mut device) = gateway(3);
        let (completions, callback) = capture();
        gateway
            .master()
            .submit(Slave(0x01), Request::ReadHoldingRegisters(0x082B, 2), callback)
            .unwrap();

        // When
        gateway.pump();

        // Then
        let mut req = [0; 8];
        device.read_exact(&mut req).await.unwrap();
        assert_eq!(req, [0x01, 0x03, 0x08, 0x2B, 0x00, 0x02, 0xB6, 0x63]);

        // When
        device
            .write_all(&[0x01, 0x03, 0x04, 0x89, 0x02, 0x42, 0xC7, 0x00, 0x9D])
            .await
            .unwrap();
        gateway.pump();

        // Then
        let completions = completions.lock().unwrap();
        assert_eq!(completions.len(), 1);
        assert_eq!(
            completions[0].response(),
            Some(&Response::ReadHoldingRegisters(vec![0x8902, 0x42C7]))
        );
        assert!(!gateway.master().is_busy());
    }

    #[tokio::test]
    async fn time_out_without_response() {
        let (mut gateway, _device) = gateway(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let callback = {
            let counter = Arc::clone(&counter);
            move |completion: Completion| {
                assert_eq!(completion.failure(), Some(Failure::Timeout));
                counter.fetch_add(1, Ordering::SeqCst);
            }
        };
        gateway
            .master()
            .submit(Slave(0x01), Request::ReadCoils(0, 1), callback)
            .unwrap();

        // send
        gateway.pump();
        gateway.pump();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        gateway.pump();
        gateway.pump();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fail_outstanding_request_on_disconnect() {
        let (mut gateway, device) = gateway(100);
        let (completions, callback) = capture();
        gateway
            .master()
            .submit(Slave(0x01), Request::ReadCoils(0, 1), callback)
            .unwrap();
        gateway.pump();

        drop(device);
        gateway.pump();

        assert!(!gateway.is_connected());
        let completions = completions.lock().unwrap();
        assert_eq!(completions[0].failure(), Some(Failure::Disconnected));
    }

    #[tokio::test]
    async fn time_out_while_the_stream_is_stalled() {
        // Given
        let (client, _device) = duplex(4);
        let master = MasterHandle::new(Master::new(MasterConfig {
            response_timeout_ticks: 2,
            retries: 0,
        }));
        let mut gateway = Gateway::new(master, Transport::open(client, FramingMode::Ascii));
        let (completions, callback) = capture();
        gateway
            .master()
            .submit(Slave(0x02), Request::ReadHoldingRegisters(0, 1), callback)
            .unwrap();

        // When
        gateway.pump();
        gateway.pump();
        assert!(completions.lock().unwrap().is_empty());
        gateway.pump();

        // Then
        assert!(gateway.transport().has_unsent());
        let completions = completions.lock().unwrap();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].failure(), Some(Failure::Timeout));
        assert!(!gateway.master().is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_the_stream_is_stalled() {
        let (client, _device) = duplex(4);
        let master = MasterHandle::new(Master::default());
        let gateway = Gateway::new(master.clone(), Transport::open(client, FramingMode::Rtu));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let alarm = Alarm::new(Duration::from_millis(5), Duration::from_millis(5));
        let task = tokio::spawn(gateway.run_until(alarm, shutdown_rx));
        master
            .submit(Slave(0x01), Request::ReadCoils(0, 1), |_| {})
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown_tx.send(true).unwrap();
        let gateway = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert!(gateway.transport().has_unsent());
    }

    #[tokio::test(start_paused = true)]
    async fn run_until_shutdown() {
        let (gateway, mut device) = gateway(3);
        let master = gateway.master().clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let alarm = Alarm::new(Duration::from_millis(5), Duration::from_millis(5));
        let task = tokio::spawn(gateway.run_until(alarm, shutdown_rx));
        master
            .submit(Slave(0x01), Request::ReadHoldingRegisters(0x082B, 2), |_| {})
            .unwrap();

        let mut req = [0; 8];
        device.read_exact(&mut req).await.unwrap();
        drop(shutdown_tx);
        let gateway = task.await.unwrap();

        assert!(gateway.master().is_busy());
    }
}
