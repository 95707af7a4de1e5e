// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Drives the poller, master and gateway pump against a simulated device.

mod device;

use std::{
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use tokio::io::DuplexStream;
use tokio_modbus_poll::{
    master::FAILED_FUNCTION_CODE, prelude::*, relay::NO_FUNCTION_CODE,
};

use crate::device::{Device, ReadRequest};

struct Setup {
    master: MasterHandle,
    gateway: Gateway<DuplexStream>,
    poller: Poller,
    device: Device,
}

fn setup(framing: FramingMode, config: MasterConfig) -> Setup {
    setup_targets(framing, config, [Target::default()])
}

/// A line that accepts only a few bytes and is never read by the device.
fn setup_stalled(framing: FramingMode, config: MasterConfig) -> Setup {
    let _ = env_logger::builder().is_test(true).try_init();
    let (line, device) = device::connect_with_capacity(framing, 4);
    let master = MasterHandle::new(Master::new(config));
    let gateway = Gateway::new(master.clone(), Transport::open(line, framing));
    let poller = Poller::new(master.clone(), [Target::default()]);
    Setup {
        master,
        gateway,
        poller,
        device,
    }
}

fn setup_targets(
    framing: FramingMode,
    config: MasterConfig,
    targets: impl IntoIterator<Item = Target>,
) -> Setup {
    let _ = env_logger::builder().is_test(true).try_init();
    let (line, device) = device::connect(framing);
    let master = MasterHandle::new(Master::new(config));
    let gateway = Gateway::new(master.clone(), Transport::open(line, framing));
    let poller = Poller::new(master.clone(), targets);
    Setup {
        master,
        gateway,
        poller,
        device,
    }
}

fn timeout_ticks(response_timeout_ticks: u32) -> MasterConfig {
    MasterConfig {
        response_timeout_ticks,
        retries: 0,
    }
}

const DEFAULT_REQUEST: ReadRequest = ReadRequest {
    slave: 2,
    function: 0x03,
    address: 0x0000,
    quantity: 1,
};

#[tokio::test]
async fn submit_from_reading_and_wait() {
    // Given
    let Setup {
        mut gateway,
        mut poller,
        mut device,
        ..
    } = setup(FramingMode::Ascii, MasterConfig::default());

    // When
    poller.activate();

    // Then
    assert_eq!(poller.state(0), Some(PollState::WaitingResponse));
    assert_eq!(poller.record(0).unwrap().function_code(), NO_FUNCTION_CODE);

    // When
    gateway.pump();

    // Then
    assert_eq!(device.read_request().await, DEFAULT_REQUEST);
}

#[tokio::test]
async fn return_to_reading_after_response() {
    // Given
    let Setup {
        mut gateway,
        mut poller,
        mut device,
        ..
    } = setup(FramingMode::Ascii, MasterConfig::default());
    poller.activate();
    gateway.pump();
    let req = device.read_request().await;

    // When
    device.respond_registers(req, &[0x1234]).await;
    gateway.pump();

    // Then
    let record = poller.record(0).unwrap();
    assert_eq!(record.function_code(), 0x03);
    assert_eq!(record.exception_code(), 0);
    assert_eq!(poller.state(0), Some(PollState::WaitingResponse));

    // When
    poller.activate();

    // Then
    assert_eq!(poller.state(0), Some(PollState::Reading));
    assert_eq!(
        poller.last_completion(0).unwrap().response(),
        Some(&Response::ReadHoldingRegisters(vec![0x1234]))
    );
}

#[tokio::test]
async fn return_to_reading_after_timeout() {
    // Given
    let Setup {
        mut gateway,
        mut poller,
        mut device,
        ..
    } = setup(FramingMode::Rtu, timeout_ticks(3));
    poller.activate();
    gateway.pump();
    device.read_request().await;

    // When
    for _ in 0..3 {
        gateway.pump();
    }

    // Then
    assert_eq!(
        poller.record(0).unwrap().function_code(),
        FAILED_FUNCTION_CODE
    );

    // When
    poller.activate();

    // Then
    assert_eq!(poller.state(0), Some(PollState::Reading));
    assert_eq!(
        poller.last_completion(0).unwrap().failure(),
        Some(Failure::Timeout)
    );
    assert_eq!(poller.stats(0).unwrap().failures, 1);
}

#[tokio::test]
async fn retry_submit_after_busy() {
    // Given
    let Setup {
        master,
        mut gateway,
        mut poller,
        mut device,
    } = setup(FramingMode::Rtu, MasterConfig::default());
    master
        .submit(Slave(7), Request::ReadInputRegisters(0x10, 1), |_| {})
        .unwrap();

    // When
    poller.activate();

    // Then
    assert_eq!(poller.state(0), Some(PollState::Reading));
    assert_eq!(poller.stats(0).unwrap().busy, 1);

    // When
    gateway.pump();
    let req = device.read_request().await;
    assert_eq!(req.slave, 7);
    device.respond_registers(req, &[0]).await;
    gateway.pump();
    poller.activate();

    // Then
    assert_eq!(poller.state(0), Some(PollState::WaitingResponse));
    gateway.pump();
    assert_eq!(device.read_request().await, DEFAULT_REQUEST);
}

#[tokio::test]
async fn keep_waiting_without_completion() {
    // Given
    let Setup {
        master,
        mut gateway,
        mut poller,
        mut device,
    } = setup(FramingMode::Ascii, MasterConfig::default());
    poller.activate();
    gateway.pump();
    device.read_request().await;
    let outstanding = master.outstanding();
    let record = poller.record(0).unwrap();

    for _ in 0..3 {
        // When
        poller.activate();
        gateway.pump();

        // Then
        assert_eq!(poller.state(0), Some(PollState::WaitingResponse));
        assert_eq!(poller.record(0).unwrap(), record);
        assert_eq!(master.outstanding(), outstanding);
    }
    assert!(!device.has_pending_input());
    assert_eq!(poller.stats(0).unwrap().submitted, 1);
}

#[tokio::test]
async fn return_to_reading_after_exception() {
    let Setup {
        mut gateway,
        mut poller,
        mut device,
        ..
    } = setup(FramingMode::Ascii, MasterConfig::default());
    poller.activate();
    gateway.pump();
    let req = device.read_request().await;

    device
        .respond_exception(req, ExceptionCode::IllegalDataAddress)
        .await;
    gateway.pump();

    let record = poller.record(0).unwrap();
    assert_eq!(record.function_code(), 0x03);
    assert_eq!(record.exception_code(), 0x02);

    poller.activate();

    assert_eq!(poller.state(0), Some(PollState::Reading));
    assert_eq!(poller.stats(0).unwrap().exceptions, 1);
}

#[tokio::test]
async fn invoke_callback_exactly_once() {
    for respond in [true, false] {
        let Setup {
            master,
            mut gateway,
            mut device,
            ..
        } = setup(FramingMode::Rtu, timeout_ticks(2));
        let counter = Arc::new(AtomicUsize::new(0));
        let callback = {
            let counter = Arc::clone(&counter);
            move |_: Completion| {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        };
        master
            .submit(Slave(2), Request::ReadHoldingRegisters(0, 1), callback)
            .unwrap();
        gateway.pump();
        let req = device.read_request().await;
        if respond {
            device.respond_registers(req, &[1]).await;
        }

        for _ in 0..10 {
            gateway.pump();
        }
        if respond {
            // A late duplicate is ignored
            device.respond_registers(req, &[1]).await;
            gateway.pump();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!master.is_busy());
    }
}

#[tokio::test]
async fn single_request_on_the_line() {
    let Setup {
        master,
        mut gateway,
        mut poller,
        mut device,
    } = setup(FramingMode::Ascii, timeout_ticks(2));

    for _ in 0..30 {
        poller.activate();
        gateway.pump();
        assert!(
            master.outstanding().is_none()
                || poller.state(0) == Some(PollState::WaitingResponse)
        );
    }

    let submitted = poller.stats(0).unwrap().submitted;
    assert!(submitted > 1);
    for _ in 0..submitted {
        assert_eq!(device.read_request().await, DEFAULT_REQUEST);
    }
    assert!(!device.has_pending_input());
}

#[tokio::test]
async fn resend_after_timeout() {
    let Setup {
        mut gateway,
        mut poller,
        mut device,
        ..
    } = setup(
        FramingMode::Rtu,
        MasterConfig {
            response_timeout_ticks: 2,
            retries: 1,
        },
    );
    poller.activate();
    gateway.pump();
    assert_eq!(device.read_request().await, DEFAULT_REQUEST);

    gateway.pump();
    gateway.pump();
    let req = device.read_request().await;
    assert_eq!(req, DEFAULT_REQUEST);
    device.respond_registers(req, &[42]).await;
    gateway.pump();
    poller.activate();

    let stats = poller.stats(0).unwrap();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.responses, 1);
    assert_eq!(stats.failures, 0);
}

#[tokio::test]
async fn ignore_responses_from_other_slaves() {
    let Setup {
        mut gateway,
        mut poller,
        mut device,
        ..
    } = setup(FramingMode::Ascii, MasterConfig::default());
    poller.activate();
    gateway.pump();
    let req = device.read_request().await;

    device
        .respond_registers(ReadRequest { slave: 3, ..req }, &[1])
        .await;
    device.send(b"garbage").await;
    gateway.pump();
    assert_eq!(poller.record(0).unwrap().function_code(), NO_FUNCTION_CODE);

    device.respond_registers(req, &[2]).await;
    gateway.pump();
    poller.activate();

    assert_eq!(
        poller.last_completion(0).unwrap().response(),
        Some(&Response::ReadHoldingRegisters(vec![2]))
    );
}

#[tokio::test]
async fn fail_requests_after_disconnect() {
    let Setup {
        mut gateway,
        mut poller,
        device,
        ..
    } = setup(FramingMode::Rtu, MasterConfig::default());
    poller.activate();
    gateway.pump();

    device.disconnect();
    gateway.pump();
    poller.activate();

    assert!(!gateway.is_connected());
    assert_eq!(
        poller.last_completion(0).unwrap().failure(),
        Some(Failure::Disconnected)
    );

    poller.activate();
    gateway.pump();
    poller.activate();

    assert_eq!(poller.state(0), Some(PollState::Reading));
    assert_eq!(
        poller.last_completion(0).unwrap().failure(),
        Some(Failure::Transport(io::ErrorKind::NotConnected))
    );
    assert_eq!(poller.stats(0).unwrap().failures, 2);
}

#[tokio::test]
async fn poll_targets_in_turn() {
    let first = Target::new(Slave(1), Request::ReadInputRegisters(0x0100, 2));
    let second = Target::new(Slave(5), Request::ReadCoils(0x0000, 4));
    let Setup {
        mut gateway,
        mut poller,
        mut device,
        ..
    } = setup_targets(FramingMode::Rtu, MasterConfig::default(), [first, second]);

    let mut polled = Vec::new();
    for _ in 0..4 {
        poller.activate();
        gateway.pump();
        let req = device.read_request().await;
        polled.push(req.slave);
        match req.function {
            0x01 => device.send(&[req.slave, 0x01, 1, 0b0000_0101]).await,
            _ => device.respond_registers(req, &[1, 2]).await,
        }
        gateway.pump();
    }
    poller.activate();

    assert_eq!(polled, [1, 5, 1, 5]);
    assert_eq!(
        poller.last_completion(1).unwrap().response(),
        Some(&Response::ReadCoils(vec![true, false, true, false]))
    );
    assert_eq!(poller.stats(0).unwrap().responses, 2);
    assert_eq!(poller.stats(1).unwrap().responses, 2);
}

#[tokio::test]
async fn invoke_callback_while_the_line_is_stalled() {
    // Given
    let Setup {
        master,
        mut gateway,
        device: _device,
        ..
    } = setup_stalled(FramingMode::Ascii, timeout_ticks(2));
    let counter = Arc::new(AtomicUsize::new(0));
    let callback = {
        let counter = Arc::clone(&counter);
        move |completion: Completion| {
            assert_eq!(completion.failure(), Some(Failure::Timeout));
            counter.fetch_add(1, Ordering::SeqCst);
        }
    };
    master
        .submit(Slave(2), Request::ReadHoldingRegisters(0, 1), callback)
        .unwrap();

    // When
    for _ in 0..10 {
        gateway.pump();
    }

    // Then
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(!master.is_busy());
    assert!(gateway.is_connected());
}

#[tokio::test]
async fn return_to_reading_while_the_line_is_stalled() {
    // Given
    let Setup {
        mut gateway,
        mut poller,
        device: _device,
        ..
    } = setup_stalled(FramingMode::Rtu, timeout_ticks(3));
    poller.activate();

    // When
    for _ in 0..4 {
        gateway.pump();
    }

    // Then
    assert_eq!(
        poller.record(0).unwrap().function_code(),
        FAILED_FUNCTION_CODE
    );
    poller.activate();
    assert_eq!(poller.state(0), Some(PollState::Reading));
    assert_eq!(
        poller.last_completion(0).unwrap().failure(),
        Some(Failure::Timeout)
    );

    // The next cycle times out again instead of hanging
    poller.activate();
    assert_eq!(poller.state(0), Some(PollState::WaitingResponse));
    for _ in 0..4 {
        gateway.pump();
    }
    poller.activate();
    assert_eq!(poller.state(0), Some(PollState::Reading));
    assert_eq!(poller.stats(0).unwrap().failures, 2);
}
