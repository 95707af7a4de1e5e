// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Polls holding register 0 of slave 2 over an ASCII serial line until Ctrl-C.

#[cfg(feature = "serial")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use tokio_modbus_poll::prelude::*;

    env_logger::init();

    let tty_path = "/dev/ttyUSB0";
    let port = open_serial(tty_path, 19200)?;

    let session = Session::spawn(&Config::default(), port)?;
    println!("Polling {tty_path}, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    let poller = session.shutdown().await?;
    println!("Statistics: {:?}", poller.stats(0));
    if let Some(completion) = poller.last_completion(0) {
        println!("Last completion: {:?}", completion.outcome);
    }

    Ok(())
}

#[cfg(not(feature = "serial"))]
pub fn main() {
    println!("feature `serial` is required to run this example");
    std::process::exit(1);
}
