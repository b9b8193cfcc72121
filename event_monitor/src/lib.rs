// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! JSON-lines stream of harness events: scenario phase transitions,
//! cleanup actions, external commands and verdicts.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::warn;
use once_cell::sync::OnceCell;
use serde::Serialize;

static MONITOR: OnceCell<MonitorHandle> = OnceCell::new();

const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
struct Event<'a> {
    timestamp: Duration,
    source: &'a str,
    event: &'a str,
    properties: Option<&'a HashMap<Cow<'a, str>, Cow<'a, str>>>,
}

enum Message {
    Event(String),
    Flush(flume::Sender<()>),
}

pub struct Monitor {
    rx: flume::Receiver<Message>,
    file: File,
}

impl Monitor {
    /// Moves the writer onto its own thread. The thread lives as long as
    /// the process; [`flush`] waits for it to catch up.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("event-monitor".to_owned())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        while let Ok(message) = self.rx.recv() {
            match message {
                Message::Event(event) => {
                    if let Err(e) = writeln!(self.file, "{event}") {
                        warn!("Failed writing event: {e}");
                    }
                }
                Message::Flush(ack) => {
                    let _ = self.file.flush();
                    let _ = ack.send(());
                }
            }
        }
    }
}

struct MonitorHandle {
    tx: flume::Sender<Message>,
    start: Instant,
}

/// Installs the process wide monitor writing to `file`. Only the first
/// call succeeds.
pub fn set_monitor(file: File) -> io::Result<Monitor> {
    let (tx, rx) = flume::unbounded();
    MONITOR
        .set(MonitorHandle {
            tx,
            start: Instant::now(),
        })
        .map_err(|_| io::Error::other("event monitor already set"))?;

    Ok(Monitor { rx, file })
}

pub fn event_log(source: &str, event: &str, properties: Option<&HashMap<Cow<str>, Cow<str>>>) {
    if let Some(monitor_handle) = MONITOR.get() {
        let event = Event {
            timestamp: monitor_handle.start.elapsed(),
            source,
            event,
            properties,
        };

        if let Ok(event) = serde_json::to_string(&event) {
            monitor_handle.tx.send(Message::Event(event)).ok();
        }
    }
}

/// Blocks until every event logged so far reached the file, or a short
/// timeout elapsed. Returns `false` on timeout or when no monitor is set.
pub fn flush() -> bool {
    let Some(monitor_handle) = MONITOR.get() else {
        return false;
    };
    let (ack_tx, ack_rx) = flume::bounded(1);
    if monitor_handle.tx.send(Message::Flush(ack_tx)).is_err() {
        return false;
    }
    ack_rx.recv_timeout(FLUSH_TIMEOUT).is_ok()
}

/*
    Through the use of Cow<'a, str> it is possible to use String as well as
    &str as the parameters:
    e.g.
    event!("virsh", "command", "verb", verb, "exit_status", status.to_string());
*/
#[macro_export]
macro_rules! event {
    ($source:expr, $event:expr) => {
        $crate::event_log($source, $event, None)
    };
    ($source:expr, $event:expr, $($key:expr, $value:expr),*) => {
        {
            let mut properties = ::std::collections::HashMap::new();
            $(
                properties.insert($key.into(), $value.into());
            )+
            $crate::event_log($source, $event, Some(&properties))
        }
     };
}
