//! Records the tick stream of one symbol to a `.tickdat` file.
//!
//! One comma separated line per tick: tick type, exchange time, local
//! receipt time, price, size, the six condition flags (`can_auto_execute`,
//! `past_limit`, `pre_open`, `unreported`, `bid_past_low`, `ask_past_high`)
//! and the exchange. Flags are written as `0`/`1`; times are Unix seconds.

use crate::client::BrokerClient;
use crate::error::{ClientError, Result};
use chrono::{Local, Utc};
use log::{debug, error, info};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use trading::{Instrument, SubscriberHandle, Tick};

const EXTENSION: &str = ".tickdat";

pub struct TickRecorder {
    client: Arc<BrokerClient>,
    instrument: Instrument,
    handle: Option<SubscriberHandle>,
    writer: Arc<Mutex<BufWriter<File>>>,
    path: PathBuf,
}

impl TickRecorder {
    /// Opens (or appends to) today's file for `symbol` in `output_dir` and
    /// subscribes to its ticks.
    pub fn start(client: Arc<BrokerClient>, symbol: &str, output_dir: &Path) -> Result<Self> {
        if symbol.trim().is_empty() || symbol.contains(EXTENSION) {
            return Err(ClientError::InvalidSymbol(symbol.to_string()));
        }
        let instrument = Instrument::new(symbol);

        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join(file_name(&instrument));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let writer = Arc::new(Mutex::new(BufWriter::new(file)));

        let handle = {
            let writer = Arc::clone(&writer);
            let name = path.display().to_string();
            client.request_ticks(&instrument, move |tick: &Tick| {
                let line = format_tick_line(tick, Utc::now().timestamp());
                let mut writer = writer.lock().unwrap_or_else(|p| p.into_inner());
                if let Err(e) = writeln!(writer, "{}", line) {
                    error!("Failed to write tick to {}: {}", name, e);
                }
            })?
        };

        info!("Recording {} to {}", instrument, path.display());
        Ok(Self {
            client,
            instrument,
            handle: Some(handle),
            writer,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// Cancels the subscription and flushes the file. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            self.client.cancel_ticks(&self.instrument, handle);
            debug!("Stopped recording {}", self.instrument);
        }
        self.writer
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .flush()?;
        Ok(())
    }
}

impl Drop for TickRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Failed to flush {}: {}", self.path.display(), e);
        }
    }
}

/// `<MMM DD><SYMBOL>.tickdat`, dated by the local clock.
fn file_name(instrument: &Instrument) -> String {
    format!("{}{}{}", Local::now().format("%b %e"), instrument, EXTENSION)
}

pub fn format_tick_line(tick: &Tick, local_time: i64) -> String {
    let flag = |set: bool| if set { 1 } else { 0 };
    let attrs = &tick.attributes;
    format!(
        "{},{},{},{},{},{},{},{},{},{},{},{}",
        tick.tick_type,
        tick.time,
        local_time,
        tick.price,
        tick.size,
        flag(attrs.can_auto_execute),
        flag(attrs.past_limit),
        flag(attrs.pre_open),
        flag(attrs.unreported),
        flag(attrs.bid_past_low),
        flag(attrs.ask_past_high),
        tick.exchange
    )
}
