use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::types::SignalResponse;

/// Append-only JSON-lines log of emitted signals.
pub struct SignalLogger {
    path: PathBuf,
}

impl SignalLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SignalLogger { path: path.into() }
    }

    pub fn append(&self, response: &SignalResponse) -> Result<()> {
        let line = serde_json::to_string(response).context("serializing signal")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening signal log {:?}", self.path))?;
        writeln!(file, "{line}").context("writing signal log")?;
        Ok(())
    }
}
