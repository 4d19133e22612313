use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use common::{Error, Result, SignalRecord, SignalSink};

/// Hands records to an in-process consumer over an mpsc channel.
pub struct ChannelSink {
    tx: mpsc::Sender<SignalRecord>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<SignalRecord>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SignalRecord>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl SignalSink for ChannelSink {
    async fn emit(&self, record: &SignalRecord) -> Result<()> {
        self.tx
            .send(record.clone())
            .await
            .map_err(|_| Error::Other("signal channel closed".into()))
    }
}

/// Writes each record as one structured log line with a JSON payload.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl SignalSink for LogSink {
    async fn emit(&self, record: &SignalRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        info!(
            id = %record.id,
            instrument = %record.decision.instrument,
            alias = %record.alias,
            classification = %record.decision.classification,
            reliability = record.decision.reliability,
            explanation_source = %record.explanation.source,
            record = %json,
            "Signal emitted"
        );
        Ok(())
    }
}
