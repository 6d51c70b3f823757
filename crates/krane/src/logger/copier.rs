//! Forwards buffered container output into a log driver, line by line.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{LogDriver, Message, Source};

/// Force a flush once an unterminated line grows past this.
const MAX_LINE_BYTES: usize = 16 * 1024;

/// Spawn a task draining one output endpoint into the driver.
///
/// The task runs until the endpoint's senders are all gone and everything
/// already buffered has been forwarded; a trailing partial line is flushed
/// at that point. Delivery errors are logged, never propagated.
pub(crate) fn spawn(
    container_id: String,
    source: Source,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    driver: Arc<dyn LogDriver>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending = BytesMut::new();
        while let Some(chunk) = rx.recv().await {
            pending.extend_from_slice(&chunk);
            forward_complete_lines(&container_id, source, &mut pending, &driver);
            if pending.len() >= MAX_LINE_BYTES {
                let line = pending.split().freeze();
                forward(&container_id, source, line, &driver);
            }
        }
        if !pending.is_empty() {
            forward(&container_id, source, pending.freeze(), &driver);
        }
    })
}

fn forward_complete_lines(
    container_id: &str,
    source: Source,
    pending: &mut BytesMut,
    driver: &Arc<dyn LogDriver>,
) {
    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
        let mut line = pending.split_to(pos + 1);
        line.truncate(line.len() - 1);
        forward(container_id, source, line.freeze(), driver);
    }
}

fn forward(container_id: &str, source: Source, line: Bytes, driver: &Arc<dyn LogDriver>) {
    let msg = Message { line, source };
    if let Err(err) = driver.log(&msg) {
        tracing::error!(
            container_id = %container_id,
            source = %source,
            error = %err,
            "Failed to forward log message"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krane_common::KraneResult;
    use parking_lot::Mutex;

    struct Recorder {
        lines: Mutex<Vec<(Source, Vec<u8>)>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                lines: Mutex::new(Vec::new()),
            })
        }
    }

    impl LogDriver for Recorder {
        fn log(&self, msg: &Message) -> KraneResult<()> {
            self.lines.lock().push((msg.source, msg.line.to_vec()));
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    #[tokio::test]
    async fn splits_chunks_into_lines() {
        let recorder = Recorder::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = spawn("c1".to_string(), Source::Stdout, rx, recorder.clone());

        tx.send(Bytes::from_static(b"hello\nwor")).unwrap();
        tx.send(Bytes::from_static(b"ld\n")).unwrap();
        drop(tx);
        task.await.unwrap();

        let lines = recorder.lines.lock();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], (Source::Stdout, b"hello".to_vec()));
        assert_eq!(lines[1], (Source::Stdout, b"world".to_vec()));
    }

    #[tokio::test]
    async fn flushes_partial_line_at_eof() {
        let recorder = Recorder::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = spawn("c1".to_string(), Source::Stderr, rx, recorder.clone());

        tx.send(Bytes::from_static(b"no newline")).unwrap();
        drop(tx);
        task.await.unwrap();

        let lines = recorder.lines.lock();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], (Source::Stderr, b"no newline".to_vec()));
    }

    #[tokio::test]
    async fn oversized_line_is_force_flushed() {
        let recorder = Recorder::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = spawn("c1".to_string(), Source::Stdout, rx, recorder.clone());

        tx.send(Bytes::from(vec![b'x'; MAX_LINE_BYTES])).unwrap();
        tx.send(Bytes::from_static(b"tail\n")).unwrap();
        drop(tx);
        task.await.unwrap();

        let lines = recorder.lines.lock();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].1.len(), MAX_LINE_BYTES);
        assert_eq!(lines[1].1, b"tail".to_vec());
    }
}
