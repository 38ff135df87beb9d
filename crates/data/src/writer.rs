//! Asynchronous batched persistence
//!
//! Uploads return once the cache is written; durable persistence happens
//! on this task, in submission order, batched up to a configured size.
//! `flush` enqueues an ack job: because the queue preserves order, the ack
//! fires only after every save submitted before it has been attempted.
//! Save failures are accumulated and surfaced by the next flush: a lost
//! write is an error the caller must eventually see.

use accrete_core::{BinaryStamp, Error, Repository};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::error;

/// One unit of work for the writer task
pub(crate) enum WriteJob {
    /// Persist a stamp
    Save(BinaryStamp),
    /// Acknowledge once everything enqueued before this job has been
    /// attempted
    Flush(oneshot::Sender<()>),
}

/// Spawn the writer task; returns its submission handle.
pub(crate) fn spawn_writer(
    repository: Arc<dyn Repository>,
    errors: Arc<Mutex<Vec<Error>>>,
    batch_size: usize,
) -> mpsc::UnboundedSender<WriteJob> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(writer_loop(repository, rx, errors, batch_size));
    tx
}

async fn writer_loop(
    repository: Arc<dyn Repository>,
    mut rx: mpsc::UnboundedReceiver<WriteJob>,
    errors: Arc<Mutex<Vec<Error>>>,
    batch_size: usize,
) {
    let mut batch: Vec<BinaryStamp> = Vec::new();
    while let Some(job) = rx.recv().await {
        let mut flush_ack = None;
        match job {
            WriteJob::Save(stamp) => {
                batch.push(stamp);
                // Opportunistically batch whatever is already queued,
                // stopping at a flush so its ordering guarantee holds.
                while batch.len() < batch_size && flush_ack.is_none() {
                    match rx.try_recv() {
                        Ok(WriteJob::Save(stamp)) => batch.push(stamp),
                        Ok(WriteJob::Flush(ack)) => flush_ack = Some(ack),
                        Err(_) => break,
                    }
                }
            }
            WriteJob::Flush(ack) => flush_ack = Some(ack),
        }

        for stamp in batch.drain(..) {
            if let Err(err) = repository.save(&stamp).await {
                error!(entity = %stamp.entity, increment = %stamp.increment, error = %err,
                    "asynchronous persistence failed");
                errors.lock().push(err);
            }
        }

        if let Some(ack) = flush_ack {
            // The flusher may have given up waiting; that is its choice.
            let _ = ack.send(());
        }
    }
}
