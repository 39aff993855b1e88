// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Live audit trail capture.
//!
//! [`TrailReader::open`] seeks to the current end of the trail file and
//! spawns a tail task, so a test only ever observes records generated after
//! its own `setup`. The task accumulates appended bytes, frames complete BSM
//! records by the header length field (retrying while a record is only
//! partially flushed), decodes them, and publishes the results on the
//! handle's notification queue. The byte cursor only moves forward; records
//! consumed by a previous test are never re-read.
//!
//! Rotation or deletion of the trail mid-test (detected by inode change, the
//! same check ClawTower uses on audit.log) surfaces as [`ReadError::Closed`].
//! A framing or token error surfaces as [`ReadError::DecodeFailed`] and stops
//! the capture: the byte stream has lost sync and nothing after that point
//! can be trusted.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::TrailConfig;
use crate::errors::ReadError;
use crate::record::{self, DecodedRecord};

const READ_CHUNK: usize = 4096;

/// State shared between the tail task and the handle: the decoded-record
/// queue plus the readiness signal the gate waits on.
pub(crate) struct TrailShared {
    queue: Mutex<VecDeque<Result<DecodedRecord, ReadError>>>,
    pub(crate) notify: Notify,
    closed: AtomicBool,
}

impl TrailShared {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, item: Result<DecodedRecord, ReadError>) {
        let mut queue = self.queue.lock().expect("trail queue mutex poisoned");
        queue.push_back(item);
        drop(queue);
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub(crate) fn has_pending(&self) -> bool {
        let queue = self.queue.lock().expect("trail queue mutex poisoned");
        !queue.is_empty() || self.closed.load(Ordering::SeqCst)
    }

    fn pop(&self) -> Option<Result<DecodedRecord, ReadError>> {
        let mut queue = self.queue.lock().expect("trail queue mutex poisoned");
        queue.pop_front()
    }
}

/// Opens trail handles. Stateless; exists so the open-at-end discipline has
/// one home.
pub struct TrailReader;

impl TrailReader {
    /// Open the trail, seek to its current end, and start capturing.
    ///
    /// The returned handle is exclusively owned by the running test; the
    /// suite serializes tests because the trail is a single global resource.
    /// Must be called from within a tokio runtime.
    pub fn open(config: &TrailConfig) -> Result<TrailHandle, ReadError> {
        let path = config.path.clone();
        let mut file = File::open(&path)?;
        let inode = file.metadata()?.ino();
        let base_offset = file.seek(SeekFrom::End(0))?;
        tracing::debug!(path = %path.display(), base_offset, "trail capture armed");

        let shared = Arc::new(TrailShared::new());
        let task = tokio::spawn(tail_task(
            file,
            path,
            inode,
            base_offset,
            config.poll_interval(),
            Arc::clone(&shared),
        ));

        Ok(TrailHandle {
            shared,
            task,
            base_offset,
        })
    }
}

/// Tail loop: read appended bytes, frame and decode records, publish them.
async fn tail_task(
    mut file: File,
    path: PathBuf,
    inode: u64,
    base_offset: u64,
    poll_interval: Duration,
    shared: Arc<TrailShared>,
) {
    let mut pending: Vec<u8> = Vec::new();
    // Absolute trail offset of the first byte in `pending`.
    let mut record_start = base_offset;
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        match file.read(&mut chunk) {
            Ok(0) => {
                // At EOF. If the path now points at a different inode the
                // trail rotated out from under us; the old fd would read
                // EOF forever.
                match std::fs::metadata(&path) {
                    Ok(meta) if meta.ino() == inode => {}
                    _ => {
                        tracing::warn!(path = %path.display(), "audit trail rotated or removed mid-test");
                        shared.push(Err(ReadError::Closed));
                        shared.close();
                        return;
                    }
                }
                tokio::time::sleep(poll_interval).await;
            }
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                loop {
                    match record::frame_record(&pending) {
                        Ok(Some(len)) => {
                            let raw: Vec<u8> = pending.drain(..len).collect();
                            match record::decode(&raw, record_start) {
                                Ok(rec) => {
                                    tracing::debug!(event = %rec.event, offset = rec.offset, "decoded audit record");
                                    shared.push(Ok(rec));
                                }
                                Err(e) => {
                                    shared.push(Err(e));
                                    shared.close();
                                    return;
                                }
                            }
                            record_start += len as u64;
                        }
                        // Partially flushed record: keep the bytes and retry
                        // once the kernel finishes the write.
                        Ok(None) => break,
                        Err(e) => {
                            shared.push(Err(e));
                            shared.close();
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                shared.push(Err(ReadError::Io(e)));
                shared.close();
                return;
            }
        }
    }
}

/// Exclusive cursor into the live trail for the duration of one test.
///
/// Created by `setup`, released by `cleanup`. Dropping the handle stops the
/// tail task.
pub struct TrailHandle {
    shared: Arc<TrailShared>,
    task: JoinHandle<()>,
    base_offset: u64,
}

impl TrailHandle {
    /// Trail offset recorded at open; no delivered record precedes it.
    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub(crate) fn shared(&self) -> &TrailShared {
        &self.shared
    }

    /// Take the next decoded record off the queue.
    ///
    /// Call [`crate::gate::wait_ready`] first; taking from an empty queue
    /// without a successful wait is a programming error and reports the
    /// trail as closed.
    pub fn next_record(&mut self) -> Result<DecodedRecord, ReadError> {
        match self.shared.pop() {
            Some(item) => item,
            None => Err(ReadError::Closed),
        }
    }

    /// Stop the tail task and drop the capture state.
    pub fn release(self) {
        self.task.abort();
    }
}

impl Drop for TrailHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate;
    use crate::record::{events, RecordBuilder};
    use std::io::Write;

    fn temp_trail() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current");
        std::fs::write(&path, b"").unwrap();
        (dir, path)
    }

    fn trail_config(path: &PathBuf) -> TrailConfig {
        TrailConfig {
            path: path.clone(),
            poll_interval_ms: 10,
        }
    }

    fn append(path: &PathBuf, bytes: &[u8]) {
        let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
    }

    #[tokio::test]
    async fn test_capture_decodes_appended_record() {
        let (_dir, path) = temp_trail();
        let mut handle = TrailReader::open(&trail_config(&path)).unwrap();

        let raw = RecordBuilder::new(events::AUE_MSGGET)
            .subject(1000, 1000, 7)
            .ret_success(42)
            .build();
        append(&path, &raw);

        gate::wait_ready(&handle, Duration::from_secs(5)).await.unwrap();
        let rec = handle.next_record().unwrap();
        assert_eq!(rec.event, "msgget(2)");
        assert!(rec.line.contains("return,success,42"));
    }

    #[tokio::test]
    async fn test_open_skips_preexisting_records() {
        let (_dir, path) = temp_trail();
        let old = RecordBuilder::new(events::AUE_SOCKET).ret_success(1).build();
        append(&path, &old);

        let mut handle = TrailReader::open(&trail_config(&path)).unwrap();
        assert_eq!(handle.base_offset(), old.len() as u64);

        let new = RecordBuilder::new(events::AUE_BIND).ret_success(0).build();
        append(&path, &new);

        gate::wait_ready(&handle, Duration::from_secs(5)).await.unwrap();
        let rec = handle.next_record().unwrap();
        // Only the record appended after open is visible, at its true offset.
        assert_eq!(rec.event, "bind(2)");
        assert_eq!(rec.offset, old.len() as u64);
        assert!(rec.offset >= handle.base_offset());
    }

    #[tokio::test]
    async fn test_partial_write_is_retried_not_truncated() {
        let (_dir, path) = temp_trail();
        let mut handle = TrailReader::open(&trail_config(&path)).unwrap();

        let raw = RecordBuilder::new(events::AUE_SEMGET)
            .subject(0, 0, 1)
            .ret_success(3)
            .build();
        let split = raw.len() / 2;
        append(&path, &raw[..split]);
        // Give the tail task a chance to observe the half-flushed record.
        tokio::time::sleep(Duration::from_millis(50)).await;
        append(&path, &raw[split..]);

        gate::wait_ready(&handle, Duration::from_secs(5)).await.unwrap();
        let rec = handle.next_record().unwrap();
        assert_eq!(rec.event, "semget(2)");
        assert!(rec.line.ends_with(&format!("trailer,{}", raw.len())));
    }

    #[tokio::test]
    async fn test_cursor_is_monotonic_across_records() {
        let (_dir, path) = temp_trail();
        let mut handle = TrailReader::open(&trail_config(&path)).unwrap();

        let first = RecordBuilder::new(events::AUE_MSGSND).ret_success(0).build();
        let second = RecordBuilder::new(events::AUE_MSGRCV).ret_success(5).build();
        append(&path, &first);
        append(&path, &second);

        gate::wait_ready(&handle, Duration::from_secs(5)).await.unwrap();
        let a = handle.next_record().unwrap();
        gate::wait_ready(&handle, Duration::from_secs(5)).await.unwrap();
        let b = handle.next_record().unwrap();

        assert!(a.offset >= handle.base_offset());
        assert!(b.offset > a.offset);
        assert_eq!(b.offset, a.offset + first.len() as u64);
    }

    #[tokio::test]
    async fn test_garbage_bytes_surface_as_decode_failure() {
        let (_dir, path) = temp_trail();
        let mut handle = TrailReader::open(&trail_config(&path)).unwrap();

        append(&path, &[0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);

        gate::wait_ready(&handle, Duration::from_secs(5)).await.unwrap();
        assert!(matches!(
            handle.next_record(),
            Err(ReadError::DecodeFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_deleted_trail_surfaces_as_closed() {
        let (_dir, path) = temp_trail();
        let mut handle = TrailReader::open(&trail_config(&path)).unwrap();

        std::fs::remove_file(&path).unwrap();

        gate::wait_ready(&handle, Duration::from_secs(5)).await.unwrap();
        assert!(matches!(handle.next_record(), Err(ReadError::Closed)));
    }

    #[tokio::test]
    async fn test_missing_trail_fails_open() {
        let config = TrailConfig {
            path: PathBuf::from("/nonexistent/audit/current"),
            poll_interval_ms: 10,
        };
        assert!(TrailReader::open(&config).is_err());
    }
}
