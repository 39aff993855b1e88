// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! BSM audit record decoding.
//!
//! The kernel writes binary BSM records to the trail: a header token with the
//! record length and event number, then subject, argument, path, text and IPC
//! tokens, then a return token and a trailer. [`decode`] translates one
//! complete record into the canonical one-line text form (tokens comma-joined,
//! the shape `praudit -l` produces), which is what expected patterns match
//! against.
//!
//! [`RecordBuilder`] is the inverse: it synthesizes well-formed binary records
//! so fixtures and tests can simulate the kernel appending to a trail file.

use crate::errors::ReadError;

// BSM token ids.
const AUT_TRAILER: u8 = 0x13;
const AUT_HEADER32: u8 = 0x14;
const AUT_IPC: u8 = 0x22;
const AUT_PATH: u8 = 0x23;
const AUT_SUBJECT32: u8 = 0x24;
const AUT_RETURN32: u8 = 0x27;
const AUT_TEXT: u8 = 0x28;
const AUT_ARG32: u8 = 0x2d;

const TRAILER_MAGIC: u16 = 0xb105;
const HEADER_SIZE: usize = 18;
const TRAILER_SIZE: usize = 7;

/// Records larger than this are treated as framing corruption rather than
/// waited for indefinitely.
const MAX_RECORD_SIZE: u32 = 65536;

/// Audit event numbers the harness decodes, covering the System V IPC,
/// socket, pipe, and pseudo-terminal suites.
pub mod events {
    pub const AUE_CONNECT: u16 = 32;
    pub const AUE_ACCEPT: u16 = 33;
    pub const AUE_BIND: u16 = 34;
    pub const AUE_SETSOCKOPT: u16 = 35;
    pub const AUE_SHUTDOWN: u16 = 46;
    pub const AUE_PIPE: u16 = 77;
    pub const AUE_MSGCTL: u16 = 84;
    pub const AUE_MSGGET: u16 = 88;
    pub const AUE_MSGRCV: u16 = 89;
    pub const AUE_MSGSND: u16 = 90;
    pub const AUE_SHMAT: u16 = 96;
    pub const AUE_SHMCTL: u16 = 97;
    pub const AUE_SHMDT: u16 = 98;
    pub const AUE_SHMGET: u16 = 100;
    pub const AUE_SEMGET: u16 = 109;
    pub const AUE_SEMOP: u16 = 110;
    pub const AUE_SEMCTL: u16 = 111;
    pub const AUE_LISTEN: u16 = 118;
    pub const AUE_SOCKET: u16 = 183;
    pub const AUE_SENDTO: u16 = 184;
    pub const AUE_SOCKETPAIR: u16 = 216;
    pub const AUE_RECVFROM: u16 = 217;
    pub const AUE_RECVMSG: u16 = 218;
    pub const AUE_SENDMSG: u16 = 219;
    pub const AUE_POSIX_OPENPT: u16 = 621;
}

fn event_name(event: u16) -> String {
    use events::*;
    let name = match event {
        AUE_CONNECT => "connect(2)",
        AUE_ACCEPT => "accept(2)",
        AUE_BIND => "bind(2)",
        AUE_SETSOCKOPT => "setsockopt(2)",
        AUE_SHUTDOWN => "shutdown(2)",
        AUE_PIPE => "pipe(2)",
        AUE_MSGCTL => "msgctl(2)",
        AUE_MSGGET => "msgget(2)",
        AUE_MSGRCV => "msgrcv(2)",
        AUE_MSGSND => "msgsnd(2)",
        AUE_SHMAT => "shmat(2)",
        AUE_SHMCTL => "shmctl(2)",
        AUE_SHMDT => "shmdt(2)",
        AUE_SHMGET => "shmget(2)",
        AUE_SEMGET => "semget(2)",
        AUE_SEMOP => "semop(2)",
        AUE_SEMCTL => "semctl(2)",
        AUE_LISTEN => "listen(2)",
        AUE_SOCKET => "socket(2)",
        AUE_SENDTO => "sendto(2)",
        AUE_SOCKETPAIR => "socketpair(2)",
        AUE_RECVFROM => "recvfrom(2)",
        AUE_RECVMSG => "recvmsg(2)",
        AUE_SENDMSG => "sendmsg(2)",
        AUE_POSIX_OPENPT => "posix_openpt(2)",
        _ => return format!("event {}", event),
    };
    name.to_string()
}

/// Errno rendering for the failure form of the return token.
fn errno_text(errno: u8) -> String {
    let text = match errno {
        1 => "Operation not permitted",
        2 => "No such file or directory",
        7 => "Argument list too long",
        9 => "Bad file descriptor",
        11 => "Resource temporarily unavailable",
        12 => "Cannot allocate memory",
        13 => "Permission denied",
        17 => "File exists",
        22 => "Invalid argument",
        24 => "Too many open files",
        28 => "No space left on device",
        34 => "Result too large",
        40 => "Message too long",
        43 => "Protocol not supported",
        82 => "Identifier removed",
        _ => return format!("Unknown error: {}", errno),
    };
    text.to_string()
}

/// IPC object types carried by the IPC token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcKind {
    Message,
    Semaphore,
    SharedMemory,
}

impl IpcKind {
    fn code(self) -> u8 {
        match self {
            IpcKind::Message => 1,
            IpcKind::Semaphore => 2,
            IpcKind::SharedMemory => 4,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(IpcKind::Message),
            2 => Some(IpcKind::Semaphore),
            4 => Some(IpcKind::SharedMemory),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            IpcKind::Message => "Message IPC",
            IpcKind::Semaphore => "Semaphore IPC",
            IpcKind::SharedMemory => "Shared Memory IPC",
        }
    }
}

/// One decoded audit record: the canonical text line plus the event name and
/// the trail byte offset where the record started.
#[derive(Debug, Clone)]
pub struct DecodedRecord {
    /// Absolute offset of the record's first byte in the trail.
    pub offset: u64,
    /// Event name from the header token (e.g. "msgget(2)").
    pub event: String,
    /// Full one-line text rendering, tokens comma-joined.
    pub line: String,
}

/// Byte cursor over one record with bounds-checked reads.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ReadError> {
        if self.remaining() < n {
            return Err(ReadError::DecodeFailed(format!(
                "record truncated at byte {} (wanted {} more)",
                self.pos, n
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ReadError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ReadError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ReadError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// NUL-terminated string with a leading u16 length (length includes the
    /// NUL, as BSM encodes it).
    fn string(&mut self) -> Result<String, ReadError> {
        let len = self.u16()? as usize;
        if len == 0 {
            return Err(ReadError::DecodeFailed("zero-length string token".into()));
        }
        let bytes = self.take(len)?;
        let text = &bytes[..len - 1];
        String::from_utf8(text.to_vec())
            .map_err(|_| ReadError::DecodeFailed("non-UTF-8 string token".into()))
    }
}

/// Framing: how many bytes the record at the head of `buf` occupies.
///
/// Returns `Ok(None)` while the record is only partially flushed, so the
/// trail reader retries instead of decoding a truncated record.
pub(crate) fn frame_record(buf: &[u8]) -> Result<Option<usize>, ReadError> {
    if buf.len() < 5 {
        return Ok(None);
    }
    if buf[0] != AUT_HEADER32 {
        return Err(ReadError::DecodeFailed(format!(
            "expected header token, found {:#04x}",
            buf[0]
        )));
    }
    let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    if len < (HEADER_SIZE + TRAILER_SIZE) as u32 || len > MAX_RECORD_SIZE {
        return Err(ReadError::DecodeFailed(format!(
            "implausible record length {}",
            len
        )));
    }
    if buf.len() < len as usize {
        return Ok(None);
    }
    Ok(Some(len as usize))
}

fn render_uid(id: u32) -> String {
    // praudit prints the unset audit id as -1
    if id == u32::MAX {
        "-1".to_string()
    } else {
        id.to_string()
    }
}

/// Decode one complete binary record into its canonical text line.
pub fn decode(buf: &[u8], offset: u64) -> Result<DecodedRecord, ReadError> {
    let mut cur = Cursor::new(buf);
    let mut tokens: Vec<String> = Vec::new();
    let mut event = String::new();

    while cur.remaining() > 0 {
        let id = cur.u8()?;
        match id {
            AUT_HEADER32 => {
                let len = cur.u32()?;
                let version = cur.u8()?;
                let ev = cur.u16()?;
                let modifier = cur.u16()?;
                let sec = cur.u32()?;
                let msec = cur.u32()?;
                event = event_name(ev);
                let when = chrono::DateTime::from_timestamp(sec as i64, 0)
                    .map(|t| t.format("%a %b %e %H:%M:%S %Y").to_string())
                    .unwrap_or_else(|| sec.to_string());
                tokens.push(format!(
                    "header,{},{},{},{},{}, + {} msec",
                    len, version, event, modifier, when, msec
                ));
            }
            AUT_SUBJECT32 => {
                let auid = cur.u32()?;
                let euid = cur.u32()?;
                let egid = cur.u32()?;
                let ruid = cur.u32()?;
                let rgid = cur.u32()?;
                let pid = cur.u32()?;
                let sid = cur.u32()?;
                let port = cur.u32()?;
                let addr = cur.u32()?;
                tokens.push(format!(
                    "subject,{},{},{},{},{},{},{},{},{}.{}.{}.{}",
                    render_uid(auid),
                    render_uid(euid),
                    render_uid(egid),
                    render_uid(ruid),
                    render_uid(rgid),
                    pid,
                    sid,
                    port,
                    (addr >> 24) & 0xff,
                    (addr >> 16) & 0xff,
                    (addr >> 8) & 0xff,
                    addr & 0xff
                ));
            }
            AUT_ARG32 => {
                let num = cur.u8()?;
                let val = cur.u32()?;
                let desc = cur.string()?;
                tokens.push(format!("argument,{},{:#x},{}", num, val, desc));
            }
            AUT_TEXT => {
                let text = cur.string()?;
                tokens.push(format!("text,{}", text));
            }
            AUT_PATH => {
                let path = cur.string()?;
                tokens.push(format!("path,{}", path));
            }
            AUT_IPC => {
                let code = cur.u8()?;
                let ipc_id = cur.u32()?;
                let label = IpcKind::from_code(code)
                    .map(IpcKind::label)
                    .ok_or_else(|| {
                        ReadError::DecodeFailed(format!("unknown IPC object type {}", code))
                    })?;
                tokens.push(format!("IPC,{},{}", label, ipc_id));
            }
            AUT_RETURN32 => {
                let errno = cur.u8()?;
                let val = cur.u32()?;
                if errno == 0 {
                    tokens.push(format!("return,success,{}", val));
                } else {
                    tokens.push(format!("return,failure : {}", errno_text(errno)));
                }
            }
            AUT_TRAILER => {
                let magic = cur.u16()?;
                if magic != TRAILER_MAGIC {
                    return Err(ReadError::DecodeFailed(format!(
                        "bad trailer magic {:#06x}",
                        magic
                    )));
                }
                let len = cur.u32()?;
                tokens.push(format!("trailer,{}", len));
            }
            other => {
                return Err(ReadError::DecodeFailed(format!(
                    "unknown token id {:#04x} at byte {}",
                    other,
                    cur.pos - 1
                )));
            }
        }
    }

    if event.is_empty() {
        return Err(ReadError::DecodeFailed("record without header token".into()));
    }

    Ok(DecodedRecord {
        offset,
        event,
        line: tokens.join(","),
    })
}

/// Builds well-formed binary records, the mirror of [`decode`].
///
/// Used by fixtures and tests to play the kernel's role against a trail
/// file. Token order follows what the kernel emits: header, arguments and
/// object tokens, subject, return, trailer.
pub struct RecordBuilder {
    event: u16,
    body: Vec<u8>,
}

impl RecordBuilder {
    pub fn new(event: u16) -> Self {
        Self {
            event,
            body: Vec::new(),
        }
    }

    fn push_string(&mut self, s: &str) {
        self.body
            .extend_from_slice(&((s.len() + 1) as u16).to_be_bytes());
        self.body.extend_from_slice(s.as_bytes());
        self.body.push(0);
    }

    pub fn arg(mut self, num: u8, value: u32, desc: &str) -> Self {
        self.body.push(AUT_ARG32);
        self.body.push(num);
        self.body.extend_from_slice(&value.to_be_bytes());
        self.push_string(desc);
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.body.push(AUT_TEXT);
        self.push_string(text);
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.body.push(AUT_PATH);
        self.push_string(path);
        self
    }

    pub fn ipc(mut self, kind: IpcKind, id: u32) -> Self {
        self.body.push(AUT_IPC);
        self.body.push(kind.code());
        self.body.extend_from_slice(&id.to_be_bytes());
        self
    }

    pub fn subject(mut self, auid: u32, euid: u32, pid: u32) -> Self {
        self.body.push(AUT_SUBJECT32);
        for field in [auid, euid, euid, euid, euid, pid, pid, 0, 0] {
            self.body.extend_from_slice(&field.to_be_bytes());
        }
        self
    }

    pub fn ret_success(mut self, value: u32) -> Self {
        self.body.push(AUT_RETURN32);
        self.body.push(0);
        self.body.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn ret_failure(mut self, errno: u8, value: u32) -> Self {
        self.body.push(AUT_RETURN32);
        self.body.push(errno);
        self.body.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Assemble header + body + trailer with a current timestamp.
    pub fn build(self) -> Vec<u8> {
        let total = (HEADER_SIZE + self.body.len() + TRAILER_SIZE) as u32;
        let now = chrono::Utc::now();
        let mut out = Vec::with_capacity(total as usize);

        out.push(AUT_HEADER32);
        out.extend_from_slice(&total.to_be_bytes());
        out.push(11); // record version
        out.extend_from_slice(&self.event.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&(now.timestamp() as u32).to_be_bytes());
        out.extend_from_slice(&(now.timestamp_subsec_millis()).to_be_bytes());

        out.extend_from_slice(&self.body);

        out.push(AUT_TRAILER);
        out.extend_from_slice(&TRAILER_MAGIC.to_be_bytes());
        out.extend_from_slice(&total.to_be_bytes());
        out
    }
}
