//! Mailbox wire layout
//! -------------------
//! The broadcast facility shares one fixed, legacy mailbox between every
//! producer on the machine and the single consumer:
//!
//!   ┌── 0          4                        view (512) ──┐
//!   │ u32 pid (LE) │ ASCII text, NUL-terminated, ...     │
//!   └──────────────────────────────────────────────────────┘
//!
//! The backing section is 4096 bytes; the consumer maps only the first
//! 512 read-only. Text that would overrun the view is truncated silently.
//! No versioning, no checksum: the format is fixed and must not change.

use serde::Serialize;

/// Machine-wide singleton lock. Its existence is the "a consumer is
/// already running" signal.
pub const MUTEX_NAME: &str = "DBWinMutex";
/// Consumer -> producers: "mailbox free, I am listening".
pub const ACK_EVENT_NAME: &str = "DBWIN_BUFFER_READY";
/// Producers -> consumer: "data is in the mailbox". Also reused as the
/// shutdown wake.
pub const DATA_EVENT_NAME: &str = "DBWIN_DATA_READY";
/// The shared-memory mailbox.
pub const SECTION_NAME: &str = "DBWIN_BUFFER";

/// Size of the section's backing allocation.
pub const BACKING_SIZE: usize = 4096;
/// Size of the consumer's read-only view.
pub const VIEW_SIZE: usize = 512;
/// Text starts right after the pid header.
pub const TEXT_OFFSET: usize = 4;
/// Longest text the consumer can observe.
pub const TEXT_CAPACITY: usize = VIEW_SIZE - TEXT_OFFSET;

/// One captured record: which process said what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugEvent {
    pub pid: u32,
    pub text: String,
}

/// Decode a copied mailbox frame. Returns `None` when the frame cannot
/// even hold the pid header (never the case for a real view).
pub fn decode(frame: &[u8]) -> Option<DebugEvent> {
    if frame.len() < TEXT_OFFSET {
        return None;
    }
    let pid = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    let payload = &frame[TEXT_OFFSET..];
    // NUL-terminated; a missing terminator means the producer filled the
    // whole view and the text is already truncated.
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    let text = String::from_utf8_lossy(&payload[..end]).into_owned();
    Some(DebugEvent { pid, text })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(pid: u32, text: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; VIEW_SIZE];
        frame[..4].copy_from_slice(&pid.to_le_bytes());
        frame[TEXT_OFFSET..TEXT_OFFSET + text.len()].copy_from_slice(text);
        frame
    }

    #[test]
    fn decodes_pid_and_text() {
        let frame = frame_with(4321, b"boot sequence complete\0");
        let event = decode(&frame).unwrap();
        assert_eq!(event.pid, 4321);
        assert_eq!(event.text, "boot sequence complete");
    }

    #[test]
    fn pid_is_little_endian() {
        let mut frame = vec![0u8; VIEW_SIZE];
        frame[..4].copy_from_slice(&[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(decode(&frame).unwrap().pid, 0x0403_0201);
    }

    #[test]
    fn stops_at_first_nul() {
        let frame = frame_with(7, b"visible\0hidden");
        assert_eq!(decode(&frame).unwrap().text, "visible");
    }

    #[test]
    fn missing_terminator_takes_the_full_capacity() {
        let mut frame = vec![0u8; VIEW_SIZE];
        frame[..4].copy_from_slice(&9u32.to_le_bytes());
        for b in frame[TEXT_OFFSET..].iter_mut() {
            *b = b'x';
        }
        let event = decode(&frame).unwrap();
        assert_eq!(event.text.len(), TEXT_CAPACITY);
    }

    #[test]
    fn empty_text_decodes_empty() {
        let frame = frame_with(1, b"\0");
        assert_eq!(decode(&frame).unwrap().text, "");
    }

    #[test]
    fn frame_shorter_than_header_is_rejected() {
        assert!(decode(&[0, 1]).is_none());
    }
}
