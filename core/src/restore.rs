//! Process-wide terminal restoration.
//!
//! Restoration is inherently global: it must run exactly once, on every
//! exit path including panics, after the child may have left the host
//! terminal in alternate-screen or mouse-tracking mode. [`init`] installs
//! the panic hook; [`teardown`] (or the hook) performs the restoration.

use std::io::Write;
use std::panic;
use std::sync::OnceLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Emitted on exit: leave the alternate screen, disable mouse tracking
/// modes 1000/1002/1003/1006, reset attributes, show the cursor, clear
/// the screen, home the cursor.
pub const RESTORE_SEQUENCE: &[u8] =
    b"\x1b[?1049l\x1b[?1000l\x1b[?1002l\x1b[?1003l\x1b[?1006l\x1b[0m\x1b[?25h\x1b[2J\x1b[H";

/// Delay before flushing host stdin, letting any in-flight mouse-report
/// bytes from the child arrive first.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

static ENABLED: AtomicBool = AtomicBool::new(true);
static RESTORED: AtomicBool = AtomicBool::new(false);
static PANIC_HOOK: OnceLock<()> = OnceLock::new();

/// Arms the module. `enabled` is false when the bridge never touches the
/// host terminal (mirroring suppressed), in which case restoration is a
/// no-op.
pub fn init(enabled: bool) {
    ENABLED.store(enabled, Ordering::SeqCst);
    PANIC_HOOK.get_or_init(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            restore_terminal();
            previous(info);
        }));
    });
}

/// Runs the restoration once. Safe to call from any exit path.
pub fn teardown() {
    restore_terminal();
}

fn restore_terminal() {
    if !ENABLED.load(Ordering::SeqCst) || RESTORED.swap(true, Ordering::SeqCst) {
        return;
    }

    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(RESTORE_SEQUENCE);
    let _ = stdout.flush();

    // The child may still have mouse-tracking CSI bytes in flight toward
    // our stdin; wait for them, then discard pending input.
    std::thread::sleep(SETTLE_DELAY);
    unsafe {
        libc::tcflush(libc::STDIN_FILENO, libc::TCIFLUSH);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_sequence_has_the_required_parts_in_order() {
        let seq = RESTORE_SEQUENCE;
        let parts: &[&[u8]] = &[
            b"\x1b[?1049l",
            b"\x1b[?1000l",
            b"\x1b[?1002l",
            b"\x1b[?1003l",
            b"\x1b[?1006l",
            b"\x1b[0m",
            b"\x1b[?25h",
            b"\x1b[2J",
            b"\x1b[H",
        ];
        let mut offset = 0;
        for part in parts {
            let pos = seq[offset..]
                .windows(part.len())
                .position(|w| w == *part)
                .expect("part present in order");
            offset += pos + part.len();
        }
        assert_eq!(offset, seq.len());
    }
}
