//! Translation of inbound chat text into PTY byte writes.
//!
//! Messages are split on whitespace and processed token by token. Modifier
//! tokens (`/c`, `/a`, `/s`) attach to the next non-modifier token; named
//! keys come from a data table so `/help` can be generated from the same
//! source; everything else is literal text.

const ESC: u8 = 0x1b;

/// Ceiling on the translated payload of a single message.
pub const INPUT_BYTE_CEILING: usize = 4096;

/// Appended where an over-ceiling payload was cut.
const INPUT_TRIM_MARKER: &str = "…";

#[derive(Clone, Copy)]
enum KeyKind {
    /// Fixed byte sequence, not modifier-parameterizable.
    Seq(&'static [u8]),
    /// `ESC [ <x>` cursor key; modified form `ESC [ 1 ; m <x>`.
    CsiLetter(u8),
    /// `ESC [ <n> ~` editing key; modified form `ESC [ <n> ; m ~`.
    CsiTilde(u8),
    /// `ESC O <x>` function key; modified form `ESC [ 1 ; m <x>`.
    Ss3(u8),
}

struct KeyDef {
    token: &'static str,
    kind: KeyKind,
    help: &'static str,
}

const KEYS: &[KeyDef] = &[
    KeyDef { token: "/enter", kind: KeyKind::Seq(b"\r"), help: "Enter" },
    KeyDef { token: "/esc", kind: KeyKind::Seq(b"\x1b"), help: "Escape" },
    KeyDef { token: "/t", kind: KeyKind::Seq(b"\t"), help: "Tab" },
    KeyDef { token: "/b", kind: KeyKind::Seq(b"\x7f"), help: "Backspace" },
    KeyDef { token: "/d", kind: KeyKind::CsiTilde(3), help: "Delete" },
    KeyDef { token: "/up", kind: KeyKind::CsiLetter(b'A'), help: "Up arrow" },
    KeyDef { token: "/down", kind: KeyKind::CsiLetter(b'B'), help: "Down arrow" },
    KeyDef { token: "/right", kind: KeyKind::CsiLetter(b'C'), help: "Right arrow" },
    KeyDef { token: "/left", kind: KeyKind::CsiLetter(b'D'), help: "Left arrow" },
    KeyDef { token: "/home", kind: KeyKind::CsiLetter(b'H'), help: "Home" },
    KeyDef { token: "/end", kind: KeyKind::CsiLetter(b'F'), help: "End" },
    KeyDef { token: "/pageup", kind: KeyKind::CsiTilde(5), help: "Page Up" },
    KeyDef { token: "/pagedown", kind: KeyKind::CsiTilde(6), help: "Page Down" },
    KeyDef { token: "/insert", kind: KeyKind::CsiTilde(2), help: "Insert" },
    KeyDef { token: "/f1", kind: KeyKind::Ss3(b'P'), help: "F1" },
    KeyDef { token: "/f2", kind: KeyKind::Ss3(b'Q'), help: "F2" },
    KeyDef { token: "/f3", kind: KeyKind::Ss3(b'R'), help: "F3" },
    KeyDef { token: "/f4", kind: KeyKind::Ss3(b'S'), help: "F4" },
    KeyDef { token: "/f5", kind: KeyKind::CsiTilde(15), help: "F5" },
    KeyDef { token: "/f6", kind: KeyKind::CsiTilde(17), help: "F6" },
    KeyDef { token: "/f7", kind: KeyKind::CsiTilde(18), help: "F7" },
    KeyDef { token: "/f8", kind: KeyKind::CsiTilde(19), help: "F8" },
    KeyDef { token: "/f9", kind: KeyKind::CsiTilde(20), help: "F9" },
    KeyDef { token: "/f10", kind: KeyKind::CsiTilde(21), help: "F10" },
    KeyDef { token: "/f11", kind: KeyKind::CsiTilde(23), help: "F11" },
    KeyDef { token: "/f12", kind: KeyKind::CsiTilde(24), help: "F12" },
];

#[derive(Clone, Copy, Default, PartialEq, Eq)]
struct Modifiers {
    ctrl: bool,
    alt: bool,
    shift: bool,
}

impl Modifiers {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "/c" => Some(Self { ctrl: true, ..Self::default() }),
            "/a" => Some(Self { alt: true, ..Self::default() }),
            "/s" => Some(Self { shift: true, ..Self::default() }),
            _ => None,
        }
    }

    fn merge(self, other: Self) -> Self {
        Self {
            ctrl: self.ctrl || other.ctrl,
            alt: self.alt || other.alt,
            shift: self.shift || other.shift,
        }
    }

    fn is_empty(self) -> bool {
        self == Self::default()
    }

    /// xterm modifier parameter: 1 + shift(1) + alt(2) + ctrl(4).
    fn xterm_param(self) -> u8 {
        1 + u8::from(self.shift) + 2 * u8::from(self.alt) + 4 * u8::from(self.ctrl)
    }
}

fn lookup(token: &str) -> Option<&'static KeyDef> {
    KEYS.iter().find(|def| def.token == token)
}

fn emit_key(out: &mut Vec<u8>, kind: KeyKind, mods: Modifiers) {
    if mods.is_empty() {
        match kind {
            KeyKind::Seq(bytes) => out.extend_from_slice(bytes),
            KeyKind::CsiLetter(x) => out.extend_from_slice(&[ESC, b'[', x]),
            KeyKind::CsiTilde(n) => {
                out.push(ESC);
                out.push(b'[');
                out.extend_from_slice(n.to_string().as_bytes());
                out.push(b'~');
            }
            KeyKind::Ss3(x) => out.extend_from_slice(&[ESC, b'O', x]),
        }
        return;
    }
    let param = mods.xterm_param();
    match kind {
        // No standard modified form; best effort is the base sequence.
        KeyKind::Seq(bytes) => out.extend_from_slice(bytes),
        KeyKind::CsiLetter(x) | KeyKind::Ss3(x) => {
            out.extend_from_slice(format!("\x1b[1;{param}").as_bytes());
            out.push(x);
        }
        KeyKind::CsiTilde(n) => {
            out.extend_from_slice(format!("\x1b[{n};{param}~").as_bytes());
        }
    }
}

fn emit_literal(out: &mut Vec<u8>, token: &str, mods: Modifiers) {
    let mut chars = token.chars();
    let (first, rest) = (chars.next(), chars.as_str());
    let single_letter = rest.is_empty() && first.is_some_and(|c| c.is_ascii_alphabetic());

    if single_letter {
        let mut c = first.unwrap_or_default();
        if mods.shift {
            c = c.to_ascii_uppercase();
        }
        if mods.alt {
            out.push(ESC);
        }
        if mods.ctrl {
            out.push(c.to_ascii_uppercase() as u8 & 0x1f);
        } else {
            out.push(c as u8);
        }
        return;
    }

    // Ctrl and Shift have no meaning on multi-character text; Alt still
    // works as an ESC prefix.
    if mods.alt {
        out.push(ESC);
    }
    out.extend_from_slice(token.as_bytes());
}

/// Result of translating one inbound message.
pub struct Translation {
    /// Byte writes to issue, in order. The payload is a single write; the
    /// optional submit `\r` is a separate one so TUIs see the edge.
    pub writes: Vec<Vec<u8>>,
    /// Whether the payload hit [`INPUT_BYTE_CEILING`] and was cut.
    pub truncated: bool,
}

/// Translates chat text into PTY writes. `append_enter` adds the trailing
/// `\r` write after the payload.
pub fn translate(text: &str, append_enter: bool) -> Translation {
    let mut payload = Vec::with_capacity(text.len());
    let mut pending = Modifiers::default();
    let mut last_was_literal = false;

    for token in text.split_whitespace() {
        if let Some(mods) = Modifiers::parse(token) {
            pending = pending.merge(mods);
            continue;
        }
        let mods = std::mem::take(&mut pending);
        if let Some(def) = lookup(token) {
            emit_key(&mut payload, def.kind, mods);
            last_was_literal = false;
        } else {
            if last_was_literal {
                payload.push(b' ');
            }
            emit_literal(&mut payload, token, mods);
            last_was_literal = mods.is_empty() || !mods.ctrl;
        }
    }

    let truncated = payload.len() > INPUT_BYTE_CEILING;
    if truncated {
        let mut cut = INPUT_BYTE_CEILING;
        // Back off to a UTF-8 boundary before placing the marker.
        while cut > 0 && payload[cut] & 0xc0 == 0x80 {
            cut -= 1;
        }
        payload.truncate(cut);
        payload.extend_from_slice(INPUT_TRIM_MARKER.as_bytes());
    }

    let mut writes = Vec::with_capacity(2);
    if !payload.is_empty() {
        writes.push(payload);
    }
    if append_enter {
        writes.push(b"\r".to_vec());
    }
    Translation { writes, truncated }
}

/// Key reference sent in reply to `/help`, generated from the key table.
pub fn help_text() -> String {
    let mut out = String::from(
        "Key tokens (whitespace-separated):\n\
         /c Ctrl, /a Alt, /s Shift — apply to the next token\n",
    );
    for def in KEYS {
        out.push_str(&format!("{} — {}\n", def.token, def.help));
    }
    out.push_str(
        "Anything else is sent as literal text.\n\
         /quit ends the session, /help shows this message.",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn payload(text: &str) -> Vec<u8> {
        let translation = translate(text, false);
        translation.writes.into_iter().next().unwrap_or_default()
    }

    #[test]
    fn literal_text_with_enter() {
        let translation = translate("hello", true);
        assert_eq!(
            translation.writes,
            vec![b"hello".to_vec(), b"\r".to_vec()]
        );
        assert!(!translation.truncated);
    }

    #[test]
    fn literal_tokens_are_space_joined() {
        assert_eq!(payload("ls -l /tmp"), b"ls -l /tmp".to_vec());
    }

    #[test]
    fn no_enter_means_single_write() {
        let translation = translate("hello", false);
        assert_eq!(translation.writes, vec![b"hello".to_vec()]);
    }

    #[test]
    fn empty_message_still_submits() {
        let translation = translate("   ", true);
        assert_eq!(translation.writes, vec![b"\r".to_vec()]);
    }

    #[test]
    fn named_keys_emit_their_sequences() {
        assert_eq!(payload("/enter"), b"\r".to_vec());
        assert_eq!(payload("/up"), b"\x1b[A".to_vec());
        assert_eq!(payload("/d"), b"\x1b[3~".to_vec());
        assert_eq!(payload("/f1"), b"\x1bOP".to_vec());
        assert_eq!(payload("/f5"), b"\x1b[15~".to_vec());
        assert_eq!(payload("/b"), b"\x7f".to_vec());
    }

    #[test]
    fn ctrl_letter_becomes_control_code() {
        assert_eq!(payload("/c c"), vec![0x03]);
        assert_eq!(payload("/c a"), vec![0x01]);
    }

    #[test]
    fn alt_letter_is_esc_prefixed() {
        assert_eq!(payload("/a x"), b"\x1bx".to_vec());
    }

    #[test]
    fn shift_uppercases_a_letter() {
        assert_eq!(payload("/s a"), b"A".to_vec());
    }

    #[test]
    fn modifier_stacking_is_order_independent() {
        assert_eq!(payload("/c /s a"), payload("/s /c a"));
        assert_eq!(payload("/c /a /up"), payload("/a /c /up"));
    }

    #[test]
    fn ctrl_up_uses_xterm_parameterized_form() {
        assert_eq!(payload("/c /up"), b"\x1b[1;5A".to_vec());
    }

    #[test]
    fn shift_pageup_parameterizes_the_tilde_form() {
        assert_eq!(payload("/s /pageup"), b"\x1b[5;2~".to_vec());
    }

    #[test]
    fn modified_function_key_switches_to_csi() {
        assert_eq!(payload("/c /f1"), b"\x1b[1;5P".to_vec());
    }

    #[test]
    fn modifier_on_fixed_key_is_dropped() {
        assert_eq!(payload("/c /enter"), b"\r".to_vec());
    }

    #[test]
    fn ctrl_on_word_is_dropped() {
        assert_eq!(payload("/c hello"), b"hello".to_vec());
    }

    #[test]
    fn trailing_modifier_is_dropped() {
        assert_eq!(payload("abc /c"), b"abc".to_vec());
    }

    #[test]
    fn literal_only_translation_is_idempotent() {
        let first = payload("echo hi there");
        let rendered = String::from_utf8(first.clone()).unwrap();
        assert_eq!(payload(&rendered), first);
    }

    #[test]
    fn oversize_payload_is_truncated_with_marker() {
        let big = "x".repeat(INPUT_BYTE_CEILING + 100);
        let translation = translate(&big, false);
        assert!(translation.truncated);
        let bytes = &translation.writes[0];
        assert!(bytes.len() <= INPUT_BYTE_CEILING + INPUT_TRIM_MARKER.len());
        assert!(bytes.ends_with(INPUT_TRIM_MARKER.as_bytes()));
    }

    #[test]
    fn help_lists_every_key_token() {
        let help = help_text();
        for def in KEYS {
            assert!(help.contains(def.token), "missing {}", def.token);
        }
    }
}
