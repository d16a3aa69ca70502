//! ANSI escape sequence stripping and newline normalization.
//!
//! Terminal output is full of escape codes for colors, cursor movement,
//! and window titles. The detector pattern-matches against clean text, so
//! escape sequences are stripped and CRLF is normalized to LF before any
//! regex runs.

/// Strip ANSI escape sequences from a byte slice, returning clean UTF-8
/// text with carriage returns removed (so `\r\n` becomes `\n`).
///
/// Handles CSI (`ESC [` and bare `0x9B`), OSC (`ESC ]` up to BEL or
/// `ESC \`), and simple two-byte escapes. Non-UTF-8 bytes become the
/// replacement character.
pub fn strip_ansi(input: &[u8]) -> String {
    let mut out = Vec::with_capacity(input.len());
    let mut rest = input;

    while let Some((&byte, tail)) = rest.split_first() {
        rest = match byte {
            0x1B => match tail.split_first() {
                Some((b'[', body)) => skip_csi(body),
                Some((b']', body)) => skip_osc(body),
                // Two-byte escapes (ESC 7, ESC M, ...) and anything odd:
                // drop the byte after ESC.
                Some((_, body)) => body,
                None => break,
            },
            // Bare CSI byte, rare but emitted by some terminals.
            0x9B => skip_csi(tail),
            b'\r' => tail,
            _ => {
                out.push(byte);
                tail
            }
        };
    }

    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Skip a CSI body: parameter and intermediate bytes, then one final byte.
fn skip_csi(body: &[u8]) -> &[u8] {
    let mut i = 0;
    while i < body.len() && (0x20..=0x3F).contains(&body[i]) {
        i += 1;
    }
    if i < body.len() && (0x40..=0x7E).contains(&body[i]) {
        i += 1;
    }
    &body[i..]
}

/// Skip an OSC body up to and including its terminator (BEL or `ESC \`).
fn skip_osc(body: &[u8]) -> &[u8] {
    let mut i = 0;
    while i < body.len() {
        match body[i] {
            0x07 => return &body[i + 1..],
            0x1B if body.get(i + 1) == Some(&b'\\') => return &body[i + 2..],
            _ => i += 1,
        }
    }
    &[]
}
