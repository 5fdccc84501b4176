//! Hex and ASCII rendering of raw packets, for tracing wire traffic.

use std::fmt;

const BYTES_PER_LINE: usize = 16;
const GROUP: usize = 8;
const INDENT: &str = "     ";
const RULE: &str = "-------------------------------------------------------------------------------";

/// Displays a byte buffer as a framed hex dump.
///
/// Each line holds 16 bytes split in two groups of 8, followed by the printable ASCII
/// characters of the line. Non printable bytes are shown as `.`.
///
/// ```
/// use swerve_portmapper::hexdump::HexDump;
///
/// let dump = HexDump(b"swerve").to_string();
/// assert!(dump.contains("73 77 65 72 76 65"));
/// assert!(dump.contains("|  swerve"));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        hexdump(self.0, f)
    }
}

/// Writes the hex dump of `buf` to `out`.
pub fn hexdump<W: fmt::Write + ?Sized>(buf: &[u8], out: &mut W) -> fmt::Result {
    writeln!(out, "{INDENT}{RULE}")?;
    for line in buf.chunks(BYTES_PER_LINE) {
        out.write_str(INDENT)?;
        let (first, second) = line.split_at(line.len().min(GROUP));
        write_group(first, out)?;
        out.write_str("  ")?;
        write_group(second, out)?;
        out.write_str("  |  ")?;
        for b in line {
            let c = if (32..=126).contains(b) { *b as char } else { '.' };
            out.write_char(c)?;
        }
        out.write_char('\n')?;
    }
    writeln!(out, "{INDENT}{RULE}")
}

/// Writes up to 8 bytes as hex, padding short groups so the ASCII column stays aligned.
fn write_group<W: fmt::Write + ?Sized>(group: &[u8], out: &mut W) -> fmt::Result {
    for b in group {
        write!(out, "{b:02x} ")?;
    }
    for _ in group.len()..GROUP {
        out.write_str("   ")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_line_layout() {
        let buf: Vec<u8> = (0x41..0x51).collect();
        let dump = HexDump(&buf).to_string();
        let lines: Vec<_> = dump.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], lines[2]);
        assert_eq!(
            lines[1],
            "     41 42 43 44 45 46 47 48   49 4a 4b 4c 4d 4e 4f 50   |  ABCDEFGHIJKLMNOP"
        );
    }

    #[test]
    fn short_line_is_padded() {
        let dump = HexDump(&[0x00, 0x80, 0x7e]).to_string();
        let line = dump.lines().nth(1).unwrap();
        let full = HexDump(&[0u8; 16]).to_string();
        let full_line = full.lines().nth(1).unwrap();
        // the ascii column starts at the same offset for short and full lines
        assert_eq!(line.find('|'), full_line.find('|'));
        assert!(line.ends_with("|  ..~"));
    }

    #[test]
    fn multiple_lines() {
        let buf = [b'a'; 20];
        let dump = HexDump(&buf).to_string();
        let lines: Vec<_> = dump.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[2].ends_with("|  aaaa"));
    }

    #[test]
    fn empty_buffer_only_rules() {
        let dump = HexDump(&[]).to_string();
        assert_eq!(dump.lines().count(), 2);
    }
}
