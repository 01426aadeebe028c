//! Dot-stuffing (RFC 1939 §3, RFC 5321 §4.5.2).
//!
//! A multi-line block is a sequence of CRLF terminated lines ended by a line
//! holding a single `.`. Any content line that begins with `.` is sent with an
//! extra leading `.`, and the receiver strips exactly one.

/// End-of-block sentinel line (without its CRLF).
pub const TERMINATOR: &[u8] = b".";

/// Strip every trailing CR and LF byte.
pub fn trim_line_ending(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|&b| b != b'\r' && b != b'\n')
        .map_or(0, |pos| pos + 1);
    &line[..end]
}

/// Split a CRLF payload into lines. Only the final line ending is dropped, so
/// `"a\r\nb\r\n"` yields `["a", "b"]`, `"a\r\n\r\n"` yields `["a", ""]` and an
/// empty payload yields no lines.
pub fn split_lines(payload: &[u8]) -> Vec<&[u8]> {
    if payload.is_empty() {
        return Vec::new();
    }
    let payload = payload
        .strip_suffix(b"\r\n")
        .or_else(|| payload.strip_suffix(b"\n"))
        .unwrap_or(payload);
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i + 1 < payload.len() {
        if payload[i] == b'\r' && payload[i + 1] == b'\n' {
            lines.push(&payload[start..i]);
            i += 2;
            start = i;
        } else {
            i += 1;
        }
    }
    lines.push(&payload[start..]);
    lines
}

/// Encode a payload as the content lines of a multi-line block (terminator not
/// included). Lines starting with `.` get one extra `.`.
pub fn stuff_block(payload: &[u8]) -> Vec<Vec<u8>> {
    split_lines(payload)
        .into_iter()
        .map(|line| {
            let mut out = Vec::with_capacity(line.len() + 1);
            if line.first() == Some(&b'.') {
                out.push(b'.');
            }
            out.extend_from_slice(line);
            out
        })
        .collect()
}

/// Decode received block lines (each still carrying its original line ending)
/// back into the raw payload by removing one leading `.` per line.
pub fn unstuff_block<L: AsRef<[u8]>>(lines: &[L]) -> Vec<u8> {
    let mut out = Vec::with_capacity(lines.iter().map(|l| l.as_ref().len()).sum());
    for line in lines {
        let line = line.as_ref();
        match line.first() {
            Some(b'.') => out.extend_from_slice(&line[1..]),
            _ => out.extend_from_slice(line),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_lines(payload: &[u8]) -> Vec<Vec<u8>> {
        stuff_block(payload)
            .into_iter()
            .map(|mut line| {
                line.extend_from_slice(b"\r\n");
                line
            })
            .collect()
    }

    #[test]
    fn test_trim_line_ending() {
        assert_eq!(trim_line_ending(b"abc\r\n"), b"abc");
        assert_eq!(trim_line_ending(b"abc\n"), b"abc");
        assert_eq!(trim_line_ending(b"\r\n"), b"");
        assert_eq!(trim_line_ending(b"a\rb"), b"a\rb");
    }

    #[test]
    fn test_split_lines() {
        assert_eq!(split_lines(b"a\r\nb\r\n"), vec![&b"a"[..], &b"b"[..]]);
        assert_eq!(split_lines(b"a\r\n\r\nb"), vec![&b"a"[..], &b""[..], &b"b"[..]]);
        assert_eq!(split_lines(b"a\r\n\r\n"), vec![&b"a"[..], &b""[..]]);
        assert_eq!(split_lines(b"\r\n"), vec![&b""[..]]);
        assert!(split_lines(b"").is_empty());
    }

    #[test]
    fn test_leading_dot_is_doubled() {
        let lines = stuff_block(b"Subject: x\r\n.hidden\r\n.\r\nplain\r\n");
        assert_eq!(
            lines,
            vec![
                b"Subject: x".to_vec(),
                b"..hidden".to_vec(),
                b"..".to_vec(),
                b"plain".to_vec(),
            ]
        );
    }

    #[test]
    fn test_unstuff_removes_one_level() {
        let lines = vec![b"..leading-dot\r\n".to_vec(), b"...two\r\n".to_vec()];
        assert_eq!(unstuff_block(&lines), b".leading-dot\r\n..two\r\n".to_vec());
    }

    #[test]
    fn test_unstuff_single_dot_content() {
        let lines = vec![b".leading-dot-content\r\n".to_vec()];
        assert_eq!(unstuff_block(&lines), b"leading-dot-content\r\n".to_vec());
    }

    #[test]
    fn test_round_trip_preserves_dot_lines() {
        let payloads: [&[u8]; 6] = [
            b"From: a@b\r\n\r\n.\r\n",
            b"..\r\n.x\r\n...y\r\n",
            b"no dots here\r\n",
            b".\r\n\r\n.end\r\n",
            b"Subject: x\r\n\r\nbody\r\n\r\n",
            b"\r\n\r\n\r\n",
        ];
        for payload in payloads {
            assert_eq!(unstuff_block(&wire_lines(payload)), payload.to_vec());
        }
    }
}
