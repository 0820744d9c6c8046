//! Proxy-Protocol v1/v2 header parsing (spec.md §6).
//!
//! The TCP accept loop and per-connection framing are out of scope (spec.md
//! §1); this module only defines the parsed result type and a pure parser
//! over an already-received byte buffer, so the wire contract the connector
//! must satisfy is executable and testable here. Grounded in ckpool-lhr's
//! `parse_proxy_protocol_peek` (`examples/original_source/tests/unit/test-proxy-protocol.c`):
//! same v1/v2 header shapes, same "peek, don't consume" discipline — the
//! caller decides when to actually discard `bytes_consumed` from its socket
//! buffer.

use std::net::IpAddr;

const PPV2_SIGNATURE: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];
const PPV2_HEADER_LEN: usize = 16;

/// The address/port a Proxy-Protocol header announced for the real peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedProxyHeader {
    pub address: IpAddr,
    pub port: u16,
}

/// The result of peeking at a connection's leading bytes for a
/// Proxy-Protocol header (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyProtocolPeek {
    /// No Proxy-Protocol signature at the start of the buffer at all: the
    /// data is the miner's own traffic (e.g. the JSON subscribe request).
    NotPresent,
    /// A Proxy-Protocol header was detected but the buffer doesn't yet hold
    /// all of it (a v1 line with no terminating `\r\n` yet, or a v2 header
    /// whose declared payload length reaches past what's buffered). The
    /// caller should read more bytes and peek again.
    Incomplete,
    /// A complete header was found. `bytes_consumed` is how many leading
    /// bytes of the buffer belong to the header and must be discarded
    /// before the remainder is miner traffic. `parsed` is `None` for a v1
    /// `PROXY UNKNOWN` line (valid, but carries no usable address) or for a
    /// v2 header whose declared length exceeds what this peek bothered
    /// parsing (still fully discardable, just not decoded).
    Complete { bytes_consumed: usize, parsed: Option<ParsedProxyHeader> },
}

/// Peek at `buf` for a Proxy-Protocol v1 or v2 header (spec.md §6).
///
/// Never mutates or consumes `buf`; the caller is responsible for advancing
/// its own read cursor by `bytes_consumed` once this returns `Complete`.
pub fn peek(buf: &[u8]) -> ProxyProtocolPeek {
    if buf.len() >= PPV2_SIGNATURE.len() && buf[..PPV2_SIGNATURE.len()] == PPV2_SIGNATURE {
        return peek_v2(buf);
    }
    if buf.starts_with(b"PROXY ") {
        return peek_v1(buf);
    }
    // A buffer shorter than the v2 signature that nonetheless matches it so
    // far is a truncated v2 header in flight, not "not present"; a buffer
    // that doesn't even match the signature prefix, and isn't an ASCII
    // "PROXY " line either, definitively carries no PP header.
    if buf.len() < PPV2_SIGNATURE.len() && PPV2_SIGNATURE.starts_with(buf) {
        return ProxyProtocolPeek::Incomplete;
    }
    ProxyProtocolPeek::NotPresent
}

fn peek_v2(buf: &[u8]) -> ProxyProtocolPeek {
    if buf.len() < PPV2_HEADER_LEN {
        return ProxyProtocolPeek::Incomplete;
    }
    // byte 12: version(4 bits)/command(4 bits), spec.md mandates 0x21
    // (version 2, PROXY command) — anything else is not a header we speak.
    if buf[12] != 0x21 {
        return ProxyProtocolPeek::Incomplete;
    }
    let family_proto = buf[13];
    let payload_len = u16::from_be_bytes([buf[14], buf[15]]) as usize;
    let total_len = PPV2_HEADER_LEN + payload_len;

    if buf.len() < total_len {
        // The full header+payload hasn't arrived yet; whether or not we
        // could eventually decode it, we cannot discard bytes we don't
        // have, so this stays pending with nothing consumed yet.
        return ProxyProtocolPeek::Incomplete;
    }

    let payload = &buf[PPV2_HEADER_LEN..total_len];
    let parsed = match family_proto {
        0x11 if payload.len() >= 12 => Some(ParsedProxyHeader {
            address: IpAddr::from([payload[0], payload[1], payload[2], payload[3]]),
            port: u16::from_be_bytes([payload[8], payload[9]]),
        }),
        0x21 if payload.len() >= 36 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&payload[0..16]);
            Some(ParsedProxyHeader {
                address: IpAddr::from(octets),
                port: u16::from_be_bytes([payload[32], payload[33]]),
            })
        }
        // A recognised signature with an oversized or unrecognised
        // family/proto byte is still a well-formed header to discard — it
        // is simply not one this core decodes further (spec.md §6:
        // "malformed but prefix-matching headers are discarded along with
        // the declared payload length, not parsed").
        _ => None,
    };

    ProxyProtocolPeek::Complete { bytes_consumed: total_len, parsed }
}

fn peek_v1(buf: &[u8]) -> ProxyProtocolPeek {
    let line_end = match buf.windows(2).position(|w| w == b"\r\n") {
        Some(idx) => idx + 2,
        None => return ProxyProtocolPeek::Incomplete,
    };
    let line = match std::str::from_utf8(&buf[..line_end - 2]) {
        Ok(s) => s,
        Err(_) => return ProxyProtocolPeek::Complete { bytes_consumed: line_end, parsed: None },
    };

    let fields: Vec<&str> = line.split_whitespace().collect();
    // "PROXY UNKNOWN" and anything else that isn't the 6-field TCP4/TCP6
    // form is valid-but-addressless: discard the line, report no address.
    if fields.len() != 6 || (fields[1] != "TCP4" && fields[1] != "TCP6") {
        return ProxyProtocolPeek::Complete { bytes_consumed: line_end, parsed: None };
    }

    let parsed = match (fields[2].parse::<IpAddr>(), fields[4].parse::<u16>()) {
        (Ok(address), Ok(port)) => Some(ParsedProxyHeader { address, port }),
        _ => None,
    };
    ProxyProtocolPeek::Complete { bytes_consumed: line_end, parsed }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_signature_is_not_present() {
        let buf = b"{\"id\":1,\"method\":\"mining.subscribe\"}";
        assert_eq!(peek(buf), ProxyProtocolPeek::NotPresent);
    }

    #[test]
    fn ppv2_tcp4_header_parses_address_and_consumes_28_bytes() {
        let mut buf = vec![
            0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
            0x21, 0x11, 0x00, 0x0C,
        ];
        buf.extend_from_slice(&[0xCB, 0x00, 0x71, 0x0A]); // src 203.0.113.10
        buf.extend_from_slice(&[0x7F, 0x00, 0x00, 0x01]); // dst 127.0.0.1
        buf.extend_from_slice(&[0x9C, 0x40]); // src port 40000
        buf.extend_from_slice(&[0x0D, 0x05]); // dst port 3333

        match peek(&buf) {
            ProxyProtocolPeek::Complete { bytes_consumed, parsed } => {
                assert_eq!(bytes_consumed, 28);
                let parsed = parsed.unwrap();
                assert_eq!(parsed.address, "203.0.113.10".parse::<IpAddr>().unwrap());
                assert_eq!(parsed.port, 40000);
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn ppv2_tcp6_header_parses_address() {
        let mut buf = vec![
            0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
            0x21, 0x21, 0x00, 0x24,
        ];
        let src: [u8; 16] = "2001:0db8:0000:0000:0000:0000:0000:0001".parse::<std::net::Ipv6Addr>().unwrap().octets();
        buf.extend_from_slice(&src);
        buf.extend_from_slice(&[0u8; 16]); // dst ::1-ish, unused by the test
        buf.extend_from_slice(&[0x9C, 0x40]);
        buf.extend_from_slice(&[0x0D, 0x05]);

        match peek(&buf) {
            ProxyProtocolPeek::Complete { bytes_consumed, parsed } => {
                assert_eq!(bytes_consumed, 52);
                assert_eq!(parsed.unwrap().address, "2001:db8::1".parse::<IpAddr>().unwrap());
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn ppv2_oversized_len_is_incomplete_until_buffered() {
        let buf = vec![
            0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
            0x21, 0x11, 0x07, 0xD0, // len=2000
        ];
        assert_eq!(peek(&buf), ProxyProtocolPeek::Incomplete);
    }

    #[test]
    fn ppv2_truncated_signature_is_incomplete() {
        let buf = vec![0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51];
        assert_eq!(peek(&buf), ProxyProtocolPeek::Incomplete);
    }

    #[test]
    fn ppv1_tcp4_parses_and_consumes_whole_line() {
        let line = b"PROXY TCP4 203.0.113.10 127.0.0.1 40000 3333\r\n";
        match peek(line) {
            ProxyProtocolPeek::Complete { bytes_consumed, parsed } => {
                assert_eq!(bytes_consumed, line.len());
                let parsed = parsed.unwrap();
                assert_eq!(parsed.address, "203.0.113.10".parse::<IpAddr>().unwrap());
                assert_eq!(parsed.port, 40000);
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn ppv1_without_crlf_is_incomplete() {
        let line = b"PROXY TCP4 203.0.113.10 127.0.0.1 40000 3333";
        assert_eq!(peek(line), ProxyProtocolPeek::Incomplete);
    }

    #[test]
    fn ppv1_unknown_proto_is_complete_with_no_address() {
        let line = b"PROXY UNKNOWN\r\n";
        match peek(line) {
            ProxyProtocolPeek::Complete { bytes_consumed, parsed } => {
                assert_eq!(bytes_consumed, line.len());
                assert!(parsed.is_none());
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn ppv1_invalid_ip_is_complete_but_unparsed() {
        let line = b"PROXY TCP4 not-an-ip 127.0.0.1 40000 3333\r\n";
        match peek(line) {
            ProxyProtocolPeek::Complete { parsed, .. } => assert!(parsed.is_none()),
            other => panic!("expected Complete, got {other:?}"),
        }
    }
}
