//! Grammars for the supplicant's text output.
//!
//! Two independent grammars live here:
//!
//! - the unsolicited event envelope, `<P>EVENT-NAME remainder...`, where
//!   `P` is a log priority digit in `0..=4`;
//! - one line of the bulk `SCAN_RESULTS` reply:
//!
//! ```text
//! bssid / frequency / signal level / flags / ssid
//! aa:bb:cc:dd:ee:ff	2437	-45	[WPA2-PSK-CCMP][ESS]	MyNetwork
//! ```
//!
//! Everything here is a pure function of its input. Lines that do not match
//! are reported as `None` and it is up to the caller whether that deserves
//! a log line.

use std::collections::HashMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use serde::Serialize;
use tracing::debug;

/// Longest SSID the radio can carry, in bytes.
pub const SSID_MAX_LEN: usize = 32;

/// Highest priority digit the supplicant emits (`MSG_ERROR`).
pub const MAX_EVENT_PRIORITY: u8 = 4;

// ── MAC addresses ───────────────────────────────────────────────────────

/// A 48-bit hardware address. Displays as lower-case colon-separated hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 6];
        let mut parts = s.split(':');
        for byte in &mut out {
            let part = parts.next().ok_or(())?;
            if part.len() != 2 {
                return Err(());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| ())?;
        }
        if parts.next().is_some() {
            return Err(());
        }
        Ok(MacAddr(out))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ── Capability flags ────────────────────────────────────────────────────

/// Capability bitmask of a scanned network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScanFlags(u32);

impl ScanFlags {
    pub const ESS: ScanFlags = ScanFlags(1 << 0);
    pub const WPS: ScanFlags = ScanFlags(1 << 1);
    pub const WEP: ScanFlags = ScanFlags(1 << 2);
    pub const WPA_PSK_CCMP: ScanFlags = ScanFlags(1 << 3);
    pub const WPA_PSK_CCMP_TKIP: ScanFlags = ScanFlags(1 << 4);
    pub const WPA2_PSK_CCMP: ScanFlags = ScanFlags(1 << 5);
    pub const WPA2_PSK_CCMP_TKIP: ScanFlags = ScanFlags(1 << 6);

    const NAMED: [(ScanFlags, &'static str); 7] = [
        (ScanFlags::ESS, "ESS"),
        (ScanFlags::WPS, "WPS"),
        (ScanFlags::WEP, "WEP"),
        (ScanFlags::WPA_PSK_CCMP, "WPA-PSK-CCMP"),
        (ScanFlags::WPA_PSK_CCMP_TKIP, "WPA-PSK-CCMP+TKIP"),
        (ScanFlags::WPA2_PSK_CCMP, "WPA2-PSK-CCMP"),
        (ScanFlags::WPA2_PSK_CCMP_TKIP, "WPA2-PSK-CCMP+TKIP"),
    ];

    pub const fn empty() -> Self {
        ScanFlags(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: ScanFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Map a single bracketed token (without brackets) to its flag.
    ///
    /// The supplicant writes the mixed cipher suites as `CCMP+TKIP`; the
    /// dashed spelling is accepted as well.
    pub fn from_token(token: &str) -> Option<ScanFlags> {
        let flag = match token {
            "ESS" => ScanFlags::ESS,
            "WPS" => ScanFlags::WPS,
            "WEP" => ScanFlags::WEP,
            "WPA-PSK-CCMP" => ScanFlags::WPA_PSK_CCMP,
            "WPA-PSK-CCMP+TKIP" | "WPA-PSK-CCMP-TKIP" => ScanFlags::WPA_PSK_CCMP_TKIP,
            "WPA2-PSK-CCMP" => ScanFlags::WPA2_PSK_CCMP,
            "WPA2-PSK-CCMP+TKIP" | "WPA2-PSK-CCMP-TKIP" => ScanFlags::WPA2_PSK_CCMP_TKIP,
            _ => return None,
        };
        Some(flag)
    }

    /// Names of the flags that are set, in declaration order.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for ScanFlags {
    type Output = ScanFlags;

    fn bitor(self, rhs: ScanFlags) -> ScanFlags {
        ScanFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ScanFlags {
    fn bitor_assign(&mut self, rhs: ScanFlags) {
        self.0 |= rhs.0;
    }
}

impl Serialize for ScanFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

/// Split a run of `[TOKEN][TOKEN]...` into its tokens.
///
/// Returns `None` unless the whole input is one or more bracketed tokens
/// with nothing in between.
fn split_bracketed(mut s: &str) -> Option<Vec<&str>> {
    let mut tokens = Vec::new();
    while !s.is_empty() {
        let rest = s.strip_prefix('[')?;
        let end = rest.find(']')?;
        let token = &rest[..end];
        if token.contains('[') {
            return None;
        }
        tokens.push(token);
        s = &rest[end + 1..];
    }
    if tokens.is_empty() { None } else { Some(tokens) }
}

/// Union of the recognized capability tokens. Unknown tokens are skipped.
pub fn parse_flags<'a>(tokens: impl IntoIterator<Item = &'a str>) -> ScanFlags {
    let mut flags = ScanFlags::empty();
    for token in tokens {
        match ScanFlags::from_token(token) {
            Some(flag) => flags |= flag,
            None => debug!(token, "unhandled scan flag"),
        }
    }
    flags
}

// ── Scan results ────────────────────────────────────────────────────────

/// One network observed by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub bssid: MacAddr,
    pub frequency: u32,
    pub rssi: i32,
    pub flags: ScanFlags,
    pub ssid: String,
}

/// Take the next whitespace-delimited token, returning it and the rest.
fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(end) => Some((&s[..end], &s[end..])),
        None => Some((s, "")),
    }
}

/// Parse one line of a `SCAN_RESULTS` reply.
///
/// The SSID is whatever follows the flags, minus surrounding whitespace; it
/// may be empty (hidden networks) and may contain spaces. SSIDs longer than
/// [`SSID_MAX_LEN`] bytes reject the line.
pub fn parse_scan_line(line: &str) -> Option<ScanResult> {
    let (bssid, rest) = next_token(line)?;
    let bssid: MacAddr = bssid.parse().ok()?;

    let (frequency, rest) = next_token(rest)?;
    if !frequency.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let frequency: u32 = frequency.parse().ok()?;

    let (rssi, rest) = next_token(rest)?;
    let rssi: i32 = rssi.parse().ok()?;

    let (flags, rest) = next_token(rest)?;
    let flags = parse_flags(split_bracketed(flags)?);

    let ssid = rest.trim();
    if ssid.len() > SSID_MAX_LEN {
        return None;
    }

    Some(ScanResult {
        bssid,
        frequency,
        rssi,
        flags,
        ssid: ssid.to_string(),
    })
}

/// Parse every line of a `SCAN_RESULTS` reply, skipping lines that do not
/// match (the header line, truncated output).
pub fn parse_scan_results(blob: &str) -> Vec<ScanResult> {
    blob.lines().filter_map(parse_scan_line).collect()
}

// ── Event envelopes ─────────────────────────────────────────────────────

/// Events the adapter reacts to. Everything else is `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    ScanResults,
    Connected,
    Disconnected,
    SsidTempDisabled,
    Other(String),
}

impl EventKind {
    pub const SCAN_RESULTS: &'static str = "CTRL-EVENT-SCAN-RESULTS";
    pub const CONNECTED: &'static str = "CTRL-EVENT-CONNECTED";
    pub const DISCONNECTED: &'static str = "CTRL-EVENT-DISCONNECTED";
    pub const SSID_TEMP_DISABLED: &'static str = "CTRL-EVENT-SSID-TEMP-DISABLED";

    fn from_name(name: &str) -> Self {
        match name {
            Self::SCAN_RESULTS => EventKind::ScanResults,
            Self::CONNECTED => EventKind::Connected,
            Self::DISCONNECTED => EventKind::Disconnected,
            Self::SSID_TEMP_DISABLED => EventKind::SsidTempDisabled,
            other => EventKind::Other(other.to_string()),
        }
    }
}

/// A decoded `<P>EVENT-NAME remainder` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope<'a> {
    pub priority: u8,
    pub kind: EventKind,
    /// Text after the event name, leading whitespace removed.
    pub remainder: &'a str,
}

/// Decode the envelope of one unsolicited event record.
pub fn parse_event(line: &str) -> Option<EventEnvelope<'_>> {
    let rest = line.strip_prefix('<')?;
    let mut chars = rest.chars();
    let priority = chars.next()?.to_digit(10)? as u8;
    if priority > MAX_EVENT_PRIORITY {
        return None;
    }
    let rest = chars.as_str().strip_prefix('>')?;

    let name_end = rest
        .find(|c: char| !(c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-' || c == '_'))
        .unwrap_or(rest.len());
    if name_end == 0 {
        return None;
    }
    let (name, remainder) = rest.split_at(name_end);
    if !(remainder.is_empty() || remainder.starts_with(char::is_whitespace)) {
        return None;
    }

    Some(EventEnvelope {
        priority,
        kind: EventKind::from_name(name),
        remainder: remainder.trim_start(),
    })
}

/// Scan `key=value` pairs out of an event remainder.
///
/// Values may be double-quoted, in which case they can contain spaces and
/// the quotes are dropped. Words without `=` are ignored.
pub fn parse_key_values(text: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut rest = text;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let word_end = rest
            .find(|c: char| c.is_whitespace() || c == '=')
            .unwrap_or(rest.len());
        let key = &rest[..word_end];
        rest = &rest[word_end..];

        let Some(after_eq) = rest.strip_prefix('=') else {
            continue;
        };

        let (value, tail) = if let Some(quoted) = after_eq.strip_prefix('"') {
            match quoted.find('"') {
                Some(close) => (&quoted[..close], &quoted[close + 1..]),
                None => (quoted, ""),
            }
        } else {
            let end = after_eq.find(char::is_whitespace).unwrap_or(after_eq.len());
            (&after_eq[..end], &after_eq[end..])
        };

        if !key.is_empty() {
            out.insert(key.to_string(), value.to_string());
        }
        rest = tail;
    }
    out
}
