//! Parsing of a single lease declaration from a dhcpd lease file.
//!
//! A declaration looks like this:
//!
//! ```text
//! lease 192.168.0.105 {
//!   starts 2 2013/12/10 12:57:04;
//!   ends 2 2013/12/10 13:07:04;
//!   binding state active;
//!   next binding state free;
//!   hardware ethernet 60:a4:4c:b5:6a:dd;
//!   uid "\001`\244L\265j\335";
//!   set vendor-class-identifier = "MSFT 5.0";
//!   client-hostname "arm-1";
//! }
//! ```
//!
//! The body is tokenized into `;`-terminated statements. Each known field is
//! then looked up independently by its keyword, so statement order does not
//! matter and unknown statements are ignored. Every field except `ends` is
//! optional and tolerant: a missing or unreadable value is simply absent.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Serialize, Serializer};
use tracing::warn;

use crate::error::{Error, Result};

/// Layout of the date and time that follow the day-of-week digit.
const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Binding state token that marks a lease the server gave up on.
const ABANDONED_STATE: &str = "abandoned";

/// When a lease runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseEnd {
    At(DateTime<Utc>),
    /// The lease never expires (static reservation).
    Never,
}

impl fmt::Display for LeaseEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::At(at) => write!(f, "{}", at.format(TIMESTAMP_FORMAT)),
            Self::Never => f.write_str("never"),
        }
    }
}

impl Serialize for LeaseEnd {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::At(at) => at.serialize(serializer),
            Self::Never => serializer.serialize_str("never"),
        }
    }
}

/// One parsed `lease <ip> { ... }` block.
///
/// Several records in the same file may share an `ip`; they are successive
/// versions of the same lease, and the one appearing last is authoritative.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LeaseRecord {
    /// Address from the block header. Absent only if the header is unreadable.
    pub ip: Option<Ipv4Addr>,
    pub starts: Option<DateTime<Utc>>,
    pub ends: Option<LeaseEnd>,

    /// Failover: expiry time the peer has been told.
    pub tstp: Option<DateTime<Utc>>,
    /// Failover: expiry time the peer has acknowledged.
    pub tsfp: Option<DateTime<Utc>>,
    /// Failover: actual time sent from the partner.
    pub atsfp: Option<DateTime<Utc>>,
    /// Client last transaction time.
    pub cltt: Option<DateTime<Utc>>,

    /// MAC address exactly as written in the file.
    pub hardware_address: Option<String>,
    pub binding_state: Option<String>,
    pub next_binding_state: Option<String>,
    pub rewind_binding_state: Option<String>,
    pub hostname: Option<String>,

    /// Client identifier, escapes preserved verbatim.
    pub client_uid: Option<String>,

    pub set_variables: BTreeMap<String, String>,
    pub options: BTreeMap<String, String>,
}

/// Scalar fields located by keyword inside a lease body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Starts,
    Ends,
    Tstp,
    Tsfp,
    Atsfp,
    Cltt,
    HardwareEthernet,
    BindingState,
    NextBindingState,
    RewindBindingState,
    ClientHostname,
    Uid,
}

struct FieldSpec {
    field: Field,
    keyword: &'static [&'static str],
}

const FIELD_SPECS: &[FieldSpec] = &[
    FieldSpec::new(Field::Starts, &["starts"]),
    FieldSpec::new(Field::Ends, &["ends"]),
    FieldSpec::new(Field::Tstp, &["tstp"]),
    FieldSpec::new(Field::Tsfp, &["tsfp"]),
    FieldSpec::new(Field::Atsfp, &["atsfp"]),
    FieldSpec::new(Field::Cltt, &["cltt"]),
    FieldSpec::new(Field::HardwareEthernet, &["hardware", "ethernet"]),
    FieldSpec::new(Field::BindingState, &["binding", "state"]),
    FieldSpec::new(Field::NextBindingState, &["next", "binding", "state"]),
    FieldSpec::new(Field::RewindBindingState, &["rewind", "binding", "state"]),
    FieldSpec::new(Field::ClientHostname, &["client-hostname"]),
    FieldSpec::new(Field::Uid, &["uid"]),
];

impl FieldSpec {
    const fn new(field: Field, keyword: &'static [&'static str]) -> Self {
        Self { field, keyword }
    }

    /// Returns the statement's arguments if it starts with this field's keyword.
    fn arguments<'s, 'a>(&self, statement: &'s [Token<'a>]) -> Option<&'s [Token<'a>]> {
        if statement.len() < self.keyword.len() {
            return None;
        }
        let (head, rest) = statement.split_at(self.keyword.len());
        head.iter()
            .zip(self.keyword)
            .all(|(token, word)| *token == Token::Word(*word))
            .then_some(rest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    /// Contents of a double-quoted string, without the quotes.
    Quoted(&'a str),
}

impl<'a> Token<'a> {
    fn text(&self) -> &'a str {
        match self {
            Self::Word(text) | Self::Quoted(text) => *text,
        }
    }
}

fn is_word_end(byte: u8) -> bool {
    byte.is_ascii_whitespace() || byte == b';' || byte == b'"'
}

/// Splits a lease body into `;`-terminated statements.
///
/// `#` starts a comment outside quoted strings. A trailing statement with no
/// terminating `;` is dropped.
fn tokenize(body: &str) -> Vec<Vec<Token<'_>>> {
    let bytes = body.as_bytes();
    let mut statements = Vec::new();
    let mut current = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            byte if byte.is_ascii_whitespace() => pos += 1,
            b'#' => {
                while pos < bytes.len() && bytes[pos] != b'\n' {
                    pos += 1;
                }
            }
            b';' => {
                if !current.is_empty() {
                    statements.push(std::mem::take(&mut current));
                }
                pos += 1;
            }
            b'"' => {
                let start = pos + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end] != b'"' {
                    if bytes[end] == b'\\' {
                        end += 1;
                    }
                    end += 1;
                }
                let end = end.min(bytes.len());
                current.push(Token::Quoted(&body[start..end]));
                pos = end + 1;
            }
            _ => {
                let start = pos;
                while pos < bytes.len() && !is_word_end(bytes[pos]) {
                    pos += 1;
                }
                current.push(Token::Word(&body[start..pos]));
            }
        }
    }

    statements
}

fn is_weekday(token: &str) -> bool {
    matches!(token.as_bytes(), [b'0'..=b'6'])
}

/// Parses `<dow> YYYY/MM/DD HH:MM:SS` or `epoch <seconds>`.
fn parse_timestamp(arguments: &[Token<'_>]) -> Option<DateTime<Utc>> {
    match arguments {
        [Token::Word("epoch"), Token::Word(seconds)] => {
            DateTime::from_timestamp(seconds.parse().ok()?, 0)
        }
        [Token::Word(weekday), Token::Word(date), Token::Word(time)]
            if is_weekday(weekday) && date.len() == 10 && time.len() == 8 =>
        {
            NaiveDateTime::parse_from_str(&format!("{date} {time}"), TIMESTAMP_FORMAT)
                .ok()
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

fn parse_end(arguments: &[Token<'_>]) -> Option<LeaseEnd> {
    match arguments {
        [Token::Word("never")] => Some(LeaseEnd::Never),
        [Token::Word(weekday), Token::Word("never")] if is_weekday(weekday) => {
            Some(LeaseEnd::Never)
        }
        _ => parse_timestamp(arguments).map(LeaseEnd::At),
    }
}

/// Six colon-separated octets of one or two hex digits, either case.
fn is_ethernet_address(text: &str) -> bool {
    let octets: Vec<&str> = text.split(':').collect();
    octets.len() == 6
        && octets.iter().all(|octet| {
            (1..=2).contains(&octet.len()) && octet.bytes().all(|byte| byte.is_ascii_hexdigit())
        })
}

fn join_text(tokens: &[Token<'_>]) -> String {
    tokens
        .iter()
        .map(Token::text)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `set <name> = <value>`, tolerating missing spaces around `=`.
fn parse_set(arguments: &[Token<'_>]) -> Option<(String, String)> {
    let (first, rest) = arguments.split_first()?;
    let Token::Word(first) = first else {
        return None;
    };

    let (name, value) = match first.split_once('=') {
        Some((name, inline)) if !inline.is_empty() => (name, inline.to_string()),
        Some((name, _)) => (name, join_text(rest)),
        None => match rest {
            [Token::Word("="), value @ ..] => (*first, join_text(value)),
            [Token::Word(inline), value @ ..] if inline.starts_with('=') => {
                let inline = &inline[1..];
                if inline.is_empty() {
                    (*first, join_text(value))
                } else {
                    (*first, inline.to_string())
                }
            }
            _ => return None,
        },
    };

    (!name.is_empty()).then(|| (name.to_string(), value))
}

/// `option <key> <value>`; exactly one key and value per statement.
fn parse_option(arguments: &[Token<'_>]) -> Option<(String, String)> {
    match arguments {
        [Token::Word(key), value @ ..] if !value.is_empty() => {
            Some((key.to_string(), join_text(value)))
        }
        _ => None,
    }
}

/// Reads the address out of `lease <ip> {`.
fn parse_header(header: &str) -> Option<Ipv4Addr> {
    let mut words = header.split_whitespace();
    if words.next()? != "lease" {
        return None;
    }
    words.next()?.trim_end_matches('{').parse().ok()
}

impl LeaseRecord {
    /// Parses one raw lease block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedLease`] if an `ends` statement holds
    /// something other than a timestamp or `never`. Every other problem
    /// leaves the affected field absent.
    pub fn parse(block: &str) -> Result<Self> {
        let (header, body) = match block.find('{') {
            Some(brace) => (&block[..brace], &block[brace + 1..]),
            None => (block, ""),
        };
        let body = match body.rfind('}') {
            Some(brace) => &body[..brace],
            None => body,
        };

        let mut record = LeaseRecord {
            ip: parse_header(header),
            ..Default::default()
        };

        let statements = tokenize(body);

        for spec in FIELD_SPECS {
            let Some(arguments) = statements
                .iter()
                .find_map(|statement| spec.arguments(statement))
            else {
                continue;
            };
            record.apply(spec.field, arguments)?;
        }

        for statement in &statements {
            match statement.split_first() {
                Some((Token::Word("set"), arguments)) => {
                    if let Some((name, value)) = parse_set(arguments) {
                        record.set_variables.insert(name, value);
                    }
                }
                Some((Token::Word("option"), arguments)) => {
                    if let Some((key, value)) = parse_option(arguments) {
                        record.options.insert(key, value);
                    }
                }
                _ => {}
            }
        }

        Ok(record)
    }

    fn apply(&mut self, field: Field, arguments: &[Token<'_>]) -> Result<()> {
        match field {
            Field::Ends => match parse_end(arguments) {
                Some(end) => self.ends = Some(end),
                None => {
                    return Err(Error::MalformedLease {
                        address: self.address_label(),
                        value: join_text(arguments),
                    });
                }
            },
            Field::Starts => self.starts = self.timestamp("starts", arguments),
            Field::Tstp => self.tstp = self.timestamp("tstp", arguments),
            Field::Tsfp => self.tsfp = self.timestamp("tsfp", arguments),
            Field::Atsfp => self.atsfp = self.timestamp("atsfp", arguments),
            Field::Cltt => self.cltt = self.timestamp("cltt", arguments),
            Field::HardwareEthernet => match arguments {
                [Token::Word(address)] if is_ethernet_address(address) => {
                    self.hardware_address = Some(address.to_string());
                }
                _ => warn!(
                    lease = %self.address_label(),
                    value = %join_text(arguments),
                    "ignoring unreadable hardware address"
                ),
            },
            Field::BindingState => self.binding_state = single_word(arguments),
            Field::NextBindingState => self.next_binding_state = single_word(arguments),
            Field::RewindBindingState => self.rewind_binding_state = single_word(arguments),
            Field::ClientHostname => self.hostname = single_text(arguments),
            Field::Uid => self.client_uid = single_text(arguments),
        }
        Ok(())
    }

    fn timestamp(&self, keyword: &str, arguments: &[Token<'_>]) -> Option<DateTime<Utc>> {
        let parsed = parse_timestamp(arguments);
        if parsed.is_none() {
            warn!(
                lease = %self.address_label(),
                keyword,
                value = %join_text(arguments),
                "ignoring unreadable timestamp"
            );
        }
        parsed
    }

    fn address_label(&self) -> String {
        self.ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "<unknown>".to_string())
    }

    /// True if the lease never expires: `ends` is absent or `never`.
    pub fn is_static(&self) -> bool {
        matches!(self.ends, None | Some(LeaseEnd::Never))
    }

    /// Static leases are always active; others are active while
    /// `starts <= now < ends`. A missing `starts` places no lower bound.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.ends {
            None | Some(LeaseEnd::Never) => true,
            Some(LeaseEnd::At(ends)) => {
                self.starts.is_none_or(|starts| starts <= now) && now < ends
            }
        }
    }

    pub fn is_abandoned(&self) -> bool {
        self.binding_state.as_deref() == Some(ABANDONED_STATE)
    }

    /// Time left until `ends`, or `None` for a static lease.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        match self.ends {
            Some(LeaseEnd::At(ends)) => Some(ends - now),
            _ => None,
        }
    }

    /// Sort key: the address as a big-endian 32-bit integer.
    pub fn ip_key(&self) -> u32 {
        self.ip.map(u32::from).unwrap_or(0)
    }
}

fn single_word(arguments: &[Token<'_>]) -> Option<String> {
    match arguments {
        [Token::Word(word)] => Some(word.to_string()),
        _ => None,
    }
}

fn single_text(arguments: &[Token<'_>]) -> Option<String> {
    match arguments {
        [token] => Some(token.text().to_string()),
        _ => None,
    }
}
