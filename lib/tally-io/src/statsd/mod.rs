//! Statsd line protocol.
//!
//! Each datagram carries one or more newline-separated lines of the form `<name>:<value>|<type>[|@<sample_rate>]`,
//! where the type is one of `c` (counter), `g` (gauge), `ms` (timer), or `s` (set). [`StatsdLines`] splits a datagram
//! into lines and [`parse_statsd_line`] decodes a single line into a [`StatsdSample`].

use snafu::Snafu;
use tally_core::store::SampleValue;

mod parser;
pub use self::parser::parse_statsd_line;

type NomParserError<'a> = nom::Err<nom::error::Error<&'a [u8]>>;

/// Statsd parse error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ParseError {
    /// The line does not follow the `<name>:<value>|<type>[|@<rate>]` layout.
    #[snafu(display("encountered error '{:?}' while processing line '{}'", kind, data))]
    Structural {
        /// Kind of parser failure.
        kind: nom::error::ErrorKind,

        /// Unparsed remainder of the line.
        data: String,
    },

    /// The value is not a finite number, or not valid UTF-8 for a set member.
    #[snafu(display("invalid value '{}' for metric '{}'", value, name))]
    InvalidValue {
        /// Metric name.
        name: String,

        /// Raw value.
        value: String,
    },

    /// The sample rate is outside of (0, 1].
    #[snafu(display("sample rate {} for metric '{}' is outside of (0, 1]", rate, name))]
    InvalidSampleRate {
        /// Metric name.
        name: String,

        /// Parsed sample rate.
        rate: f64,
    },
}

impl<'a> From<NomParserError<'a>> for ParseError {
    fn from(err: NomParserError<'a>) -> Self {
        match err {
            nom::Err::Error(e) | nom::Err::Failure(e) => Structural {
                kind: e.code,
                data: String::from_utf8_lossy(e.input),
            }
            .build(),
            nom::Err::Incomplete(_) => Structural {
                kind: nom::error::ErrorKind::Eof,
                data: String::new(),
            }
            .build(),
        }
    }
}

/// A decoded statsd value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StatsdValue<'a> {
    /// Counter increment, already divided by the sample rate.
    Counter(f64),

    /// Absolute gauge value.
    Gauge(f64),

    /// Relative gauge adjustment, written with a leading `+` or `-`.
    GaugeDelta(f64),

    /// Timer sample, in milliseconds.
    Timer(f64),

    /// Set member.
    Set(&'a str),
}

impl StatsdValue<'_> {
    /// Converts this value into the form the metric store ingests.
    pub fn into_sample_value(self) -> SampleValue {
        match self {
            StatsdValue::Counter(delta) => SampleValue::Counter(delta),
            StatsdValue::Gauge(value) => SampleValue::Gauge(value),
            StatsdValue::GaugeDelta(delta) => SampleValue::GaugeDelta(delta),
            StatsdValue::Timer(value) => SampleValue::Timer(value),
            StatsdValue::Set(member) => SampleValue::Set(member.to_string()),
        }
    }
}

/// A single decoded statsd line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StatsdSample<'a> {
    /// Bucket name, as sent.
    pub name: &'a str,

    /// Decoded value.
    pub value: StatsdValue<'a>,
}

/// Iterator over the non-empty lines of a statsd datagram.
///
/// Lines are separated by `\n`; a trailing `\r` is stripped from each line.
pub struct StatsdLines<'a> {
    remaining: &'a [u8],
}

impl<'a> StatsdLines<'a> {
    /// Creates a new `StatsdLines` over `datagram`.
    pub fn new(datagram: &'a [u8]) -> Self {
        Self { remaining: datagram }
    }
}

impl<'a> Iterator for StatsdLines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        while !self.remaining.is_empty() {
            let (line, tail) = match memchr::memchr(b'\n', self.remaining) {
                Some(index) => (&self.remaining[..index], &self.remaining[index + 1..]),
                None => (self.remaining, &[][..]),
            };
            self.remaining = tail;

            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if !line.is_empty() {
                return Some(line);
            }
        }

        None
    }
}
