use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    combinator::{all_consuming, map, opt, value},
    number::complete::double,
    sequence::preceded,
    IResult, Parser as _,
};
use snafu::ensure;

use super::{InvalidSampleRate, InvalidValue, ParseError, StatsdSample, StatsdValue};

#[derive(Clone, Copy)]
enum MetricKind {
    Counter,
    Gauge,
    Timer,
    Set,
}

/// Parses a single statsd line.
///
/// Counter values are divided by the sample rate, if one is present. The sample rate is validated for every kind but
/// otherwise ignored for gauges, timers, and sets. Gauge values written with an explicit sign are relative.
///
/// # Errors
///
/// If the line is malformed, the value is not a finite number, or the sample rate is outside of (0, 1], an error is
/// returned.
pub fn parse_statsd_line(input: &[u8]) -> Result<StatsdSample<'_>, ParseError> {
    let (_, (name, raw_value, kind, maybe_sample_rate)) = statsd_line(input)?;

    let sample_rate = maybe_sample_rate.unwrap_or(1.0);
    ensure!(
        sample_rate > 0.0 && sample_rate <= 1.0,
        InvalidSampleRate { name, rate: sample_rate }
    );

    let value = match kind {
        MetricKind::Set => match simdutf8::basic::from_utf8(raw_value) {
            Ok(member) => StatsdValue::Set(member),
            Err(_) => {
                return InvalidValue {
                    name,
                    value: String::from_utf8_lossy(raw_value),
                }
                .fail()
            }
        },
        MetricKind::Counter => StatsdValue::Counter(finite_value(name, raw_value)? / sample_rate),
        MetricKind::Gauge => {
            let value = finite_value(name, raw_value)?;
            if matches!(raw_value[0], b'+' | b'-') {
                StatsdValue::GaugeDelta(value)
            } else {
                StatsdValue::Gauge(value)
            }
        }
        MetricKind::Timer => StatsdValue::Timer(finite_value(name, raw_value)?),
    };

    Ok(StatsdSample { name, value })
}

type RawLine<'a> = (&'a str, &'a [u8], MetricKind, Option<f64>);

fn statsd_line(input: &[u8]) -> IResult<&[u8], RawLine<'_>> {
    all_consuming((
        metric_name,
        preceded(tag(":"), take_while1(|b: u8| b != b'|')),
        preceded(tag("|"), metric_kind),
        opt(preceded(tag("|@"), double)),
    ))
    .parse(input)
}

#[inline]
fn metric_name(input: &[u8]) -> IResult<&[u8], &str> {
    // Printable ASCII, minus the field delimiters and the space that separates fields on the Graphite wire.
    let valid_char = |c: u8| c > 32 && c < 127 && c != b':' && c != b'|';
    map(take_while1(valid_char), |b| {
        // SAFETY: We know the bytes in `b` can only be comprised of ASCII characters, which ensures that it's valid to
        // interpret the bytes directly as UTF-8.
        unsafe { std::str::from_utf8_unchecked(b) }
    })
    .parse(input)
}

#[inline]
fn metric_kind(input: &[u8]) -> IResult<&[u8], MetricKind> {
    alt((
        value(MetricKind::Timer, tag("ms")),
        value(MetricKind::Counter, tag("c")),
        value(MetricKind::Gauge, tag("g")),
        value(MetricKind::Set, tag("s")),
    ))
    .parse(input)
}

fn finite_value(name: &str, raw_value: &[u8]) -> Result<f64, ParseError> {
    match all_consuming(double::<_, nom::error::Error<&[u8]>>).parse(raw_value) {
        Ok((_, value)) if value.is_finite() => Ok(value),
        _ => InvalidValue {
            name,
            value: String::from_utf8_lossy(raw_value),
        }
        .fail(),
    }
}
