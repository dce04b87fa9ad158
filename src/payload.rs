
use nom::{
    branch::alt,
    bytes::complete::{tag, take_until},
    character::complete::{char, digit0, digit1, multispace0},
    combinator::{opt, recognize},
    sequence::{delimited, preceded, tuple},
    IResult,
};
use std::num::ParseFloatError;
use thiserror::Error;

// the scale firmware prints one line per measurement, e.g. "Weight: 1002.5 g"
pub const WEIGHT_TAG: &str = "Weight:";

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("no weight value in line")]
    MissingWeight,

    #[error("invalid weight value {text:?}: {source}")]
    InvalidNumber {
        text: String,
        #[source]
        source: ParseFloatError,
    },
}

// -?digits*.?digits+  e.g. "12", "1.5", ".5", "-3"
fn number_parser(s: &str) -> IResult<&str, &str> {
    recognize(tuple((
        opt(char('-')),
        alt((recognize(tuple((digit0, char('.'), digit1))), digit1)),
    )))(s)
}

// "Weight:" ws number ws "g"
fn weight_field_parser(s: &str) -> IResult<&str, &str> {
    preceded(
        tag(WEIGHT_TAG),
        delimited(multispace0, number_parser, preceded(multispace0, char('g'))),
    )(s)
}

fn skip_to_tag(s: &str) -> IResult<&str, &str> {
    take_until(WEIGHT_TAG)(s)
}

/// Extracts the first weight reported anywhere in `line`.
pub fn parse_weight_line(line: &str) -> Result<f64, PayloadError> {
    let mut rest = line;

    loop {
        let (at_tag, _) = skip_to_tag(rest).map_err(|_| PayloadError::MissingWeight)?;

        match weight_field_parser(at_tag) {
            Ok((_, text)) => {
                return text.parse::<f64>().map_err(|source| PayloadError::InvalidNumber {
                    text: text.to_string(),
                    source,
                })
            }
            // a tag without a well-formed value, keep looking after it
            Err(_) => rest = &at_tag[WEIGHT_TAG.len()..],
        }
    }
}
