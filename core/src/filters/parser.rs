use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1, take_while_m_n},
    character::complete::{char, multispace0},
    combinator::{all_consuming, map, map_res, opt, recognize},
    error::{Error, ErrorKind},
    multi::{separated_list0, separated_list1},
    number::complete::recognize_float,
    sequence::{delimited, pair, preceded},
    IResult, Parser,
};

use crate::error::{DiveLogError, Result};

/// A positional argument inside a filter call.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Number(f64),
    Date(NaiveDateTime),
    Time(NaiveTime),
    Text(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{}", n),
            Literal::Date(d) => write!(f, "{}", d.format("%Y-%m-%d %H:%M:%S")),
            Literal::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            Literal::Text(s) => f.write_str(s),
        }
    }
}

/// A call argument as classified, plus the text it was written as. Quoted
/// arguments keep their inner text.
#[derive(Clone, Debug, PartialEq)]
pub struct Argument {
    pub value: Literal,
    pub source: String,
}

/// One `name(arg, ...)` call in a chain.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterCall {
    pub name: String,
    pub args: Vec<Argument>,
}

/// Parse a chain like `deeper_than(20), had_buddy("Ana") and used_gas(air)`.
/// Calls are separated by `,`, `&`, `&&` or `and`.
pub fn parse_chain(input: &str) -> Result<Vec<FilterCall>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(DiveLogError::validation("empty filter expression"));
    }

    match chain(input) {
        Ok((remaining, calls)) => {
            let remaining = remaining.trim();
            if remaining.is_empty() {
                Ok(calls)
            } else {
                Err(DiveLogError::validation(format!(
                    "unexpected characters at position {}: '{}'",
                    input.len() - remaining.len(),
                    remaining
                )))
            }
        }
        Err(_) => Err(DiveLogError::validation(format!(
            "could not parse filter expression '{}'. Expected calls like deeper_than(20), longer_than(600)",
            input
        ))),
    }
}

/// `YYYY-MM-DD`, optionally followed by a time of day.
pub fn parse_date_param(input: &str) -> Option<NaiveDateTime> {
    all_consuming(date_literal)
        .parse(input.trim())
        .ok()
        .map(|(_, date)| date)
}

/// `HH:MM` or `HH:MM:SS`.
pub fn parse_time_param(input: &str) -> Option<NaiveTime> {
    all_consuming(time_literal)
        .parse(input.trim())
        .ok()
        .map(|(_, time)| time)
}

fn chain(input: &str) -> IResult<&str, Vec<FilterCall>> {
    separated_list1(call_separator, call).parse(input)
}

fn call_separator(input: &str) -> IResult<&str, &str> {
    delimited(
        multispace0,
        alt((tag("&&"), tag("&"), tag(","), tag_no_case("and"))),
        multispace0,
    )
    .parse(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        opt(take_while1(|c: char| c.is_alphanumeric() || c == '_')),
    ))
    .parse(input)
}

fn call(input: &str) -> IResult<&str, FilterCall> {
    let (input, _) = multispace0(input)?;
    let (input, name) = identifier(input)?;
    let (input, _) = (multispace0, char('('), multispace0).parse(input)?;
    let (input, args) =
        separated_list0((multispace0, char(','), multispace0), argument).parse(input)?;
    let (input, _) = (multispace0, char(')')).parse(input)?;

    Ok((
        input,
        FilterCall {
            name: name.to_string(),
            args,
        },
    ))
}

fn argument(input: &str) -> IResult<&str, Argument> {
    alt((quoted, bare)).parse(input)
}

fn quoted(input: &str) -> IResult<&str, Argument> {
    map(
        alt((
            delimited(char('"'), take_while(|c: char| c != '"'), char('"')),
            delimited(char('\''), take_while(|c: char| c != '\''), char('\'')),
        )),
        |s: &str| Argument {
            value: Literal::Text(s.to_string()),
            source: s.to_string(),
        },
    )
    .parse(input)
}

/// Unquoted text up to the next `,` or `)`, classified by shape.
fn bare(input: &str) -> IResult<&str, Argument> {
    map(take_while1(|c: char| c != ',' && c != ')'), |s: &str| {
        let source = s.trim();
        Argument {
            value: classify(source),
            source: source.to_string(),
        }
    })
    .parse(input)
}

fn classify(raw: &str) -> Literal {
    if let Some(date) = parse_date_param(raw) {
        return Literal::Date(date);
    }
    if let Some(time) = parse_time_param(raw) {
        return Literal::Time(time);
    }
    if let Ok((_, number)) = all_consuming(number).parse(raw) {
        return Literal::Number(number);
    }
    Literal::Text(raw.to_string())
}

fn number(input: &str) -> IResult<&str, f64> {
    map_res(recognize_float, |s: &str| s.parse::<f64>()).parse(input)
}

fn fixed_digits(input: &str, count: usize) -> IResult<&str, u32> {
    map_res(
        take_while_m_n(count, count, |c: char| c.is_ascii_digit()),
        |s: &str| s.parse::<u32>(),
    )
    .parse(input)
}

fn two_digits(input: &str) -> IResult<&str, u32> {
    fixed_digits(input, 2)
}

fn four_digits(input: &str) -> IResult<&str, u32> {
    fixed_digits(input, 4)
}

fn hour(input: &str) -> IResult<&str, u32> {
    map_res(
        take_while_m_n(1, 2, |c: char| c.is_ascii_digit()),
        |s: &str| s.parse::<u32>(),
    )
    .parse(input)
}

fn invalid(input: &str) -> nom::Err<Error<&str>> {
    nom::Err::Error(Error::new(input, ErrorKind::Verify))
}

fn time_literal(input: &str) -> IResult<&str, NaiveTime> {
    let start = input;
    let (input, (hours, _, minutes, seconds)) = (
        hour,
        char(':'),
        two_digits,
        opt(preceded(char(':'), two_digits)),
    )
        .parse(input)?;

    NaiveTime::from_hms_opt(hours, minutes, seconds.unwrap_or(0))
        .map(|time| (input, time))
        .ok_or_else(|| invalid(start))
}

fn date_literal(input: &str) -> IResult<&str, NaiveDateTime> {
    let start = input;
    let (input, (year, _, month, _, day)) =
        (four_digits, char('-'), two_digits, char('-'), two_digits).parse(input)?;
    let (input, time) =
        opt(preceded(alt((char(' '), char('T'))), time_literal)).parse(input)?;

    let date = NaiveDate::from_ymd_opt(year as i32, month, day).ok_or_else(|| invalid(start))?;
    Ok((input, date.and_time(time.unwrap_or_default())))
}
