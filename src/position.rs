//! Read positions: what the user asked for, and the range it resolves to.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{KpipeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetSymbol {
    /// Last offset committed by the consumer group.
    Stored,
    Latest,
    Earliest,
    Beginning,
    End,
}

impl OffsetSymbol {
    pub const ALL: [OffsetSymbol; 5] = [
        OffsetSymbol::Stored,
        OffsetSymbol::Latest,
        OffsetSymbol::Earliest,
        OffsetSymbol::Beginning,
        OffsetSymbol::End,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetSymbol::Stored => "stored",
            OffsetSymbol::Latest => "latest",
            OffsetSymbol::Earliest => "earliest",
            OffsetSymbol::Beginning => "beginning",
            OffsetSymbol::End => "end",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Offset {
    Numeric(i64),
    Symbolic(OffsetSymbol),
}

impl FromStr for Offset {
    type Err = KpipeError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(symbol) = OffsetSymbol::ALL.iter().find(|sym| sym.as_str() == s) {
            return Ok(Offset::Symbolic(*symbol));
        }
        s.parse::<i64>().map(Offset::Numeric).map_err(|_| {
            KpipeError::InvalidPosition(
                "offset must be numeric or one of [stored, latest, earliest, beginning, end]"
                    .to_string(),
            )
        })
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offset::Numeric(n) => write!(f, "{n}"),
            Offset::Symbolic(sym) => f.write_str(sym.as_str()),
        }
    }
}

/// Read parameters as supplied on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadPosition {
    pub partition: Option<i32>,
    pub offset: Option<Offset>,
    pub end: Option<i64>,
    pub count: Option<u64>,
}

/// Normalized range handed to the consumer. An absent partition means all
/// partitions, an absent count means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedRange {
    pub partition: Option<i32>,
    pub offset: Option<Offset>,
    pub count: Option<u64>,
}

pub fn resolve(input: &ReadPosition) -> Result<ResolvedRange> {
    let count = match (input.end, input.count) {
        (Some(_), Some(_)) => {
            return Err(KpipeError::InvalidPosition(
                "end and count are mutually exclusive".to_string(),
            ));
        }
        (Some(end), None) => {
            let Some(Offset::Numeric(offset)) = input.offset else {
                return Err(KpipeError::InvalidPosition(format!(
                    "end requires a numeric offset, got {}",
                    input
                        .offset
                        .map_or_else(|| "none".to_string(), |o| o.to_string())
                )));
            };
            let count = end.checked_sub(offset).filter(|c| *c >= 0).ok_or_else(|| {
                KpipeError::InvalidPosition(format!("end {end} is before offset {offset}"))
            })?;
            Some(count as u64)
        }
        (None, count) => count,
    };

    Ok(ResolvedRange {
        partition: input.partition,
        offset: input.offset,
        count,
    })
}
