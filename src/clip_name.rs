//! Parser for corpus clip file names. Clips are named after the talker, the
//! word set (batch) and the word they contain:
//!
//! ```text
//! F1_b39_w4_orbit.wav
//! ^^ ^^^ ^^ ^^^^^
//! |  |   |  word text
//! |  |   word number, 1-based
//! |  batch number
//! talker, F or M followed by a number
//! ```

use nom::{
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::{char, digit1, one_of, u32},
    combinator::{all_consuming, map, recognize},
    error::Error,
    sequence::{pair, preceded, terminated, tuple},
    Finish, IResult,
};

use std::str::FromStr;

use crate::corpus::WordSetId;

/// The pieces of a parsed clip file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipName {
    /// Talker code, e.g. `F1`
    pub talker: String,
    /// Batch (word set) number
    pub batch: u32,
    /// Word number within the batch, 1-based
    pub word: u32,
    /// The word itself
    pub text: String,
}

impl ClipName {
    /// Id of the word set this clip belongs to: one set per talker and batch.
    pub fn word_set_id(&self) -> WordSetId {
        WordSetId::new(format!("{}_b{}", self.talker, self.batch))
    }

    /// 0-based candidate index within the set.
    pub fn word_index(&self) -> Option<usize> {
        (self.word as usize).checked_sub(1)
    }
}

fn parse_talker(s: &str) -> IResult<&str, String> {
    map(recognize(pair(one_of("FM"), digit1)), |t: &str| t.to_owned())(s)
}

fn parse_text(s: &str) -> IResult<&str, String> {
    map(take_while1(|c: char| c != '.'), |t: &str| t.to_owned())(s)
}

fn parse_clip_name(s: &str) -> IResult<&str, ClipName> {
    map(
        all_consuming(tuple((
            parse_talker,
            preceded(tag("_b"), u32),
            preceded(tag("_w"), u32),
            preceded(char('_'), terminated(parse_text, tag_no_case(".wav"))),
        ))),
        |(talker, batch, word, text)| ClipName {
            talker,
            batch,
            word,
            text,
        },
    )(s)
}

impl FromStr for ClipName {
    type Err = Error<String>;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_clip_name(s).finish() {
            Ok((_remaining, name)) => Ok(name),
            Err(Error { input, code }) => Err(Error {
                input: input.to_string(),
                code,
            }),
        }
    }
}
