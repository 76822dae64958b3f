//! Poll data types.

use serde::{Deserialize, Serialize};

use std::{error::Error as StdError, fmt};

use crate::{
    encrypted::{EncryptedValue, Width},
    principal::Principal,
    utils::VecHelper,
};

mod registry;
mod voting;

pub use self::registry::PollRegistry;
pub use self::voting::{Ballot, EndPollError, VoteError};
pub(crate) use self::voting::tally_ballot;

/// Minimum allowed number of options in a poll (inclusive).
pub const MIN_OPTIONS: usize = 2;
/// Maximum allowed number of options in a poll (inclusive).
pub const MAX_OPTIONS: usize = 4;
/// Declared width of encrypted ballots and tally counters.
pub const TALLY_WIDTH: Width = Width::U32;
/// Largest timestamp representable as a signed Unix time.
pub const MAX_TIMESTAMP: u64 = i64::MAX as u64;

/// Sequential poll identifier. Identifiers are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollId(u64);

impl PollId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for PollId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for PollId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

/// Poll parameters supplied by its creator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSpec {
    pub name: String,
    #[serde(with = "VecHelper::<String, MIN_OPTIONS, MAX_OPTIONS>")]
    pub options: Vec<String>,
    /// Unix timestamp (in seconds) at which voting opens.
    pub start_time: u64,
    /// Unix timestamp (in seconds) after which voting is closed.
    pub end_time: u64,
}

impl PollSpec {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        options: impl IntoIterator<Item = S>,
        start_time: u64,
        end_time: u64,
    ) -> Self {
        Self {
            name: name.into(),
            options: options.into_iter().map(Into::into).collect(),
            start_time,
            end_time,
        }
    }

    /// Normalizes and validates the spec.
    ///
    /// # Errors
    ///
    /// Checks options first, then the name, then the voting window.
    pub fn validate(mut self) -> Result<Self, PollSpecError> {
        for option in &mut self.options {
            let trimmed = option.trim();
            if trimmed.len() != option.len() {
                *option = trimmed.to_owned();
            }
        }
        OptionsError::check(&self.options).map_err(PollSpecError::InvalidOptions)?;

        let trimmed_name = self.name.trim();
        if trimmed_name.is_empty() {
            return Err(PollSpecError::InvalidName);
        }
        if trimmed_name.len() != self.name.len() {
            self.name = trimmed_name.to_owned();
        }

        WindowError::check(self.start_time, self.end_time).map_err(PollSpecError::InvalidWindow)?;
        Ok(self)
    }
}

/// Error validating a [`PollSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollSpecError {
    InvalidName,
    InvalidOptions(OptionsError),
    InvalidWindow(WindowError),
}

impl fmt::Display for PollSpecError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName => formatter.write_str("poll name is empty"),
            Self::InvalidOptions(err) => write!(formatter, "invalid poll options: {err}"),
            Self::InvalidWindow(err) => write!(formatter, "invalid voting window: {err}"),
        }
    }
}

impl StdError for PollSpecError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::InvalidName => None,
            Self::InvalidOptions(err) => Some(err),
            Self::InvalidWindow(err) => Some(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionsError {
    /// Number of options is outside `MIN_OPTIONS..=MAX_OPTIONS`.
    Count(usize),
    Empty {
        index: usize,
    },
    Duplicate {
        index: usize,
        first: usize,
    },
}

impl fmt::Display for OptionsError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(count) => write!(
                formatter,
                "expected {MIN_OPTIONS} to {MAX_OPTIONS} options, got {count}"
            ),
            Self::Empty { index } => write!(formatter, "option #{} is empty", index + 1),
            Self::Duplicate { index, first } => write!(
                formatter,
                "option #{} duplicates option #{}",
                index + 1,
                first + 1
            ),
        }
    }
}

impl StdError for OptionsError {}

impl OptionsError {
    fn check(options: &[String]) -> Result<(), Self> {
        if options.len() < MIN_OPTIONS || options.len() > MAX_OPTIONS {
            return Err(Self::Count(options.len()));
        }
        for (index, option) in options.iter().enumerate() {
            if option.is_empty() {
                return Err(Self::Empty { index });
            }
            if let Some(first) = options[..index].iter().position(|prev| prev == option) {
                return Err(Self::Duplicate { index, first });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    EndNotAfterStart { start_time: u64, end_time: u64 },
    /// Timestamp is not representable as a signed Unix time.
    OutOfRange { timestamp: u64 },
}

impl fmt::Display for WindowError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndNotAfterStart {
                start_time,
                end_time,
            } => write!(
                formatter,
                "end time {end_time} is not after start time {start_time}"
            ),
            Self::OutOfRange { timestamp } => {
                write!(formatter, "timestamp {timestamp} is out of range")
            }
        }
    }
}

impl StdError for WindowError {}

impl WindowError {
    fn check(start_time: u64, end_time: u64) -> Result<(), Self> {
        if start_time > MAX_TIMESTAMP {
            return Err(Self::OutOfRange {
                timestamp: start_time,
            });
        }
        if end_time <= start_time {
            return Err(Self::EndNotAfterStart {
                start_time,
                end_time,
            });
        }
        if end_time > MAX_TIMESTAMP {
            return Err(Self::OutOfRange {
                timestamp: end_time,
            });
        }
        Ok(())
    }
}

/// Lifecycle stage of a poll as observed at a certain time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStage {
    /// Voting has not started yet.
    Scheduled,
    /// Voting is open.
    Active,
    /// Voting window has passed, but the poll is not closed.
    AwaitingClose,
    /// Poll is closed; tallies are public.
    Closed,
}

impl PollStage {
    pub fn as_human_string(self) -> &'static str {
        match self {
            Self::Scheduled => "upcoming",
            Self::Active => "active",
            Self::AwaitingClose => "ready to reveal",
            Self::Closed => "ended",
        }
    }
}

impl fmt::Display for PollStage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_human_string())
    }
}

/// Poll stored in the [`PollRegistry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    id: PollId,
    spec: PollSpec,
    creator: Principal,
    /// Encrypted vote counters, one per option.
    tallies: Vec<EncryptedValue>,
    ended: bool,
    results_public: bool,
}

impl Poll {
    pub(crate) fn new(
        id: PollId,
        spec: PollSpec,
        creator: Principal,
        tallies: Vec<EncryptedValue>,
    ) -> Self {
        debug_assert_eq!(spec.options.len(), tallies.len());
        Self {
            id,
            spec,
            creator,
            tallies,
            ended: false,
            results_public: false,
        }
    }

    pub fn id(&self) -> PollId {
        self.id
    }

    pub fn spec(&self) -> &PollSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn options(&self) -> &[String] {
        &self.spec.options
    }

    pub fn start_time(&self) -> u64 {
        self.spec.start_time
    }

    pub fn end_time(&self) -> u64 {
        self.spec.end_time
    }

    pub fn creator(&self) -> &Principal {
        &self.creator
    }

    pub fn tallies(&self) -> &[EncryptedValue] {
        &self.tallies
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn results_public(&self) -> bool {
        self.results_public
    }

    pub fn stage(&self, now: u64) -> PollStage {
        if self.ended {
            PollStage::Closed
        } else if now < self.spec.start_time {
            PollStage::Scheduled
        } else if now <= self.spec.end_time {
            PollStage::Active
        } else {
            PollStage::AwaitingClose
        }
    }

    pub(crate) fn replace_tallies(&mut self, tallies: Vec<EncryptedValue>) {
        assert!(!self.ended, "cannot update tallies of a closed poll");
        assert_eq!(tallies.len(), self.tallies.len(), "tally count mismatch");
        self.tallies = tallies;
    }

    pub(crate) fn close(&mut self) {
        assert!(!self.ended, "poll is already closed");
        self.ended = true;
        self.results_public = true;
    }
}

/// Poll overview from the perspective of a specific viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub id: PollId,
    pub name: String,
    pub options: Vec<String>,
    pub start_time: u64,
    pub end_time: u64,
    pub ended: bool,
    pub results_public: bool,
    pub has_voted: bool,
    pub stage: PollStage,
}

impl PollSummary {
    pub(crate) fn new(poll: &Poll, has_voted: bool, now: u64) -> Self {
        Self {
            id: poll.id,
            name: poll.spec.name.clone(),
            options: poll.spec.options.clone(),
            start_time: poll.spec.start_time,
            end_time: poll.spec.end_time,
            ended: poll.ended,
            results_public: poll.results_public,
            has_voted,
            stage: poll.stage(now),
        }
    }
}

/// Poll with the specified ID does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollNotFound(pub PollId);

impl fmt::Display for PollNotFound {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "poll {} does not exist", self.0)
    }
}

impl StdError for PollNotFound {}
