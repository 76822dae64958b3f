//! Confidential polling engine.
//!
//! Polls are created with 2 to 4 options and a voting window. Each eligible principal
//! may cast a single encrypted ballot, which is folded into per-option encrypted tallies
//! with an oblivious update: every tally is incremented by an encrypted 0 or 1, so neither
//! the engine nor observers learn which option was chosen. Once a poll is closed, its tallies
//! become publicly decryptable via an external [`DecryptionOracle`].
//!
//! Homomorphic operations are performed by an injected [`FheBackend`]. The [`testing`] module
//! provides an in-memory mock suitable for tests and demos.
//!
//! # Examples
//!
//! ```
//! use confidential_polls::{
//!     poll::TALLY_WIDTH,
//!     testing::{principal, MockFhe},
//!     EngineConfig, InputContext, ManualClock, PollEngine, PollSpec,
//! };
//! use futures::executor::block_on;
//!
//! let clock = ManualClock::new(1_000);
//! let fhe = MockFhe::new();
//! let mut engine =
//!     PollEngine::new(fhe.clone(), clock.clone(), EngineConfig::default(), principal("engine"));
//! let spec = PollSpec::new("Lunch", ["Pizza", "Sushi"], 1_000, 2_000);
//! let poll_id = engine.create_poll(spec, principal("alice"))?;
//!
//! let voter = principal("bob");
//! let context = InputContext { contract: *engine.contract(), sender: voter };
//! let ballot = fhe.encrypt_input(1, TALLY_WIDTH, &context);
//! engine.vote(poll_id, &ballot, &voter)?;
//!
//! engine.end_poll(poll_id, &principal("alice"))?;
//! let tallies = block_on(engine.decrypt_tallies(&fhe, poll_id, &voter))?;
//! assert_eq!(tallies.counts(), [0, 1]);
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```

// Linter settings.
#![warn(missing_debug_implementations, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc
)]

pub mod access;
pub mod clock;
pub mod config;
pub mod encrypted;
mod engine;
mod gateway;
pub mod poll;
pub mod principal;
pub mod testing;
mod utils;

pub use crate::{
    access::{AccessControl, Grantee},
    clock::{Clock, ManualClock, SystemClock},
    config::{ClosePolicy, EngineConfig},
    encrypted::{
        DecryptionOracle, EncryptedValue, FheBackend, FheError, Handle, InputContext, Width,
    },
    engine::PollEngine,
    gateway::{DecryptError, DecryptedTallies},
    poll::{
        Ballot, EndPollError, Poll, PollId, PollNotFound, PollRegistry, PollSpec, PollSpecError,
        PollStage, PollSummary, VoteError,
    },
    principal::Principal,
};
