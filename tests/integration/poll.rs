//! Tests for polling logic.

use assert_matches::assert_matches;
use base64ct::{Base64UrlUnpadded, Encoding};
use futures::executor::block_on;
use rand::{seq::SliceRandom, Rng};

use confidential_polls::{
    poll::TALLY_WIDTH,
    testing::{principal, MockFhe},
    Ballot, ClosePolicy, DecryptError, EndPollError, EngineConfig, FheError, Grantee,
    InputContext, ManualClock, PollEngine, PollId, PollSpec, PollSpecError, PollStage, Principal,
    VoteError, Width,
};

const START: u64 = 1_700_000_000;
const END: u64 = START + 86_400;

type TestEngine = PollEngine<MockFhe, ManualClock>;

fn create_engine(config: EngineConfig) -> (TestEngine, ManualClock) {
    let clock = ManualClock::new(START - 60);
    let engine = PollEngine::new(MockFhe::new(), clock.clone(), config, principal("engine"));
    (engine, clock)
}

fn lunch_poll() -> PollSpec {
    PollSpec::new("Lunch", ["Pizza", "Sushi", "Burgers"], START, END)
}

fn ballot(engine: &TestEngine, voter: &Principal, choice: u64) -> Ballot {
    let context = InputContext {
        contract: *engine.contract(),
        sender: *voter,
    };
    engine
        .backend()
        .encrypt_input(choice, TALLY_WIDTH, &context)
}

fn decrypt(engine: &TestEngine, poll_id: PollId) -> Result<Vec<u64>, DecryptError> {
    let oracle = engine.backend().clone();
    let tallies = block_on(engine.decrypt_tallies(&oracle, poll_id, &principal("observer")))?;
    Ok(tallies.counts)
}

fn peek_tallies(engine: &TestEngine, poll_id: PollId) -> Vec<u64> {
    engine
        .encrypted_tallies(poll_id)
        .unwrap()
        .iter()
        .map(|tally| engine.backend().decrypt_unchecked(tally).unwrap())
        .collect()
}

fn mangle_bytes(
    json: serde_json::Value,
    pointer: &'static str,
    bits_to_mangle: impl Iterator<Item = usize>,
) -> impl Iterator<Item = serde_json::Value> {
    let value_str = json.pointer(pointer).unwrap().as_str().unwrap();
    let value = Base64UrlUnpadded::decode_vec(value_str).unwrap();

    bits_to_mangle.map(move |bit_idx| {
        let mut json = json.clone();
        let mut mangled_value = value.clone();
        mangled_value[bit_idx / 8] ^= 1 << (bit_idx % 8);
        let mangled_value = Base64UrlUnpadded::encode_string(&mangled_value);
        *json.pointer_mut(pointer).unwrap() = mangled_value.into();
        json
    })
}

#[test]
fn lunch_poll_lifecycle() {
    let (mut engine, clock) = create_engine(EngineConfig::default());
    let owner = principal("alice");
    let poll_id = engine.create_poll(lunch_poll(), owner).unwrap();
    assert_eq!(poll_id, PollId::new(0));
    assert_eq!(engine.poll_count(), 1);
    assert_eq!(engine.stage(poll_id).unwrap(), PollStage::Scheduled);
    assert_eq!(peek_tallies(&engine, poll_id), [0, 0, 0]);

    clock.set(START + 10);
    assert_eq!(engine.stage(poll_id).unwrap(), PollStage::Active);
    let bob = principal("bob");
    let carol = principal("carol");
    let bob_ballot = ballot(&engine, &bob, 1);
    engine.vote(poll_id, &bob_ballot, &bob).unwrap();
    let carol_ballot = ballot(&engine, &carol, 0);
    engine.vote(poll_id, &carol_ballot, &carol).unwrap();
    assert!(engine.has_voted(poll_id, &bob));
    assert!(engine.has_voted(poll_id, &carol));
    assert!(!engine.has_voted(poll_id, &owner));

    assert_matches!(decrypt(&engine, poll_id), Err(DecryptError::ResultsNotPublic));

    clock.set(END + 1);
    assert_eq!(engine.stage(poll_id).unwrap(), PollStage::AwaitingClose);
    engine.end_poll(poll_id, &owner).unwrap();
    assert_eq!(engine.stage(poll_id).unwrap(), PollStage::Closed);

    assert_eq!(decrypt(&engine, poll_id).unwrap(), [1, 1, 0]);
}

#[test]
fn tallies_are_replaced_on_each_vote() {
    let (mut engine, clock) = create_engine(EngineConfig::default());
    let poll_id = engine.create_poll(lunch_poll(), principal("alice")).unwrap();
    clock.set(START);

    let initial_tallies = engine.encrypted_tallies(poll_id).unwrap().to_vec();
    let bob = principal("bob");
    let bob_ballot = ballot(&engine, &bob, 2);
    engine.vote(poll_id, &bob_ballot, &bob).unwrap();
    let new_tallies = engine.encrypted_tallies(poll_id).unwrap();

    // Every slot gets a fresh ciphertext, so observers cannot tell which one was incremented.
    for (old, new) in initial_tallies.iter().zip(new_tallies) {
        assert_ne!(old.handle(), new.handle());
        assert_eq!(new.width(), Width::U32);
    }
}

#[test]
fn double_vote_is_rejected() {
    let (mut engine, clock) = create_engine(EngineConfig::default());
    let poll_id = engine.create_poll(lunch_poll(), principal("alice")).unwrap();
    clock.set(START + 1);

    let bob = principal("bob");
    let first_ballot = ballot(&engine, &bob, 1);
    engine.vote(poll_id, &first_ballot, &bob).unwrap();
    let tallies_before = engine.encrypted_tallies(poll_id).unwrap().to_vec();

    let second_ballot = ballot(&engine, &bob, 0);
    let err = engine.vote(poll_id, &second_ballot, &bob).unwrap_err();
    assert_matches!(err, VoteError::AlreadyVoted);
    assert_eq!(engine.encrypted_tallies(poll_id).unwrap(), tallies_before);
    assert_eq!(peek_tallies(&engine, poll_id), [0, 1, 0]);
}

#[test]
fn votes_outside_window_change_nothing() {
    let (mut engine, clock) = create_engine(EngineConfig::default());
    let poll_id = engine.create_poll(lunch_poll(), principal("alice")).unwrap();
    let bob = principal("bob");

    let early_ballot = ballot(&engine, &bob, 0);
    let err = engine.vote(poll_id, &early_ballot, &bob).unwrap_err();
    assert_matches!(err, VoteError::PollNotActive(PollStage::Scheduled));

    clock.set(END + 1);
    let late_ballot = ballot(&engine, &bob, 0);
    let err = engine.vote(poll_id, &late_ballot, &bob).unwrap_err();
    assert_matches!(err, VoteError::PollNotActive(PollStage::AwaitingClose));

    assert!(!engine.has_voted(poll_id, &bob));
    assert_eq!(peek_tallies(&engine, poll_id), [0, 0, 0]);
}

#[test]
fn invalid_poll_specs() {
    let (mut engine, _) = create_engine(EngineConfig::default());

    let spec = PollSpec::new("Solo", ["Only option"], START, END);
    let err = engine.create_poll(spec, principal("alice")).unwrap_err();
    assert_matches!(err, PollSpecError::InvalidOptions(_));

    let spec = PollSpec::new("Crowded", ["A", "B", "C", "D", "E"], START, END);
    let err = engine.create_poll(spec, principal("alice")).unwrap_err();
    assert_matches!(err, PollSpecError::InvalidOptions(_));

    let spec = PollSpec::new("Backwards", ["A", "B"], END, START);
    let err = engine.create_poll(spec, principal("alice")).unwrap_err();
    assert_matches!(err, PollSpecError::InvalidWindow(_));
    let err_message = err.to_string();
    assert!(err_message.contains("not after start time"), "{}", err_message);

    assert_eq!(engine.poll_count(), 0);
}

#[test]
fn ballot_with_mangled_proof() {
    let (mut engine, clock) = create_engine(EngineConfig::default());
    let poll_id = engine.create_poll(lunch_poll(), principal("alice")).unwrap();
    clock.set(START + 1);
    let bob = principal("bob");

    let ballot_json = serde_json::to_value(ballot(&engine, &bob, 1)).unwrap();
    for mangled_json in mangle_bytes(ballot_json.clone(), "/proof", 0..256) {
        let mangled_ballot: Ballot = serde_json::from_value(mangled_json).unwrap();
        let err = engine.vote(poll_id, &mangled_ballot, &bob).unwrap_err();
        assert_matches!(err, VoteError::InvalidProof(FheError::InvalidProof));
    }
    for mangled_json in mangle_bytes(ballot_json.clone(), "/ciphertext", 0..64) {
        let mangled_ballot: Ballot = serde_json::from_value(mangled_json).unwrap();
        let err = engine.vote(poll_id, &mangled_ballot, &bob).unwrap_err();
        assert_matches!(err, VoteError::InvalidProof(_));
    }
    assert!(!engine.has_voted(poll_id, &bob));
    assert_eq!(peek_tallies(&engine, poll_id), [0, 0, 0]);

    // The original ballot is still valid.
    let original_ballot: Ballot = serde_json::from_value(ballot_json).unwrap();
    engine.vote(poll_id, &original_ballot, &bob).unwrap();
    assert_eq!(peek_tallies(&engine, poll_id), [0, 1, 0]);
}

#[test]
fn ballot_for_other_engine_is_rejected() {
    let (mut engine, clock) = create_engine(EngineConfig::default());
    let poll_id = engine.create_poll(lunch_poll(), principal("alice")).unwrap();
    clock.set(START + 1);

    let bob = principal("bob");
    let context = InputContext {
        contract: principal("other engine"),
        sender: bob,
    };
    let foreign_ballot = engine.backend().encrypt_input(0, Width::U32, &context);
    let err = engine.vote(poll_id, &foreign_ballot, &bob).unwrap_err();
    assert_matches!(err, VoteError::InvalidProof(_));
    assert!(!engine.has_voted(poll_id, &bob));
}

#[test]
fn out_of_range_choice_counts_as_voted_but_tallies_nothing() {
    let (mut engine, clock) = create_engine(EngineConfig::default());
    let poll_id = engine.create_poll(lunch_poll(), principal("alice")).unwrap();
    clock.set(START + 1);

    let bob = principal("bob");
    let bogus_ballot = ballot(&engine, &bob, 3);
    engine.vote(poll_id, &bogus_ballot, &bob).unwrap();
    assert!(engine.has_voted(poll_id, &bob));

    let carol = principal("carol");
    let carol_ballot = ballot(&engine, &carol, 2);
    engine.vote(poll_id, &carol_ballot, &carol).unwrap();

    engine.end_poll(poll_id, &principal("alice")).unwrap();
    assert_eq!(decrypt(&engine, poll_id).unwrap(), [0, 0, 1]);
}

#[test]
fn closing_rules() {
    let (mut engine, clock) = create_engine(EngineConfig::default());
    let owner = principal("alice");
    let poll_id = engine.create_poll(lunch_poll(), owner).unwrap();

    let err = engine.end_poll(poll_id, &owner).unwrap_err();
    assert_matches!(err, EndPollError::PollNotActive(PollStage::Scheduled));
    let err = engine.end_poll(PollId::new(1), &owner).unwrap_err();
    assert_matches!(err, EndPollError::NotFound(_));

    clock.set(END + 1);
    let err = engine.end_poll(poll_id, &principal("bob")).unwrap_err();
    assert_matches!(err, EndPollError::Unauthorized { .. });
    engine.end_poll(poll_id, &owner).unwrap();

    let err = engine.end_poll(poll_id, &owner).unwrap_err();
    assert_matches!(err, EndPollError::PollNotActive(PollStage::Closed));
}

#[test]
fn closing_with_permissive_policy() {
    let config = EngineConfig {
        close_policy: ClosePolicy::OwnerOrAnyoneAfterEnd,
        ..EngineConfig::default()
    };
    let (mut engine, clock) = create_engine(config);
    let owner = principal("alice");
    let early_poll = engine.create_poll(lunch_poll(), owner).unwrap();
    let late_poll = engine.create_poll(lunch_poll(), owner).unwrap();
    assert_ne!(early_poll, late_poll);

    clock.set(START + 1);
    let err = engine.end_poll(early_poll, &principal("bob")).unwrap_err();
    assert_matches!(err, EndPollError::Unauthorized { .. });
    engine.end_poll(early_poll, &owner).unwrap();

    clock.set(END + 1);
    engine.end_poll(late_poll, &principal("bob")).unwrap();
    assert_eq!(decrypt(&engine, late_poll).unwrap(), [0, 0, 0]);
}

#[test]
fn tallies_become_public_only_after_closure() {
    let (mut engine, clock) = create_engine(EngineConfig::default());
    let poll_id = engine.create_poll(lunch_poll(), principal("alice")).unwrap();
    clock.set(START + 1);

    let tallies = engine.encrypted_tallies(poll_id).unwrap().to_vec();
    for tally in &tallies {
        assert!(!engine.access().is_permitted(&tally.handle(), &Grantee::Public));
    }
    let oracle = engine.backend().clone();
    let err = block_on(
        engine
            .access()
            .request_decrypt(&oracle, tallies[0], Grantee::Public),
    )
    .unwrap_err();
    assert_matches!(err, FheError::PermissionDenied { .. });

    engine.end_poll(poll_id, &principal("alice")).unwrap();
    for tally in engine.encrypted_tallies(poll_id).unwrap() {
        let requester = Grantee::Principal(principal("anyone"));
        assert!(engine.access().is_permitted(&tally.handle(), &requester));
    }
}

#[test]
fn randomized_votes_are_tallied_correctly() {
    const VOTER_COUNT: usize = 50;

    let mut rng = rand::thread_rng();
    let (mut engine, clock) = create_engine(EngineConfig::default());
    let spec = PollSpec::new("Color", ["Red", "Green", "Blue", "Yellow"], START, END);
    let poll_id = engine.create_poll(spec, principal("alice")).unwrap();

    let mut voters: Vec<_> = (0..VOTER_COUNT)
        .map(|i| principal(&format!("voter #{i}")))
        .collect();
    voters.shuffle(&mut rng);

    let mut expected = [0_u64; 4];
    for voter in &voters {
        clock.set(rng.gen_range(START..=END));
        let choice = rng.gen_range(0..4_u64);
        expected[choice as usize] += 1;
        let voter_ballot = ballot(&engine, voter, choice);
        engine.vote(poll_id, &voter_ballot, voter).unwrap();
    }

    clock.set(END + 1);
    engine.end_poll(poll_id, &principal("alice")).unwrap();
    let counts = decrypt(&engine, poll_id).unwrap();
    assert_eq!(counts, expected);
    assert_eq!(counts.iter().sum::<u64>(), VOTER_COUNT as u64);
}

#[test]
fn counts_do_not_wrap_past_narrow_widths() {
    const VOTER_COUNT: usize = 300;

    let (mut engine, clock) = create_engine(EngineConfig::default());
    let spec = PollSpec::new("Yes or no", ["Yes", "No"], START, END);
    let poll_id = engine.create_poll(spec, principal("alice")).unwrap();
    clock.set(START + 1);

    for i in 0..VOTER_COUNT {
        let voter = principal(&format!("voter #{i}"));
        let voter_ballot = ballot(&engine, &voter, 0);
        engine.vote(poll_id, &voter_ballot, &voter).unwrap();
    }
    engine.end_poll(poll_id, &principal("alice")).unwrap();

    let counts = decrypt(&engine, poll_id).unwrap();
    assert_eq!(counts, [VOTER_COUNT as u64, 0]);
}

#[test]
fn state_with_narrow_tallies_is_rejected() {
    let (mut engine, clock) = create_engine(EngineConfig::default());
    engine.create_poll(lunch_poll(), principal("alice")).unwrap();
    let mut state: serde_json::Value =
        serde_json::from_str(&engine.export_state().unwrap()).unwrap();
    state["registry"]["polls"][0]["tallies"][0]["width"] = "u16".into();

    let result = PollEngine::restore(
        engine.backend().clone(),
        clock,
        EngineConfig::default(),
        principal("engine"),
        &state.to_string(),
    );
    let err = result.unwrap_err().to_string();
    assert!(err.contains("expected u32"), "{}", err);
}

#[test]
fn state_survives_export_and_restore() {
    let (mut engine, clock) = create_engine(EngineConfig::default());
    let owner = principal("alice");
    let closed_poll = engine.create_poll(lunch_poll(), owner).unwrap();
    let open_poll = engine.create_poll(lunch_poll(), owner).unwrap();
    clock.set(START + 1);

    let bob = principal("bob");
    let bob_ballot = ballot(&engine, &bob, 2);
    engine.vote(closed_poll, &bob_ballot, &bob).unwrap();
    let bob_ballot = ballot(&engine, &bob, 0);
    engine.vote(open_poll, &bob_ballot, &bob).unwrap();
    engine.end_poll(closed_poll, &owner).unwrap();

    let state = engine.export_state().unwrap();
    let mut restored = PollEngine::restore(
        engine.backend().clone(),
        clock.clone(),
        engine.config().clone(),
        *engine.contract(),
        &state,
    )
    .unwrap();

    assert_eq!(restored.poll_count(), 2);
    assert!(restored.has_voted(open_poll, &bob));
    assert_eq!(decrypt(&restored, closed_poll).unwrap(), [0, 0, 1]);

    let again = ballot(&restored, &bob, 1);
    let err = restored.vote(open_poll, &again, &bob).unwrap_err();
    assert_matches!(err, VoteError::AlreadyVoted);
    let next_id = restored.create_poll(lunch_poll(), owner).unwrap();
    assert_eq!(next_id, PollId::new(2));
}

#[test]
fn corrupted_state_is_rejected() {
    let (mut engine, clock) = create_engine(EngineConfig::default());
    engine.create_poll(lunch_poll(), principal("alice")).unwrap();
    let mut state: serde_json::Value =
        serde_json::from_str(&engine.export_state().unwrap()).unwrap();
    state["registry"]["polls"][0]["tallies"]
        .as_array_mut()
        .unwrap()
        .pop();

    let result = PollEngine::restore(
        engine.backend().clone(),
        clock,
        EngineConfig::default(),
        principal("engine"),
        &state.to_string(),
    );
    let err = result.unwrap_err().to_string();
    assert!(err.contains("tallies"), "{}", err);
}

#[test]
fn poll_summaries() {
    let (mut engine, clock) = create_engine(EngineConfig::default());
    let poll_id = engine.create_poll(lunch_poll(), principal("alice")).unwrap();
    clock.set(START + 1);
    let bob = principal("bob");
    let bob_ballot = ballot(&engine, &bob, 0);
    engine.vote(poll_id, &bob_ballot, &bob).unwrap();

    let summaries = engine.polls_for(&bob);
    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.name, "Lunch");
    assert_eq!(summary.options, ["Pizza", "Sushi", "Burgers"]);
    assert!(summary.has_voted);
    assert!(!summary.results_public);
    assert_eq!(summary.stage.as_human_string(), "active");

    let json = serde_json::to_value(summary).unwrap();
    assert_eq!(json["stage"], "active");
    assert_eq!(json["id"], 0);
}
