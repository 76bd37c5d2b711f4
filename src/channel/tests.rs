use super::*;
use crate::{
    asset::AssetDecimals,
    decimal::Decimal,
    error::{Error, SignatureError, ValidationError},
    session_key::ChannelSessionKeyState,
    sig::{LocalSigner, Signer},
};
use rand::{rngs::StdRng, SeedableRng};

const USER: Address = Address([0x11; 20]);
const NODE: Address = Address([0x22; 20]);
const RECIPIENT: Address = Address([0x33; 20]);
const HOME_TOKEN: Address = Address([0xaa; 20]);
const ESCROW_TOKEN: Address = Address([0xbb; 20]);

fn assets() -> impl AssetDecimals {
    |chain: u64, token: &Address| -> Option<u8> {
        match (chain, *token) {
            (1, HOME_TOKEN) => Some(6),
            (137, ESCROW_TOKEN) => Some(18),
            _ => None,
        }
    }
}

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn h(s: &str) -> Hash {
    s.parse().unwrap()
}

fn definition() -> ChannelDefinition {
    ChannelDefinition::new(7, 86400)
}

/// Version 1 of a fresh channel after depositing 100.5.
fn deposited(user: Address) -> State {
    let mut state = State::new_void("usdc", user).unwrap().next_state().unwrap();
    state
        .attach_home_channel(&definition(), NODE, 1, HOME_TOKEN)
        .unwrap();
    state.apply_home_deposit(&assets(), &d("100.5")).unwrap();
    state
}

/// Version 2: 10 more locked for an escrow deposit on chain 137.
fn mutually_locked(user: Address) -> State {
    let mut state = deposited(user).next_state().unwrap();
    state
        .apply_mutual_lock(&assets(), 137, ESCROW_TOKEN, &d("10"))
        .unwrap();
    state
}

fn assert_balanced(state: &State) {
    assert!(state.home_ledger.is_balanced(), "{:?}", state.home_ledger);
    if let Some(escrow) = &state.escrow_ledger {
        assert!(escrow.is_balanced(), "{:?}", escrow);
    }
}

#[test]
fn metadata() {
    assert_eq!(
        channel_metadata("usdc"),
        h("0x1773e1ddf200efb0000000000000000000000000000000000000000000000000")
    );
}

#[test]
fn home_channel_id_is_deterministic() {
    let id = home_channel_id(NODE, USER, "usdc", &definition()).unwrap();
    assert_eq!(
        id,
        h("0x5a460058e1c102e3f0131add21505fb1ee366d384d2c1d0da483e0722b7bffee")
    );
    assert_eq!(id, home_channel_id(NODE, USER, "usdc", &definition()).unwrap());

    assert_eq!(
        home_channel_id(NODE, USER, "eth", &definition()).unwrap(),
        h("0x63fd700f544866a56ec42b3e14b9f4b91269eff97b22a1ccee1e93e7f141e998")
    );
    assert_eq!(
        home_channel_id(NODE, USER, "usdc", &ChannelDefinition::new(8, 86400)).unwrap(),
        h("0xad88c7bd6966f8ac5ecd4849702da293b6e988f9d7991f02dcd1b846bc35ffb7")
    );
    assert_ne!(
        id,
        home_channel_id(NODE, USER, "usdc", &ChannelDefinition::new(7, 3600)).unwrap()
    );
    assert_ne!(id, home_channel_id(USER, NODE, "usdc", &definition()).unwrap());
}

#[test]
fn escrow_channel_id_depends_on_version() {
    let home = home_channel_id(NODE, USER, "usdc", &definition()).unwrap();
    assert_eq!(
        escrow_channel_id(home, 2).unwrap(),
        h("0x1f2e403e403dc36e789a8d1517a482d329157571e73846cbb7cb78418ff015ae")
    );
    assert_ne!(escrow_channel_id(home, 2).unwrap(), escrow_channel_id(home, 3).unwrap());
}

#[test]
fn void_state() {
    let state = State::new_void("usdc", USER).unwrap();
    assert_eq!(
        state.id(),
        h("0x5cb277479856cd7dbed7d76df7a2fed7a223d4775241fe031f131ab28550aa2b")
    );
    assert_eq!(state.epoch(), 0);
    assert_eq!(state.version(), 0);
    assert!(state.home_channel_id.is_none());
    assert!(state.transitions.is_empty());
    assert_eq!(state.intent(), Intent::Operate);
    state.validate().unwrap();
}

#[test]
fn version_is_monotonic() {
    let mut state = deposited(USER);
    for _ in 0..20 {
        let next = state.next_state().unwrap();
        assert_eq!(next.version(), state.version() + 1);
        assert_ne!(next.id(), state.id());
        assert!(next.user_sig().is_none() && next.node_sig().is_none());
        assert_eq!(next.transitions, state.transitions);
        assert_eq!(next.home_ledger, state.home_ledger);
        next.validate().unwrap();
        state = next;
    }
}

#[test]
fn golden_pack_without_escrow() {
    let state = deposited(USER);
    assert_eq!(
        state.id(),
        h("0x70095d0e22a69b960b63c48fd21f3c39b6754aa6d12e46b2758c02f797396a84")
    );
    assert_eq!(
        state.transitions[0].tx_id,
        h("0x3ffa985c48f8cddfc49c1370c067c1680c16d1dac9d2153964ee4cdf282928be")
    );

    let packed = packed_state(&state, &assets()).unwrap();
    assert_eq!(packed.intent, Intent::Deposit);
    // No escrow: the explicit sentinel, including zero decimals.
    assert_eq!(packed.non_home, PackedLedger::EMPTY);
    assert_eq!(
        packed.metadata,
        h("0x302ab97049fcc80c23f3ab264f393b0dd11718948724f5be3d4bb76f5ac7979d")
    );

    let expected = "
5a460058e1c102e3f0131add21505fb1ee366d384d2c1d0da483e0722b7bffee
0000000000000000000000000000000000000000000000000000000000000001
0000000000000000000000000000000000000000000000000000000000000002
302ab97049fcc80c23f3ab264f393b0dd11718948724f5be3d4bb76f5ac7979d
0000000000000000000000000000000000000000000000000000000000000001
000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa
0000000000000000000000000000000000000000000000000000000000000006
0000000000000000000000000000000000000000000000000000000005fd8220
0000000000000000000000000000000000000000000000000000000005fd8220
0000000000000000000000000000000000000000000000000000000000000000
0000000000000000000000000000000000000000000000000000000000000000
0000000000000000000000000000000000000000000000000000000000000000
0000000000000000000000000000000000000000000000000000000000000000
0000000000000000000000000000000000000000000000000000000000000000
0000000000000000000000000000000000000000000000000000000000000000
0000000000000000000000000000000000000000000000000000000000000000
0000000000000000000000000000000000000000000000000000000000000000
0000000000000000000000000000000000000000000000000000000000000000
    "
    .split_whitespace()
    .collect::<String>();

    let bytes = pack_state(&state, &assets()).unwrap();
    assert_eq!(bytes.len(), 576);
    assert_eq!(hex::encode(&bytes), expected);
    // Deterministic.
    assert_eq!(pack_state(&state, &assets()).unwrap(), bytes);
}

#[test]
fn golden_pack_with_escrow() {
    let state = mutually_locked(USER);
    assert_eq!(
        state.escrow_channel_id,
        Some(h("0x1f2e403e403dc36e789a8d1517a482d329157571e73846cbb7cb78418ff015ae"))
    );
    assert_eq!(
        state.transitions[1].tx_id,
        h("0x0e9b48e364e4789070d2e2023946747b927e78403f68ae69b6c5f3e10a96a2d5")
    );
    assert_balanced(&state);

    let expected = "
5a460058e1c102e3f0131add21505fb1ee366d384d2c1d0da483e0722b7bffee
0000000000000000000000000000000000000000000000000000000000000002
0000000000000000000000000000000000000000000000000000000000000004
60ce72f3d92812cb19d578814497ce306315ba964bed9eaa5d9e3934a7a07673
0000000000000000000000000000000000000000000000000000000000000001
000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa
0000000000000000000000000000000000000000000000000000000000000006
0000000000000000000000000000000000000000000000000000000005fd8220
0000000000000000000000000000000000000000000000000000000005fd8220
0000000000000000000000000000000000000000000000000000000000989680
0000000000000000000000000000000000000000000000000000000000989680
0000000000000000000000000000000000000000000000000000000000000089
000000000000000000000000bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb
0000000000000000000000000000000000000000000000000000000000000012
0000000000000000000000000000000000000000000000008ac7230489e80000
0000000000000000000000000000000000000000000000008ac7230489e80000
0000000000000000000000000000000000000000000000000000000000000000
0000000000000000000000000000000000000000000000000000000000000000
    "
    .split_whitespace()
    .collect::<String>();

    assert_eq!(hex::encode(pack_state(&state, &assets()).unwrap()), expected);
}

#[test]
fn pack_errors() {
    let void = State::new_void("usdc", USER).unwrap();
    assert_eq!(
        pack_state(&void, &assets()),
        Err(PackError::MissingHomeChannel)
    );

    let state = deposited(USER);
    let nothing = |_: u64, _: &Address| -> Option<u8> { None };
    assert!(matches!(
        pack_state(&state, &nothing),
        Err(PackError::AssetNotFound(_))
    ));

    // The ledger claims more precision than the token has.
    let mut broken = state.clone();
    broken.home_ledger.user_balance = d("0.0000001");
    assert!(matches!(
        pack_state(&broken, &assets()),
        Err(PackError::Amount(_))
    ));
}

#[test]
fn home_deposit_and_withdrawal() {
    let mut state = deposited(USER).next_state().unwrap();
    state.apply_home_withdrawal(&assets(), &d("0.5")).unwrap();
    assert_eq!(state.home_ledger.user_balance, d("100"));
    assert_eq!(state.home_ledger.user_net_flow, d("100"));
    assert_eq!(state.intent(), Intent::Withdraw);
    assert_balanced(&state);

    let before = state.clone();
    let err = state.apply_home_withdrawal(&assets(), &d("100.000001")).unwrap_err();
    assert!(matches!(err, ValidationError::NegativeBalance { field: "user_balance", .. }));
    assert_eq!(state, before, "failed mutators must not change the state");
}

#[test]
fn amounts_are_validated() {
    let mut state = deposited(USER).next_state().unwrap();
    let before = state.clone();

    assert_eq!(
        state.apply_home_deposit(&assets(), &d("0.0000001")),
        Err(ValidationError::PrecisionExceeded {
            amount: d("0.0000001"),
            decimals: 6
        })
    );
    assert_eq!(
        state.apply_home_deposit(&assets(), &d("0")),
        Err(ValidationError::NonPositiveAmount(d("0")))
    );
    assert_eq!(
        state.apply_transfer_send(&assets(), RECIPIENT, &d("-1")),
        Err(ValidationError::NonPositiveAmount(d("-1")))
    );
    assert_eq!(state, before);

    let mut void = State::new_void("usdc", USER).unwrap();
    assert_eq!(
        void.apply_home_deposit(&assets(), &d("1")),
        Err(ValidationError::MissingField("home_channel_id"))
    );
}

#[test]
fn transfers_and_app_sessions() {
    let session = h("0x00000000000000000000000000000000000000000000000000000000000000aa");
    let mut state = deposited(USER).next_state().unwrap();

    state.apply_transfer_send(&assets(), RECIPIENT, &d("20")).unwrap();
    state.apply_transfer_receive(&assets(), RECIPIENT, &d("5.25")).unwrap();
    state.apply_commit(&assets(), session, &d("30")).unwrap();
    state.apply_release(&assets(), session, &d("10")).unwrap();
    assert_balanced(&state);

    let home = &state.home_ledger;
    assert_eq!(home.user_balance, d("65.75"));
    assert_eq!(home.user_net_flow, d("100.5"));
    assert_eq!(home.node_net_flow, d("-34.75"));
    assert_eq!(home.node_balance, d("0"));

    let kinds: Vec<_> = state.transitions.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        [
            TransitionType::HomeDeposit,
            TransitionType::TransferSend,
            TransitionType::TransferReceive,
            TransitionType::Commit,
            TransitionType::Release,
        ]
    );
    assert_eq!(state.transitions[1].account_id, Hash::from(RECIPIENT));
    assert_eq!(state.transitions[3].account_id, session);
    assert_eq!(state.intent(), Intent::Operate);

    // Every transition has its own id.
    let mut ids: Vec<_> = state.transitions.iter().map(|t| t.tx_id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), state.transitions.len());
}

#[test]
fn escrow_deposit_flow() {
    let mut state = mutually_locked(USER).next_state().unwrap();
    assert!(state.escrow_ledger.is_some());

    state.apply_escrow_deposit(&assets(), &d("10")).unwrap();
    assert_eq!(state.intent(), Intent::FinalizeEscrowDeposit);
    assert_balanced(&state);
    assert_eq!(state.home_ledger.user_balance, d("110.5"));
    assert_eq!(state.home_ledger.node_balance, d("0"));
    let escrow = state.escrow_ledger.as_ref().unwrap();
    assert_eq!(escrow.user_balance, d("0"));
    assert_eq!(escrow.node_balance, d("10"));

    let next = state.next_state().unwrap();
    assert!(next.escrow_ledger.is_none());
    assert!(next.escrow_channel_id.is_none());
    assert_eq!(next.home_ledger, state.home_ledger);
}

#[test]
fn escrow_withdrawal_flow() {
    let mut state = deposited(USER).next_state().unwrap();
    state
        .apply_escrow_lock(&assets(), 137, ESCROW_TOKEN, &d("40"))
        .unwrap();
    assert_eq!(state.intent(), Intent::InitiateEscrowWithdrawal);
    assert_balanced(&state);

    // A second escrow operation has to wait for the first one.
    assert!(matches!(
        state.apply_mutual_lock(&assets(), 137, ESCROW_TOKEN, &d("1")),
        Err(ValidationError::InvalidState(_))
    ));

    let mut state = state.next_state().unwrap();
    state.apply_escrow_withdraw(&assets(), &d("40")).unwrap();
    assert_eq!(state.intent(), Intent::FinalizeEscrowWithdrawal);
    assert_balanced(&state);
    assert_eq!(state.home_ledger.user_balance, d("60.5"));
    let escrow = state.escrow_ledger.as_ref().unwrap();
    assert_eq!(escrow.node_balance, d("0"));
    assert_eq!(escrow.user_net_flow, d("-40"));

    let mut state = state.next_state().unwrap();
    assert_eq!(
        state.apply_escrow_withdraw(&assets(), &d("1")),
        Err(ValidationError::MissingField("escrow_ledger"))
    );
}

#[test]
fn escrow_lock_needs_funds() {
    let mut state = deposited(USER).next_state().unwrap();
    assert!(matches!(
        state.apply_escrow_lock(&assets(), 137, ESCROW_TOKEN, &d("1000")),
        Err(ValidationError::NegativeBalance { .. })
    ));
    assert!(state.escrow_ledger.is_none());
    assert!(matches!(
        state.apply_escrow_lock(&assets(), 10, ESCROW_TOKEN, &d("1")),
        Err(ValidationError::AssetNotFound(_))
    ));
}

#[test]
fn migrate_mirrors_user_balance() {
    let mut state = deposited(USER).next_state().unwrap();
    state.apply_migrate(&assets(), 137, ESCROW_TOKEN).unwrap();
    assert_eq!(state.intent(), Intent::InitiateMigration);
    assert_balanced(&state);
    let escrow = state.escrow_ledger.as_ref().unwrap();
    assert_eq!(escrow.node_balance, d("100.5"));
    assert_eq!(escrow.blockchain_id, 137);
    assert_eq!(state.last_transition().unwrap().amount, d("100.5"));
}

#[test]
fn finalize_starts_new_epoch() {
    let mut state = deposited(USER).next_state().unwrap();
    state.apply_finalize().unwrap();
    assert!(state.is_final());
    assert_eq!(state.last_transition().unwrap().amount, d("100.5"));

    let next = state.next_state().unwrap();
    assert_eq!(next.epoch(), 1);
    assert_eq!(next.version(), state.version() + 1);
    assert!(next.transitions.is_empty());
    assert!(next.home_channel_id.is_none());
    assert_eq!(next.home_ledger, Ledger::default());
    next.validate().unwrap();
}

#[test]
fn acknowledgement_keeps_balances() {
    let mut state = deposited(USER).next_state().unwrap();
    let ledger = state.home_ledger.clone();
    state.apply_acknowledgement().unwrap();
    assert_eq!(state.home_ledger, ledger);
    assert_eq!(state.last_transition().unwrap().kind, TransitionType::Acknowledgement);
    assert_eq!(state.intent(), Intent::Operate);
}

#[test]
fn intent_mapping() {
    use TransitionType::*;
    let expected = [
        (Void, Intent::Operate),
        (Acknowledgement, Intent::Operate),
        (HomeDeposit, Intent::Deposit),
        (HomeWithdrawal, Intent::Withdraw),
        (EscrowDeposit, Intent::FinalizeEscrowDeposit),
        (EscrowWithdraw, Intent::FinalizeEscrowWithdrawal),
        (TransferSend, Intent::Operate),
        (TransferReceive, Intent::Operate),
        (Commit, Intent::Operate),
        (Release, Intent::Operate),
        (Migrate, Intent::InitiateMigration),
        (EscrowLock, Intent::InitiateEscrowWithdrawal),
        (MutualLock, Intent::InitiateEscrowDeposit),
        (Finalize, Intent::Close),
    ];
    for (kind, intent) in expected {
        assert_eq!(Intent::from(kind), intent, "{}", kind);
        assert_eq!(TransitionType::try_from(kind.code()), Ok(kind));
    }
    assert_eq!(Intent::InitiateMigration.code(), 8);
    assert_eq!(TransitionType::try_from(2), Err(UnknownTransitionType(2)));
}

#[test]
fn state_wire_format() {
    let state = mutually_locked(USER);
    let json = serde_json::to_value(&state).unwrap();

    assert_eq!(json["version"], "2");
    assert_eq!(json["epoch"], "0");
    assert_eq!(json["home_ledger"]["user_balance"], "100.5");
    assert_eq!(json["home_ledger"]["blockchain_id"], "1");
    assert_eq!(json["escrow_ledger"]["blockchain_id"], "137");
    assert_eq!(json["transitions"][1]["type"], 120);
    assert_eq!(json["transitions"][1]["amount"], "10");
    assert!(json.get("user_sig").is_none());

    let back: State = serde_json::from_value(json.clone()).unwrap();
    assert_eq!(back, state);
    back.validate().unwrap();

    let mut unknown = json;
    unknown["transitions"][0]["type"] = 3.into();
    assert!(serde_json::from_value::<State>(unknown).is_err());
}

#[test]
fn tampered_state_fails_validation() {
    let mut json = serde_json::to_value(deposited(USER)).unwrap();
    json["version"] = "5".into();
    let state: State = serde_json::from_value(json).unwrap();
    assert!(matches!(state.validate(), Err(ValidationError::InvalidState(_))));

    let mut state = deposited(USER);
    state.home_ledger.node_balance = d("1");
    assert!(matches!(state.validate(), Err(ValidationError::InvalidState(_))));
}

// Test key from the web3.js documentation, do not use it for anything else.
fn web3_signer() -> LocalSigner {
    let mut key = [0u8; 32];
    hex::decode_to_slice(
        "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        &mut key,
    )
    .unwrap();
    LocalSigner::from_private_key(&key).unwrap()
}

#[test]
fn golden_state_signature() {
    let state = deposited(USER);
    let sig = state
        .sign(&web3_signer(), SignatureValidator::Default, &assets())
        .unwrap();
    assert_eq!(
        sig.to_string(),
        "0x00702279ca5ffc0da3a54e9f73ba25137220fe17bc73f25437fff5d77014e5927e5f94007f859b8ce92f858ac08351992c42150615ee927d58d4e1574c03d348281b"
    );
    assert_eq!(sig.to_string().parse::<ChannelSignature>().unwrap(), sig);
    assert_eq!(
        state.recover_signer(&sig, &assets()).unwrap(),
        web3_signer().address()
    );
}

#[test]
fn co_signing() {
    let mut rng = StdRng::seed_from_u64(0);
    let user = LocalSigner::new(&mut rng);
    let node = LocalSigner::new(&mut rng);

    let mut state = deposited(user.address());
    assert!(matches!(
        state.verify_user_sig(&definition(), &assets(), &[], 0),
        Err(Error::Signature(SignatureError::Missing("user")))
    ));

    let user_sig = state.sign(&user, SignatureValidator::Default, &assets()).unwrap();
    state.set_user_sig(user_sig);
    state.verify_user_sig(&definition(), &assets(), &[], 0).unwrap();
    assert!(!state.is_co_signed());

    // Signed by the wrong key.
    let node_sig = state.sign(&user, SignatureValidator::Default, &assets()).unwrap();
    state.set_node_sig(node_sig);
    assert!(matches!(
        state.verify_node_sig(node.address(), &assets()),
        Err(Error::Signature(SignatureError::SignerMismatch { .. }))
    ));

    let node_sig = state.sign(&node, SignatureValidator::Default, &assets()).unwrap();
    state.set_node_sig(node_sig);
    state.verify_node_sig(node.address(), &assets()).unwrap();
    assert!(state.is_co_signed());

    // Signatures don't survive changes.
    let mut next = state.next_state().unwrap();
    assert!(!next.is_co_signed());
    next.set_user_sig(user_sig);
    assert!(next.verify_user_sig(&definition(), &assets(), &[], 0).is_err());
}

#[test]
fn session_key_signatures() {
    let mut rng = StdRng::seed_from_u64(1);
    let user = LocalSigner::new(&mut rng);
    let key = LocalSigner::new(&mut rng);

    let mut delegation = ChannelSessionKeyState {
        user_address: user.address(),
        session_key: key.address(),
        version: 1,
        assets: vec!["usdc".into()],
        expires_at: 100,
        user_sig: None,
    };
    delegation.sign(&user).unwrap();

    let mut state = deposited(user.address());
    let sig = state.sign(&key, SignatureValidator::SessionKey, &assets()).unwrap();
    state.set_user_sig(sig);

    // Only channels approving session keys accept them.
    assert!(matches!(
        state.verify_user_sig(&definition(), &assets(), std::slice::from_ref(&delegation), 99),
        Err(Error::Signature(SignatureError::UnapprovedValidator(1)))
    ));
    let approving = definition().approve(SignatureValidator::SessionKey);

    assert!(matches!(
        state.verify_user_sig(&approving, &assets(), &[], 0),
        Err(Error::Signature(SignatureError::UnauthorizedSessionKey(_)))
    ));
    state
        .verify_user_sig(&approving, &assets(), std::slice::from_ref(&delegation), 99)
        .unwrap();
    assert!(matches!(
        state.verify_user_sig(&approving, &assets(), std::slice::from_ref(&delegation), 100),
        Err(Error::Signature(SignatureError::SessionKeyExpired { .. }))
    ));

    // The key was not delegated for this asset.
    delegation.assets = vec!["eth".into()];
    delegation.sign(&user).unwrap();
    assert!(state
        .verify_user_sig(&approving, &assets(), std::slice::from_ref(&delegation), 0)
        .is_err());
}

#[test]
fn definition_validators() {
    let def = definition();
    assert!(def.approves(SignatureValidator::Default));
    assert!(!def.approves(SignatureValidator::SessionKey));
    let def = def.approve(SignatureValidator::SessionKey);
    assert!(def.approves(SignatureValidator::SessionKey));
    assert_eq!(def.approved_sig_validators, U256::from(3u64));
    assert_eq!(
        definition().check_approved(SignatureValidator::SessionKey),
        Err(SignatureError::UnapprovedValidator(1))
    );

    assert!(ChannelSignature::from_bytes(&[0u8; 65]).is_err());
    let mut bytes = [0u8; ChannelSignature::LEN];
    bytes[0] = 7;
    assert!(matches!(
        ChannelSignature::from_bytes(&bytes),
        Err(SignatureError::Malformed(_))
    ));
}
