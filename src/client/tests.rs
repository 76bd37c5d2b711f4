use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::{channel::mpsc::unbounded, StreamExt};
use parking_lot::Mutex;
use rand::{rngs::StdRng, SeedableRng};
use serde_json::{json, Value};

use super::*;
use crate::{
    app::{AppAllocation, AppParticipant, AppSessionStatus, AppStateIntent, AppStateUpdate, SubmitDepositStateRequest},
    asset::Asset,
    channel::TransitionType,
    error::SignatureError,
    rpc::{Message, Method},
    settlement::tests::MockChain,
    sig::LocalSigner,
};

const TOKEN: Address = Address([0xaa; 20]);

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn asset_table() -> AssetTable {
    AssetTable::new([Asset {
        name: "USD Coin".into(),
        symbol: "USDC".into(),
        decimals: 6,
        suggested_blockchain_id: 1,
        tokens: vec![Token {
            name: "USD Coin".into(),
            symbol: "USDC".into(),
            address: TOKEN,
            blockchain_id: 1,
            decimals: 6,
        }],
    }])
}

/// What the scripted node received and the states it signed.
#[derive(Default)]
struct NodeLog {
    requests: Vec<String>,
    states: HashMap<String, State>,
    definitions: HashMap<String, ChannelDefinition>,
}

/// A node answering on the other end of an in-memory connection. Signs
/// every state with `signer`.
fn spawn_node(signer: LocalSigner, log: Arc<Mutex<NodeLog>>) -> RpcClient {
    let (to_node, mut requests) = unbounded::<String>();
    let (replies, from_node) = unbounded::<Result<String, String>>();
    let assets = asset_table();

    tokio::spawn(async move {
        while let Some(text) = requests.next().await {
            let req = Message::decode(&text).unwrap();
            log.lock().requests.push(req.method.clone());
            let method: Method = req.method.parse().unwrap();
            let result = answer(method, req.payload, &signer, &assets, &log);
            let reply = match result {
                Ok(payload) => Message::response(req.request_id, req.method, payload),
                Err(e) => Message::error_response(req.request_id, req.method, e),
            };
            if replies.unbounded_send(Ok(reply.encode().unwrap())).is_err() {
                break;
            }
        }
    });

    let config = Config {
        keepalive_interval: Duration::from_secs(3600),
        ..Config::default()
    };
    RpcClient::from_parts(to_node, from_node, &config)
}

fn countersign(state: State, signer: &LocalSigner, assets: &AssetTable, log: &Mutex<NodeLog>) -> Value {
    let sig = state
        .sign(signer, SignatureValidator::Default, assets)
        .unwrap();
    let mut stored = state;
    stored.set_node_sig(sig);
    log.lock().states.insert(stored.asset.clone(), stored);
    json!({ "signature": sig })
}

fn answer(
    method: Method,
    payload: Value,
    signer: &LocalSigner,
    assets: &AssetTable,
    log: &Mutex<NodeLog>,
) -> Result<Value, String> {
    Ok(match method {
        Method::GetLatestState => {
            let asset = payload["asset"].as_str().unwrap().to_string();
            let wallet: Address = payload["wallet"].as_str().unwrap().parse().unwrap();
            let state = match log.lock().states.get(&asset) {
                Some(state) => state.clone(),
                None => State::new_void(asset, wallet).unwrap(),
            };
            json!({ "state": state })
        }
        Method::RequestCreation | Method::SubmitState => {
            let state: State = serde_json::from_value(payload["state"].clone()).map_err(|e| e.to_string())?;
            if state.user_sig().is_none() {
                return Err("state not signed".into());
            }
            if method == Method::RequestCreation {
                let definition: ChannelDefinition =
                    serde_json::from_value(payload["channel_definition"].clone()).map_err(|e| e.to_string())?;
                log.lock().definitions.insert(state.asset.clone(), definition);
            }
            countersign(state, signer, assets, log)
        }
        Method::GetHomeChannel => {
            let asset = payload["asset"].as_str().unwrap();
            let log = log.lock();
            let (Some(state), Some(definition)) = (log.states.get(asset), log.definitions.get(asset)) else {
                return Err(format!("no {} channel", asset));
            };
            let channel = api::ChannelInfo {
                channel_id: state.home_channel_id.unwrap(),
                user_wallet: state.user_wallet,
                kind: api::ChannelType::Home,
                blockchain_id: state.home_ledger.blockchain_id,
                token_address: state.home_ledger.token_address,
                challenge_duration: definition.challenge,
                nonce: definition.nonce,
                approved_sig_validators: definition.approved_sig_validators,
                status: api::ChannelStatus::Open,
                state_version: state.version(),
            };
            json!({ "channel": channel })
        }
        Method::SubmitDepositState => {
            let req: SubmitDepositStateRequest = serde_json::from_value(payload).map_err(|e| e.to_string())?;
            countersign(req.user_state, signer, assets, log)
        }
        Method::CreateAppSession => {
            let req: CreateAppSessionRequest = serde_json::from_value(payload).map_err(|e| e.to_string())?;
            json!({
                "app_session_id": req.definition.id().unwrap(),
                "version": "1",
                "status": "open",
            })
        }
        Method::SubmitAppState | Method::SubmitAppSessionKeyState => json!({}),
        Method::RebalanceAppSessions => {
            let batch: RebalanceBatch = serde_json::from_value(payload).map_err(|e| e.to_string())?;
            let sessions: Vec<_> = batch.expected_versions().collect();
            json!({ "sessions": sessions })
        }
        _ => return Err(format!("{} not supported", method)),
    })
}

struct Setup {
    client: Client,
    user: Arc<LocalSigner>,
    log: Arc<Mutex<NodeLog>>,
}

/// A client whose node signs with `node_key`, but is expected to sign with
/// `expected_node`.
fn setup_with(seed: u64, node_key: LocalSigner, expected_node: Address) -> Setup {
    let mut rng = StdRng::seed_from_u64(seed);
    let user = Arc::new(LocalSigner::new(&mut rng));
    let log = Arc::new(Mutex::new(NodeLog::default()));
    let rpc = spawn_node(node_key, log.clone());
    let client = Client::new(rpc, user.clone(), expected_node, asset_table());
    Setup { client, user, log }
}

fn setup(seed: u64) -> Setup {
    let node = LocalSigner::new(&mut StdRng::seed_from_u64(seed + 1000));
    let address = node.address();
    setup_with(seed, node, address)
}

fn definition() -> ChannelDefinition {
    ChannelDefinition::new(1, 86400)
}

#[tokio::test]
async fn channel_lifecycle() {
    let Setup { client, log, .. } = setup(1);

    let created = client
        .create_channel("usdc", 1, definition(), &d("100"))
        .await
        .unwrap();
    assert_eq!(created.tx_hash, None);
    let state = &created.state;
    assert_eq!(state.version(), 1);
    assert!(state.is_co_signed());
    assert_eq!(state.home_ledger.user_balance, d("100"));
    state
        .verify_node_sig(client.node_address(), client.assets())
        .unwrap();

    client.deposit("usdc", &d("50")).await.unwrap();
    let recipient = Address([0x33; 20]);
    let sent = client.transfer("USDC", recipient, &d("20.5")).await.unwrap();
    assert_eq!(sent.version(), 3);
    assert_eq!(sent.last_transition().unwrap().kind, TransitionType::TransferSend);
    assert_eq!(sent.home_ledger.user_balance, d("129.5"));

    let withdrawn = client.withdraw("usdc", &d("29.5")).await.unwrap();
    assert_eq!(withdrawn.state.home_ledger.user_balance, d("100"));

    let closed = client.close_channel("usdc").await.unwrap();
    assert!(closed.state.is_final());
    assert_eq!(client.stored_state("usdc"), Some(closed.state));

    assert_eq!(
        log.lock().requests,
        vec![
            Method::GetLatestState.as_str(),
            Method::RequestCreation.as_str(),
            Method::SubmitState.as_str(),
            Method::SubmitState.as_str(),
            Method::SubmitState.as_str(),
            Method::SubmitState.as_str(),
        ]
    );
}

#[tokio::test]
async fn validation_happens_before_submission() {
    let Setup { client, log, .. } = setup(2);
    client
        .create_channel("usdc", 1, definition(), &d("1"))
        .await
        .unwrap();
    let sent = log.lock().requests.len();

    assert!(matches!(
        client.deposit("usdc", &d("0.0000001")).await,
        Err(Error::Validation(ValidationError::PrecisionExceeded { decimals: 6, .. }))
    ));
    assert!(matches!(
        client.withdraw("usdc", &d("2")).await,
        Err(Error::Validation(ValidationError::NegativeBalance { .. }))
    ));
    assert!(matches!(
        client.create_channel("usdc", 5, definition(), &d("1")).await,
        Err(Error::Validation(ValidationError::UnsupportedAsset { blockchain_id: 5, .. }))
    ));
    assert_eq!(log.lock().requests.len(), sent);
    assert_eq!(client.stored_state("usdc").unwrap().version(), 1);
}

#[tokio::test]
async fn rejects_foreign_node_signature() {
    let impostor = LocalSigner::new(&mut StdRng::seed_from_u64(99));
    let Setup { client, .. } = setup_with(3, impostor, Address([0x22; 20]));

    assert!(matches!(
        client.create_channel("usdc", 1, definition(), &d("1")).await,
        Err(Error::Signature(SignatureError::SignerMismatch { .. }))
    ));
    assert_eq!(client.stored_state("usdc"), None);
}

#[tokio::test]
async fn node_errors_surface() {
    let Setup { client, .. } = setup(4);
    assert!(matches!(
        client.rpc().call::<api::GetBalances>(&api::WalletParams { wallet: client.address() }).await,
        Err(rpc::RpcError::Node(msg)) if msg.contains("not supported")
    ));
}

#[tokio::test]
async fn settlement_follows_co_signing() {
    let Setup { client, .. } = setup(5);
    assert!(matches!(
        client.checkpoint("usdc").await,
        Err(Error::Settlement(SettlementError::NotConfigured))
    ));

    let chain = Arc::new(MockChain::default());
    let client = client.with_settlement(chain.clone());

    let created = client
        .create_channel("usdc", 1, definition(), &d("10"))
        .await
        .unwrap();
    assert!(created.tx_hash.is_some());
    let deposited = client.deposit("usdc", &d("5")).await.unwrap();
    assert!(deposited.tx_hash.is_some());
    client.transfer("usdc", Address([0x44; 20]), &d("1")).await.unwrap();
    client.challenge("usdc").await.unwrap();
    client.close_channel("usdc").await.unwrap();

    let channel = created.state.home_channel_id.unwrap();
    assert_eq!(
        *chain.submitted.lock(),
        vec![
            ("create", channel, 1),
            ("checkpoint", channel, 2),
            ("challenge", channel, 3),
            ("close", channel, 4),
        ]
    );

    assert_eq!(client.wallet_balance("usdc", 1).await.unwrap(), d("1000"));
    assert!(client
        .ensure_allowance("usdc", 1, &d("3"))
        .await
        .unwrap()
        .is_some());
    assert_eq!(client.ensure_allowance("usdc", 1, &d("2")).await.unwrap(), None);
}

fn solo_definition(wallet: Address, nonce: u64) -> AppDefinition {
    AppDefinition {
        application: "chess".into(),
        participants: vec![AppParticipant {
            wallet_address: wallet,
            signature_weight: 1,
        }],
        quorum: 1,
        nonce,
    }
}

fn app_update(id: Hash, intent: AppStateIntent, version: u64, allocations: Vec<AppAllocation>) -> SignedAppStateUpdate {
    SignedAppStateUpdate::new(AppStateUpdate {
        app_session_id: id,
        intent,
        version,
        allocations,
        session_data: String::new(),
    })
}

#[tokio::test]
async fn app_session_flow() {
    let Setup { client, user, .. } = setup(6);
    let me = user.address();
    client
        .create_channel("usdc", 1, definition(), &d("100"))
        .await
        .unwrap();

    let first = client
        .create_app_session(solo_definition(me, 1), String::new(), Vec::new())
        .await
        .unwrap();
    let second = client
        .create_app_session(solo_definition(me, 2), String::new(), Vec::new())
        .await
        .unwrap();
    assert_eq!(client.app_session(&first).unwrap().version, 1);

    // Commit 10 from the channel into the first session.
    let mut deposit = app_update(first, AppStateIntent::Deposit, 2, vec![AppAllocation::new(me, "usdc", d("10"))]);
    client.sign_app_update(&mut deposit).unwrap();
    let state = client
        .submit_app_session_deposit(deposit, "usdc", &d("10"))
        .await
        .unwrap();
    assert_eq!(state.last_transition().unwrap().kind, TransitionType::Commit);
    assert_eq!(state.home_ledger.user_balance, d("90"));
    assert!(state.is_co_signed());

    // Move 4 to the second session.
    let mut out = app_update(first, AppStateIntent::Rebalance, 3, vec![AppAllocation::new(me, "usdc", d("6"))]);
    let mut into = app_update(second, AppStateIntent::Rebalance, 2, vec![AppAllocation::new(me, "usdc", d("4"))]);
    client.sign_app_update(&mut out).unwrap();
    client.sign_app_update(&mut into).unwrap();
    client.rebalance_app_sessions(vec![out, into]).await.unwrap();
    assert_eq!(client.app_session(&second).unwrap().version, 2);

    // Unsigned updates never reach the node.
    let unsigned = app_update(second, AppStateIntent::Close, 3, vec![AppAllocation::new(me, "usdc", d("4"))]);
    assert!(matches!(
        client.submit_app_state(unsigned).await,
        Err(Error::Signature(SignatureError::QuorumNotMet { weight: 0, quorum: 1 }))
    ));

    let mut close = app_update(second, AppStateIntent::Close, 3, vec![AppAllocation::new(me, "usdc", d("4"))]);
    client.sign_app_update(&mut close).unwrap();
    client.submit_app_state(close).await.unwrap();
    assert_eq!(
        client.app_session(&second).unwrap().status,
        AppSessionStatus::Closed
    );
}

#[tokio::test]
async fn events_update_tracked_sessions() {
    let (to_node, _requests) = unbounded::<String>();
    let (replies, from_node) = unbounded::<Result<String, String>>();
    let rpc = RpcClient::from_parts(to_node, from_node, &Config::default());
    let user = Arc::new(LocalSigner::new(&mut StdRng::seed_from_u64(7)));
    let client = Client::new(rpc, user.clone(), Address([0x22; 20]), asset_table());

    let definition = solo_definition(user.address(), 1);
    let id = definition.id().unwrap();
    let session = json!({
        "app_session_id": id,
        "definition": definition,
        "status": "open",
        "version": "3",
        "allocations": [],
        "session_data": "",
    });
    for (method, payload) in [("message", json!("hello")), ("asu", session)] {
        replies
            .unbounded_send(Ok(Message::event(method, payload).encode().unwrap()))
            .unwrap();
    }
    drop(replies);

    let events: Vec<_> = client.events().collect().await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], Event::Message(json!("hello")));
    assert_eq!(client.app_session(&id).unwrap().version, 3);
}

#[tokio::test]
async fn channel_must_approve_wallet_signatures() {
    let Setup { client, log, .. } = setup(8);
    let session_keys_only = ChannelDefinition {
        approved_sig_validators: U256::from(2u64),
        ..definition()
    };
    assert!(matches!(
        client.create_channel("usdc", 1, session_keys_only, &d("1")).await,
        Err(Error::Signature(SignatureError::UnapprovedValidator(0)))
    ));
    assert!(log.lock().requests.is_empty());
    assert_eq!(client.stored_state("usdc"), None);
}

#[tokio::test]
async fn app_deposit_uses_the_node_channel_definition() {
    let Setup { client, user, log } = setup(9);
    let me = user.address();
    client
        .create_channel("usdc", 1, definition(), &d("100"))
        .await
        .unwrap();

    // Same wallet and node, but without local knowledge of the channel.
    let node = LocalSigner::new(&mut StdRng::seed_from_u64(9 + 1000));
    let node_address = node.address();
    let rpc = spawn_node(node, log.clone());
    let client = Client::new(rpc, user, node_address, asset_table());

    let id = client
        .create_app_session(solo_definition(me, 1), String::new(), Vec::new())
        .await
        .unwrap();
    let mut deposit = app_update(id, AppStateIntent::Deposit, 2, vec![AppAllocation::new(me, "usdc", d("10"))]);
    client.sign_app_update(&mut deposit).unwrap();
    let state = client
        .submit_app_session_deposit(deposit, "usdc", &d("10"))
        .await
        .unwrap();
    assert_eq!(state.version(), 2);

    let requests = log.lock().requests.clone();
    assert_eq!(
        requests[requests.len() - 3..],
        [
            Method::GetHomeChannel.as_str(),
            Method::GetLatestState.as_str(),
            Method::SubmitDepositState.as_str(),
        ]
    );
}
