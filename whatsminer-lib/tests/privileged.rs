//! Privileged commands: token handshake, signing and the encrypted envelope.

mod common;

use common::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use whatsminer_lib::commands::{LedColor, LedSetting, NetConfig, Pool, PrePowerOnMessage};
use whatsminer_lib::{Md5Crypt, SaltedHash};

#[tokio::test]
async fn test_reboot_round_trip() {
    init_tracing();
    let fake = FakeMiner::start().await;
    let response = fake.miner().reboot().await.unwrap();

    assert_eq!(response.status, Status::Success);
    assert_eq!(response.code, Some(StatusCode::CommandOk));
    assert_eq!(response.msg, Some(json!("API command OK")));
    assert_eq!(fake.connections(), 2);

    let requests = fake.requests();
    assert_eq!(requests[0].body, json!({"cmd": "get_token"}));
    assert!(requests[1].encrypted);
    assert_eq!(requests[1].body, json!({"cmd": "reboot", "token": GOLDEN_SIGN}));
}

#[tokio::test]
async fn test_session_walks_every_state() {
    let fake = FakeMiner::start().await;
    let miner = fake.miner();
    let mut session = miner.session();
    session.execute(CommandName::SetLowPower.into()).await.unwrap();

    assert_eq!(session.state(), &SessionState::Done);
    assert_eq!(
        session.history(),
        &[
            SessionState::Start,
            SessionState::TokenRequested,
            SessionState::TokenReceived,
            SessionState::Connected,
            SessionState::Sent,
            SessionState::Received,
        ]
    );
}

#[tokio::test]
async fn test_every_call_fetches_a_new_token() {
    let fake = FakeMiner::start().await;
    let miner = fake.miner();
    miner.restart_btminer().await.unwrap();
    miner.restart_btminer().await.unwrap();

    let tokens = fake.requests().iter().filter(|r| r.cmd() == "get_token").count();
    assert_eq!(tokens, 2);
    assert_eq!(fake.connections(), 4);
}

#[tokio::test]
async fn test_wrong_password_is_rejected_by_miner() {
    let fake = FakeMiner::start().await;
    let miner = Whatsminer::new("127.0.0.1", fake.port()).with_password("not-admin");
    let mut session = miner.session();

    let err = session.execute(Command::new("reboot")).await.unwrap_err();
    assert_eq!(err.status_code(), Some(StatusCode::TokenCheckError));
    assert_eq!(session.state().failed_from(), Some(&SessionState::Received));
}

#[tokio::test]
async fn test_token_error_aborts_before_encryption() {
    let fake = FakeMiner::with_handler(|request| match request.cmd() {
        "get_token" => Reply::Plain(error(136, "over max connect")),
        _ => Reply::Encrypted(ok("API command OK")),
    })
    .await;
    let miner = fake.miner();
    let mut session = miner.session();

    let err = session.execute(Command::new("reboot")).await.unwrap_err();
    assert!(matches!(err, WMError::Token(_)), "got {err:?}");
    assert_eq!(session.state().failed_from(), Some(&SessionState::TokenRequested));
    assert_eq!(fake.connections(), 1);
}

#[tokio::test]
async fn test_token_missing_salt() {
    let fake = FakeMiner::with_handler(|_| {
        Reply::Plain(json!({"STATUS": "S", "When": 1, "Code": 134, "Msg": {"time": "T", "salt": "", "newsalt": "S2"}}))
    })
    .await;
    let err = fake.miner().reboot().await.unwrap_err();
    assert!(matches!(err, WMError::Token(_)), "got {err:?}");
}

#[tokio::test]
async fn test_listener_gone_after_token() {
    let fake = FakeMiner::with_connection_limit(1, standard_reply).await;
    let miner = fake.miner();
    let mut session = miner.session();

    let err = session.execute(Command::new("reboot")).await.unwrap_err();
    assert!(matches!(err, WMError::Connection { .. }), "got {err:?}");
    assert_eq!(session.state().failed_from(), Some(&SessionState::TokenReceived));
}

#[tokio::test]
async fn test_silent_after_send_times_out() {
    let fake = FakeMiner::with_handler(|request| {
        if request.encrypted {
            Reply::Silent
        } else {
            standard_reply(request)
        }
    })
    .await;
    let miner = fake
        .miner()
        .with_config(ClientConfig::default().with_read_timeout(Some(Duration::from_millis(200))));
    let mut session = miner.session();

    let err = session.execute(Command::new("reboot")).await.unwrap_err();
    assert!(matches!(err, WMError::Timeout(_)), "got {err:?}");
    assert_eq!(session.state().failed_from(), Some(&SessionState::Sent));
}

#[tokio::test]
async fn test_encrypted_device_error_is_returned_raw() {
    let fake = FakeMiner::with_handler(|request| {
        if request.encrypted {
            Reply::Encrypted(error(132, "Error"))
        } else {
            standard_reply(request)
        }
    })
    .await;

    let response = fake.miner().send_privileged(Command::new("reboot")).await.unwrap();
    assert_eq!(response.status, Status::Error);
    assert_eq!(response.code, Some(StatusCode::CommandError));

    let err = fake.miner().reboot().await.unwrap_err();
    assert_eq!(err.status_code(), Some(StatusCode::CommandError));
}

#[tokio::test]
async fn test_missing_password_opens_no_connection() {
    let fake = FakeMiner::start().await;
    let miner = Whatsminer::new("127.0.0.1", fake.port());

    let err = miner.reboot().await.unwrap_err();
    assert!(matches!(err, WMError::MissingPassword(ref cmd) if cmd == "reboot"), "got {err:?}");
    assert_eq!(fake.connections(), 0);
}

#[tokio::test]
async fn test_out_of_range_parameters_open_no_connection() {
    let fake = FakeMiner::start().await;
    let miner = fake.miner();

    assert!(matches!(
        miner.set_power_pct(101).await,
        Err(WMError::InvalidParameter(_))
    ));
    assert!(matches!(
        miner.set_target_freq(-101).await,
        Err(WMError::InvalidParameter(_))
    ));
    assert!(matches!(miner.update_pools(&[]).await, Err(WMError::InvalidParameter(_))));
    let four = vec![Pool::new("stratum+tcp://p:3333", "w", "x"); 4];
    assert!(matches!(
        miner.update_pools(&four).await,
        Err(WMError::InvalidParameter(_))
    ));
    assert_eq!(fake.connections(), 0);
}

#[tokio::test]
async fn test_parameter_shapes_on_the_wire() {
    let fake = FakeMiner::start().await;
    let miner = fake.miner();

    miner
        .update_pools(&[
            Pool::new("stratum+tcp://a:3333", "acct.1", "x"),
            Pool::new("stratum+tcp://b:443", "acct.2", "123"),
        ])
        .await
        .unwrap();
    miner.power_off(true).await.unwrap();
    miner
        .set_led(&LedSetting::Manual {
            color: LedColor::Red,
            period: 60,
            duration: 20,
            start: 0,
        })
        .await
        .unwrap();
    miner.set_led(&LedSetting::Auto).await.unwrap();
    miner.net_config(&NetConfig::Dhcp).await.unwrap();
    miner.set_target_freq(-5).await.unwrap();
    miner.set_power_pct(80).await.unwrap();
    miner.load_log("10.0.0.2", 9999, "udp").await.unwrap();
    miner
        .pre_power_on(false, PrePowerOnMessage::WaitForAdjustTemp)
        .await
        .unwrap();

    let bodies: Vec<Value> = fake
        .requests()
        .into_iter()
        .filter(|r| r.encrypted)
        .map(|r| r.body)
        .collect();
    let expected = vec![
        json!({"cmd": "update_pools", "token": GOLDEN_SIGN,
               "pool1": "stratum+tcp://a:3333", "worker1": "acct.1", "passwd1": "x",
               "pool2": "stratum+tcp://b:443", "worker2": "acct.2", "passwd2": "123"}),
        json!({"cmd": "power_off", "token": GOLDEN_SIGN, "respbefore": "true"}),
        json!({"cmd": "set_led", "token": GOLDEN_SIGN, "color": "red", "period": 60, "duration": 20, "start": 0}),
        json!({"cmd": "set_led", "token": GOLDEN_SIGN, "param": "auto"}),
        json!({"cmd": "net_config", "token": GOLDEN_SIGN, "param": "dhcp"}),
        json!({"cmd": "set_target_freq", "token": GOLDEN_SIGN, "percent": "-5"}),
        json!({"cmd": "set_power_pct", "token": GOLDEN_SIGN, "percent": "80"}),
        json!({"cmd": "load_log", "token": GOLDEN_SIGN, "ip": "10.0.0.2", "port": "9999", "proto": "udp"}),
        json!({"cmd": "pre_power_on", "token": GOLDEN_SIGN, "complete": "false", "msg": "wait for adjust temp"}),
    ];
    assert_eq!(bodies, expected);
}

struct CountingHasher(Arc<AtomicUsize>);

impl SaltedHash for CountingHasher {
    fn hash(&self, salt: &str, password: &str) -> Result<String, WMError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Md5Crypt.hash(salt, password)
    }
}

#[tokio::test]
async fn test_injected_hasher_is_used_for_key_and_sign() {
    let fake = FakeMiner::start().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let miner = fake.miner().with_hasher(CountingHasher(calls.clone()));

    miner.set_hostname("rack-3-slot-7").await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(fake.requests()[1].body["hostname"], "rack-3-slot-7");
}
