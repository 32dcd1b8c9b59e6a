//! Drives the real client against the reference server on an ephemeral port.

use api_rest::{demo_users, router, AppState, ServerSettings};
use api_shared::StagePayload;
use referral_client::{
    BusOptions, ConnectionStatus, EventBusClient, FileApi, RestClient, TransportKind,
};
use referral_core::{
    DiagnosisOutcome, FileStatus, Identity, ListView, PortalError, Role, ServerEvent, Session,
    SessionKind, StageTitle,
};
use serde_json::json;
use std::time::Duration;
use tokio::sync::broadcast;

async fn spawn_server(settings: ServerSettings) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let app = router(AppState::new(demo_users(), settings));
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server");
    });
    format!("http://{addr}")
}

fn session(token: &str, role: Role) -> Session {
    Session::new(
        SessionKind::Web,
        Identity {
            id: token.into(),
            name: token.into(),
            role,
            practice: None,
        },
        token,
    )
}

async fn ready_submitted_file(base: &str, token: &str) -> uuid::Uuid {
    let api = RestClient::new(base, token);
    let file = api.create_file(None).await.expect("create");
    let id = file.id.expect("id");
    let images = json!([{ "id": "img-1", "url": "https://images.example.org/1.png" }]);
    for (stage, data) in [
        (StageTitle::ReferralForm, json!({"reason": "sudden floaters"})),
        (StageTitle::LeftEyeImages, images.clone()),
        (StageTitle::RightEyeImages, images),
        (StageTitle::CommunicationPreferences, json!({"sms": true})),
    ] {
        api.submit_stage(id, stage, StagePayload { data })
            .await
            .expect("stage");
    }
    api.submit_file(id).await.expect("submit");
    id
}

async fn next_event(rx: &mut broadcast::Receiver<ServerEvent>, wanted: ServerEvent) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if rx.recv().await.expect("bus open") == wanted {
                return;
            }
        }
    })
    .await
    .expect("event delivered");
}

async fn wait_connected(bus: &EventBusClient) -> ConnectionStatus {
    let mut status = bus.status();
    let connected = tokio::time::timeout(
        Duration::from_secs(10),
        status.wait_for(|s| s.is_connected()),
    )
    .await
    .expect("connected in time")
    .expect("status channel open");
    *connected
}

#[tokio::test(flavor = "multi_thread")]
async fn review_flow_enforces_single_ownership() {
    let base = spawn_server(ServerSettings::default()).await;
    let id = ready_submitted_file(&base, "optometrist-1").await;

    let reader = RestClient::new(&base, "reader-1");
    let doctor = RestClient::new(&base, "doctor-1");

    let claimed = reader.claim_file(id).await.expect("reader claims");
    assert_eq!(claimed.file_status, FileStatus::InReviewByReader);

    let err = doctor.claim_file(id).await.expect_err("second claim");
    assert!(matches!(err, PortalError::Conflict(_)));

    let in_progress = reader.fetch_in_progress().await.expect("fetch");
    assert_eq!(in_progress.and_then(|f| f.id), Some(id));

    reader
        .submit_stage(
            id,
            StageTitle::DraftDiagnosisForm,
            StagePayload {
                data: json!({"findings": "posterior vitreous detachment"}),
            },
        )
        .await
        .expect("diagnosis");
    reader.send_for_approval(id).await.expect("send");
    doctor.claim_file(id).await.expect("doctor claims");
    doctor.approve_file(id).await.expect("approve");
    let referred = doctor
        .record_outcome(id, DiagnosisOutcome::Referred)
        .await
        .expect("outcome");
    assert_eq!(referred.file_status, FileStatus::Referred);

    let optometrist = RestClient::new(&base, "optometrist-1");
    let pending = optometrist
        .list_files(ListView::PendingFiles)
        .await
        .expect("pending list");
    assert_eq!(pending.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_token_is_unauthorised_and_missing_file_is_none() {
    let base = spawn_server(ServerSettings::default()).await;
    let stranger = RestClient::new(&base, "nobody");
    assert!(matches!(
        stranger.fetch_in_progress().await,
        Err(PortalError::Unauthorised)
    ));

    let optometrist = RestClient::new(&base, "optometrist-1");
    assert_eq!(optometrist.fetch_in_progress().await.expect("fetch"), None);
    assert_eq!(
        optometrist
            .fetch_file(uuid::Uuid::new_v4())
            .await
            .expect("fetch"),
        None
    );
    assert!(optometrist.health().await.expect("health").ok);
}

#[tokio::test(flavor = "multi_thread")]
async fn streaming_transport_delivers_topics() {
    let base = spawn_server(ServerSettings::default()).await;
    let bus = EventBusClient::with_options(&base, BusOptions::default());
    let mut rx = bus.subscribe();

    bus.connect(&session("reader-1", Role::Reader));
    assert_eq!(
        wait_connected(&bus).await,
        ConnectionStatus::Connected(TransportKind::Streaming)
    );

    ready_submitted_file(&base, "practice-1").await;
    next_event(&mut rx, ServerEvent::FileSubmittedFromPractice).await;

    bus.disconnect();
    assert!(!bus.is_connected());
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_stream_falls_back_to_polling() {
    let settings = ServerSettings {
        streaming_enabled: false,
        poll_timeout: Duration::from_millis(500),
        ..ServerSettings::default()
    };
    let base = spawn_server(settings).await;
    let bus = EventBusClient::with_options(
        &base,
        BusOptions {
            poll_timeout: Duration::from_millis(500),
            ..BusOptions::default()
        },
    );
    let mut rx = bus.subscribe();

    bus.connect(&session("doctor-1", Role::Doctor));
    assert_eq!(
        wait_connected(&bus).await,
        ConnectionStatus::Connected(TransportKind::Polling)
    );

    RestClient::new(&base, "doctor-1")
        .emit_event(ServerEvent::FileClosedByTimeout)
        .await
        .expect("emit");
    next_event(&mut rx, ServerEvent::FileClosedByTimeout).await;
}

async fn assert_rejected_credential_closes(options: BusOptions) {
    let base = spawn_server(ServerSettings::default()).await;
    let bus = EventBusClient::with_options(&base, options);
    bus.connect(&session("revoked-token", Role::Reader));

    let mut status = bus.status();
    tokio::time::timeout(
        Duration::from_secs(10),
        status.wait_for(|s| *s == ConnectionStatus::Disconnected),
    )
    .await
    .expect("closed in time")
    .expect("status channel open");

    // Longer than the first backoff step: nothing may try again.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!status.has_changed().expect("status channel open"));
    assert_eq!(*status.borrow(), ConnectionStatus::Disconnected);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_stream_credential_stops_reconnecting() {
    assert_rejected_credential_closes(BusOptions::default()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_poll_credential_stops_reconnecting() {
    assert_rejected_credential_closes(BusOptions {
        polling_only: true,
        ..BusOptions::default()
    })
    .await;
}
