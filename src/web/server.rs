//! HTTP callback server that redeems verification tokens

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::managers::SharedVerificationManager;
use crate::platform::SharedPlatform;
use crate::verification::{redeem, CallbackPayload, RecordOrdering, RedeemError};

/// Shared state for web handlers
#[derive(Clone)]
pub struct AppState {
    pub verification_manager: SharedVerificationManager,
    pub platform: SharedPlatform,
    pub ordering: RecordOrdering,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(no_access))
        .route("/discord-auth/return", post(discord_auth_return))
        .route("/verify", get(legacy_verify))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for RedeemError {
    fn into_response(self) -> Response {
        let status = match &self {
            RedeemError::MissingToken
            | RedeemError::MalformedBody { .. }
            | RedeemError::MalformedId { .. }
            | RedeemError::MissingMemberId => StatusCode::BAD_REQUEST,
            RedeemError::Expired | RedeemError::InvalidToken => StatusCode::UNAUTHORIZED,
            RedeemError::GuildNotFound | RedeemError::MemberNotFound => StatusCode::NOT_FOUND,
            RedeemError::SecretNotConfigured
            | RedeemError::RoleNotConfigured
            | RedeemError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

async fn no_access() -> &'static str {
    "No access"
}

/// POST /discord-auth/return - token in the JSON body or the query string
async fn discord_auth_return(
    State(state): State<AppState>,
    Query(query): Query<CallbackPayload>,
    body: Bytes,
) -> Result<(StatusCode, String), RedeemError> {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        query
    } else {
        let parsed: CallbackPayload = serde_json::from_slice(&body).map_err(|e| {
            warn!("Rejecting callback with unreadable body: {}", e);
            RedeemError::MalformedBody {
                reason: e.to_string(),
            }
        })?;
        parsed.or(query)
    };
    complete(&state, payload, StatusCode::CREATED).await
}

/// GET /verify?jwt=... - older links point here
async fn legacy_verify(
    State(state): State<AppState>,
    Query(query): Query<CallbackPayload>,
) -> Result<(StatusCode, String), RedeemError> {
    complete(&state, query, StatusCode::OK).await
}

async fn complete(
    state: &AppState,
    payload: CallbackPayload,
    success: StatusCode,
) -> Result<(StatusCode, String), RedeemError> {
    let redemption = redeem(
        &state.verification_manager,
        state.platform.as_ref(),
        payload,
        state.ordering,
    )
    .await
    .map_err(|e| {
        warn!("Verification callback failed: {}", e);
        e
    })?;

    Ok((
        success,
        format!(
            "Verification complete for member ID {}. You can close this page.",
            redemption.member_id
        ),
    ))
}

struct RunningServer {
    port: u16,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the listener so it can be moved to another port at runtime
pub struct WebServer {
    state: AppState,
    bind: String,
    running: Mutex<Option<RunningServer>>,
}

impl WebServer {
    pub fn new(state: AppState, bind: impl Into<String>) -> Self {
        Self {
            state,
            bind: bind.into(),
            running: Mutex::new(None),
        }
    }

    /// Bind `port` and serve. A previous listener on another port is only
    /// shut down once the new one is bound, so a failed move leaves it
    /// serving.
    pub async fn start(&self, port: u16) -> anyhow::Result<()> {
        let mut running = self.running.lock().await;
        let address = format!("{}:{}", self.bind, port);

        if running.as_ref().is_some_and(|r| r.port == port) {
            if let Some(previous) = running.take() {
                info!("Restarting web server on port {}", port);
                stop_server(previous).await;
            }
        }
        let listener = tokio::net::TcpListener::bind(&address).await?;
        if let Some(previous) = running.take() {
            info!("Stopping web server on port {}", previous.port);
            stop_server(previous).await;
        }
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let app = router(self.state.clone());

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!("Web server error: {}", e);
            }
        });

        info!("Verification callback server listening on http://{}", address);
        *running = Some(RunningServer {
            port,
            shutdown,
            handle,
        });
        Ok(())
    }

    pub async fn port(&self) -> Option<u16> {
        self.running.lock().await.as_ref().map(|r| r.port)
    }
}

async fn stop_server(server: RunningServer) {
    let _ = server.shutdown.send(());
    if let Err(e) = server.handle.await {
        error!("Web server task failed during shutdown: {}", e);
    }
}
