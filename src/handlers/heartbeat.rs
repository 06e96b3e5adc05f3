//! Heartbeat endpoint (component H): upgrades to a full-duplex text-frame
//! connection, demuxes `Registration`/`Health` frames, and — for the
//! org-scoped variant — closes the stream on a claim/hostname mismatch.

use crate::{
    error::AppError,
    fleet::model::{parse_hostname, Health, Registration},
    handlers::bearer_token,
    state::AppState,
};
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct HealthMessage {
    #[serde(rename = "Score")]
    score: f64,
    #[serde(rename = "Hostname")]
    hostname: String,
}

/// Mirrors the wire shape before it's resolved into a tagged `Frame` — a
/// frame carrying both or neither field is rejected.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "Registration")]
    registration: Option<Registration>,
    #[serde(rename = "Health")]
    health: Option<HealthMessage>,
}

enum Frame {
    Registration(Registration),
    Health(HealthMessage),
}

#[derive(Debug, thiserror::Error)]
enum FrameError {
    #[error("frame carries neither Registration nor Health")]
    Empty,
    #[error("frame carries both Registration and Health")]
    Ambiguous,
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
}

fn parse_frame(raw: &str) -> Result<Frame, FrameError> {
    let frame: RawFrame = serde_json::from_str(raw)?;
    match (frame.registration, frame.health) {
        (Some(r), None) => Ok(Frame::Registration(r)),
        (None, Some(h)) => Ok(Frame::Health(h)),
        (None, None) => Err(FrameError::Empty),
        (Some(_), Some(_)) => Err(FrameError::Ambiguous),
    }
}

/// `/v2/platform/heartbeat`: the external trust boundary is ingress, so any
/// registration is accepted without further claim checks.
pub async fn heartbeat_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, state, None))
}

/// `/v2/platform/heartbeat-jwt`: requires a validated bearer token whose
/// subject carries the org a registration's hostname must parse to. The
/// org-scoped credential reuses the generic token
/// verifier; its `sub` field carries the org rather than a hostname.
pub async fn heartbeat_jwt_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_token(&headers).ok_or(AppError::Unauthorized)?;
    let claims = state.verifier.verify(token).map_err(|_| AppError::Unauthorized)?;
    let org = claims.sub;
    Ok(ws.on_upgrade(move |socket| handle_stream(socket, state, Some(org))))
}

async fn handle_stream(mut socket: WebSocket, state: AppState, required_org: Option<String>) {
    metrics::gauge!(crate::metrics_registry::names::HEARTBEAT_CONNECTIONS).increment(1.0);

    let mut registered_hostname: Option<String> = None;
    let mut gauge_experiment: Option<String> = None;
    let read_deadline = state.heartbeat_read_deadline;

    loop {
        let next = tokio::time::timeout(read_deadline, socket.recv()).await;
        let message = match next {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                warn!(error = %e, "heartbeat_transport_error");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!("heartbeat_read_deadline_exceeded");
                break;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let frame = match parse_frame(&text) {
            Ok(frame) => frame,
            Err(e) => {
                metrics::counter!(crate::metrics_registry::names::STREAM_DECODE_ERRORS).increment(1);
                warn!(error = %e, "heartbeat_stream_decode_error");
                if registered_hostname.is_none() {
                    break;
                }
                continue;
            }
        };

        match frame {
            Frame::Registration(registration) => {
                if let Some(ref org) = required_org {
                    let parsed_org = parse_hostname(&registration.hostname).map(|p| p.org);
                    if parsed_org.as_deref() != Some(org.as_str()) {
                        warn!(
                            hostname = %registration.hostname,
                            claim_org = %org,
                            "org_mismatch"
                        );
                        metrics::counter!(crate::metrics_registry::names::ORG_MISMATCH_ERRORS).increment(1);
                        break;
                    }
                }

                if registered_hostname.is_none() {
                    gauge_experiment = Some(registration.experiment.clone());
                    metrics::gauge!(
                        crate::metrics_registry::names::EXPERIMENT_HEALTHY_INSTANCES,
                        "experiment" => registration.experiment.clone()
                    )
                    .increment(1.0);
                }
                registered_hostname = Some(registration.hostname.clone());

                if let Some(fuser) = state.prom_fuser.clone() {
                    let hostname = registration.hostname.clone();
                    let machine = registration.machine.clone();
                    tokio::spawn(async move {
                        if let Err(e) = fuser.sweep_for_hostname(&hostname, &machine).await {
                            warn!(error = %e, "prometheus_sweep_for_hostname_failed");
                        }
                    });
                }

                if let Err(e) = state.tracker.register_instance(registration).await {
                    metrics::counter!(crate::metrics_registry::names::STORE_ERRORS).increment(1);
                    warn!(error = %e, "heartbeat_registration_store_error");
                    break;
                }
            }
            Frame::Health(health) => {
                if registered_hostname.as_deref() != Some(health.hostname.as_str()) {
                    warn!(hostname = %health.hostname, "health_before_registration_ignored");
                    continue;
                }
                if let Err(e) = state
                    .tracker
                    .update_health(&health.hostname, Health { score: health.score })
                    .await
                {
                    metrics::counter!(crate::metrics_registry::names::STORE_ERRORS).increment(1);
                    warn!(error = %e, "heartbeat_health_store_error");
                    break;
                }
            }
        }
    }

    metrics::gauge!(crate::metrics_registry::names::HEARTBEAT_CONNECTIONS).decrement(1.0);
    if let Some(experiment) = gauge_experiment {
        metrics::gauge!(
            crate::metrics_registry::names::EXPERIMENT_HEALTHY_INSTANCES,
            "experiment" => experiment
        )
        .decrement(1.0);
    }
    info!(hostname = ?registered_hostname, "heartbeat_stream_closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_frame_with_neither_variant() {
        let err = parse_frame(r#"{}"#).unwrap_err();
        assert!(matches!(err, FrameError::Empty));
    }

    #[test]
    fn rejects_frame_with_both_variants() {
        let raw = r#"{"Registration":{"hostname":"a","machine":"m","experiment":"ndt","service":"ndt/ndt7","site":"lga00","metro":"LGA","city":"c","country":"US","continent":"NA","project":"sandbox","type":"physical","uplink":"10g","latitude":0.0,"longitude":0.0,"probability":1.0,"services":{}},"Health":{"Score":1.0,"Hostname":"a"}}"#;
        let err = parse_frame(raw).unwrap_err();
        assert!(matches!(err, FrameError::Ambiguous));
    }

    #[test]
    fn parses_health_frame() {
        let raw = r#"{"Health":{"Score":0.8,"Hostname":"mlab1-lga00.mlab-sandbox.measurement-lab.org"}}"#;
        match parse_frame(raw).unwrap() {
            Frame::Health(h) => {
                assert_eq!(h.score, 0.8);
                assert_eq!(h.hostname, "mlab1-lga00.mlab-sandbox.measurement-lab.org");
            }
            _ => panic!("expected health frame"),
        }
    }

    /// The org-mismatch check in `handle_stream` boils down
    /// to comparing a registration's parsed org against the claim's `sub`;
    /// a real WebSocketUpgrade can't be driven through `oneshot`, so this
    /// tests the comparison directly rather than the socket plumbing.
    #[test]
    fn org_mismatch_check_rejects_hostname_from_other_org() {
        let required_org = "mlab".to_string();
        let hostname = "mlab1-lga00.gcp-project.measurement-lab.org";
        let parsed_org = parse_hostname(hostname).map(|p| p.org);
        assert_ne!(parsed_org.as_deref(), Some(required_org.as_str()));
    }

    #[test]
    fn org_match_check_accepts_hostname_from_same_org() {
        let required_org = "mlab".to_string();
        let hostname = "mlab1-lga00.mlab-sandbox.measurement-lab.org";
        let parsed_org = parse_hostname(hostname).map(|p| p.org);
        assert_eq!(parsed_org.as_deref(), Some(required_org.as_str()));
    }
}
