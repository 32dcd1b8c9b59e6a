use anyhow::Context;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{AppState, ServerSettings, demo_users, router};

/// Main entry point for the referral portal server
///
/// Serves the file lifecycle REST API and the event channel (streaming and long-poll) on one
/// listener, with Swagger UI at `/swagger-ui`.
///
/// # Environment Variables
/// - `REFERRAL_REST_ADDR`: listen address (default: "0.0.0.0:3000")
/// - `REFERRAL_STREAMING`: set to "false" to refuse streaming and force clients onto polling
/// - `REFERRAL_POLL_TIMEOUT_SECS`: how long a poll request is held open (default: 25)
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("referral_run=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("REFERRAL_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let settings = settings_from_env(
        std::env::var("REFERRAL_STREAMING").ok(),
        std::env::var("REFERRAL_POLL_TIMEOUT_SECS").ok(),
    )?;

    tracing::info!("++ Starting referral portal REST on {}", rest_addr);
    tracing::info!(
        streaming = settings.streaming_enabled,
        poll_timeout = ?settings.poll_timeout,
        "event channel configured"
    );

    let app = router(AppState::new(demo_users(), settings));
    let listener = tokio::net::TcpListener::bind(&rest_addr)
        .await
        .with_context(|| format!("binding {rest_addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("-- Shutting down");
        })
        .await?;

    Ok(())
}

fn settings_from_env(
    streaming: Option<String>,
    poll_timeout_secs: Option<String>,
) -> anyhow::Result<ServerSettings> {
    let mut settings = ServerSettings::default();
    if let Some(raw) = streaming {
        settings.streaming_enabled = match raw.trim().to_ascii_lowercase().as_str() {
            "" | "1" | "true" | "on" => true,
            "0" | "false" | "off" => false,
            other => anyhow::bail!("REFERRAL_STREAMING must be true or false, got {other:?}"),
        };
    }
    if let Some(raw) = poll_timeout_secs {
        let secs: u64 = raw
            .trim()
            .parse()
            .with_context(|| format!("REFERRAL_POLL_TIMEOUT_SECS is not a number: {raw:?}"))?;
        settings.poll_timeout = Duration::from_secs(secs);
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        let settings = settings_from_env(None, None).unwrap();
        assert!(settings.streaming_enabled);
        assert_eq!(settings.poll_timeout, Duration::from_secs(25));
    }

    #[test]
    fn streaming_can_be_switched_off() {
        let settings = settings_from_env(Some("False".into()), Some("5".into())).unwrap();
        assert!(!settings.streaming_enabled);
        assert_eq!(settings.poll_timeout, Duration::from_secs(5));
    }

    #[test]
    fn rejects_garbage() {
        assert!(settings_from_env(Some("maybe".into()), None).is_err());
        assert!(settings_from_env(None, Some("soon".into())).is_err());
    }
}
