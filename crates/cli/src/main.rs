use anyhow::Context;
use clap::{Parser, Subcommand};
use referral_client::{EventBusClient, FileApi, PortalContext, RestClient};
use referral_core::{
    compute_file_view,
    constants::{API_URL_OVERRIDE, ENV_FLAG, EVENTS_URL_OVERRIDE},
    environment_from_env_value, CoreConfig, FileStatus, FileView, Identity, PatientFile, Role,
    RoleRouteTable, RouteDecision, Session, SessionKind, SessionState,
};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "referral")]
#[command(about = "Referral portal operator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the stage view for a patient file stored as JSON
    Stages {
        /// Path to the patient file JSON
        file: PathBuf,
        /// Viewer role (optometrist, practice, reader, doctor)
        #[arg(long)]
        role: Role,
        /// Viewer user id
        #[arg(long, default_value = "cli-user")]
        user: String,
        /// Print the view as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the statuses a file can move to from the given status
    Transitions {
        /// Current status, e.g. in_review_by_reader
        status: FileStatus,
    },
    /// Check what route protection does with a path
    Route {
        /// Path to navigate to
        path: String,
        /// Role of a signed-in web session (omit for signed out)
        #[arg(long)]
        web_role: Option<Role>,
        /// Whether a tablet session is signed in
        #[arg(long)]
        tablet: bool,
    },
    /// Fetch the caller's in-progress file and print its stage view
    InProgress {
        /// Session refresh token
        #[arg(long)]
        token: String,
        /// Caller role
        #[arg(long)]
        role: Role,
        /// Caller user id
        #[arg(long)]
        user: String,
    },
    /// Print server events as they arrive
    Watch {
        /// Session refresh token
        #[arg(long)]
        token: String,
        /// Connect as the tablet session
        #[arg(long)]
        tablet: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("referral_client=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Stages {
            file,
            role,
            user,
            json,
        }) => {
            let patient_file = load_patient_file(&file)?;
            let view = compute_file_view(role, Some(&patient_file), &user);
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print!("{}", render_view(&view));
            }
        }
        Some(Commands::Transitions { status }) => {
            let next = status.allowed_transitions();
            if next.is_empty() {
                println!("{status} is terminal");
            } else {
                for to in next {
                    println!("{status} -> {to}");
                }
            }
        }
        Some(Commands::Route {
            path,
            web_role,
            tablet,
        }) => {
            let sessions = session_state(web_role, tablet);
            match RoleRouteTable::default_table().guard(&sessions, &path) {
                RouteDecision::Allow => println!("allow {path}"),
                RouteDecision::Redirect(to) => println!("redirect {path} -> {to}"),
            }
        }
        Some(Commands::InProgress { token, role, user }) => {
            let config = load_config()?;
            let api = RestClient::new(config.api_base_url(), token);
            let file = api
                .fetch_in_progress()
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))
                .context("fetching in-progress file")?;
            print!("{}", render_view(&compute_file_view(role, file.as_ref(), &user)));
        }
        Some(Commands::Watch { token, tablet }) => {
            let config = load_config()?;
            let kind = if tablet {
                SessionKind::Tablet
            } else {
                SessionKind::Web
            };
            watch(&config, kind, token).await?;
        }
        None => {
            println!("No command given. Try --help.");
        }
    }

    Ok(())
}

/// Resolve configuration once from the environment.
fn load_config() -> anyhow::Result<CoreConfig> {
    let environment = environment_from_env_value(std::env::var(ENV_FLAG).ok())?;
    let config = CoreConfig::for_environment(environment).with_overrides(
        std::env::var(API_URL_OVERRIDE).ok(),
        std::env::var(EVENTS_URL_OVERRIDE).ok(),
    )?;
    Ok(config)
}

fn load_patient_file(path: &Path) -> anyhow::Result<PatientFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let file = serde_json::from_str(&raw)
        .with_context(|| format!("parsing patient file {}", path.display()))?;
    Ok(file)
}

fn render_view(view: &FileView) -> String {
    let FileView::Staged(staged) = view else {
        return "No patient file. Start a new patient request.\n".to_string();
    };

    let mut out = format!(
        "file {} [{}] {:?}\n",
        staged.file_id, staged.status, staged.sequence
    );
    for stage in &staged.stages {
        let marker = if stage.title() == staged.active {
            ">"
        } else {
            " "
        };
        let mut flags = Vec::new();
        if stage.descriptor.disabled {
            flags.push("disabled");
        }
        if stage.completed {
            flags.push("completed");
        }
        out.push_str(&format!(
            "{marker} {:<28} {:?}{}\n",
            stage.title().label(),
            stage.variant,
            if flags.is_empty() {
                String::new()
            } else {
                format!(" ({})", flags.join(", "))
            }
        ));
    }
    out
}

fn session_state(web_role: Option<Role>, tablet: bool) -> SessionState {
    let identity = |role: Role| Identity {
        id: format!("cli-{role}"),
        name: "CLI".into(),
        role,
        practice: None,
    };
    SessionState {
        web: web_role.map(|role| Session::new(SessionKind::Web, identity(role), "cli")),
        tablet: tablet
            .then(|| Session::new(SessionKind::Tablet, identity(Role::Optometrist), "cli")),
    }
}

async fn watch(config: &CoreConfig, kind: SessionKind, token: String) -> anyhow::Result<()> {
    let bus = EventBusClient::new(config);
    let ctx = PortalContext::with_bus(config.clone(), bus.clone());
    let mut events = bus.subscribe();
    let mut status = bus.status();

    // The server resolves the real identity from the token.
    let identity = Identity {
        id: "cli".into(),
        name: "CLI".into(),
        role: Role::Optometrist,
        practice: None,
    };
    ctx.sign_in(Session::new(kind, identity, token));
    println!("Watching {} ({kind}). Ctrl-C to stop.", config.events_base_url());

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => println!("{event}"),
                Err(RecvError::Lagged(missed)) => tracing::warn!(missed, "event printer fell behind"),
                Err(RecvError::Closed) => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("status: {:?}", *status.borrow());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    ctx.sign_out(kind);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_and_renders_a_draft() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let file = PatientFile::new_draft("PF-00042");
        write!(tmp, "{}", serde_json::to_string(&file).unwrap()).unwrap();

        let loaded = load_patient_file(tmp.path()).unwrap();
        assert_eq!(loaded, file);

        let rendered = render_view(&compute_file_view(Role::Optometrist, Some(&loaded), "opt-1"));
        assert!(rendered.contains("> Referral Form"));
        assert!(rendered.contains("Submit File"));
        assert!(rendered.contains("disabled"));
    }

    #[test]
    fn malformed_file_reports_path() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "{{not json").unwrap();
        let err = load_patient_file(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("parsing patient file"));
    }

    #[test]
    fn missing_file_renders_call_to_action() {
        assert!(render_view(&FileView::NoFile).starts_with("No patient file"));
    }

    #[test]
    fn route_check_uses_role_table() {
        let sessions = session_state(Some(Role::Optometrist), false);
        assert_eq!(
            RoleRouteTable::default_table().guard(&sessions, "/overview"),
            RouteDecision::Redirect("/availability".into())
        );
        let signed_out = session_state(None, false);
        assert_eq!(
            RoleRouteTable::default_table().guard(&signed_out, "/tablet/payment"),
            RouteDecision::Redirect("/tablet/login".into())
        );
    }
}
