use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use peercall::calls::media::{FileCapture, IceServer, MediaConstraints, WebRtcEngine};
use peercall::config::{ClientConfig, DEFAULT_STUN_SERVER};
use peercall::directory::{DirectoryConfig, RpcDirectory};
use peercall::http::UreqHttpClient;
use peercall::transport::SocketIoTransportFactory;
use peercall::types::events::EventBus;
use peercall::{CallHandle, Contact, Identity, IdentitySession, SessionDeps};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

// Usage:
//   cargo run -- --identity alice --relay-url https://relay.example
//   cargo run -- -i alice --call bob --audio-file voice.ogg --video-file cam.ivf
//
// Calls need a source for every captured track. Without one the call fails
// to set up, the same way a missing camera does.
//
// Once running, type `call <identity>`, `accept`, `decline`, `hangup`,
// `end` or `quit` on stdin.

#[derive(Parser, Debug)]
#[command(name = "peercall")]
#[command(about = "Peer-to-peer video calls over a Socket.IO signaling relay")]
struct Cli {
    /// Who we are. Without it the client stays idle.
    #[arg(short, long, env = "PEERCALL_IDENTITY")]
    identity: Option<String>,

    #[arg(long, env = "PEERCALL_RELAY_URL", default_value = "http://localhost:3000")]
    relay_url: String,

    #[arg(long, env = "PEERCALL_DIRECTORY_URL", default_value = "")]
    directory_url: String,

    #[arg(long, env = "PEERCALL_DIRECTORY_KEY")]
    directory_key: Option<String>,

    #[arg(long, env = "PEERCALL_STUN", default_value = DEFAULT_STUN_SERVER, value_delimiter = ',')]
    stun: Vec<String>,

    #[arg(long, env = "PEERCALL_TURN_URL")]
    turn_url: Option<String>,

    #[arg(long, env = "PEERCALL_TURN_USERNAME", default_value = "")]
    turn_username: String,

    #[arg(long, env = "PEERCALL_TURN_CREDENTIAL", default_value = "")]
    turn_credential: String,

    /// Ask before answering incoming calls.
    #[arg(long, env = "PEERCALL_MANUAL_ACCEPT")]
    manual_accept: bool,

    #[arg(long, env = "PEERCALL_DISPLAY_NAME")]
    display_name: Option<String>,

    /// Give up on an engine step after this many seconds.
    #[arg(long, env = "PEERCALL_STEP_TIMEOUT")]
    step_timeout_secs: Option<u64>,

    #[arg(long, env = "PEERCALL_AUDIO_ONLY")]
    audio_only: bool,

    /// Ogg/Opus recording played as the microphone.
    #[arg(long, env = "PEERCALL_AUDIO_FILE")]
    audio_file: Option<PathBuf>,

    /// IVF/VP8 recording played as the camera.
    #[arg(long, env = "PEERCALL_VIDEO_FILE")]
    video_file: Option<PathBuf>,

    /// Call this identity as soon as the session is up.
    #[arg(short, long)]
    call: Option<String>,
}

impl Cli {
    fn capture(&self) -> FileCapture {
        let mut capture = FileCapture::new();
        if let Some(path) = &self.audio_file {
            capture = capture.with_audio(path);
        }
        if let Some(path) = &self.video_file {
            capture = capture.with_video(path);
        }
        capture
    }

    fn client_config(&self) -> ClientConfig {
        let mut ice_servers: Vec<IceServer> = self.stun.iter().map(IceServer::stun).collect();
        if let Some(url) = &self.turn_url {
            ice_servers.push(IceServer::turn(
                url,
                &self.turn_username,
                &self.turn_credential,
            ));
        }
        let mut directory = DirectoryConfig::new(&self.directory_url);
        directory.api_key = self.directory_key.clone();

        ClientConfig {
            relay_url: self.relay_url.clone(),
            directory,
            ice_servers,
            auto_accept: !self.manual_accept,
            display_name: self.display_name.clone(),
            step_timeout: self.step_timeout_secs.map(Duration::from_secs),
            media: MediaConstraints {
                audio: true,
                video: !self.audio_only,
            },
        }
    }
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {}", e);
            return;
        }
    };

    rt.block_on(async {
        if let Err(e) = run(cli).await {
            error!("{:#}", e);
        }
    });
}

async fn run(cli: Cli) -> Result<(), anyhow::Error> {
    let Some(identity) = Identity::from_launch_param(cli.identity.as_deref()) else {
        info!("No identity given, staying idle. Press Ctrl+C to exit.");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    };

    let config = cli.client_config();
    let bus = Arc::new(EventBus::new());
    spawn_event_logger(&bus);

    let deps = SessionDeps {
        engine: WebRtcEngine::new(Arc::new(cli.capture()))?,
        transport_factory: Arc::new(SocketIoTransportFactory::new()),
        directory: Arc::new(RpcDirectory::new(
            Arc::new(UreqHttpClient::new()),
            config.directory.clone(),
        )),
        bus: bus.clone(),
    };
    let session = IdentitySession::start(identity, &config, deps).await?;
    for contact in session.contacts() {
        info!("Contact: {} ({})", contact.display_name, contact.identity);
    }

    let handle = session.handle();
    if let Some(target) = &cli.call {
        dial(&handle, session.contacts(), target);
    }

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !run_command(&handle, session.contacts(), line.trim()) {
                    break;
                }
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

/// Returns `false` when the user asked to quit.
fn run_command(handle: &CallHandle, contacts: &[Contact], line: &str) -> bool {
    let mut words = line.split_whitespace();
    let result = match (words.next(), words.next()) {
        (None, _) => Ok(()),
        (Some("call"), Some(target)) => {
            dial(handle, contacts, target);
            Ok(())
        }
        (Some("accept"), _) => handle.accept_incoming(),
        (Some("decline"), _) => handle.decline_incoming(),
        (Some("hangup"), _) => handle.end_this_call(),
        (Some("end"), _) => handle.end_call(),
        (Some("quit" | "exit"), _) => return false,
        (Some(other), _) => {
            warn!("Unknown command '{}'", other);
            Ok(())
        }
    };
    if let Err(e) = result {
        error!("{}", e);
        return false;
    }
    true
}

fn dial(handle: &CallHandle, contacts: &[Contact], target: &str) {
    let contact = contacts
        .iter()
        .find(|c| c.identity.as_str() == target || c.display_name == target)
        .cloned()
        .or_else(|| {
            Identity::new(target)
                .ok()
                .map(|identity| Contact::new(identity, target))
        });
    match contact {
        Some(contact) => {
            if let Err(e) = handle.call_user(contact) {
                error!("{}", e);
            }
        }
        None => warn!("Cannot call '{}'", target),
    }
}

fn spawn_event_logger(bus: &Arc<EventBus>) {
    let mut phases = bus.call_phase.subscribe();
    let mut incoming = bus.incoming_call.subscribe();
    let mut declines = bus.call_declined.subscribe();
    let mut failures = bus.call_failure.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Ok(change) = phases.recv() => info!("Call phase: {:?}", change.phase),
                Ok(call) = incoming.recv() => {
                    let name = call.from_display_name.as_deref().unwrap_or(call.from.as_str());
                    if call.auto_accepted {
                        info!("Incoming call from {}, answering", name);
                    } else {
                        info!("Incoming call from {}, type `accept` or `decline`", name);
                    }
                }
                Ok(notice) = declines.recv() => {
                    info!("Call declined: {}", notice.message.as_deref().unwrap_or("no reason"));
                }
                Ok(failure) = failures.recv() => warn!("{:?} failure: {}", failure.kind, failure.message),
                else => break,
            }
        }
    });
}
