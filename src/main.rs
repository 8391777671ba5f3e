mod agent;
mod cache;
mod classify;
mod config;
mod control;
mod error;
mod event;
mod host;
mod lifecycle;
mod net;
mod push;
mod registration;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use agent::Agent;
use cache::{CacheStorage, RefreshEvent, ResponseSource, SqliteStorage, StoreNames};
use config::Config;
use control::ControlMessage;
use event::AgentEvent;
use host::{LocalHost, RegistrationEvent};
use net::{HttpNetwork, Method, Request};
use registration::{MessageTarget, Registration};

/// How long `fetch` waits for a cache-first background refresh before exiting
const REFRESH_WAIT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline-first request interception for web application shells")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured version and activate it, evicting older stores
  Install,
  /// Dispatch one request through the active agent; the body goes to stdout
  Fetch {
    /// Absolute URL
    url: String,
    /// Treat as a top-level page navigation
    #[arg(long)]
    navigate: bool,
    /// Accept header
    #[arg(long)]
    accept: Option<String>,
    #[arg(long, default_value = "GET")]
    method: String,
  },
  /// Post a control message to the active agent
  Message {
    #[arg(value_enum)]
    kind: MessageKind,
    /// Post to the waiting agent instead
    #[arg(long)]
    waiting: bool,
  },
  /// List the application's stores and their entry counts
  Stores,
  /// Deliver a push payload to the active agent and print the notification it shows
  Push { payload: Option<String> },
  /// Fire a background sync event
  Sync {
    #[arg(default_value = agent::SYNC_MESSAGES_TAG)]
    tag: String,
  },
  /// Simulate a click on the last notification
  Click,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MessageKind {
  SkipWaiting,
  ClearCache,
}

impl From<MessageKind> for ControlMessage {
  fn from(kind: MessageKind) -> Self {
    match kind {
      MessageKind::SkipWaiting => ControlMessage::SkipWaiting,
      MessageKind::ClearCache => ControlMessage::ClearCache,
    }
  }
}

type AppAgent = Agent<SqliteStorage, HttpNetwork>;
type AppRegistration = Registration<SqliteStorage, HttpNetwork>;

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing()?;

  let config = Config::load(args.config.as_deref())?;
  let storage = Arc::new(SqliteStorage::open(&config.database_path()?)?);
  let network = Arc::new(HttpNetwork::new()?);
  let (host, mut events) = LocalHost::new(config.scope.clone());
  let mut registration = Registration::new(host, Arc::clone(&network));

  match args.command {
    Command::Install => {
      let agent = new_agent(&config, &storage, &network, registration.host())?;
      registration.update(agent).await?;
      for agent in registration.active().into_iter().chain(registration.waiting()) {
        println!("{} {:?}", agent.version(), agent.state());
      }
    }
    Command::Fetch {
      url,
      navigate,
      accept,
      method,
    } => {
      let (refresh_tx, mut refreshes) = mpsc::unbounded_channel();
      let agent =
        new_agent(&config, &storage, &network, registration.host())?.with_refresh_listener(refresh_tx);
      activate_configured(&mut registration, agent, &config).await?;

      let mut request = Request::get(&url)?.with_method(method.parse::<Method>()?);
      if navigate {
        request = request.navigate();
      }
      if let Some(accept) = accept {
        request = request.with_accept(accept);
      }

      let served = match registration.fetch(&request).await {
        Ok(served) => served,
        Err(e) if e.is_network() => return Err(eyre!("{} is unreachable: {}", url, e)),
        Err(e) => return Err(e.into()),
      };

      let cached = served
        .cached_at
        .map(|at| format!(", stored {}", at.format("%Y-%m-%d %H:%M:%S")))
        .unwrap_or_default();
      eprintln!(
        "{} {} ({}{})",
        served.response.status,
        served.response.header("content-type").unwrap_or("-"),
        source_label(served.source),
        cached
      );
      std::io::stdout().write_all(&served.response.body)?;

      if served.source == ResponseSource::Cache {
        match tokio::time::timeout(REFRESH_WAIT, refreshes.recv()).await {
          Ok(Some(event)) => report_refresh(&event),
          _ => eprintln!("Background refresh did not finish"),
        }
      }
    }
    Command::Message { kind, waiting } => {
      let agent = new_agent(&config, &storage, &network, registration.host())?;
      activate_configured(&mut registration, agent, &config).await?;

      let target = if waiting {
        MessageTarget::Waiting
      } else {
        MessageTarget::Active
      };
      let message = ControlMessage::from(kind).to_value();
      registration.post_message(target, &message).await?;
    }
    Command::Stores => {
      let names = StoreNames::new(&config.cache.prefix, &config.cache.version);
      for name in storage.store_names()? {
        if !names.owns(&name) {
          continue;
        }
        let marker = if names.current().contains(&name) {
          "*"
        } else {
          " "
        };
        println!("{} {} ({} entries)", marker, name, storage.entry_keys(&name)?.len());
      }
    }
    Command::Push { payload } => {
      let agent = new_agent(&config, &storage, &network, registration.host())?;
      activate_configured(&mut registration, agent, &config).await?;
      registration.deliver(AgentEvent::Push(payload)).await?;
      for notification in registration.host().notifications() {
        println!("{}", serde_json::to_string_pretty(&notification)?);
      }
    }
    Command::Sync { tag } => {
      let agent = new_agent(&config, &storage, &network, registration.host())?;
      activate_configured(&mut registration, agent, &config).await?;
      registration.deliver(AgentEvent::Sync(tag)).await?;
    }
    Command::Click => {
      let agent = new_agent(&config, &storage, &network, registration.host())?;
      activate_configured(&mut registration, agent, &config).await?;
      registration.deliver(AgentEvent::NotificationClick).await?;
      println!("Windows in scope {}:", registration.host().scope());
      for client in registration.host().clients() {
        println!("{} {}{}", client.id, client.url, if client.focused { " (focused)" } else { "" });
      }
    }
  }

  report_events(&mut events);
  Ok(())
}

fn new_agent(
  config: &Config,
  storage: &Arc<SqliteStorage>,
  network: &Arc<HttpNetwork>,
  host: &LocalHost,
) -> Result<AppAgent> {
  let version = config.cache.version.clone();
  Ok(Agent::new(
    config,
    Arc::clone(storage),
    Arc::clone(network),
    Arc::new(host.for_version(version)),
  )?)
}

/// Resume the configured version if an earlier run fully provisioned it. Otherwise install.
async fn activate_configured(
  registration: &mut AppRegistration,
  agent: AppAgent,
  config: &Config,
) -> Result<()> {
  registration
    .resume_or_update(agent)
    .await
    .map_err(|e| eyre!("Version {} is not installed: {}", config.cache.version, e))
}

fn source_label(source: ResponseSource) -> &'static str {
  match source {
    ResponseSource::Network => "network",
    ResponseSource::Cache => "cache",
    ResponseSource::Offline => "offline copy",
    ResponseSource::OfflinePage => "offline page",
  }
}

fn report_refresh(event: &RefreshEvent) {
  match event {
    RefreshEvent::Updated { url } => eprintln!("Refreshed {}", url),
    RefreshEvent::Skipped { url, status } => eprintln!("Kept stored {} (got HTTP {})", url, status),
    RefreshEvent::Discarded { url } => eprintln!("Dropped refresh of {}, store was deleted", url),
    RefreshEvent::Failed { url, error } => eprintln!("Refresh of {} failed: {}", url, error),
  }
}

fn report_events(events: &mut mpsc::UnboundedReceiver<RegistrationEvent>) {
  while let Ok(event) = events.try_recv() {
    match event {
      RegistrationEvent::UpdateFound { version } => println!("Found version {}", version),
      RegistrationEvent::InstallFailed { version, error } => {
        println!("Install of {} failed: {}", version, error)
      }
      RegistrationEvent::UpdateReady { version } => {
        println!("Version {} is ready; send skip-waiting to activate it", version)
      }
      RegistrationEvent::Activated { version } => println!("Activated {}", version),
      RegistrationEvent::ControllerChanged { client, version } => {
        println!("Client {} is now controlled by {}; reload it", client, version)
      }
    }
  }
}

/// Log to a daily rolling file under the data directory.
fn init_tracing() -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("shellcache")
    .join("logs");

  let appender = tracing_appender::rolling::daily(log_dir, "shellcache.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env("SHELLCACHE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
