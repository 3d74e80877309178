use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use soss_transport::config::{self, TransportConfig};
use soss_transport::{Encoding, Service, Topic, Transport, TransportEvent, ValidationError};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

#[derive(Parser)]
#[command(name = "soss")]
#[command(about = "Soss CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Connection settings shared by every networked command.
#[derive(Args, Clone)]
struct ConnectArgs {
    /// Config file path (default: SOSS_CONFIG_PATH or ~/.soss/config.json)
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Gateway URL (overrides config and SOSS_URL)
    #[arg(long)]
    url: Option<String>,

    /// Credential sent as the WebSocket sub-protocol (overrides config and SOSS_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Envelope encoding: json or bson (default from config)
    #[arg(long)]
    encoding: Option<Encoding>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: SOSS_CONFIG_PATH or ~/.soss/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Publish one message on a topic.
    Publish {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Topic name (e.g. /chatter)
        #[arg(long)]
        topic: String,

        /// Message type (e.g. std_msgs/msg/String)
        #[arg(long = "type", value_name = "TYPE")]
        typ: String,

        /// Message as JSON (e.g. '{"data":"hello"}')
        #[arg(long)]
        msg: String,
    },

    /// Print messages received on a topic, one JSON document per line.
    Subscribe {
        #[command(flatten)]
        connect: ConnectArgs,

        #[arg(long)]
        topic: String,

        #[arg(long = "type", value_name = "TYPE")]
        typ: String,

        /// Exit after this many messages (default: run until Ctrl-C)
        #[arg(long, short = 'n')]
        count: Option<usize>,
    },

    /// Call a service and print its response.
    Call {
        #[command(flatten)]
        connect: ConnectArgs,

        #[arg(long)]
        service: String,

        #[arg(long = "type", value_name = "TYPE")]
        typ: String,

        /// Request as JSON (default: {})
        #[arg(long, default_value = "{}")]
        args: String,

        /// Give up after this many milliseconds (default from config; none = wait forever)
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },

    /// Host a service that answers every call with a fixed JSON response.
    Serve {
        #[command(flatten)]
        connect: ConnectArgs,

        #[arg(long)]
        service: String,

        #[arg(long = "type", value_name = "TYPE")]
        typ: String,

        /// Response as JSON
        #[arg(long)]
        response: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("soss {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Publish {
            connect,
            topic,
            typ,
            msg,
        }) => run_publish(connect, topic, typ, msg).await,
        Some(Commands::Subscribe {
            connect,
            topic,
            typ,
            count,
        }) => run_subscribe(connect, topic, typ, count).await,
        Some(Commands::Call {
            connect,
            service,
            typ,
            args,
            timeout_ms,
        }) => run_call(connect, service, typ, args, timeout_ms).await,
        Some(Commands::Serve {
            connect,
            service,
            typ,
            response,
        }) => run_serve(connect, service, typ, response).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let dir = config::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

/// Load config, apply env then flag overrides.
fn resolve_settings(args: &ConnectArgs) -> anyhow::Result<TransportConfig> {
    let (config, path) = config::load_config(args.config.clone())?;
    log::debug!("using config {}", path.display());
    let mut transport = config::resolve_transport(&config);
    if let Some(url) = &args.url {
        transport.url = url.clone();
    }
    if let Some(token) = &args.token {
        transport.token = Some(token.clone());
    }
    if let Some(encoding) = args.encoding {
        transport.encoding = encoding;
    }
    Ok(transport)
}

async fn open(args: &ConnectArgs) -> anyhow::Result<(Transport, TransportConfig)> {
    let settings = resolve_settings(args)?;
    let transport = Transport::connect_with_config(&settings).await?;
    Ok((transport, settings))
}

fn parse_json(what: &str, text: &str) -> anyhow::Result<Value> {
    serde_json::from_str(text).map_err(|e| anyhow::anyhow!("invalid {} JSON: {}", what, e))
}

async fn run_publish(
    args: ConnectArgs,
    topic: String,
    typ: String,
    msg: String,
) -> anyhow::Result<()> {
    let msg = parse_json("message", &msg)?;
    let (transport, _) = open(&args).await?;
    let publisher = transport.create_publisher(&Topic::<Value>::new(topic, typ));
    publisher.publish(&msg)?;
    log::info!("published on {}", publisher.topic());
    transport.destroy().await;
    Ok(())
}

async fn run_subscribe(
    args: ConnectArgs,
    topic: String,
    typ: String,
    count: Option<usize>,
) -> anyhow::Result<()> {
    let (transport, _) = open(&args).await?;
    let mut events = transport.events();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = transport.subscribe(&Topic::<Value>::new(topic, typ), move |msg| {
        let _ = tx.send(msg);
    })?;

    let printed = tokio::select! {
        printed = print_messages(&mut rx, &mut events, count) => printed,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };

    subscription.unsubscribe();
    transport.destroy().await;
    printed
}

/// Print received payloads until `count` is reached. A closed connection is an error,
/// whichever of the close event or the end of the listener channel is seen first.
async fn print_messages(
    rx: &mut mpsc::UnboundedReceiver<Result<Value, ValidationError>>,
    events: &mut broadcast::Receiver<TransportEvent>,
    count: Option<usize>,
) -> anyhow::Result<()> {
    let mut received = 0usize;
    while count.map_or(true, |n| received < n) {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(Ok(value)) => println!("{}", value),
                    Some(Err(e)) => log::warn!("{}", e),
                    None => return Err(closed_error(events)),
                }
                received += 1;
            }
            event = events.recv() => match event {
                Ok(TransportEvent::Closed { code, reason }) => {
                    anyhow::bail!("gateway closed the connection ({}): {}", code, reason);
                }
                Err(broadcast::error::RecvError::Closed) => return Err(closed_error(events)),
                _ => {}
            },
        }
    }
    Ok(())
}

/// Describe a close detected through the listener channel, using the close event if queued.
fn closed_error(events: &mut broadcast::Receiver<TransportEvent>) -> anyhow::Error {
    while let Ok(event) = events.try_recv() {
        if let TransportEvent::Closed { code, reason } = event {
            return anyhow::anyhow!("gateway closed the connection ({}): {}", code, reason);
        }
    }
    anyhow::anyhow!("gateway closed the connection")
}

async fn run_call(
    args: ConnectArgs,
    service: String,
    typ: String,
    request: String,
    timeout_ms: Option<u64>,
) -> anyhow::Result<()> {
    let request = parse_json("args", &request)?;
    let (transport, settings) = open(&args).await?;
    let service = Service::<Value, Value>::new(service, typ);
    let response = match timeout_ms.or(settings.call_timeout_ms) {
        Some(ms) => {
            transport
                .call_with_timeout(&service, &request, Duration::from_millis(ms))
                .await
        }
        None => transport.call(&service, &request).await,
    };
    transport.destroy().await;
    println!("{}", serde_json::to_string_pretty(&response?)?);
    Ok(())
}

async fn run_serve(
    args: ConnectArgs,
    service: String,
    typ: String,
    response: String,
) -> anyhow::Result<()> {
    let response = parse_json("response", &response)?;
    let (transport, _) = open(&args).await?;
    let mut events = transport.events();
    let mut host = transport.create_service(&Service::<Value, Value>::new(service, typ));
    host.start(move |request: Value| {
        log::info!("request: {}", request);
        let response = response.clone();
        async move { response }
    })?;
    println!("serving {} (Ctrl-C to stop)", host.name());

    let closed = loop {
        tokio::select! {
            event = events.recv() => {
                if let Ok(TransportEvent::Closed { code, reason }) = event {
                    break Some((code, reason));
                }
            }
            _ = tokio::signal::ctrl_c() => break None,
        }
    };

    host.stop();
    transport.destroy().await;
    if let Some((code, reason)) = closed {
        anyhow::bail!("gateway closed the connection ({}): {}", code, reason);
    }
    Ok(())
}
