use clap::Parser;
use client::config::ClientConfig;
use client::controller::{ConnectionController, ConnectionState};
use client::sink::{ChannelSink, Delivery};
use log::{error, info};
use shared::{COMMAND_PORT, GROUP_TAG, MESSAGE_PORT, SERVER_PORT};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay server host name or IP
    #[arg(short = 's', long, default_value = "127.0.0.1")]
    server: String,

    /// Relay server port
    #[arg(short = 'p', long, default_value_t = SERVER_PORT)]
    port: u16,

    /// Local port for the command channel
    #[arg(long, default_value_t = COMMAND_PORT)]
    command_port: u16,

    /// Local port the server pushes messages to
    #[arg(long, default_value_t = MESSAGE_PORT)]
    message_port: u16,

    /// Name to register with
    #[arg(short = 'u', long, default_value = "Llama")]
    user: String,

    /// Group tag attached to outgoing messages and accepted on incoming ones
    #[arg(short = 't', long, default_value = GROUP_TAG)]
    tag: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ClientConfig {
        server: format!("{}:{}", args.server, args.port),
        command_bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.command_port)),
        message_bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.message_port)),
        group_tag: args.tag,
        ..ClientConfig::default()
    };

    info!("Starting client...");
    info!("Connecting to: {}", config.server);

    let (sink, mut deliveries) = ChannelSink::new();
    let mut controller = ConnectionController::new(config, Arc::new(sink));
    let mut events = controller
        .take_events()
        .ok_or("connection events already taken")?;

    controller.connect(&args.user).await?;
    println!("Connected as {}. /clients, /info, /quit", args.user);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };

                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/clients" => match controller.clients().await {
                        Ok(clients) => {
                            for (addr, name) in clients {
                                println!("  {} ({})", name, addr);
                            }
                        }
                        Err(e) => error!("Error listing clients: {}", e),
                    },
                    "/info" => match controller.info().await {
                        Ok(info) => println!("{}", info),
                        Err(e) => error!("Error fetching info: {}", e),
                    },
                    text => {
                        if let Err(e) = controller.send_text(text).await {
                            error!("Error sending message: {}", e);
                        }
                    }
                }
            },

            Some(delivery) = deliveries.recv() => {
                match delivery {
                    Delivery::Message { sender, text } => println!("{}: {}", sender, text),
                    Delivery::Clear => {}
                }
            },

            Some(event) = events.recv() => {
                if let Err(e) = controller.handle_event(event).await {
                    error!("Error closing session: {}", e);
                }
                if controller.state() == ConnectionState::Disconnected {
                    break;
                }
            },
        }
    }

    controller.disconnect().await?;
    Ok(())
}
