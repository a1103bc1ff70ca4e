use clap::{Parser, Subcommand};
use meshtalk::node::{
    self, BootstrapOptions, ClientOptions, DEFAULT_PORT, DEFAULT_USERNAME,
};
use meshtalk::registry::{sanitize_address, BootstrapRegistry};
use meshtalk::{config, MeshError};

#[derive(Parser, Debug)]
#[command(name = "meshtalk", about = "Peer-to-peer mesh chat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a mesh client node and join a chat room
    Start {
        /// Username to display in chat
        #[arg(long, short)]
        username: Option<String>,

        /// Room name to join
        #[arg(long, short)]
        room: Option<String>,

        /// TCP port to listen on
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Start a bootstrap entry-point node
    Bootstrap {
        /// TCP port to listen on
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Manage the list of known bootstrap addresses
    Address {
        #[command(subcommand)]
        action: AddressAction,
    },

    /// Remove the configuration directory
    Cleanup,
}

#[derive(Subcommand, Debug)]
enum AddressAction {
    /// Add a bootstrap multiaddress (with trailing /p2p/<peer-id>)
    Add { address: String },
    /// Remove a previously added bootstrap multiaddress
    Remove { address: String },
    /// List the configured bootstrap multiaddresses
    List,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli.command).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Command) -> Result<(), MeshError> {
    match command {
        Command::Start { username, room, port } => {
            let opts = ClientOptions {
                username: username.unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
                room: node::normalize_room(room.as_deref().unwrap_or("")),
                port: port.unwrap_or(DEFAULT_PORT),
            };
            node::run_client(opts).await
        }
        Command::Bootstrap { port } => {
            node::run_bootstrap(BootstrapOptions {
                port: port.unwrap_or(DEFAULT_PORT),
            })
            .await
        }
        Command::Address { action } => run_address(action),
        Command::Cleanup => {
            let dir = config::config_dir()?;
            config::wipe_dir(&dir)?;
            println!("removed {}", dir.display());
            Ok(())
        }
    }
}

fn run_address(action: AddressAction) -> Result<(), MeshError> {
    let registry = BootstrapRegistry::open_default()?;
    match action {
        AddressAction::Add { address } => {
            let address = sanitize_address(&address);
            registry.add(&address)?;
            println!("added {address}");
        }
        AddressAction::Remove { address } => {
            let address = sanitize_address(&address);
            registry.remove(&address)?;
            println!("removed {address}");
        }
        AddressAction::List => {
            let addresses = registry.list()?;
            if addresses.is_empty() {
                println!("no bootstrap addresses configured");
            }
            for address in addresses {
                println!("{address}");
            }
        }
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .try_init();
}
