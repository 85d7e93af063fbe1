use chrono::Local;
use clap::Parser;
use log::{error, info};
use rfid_gate::client::Client;
use rfid_gate::config::ClientConfig;
use rfid_gate::error::ClientError;
use rfid_gate::feedback::LogFeedback;
use rfid_gate::reader::spawn_stdin_reader;
use rfid_gate::transport::WebSocketTransportFactory;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Exit status asking the supervisor to restart the device.
const EXIT_RESTART_REQUIRED: u8 = 3;

#[derive(Parser)]
#[command(name = "rfid-gate")]
#[command(about = "Access-control reader client")]
#[command(
    long_about = "Authenticates against the access-control service over a pub/sub bridge and forwards encrypted tag readings typed on stdin"
)]
struct Cli {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,
}

fn main() -> ExitCode {
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

    let config = match ClientConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };
    info!("Loaded configuration for device {}", config.device_id);

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = rt.block_on(async {
        let factory = WebSocketTransportFactory::new(&config.broker_url, &config.device_id)
            .with_credentials(config.username.clone(), config.password.clone());
        let mut client =
            Client::from_config(&config, Arc::new(factory), Arc::new(LogFeedback))?;

        let shutdown = client.shutdown_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                shutdown.notify_one();
            }
        });

        client.run(spawn_stdin_reader()).await
    });

    match result {
        Ok(()) => {
            info!("Client stopped");
            ExitCode::SUCCESS
        }
        Err(ClientError::FatalTimeout) => {
            error!("Peer unresponsive, restart required");
            ExitCode::from(EXIT_RESTART_REQUIRED)
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
