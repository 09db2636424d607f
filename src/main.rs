mod cli;

use avd_supervisor::{
    AdbRegistry, EmulatorLauncher, EmulatorManager, Error as SupError, RegistryClient, SdkLocator,
};
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(sup_error) = e.downcast_ref::<SupError>() {
            eprintln!("Error: {}", sup_error);
            if let Some(suggestion) = sup_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing()?;

    match cli.command {
        Commands::Start {
            avd,
            timeout,
            serial_file,
            api_level,
            tag,
            abi,
            extra_args,
        } => {
            // Image-selection inputs are opaque to the supervisor; they are
            // logged so pipeline output records which image this run booted.
            if api_level.is_some() || tag.is_some() || abi.is_some() {
                tracing::info!(
                    "image: api_level={} tag={} abi={}",
                    api_level.as_deref().unwrap_or("-"),
                    tag.as_deref().unwrap_or("-"),
                    abi.as_deref().unwrap_or("-"),
                );
            }

            let sdk = SdkLocator::from_env()?;
            let registry = Arc::new(AdbRegistry::new(sdk.adb()?));
            let launcher = Arc::new(EmulatorLauncher::new(&sdk)?);
            let manager = EmulatorManager::new(registry, launcher);

            let serial = manager
                .start(&avd, &extra_args, Duration::from_secs(timeout))
                .await?;

            if let Some(path) = serial_file {
                std::fs::write(&path, format!("{}\n", serial))?;
                tracing::info!("serial written to {}", path.display());
            }
            // The serial is the step's single output value.
            println!("{}", serial);
        }
        Commands::Devices { json } => {
            let sdk = SdkLocator::from_env()?;
            let registry = AdbRegistry::new(sdk.adb()?);
            registry.ensure_available().await?;
            let devices = registry.list_devices().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("No devices attached");
            } else {
                let mut serials: Vec<_> = devices.keys().collect();
                serials.sort();
                for serial in serials {
                    println!("{}\t{}", serial, devices[serial]);
                }
            }
        }
        Commands::Kill { serial } => {
            let sdk = SdkLocator::from_env()?;
            let registry = AdbRegistry::new(sdk.adb()?);
            registry.ensure_available().await?;
            registry.terminate(&serial).await;
        }
        Commands::Doctor => {
            run_doctor().await;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Report on each precondition instead of stopping at the first failure, so
/// one run shows everything that needs fixing.
async fn run_doctor() {
    let sdk = match SdkLocator::from_env() {
        Ok(sdk) => {
            println!("ok: SDK root at {}", sdk.root().display());
            Some(sdk)
        }
        Err(e) => {
            println!("fail: {}", e);
            None
        }
    };

    let Some(sdk) = sdk else { return };

    match sdk.emulator() {
        Ok(path) => println!("ok: emulator binary at {}", path.display()),
        Err(e) => println!("fail: {}", e),
    }

    match sdk.adb() {
        Ok(path) => {
            println!("ok: adb binary at {}", path.display());
            let registry = AdbRegistry::new(path);
            match registry.ensure_available().await {
                Ok(()) => println!("ok: adb server reachable"),
                Err(e) => println!("fail: {}", e),
            }
        }
        Err(e) => println!("fail: {}", e),
    }
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
