use anyhow::Result;
use clap::Parser;
use scs_client::cli::args::{Cli, Commands};
use scs_client::cli::commands;
use scs_client::config::{self, Protocol};
use scs_client::core::Core;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parts upload concurrently, so give the runtime more than one thread
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let mut config = config::load_config(cli.config.as_deref(), cli.profile.as_deref())?;

    if let Some(retries) = cli.retries {
        config.client.max_retries = retries;
    }
    if cli.http {
        config.client.protocol = Protocol::Http;
    }
    if cli.insecure {
        config.client.insecure_tls = true;
    }

    let core = Core::new(config)?;
    let format = cli.output_format();

    match cli.command {
        Commands::Mb { bucket, acl } => {
            commands::cmd_mb(&core, &bucket, acl.as_deref(), format).await?;
        }
        Commands::Rb { bucket } => {
            commands::cmd_rb(&core, &bucket, format).await?;
        }
        Commands::Ls {
            path,
            recursive,
            max_keys,
        } => {
            commands::cmd_ls(&core, path.as_deref(), recursive, max_keys, format).await?;
        }
        Commands::Put(args) => {
            commands::cmd_put(&core, &args, false, format).await?;
        }
        Commands::Mpu(args) => {
            commands::cmd_put(&core, &args, true, format).await?;
        }
        Commands::Get { source, destination } => {
            commands::cmd_get(&core, &source, destination.as_deref(), format).await?;
        }
        Commands::Head { path } => {
            commands::cmd_head(&core, &path, format).await?;
        }
        Commands::Rm { path, recursive } => {
            commands::cmd_rm(&core, &path, recursive, format).await?;
        }
        Commands::Cp { source, destination } => {
            commands::cmd_cp(&core, &source, &destination, format).await?;
        }
        Commands::Getacl { path } => {
            commands::cmd_getacl(&core, &path, format).await?;
        }
        Commands::Setacl { path, acl } => {
            commands::cmd_setacl(&core, &path, &acl, format).await?;
        }
        Commands::Presign { path, expires, method } => {
            commands::cmd_presign(&core, &path, expires, &method, format)?;
        }
        Commands::Parts {
            path,
            upload_id,
            abort,
        } => {
            commands::cmd_parts(&core, &path, &upload_id, abort, format).await?;
        }
    }

    Ok(())
}
