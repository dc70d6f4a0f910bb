use clap::{Parser, Subcommand};
use rpcgate_client::{AuthorityClient, ClientError, GatewayClient};
use rpcgate_core::{NO_TARGET_RETURN_CODE, STATELESS_ARCHIVE};

#[derive(Parser, Debug)]
#[command(name = "rpcgate")]
#[command(about = "rpcgate gateway client and administrative CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, env = "RPCGATE_GATEWAY", default_value = "http://localhost:8180")]
    gateway: String,

    #[arg(long, env = "RPCGATE_AUTHORITY", default_value = "http://localhost:50831")]
    authority: String,

    /// Bearer token sent to the gateway
    #[arg(long, env = "RPCGATE_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Obtain an access token from the authority
    Token {
        #[command(subcommand)]
        grant: TokenCommands,

        #[arg(long, env = "RPCGATE_CLIENT_ID", default_value = "elytron-client")]
        client_id: String,

        #[arg(long, env = "RPCGATE_CLIENT_SECRET", hide_env_values = true)]
        client_secret: String,
    },
    /// Invoke a remote method on a deployed target
    Invoke {
        target: String,
        #[arg(default_value = "remoteCall")]
        method: String,
        /// JSON arguments
        #[arg(long, default_value = "[]")]
        args: String,
        /// Print -1 instead of failing when the target is not deployed (any method)
        #[arg(long)]
        sentinel: bool,
    },
    /// Deploy an archive under a name
    Deploy {
        name: String,
        #[arg(long, default_value = STATELESS_ARCHIVE)]
        archive: String,
    },
    /// Undeploy the target running under a name
    Undeploy { name: String },
    /// List registry entries
    Endpoints,
    /// Drop the gateway's cached validation of a token
    Revoke { token: String },
}

#[derive(Subcommand, Debug)]
enum TokenCommands {
    /// Resource owner password credentials grant
    Password {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Client credentials grant
    Client,
}

/// Formats an invocation result. With `sentinel`, a missing target prints
/// `-1` instead of failing; every other error is still returned.
fn render_invocation(
    outcome: Result<serde_json::Value, ClientError>,
    sentinel: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    match outcome {
        Ok(result) => Ok(serde_json::to_string_pretty(&result)?),
        Err(ClientError::NotFound { .. }) if sentinel => Ok(NO_TARGET_RETURN_CODE.to_string()),
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut gateway = GatewayClient::new(&cli.gateway);
    if let Some(token) = &cli.token {
        gateway = gateway.with_token(token.as_str());
    }

    match cli.command {
        Commands::Token {
            grant,
            client_id,
            client_secret,
        } => {
            let authority = AuthorityClient::new(&cli.authority, client_id, client_secret);
            let token = match grant {
                TokenCommands::Password { username, password } => {
                    authority.password_grant(&username, &password).await?
                }
                TokenCommands::Client => authority.client_credentials_grant().await?,
            };
            println!("{}", token.access_token);
            eprintln!("{} token, expires in {}s", token.token_type, token.expires_in);
        }
        Commands::Invoke {
            target,
            method,
            args,
            sentinel,
        } => {
            let args: serde_json::Value = serde_json::from_str(&args)?;
            let outcome = gateway.invoke(&target, &method, args).await;
            println!("{}", render_invocation(outcome, sentinel)?);
        }
        Commands::Deploy { name, archive } => {
            let deployed = gateway.deploy(&name, &archive).await?;
            println!(
                "Deployed {} ({}) generation {}",
                deployed.name, deployed.archive, deployed.generation
            );
        }
        Commands::Undeploy { name } => {
            if gateway.undeploy(&name).await? {
                println!("Undeployed {}", name);
            } else {
                println!("Nothing deployed under {}", name);
            }
        }
        Commands::Endpoints => {
            let endpoints = gateway.endpoints().await?;
            println!("Registered Endpoints:");
            println!("{:<20} {:<14} {:<12} {:<30}", "Id", "Status", "Generation", "Methods");
            println!("{}", "-".repeat(76));
            for endpoint in endpoints {
                println!(
                    "{:<20} {:<14} {:<12} {:<30}",
                    endpoint.id,
                    format!("{:?}", endpoint.status),
                    endpoint.generation,
                    endpoint.methods.join(",")
                );
            }
        }
        Commands::Revoke { token } => {
            let revoked = gateway.revoke(&token).await?;
            println!("Revoked: {}", revoked);
        }
    }

    Ok(())
}
