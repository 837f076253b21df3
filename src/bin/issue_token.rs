use anyhow::{Context, Result};
use clap::Parser;
use storefront_api::{
    auth::{AuthConfig, AuthService},
    config,
};
use uuid::Uuid;

/// Mint a bearer token signed with the configured JWT secret.
///
/// Operator and development aid; shoppers get their tokens from the
/// identity provider.
#[derive(Debug, Parser)]
#[command(name = "storefront-token", version, about)]
struct Cli {
    /// User id to put in `sub`; a random one is generated when omitted
    #[arg(long, value_parser = clap::value_parser!(Uuid))]
    user_id: Option<Uuid>,

    #[arg(long)]
    name: Option<String>,

    /// Forwarded to the payment gateway as the customer email
    #[arg(long)]
    email: Option<String>,

    /// Role to grant; repeat for several
    #[arg(long = "role")]
    roles: Vec<String>,

    /// Print the claims as JSON alongside the token
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config().context("failed to load configuration")?;
    let auth = AuthService::new(AuthConfig::from(&cfg));

    let user_id = cli.user_id.unwrap_or_else(Uuid::new_v4);
    let token = auth
        .generate_token(user_id, cli.name, cli.email, cli.roles)
        .context("failed to sign token")?;

    if cli.json {
        let claims = auth.validate_token(&token)?;
        let out = serde_json::json!({ "token": token, "claims": claims });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", token);
    }

    Ok(())
}
