//! `regmirror logout` command - Remove stored registry credentials.

use clap::Args;
use regmirror_registry::CredentialStore;

use super::DEFAULT_LOGIN_SERVER;

#[derive(Args)]
pub struct LogoutArgs {
    /// Registry server (default: docker.io)
    pub server: Option<String>,
}

pub async fn execute(args: LogoutArgs) -> Result<(), Box<dyn std::error::Error>> {
    let server = args
        .server
        .unwrap_or_else(|| DEFAULT_LOGIN_SERVER.to_string());

    let store = CredentialStore::default_path()?;
    if store.remove(&server)? {
        println!("Removing login credentials for {}", server);
    } else {
        println!("Not logged in to {}", server);
    }
    Ok(())
}
