//! `anywhere hub ...` commands

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use anywhere_core::{ProfileStore, SystemClock};
use anywhere_hub::{client_config, CredentialStore, HubClient, HubCredentials, HubState};
use anywhere_protocol::{PeerRecord, RegisterRequest};
use anywhere_store::KeyValueStore;
use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum HubCommand {
    /// Register a new hub and log in
    Register {
        /// Hub address (host:port, optionally with http:// or https://)
        ///
        /// A bare host is contacted over https for every call, registration
        /// included. Prefix http:// for a hub that only serves plain HTTP.
        endpoint: String,

        #[arg(long)]
        password: String,

        /// WireGuard interface the hub manages
        #[arg(long, default_value = "wg0")]
        interface: String,
    },

    /// Log back in to the registered hub
    Login {
        #[arg(long)]
        password: String,
    },

    /// Log out, keeping the registration
    Logout,

    /// Show whether the hub's WireGuard server is running
    Status,

    /// List peers
    Peers,

    /// Start the hub's WireGuard server
    Start,

    /// Stop the hub's WireGuard server
    Stop,

    /// Create a new peer
    Add { name: String },

    /// Delete a peer (by name or id)
    Remove { peer: String },

    /// Revoke a peer's access
    Block { peer: String },

    /// Restore a peer's access
    Unblock { peer: String },

    /// Print a peer's WireGuard client config
    Config {
        peer: String,

        /// Also save it as a local tunnel profile
        #[arg(long)]
        save_as: Option<String>,
    },

    /// Wipe the hub and forget the local login
    FactoryReset {
        #[arg(long)]
        confirm: bool,
    },
}

pub async fn run(command: HubCommand, store: Arc<dyn KeyValueStore>) -> Result<()> {
    let credentials = CredentialStore::new(store.clone());

    match command {
        HubCommand::Register {
            endpoint,
            password,
            interface,
        } => {
            if credentials.load()?.is_some() {
                bail!("A hub is already registered. Use 'anywhere hub login' or factory-reset it first");
            }

            let request = RegisterRequest::first_time(&interface, &endpoint, &password);
            let result = HubClient::new(&endpoint)
                .register(&request)
                .await
                .context("Registration failed")?;

            let registered = HubCredentials::from_registration(&endpoint, result)?;
            credentials.save(&registered)?;
            println!("Registered hub {} (uid {})", registered.endpoint, registered.uid);
        }

        HubCommand::Login { password } => {
            let known = credentials
                .load()?
                .context("No hub registered. Run 'anywhere hub register' first")?;

            let result = HubClient::new(&known.endpoint)
                .register(&RegisterRequest::login(&known.uid, &password))
                .await
                .context("Login failed")?;

            credentials.login(&result.token)?;
            println!("Logged in to {}", known.endpoint);
        }

        HubCommand::Logout => {
            if credentials.logout()? {
                println!("Logged out");
            } else {
                println!("No hub registered");
            }
        }

        HubCommand::Status => {
            let (client, login) = logged_in(&credentials)?;
            match client.status().await? {
                HubState::Running => println!("{}: running", login.endpoint),
                HubState::Stopped => println!("{}: stopped", login.endpoint),
            }
        }

        HubCommand::Peers => {
            let (client, _) = logged_in(&credentials)?;
            let peers = client.peers().await?;
            if peers.is_empty() {
                println!("No peers");
            }
            for peer in peers {
                println!(
                    "{:<24} 10.0.0.{:<4} {:<8} {}",
                    peer.name,
                    peer.ip,
                    if peer.connection { "active" } else { "blocked" },
                    peer.id
                );
            }
        }

        HubCommand::Start => {
            let (client, _) = logged_in(&credentials)?;
            client.start().await?;
            println!("Hub server started");
        }

        HubCommand::Stop => {
            let (client, _) = logged_in(&credentials)?;
            client.stop().await?;
            println!("Hub server stopped");
        }

        HubCommand::Add { name } => {
            let (client, _) = logged_in(&credentials)?;
            client.add_peer(&name).await?;
            println!("Added peer {}", name);
        }

        HubCommand::Remove { peer } => {
            let (client, _) = logged_in(&credentials)?;
            let peer = find_peer(&client.peers().await?, &peer)?;
            client.remove_peer(&peer).await?;
            println!("Removed peer {}", peer.name);
        }

        HubCommand::Block { peer } => {
            let (client, _) = logged_in(&credentials)?;
            let peer = find_peer(&client.peers().await?, &peer)?;
            client.block(&peer).await?;
            println!("Blocked peer {}", peer.name);
        }

        HubCommand::Unblock { peer } => {
            let (client, _) = logged_in(&credentials)?;
            let peer = find_peer(&client.peers().await?, &peer)?;
            client.unblock(&peer).await?;
            println!("Unblocked peer {}", peer.name);
        }

        HubCommand::Config { peer, save_as } => {
            let (client, login) = logged_in(&credentials)?;
            let peer = find_peer(&client.peers().await?, &peer)?;
            let text = client_config(&peer, &login)?;
            println!("{}", text);

            if let Some(name) = save_as {
                ProfileStore::new(store, Arc::new(SystemClock)).save(&name, &text)?;
                eprintln!("Saved as profile {}", name);
            }
        }

        HubCommand::FactoryReset { confirm } => {
            let (client, login) = logged_in(&credentials)?;
            if !confirm {
                bail!("This deletes every peer on {}. Re-run with --confirm", login.endpoint);
            }
            client.factory_reset().await?;
            credentials.forget()?;
            println!("Factory reset done");
        }
    }

    Ok(())
}

fn logged_in(credentials: &CredentialStore) -> Result<(HubClient, HubCredentials)> {
    let login = credentials
        .require_login()
        .context("Run 'anywhere hub login' first")?;
    let client = HubClient::from_credentials(&login)?;
    Ok((client, login))
}

/// Look a peer up by id, then by name
fn find_peer(peers: &[PeerRecord], query: &str) -> Result<PeerRecord> {
    if let Some(peer) = peers.iter().find(|p| p.id == query) {
        return Ok(peer.clone());
    }

    let mut named = peers.iter().filter(|p| p.name == query);
    match (named.next(), named.next()) {
        (Some(peer), None) => Ok(peer.clone()),
        (Some(_), Some(_)) => bail!("Several peers are named '{}'; use the id instead", query),
        (None, _) => bail!("No peer '{}' on this hub", query),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, name: &str) -> PeerRecord {
        PeerRecord {
            id: id.into(),
            ip: "2".into(),
            name: name.into(),
            public_key: "pk".into(),
            private_key: None,
            connection: true,
        }
    }

    #[test]
    fn test_find_peer() {
        let peers = vec![peer("a1", "laptop"), peer("b2", "phone"), peer("c3", "phone")];

        assert_eq!(find_peer(&peers, "laptop").unwrap().id, "a1");
        assert_eq!(find_peer(&peers, "c3").unwrap().id, "c3");
        assert!(find_peer(&peers, "phone").is_err());
        assert!(find_peer(&peers, "tablet").is_err());
    }
}
