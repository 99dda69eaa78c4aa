//! Terminal consent prompt
//!
//! Bringing up a tunnel reroutes the machine's traffic, so the first connect
//! asks on the terminal. A yes is remembered in the store.

use std::io::IsTerminal;
use std::sync::Arc;

use anywhere_core::{
    ConsentDecision, ConsentError, ConsentProvider, ConsentRequest, ConsentStatus,
};
use anywhere_store::KeyValueStore;
use async_trait::async_trait;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};

const CONSENT_KEY: &str = "consent.vpn";
const GRANTED: &str = "granted";

pub struct TerminalConsent {
    store: Arc<dyn KeyValueStore>,
    assume_yes: bool,
}

impl TerminalConsent {
    pub fn new(store: Arc<dyn KeyValueStore>, assume_yes: bool) -> Self {
        Self { store, assume_yes }
    }

    fn remember(&self) {
        if let Err(e) = self.store.set(CONSENT_KEY, GRANTED) {
            tracing::warn!("Failed to remember VPN consent: {}", e);
        }
    }
}

#[async_trait]
impl ConsentProvider for TerminalConsent {
    fn prepare(&self) -> ConsentStatus {
        if self.assume_yes {
            return ConsentStatus::Granted;
        }
        match self.store.get(CONSENT_KEY) {
            Ok(Some(value)) if value == GRANTED => ConsentStatus::Granted,
            Ok(_) => ConsentStatus::Required,
            Err(e) => {
                tracing::warn!("Failed to read VPN consent: {}", e);
                ConsentStatus::Required
            }
        }
    }

    async fn request(&self, request: &ConsentRequest) -> Result<ConsentDecision, ConsentError> {
        if !std::io::stdin().is_terminal() {
            return Err(ConsentError::Unavailable);
        }

        let tunnel = request.tunnel.clone();
        let decision = tokio::task::spawn_blocking(move || ask(&tunnel))
            .await
            .map_err(|e| ConsentError::Launch(e.to_string()))??;

        if decision == ConsentDecision::Granted {
            self.remember();
        }
        Ok(decision)
    }
}

fn ask(tunnel: &str) -> Result<ConsentDecision, ConsentError> {
    let config = Config::builder().auto_add_history(false).build();
    let mut editor: Editor<(), DefaultHistory> =
        Editor::with_config(config).map_err(|e| ConsentError::Launch(e.to_string()))?;

    println!("Anywhere wants to set up a VPN connection ({}).", tunnel);
    println!("This lets it route and monitor network traffic on this machine.");

    match editor.readline("Allow? [y/N] ") {
        Ok(line) => Ok(parse_answer(&line)),
        Err(ReadlineError::Interrupted | ReadlineError::Eof) => Ok(ConsentDecision::Denied),
        Err(e) => Err(ConsentError::Launch(e.to_string())),
    }
}

fn parse_answer(line: &str) -> ConsentDecision {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ConsentDecision::Granted,
        _ => ConsentDecision::Denied,
    }
}
