//! Reset command - clear a session's circuit breaker

use super::{Settings, EXIT_OK};
use anyhow::{Context, Result};

pub fn run(session: &str, settings: &Settings) -> Result<u8> {
    let (engine, _) = settings.engine()?;
    engine
        .reset_session(session)
        .with_context(|| format!("Failed to reset session '{}'", session))?;

    if settings.json {
        println!("{}", serde_json::json!({ "session": session, "reset": true }));
    } else {
        println!("session {} reset", session);
    }
    Ok(EXIT_OK)
}
