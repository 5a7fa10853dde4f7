//! Config subcommand handlers.

use std::fmt::Write;

use pitwatch_config::Config;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

use super::util;

/// Format config for display, masking the plaintext password.
fn format_config_redacted(cfg: &Config) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "[account]");
    if let Some(ref u) = cfg.account.username {
        let _ = writeln!(out, "username = \"{u}\"");
    }
    if cfg.account.password.is_some() {
        let _ = writeln!(out, "password = \"****\"");
    }
    if let Some(ref env) = cfg.account.password_env {
        let _ = writeln!(out, "password_env = \"{env}\"");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "[history]");
    let _ = writeln!(out, "retention_secs = {}", cfg.history.retention_secs);
    let _ = writeln!(out, "sample_interval_secs = {}", cfg.history.sample_interval_secs);
    if let Some(ref url) = cfg.history.redis_url {
        let _ = writeln!(out, "redis_url = \"{url}\"");
    }
    let _ = writeln!(out, "key_prefix = \"{}\"", cfg.history.key_prefix);

    let _ = writeln!(out);
    let _ = writeln!(out, "[bridge]");
    let _ = writeln!(out, "refresh_timeout_secs = {}", cfg.bridge.refresh_timeout_secs);
    let _ = writeln!(out, "request_timeout_secs = {}", cfg.bridge.request_timeout_secs);
    for (key, value) in [
        ("auth_url", &cfg.bridge.auth_url),
        ("api_url", &cfg.bridge.api_url),
        ("client_id", &cfg.bridge.client_id),
    ] {
        if let Some(v) = value {
            let _ = writeln!(out, "{key} = \"{v}\"");
        }
    }
    if let Some(max) = cfg.bridge.max_reconnects {
        let _ = writeln!(out, "max_reconnects = {max}");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "[server]");
    let _ = writeln!(out, "listen = \"{}\"", cfg.server.listen);

    out
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = util::config_file(global);

    match args.command {
        ConfigCommand::Path => {
            println!("{}", path.display());
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = util::load_config(global)?;
            print!("{}", format_config_redacted(&cfg));
            Ok(())
        }

        ConfigCommand::SetUsername { username } => {
            if username.trim().is_empty() {
                return Err(CliError::Validation {
                    field: "username".into(),
                    reason: "cannot be empty".into(),
                });
            }
            let mut cfg = util::load_config(global)?;
            cfg.account.username = Some(username);
            pitwatch_config::save_config_to(&cfg, &path)?;
            if !global.quiet {
                eprintln!("Saved username to {}", path.display());
            }
            Ok(())
        }

        ConfigCommand::SetPassword => {
            let cfg = util::load_config(global)?;
            let username = pitwatch_config::resolve_username(&cfg.account).ok_or_else(|| {
                CliError::Validation {
                    field: "account.username".into(),
                    reason: "set a username first: pitwatch config set-username <email>".into(),
                }
            })?;

            let password = rpassword::prompt_password(format!("Password for {username}: "))?;
            if password.is_empty() {
                return Err(CliError::Validation {
                    field: "password".into(),
                    reason: "cannot be empty".into(),
                });
            }

            pitwatch_config::store_password(&username, &password)?;
            if !global.quiet {
                eprintln!("Password for {username} stored in system keyring");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacted_output_hides_password() {
        let mut cfg = Config::default();
        cfg.account.username = Some("cook@example.com".into());
        cfg.account.password = Some("hunter2".into());

        let text = format_config_redacted(&cfg);
        assert!(text.contains("username = \"cook@example.com\""));
        assert!(text.contains("password = \"****\""));
        assert!(!text.contains("hunter2"));
        assert!(text.contains("listen = \"127.0.0.1:8080\""));
    }
}
