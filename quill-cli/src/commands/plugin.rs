//! Plugin management commands

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::rand_core::OsRng;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use quill_core::plugins::{
    DetachedSignatureVerifier, DispatchOutcome, DispatchReport, EditorEvent, PluginDescriptor,
    PluginHost, PluginHostConfig, PluginState, SignaturePolicy, SignatureVerifier, TrustStore,
    encode_public_key, fingerprint, sign_binary,
};

use crate::config::ConfigLoader;

/// Plugin management arguments
#[derive(Args)]
pub struct PluginArgs {
    /// Load unsigned plugins; the reason is logged
    #[arg(long, value_name = "REASON", global = true)]
    pub allow_unsigned: Option<String>,

    #[command(subcommand)]
    pub command: PluginCommands,
}

/// Plugin subcommands
#[derive(Subcommand)]
pub enum PluginCommands {
    /// List plugins in the plugin directory
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show plugin details
    Info {
        /// Plugin name or binary file name
        name: String,
    },
    /// Enable a plugin
    Enable {
        /// Plugin name or binary file name
        name: String,
    },
    /// Disable a plugin
    Disable {
        /// Plugin name or binary file name
        name: String,
    },
    /// Unload and load a plugin again (development)
    Reload {
        /// Plugin name or binary file name
        name: String,
    },
    /// Check a binary's signature against the trust store
    Verify {
        /// Plugin binary
        file: PathBuf,
    },
    /// Write a detached signature next to a binary
    Sign {
        /// Plugin binary
        file: PathBuf,
        /// PKCS#8 PEM signing key
        #[arg(long)]
        key: PathBuf,
        /// Signing identity recorded in the signature
        #[arg(long)]
        identity: String,
    },
    /// Generate a signing key
    Keygen {
        /// Directory for signing_key.pem
        #[arg(long)]
        out: PathBuf,
        /// Identity the key signs as
        #[arg(long)]
        identity: String,
        /// Add the public key to the trust store
        #[arg(long)]
        trust: bool,
    },
    /// Show plugin menu commands
    Menu,
    /// Run a plugin menu command
    Run {
        /// Plugin name
        plugin: String,
        /// Command index as shown by `quill plugin menu`
        index: usize,
    },
    /// Send an editor event to loaded plugins
    Notify {
        /// Event name, e.g. file_saved or file_before_save
        event: String,
        /// File the event refers to
        #[arg(long)]
        path: Option<PathBuf>,
        /// Language for language_changed
        #[arg(long)]
        language: Option<String>,
        /// Raw payload for engine_notify
        #[arg(long)]
        payload: Option<String>,
        /// Stop at the first plugin that cancels
        #[arg(long)]
        cancellable: bool,
    },
    /// Open a plugin's settings
    Settings {
        /// Plugin name
        name: String,
    },
}

/// Run plugin command
pub fn run(args: PluginArgs) -> Result<()> {
    let config = ConfigLoader::load()?;
    let mut host_config = config.plugins.host_config()?;
    if let Some(reason) = args.allow_unsigned {
        host_config.signature_policy = SignaturePolicy::disabled(reason);
    }

    match args.command {
        PluginCommands::Verify { file } => verify_binary(&host_config, &file),
        PluginCommands::Sign {
            file,
            key,
            identity,
        } => sign(&file, &key, &identity),
        PluginCommands::Keygen {
            out,
            identity,
            trust,
        } => keygen(&out, &identity, trust.then_some(host_config.trust_store_path.as_path())),
        PluginCommands::List { json } => with_host(host_config, |host| list_plugins(host, json)),
        PluginCommands::Info { name } => {
            with_host(host_config, |host| show_plugin_info(host, &name))
        }
        PluginCommands::Enable { name } => {
            with_host(host_config, |host| enable_plugin(host, &name))
        }
        PluginCommands::Disable { name } => {
            with_host(host_config, |host| disable_plugin(host, &name))
        }
        PluginCommands::Reload { name } => {
            with_host(host_config, |host| reload_plugin(host, &name))
        }
        PluginCommands::Menu => with_host(host_config, |host| show_menu(host)),
        PluginCommands::Run { plugin, index } => {
            with_host(host_config, |host| run_command(host, &plugin, index))
        }
        PluginCommands::Notify {
            event,
            path,
            language,
            payload,
            cancellable,
        } => {
            let event = parse_event(&event, path, language, payload)?;
            with_host(host_config, |host| notify(host, &event, cancellable))
        }
        PluginCommands::Settings { name } => {
            with_host(host_config, |host| show_settings(host, &name))
        }
    }
}

/// Load every plugin, run `command`, then shut the host down
fn with_host<F>(config: PluginHostConfig, command: F) -> Result<()>
where
    F: FnOnce(&mut PluginHost) -> Result<()>,
{
    let mut host = PluginHost::new(config)?;
    let report = host.load_all()?;
    for failure in &report.failures {
        tracing::warn!(
            path = %failure.path.display(),
            error = %failure.error.message,
            "Plugin rejected"
        );
    }
    host.broadcast(&EditorEvent::Ready);

    let result = command(&mut host);

    host.shutdown();
    result
}

fn list_plugins(host: &PluginHost, json: bool) -> Result<()> {
    if json {
        let summaries: Vec<_> = host.descriptors().map(PluginDescriptor::summary).collect();
        let failures = host.failures();
        let output = serde_json::json!({
            "plugins": summaries,
            "failures": failures,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if host.plugin_count() == 0 && host.failures().is_empty() {
        println!("No plugins installed");
        println!();
        println!("Plugin directory: {}", host.plugin_dir().display());
        println!();
        println!("To install a plugin:");
        println!("  1. Copy the plugin library into the plugin directory");
        println!("  2. Sign it: quill plugin sign <file> --key <pem> --identity <id>");
        println!("  3. Check it: quill plugin list");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("").fg(Color::Cyan),
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Version").fg(Color::Cyan),
            Cell::new("State").fg(Color::Cyan),
            Cell::new("Commands").fg(Color::Cyan),
            Cell::new("File").fg(Color::Cyan),
        ]);

    for d in host.descriptors() {
        let version = d.info().map(|i| i.version.clone()).unwrap_or_default();
        table.add_row(vec![
            Cell::new(state_marker(d.state())).fg(state_color(d.state())),
            Cell::new(d.name()),
            Cell::new(version),
            Cell::new(d.state()),
            Cell::new(d.commands().len()),
            Cell::new(d.file_name()),
        ]);
    }

    for failure in host.failures() {
        let file = failure
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new("✗").fg(Color::Red),
            Cell::new("-"),
            Cell::new(""),
            Cell::new(format!("rejected ({:?})", failure.error.kind)),
            Cell::new(0),
            Cell::new(file),
        ]);
    }

    println!("{table}");

    if let Some(reason) = host.verification_disabled_reason() {
        println!();
        println!("Signature verification is off: {reason}");
    }

    Ok(())
}

fn state_marker(state: PluginState) -> &'static str {
    match state {
        PluginState::Initialized => "✓",
        PluginState::Disabled => "○",
        PluginState::Failed => "✗",
        PluginState::Loaded | PluginState::Unloaded => "·",
    }
}

fn state_color(state: PluginState) -> Color {
    match state {
        PluginState::Initialized => Color::Green,
        PluginState::Failed => Color::Red,
        _ => Color::Grey,
    }
}

fn show_plugin_info(host: &PluginHost, name: &str) -> Result<()> {
    let Some(d) = host.plugins().find(name) else {
        bail!("Plugin not found: {name}");
    };

    println!("Name:        {}", d.name());
    println!("State:       {}", d.state());
    println!("File:        {}", d.path().display());
    if let Some(info) = d.info() {
        println!("Version:     {}", non_empty(&info.version));
        println!("Author:      {}", non_empty(&info.author));
        println!("API Version: {}", info.api_version);
        println!("Description: {}", non_empty(&info.description));
        if !info.website.is_empty() {
            println!("Website:     {}", info.website);
        }
    }
    println!("Signer:      {}", d.signer().unwrap_or("-"));
    println!("SHA-256:     {}", d.fingerprint().unwrap_or("-"));
    println!("Settings:    {}", if d.has_settings() { "yes" } else { "no" });

    if !d.commands().is_empty() {
        println!();
        println!("Commands:");
        for (index, command) in d.commands().iter().enumerate() {
            match command.shortcut {
                Some(shortcut) => println!("  {index}: {} ({shortcut})", command.label),
                None => println!("  {index}: {}", command.label),
            }
        }
    }

    if let Some(err) = d.last_error() {
        println!();
        println!(
            "Last error:  [{}] {} at {}",
            err.kind.code(),
            err.message,
            err.at.to_rfc3339()
        );
    }

    Ok(())
}

fn non_empty(value: &str) -> &str {
    if value.is_empty() { "Unknown" } else { value }
}

fn enable_plugin(host: &mut PluginHost, name: &str) -> Result<()> {
    host.enable(name)?;
    println!("Enabled plugin: {}", name);
    println!("Run 'quill plugin list' to verify the plugin loads correctly.");
    Ok(())
}

fn disable_plugin(host: &mut PluginHost, name: &str) -> Result<()> {
    host.disable(name)?;
    println!("Disabled plugin: {}", name);
    Ok(())
}

fn reload_plugin(host: &mut PluginHost, name: &str) -> Result<()> {
    let d = host.reload(name)?;
    println!("Reloaded plugin: {} ({})", d.name(), d.state());
    Ok(())
}

fn show_menu(host: &PluginHost) -> Result<()> {
    let sections = host.menu_sections();
    if sections.iter().all(|s| s.entries.is_empty() && !s.has_settings) {
        println!("No plugin commands");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Plugin").fg(Color::Cyan),
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Command").fg(Color::Cyan),
            Cell::new("Shortcut").fg(Color::Cyan),
        ]);

    for section in &sections {
        for entry in &section.entries {
            let label = if entry.separator {
                format!("{} ─", entry.label)
            } else {
                entry.label.clone()
            };
            table.add_row(vec![
                Cell::new(&section.plugin),
                Cell::new(entry.index),
                Cell::new(label),
                Cell::new(entry.shortcut.as_deref().unwrap_or("")),
            ]);
        }
        if section.has_settings {
            table.add_row(vec![
                Cell::new(&section.plugin),
                Cell::new("-"),
                Cell::new("Settings…").fg(Color::Grey),
                Cell::new(""),
            ]);
        }
    }

    println!("{table}");
    Ok(())
}

fn run_command(host: &mut PluginHost, plugin: &str, index: usize) -> Result<()> {
    host.invoke_command(plugin, index)?;
    println!("Ran command {index} of {plugin}");
    Ok(())
}

/// Build an editor event from its command-line name
fn parse_event(
    name: &str,
    path: Option<PathBuf>,
    language: Option<String>,
    payload: Option<String>,
) -> Result<EditorEvent> {
    let require_path = |path: Option<PathBuf>| path.with_context(|| format!("{name} needs --path"));

    let event = match name {
        "ready" => EditorEvent::Ready,
        "shutdown" => EditorEvent::Shutdown,
        "file_opened" => EditorEvent::FileOpened {
            path: require_path(path)?,
        },
        "file_closed" => EditorEvent::FileClosed {
            path: require_path(path)?,
        },
        "file_saved" => EditorEvent::FileSaved {
            path: require_path(path)?,
        },
        "file_before_save" => EditorEvent::FileBeforeSave {
            path: require_path(path)?,
        },
        "buffer_activated" => EditorEvent::BufferActivated { path },
        "language_changed" => EditorEvent::LanguageChanged {
            language: language.context("language_changed needs --language")?,
        },
        "document_modified" => EditorEvent::DocumentModified,
        "selection_changed" => EditorEvent::SelectionChanged,
        "engine_notify" => EditorEvent::Engine {
            payload: payload.unwrap_or_default().into_bytes(),
        },
        other => bail!("Unknown event: {other}"),
    };
    Ok(event)
}

fn notify(host: &mut PluginHost, event: &EditorEvent, cancellable: bool) -> Result<()> {
    let report = if cancellable {
        host.broadcast_cancellable(event)
    } else {
        host.broadcast(event)
    };
    print_report(event, &report);
    Ok(())
}

fn print_report(event: &EditorEvent, report: &DispatchReport) {
    println!(
        "Delivered {} to {} plugin(s)",
        event.code().as_str(),
        report.delivered
    );
    for fault in &report.faults {
        println!("  ✗ {}: {}", fault.plugin, fault.error);
    }
    if let DispatchOutcome::Cancelled { by } = &report.outcome {
        println!("Cancelled by {by}");
    }
}

fn show_settings(host: &mut PluginHost, name: &str) -> Result<()> {
    if host.show_settings(name)? {
        println!("Opened settings for {name}");
    } else {
        println!("{name} has no settings");
    }
    Ok(())
}

fn verify_binary(config: &PluginHostConfig, file: &Path) -> Result<()> {
    let trust = TrustStore::load(&config.trust_store_path)?;
    if trust.is_empty() {
        tracing::warn!(
            path = %config.trust_store_path.display(),
            "Trust store is empty"
        );
    }
    let mut verifier = DetachedSignatureVerifier::new(trust);
    if let Some(identity) = &config.expected_identity {
        verifier = verifier.require_identity(identity.clone());
    }

    let identity = verifier.verify(file)?;
    println!("Signature OK");
    println!("Signer:  {identity}");
    println!("SHA-256: {}", fingerprint(file)?);
    Ok(())
}

fn sign(file: &Path, key_path: &Path, identity: &str) -> Result<()> {
    let pem = std::fs::read_to_string(key_path)
        .with_context(|| format!("reading {}", key_path.display()))?;
    let key = SigningKey::from_pkcs8_pem(&pem)
        .map_err(|e| anyhow::anyhow!("invalid signing key {}: {e}", key_path.display()))?;

    let sig_path = sign_binary(file, identity, &key)?;
    println!("Wrote {}", sig_path.display());
    Ok(())
}

fn keygen(out: &Path, identity: &str, trust_store: Option<&Path>) -> Result<()> {
    let key_path = out.join("signing_key.pem");
    if key_path.exists() {
        bail!("{} already exists", key_path.display());
    }
    std::fs::create_dir_all(out)?;

    let key = SigningKey::random(&mut OsRng);
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| anyhow::anyhow!("encoding signing key: {e}"))?;
    std::fs::write(&key_path, pem.as_bytes())?;
    println!("Wrote {}", key_path.display());

    let public_key = encode_public_key(key.verifying_key());
    match trust_store {
        Some(path) => {
            let mut store = TrustStore::load(path)?;
            store.trust(identity, key.verifying_key());
            store.save(path)?;
            println!("Trusted {identity} in {}", path.display());
        }
        None => {
            println!();
            println!("Add this signer to the trust store to load its plugins:");
            println!();
            println!("[[signer]]");
            println!("identity = {:?}", identity);
            println!("public_key = {:?}", public_key);
        }
    }
    Ok(())
}
