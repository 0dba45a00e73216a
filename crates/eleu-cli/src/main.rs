use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use eleu_core::csv_import::import_csv;
use eleu_core::paths::{data_dir, store_dir};
use eleu_core::settings::Settings;
use eleu_core::{
    Entry, EntryFilter, FileStore, KeySource, Session, Snapshot, SnapshotStore,
    VaultCipherStorage, VaultCrypto,
};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const ENV_PASSPHRASE: &str = "ELEUTHIA_PASSPHRASE";
const MIN_PASSPHRASE_LEN: usize = 8;

#[derive(Parser)]
#[command(name = "eleuthia")]
#[command(about = "Client-side encrypted password vault", long_about = None)]
struct Cli {
    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault
    Init,

    /// Unlock the vault and list its entries
    Unlock {
        /// Print passwords as well
        #[arg(long)]
        show_passwords: bool,
    },

    /// Add an entry, or update one with --id
    AddEntry {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Prompt for the entry password
        #[arg(long)]
        password: bool,
    },

    /// Search entries
    Search {
        #[arg(default_value = "")]
        query: String,
        /// Only entries for this URL host
        #[arg(long)]
        site: Option<String>,
        /// Only entries that have a password
        #[arg(long)]
        with_password: bool,
    },

    /// Import a browser password CSV export
    ImportCsv { file: PathBuf },

    /// Manage snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommand),

    /// Write the current encrypted vault state to a backup file
    Export {
        /// Directory to write into
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },

    /// Replace the current vault state with an exported backup file
    Import { file: PathBuf },

    /// Encrypt text with the development key
    Encrypt {
        text: String,
        /// Base64 key; defaults to ELEUTHIA_DEV_KEY
        #[arg(long)]
        key: Option<String>,
    },

    /// Decrypt a packed blob with the development key
    Decrypt {
        blob: String,
        #[arg(long)]
        key: Option<String>,
    },

    /// Generate a new base64 development key
    Keygen,
}

#[derive(Subcommand)]
enum SnapshotCommand {
    /// Snapshot the current encrypted state
    Create {
        #[arg(default_value = "")]
        name: String,
    },
    /// List snapshots, newest first
    List,
    /// Delete a snapshot
    Delete { id: String },
    /// Overwrite the current vault state with a snapshot
    Restore {
        id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

/// Everything a command needs, opened against one data directory.
struct Vault {
    cipher: VaultCipherStorage,
    session: Session,
    snapshots: SnapshotStore,
}

impl Vault {
    fn open(data_dir_override: Option<PathBuf>) -> Result<Self> {
        let data = match data_dir_override {
            Some(dir) => dir,
            None => data_dir()?,
        };
        std::fs::create_dir_all(&data)
            .with_context(|| format!("creating data dir {}", data.display()))?;
        debug!(data_dir = %data.display(), "opening vault");
        let settings = Settings::load(&data).context("loading settings")?;
        let store = FileStore::open(store_dir(&data)).context("opening store")?;
        let cipher = VaultCipherStorage::new(Arc::new(store));
        Ok(Self {
            session: Session::new(cipher.clone(), &settings),
            snapshots: SnapshotStore::new(cipher.clone(), &settings),
            cipher,
        })
    }

    fn unlock(&self) -> Result<()> {
        if !self.cipher.has_vault()? {
            bail!("no vault found; run `eleuthia init` first");
        }
        let passphrase = prompt_passphrase_once("Vault passphrase: ")?;
        self.session
            .unlock(&passphrase)
            .context("wrong passphrase or damaged vault")
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data = cli.data_dir;
    match cli.command {
        Commands::Encrypt { text, key } => encrypt_command(data, &text, key),
        Commands::Decrypt { blob, key } => decrypt_command(data, &blob, key),
        Commands::Keygen => {
            let key = eleu_core::crypto::generate_dev_key();
            println!("{}", key.as_str());
            Ok(())
        }
        Commands::Init => init_command(&Vault::open(data)?),
        Commands::Unlock { show_passwords } => {
            let vault = Vault::open(data)?;
            vault.unlock()?;
            let entries = vault.session.with_contents(|c| c.entries.clone())?;
            print_entries(entries.iter(), show_passwords);
            Ok(())
        }
        Commands::AddEntry {
            id,
            title,
            username,
            url,
            notes,
            password,
        } => {
            let vault = Vault::open(data)?;
            vault.unlock()?;
            let mut entry = match id {
                Some(id) => vault
                    .session
                    .with_contents(|c| c.get(&id).cloned())?
                    .ok_or_else(|| anyhow!("no entry with id {id}"))?,
                None => Entry::new(""),
            };
            if let Some(title) = title {
                entry.title = title;
            }
            if entry.title.trim().is_empty() {
                bail!("an entry needs a --title");
            }
            entry.username = username.or(entry.username.take());
            entry.url = url.or(entry.url.take());
            entry.notes = notes.or(entry.notes.take());
            if password {
                let pw = rpassword::prompt_password("Entry password: ")
                    .map_err(|e| anyhow!("password prompt: {e}"))?;
                entry.password = (!pw.is_empty()).then_some(pw);
            }
            let id = entry.id.clone();
            vault.session.save_entry(entry)?;
            println!("Saved entry {id}");
            Ok(())
        }
        Commands::Search {
            query,
            site,
            with_password,
        } => {
            let vault = Vault::open(data)?;
            vault.unlock()?;
            let filter = EntryFilter {
                query,
                site,
                only_with_password: with_password,
            };
            let hits: Vec<Entry> = vault
                .session
                .with_contents(|c| c.filter(&filter).into_iter().cloned().collect())?;
            print_entries(hits.iter(), false);
            Ok(())
        }
        Commands::ImportCsv { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let entries = import_csv(&text);
            if entries.is_empty() {
                bail!("no importable rows in {}", file.display());
            }
            let vault = Vault::open(data)?;
            vault.unlock()?;
            let count = vault.session.import_entries(entries)?;
            println!("Imported {count} entries");
            Ok(())
        }
        Commands::Snapshot(cmd) => snapshot_command(&Vault::open(data)?, cmd),
        Commands::Export { out } => {
            let export = Vault::open(data)?.snapshots.export_current()?;
            let path = out.join(&export.file_name);
            std::fs::write(&path, export.contents)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Exported to {}", path.display());
            Ok(())
        }
        Commands::Import { file } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            Vault::open(data)?
                .snapshots
                .import_from_file(&contents)
                .context("import rejected; current vault left unchanged")?;
            println!("Imported encrypted backup. Unlock again to use it.");
            Ok(())
        }
    }
}

fn init_command(vault: &Vault) -> Result<()> {
    if vault.cipher.has_vault()? {
        bail!("a vault already exists here");
    }
    let passphrase = prompt_passphrase_twice("Create vault passphrase: ")?;
    vault.session.create(&passphrase)?;
    println!("Vault created");
    Ok(())
}

fn snapshot_command(vault: &Vault, cmd: SnapshotCommand) -> Result<()> {
    match cmd {
        SnapshotCommand::Create { name } => {
            let snapshot = vault.snapshots.create(&name)?;
            println!("Created snapshot {} ({})", snapshot.id, snapshot.name);
        }
        SnapshotCommand::List => {
            let list = vault.snapshots.list()?;
            if list.is_empty() {
                println!("No snapshots");
            }
            for s in list {
                println!("{}  {}  {}", s.id, format_millis(s.created_at), s.name);
            }
        }
        SnapshotCommand::Delete { id } => {
            vault.snapshots.delete(&id)?;
            println!("Deleted {id}");
        }
        SnapshotCommand::Restore { id, yes } => {
            let restored = vault
                .snapshots
                .restore_by_id(&id, |s| yes || confirm_restore(s))?;
            if restored {
                println!("Restored {id}. Unlock again to use it.");
            } else {
                println!("Restore cancelled");
            }
        }
    }
    Ok(())
}

fn encrypt_command(data_dir_override: Option<PathBuf>, text: &str, key: Option<String>) -> Result<()> {
    let crypto = standalone_crypto(data_dir_override, key)?;
    println!("{}", crypto.encrypt(text)?);
    Ok(())
}

fn decrypt_command(data_dir_override: Option<PathBuf>, blob: &str, key: Option<String>) -> Result<()> {
    let crypto = standalone_crypto(data_dir_override, key)?;
    let plain = crypto.decrypt(blob).context("decryption failed")?;
    println!("{}", plain.as_str());
    Ok(())
}

fn standalone_crypto(data_dir_override: Option<PathBuf>, key: Option<String>) -> Result<VaultCrypto> {
    let settings = match data_dir_override {
        Some(dir) => load_settings(&dir)?,
        None => match data_dir() {
            Ok(dir) => load_settings(&dir)?,
            Err(_) => Settings::default().with_overrides(|name| std::env::var(name).ok())?,
        },
    };
    let source = match key.as_deref() {
        Some(encoded) => KeySource::Base64(encoded),
        None => KeySource::Configured,
    };
    Ok(VaultCrypto::initialize(source, &settings)?)
}

fn load_settings(dir: &Path) -> Result<Settings> {
    Settings::load(dir).with_context(|| format!("loading settings from {}", dir.display()))
}

fn print_entries<'a>(entries: impl Iterator<Item = &'a Entry>, show_passwords: bool) {
    let mut any = false;
    for e in entries {
        any = true;
        println!("{}  {}", e.id, e.title);
        if let Some(user) = e.username.as_deref().filter(|u| !u.is_empty()) {
            println!("    user: {user}");
        }
        if let Some(url) = e.url.as_deref().filter(|u| !u.is_empty()) {
            println!("    url:  {url}");
        }
        if show_passwords {
            if let Some(pw) = e.password.as_deref() {
                println!("    pass: {pw}");
            }
        } else if e.has_password() {
            println!("    pass: ********");
        }
    }
    if !any {
        println!("No entries");
    }
}

fn format_millis(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn confirm_restore(snapshot: &Snapshot) -> bool {
    print!(
        "Restore \"{}\" from {}? This overwrites the current vault state. [y/N] ",
        snapshot.name,
        format_millis(snapshot.created_at)
    );
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn prompt_passphrase_once(prompt: &str) -> Result<String> {
    if let Ok(pw) = std::env::var(ENV_PASSPHRASE) {
        if !pw.is_empty() {
            return Ok(pw);
        }
    }
    rpassword::prompt_password(prompt).map_err(|e| anyhow!("passphrase prompt: {e}"))
}

fn prompt_passphrase_twice(prompt: &str) -> Result<String> {
    let first = prompt_passphrase_once(prompt)?;
    if first.len() < MIN_PASSPHRASE_LEN {
        bail!("passphrase too short; minimum {MIN_PASSPHRASE_LEN} characters");
    }
    if std::env::var(ENV_PASSPHRASE).is_ok_and(|pw| !pw.is_empty()) {
        return Ok(first);
    }
    let second = rpassword::prompt_password("Confirm passphrase: ")
        .map_err(|e| anyhow!("passphrase prompt: {e}"))?;
    if first != second {
        bail!("passphrases do not match");
    }
    Ok(first)
}
